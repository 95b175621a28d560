//! Europe PMC client - full-text URL lookup via the REST search API.
//!
//! Queries `…/europepmc/webservices/rest/search` with an `EXT_ID:` (PMID) or
//! `DOI:` query and reads the `fullTextUrlList` of the first hit. The
//! `documentStyle` field distinguishes direct PDFs from HTML full text.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::SourceConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Publication, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, make_candidate};

/// Default Europe PMC base URL.
const DEFAULT_BASE_URL: &str = "https://www.ebi.ac.uk";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    result_list: Option<ResultList>,
}

#[derive(Debug, Deserialize)]
struct ResultList {
    #[serde(default)]
    result: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    full_text_url_list: Option<FullTextUrlList>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullTextUrlList {
    #[serde(default)]
    full_text_url: Vec<FullTextUrl>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullTextUrl {
    url: String,
    document_style: Option<String>,
}

/// Resolves publications via the Europe PMC REST API.
pub struct EuropePmcClient {
    fetcher: Fetcher,
    tier: u8,
    base_url: String,
}

impl EuropePmcClient {
    /// Creates a client from configuration.
    #[must_use]
    pub fn new(fetcher: Fetcher, config: &SourceConfig) -> Self {
        Self {
            fetcher,
            tier: config.tier,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn query_for(publication: &Publication) -> Option<String> {
        if let Some(pmid) = publication.id.pmid() {
            return Some(format!("EXT_ID:{pmid} AND SRC:MED"));
        }
        publication
            .doi
            .as_deref()
            .map(|doi| format!("DOI:\"{doi}\""))
    }
}

#[async_trait]
impl SourceClient for EuropePmcClient {
    fn name(&self) -> &'static str {
        "europepmc"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    #[instrument(skip(self, publication), fields(source = "europepmc", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(query) = Self::query_for(publication) else {
            return Ok(Vec::new());
        };

        let url = format!(
            "{}/europepmc/webservices/rest/search?query={}&resultType=core&format=json&pageSize=1",
            self.base_url,
            urlencoding::encode(&query)
        );

        let response = match self.fetcher.get_json::<SearchResponse>(&url).await {
            Ok(body) => body,
            Err(FetchError::HttpStatus { status: 404, .. }) => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::unavailable(self.name(), &e)),
        };

        let urls = response
            .result_list
            .and_then(|list| list.result.into_iter().next())
            .and_then(|hit| hit.full_text_url_list)
            .map(|list| list.full_text_url)
            .unwrap_or_default();

        let candidates: Vec<UrlCandidate> = urls
            .into_iter()
            .map(|entry| {
                let kind = match entry.document_style.as_deref() {
                    Some(style) if style.eq_ignore_ascii_case("pdf") => UrlKind::Pdf,
                    _ => UrlKind::LandingHtml,
                };
                make_candidate(publication, self.name(), self.tier, entry.url, kind)
            })
            .collect();

        debug!(count = candidates.len(), "europepmc candidates");
        Ok(candidates)
    }
}

impl std::fmt::Debug for EuropePmcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EuropePmcClient")
            .field("tier", &self.tier)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
