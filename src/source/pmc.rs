//! PubMed Central client - free full text via the NCBI ID converter.
//!
//! Maps a PMID to a PMCID with the ID converter service, then constructs the
//! PMC article PDF and landing URLs. Papers without a PMCID have no PMC
//! deposit and resolve to nothing.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::SourceConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Publication, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, make_candidate};

/// Default NCBI base URL (ID converter and article pages share the host).
const DEFAULT_BASE_URL: &str = "https://www.ncbi.nlm.nih.gov";

#[derive(Debug, Deserialize)]
struct IdConvResponse {
    #[serde(default)]
    records: Vec<IdConvRecord>,
}

#[derive(Debug, Deserialize)]
struct IdConvRecord {
    pmcid: Option<String>,
}

/// Resolves PMIDs to PubMed Central full-text URLs.
pub struct PmcClient {
    fetcher: Fetcher,
    tier: u8,
    base_url: String,
    api_key: Option<String>,
}

impl PmcClient {
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
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl SourceClient for PmcClient {
    fn name(&self) -> &'static str {
        "pmc"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    #[instrument(skip(self, publication), fields(source = "pmc", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(pmid) = publication.id.pmid() else {
            return Ok(Vec::new());
        };

        let mut url = format!(
            "{}/pmc/utils/idconv/v1.0/?ids={}&format=json",
            self.base_url,
            urlencoding::encode(pmid)
        );
        if let Some(key) = &self.api_key {
            url.push_str("&api_key=");
            url.push_str(&urlencoding::encode(key));
        }

        let response = match self.fetcher.get_json::<IdConvResponse>(&url).await {
            Ok(body) => body,
            Err(FetchError::HttpStatus { status: 404, .. }) => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::unavailable(self.name(), &e)),
        };

        let Some(pmcid) = response.records.into_iter().find_map(|r| r.pmcid) else {
            debug!(pmid = %pmid, "no PMCID; not deposited in PMC");
            return Ok(Vec::new());
        };

        let candidates = vec![
            make_candidate(
                publication,
                self.name(),
                self.tier,
                format!("{}/pmc/articles/{pmcid}/pdf", self.base_url),
                UrlKind::Pdf,
            ),
            make_candidate(
                publication,
                self.name(),
                self.tier,
                format!("{}/pmc/articles/{pmcid}/", self.base_url),
                UrlKind::LandingHtml,
            ),
        ];
        debug!(pmcid = %pmcid, "pmc candidates constructed");
        Ok(candidates)
    }
}

impl std::fmt::Debug for PmcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmcClient")
            .field("tier", &self.tier)
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}
