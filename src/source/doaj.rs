//! DOAJ client - full-text links for open-access journal articles.
//!
//! Queries the DOAJ article search API by DOI and surfaces `bibjson.link`
//! entries of type `fulltext`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::SourceConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Publication, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, kind_from_url, make_candidate};

/// Default DOAJ base URL.
const DEFAULT_BASE_URL: &str = "https://doaj.org";

#[derive(Debug, Deserialize)]
struct DoajSearchResponse {
    #[serde(default)]
    results: Vec<DoajArticle>,
}

#[derive(Debug, Deserialize)]
struct DoajArticle {
    bibjson: Option<DoajBibjson>,
}

#[derive(Debug, Deserialize)]
struct DoajBibjson {
    #[serde(default)]
    link: Vec<DoajLink>,
}

#[derive(Debug, Deserialize)]
struct DoajLink {
    #[serde(rename = "type")]
    link_type: Option<String>,
    url: Option<String>,
    content_type: Option<String>,
}

/// Resolves DOIs via the DOAJ article search API.
pub struct DoajClient {
    fetcher: Fetcher,
    tier: u8,
    base_url: String,
}

impl DoajClient {
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
}

#[async_trait]
impl SourceClient for DoajClient {
    fn name(&self) -> &'static str {
        "doaj"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    #[instrument(skip(self, publication), fields(source = "doaj", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(doi) = publication.doi.as_deref() else {
            return Ok(Vec::new());
        };

        let url = format!(
            "{}/api/search/articles/doi%3A{}",
            self.base_url,
            urlencoding::encode(doi)
        );

        let response = match self.fetcher.get_json::<DoajSearchResponse>(&url).await {
            Ok(body) => body,
            Err(FetchError::HttpStatus { status: 404, .. }) => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::unavailable(self.name(), &e)),
        };

        let mut candidates = Vec::new();
        for article in response.results {
            let Some(bibjson) = article.bibjson else {
                continue;
            };
            for link in bibjson.link {
                let is_fulltext = link
                    .link_type
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case("fulltext"));
                let Some(link_url) = link.url.filter(|_| is_fulltext) else {
                    continue;
                };
                let kind = match link.content_type.as_deref() {
                    Some(ct) if ct.eq_ignore_ascii_case("application/pdf") => UrlKind::Pdf,
                    Some(ct) if ct.eq_ignore_ascii_case("text/html") => UrlKind::LandingHtml,
                    _ => kind_from_url(&link_url),
                };
                candidates.push(make_candidate(
                    publication,
                    self.name(),
                    self.tier,
                    link_url,
                    kind,
                ));
            }
        }

        debug!(count = candidates.len(), "doaj candidates");
        Ok(candidates)
    }
}

impl std::fmt::Debug for DoajClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoajClient")
            .field("tier", &self.tier)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
