//! bioRxiv client - preprint PDFs for `10.1101/…` DOIs.
//!
//! Queries the bioRxiv details API for the newest posted version and
//! constructs the content-server PDF URL from it. DOIs outside the bioRxiv
//! prefix resolve to nothing without a network call.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::SourceConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Publication, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, make_candidate};

/// Default bioRxiv API base URL.
const DEFAULT_BASE_URL: &str = "https://api.biorxiv.org";

/// Content server hosting the actual PDFs.
const CONTENT_BASE_URL: &str = "https://www.biorxiv.org";

/// DOI prefix shared by bioRxiv (and medRxiv) preprints.
const BIORXIV_DOI_PREFIX: &str = "10.1101/";

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    collection: Vec<DetailsEntry>,
}

#[derive(Debug, Deserialize)]
struct DetailsEntry {
    version: Option<String>,
}

/// Resolves bioRxiv preprint DOIs to PDF URLs.
pub struct BiorxivClient {
    fetcher: Fetcher,
    tier: u8,
    base_url: String,
    content_base_url: String,
}

impl BiorxivClient {
    /// Creates a client from configuration.
    #[must_use]
    pub fn new(fetcher: Fetcher, config: &SourceConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        // Tests point both endpoints at the same mock server.
        let content_base_url = if config.base_url.is_some() {
            base_url.clone()
        } else {
            CONTENT_BASE_URL.to_string()
        };
        Self {
            fetcher,
            tier: config.tier,
            base_url,
            content_base_url,
        }
    }
}

#[async_trait]
impl SourceClient for BiorxivClient {
    fn name(&self) -> &'static str {
        "biorxiv"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    #[instrument(skip(self, publication), fields(source = "biorxiv", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(doi) = publication.doi.as_deref() else {
            return Ok(Vec::new());
        };
        if !doi.starts_with(BIORXIV_DOI_PREFIX) {
            return Ok(Vec::new());
        }

        let url = format!("{}/details/biorxiv/{doi}", self.base_url);
        let response = match self.fetcher.get_json::<DetailsResponse>(&url).await {
            Ok(body) => body,
            Err(FetchError::HttpStatus { status: 404, .. }) => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::unavailable(self.name(), &e)),
        };

        // The collection is ordered oldest-first; the last entry is the
        // newest posted version.
        let Some(version) = response
            .collection
            .last()
            .and_then(|entry| entry.version.clone())
        else {
            debug!(doi = %doi, "not a known bioRxiv preprint");
            return Ok(Vec::new());
        };

        let candidates = vec![
            make_candidate(
                publication,
                self.name(),
                self.tier,
                format!("{}/content/{doi}v{version}.full.pdf", self.content_base_url),
                UrlKind::Pdf,
            ),
            make_candidate(
                publication,
                self.name(),
                self.tier,
                format!("{}/content/{doi}v{version}", self.content_base_url),
                UrlKind::LandingHtml,
            ),
        ];
        Ok(candidates)
    }
}

impl std::fmt::Debug for BiorxivClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiorxivClient")
            .field("tier", &self.tier)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
