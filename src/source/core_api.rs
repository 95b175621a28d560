//! CORE client - aggregated repository full text by DOI.
//!
//! Queries the CORE works search endpoint with a DOI filter and surfaces
//! each hit's `downloadUrl`. CORE requires an API key; the registry skips
//! this source when none is configured.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::config::SourceConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Publication, UrlCandidate};

use super::{SourceClient, SourceError, kind_from_url, make_candidate};

/// Default CORE API base URL.
const DEFAULT_BASE_URL: &str = "https://api.core.ac.uk";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoreSearchResponse {
    #[serde(default)]
    results: Vec<CoreWork>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoreWork {
    download_url: Option<String>,
}

/// Resolves DOIs via the CORE aggregator.
pub struct CoreClient {
    fetcher: Fetcher,
    tier: u8,
    base_url: String,
    api_key: String,
}

impl CoreClient {
    /// Builds the client when an API key is configured; `None` otherwise.
    #[must_use]
    pub fn from_config(config: &SourceConfig, fetcher: Fetcher) -> Option<Self> {
        let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
            warn!("CORE enabled but no API key configured");
            return None;
        };
        Some(Self {
            fetcher,
            tier: config.tier,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl SourceClient for CoreClient {
    fn name(&self) -> &'static str {
        "core"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    #[instrument(skip(self, publication), fields(source = "core", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(doi) = publication.doi.as_deref() else {
            return Ok(Vec::new());
        };

        let query = format!("doi:\"{doi}\"");
        let url = format!(
            "{}/v3/search/works?q={}&limit=5&api_key={}",
            self.base_url,
            urlencoding::encode(&query),
            urlencoding::encode(&self.api_key)
        );

        let response = match self.fetcher.get_json::<CoreSearchResponse>(&url).await {
            Ok(body) => body,
            Err(FetchError::HttpStatus { status: 404, .. }) => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::unavailable(self.name(), &e)),
        };

        let candidates: Vec<UrlCandidate> = response
            .results
            .into_iter()
            .filter_map(|work| work.download_url)
            .filter(|url| !url.is_empty())
            .map(|url| {
                let kind = kind_from_url(&url);
                make_candidate(publication, self.name(), self.tier, url, kind)
            })
            .collect();

        debug!(count = candidates.len(), "core candidates");
        Ok(candidates)
    }
}

impl std::fmt::Debug for CoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreClient")
            .field("tier", &self.tier)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
