//! Unpaywall client - open-access location lookup by DOI.
//!
//! Queries `https://api.unpaywall.org/v2/{doi}` and turns the reported OA
//! locations into candidates: `url_for_pdf` as direct PDF links, `url` as
//! landing pages. Unpaywall requires a contact email on every request.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::SourceConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Publication, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, make_candidate};

/// Default Unpaywall API base URL.
const DEFAULT_BASE_URL: &str = "https://api.unpaywall.org";

// ==================== Unpaywall API Response Types ====================

/// Top-level Unpaywall response for one DOI.
#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    best_oa_location: Option<OaLocation>,
    #[serde(default)]
    oa_locations: Vec<OaLocation>,
}

/// One open-access location.
#[derive(Debug, Deserialize)]
struct OaLocation {
    url_for_pdf: Option<String>,
    url: Option<String>,
}

/// Resolves DOIs to open-access URLs via the Unpaywall REST API.
pub struct UnpaywallClient {
    fetcher: Fetcher,
    tier: u8,
    base_url: String,
    email: String,
}

impl UnpaywallClient {
    /// Creates a client from configuration.
    #[must_use]
    pub fn new(fetcher: Fetcher, config: &SourceConfig, contact_email: &str) -> Self {
        Self {
            fetcher,
            tier: config.tier,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            email: contact_email.to_string(),
        }
    }
}

#[async_trait]
impl SourceClient for UnpaywallClient {
    fn name(&self) -> &'static str {
        "unpaywall"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    #[instrument(skip(self, publication), fields(source = "unpaywall", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(doi) = publication.doi.as_deref() else {
            debug!("no DOI; nothing to look up");
            return Ok(Vec::new());
        };

        // Unpaywall takes the DOI verbatim in the path, slash included.
        let url = format!(
            "{}/v2/{doi}?email={}",
            self.base_url,
            urlencoding::encode(&self.email)
        );

        let response = match self.fetcher.get_json::<UnpaywallResponse>(&url).await {
            Ok(body) => body,
            Err(FetchError::HttpStatus { status: 404, .. }) => {
                debug!(doi = %doi, "DOI not known to Unpaywall");
                return Ok(Vec::new());
            }
            Err(e) => return Err(SourceError::unavailable(self.name(), &e)),
        };

        let mut candidates = Vec::new();
        let locations = response
            .best_oa_location
            .into_iter()
            .chain(response.oa_locations);
        for location in locations {
            if let Some(pdf_url) = location.url_for_pdf {
                candidates.push(make_candidate(
                    publication,
                    self.name(),
                    self.tier,
                    pdf_url,
                    UrlKind::Pdf,
                ));
            }
            if let Some(landing) = location.url {
                candidates.push(make_candidate(
                    publication,
                    self.name(),
                    self.tier,
                    landing,
                    UrlKind::LandingHtml,
                ));
            }
        }

        debug!(count = candidates.len(), "unpaywall candidates");
        Ok(candidates)
    }
}

impl std::fmt::Debug for UnpaywallClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnpaywallClient")
            .field("tier", &self.tier)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::FetcherConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, tier: u8) -> UnpaywallClient {
        let fetcher = Fetcher::new(
            &FetcherConfig {
                retry_backoff_s: 0.01,
                ..FetcherConfig::default()
            },
            "test@example.org",
        )
        .unwrap();
        let config = SourceConfig {
            enabled: true,
            tier,
            rate_per_window: 100,
            window_seconds: 1,
            api_key: None,
            base_url: Some(server.uri()),
            url_template: None,
        };
        UnpaywallClient::new(fetcher, &config, "test@example.org")
    }

    fn doi_publication(doi: &str) -> Publication {
        Publication::new(Some("1"), Some(doi), "Paper")
    }

    #[tokio::test]
    async fn test_resolve_yields_pdf_and_landing_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/10.1000/j.test.1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "best_oa_location": {
                        "url_for_pdf": "https://repo.example.org/paper.pdf",
                        "url": "https://repo.example.org/paper"
                    },
                    "oa_locations": []
                }"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let candidates = client
            .resolve(&doi_publication("10.1000/j.test.1"))
            .await
            .unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].kind, UrlKind::Pdf);
        assert_eq!(candidates[0].url, "https://repo.example.org/paper.pdf");
        assert_eq!(candidates[0].tier, 2);
        assert_eq!(candidates[0].source_name, "unpaywall");
        assert_eq!(candidates[1].kind, UrlKind::LandingHtml);
    }

    #[tokio::test]
    async fn test_resolve_404_is_empty_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let candidates = client
            .resolve(&doi_publication("10.1000/unknown"))
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_without_doi_is_empty() {
        let server = MockServer::start().await;
        let client = client_for(&server, 2);
        let publication = Publication::new(Some("1"), None, "No DOI");
        let candidates = client.resolve(&publication).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_5xx_is_source_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let result = client.resolve(&doi_publication("10.1000/j.test.1")).await;
        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
    }
}
