//! Crossref client - publisher full-text links by DOI.
//!
//! Queries `https://api.crossref.org/works/{doi}` and extracts the
//! `message.link` array. Links declaring `application/pdf` (or a `.pdf`
//! path) become PDF candidates; `text/html` full-text links become landing
//! pages. All requests include a `mailto` query parameter for Crossref's
//! polite pool, which grants higher rate limits.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::SourceConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Publication, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, make_candidate};

/// Default Crossref API base URL.
const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

// ==================== Crossref API Response Types ====================

/// Top-level Crossref API response.
#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    status: String,
    message: CrossrefMessage,
}

/// The `message` field from a Crossref works response.
#[derive(Debug, Deserialize)]
struct CrossrefMessage {
    #[serde(default)]
    link: Vec<CrossrefLink>,
}

/// A resource link from the Crossref response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CrossrefLink {
    /// The URL field is uppercase in the Crossref response.
    #[serde(rename = "URL")]
    url: String,
    content_type: Option<String>,
    intended_application: Option<String>,
}

/// Resolves DOIs to publisher full-text links via the Crossref REST API.
pub struct CrossrefClient {
    fetcher: Fetcher,
    tier: u8,
    base_url: String,
    mailto: String,
}

impl CrossrefClient {
    /// Creates a client configured for the Crossref polite pool.
    #[must_use]
    pub fn new(fetcher: Fetcher, config: &SourceConfig, contact_email: &str) -> Self {
        Self {
            fetcher,
            tier: config.tier,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            mailto: contact_email.to_string(),
        }
    }

    fn classify_link(link: &CrossrefLink) -> Option<UrlKind> {
        let content_type = link.content_type.as_deref().unwrap_or("");
        if content_type.eq_ignore_ascii_case("application/pdf")
            || link.url.to_ascii_lowercase().ends_with(".pdf")
        {
            return Some(UrlKind::Pdf);
        }
        if content_type.eq_ignore_ascii_case("text/html") {
            return Some(UrlKind::LandingHtml);
        }
        // "similarity-checking" and text-mining XML links are not usable
        // full text for this pipeline.
        if link
            .intended_application
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("similarity-checking"))
        {
            return None;
        }
        None
    }
}

#[async_trait]
impl SourceClient for CrossrefClient {
    fn name(&self) -> &'static str {
        "crossref"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    #[instrument(skip(self, publication), fields(source = "crossref", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(doi) = publication.doi.as_deref() else {
            return Ok(Vec::new());
        };

        // Crossref accepts the DOI verbatim in the path.
        let url = format!(
            "{}/works/{doi}?mailto={}",
            self.base_url,
            urlencoding::encode(&self.mailto)
        );

        let body = match self.fetcher.get_json::<CrossrefResponse>(&url).await {
            Ok(body) => body,
            Err(FetchError::HttpStatus { status: 404, .. }) => {
                debug!(doi = %doi, "DOI not found in Crossref");
                return Ok(Vec::new());
            }
            Err(e) => return Err(SourceError::unavailable(self.name(), &e)),
        };

        if !body.status.eq_ignore_ascii_case("ok") {
            return Err(SourceError::unavailable_with_reason(
                self.name(),
                format!("unexpected response status '{}'", body.status),
            ));
        }

        let mut candidates = Vec::new();
        for link in &body.message.link {
            if let Some(kind) = Self::classify_link(link) {
                candidates.push(make_candidate(
                    publication,
                    self.name(),
                    self.tier,
                    link.url.clone(),
                    kind,
                ));
            }
        }

        debug!(count = candidates.len(), "crossref candidates");
        Ok(candidates)
    }
}

impl std::fmt::Debug for CrossrefClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossrefClient")
            .field("tier", &self.tier)
            .field("base_url", &self.base_url)
            .field("mailto", &self.mailto)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::FetcherConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> CrossrefClient {
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
            tier: 5,
            rate_per_window: 100,
            window_seconds: 1,
            api_key: None,
            base_url: Some(server.uri()),
            url_template: None,
        };
        CrossrefClient::new(fetcher, &config, "test@example.org")
    }

    #[tokio::test]
    async fn test_resolve_classifies_pdf_and_html_links() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.1000/j.test.1"))
            .and(query_param("mailto", "test@example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "status": "ok",
                    "message": {
                        "link": [
                            {"URL": "https://publisher.example.org/article.pdf",
                             "content-type": "application/pdf",
                             "intended-application": "text-mining"},
                            {"URL": "https://publisher.example.org/article",
                             "content-type": "text/html",
                             "intended-application": "text-mining"},
                            {"URL": "https://publisher.example.org/similarity.xml",
                             "content-type": "application/xml",
                             "intended-application": "similarity-checking"}
                        ]
                    }
                }"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let publication = Publication::new(None, Some("10.1000/j.test.1"), "Paper");
        let candidates = client.resolve(&publication).await.unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].kind, UrlKind::Pdf);
        assert_eq!(candidates[1].kind, UrlKind::LandingHtml);
        assert_eq!(candidates[0].tier, 5);
    }

    #[tokio::test]
    async fn test_resolve_404_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let publication = Publication::new(None, Some("10.1000/missing"), "Paper");
        assert!(client.resolve(&publication).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_non_ok_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"status": "error", "message": {"link": []}}"#),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let publication = Publication::new(None, Some("10.1000/j.test.1"), "Paper");
        assert!(matches!(
            client.resolve(&publication).await,
            Err(SourceError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_without_doi_skips_network() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        let publication = Publication::new(Some("123"), None, "Paper");
        assert!(client.resolve(&publication).await.unwrap().is_empty());
        // No mock mounted: reaching the network would have errored.
    }
}
