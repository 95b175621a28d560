//! Last-resort mirror clients (best effort, default off).
//!
//! Mirrors serve a page embedding the PDF rather than a direct link. Only
//! the two extraction patterns measured to succeed are implemented:
//! an `<embed src=…>` of type `application/pdf`, and an `<iframe src=…>`
//! with a pdf id. Every other historical pattern measured at 0% success and
//! is intentionally absent.
//!
//! Mirrors are doubly gated: the `features.enable_last_resort_mirrors`
//! config flag controls registration, the per-run option controls
//! participation in discovery, and the configured base URL must resolve to
//! an allow-listed hostname.

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};

use crate::config::SourceConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Publication, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, make_candidate};

/// Mirror hostnames observed reachable in offline measurement.
const ALLOWED_MIRROR_HOSTS: [&str; 3] = ["sci-hub.se", "sci-hub.st", "sci-hub.ru"];

/// A single last-resort mirror endpoint.
pub struct MirrorClient {
    fetcher: Fetcher,
    name: &'static str,
    tier: u8,
    base_url: String,
}

impl MirrorClient {
    /// Builds the client when the configured base URL host is allow-listed.
    #[must_use]
    pub fn from_config(name: &str, config: &SourceConfig, fetcher: Fetcher) -> Option<Self> {
        let name = Self::static_name(name)?;
        let Some(base_url) = config.base_url.clone() else {
            warn!(source = name, "mirror enabled but no base_url configured");
            return None;
        };
        let host = url::Url::parse(&base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
        let allowed = host
            .as_deref()
            .is_some_and(|h| ALLOWED_MIRROR_HOSTS.contains(&h));
        if !allowed {
            warn!(source = name, base_url = %base_url, "mirror host not allow-listed; skipping");
            return None;
        }
        Some(Self::with_base_url(name, config.tier, base_url, fetcher))
    }

    /// Builds a client against an arbitrary base URL.
    ///
    /// Bypasses the hostname allow-list; intended for tests against mock
    /// servers.
    #[must_use]
    pub fn with_base_url(
        name: &'static str,
        tier: u8,
        base_url: impl Into<String>,
        fetcher: Fetcher,
    ) -> Self {
        Self {
            fetcher,
            name,
            tier,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn static_name(name: &str) -> Option<&'static str> {
        match name {
            "mirror_a" => Some("mirror_a"),
            "mirror_b" => Some("mirror_b"),
            _ => None,
        }
    }

    /// Extracts the PDF URL from a mirror page using the two effective
    /// patterns.
    fn extract_pdf_url(html: &str) -> Option<String> {
        let document = Html::parse_document(html);

        // Pattern 1: embed-with-src.
        if let Ok(selector) = Selector::parse("embed[type='application/pdf'][src]") {
            if let Some(src) = document
                .select(&selector)
                .find_map(|el| el.value().attr("src"))
            {
                return Some(src.to_string());
            }
        }

        // Pattern 2: iframe-with-src.
        if let Ok(selector) = Selector::parse("iframe#pdf[src]") {
            if let Some(src) = document
                .select(&selector)
                .find_map(|el| el.value().attr("src"))
            {
                return Some(src.to_string());
            }
        }

        None
    }

    /// Normalizes protocol-relative and path-relative PDF URLs.
    fn normalize_url(&self, raw: &str) -> String {
        if raw.starts_with("//") {
            format!("https:{raw}")
        } else if raw.starts_with('/') {
            format!("{}{raw}", self.base_url)
        } else {
            raw.to_string()
        }
    }
}

#[async_trait]
impl SourceClient for MirrorClient {
    fn name(&self) -> &'static str {
        self.name
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    fn kind_preference(&self) -> &[UrlKind] {
        &[UrlKind::Pdf]
    }

    fn last_resort(&self) -> bool {
        true
    }

    #[instrument(skip(self, publication), fields(source = self.name, publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(doi) = publication.doi.as_deref() else {
            return Ok(Vec::new());
        };

        let page_url = format!("{}/{doi}", self.base_url);
        let html = match self.fetcher.get_text(&page_url).await {
            Ok(html) => html,
            Err(FetchError::HttpStatus { status: 404, .. }) => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::unavailable(self.name, &e)),
        };

        let Some(raw_url) = Self::extract_pdf_url(&html) else {
            debug!(doi = %doi, "no pdf pattern on mirror page");
            return Ok(Vec::new());
        };
        let pdf_url = self.normalize_url(&raw_url);

        if url::Url::parse(&pdf_url).is_err() {
            debug!(url = %pdf_url, "extracted mirror url is unparseable");
            return Ok(Vec::new());
        }

        Ok(vec![make_candidate(
            publication,
            self.name,
            self.tier,
            pdf_url,
            UrlKind::Pdf,
        )])
    }
}

impl std::fmt::Debug for MirrorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorClient")
            .field("name", &self.name)
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

    fn client_for(server: &MockServer) -> MirrorClient {
        let fetcher = Fetcher::new(
            &FetcherConfig {
                retry_backoff_s: 0.01,
                ..FetcherConfig::default()
            },
            "test@example.org",
        )
        .unwrap();
        MirrorClient::with_base_url("mirror_a", 7, server.uri(), fetcher)
    }

    #[tokio::test]
    async fn test_resolve_extracts_embed_pattern() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/10.1000/j.test.1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body>
                    <embed type="application/pdf" src="//mirror.example.org/papers/1.pdf"/>
                </body></html>"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let publication = Publication::new(None, Some("10.1000/j.test.1"), "Paper");
        let candidates = client.resolve(&publication).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://mirror.example.org/papers/1.pdf");
        assert_eq!(candidates[0].kind, UrlKind::Pdf);
        assert_eq!(candidates[0].tier, 7);
    }

    #[tokio::test]
    async fn test_resolve_extracts_iframe_pattern_with_relative_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body><iframe id="pdf" src="/papers/2.pdf"></iframe></body></html>"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let publication = Publication::new(None, Some("10.1000/j.test.2"), "Paper");
        let candidates = client.resolve(&publication).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].url.starts_with(&server.uri()));
        assert!(candidates[0].url.ends_with("/papers/2.pdf"));
    }

    #[tokio::test]
    async fn test_resolve_page_without_patterns_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                // Historical patterns (buttons, onclick handlers) measured at
                // 0% success and must not be extracted.
                r#"<html><body>
                    <button onclick="location.href='/papers/3.pdf'">save</button>
                </body></html>"#,
            ))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let publication = Publication::new(None, Some("10.1000/j.test.3"), "Paper");
        assert!(client.resolve(&publication).await.unwrap().is_empty());
    }

    #[test]
    fn test_from_config_rejects_unlisted_host() {
        let fetcher = Fetcher::new(&FetcherConfig::default(), "test@example.org").unwrap();
        let config = SourceConfig {
            enabled: true,
            tier: 7,
            rate_per_window: 1,
            window_seconds: 5,
            api_key: None,
            base_url: Some("https://mirror.evil.example.org".to_string()),
            url_template: None,
        };
        assert!(MirrorClient::from_config("mirror_a", &config, fetcher).is_none());
    }

    #[test]
    fn test_client_is_marked_last_resort() {
        let fetcher = Fetcher::new(&FetcherConfig::default(), "test@example.org").unwrap();
        let client = MirrorClient::with_base_url("mirror_b", 8, "https://sci-hub.se", fetcher);
        assert!(client.last_resort());
    }
}
