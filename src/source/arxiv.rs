//! arXiv client - preprint PDFs for `10.48550/arXiv.…` DOIs.
//!
//! arXiv PDF URLs are fully determined by the identifier, so this client
//! resolves without touching the network: it extracts the arXiv id from the
//! DOI and constructs the `/pdf/` and `/abs/` URLs.

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::SourceConfig;
use crate::model::{Publication, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, make_candidate};

/// Public arXiv host serving PDFs and abstracts.
const ARXIV_BASE_URL: &str = "https://arxiv.org";

/// DOI prefix DataCite assigns to arXiv preprints (lowercased).
const ARXIV_DOI_PREFIX: &str = "10.48550/arxiv.";

/// Resolves arXiv preprint DOIs to PDF URLs.
pub struct ArxivClient {
    tier: u8,
    base_url: String,
}

impl ArxivClient {
    /// Creates a client from configuration.
    #[must_use]
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            tier: config.tier,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ARXIV_BASE_URL.to_string()),
        }
    }

    /// Extracts the arXiv identifier from a normalized DOI.
    fn arxiv_id(doi: &str) -> Option<&str> {
        doi.strip_prefix(ARXIV_DOI_PREFIX)
            .filter(|id| !id.is_empty())
    }
}

#[async_trait]
impl SourceClient for ArxivClient {
    fn name(&self) -> &'static str {
        "arxiv"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    #[instrument(skip(self, publication), fields(source = "arxiv", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(id) = publication.doi.as_deref().and_then(Self::arxiv_id) else {
            return Ok(Vec::new());
        };

        debug!(arxiv_id = %id, "constructed arxiv urls");
        Ok(vec![
            make_candidate(
                publication,
                self.name(),
                self.tier,
                format!("{}/pdf/{id}.pdf", self.base_url),
                UrlKind::Pdf,
            ),
            make_candidate(
                publication,
                self.name(),
                self.tier,
                format!("{}/abs/{id}", self.base_url),
                UrlKind::LandingHtml,
            ),
        ])
    }
}

impl std::fmt::Debug for ArxivClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArxivClient")
            .field("tier", &self.tier)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> ArxivClient {
        ArxivClient::new(&SourceConfig {
            enabled: true,
            tier: 6,
            rate_per_window: 100,
            window_seconds: 1,
            api_key: None,
            base_url: None,
            url_template: None,
        })
    }

    #[tokio::test]
    async fn test_resolve_constructs_pdf_and_abs_urls() {
        let publication = Publication::new(None, Some("10.48550/arXiv.2401.12345"), "Preprint");
        let candidates = client().resolve(&publication).await.unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].url, "https://arxiv.org/pdf/2401.12345.pdf");
        assert_eq!(candidates[0].kind, UrlKind::Pdf);
        assert_eq!(candidates[1].url, "https://arxiv.org/abs/2401.12345");
    }

    #[tokio::test]
    async fn test_resolve_ignores_non_arxiv_dois() {
        let publication = Publication::new(None, Some("10.1038/s41586-024-1"), "Paper");
        assert!(client().resolve(&publication).await.unwrap().is_empty());
    }

    #[test]
    fn test_arxiv_id_extraction() {
        assert_eq!(ArxivClient::arxiv_id("10.48550/arxiv.2401.12345"), Some("2401.12345"));
        assert_eq!(ArxivClient::arxiv_id("10.48550/arxiv."), None);
        assert_eq!(ArxivClient::arxiv_id("10.1101/x"), None);
    }
}
