//! Institutional proxy client - DOI rewriting through a library proxy.
//!
//! Rewrites a DOI into a proxied URL using the configured template
//! (`{doi}` is replaced with the URL-encoded DOI). Session authentication
//! comes from the fetcher's cookie jar, loaded at startup from the external
//! cookie file; this client itself never handles credentials.
//!
//! The proxied URL is offered as a PDF candidate: the download manager's
//! magic-byte validation rejects the proxy's login page if the session has
//! expired, and the waterfall then falls through to open sources.

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::config::SourceConfig;
use crate::fetch::Fetcher;
use crate::model::{Publication, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, make_candidate};

/// Resolves DOIs to institutional-proxy URLs.
pub struct InstitutionalClient {
    // The shared fetcher carries the session cookie jar; kept here so the
    // client's construction requires an authenticated fetcher.
    _fetcher: Fetcher,
    tier: u8,
    url_template: String,
}

impl InstitutionalClient {
    /// Builds the client when a proxy URL template is configured.
    #[must_use]
    pub fn from_config(config: &SourceConfig, fetcher: Fetcher) -> Option<Self> {
        let Some(template) = config.url_template.clone().filter(|t| !t.is_empty()) else {
            warn!("institutional proxy enabled but no url_template configured");
            return None;
        };
        if !template.contains("{doi}") {
            warn!("institutional url_template has no {{doi}} placeholder");
            return None;
        }
        Some(Self {
            _fetcher: fetcher,
            tier: config.tier,
            url_template: template,
        })
    }
}

#[async_trait]
impl SourceClient for InstitutionalClient {
    fn name(&self) -> &'static str {
        "institutional"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    fn kind_preference(&self) -> &[UrlKind] {
        &[UrlKind::Pdf]
    }

    #[instrument(skip(self, publication), fields(source = "institutional", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(doi) = publication.doi.as_deref() else {
            return Ok(Vec::new());
        };

        let url = self
            .url_template
            .replace("{doi}", &urlencoding::encode(doi));

        Ok(vec![make_candidate(
            publication,
            self.name(),
            self.tier,
            url,
            UrlKind::Pdf,
        )])
    }
}

impl std::fmt::Debug for InstitutionalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstitutionalClient")
            .field("tier", &self.tier)
            .field("url_template", &self.url_template)
            .finish_non_exhaustive()
    }
}
