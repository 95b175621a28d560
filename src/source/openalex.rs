//! OpenAlex client - open-access URL lookup by PMID or DOI.
//!
//! Queries `https://api.openalex.org/works/{id}` using the external-ID forms
//! (`pmid:…`, `doi:…`) and surfaces `best_oa_location.pdf_url`, the work's
//! `open_access.oa_url`, and the OA landing page.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::SourceConfig;
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Publication, PublicationId, UrlCandidate, UrlKind};

use super::{SourceClient, SourceError, kind_from_url, make_candidate};

/// Default OpenAlex API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openalex.org";

// ==================== OpenAlex API Response Types ====================

/// The subset of an OpenAlex work used for URL discovery.
#[derive(Debug, Deserialize)]
struct OpenAlexWork {
    open_access: Option<OpenAccessInfo>,
    best_oa_location: Option<OaLocation>,
}

#[derive(Debug, Deserialize)]
struct OpenAccessInfo {
    oa_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OaLocation {
    pdf_url: Option<String>,
    landing_page_url: Option<String>,
}

/// Resolves publications to OA links via the OpenAlex works API.
pub struct OpenAlexClient {
    fetcher: Fetcher,
    tier: u8,
    base_url: String,
    mailto: String,
}

impl OpenAlexClient {
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
            mailto: contact_email.to_string(),
        }
    }

    /// Builds the external-ID work path for a publication, when one exists.
    fn work_id(publication: &Publication) -> Option<String> {
        match &publication.id {
            PublicationId::Pmid(pmid) => Some(format!("pmid:{pmid}")),
            PublicationId::Doi(doi) => Some(format!("doi:{doi}")),
            PublicationId::Assigned(_) => publication
                .doi
                .as_deref()
                .map(|doi| format!("doi:{doi}")),
        }
    }
}

#[async_trait]
impl SourceClient for OpenAlexClient {
    fn name(&self) -> &'static str {
        "openalex"
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    #[instrument(skip(self, publication), fields(source = "openalex", publication_id = %publication.id))]
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError> {
        let Some(work_id) = Self::work_id(publication) else {
            return Ok(Vec::new());
        };

        let url = format!(
            "{}/works/{}?mailto={}",
            self.base_url,
            work_id,
            urlencoding::encode(&self.mailto)
        );

        let work = match self.fetcher.get_json::<OpenAlexWork>(&url).await {
            Ok(work) => work,
            Err(FetchError::HttpStatus { status: 404, .. }) => {
                debug!(work_id = %work_id, "work not found in OpenAlex");
                return Ok(Vec::new());
            }
            Err(e) => return Err(SourceError::unavailable(self.name(), &e)),
        };

        let mut candidates = Vec::new();
        if let Some(location) = &work.best_oa_location {
            if let Some(pdf_url) = &location.pdf_url {
                candidates.push(make_candidate(
                    publication,
                    self.name(),
                    self.tier,
                    pdf_url.clone(),
                    UrlKind::Pdf,
                ));
            }
            if let Some(landing) = &location.landing_page_url {
                candidates.push(make_candidate(
                    publication,
                    self.name(),
                    self.tier,
                    landing.clone(),
                    UrlKind::LandingHtml,
                ));
            }
        }
        if let Some(oa_url) = work.open_access.and_then(|oa| oa.oa_url) {
            let kind = kind_from_url(&oa_url);
            candidates.push(make_candidate(
                publication,
                self.name(),
                self.tier,
                oa_url,
                kind,
            ));
        }

        debug!(count = candidates.len(), "openalex candidates");
        Ok(candidates)
    }
}

impl std::fmt::Debug for OpenAlexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAlexClient")
            .field("tier", &self.tier)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
