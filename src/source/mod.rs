//! Source clients for full-text URL discovery.
//!
//! Each external service is wrapped in one adapter implementing
//! [`SourceClient`]: a stateless object holding the shared [`Fetcher`], its
//! configured tier, and an optional API key. The contract is uniform:
//!
//! - `resolve(publication)` returns the candidate URLs the service knows
//!   about, or an empty list when the publication is simply not there
//!   ("not found" is normal flow, never an error);
//! - a transport or API failure raises [`SourceError::Unavailable`], which
//!   the waterfall absorbs and logs without failing the publication.
//!
//! # Architecture
//!
//! - [`SourceClient`] - async trait implemented by every adapter
//! - [`SourceRegistry`] - the configured set of enabled clients, built once
//!   at startup with rates registered on the fetcher
//! - Adapters: [`InstitutionalClient`], [`UnpaywallClient`], [`PmcClient`],
//!   [`EuropePmcClient`], [`CoreClient`], [`DoajClient`], [`OpenAlexClient`],
//!   [`CrossrefClient`], [`BiorxivClient`], [`ArxivClient`], [`MirrorClient`]

mod arxiv;
mod biorxiv;
mod core_api;
mod crossref;
mod doaj;
mod error;
mod europepmc;
mod institutional;
mod mirror;
mod openalex;
mod pmc;
mod unpaywall;

pub use arxiv::ArxivClient;
pub use biorxiv::BiorxivClient;
pub use core_api::CoreClient;
pub use crossref::CrossrefClient;
pub use doaj::DoajClient;
pub use error::SourceError;
pub use europepmc::EuropePmcClient;
pub use institutional::InstitutionalClient;
pub use mirror::MirrorClient;
pub use openalex::OpenAlexClient;
pub use pmc::PmcClient;
pub use unpaywall::UnpaywallClient;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::fetch::{Fetcher, RateLimit};
use crate::model::{Publication, UrlCandidate, UrlKind};

/// Uniform capability set implemented by every source adapter.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Arc<dyn SourceClient>`. Rust 2024 native async traits are not
/// object-safe, so `async_trait` is required for the registry pattern.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Returns the source's name (matches its configuration key).
    fn name(&self) -> &'static str;

    /// Returns the source's configured waterfall tier (1 is highest).
    fn tier(&self) -> u8;

    /// Returns the kinds this source yields, most preferred first.
    fn kind_preference(&self) -> &[UrlKind] {
        &[UrlKind::Pdf, UrlKind::LandingHtml]
    }

    /// True for best-effort last-resort mirrors, which participate only when
    /// the run explicitly enables them.
    fn last_resort(&self) -> bool {
        false
    }

    /// Resolves a publication to candidate URLs.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] on transport or API failure.
    /// "Not found" is an empty `Vec`, never an error.
    async fn resolve(&self, publication: &Publication) -> Result<Vec<UrlCandidate>, SourceError>;
}

/// Builds a [`UrlCandidate`] stamped with the source's name and tier.
pub(crate) fn make_candidate(
    publication: &Publication,
    source_name: &str,
    tier: u8,
    url: String,
    kind: UrlKind,
) -> UrlCandidate {
    UrlCandidate {
        publication_id: publication.id.clone(),
        source_name: source_name.to_string(),
        url,
        kind,
        tier,
        discovered_at: Utc::now(),
    }
}

/// Guesses the candidate kind from the URL when the API did not say.
pub(crate) fn kind_from_url(url: &str) -> UrlKind {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_default();
    if path.ends_with(".pdf") {
        UrlKind::Pdf
    } else {
        UrlKind::LandingHtml
    }
}

/// The configured set of enabled source clients.
///
/// Construction registers each client's declared rate with the fetcher's
/// per-host token buckets and skips clients whose prerequisites are missing
/// (no proxy template, no API key, mirror host not allow-listed), logging a
/// warning and continuing with the rest.
pub struct SourceRegistry {
    clients: Vec<Arc<dyn SourceClient>>,
}

impl SourceRegistry {
    /// Builds a registry from pre-constructed clients.
    ///
    /// Used by tests and embedders that assemble their own client set;
    /// normal startup goes through [`SourceRegistry::from_config`].
    #[must_use]
    pub fn from_clients(clients: Vec<Arc<dyn SourceClient>>) -> Self {
        Self { clients }
    }

    /// Builds the registry from configuration.
    #[must_use]
    pub fn from_config(config: &Config, fetcher: &Fetcher) -> Self {
        let mut registry = Self {
            clients: Vec::new(),
        };

        for (name, source) in &config.sources {
            if !source.enabled {
                debug!(source = %name, "source disabled by configuration");
                continue;
            }
            let is_mirror = name.starts_with("mirror_");
            if is_mirror && !config.features.enable_last_resort_mirrors {
                debug!(source = %name, "last-resort mirrors disabled by feature flag");
                continue;
            }

            let client: Option<Arc<dyn SourceClient>> = match name.as_str() {
                "institutional" => InstitutionalClient::from_config(source, fetcher.clone())
                    .map(|c| Arc::new(c) as Arc<dyn SourceClient>),
                "unpaywall" => Some(Arc::new(UnpaywallClient::new(
                    fetcher.clone(),
                    source,
                    &config.contact_email,
                ))),
                "pmc" => Some(Arc::new(PmcClient::new(fetcher.clone(), source))),
                "europepmc" => Some(Arc::new(EuropePmcClient::new(fetcher.clone(), source))),
                "core" => CoreClient::from_config(source, fetcher.clone())
                    .map(|c| Arc::new(c) as Arc<dyn SourceClient>),
                "doaj" => Some(Arc::new(DoajClient::new(fetcher.clone(), source))),
                "openalex" => Some(Arc::new(OpenAlexClient::new(
                    fetcher.clone(),
                    source,
                    &config.contact_email,
                ))),
                "crossref" => Some(Arc::new(CrossrefClient::new(
                    fetcher.clone(),
                    source,
                    &config.contact_email,
                ))),
                "biorxiv" => Some(Arc::new(BiorxivClient::new(fetcher.clone(), source))),
                "arxiv" => Some(Arc::new(ArxivClient::new(source))),
                "mirror_a" | "mirror_b" => {
                    MirrorClient::from_config(name, source, fetcher.clone())
                        .map(|c| Arc::new(c) as Arc<dyn SourceClient>)
                }
                other => {
                    warn!(source = %other, "unrecognized source name; skipping");
                    None
                }
            };

            match client {
                Some(client) => {
                    let rate = RateLimit::per_seconds(source.rate_per_window, source.window_seconds);
                    if let Some(base_url) = registry_base_url(client.as_ref(), source) {
                        fetcher.register_source_host(&base_url, rate);
                    }
                    debug!(source = %name, tier = client.tier(), "registered source client");
                    registry.clients.push(client);
                }
                None => {
                    warn!(source = %name, "source unavailable; continuing with remaining sources");
                }
            }
        }

        registry
    }

    /// Returns the registered clients in configuration order.
    #[must_use]
    pub fn clients(&self) -> &[Arc<dyn SourceClient>] {
        &self.clients
    }

    /// Returns the number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.clients.iter().map(|c| c.name()).collect();
        f.debug_struct("SourceRegistry")
            .field("client_count", &self.clients.len())
            .field("clients", &names)
            .finish()
    }
}

/// The base URL whose host carries the source's declared rate.
fn registry_base_url(
    client: &dyn SourceClient,
    source: &crate::config::SourceConfig,
) -> Option<String> {
    source
        .base_url
        .clone()
        .or_else(|| default_base_url(client.name()).map(str::to_string))
}

/// Published API hosts, used when no base URL override is configured.
fn default_base_url(name: &str) -> Option<&'static str> {
    match name {
        "unpaywall" => Some("https://api.unpaywall.org"),
        "pmc" => Some("https://www.ncbi.nlm.nih.gov"),
        "europepmc" => Some("https://www.ebi.ac.uk"),
        "core" => Some("https://api.core.ac.uk"),
        "doaj" => Some("https://doaj.org"),
        "openalex" => Some("https://api.openalex.org"),
        "crossref" => Some("https://api.crossref.org"),
        "biorxiv" => Some("https://api.biorxiv.org"),
        _ => None,
    }
}
