//! Configuration loading, merging, and startup validation.
//!
//! Configuration comes from three layers, lowest precedence first:
//! built-in defaults, an optional TOML file, and environment variables for
//! source API keys (`GEOHARVEST_<SOURCE>_API_KEY`). Validation runs once at
//! startup; any invalid value is a fatal [`ConfigError`] per the error
//! handling policy (configuration errors abort the run).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// Names of every recognized source, in default tier order.
pub const KNOWN_SOURCES: [&str; 12] = [
    "institutional",
    "unpaywall",
    "pmc",
    "europepmc",
    "core",
    "doaj",
    "openalex",
    "crossref",
    "biorxiv",
    "arxiv",
    "mirror_a",
    "mirror_b",
];

/// Highest tier value a source may be configured with.
pub const MAX_TIER: u8 = 8;

/// Configuration errors. All fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read the config file.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file was not valid TOML for the expected shape.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A `sources.<name>` table referenced an unknown source.
    #[error("unknown source '{0}' in configuration (known: {KNOWN_SOURCES:?})")]
    UnknownSource(String),

    /// A numeric option was outside its valid range.
    #[error("invalid value for {option}: {reason}")]
    InvalidValue {
        option: &'static str,
        reason: String,
    },
}

/// Per-source configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Whether the source participates in discovery.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Waterfall tier, 1 (highest priority) through 8.
    pub tier: u8,
    /// Requests allowed per window.
    #[serde(default = "default_rate")]
    pub rate_per_window: u32,
    /// Rate window length in seconds.
    #[serde(default = "default_window")]
    pub window_seconds: u64,
    /// API key, when the source requires one.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL override (tests, self-hosted mirrors of the API).
    #[serde(default)]
    pub base_url: Option<String>,
    /// DOI → proxied URL template; institutional proxy only.
    /// `{doi}` is replaced with the URL-encoded DOI.
    #[serde(default)]
    pub url_template: Option<String>,
}

impl SourceConfig {
    fn with_tier(tier: u8) -> Self {
        Self {
            enabled: true,
            tier,
            rate_per_window: default_rate(),
            window_seconds: default_window(),
            api_key: None,
            base_url: None,
            url_template: None,
        }
    }

    fn disabled_with_tier(tier: u8) -> Self {
        Self {
            enabled: false,
            ..Self::with_tier(tier)
        }
    }
}

/// HTTP fetcher configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FetcherConfig {
    /// Maximum attempts per URL, including the first.
    pub max_retries: u32,
    /// Base backoff delay in seconds for the first retry.
    pub retry_backoff_s: f64,
    /// Per-request timeout in seconds.
    pub timeout_s: f64,
    /// Largest PDF accepted, in bytes.
    pub max_pdf_bytes: u64,
    /// Smallest PDF accepted, in bytes (below this is likely an error page).
    pub min_pdf_bytes: u64,
    /// Netscape-format cookie file for institutional sessions.
    pub cookie_file: Option<PathBuf>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_s: 1.0,
            timeout_s: 30.0,
            max_pdf_bytes: 100 * 1024 * 1024,
            min_pdf_bytes: 1024,
            cookie_file: None,
        }
    }
}

impl FetcherConfig {
    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s)
    }
}

/// Pipeline coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CoordinatorConfig {
    /// Global cap on concurrent PDF downloads.
    pub max_concurrent_downloads: usize,
    /// Publications in flight at once within one dataset task.
    pub max_concurrent_publications_per_dataset: usize,
    /// Wall-clock budget for one publication's discover+download+parse flow.
    pub per_publication_timeout_s: f64,
    /// Wall-clock budget for one dataset's whole task.
    pub per_dataset_timeout_s: f64,
    /// Per-source timeout inside the discovery waterfall.
    pub per_source_timeout_s: f64,
    /// URL discovery is skipped when candidates newer than this exist.
    pub discovery_freshness_s: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_concurrent_publications_per_dataset: 3,
            per_publication_timeout_s: 120.0,
            per_dataset_timeout_s: 600.0,
            per_source_timeout_s: 15.0,
            discovery_freshness_s: 86_400,
        }
    }
}

/// Dataset hot cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Bounded entry count; LRU eviction at capacity.
    pub max_size: usize,
    /// Per-entry time-to-live in seconds.
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            ttl_seconds: 3600,
        }
    }
}

/// Feature flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FeatureFlags {
    /// Enables tier-7/8 last-resort mirror sources. Default off.
    pub enable_last_resort_mirrors: bool,
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem root for downloaded PDFs.
    pub pdf_root: PathBuf,
    /// Filesystem root for the parsed-content disk cache.
    pub parsed_cache_root: PathBuf,
    /// SQLite database path or `sqlite:` URL.
    pub database_url: String,
    /// Contact email sent to polite-pool APIs (Crossref, Unpaywall, OpenAlex).
    pub contact_email: String,
    /// Per-source settings, keyed by source name.
    pub sources: BTreeMap<String, SourceConfig>,
    pub fetcher: FetcherConfig,
    pub coordinator: CoordinatorConfig,
    pub cache: CacheConfig,
    pub features: FeatureFlags,
    /// Memory-tier size of the parsed-content cache.
    pub parsed_cache_max_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pdf_root: PathBuf::from("data/pdfs"),
            parsed_cache_root: PathBuf::from("data/parsed"),
            database_url: "data/geoharvest.db".to_string(),
            contact_email: "geoharvest@example.org".to_string(),
            sources: default_sources(),
            fetcher: FetcherConfig::default(),
            coordinator: CoordinatorConfig::default(),
            cache: CacheConfig::default(),
            features: FeatureFlags::default(),
            parsed_cache_max_size: 1000,
        }
    }
}

/// Default tier assignments: institutional first, open aggregators next,
/// publisher links, preprints, then the default-off mirrors.
fn default_sources() -> BTreeMap<String, SourceConfig> {
    let mut sources = BTreeMap::new();
    sources.insert("institutional".to_string(), SourceConfig::disabled_with_tier(1));
    sources.insert("unpaywall".to_string(), SourceConfig::with_tier(2));
    sources.insert("pmc".to_string(), SourceConfig::with_tier(2));
    sources.insert("europepmc".to_string(), SourceConfig::with_tier(2));
    sources.insert("core".to_string(), SourceConfig::with_tier(3));
    sources.insert("doaj".to_string(), SourceConfig::with_tier(3));
    sources.insert("openalex".to_string(), SourceConfig::with_tier(4));
    sources.insert("crossref".to_string(), SourceConfig::with_tier(5));
    sources.insert("biorxiv".to_string(), SourceConfig::with_tier(6));
    sources.insert("arxiv".to_string(), SourceConfig::with_tier(6));
    sources.insert("mirror_a".to_string(), SourceConfig::disabled_with_tier(7));
    sources.insert("mirror_b".to_string(), SourceConfig::disabled_with_tier(8));
    sources
}

fn default_true() -> bool {
    true
}

fn default_rate() -> u32 {
    5
}

fn default_window() -> u64 {
    1
}

/// Shape of the TOML config file. Every field optional; present fields
/// override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    pdf_root: Option<PathBuf>,
    parsed_cache_root: Option<PathBuf>,
    database_url: Option<String>,
    contact_email: Option<String>,
    parsed_cache_max_size: Option<usize>,
    #[serde(default)]
    sources: BTreeMap<String, SourceOverride>,
    fetcher: Option<FetcherConfig>,
    coordinator: Option<CoordinatorConfig>,
    cache: Option<CacheConfig>,
    features: Option<FeatureFlags>,
}

/// Partial per-source override from the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceOverride {
    enabled: Option<bool>,
    tier: Option<u8>,
    rate_per_window: Option<u32>,
    window_seconds: Option<u64>,
    api_key: Option<String>,
    base_url: Option<String>,
    url_template: Option<String>,
}

impl Config {
    /// Loads configuration: defaults, then the TOML file (if given), then
    /// API keys from the environment, then validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable/unparseable file or invalid
    /// values. All configuration errors are fatal.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = path {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let file: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            config.apply_file(file)?;
            debug!(path = %path.display(), "loaded config file");
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        if let Some(pdf_root) = file.pdf_root {
            self.pdf_root = pdf_root;
        }
        if let Some(parsed_cache_root) = file.parsed_cache_root {
            self.parsed_cache_root = parsed_cache_root;
        }
        if let Some(database_url) = file.database_url {
            self.database_url = database_url;
        }
        if let Some(contact_email) = file.contact_email {
            self.contact_email = contact_email;
        }
        if let Some(size) = file.parsed_cache_max_size {
            self.parsed_cache_max_size = size;
        }
        if let Some(fetcher) = file.fetcher {
            self.fetcher = fetcher;
        }
        if let Some(coordinator) = file.coordinator {
            self.coordinator = coordinator;
        }
        if let Some(cache) = file.cache {
            self.cache = cache;
        }
        if let Some(features) = file.features {
            self.features = features;
        }

        for (name, over) in file.sources {
            let Some(existing) = self.sources.get_mut(&name) else {
                return Err(ConfigError::UnknownSource(name));
            };
            if let Some(enabled) = over.enabled {
                existing.enabled = enabled;
            }
            if let Some(tier) = over.tier {
                existing.tier = tier;
            }
            if let Some(rate) = over.rate_per_window {
                existing.rate_per_window = rate;
            }
            if let Some(window) = over.window_seconds {
                existing.window_seconds = window;
            }
            if over.api_key.is_some() {
                existing.api_key = over.api_key;
            }
            if over.base_url.is_some() {
                existing.base_url = over.base_url;
            }
            if over.url_template.is_some() {
                existing.url_template = over.url_template;
            }
        }
        Ok(())
    }

    /// Reads `GEOHARVEST_<SOURCE>_API_KEY` for each known source.
    fn apply_env(&mut self) {
        for name in KNOWN_SOURCES {
            let var = format!("GEOHARVEST_{}_API_KEY", name.to_uppercase());
            if let Ok(key) = std::env::var(&var) {
                let key = key.trim().to_string();
                if !key.is_empty()
                    && let Some(source) = self.sources.get_mut(name)
                {
                    source.api_key = Some(key);
                }
            }
        }
    }

    /// Validates every recognized option. Any violation is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] or [`ConfigError::UnknownSource`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, source) in &self.sources {
            if !KNOWN_SOURCES.contains(&name.as_str()) {
                return Err(ConfigError::UnknownSource(name.clone()));
            }
            if source.tier == 0 || source.tier > MAX_TIER {
                return Err(ConfigError::InvalidValue {
                    option: "sources.<name>.tier",
                    reason: format!("{name}: tier {} not in 1..={MAX_TIER}", source.tier),
                });
            }
            if source.rate_per_window == 0 {
                return Err(ConfigError::InvalidValue {
                    option: "sources.<name>.rate_per_window",
                    reason: format!("{name}: must be at least 1"),
                });
            }
            if source.window_seconds == 0 {
                return Err(ConfigError::InvalidValue {
                    option: "sources.<name>.window_seconds",
                    reason: format!("{name}: must be at least 1"),
                });
            }
        }

        if self.fetcher.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                option: "fetcher.max_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.fetcher.min_pdf_bytes >= self.fetcher.max_pdf_bytes {
            return Err(ConfigError::InvalidValue {
                option: "fetcher.min_pdf_bytes",
                reason: format!(
                    "min ({}) must be below max ({})",
                    self.fetcher.min_pdf_bytes, self.fetcher.max_pdf_bytes
                ),
            });
        }
        if !(self.fetcher.timeout_s > 0.0) {
            return Err(ConfigError::InvalidValue {
                option: "fetcher.timeout_s",
                reason: "must be positive".to_string(),
            });
        }

        if self.coordinator.max_concurrent_downloads == 0 {
            return Err(ConfigError::InvalidValue {
                option: "coordinator.max_concurrent_downloads",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.coordinator.max_concurrent_publications_per_dataset == 0 {
            return Err(ConfigError::InvalidValue {
                option: "coordinator.max_concurrent_publications_per_dataset",
                reason: "must be at least 1".to_string(),
            });
        }

        if self.cache.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                option: "cache.max_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.parsed_cache_max_size == 0 {
            return Err(ConfigError::InvalidValue {
                option: "parsed_cache_max_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the configuration for one source, when present.
    #[must_use]
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.get(name)
    }
}
