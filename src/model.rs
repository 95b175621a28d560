//! Core domain entities shared across the acquisition pipeline.
//!
//! This module defines the identifier types, entities, and status enums used
//! by every other module:
//!
//! - [`DatasetId`] - a GEO series accession (`GSE<number>`)
//! - [`PublicationId`] - canonical publication identifier (PMID, DOI, or assigned UUID)
//! - [`Publication`] / [`Dataset`] - metadata entities
//! - [`UrlCandidate`] - a discovered full-text URL with its source tier
//! - [`PdfAcquisition`] / [`ExtractedContent`] - acquisition and parse records
//! - [`PipelineEvent`] - append-only pipeline observability record

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors produced when parsing identifier strings.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// The accession did not look like a GEO series accession.
    #[error("invalid GEO accession: {0}")]
    InvalidAccession(String),

    /// The publication key had an unknown scheme prefix.
    #[error("invalid publication key: {0}")]
    InvalidPublicationKey(String),
}

/// A GEO series accession, e.g. `GSE12345`.
///
/// Globally unique and immutable. Construction validates the `GSE<digits>`
/// shape; anything else is rejected so malformed accessions cannot leak into
/// the store or the on-disk layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    /// Returns the accession string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the numeric part of the accession (`GSE12345` → `12345`).
    #[must_use]
    pub fn numeric_part(&self) -> &str {
        &self.0[3..]
    }
}

impl FromStr for DatasetId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let valid = trimmed.is_ascii()
            && trimmed.len() > 3
            && trimmed[..3].eq_ignore_ascii_case("GSE")
            && trimmed[3..].bytes().all(|b| b.is_ascii_digit());
        if !valid {
            return Err(IdError::InvalidAccession(trimmed.to_string()));
        }
        Ok(Self(format!("GSE{}", &trimmed[3..])))
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical publication identifier.
///
/// Exactly one canonical form per publication: PMID when available, else DOI,
/// else an assigned UUID. The canonical key (`pmid:…`, `doi:…`, `uuid:…`) is
/// the primary key in the store and the key of both content caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PublicationId {
    /// PubMed identifier (digits only).
    Pmid(String),
    /// Digital Object Identifier.
    Doi(String),
    /// Assigned identifier for publications with neither PMID nor DOI.
    Assigned(Uuid),
}

impl PublicationId {
    /// Picks the canonical form from optionally-known identifiers.
    ///
    /// PMID wins over DOI; a fresh UUID is assigned when neither is known.
    #[must_use]
    pub fn canonical(pmid: Option<&str>, doi: Option<&str>) -> Self {
        if let Some(pmid) = pmid.map(str::trim).filter(|p| !p.is_empty()) {
            return Self::Pmid(pmid.to_string());
        }
        if let Some(doi) = doi.map(normalize_doi).filter(|d| !d.is_empty()) {
            return Self::Doi(doi);
        }
        Self::Assigned(Uuid::new_v4())
    }

    /// Returns the canonical key used as the store primary key.
    #[must_use]
    pub fn as_key(&self) -> String {
        match self {
            Self::Pmid(pmid) => format!("pmid:{pmid}"),
            Self::Doi(doi) => format!("doi:{doi}"),
            Self::Assigned(uuid) => format!("uuid:{uuid}"),
        }
    }

    /// Returns a filesystem-safe stem for on-disk filenames.
    ///
    /// DOIs contain `/` (and may contain other separators); every byte that
    /// is not alphanumeric, `.`, `-`, or `_` is replaced with `_`.
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.as_key()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Returns the PMID when this identifier is PMID-canonical.
    #[must_use]
    pub fn pmid(&self) -> Option<&str> {
        match self {
            Self::Pmid(pmid) => Some(pmid),
            _ => None,
        }
    }
}

impl FromStr for PublicationId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(pmid) = s.strip_prefix("pmid:") {
            return Ok(Self::Pmid(pmid.to_string()));
        }
        if let Some(doi) = s.strip_prefix("doi:") {
            return Ok(Self::Doi(doi.to_string()));
        }
        if let Some(raw) = s.strip_prefix("uuid:") {
            let uuid = Uuid::parse_str(raw)
                .map_err(|_| IdError::InvalidPublicationKey(s.to_string()))?;
            return Ok(Self::Assigned(uuid));
        }
        Err(IdError::InvalidPublicationKey(s.to_string()))
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl From<PublicationId> for String {
    fn from(id: PublicationId) -> Self {
        id.as_key()
    }
}

impl TryFrom<String> for PublicationId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Lowercases a DOI and strips common URL/`doi:` prefixes.
#[must_use]
pub fn normalize_doi(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("https://doi.org/")
        .or_else(|| trimmed.strip_prefix("http://doi.org/"))
        .or_else(|| trimmed.strip_prefix("https://dx.doi.org/"))
        .or_else(|| trimmed.strip_prefix("doi:"))
        .unwrap_or(trimmed);
    stripped.to_lowercase()
}

/// Role of a publication relative to one dataset.
///
/// The role lives on the (dataset, publication) edge; ties break to origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationRole {
    /// Publication that describes the creation of the dataset.
    Origin,
    /// Publication that references the dataset.
    Citing,
}

impl PublicationRole {
    /// Stable string form used in the database and the on-disk layout.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Citing => "citing",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "origin" => Some(Self::Origin),
            "citing" => Some(Self::Citing),
            _ => None,
        }
    }
}

/// A GEO dataset as tracked by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub title: String,
    pub organism: Option<String>,
    pub platform: Option<String>,
    pub sample_count: Option<i64>,
    pub summary: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

/// Publication metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub id: PublicationId,
    /// DOI when known, normalized lowercase (also set when the DOI is canonical).
    pub doi: Option<String>,
    pub title: String,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub abstract_text: Option<String>,
}

impl Publication {
    /// Creates a publication with a canonical identifier derived from the
    /// available PMID/DOI.
    #[must_use]
    pub fn new(pmid: Option<&str>, doi: Option<&str>, title: impl Into<String>) -> Self {
        let id = PublicationId::canonical(pmid, doi);
        Self {
            id,
            doi: doi.map(normalize_doi).filter(|d| !d.is_empty()),
            title: title.into(),
            authors: Vec::new(),
            journal: None,
            year: None,
            abstract_text: None,
        }
    }

    /// Counts how many metadata fields are populated.
    ///
    /// Used to pick the richer record when two discovery strategies return
    /// the same publication.
    #[must_use]
    pub fn richness(&self) -> usize {
        usize::from(!self.title.is_empty())
            + usize::from(!self.authors.is_empty())
            + usize::from(self.journal.is_some())
            + usize::from(self.year.is_some())
            + usize::from(self.abstract_text.is_some())
            + usize::from(self.doi.is_some())
    }
}

/// Kind of URL a source produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlKind {
    /// Direct PDF link.
    Pdf,
    /// Landing page that may embed or link the full text.
    LandingHtml,
}

impl UrlKind {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::LandingHtml => "landing_html",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(Self::Pdf),
            "landing_html" => Some(Self::LandingHtml),
            _ => None,
        }
    }
}

/// A full-text URL discovered for a publication.
///
/// Unique on `(publication_id, url)`; `tier` is copied from the source's
/// configured priority at discovery time and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlCandidate {
    pub publication_id: PublicationId,
    pub source_name: String,
    pub url: String,
    pub kind: UrlKind,
    pub tier: u8,
    pub discovered_at: DateTime<Utc>,
}

/// Terminal status of a PDF acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionStatus {
    /// Validated PDF written to its final path.
    Success,
    /// All candidates failed for transport/HTTP reasons.
    Failed,
    /// Candidate stream exhausted without a valid PDF.
    Paywalled,
    /// Best classification was a non-PDF body behind HTTP 200.
    InvalidContent,
    /// A later success for a publication that already has one; kept for audit.
    Redundant,
}

impl AcquisitionStatus {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Paywalled => "paywalled",
            Self::InvalidContent => "invalid_content",
            Self::Redundant => "redundant",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "paywalled" => Some(Self::Paywalled),
            "invalid_content" => Some(Self::InvalidContent),
            "redundant" => Some(Self::Redundant),
            _ => None,
        }
    }
}

/// Record of one finished PDF acquisition for a publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfAcquisition {
    pub publication_id: PublicationId,
    pub source_name: Option<String>,
    pub local_path: Option<String>,
    pub bytes: Option<i64>,
    pub sha256: Option<String>,
    pub final_url: Option<String>,
    pub status: AcquisitionStatus,
    pub error_detail: Option<String>,
    pub downloaded_at: DateTime<Utc>,
}

/// Parsed sections extracted from a downloaded PDF.
///
/// Replaced (not appended) when the PDF hash changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub publication_id: PublicationId,
    pub pdf_sha256: String,
    /// Section name → normalized text. Known names: `front_matter`,
    /// `abstract`, `introduction`, `methods`, `results`, `discussion`,
    /// `conclusion`.
    pub sections: std::collections::BTreeMap<String, String>,
    pub extractor_used: String,
    /// Fraction of `{abstract, methods, results, discussion}` found.
    pub extraction_quality: f64,
    pub extracted_at: DateTime<Utc>,
}

/// Pipeline stage identifiers for the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Search,
    Citation,
    UrlDiscovery,
    Download,
    Parse,
    Store,
}

impl PipelineStage {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Citation => "citation",
            Self::UrlDiscovery => "url_discovery",
            Self::Download => "download",
            Self::Parse => "parse",
            Self::Store => "store",
        }
    }
}

/// Outcome of a pipeline stage for one (dataset, publication) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Ok,
    Skipped,
    Failed,
}

impl StageOutcome {
    /// Stable string form used in the database.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// One append-only pipeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub dataset_id: Option<DatasetId>,
    pub publication_id: Option<PublicationId>,
    pub stage: PipelineStage,
    pub outcome: StageOutcome,
    pub duration_ms: i64,
    pub detail: Option<String>,
    pub ts: DateTime<Utc>,
}

impl PipelineEvent {
    /// Creates an event timestamped now.
    #[must_use]
    pub fn now(
        dataset_id: Option<DatasetId>,
        publication_id: Option<PublicationId>,
        stage: PipelineStage,
        outcome: StageOutcome,
        duration_ms: i64,
        detail: Option<String>,
    ) -> Self {
        Self {
            dataset_id,
            publication_id,
            stage,
            outcome,
            duration_ms,
            detail,
            ts: Utc::now(),
        }
    }
}
