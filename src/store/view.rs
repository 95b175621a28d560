//! Denormalized read model returned by `get_complete_geo_data`.
//!
//! This is the shape consumed by the API collaborator through the hot cache:
//! one dataset plus, per linked publication, its role, URL discovery count,
//! best acquisition status, and extraction quality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AcquisitionStatus, Dataset, Publication, PublicationRole};

/// Per-publication acquisition progress, as surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationSubstatus {
    /// Metadata is stored but no valid PDF exists.
    MetadataOnly,
    /// A validated PDF is on disk but no usable sections were extracted.
    PdfDownloaded,
    /// Sections were extracted with nonzero quality.
    Parsed,
}

/// One publication row in the denormalized dataset view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationView {
    pub publication: Publication,
    pub role: PublicationRole,
    /// Count of distinct discovered URLs.
    pub url_count: i64,
    /// Best non-redundant acquisition status, when any attempt finished.
    pub pdf_status: Option<AcquisitionStatus>,
    /// Extraction quality, when an extraction row exists.
    pub extraction_quality: Option<f64>,
}

impl PublicationView {
    /// Derives the user-visible substatus.
    #[must_use]
    pub fn substatus(&self) -> PublicationSubstatus {
        let has_pdf = self.pdf_status == Some(AcquisitionStatus::Success);
        match (has_pdf, self.extraction_quality) {
            (true, Some(quality)) if quality > 0.0 => PublicationSubstatus::Parsed,
            (true, _) => PublicationSubstatus::PdfDownloaded,
            _ => PublicationSubstatus::MetadataOnly,
        }
    }
}

/// The complete denormalized view of one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteGeoData {
    pub dataset: Dataset,
    /// Origin publications first, then citing; stable within each group.
    pub publications: Vec<PublicationView>,
    /// When this view was computed from the store.
    pub computed_at: DateTime<Utc>,
}

impl CompleteGeoData {
    /// Counts publications with a validated PDF on disk.
    #[must_use]
    pub fn pdf_count(&self) -> usize {
        self.publications
            .iter()
            .filter(|p| p.pdf_status == Some(AcquisitionStatus::Success))
            .count()
    }

    /// Counts publications with a nonzero-quality extraction.
    #[must_use]
    pub fn parsed_count(&self) -> usize {
        self.publications
            .iter()
            .filter(|p| p.substatus() == PublicationSubstatus::Parsed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PublicationId;

    fn view(
        pdf_status: Option<AcquisitionStatus>,
        extraction_quality: Option<f64>,
    ) -> PublicationView {
        PublicationView {
            publication: Publication {
                id: PublicationId::Pmid("1".to_string()),
                doi: None,
                title: "t".to_string(),
                authors: Vec::new(),
                journal: None,
                year: None,
                abstract_text: None,
            },
            role: PublicationRole::Origin,
            url_count: 0,
            pdf_status,
            extraction_quality,
        }
    }

    #[test]
    fn test_substatus_metadata_only_without_pdf() {
        assert_eq!(
            view(None, None).substatus(),
            PublicationSubstatus::MetadataOnly
        );
        assert_eq!(
            view(Some(AcquisitionStatus::Paywalled), None).substatus(),
            PublicationSubstatus::MetadataOnly
        );
    }

    #[test]
    fn test_substatus_pdf_downloaded_with_zero_quality_parse() {
        assert_eq!(
            view(Some(AcquisitionStatus::Success), Some(0.0)).substatus(),
            PublicationSubstatus::PdfDownloaded
        );
        assert_eq!(
            view(Some(AcquisitionStatus::Success), None).substatus(),
            PublicationSubstatus::PdfDownloaded
        );
    }

    #[test]
    fn test_substatus_parsed_with_quality() {
        assert_eq!(
            view(Some(AcquisitionStatus::Success), Some(0.75)).substatus(),
            PublicationSubstatus::Parsed
        );
    }
}
