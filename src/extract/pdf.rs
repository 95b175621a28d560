//! Section-aware PDF text extraction.
//!
//! Two extractors run in order: the text-layer extractor (lopdf
//! `extract_text`) first, and a simpler content-stream scan as fallback when
//! the primary yields too little text or no recognizable section headers.
//! Section headers are matched line-anchored and case-insensitive; all text
//! between two recognized headers is attributed to the former, and anything
//! before the first header lands in `front_matter`.
//!
//! Parsing never raises to the coordinator: an encrypted or image-only PDF
//! produces an [`ExtractedContent`] with empty sections and quality 0, and
//! the publication stays usable as metadata.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use lopdf::Document;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::model::{ExtractedContent, PublicationId};

/// Extractor names recorded on [`ExtractedContent::extractor_used`].
pub const TEXT_LAYER_EXTRACTOR: &str = "text_layer";
pub const CONTENT_STREAM_EXTRACTOR: &str = "content_stream";
/// Recorded when both extractors failed outright.
pub const NO_EXTRACTOR: &str = "none";

/// Minimum characters the primary extractor must yield before its output is
/// trusted without section headers.
const MIN_PRIMARY_CHARS: usize = 200;

/// The sections that count toward the quality score.
const EXPECTED_SECTIONS: [&str; 4] = ["abstract", "methods", "results", "discussion"];

/// Section header pattern: line-anchored, case-insensitive.
const SECTION_HEADER_PATTERN: &str =
    r"(?im)^[ \t]*(abstract|introduction|materials and methods|methods|results|discussion|conclusion)\b";

/// Section-aware PDF extractor.
#[derive(Debug, Clone)]
pub struct PdfExtractor {
    header_re: Regex,
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfExtractor {
    /// Creates an extractor with the standard section header set.
    ///
    /// # Panics
    ///
    /// Never panics in practice: the header pattern is a compile-time
    /// constant verified by tests.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            header_re: Regex::new(SECTION_HEADER_PATTERN)
                .expect("static section header pattern must compile"),
        }
    }

    /// Parses a downloaded PDF into section text.
    ///
    /// Deterministic for a fixed file: re-parsing yields byte-identical
    /// sections. Failures are encoded as quality 0, never raised.
    #[instrument(skip(self, publication_id, pdf_sha256), fields(path = %path.display()))]
    #[must_use]
    pub fn parse(
        &self,
        path: &Path,
        publication_id: &PublicationId,
        pdf_sha256: &str,
    ) -> ExtractedContent {
        let (text, extractor_used) = self.extract_text(path);

        let sections = text
            .as_deref()
            .map(|text| self.split_sections(text))
            .unwrap_or_default();
        let quality = quality_score(&sections);

        if sections.is_empty() {
            debug!(extractor = extractor_used, "no sections extracted");
        }

        ExtractedContent {
            publication_id: publication_id.clone(),
            pdf_sha256: pdf_sha256.to_string(),
            sections,
            extractor_used: extractor_used.to_string(),
            extraction_quality: quality,
            extracted_at: Utc::now(),
        }
    }

    /// Offloads [`parse`](Self::parse) onto the blocking pool so the event
    /// loop never runs CPU-bound extraction.
    pub async fn parse_offloaded(
        &self,
        path: PathBuf,
        publication_id: PublicationId,
        pdf_sha256: String,
    ) -> ExtractedContent {
        let extractor = self.clone();
        let fallback_id = publication_id.clone();
        let fallback_sha = pdf_sha256.clone();
        match tokio::task::spawn_blocking(move || {
            extractor.parse(&path, &publication_id, &pdf_sha256)
        })
        .await
        {
            Ok(content) => content,
            Err(join_error) => {
                warn!(error = %join_error, "extraction task failed");
                ExtractedContent {
                    publication_id: fallback_id,
                    pdf_sha256: fallback_sha,
                    sections: BTreeMap::new(),
                    extractor_used: NO_EXTRACTOR.to_string(),
                    extraction_quality: 0.0,
                    extracted_at: Utc::now(),
                }
            }
        }
    }

    /// Runs primary then fallback extraction, returning the text and the
    /// extractor that produced it.
    fn extract_text(&self, path: &Path) -> (Option<String>, &'static str) {
        let document = match Document::load(path) {
            Ok(document) => document,
            Err(error) => {
                warn!(error = %error, "pdf failed to load");
                return (None, NO_EXTRACTOR);
            }
        };

        let primary = extract_text_layer(&document);
        if let Some(text) = &primary {
            let usable = text.chars().count() >= MIN_PRIMARY_CHARS
                || self.header_re.is_match(text);
            if usable {
                return (primary, TEXT_LAYER_EXTRACTOR);
            }
            debug!(
                chars = text.chars().count(),
                "primary extraction too thin; falling back"
            );
        }

        match extract_content_stream(&document) {
            Some(text) => (Some(text), CONTENT_STREAM_EXTRACTOR),
            // Keep whatever the primary managed rather than nothing.
            None => match primary {
                Some(text) => (Some(text), TEXT_LAYER_EXTRACTOR),
                None => (None, NO_EXTRACTOR),
            },
        }
    }

    /// Splits normalized text into named sections.
    fn split_sections(&self, text: &str) -> BTreeMap<String, String> {
        let normalized = normalize_whitespace(text);
        let mut sections = BTreeMap::new();

        let matches: Vec<(usize, usize, String)> = self
            .header_re
            .find_iter(&normalized)
            .map(|m| {
                let name = canonical_section_name(m.as_str().trim());
                (m.start(), m.end(), name)
            })
            .collect();

        if matches.is_empty() {
            if !normalized.trim().is_empty() {
                sections.insert("front_matter".to_string(), normalized.trim().to_string());
            }
            return sections;
        }

        let front = normalized[..matches[0].0].trim();
        if !front.is_empty() {
            sections.insert("front_matter".to_string(), front.to_string());
        }

        for (index, (_, end, name)) in matches.iter().enumerate() {
            let until = matches
                .get(index + 1)
                .map_or(normalized.len(), |next| next.0);
            let body = normalized[*end..until].trim();
            // First occurrence wins; later repeats of a header (running
            // heads, references to sections) do not overwrite.
            sections
                .entry(name.clone())
                .or_insert_with(|| body.to_string());
        }

        sections
    }
}

/// Primary extractor: lopdf's text-layer extraction across all pages.
fn extract_text_layer(document: &Document) -> Option<String> {
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return None;
    }
    match document.extract_text(&pages) {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => None,
        Err(error) => {
            debug!(error = %error, "text-layer extraction failed");
            None
        }
    }
}

/// Fallback extractor: string operands of text-showing operators, one line
/// per operator.
fn extract_content_stream(document: &Document) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();

    for (_, page_id) in document.get_pages() {
        let Ok(data) = document.get_page_content(page_id) else {
            continue;
        };
        let Ok(content) = lopdf::content::Content::decode(&data) else {
            continue;
        };
        for operation in content.operations {
            if !matches!(operation.operator.as_str(), "Tj" | "TJ" | "'" | "\"") {
                continue;
            }
            let mut line = String::new();
            collect_strings(&operation.operands, &mut line);
            if !line.trim().is_empty() {
                lines.push(line.trim().to_string());
            }
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Pulls string literals (including nested TJ arrays) into `out`.
fn collect_strings(operands: &[lopdf::Object], out: &mut String) {
    for operand in operands {
        match operand {
            lopdf::Object::String(bytes, _) => {
                out.push_str(&String::from_utf8_lossy(bytes));
            }
            lopdf::Object::Array(items) => collect_strings(items, out),
            _ => {}
        }
    }
}

/// Collapses horizontal whitespace runs and blank-line runs.
fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;
    for raw_line in text.lines() {
        let collapsed: String = raw_line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                lines.push(String::new());
            }
        } else {
            blank_run = 0;
            lines.push(collapsed);
        }
    }
    lines.join("\n").trim().to_string()
}

/// Maps header variants onto canonical section names.
fn canonical_section_name(header: &str) -> String {
    let lower = header.to_ascii_lowercase();
    if lower == "materials and methods" {
        "methods".to_string()
    } else {
        lower
    }
}

/// Fraction of the expected sections present.
fn quality_score(sections: &BTreeMap<String, String>) -> f64 {
    let found = EXPECTED_SECTIONS
        .iter()
        .filter(|name| {
            sections
                .get(**name)
                .is_some_and(|body| !body.trim().is_empty())
        })
        .count();
    found as f64 / EXPECTED_SECTIONS.len() as f64
}
