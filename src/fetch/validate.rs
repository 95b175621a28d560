//! PDF content validation.
//!
//! Servers frequently answer a PDF request with HTTP 200 and an HTML error
//! or login page, so validation never trusts the Content-Type header:
//! a download counts as a PDF only when the magic bytes, the size bounds,
//! and the trailer check all pass. A body that fails any check is classified
//! `invalid_content`, not success.

/// The PDF magic bytes every valid file starts with.
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// How far from the end of the file the `%%EOF` trailer marker is searched.
const EOF_SEARCH_WINDOW: usize = 1024;

/// Why a downloaded body was rejected as a PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfValidationError {
    /// Body smaller than the configured minimum (likely an error page).
    TooSmall {
        bytes: u64,
        min: u64,
    },
    /// Body larger than the configured maximum (suspicious).
    TooLarge {
        bytes: u64,
        max: u64,
    },
    /// First four bytes were not `%PDF`.
    BadMagic,
    /// No `%%EOF` marker near the end of the file (truncated download).
    MissingTrailer,
}

impl std::fmt::Display for PdfValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooSmall { bytes, min } => {
                write!(f, "body of {bytes} bytes is below the {min} byte minimum")
            }
            Self::TooLarge { bytes, max } => {
                write!(f, "body of {bytes} bytes exceeds the {max} byte maximum")
            }
            Self::BadMagic => write!(f, "missing %PDF magic bytes"),
            Self::MissingTrailer => write!(f, "missing %%EOF trailer marker"),
        }
    }
}

/// Size bounds for accepted PDFs.
#[derive(Debug, Clone, Copy)]
pub struct PdfLimits {
    /// Smallest accepted size in bytes.
    pub min_bytes: u64,
    /// Largest accepted size in bytes.
    pub max_bytes: u64,
}

impl Default for PdfLimits {
    fn default() -> Self {
        Self {
            min_bytes: 1024,
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Validates the head, size, and tail of a downloaded body.
///
/// `head` is the first bytes of the body (at least 4), `tail` the last bytes
/// (up to [`EOF_SEARCH_WINDOW`]); the download path keeps both while
/// streaming so the whole body never needs to be held in memory.
///
/// # Errors
///
/// Returns the first failed check.
pub fn validate_pdf(
    head: &[u8],
    tail: &[u8],
    total_bytes: u64,
    limits: PdfLimits,
) -> Result<(), PdfValidationError> {
    if total_bytes < limits.min_bytes {
        return Err(PdfValidationError::TooSmall {
            bytes: total_bytes,
            min: limits.min_bytes,
        });
    }
    if total_bytes > limits.max_bytes {
        return Err(PdfValidationError::TooLarge {
            bytes: total_bytes,
            max: limits.max_bytes,
        });
    }
    if head.len() < PDF_MAGIC.len() || &head[..PDF_MAGIC.len()] != PDF_MAGIC {
        return Err(PdfValidationError::BadMagic);
    }
    let window = &tail[tail.len().saturating_sub(EOF_SEARCH_WINDOW)..];
    if !contains_eof_marker(window) {
        return Err(PdfValidationError::MissingTrailer);
    }
    Ok(())
}

/// Searches a byte window for the `%%EOF` marker.
fn contains_eof_marker(window: &[u8]) -> bool {
    const MARKER: &[u8] = b"%%EOF";
    window
        .windows(MARKER.len())
        .any(|candidate| candidate == MARKER)
}

/// Builds a minimal structurally-valid PDF body for tests.
#[cfg(test)]
#[must_use]
pub fn minimal_pdf(padding: usize) -> Vec<u8> {
    let mut body = b"%PDF-1.4\n".to_vec();
    body.extend(std::iter::repeat_n(b' ', padding));
    body.extend_from_slice(b"\n%%EOF\n");
    body
}
