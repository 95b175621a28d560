//! Error type for source clients.

use thiserror::Error;

use crate::fetch::FetchError;

/// Failure of a single source for a single resolve call.
///
/// "Not found" is not an error; clients return an empty candidate list for
/// it. `Unavailable` covers transport failures and unexpected API responses,
/// including rate limiting that persisted past the fetcher's retries. The
/// waterfall logs it at warning level and continues with other sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport or API failure from one source.
    #[error("source {source_name} unavailable: {reason}")]
    Unavailable {
        /// Which source failed.
        source_name: &'static str,
        /// Human-readable failure description.
        reason: String,
    },
}

impl SourceError {
    /// Wraps a fetch failure as a source-unavailable error.
    #[must_use]
    pub fn unavailable(source_name: &'static str, error: &FetchError) -> Self {
        Self::Unavailable {
            source_name,
            reason: error.to_string(),
        }
    }

    /// Creates an unavailable error with a custom reason.
    #[must_use]
    pub fn unavailable_with_reason(source_name: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            source_name,
            reason: reason.into(),
        }
    }

    /// Returns the name of the failed source.
    #[must_use]
    pub fn source_name(&self) -> &'static str {
        match self {
            Self::Unavailable { source_name, .. } => source_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_display_names_source() {
        let error = SourceError::unavailable_with_reason("unpaywall", "connection refused");
        let msg = error.to_string();
        assert!(msg.contains("unpaywall"));
        assert!(msg.contains("connection refused"));
        assert_eq!(error.source_name(), "unpaywall");
    }
}
