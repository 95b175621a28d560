//! PDF parsing and the parsed-content cache.
//!
//! - [`PdfExtractor`] - section-aware extraction with a text-layer primary
//!   and a content-stream fallback
//! - [`ParsedContentCache`] - memory LRU + disk JSON tiers, hash-validated

mod cache;
mod pdf;

pub use cache::ParsedContentCache;
pub use pdf::{
    CONTENT_STREAM_EXTRACTOR, NO_EXTRACTOR, PdfExtractor, TEXT_LAYER_EXTRACTOR,
};
