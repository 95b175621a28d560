//! Shared HTTP fetcher: connection pooling, per-host rate limiting, retries
//! with exponential backoff, institutional cookie jar, and PDF content
//! validation.
//!
//! # Overview
//!
//! - [`Fetcher`] - the single shared client every source and the download
//!   manager go through
//! - [`HostRateLimiter`] / [`RateLimit`] - per-host token buckets fed from
//!   source-declared rates
//! - [`RetryPolicy`] / [`classify_error`] - retry decisions per URL
//! - [`validate_pdf`] - magic-byte / size / trailer validation
//! - [`load_cookie_jar`] - Netscape cookie file loading
//! - [`TmpFileGuard`] - guaranteed cleanup of partial downloads

mod client;
mod cookies;
mod error;
mod rate_limit;
mod retry;
mod validate;

pub use client::{Fetcher, FetcherBuildError, PdfDownload, TmpFileGuard};
pub use cookies::{CookieError, CookieLine, CookieParseResult, load_cookie_jar,
    load_cookies_into_jar, parse_netscape_cookies};
pub use error::FetchError;
pub use rate_limit::{HostRateLimiter, RateLimit, parse_retry_after};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
pub use validate::{PDF_MAGIC, PdfLimits, PdfValidationError, validate_pdf};

#[cfg(test)]
pub use validate::minimal_pdf;
