//! Shared asynchronous HTTP client for API calls and PDF downloads.
//!
//! One [`Fetcher`] instance is created at startup and shared by every source
//! client and the download manager. It owns the connection pool, the
//! institutional cookie jar, the per-host token buckets, and the retry
//! policy, and it guarantees session release on shutdown by owning the only
//! `reqwest::Client`.
//!
//! Retries happen here, per URL: network errors, 5xx, and 429 are retried
//! with exponential backoff (honoring Retry-After); other 4xx and validation
//! failures are terminal for the URL.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::FetcherConfig;
use crate::user_agent;

use super::cookies::{CookieError, load_cookie_jar};
use super::rate_limit::{HostRateLimiter, RateLimit, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::validate::{PdfLimits, validate_pdf};
use super::FetchError;

/// Connect timeout applied on top of the configured request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum redirect hops followed for any request.
const MAX_REDIRECTS: usize = 5;

/// How many trailing bytes are kept while streaming, for trailer validation.
const TAIL_WINDOW: usize = 1024;

/// Errors building the shared fetcher at startup.
#[derive(Debug, thiserror::Error)]
pub enum FetcherBuildError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// The configured cookie file could not be loaded.
    #[error("failed to load cookie jar: {0}")]
    Cookies(#[from] CookieError),
}

/// A validated PDF written to a temporary path.
#[derive(Debug, Clone)]
pub struct PdfDownload {
    /// Total body size in bytes.
    pub bytes: u64,
    /// Hex-encoded SHA-256 of the body, computed while streaming.
    pub sha256: String,
    /// Final URL after redirects.
    pub final_url: String,
}

/// Shared HTTP fetcher.
///
/// Cheap to clone; all clones share the connection pool, cookie jar, and
/// rate limiter.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    rate_limiter: Arc<HostRateLimiter>,
    retry_policy: RetryPolicy,
    limits: PdfLimits,
}

impl Fetcher {
    /// Builds the shared fetcher from configuration.
    ///
    /// Loads the institutional cookie jar when `fetcher.cookie_file` is set;
    /// a missing or unparseable cookie file is fatal so a misconfigured
    /// institutional session cannot silently degrade to anonymous access.
    ///
    /// # Errors
    ///
    /// Returns [`FetcherBuildError`] when the client cannot be built or the
    /// cookie file cannot be loaded.
    #[instrument(skip(config, contact_email))]
    pub fn new(config: &FetcherConfig, contact_email: &str) -> Result<Self, FetcherBuildError> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout())
            .redirect(Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .user_agent(user_agent::default_user_agent(contact_email));

        if let Some(cookie_file) = &config.cookie_file {
            let jar = load_cookie_jar(cookie_file)?;
            builder = builder.cookie_provider(jar);
            info!(path = %cookie_file.display(), "institutional cookie jar attached");
        }

        Ok(Self {
            client: builder.build()?,
            rate_limiter: Arc::new(HostRateLimiter::default()),
            retry_policy: RetryPolicy::from_config(config),
            limits: PdfLimits {
                min_bytes: config.min_pdf_bytes,
                max_bytes: config.max_pdf_bytes,
            },
        })
    }

    /// Registers a source's declared rate for the host of `base_url`.
    ///
    /// Called once per enabled source at registry construction.
    pub fn register_source_host(&self, base_url: &str, rate: RateLimit) {
        if let Ok(url) = Url::parse(base_url)
            && let Some(host) = url.host_str()
        {
            self.rate_limiter.register_host(host, rate);
        }
    }

    /// Returns the configured PDF size bounds.
    #[must_use]
    pub fn pdf_limits(&self) -> PdfLimits {
        self.limits
    }

    /// Fetches a URL and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] after retries are exhausted or on a terminal
    /// failure.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.get_with_retry(url).await?;
        response.json::<T>().await.map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Fetches a URL and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] after retries are exhausted or on a terminal
    /// failure.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.get_with_retry(url).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::network(url, e))
    }

    /// Downloads a PDF to `tmp_path`, validating magic bytes, size bounds,
    /// and the `%%EOF` trailer, with SHA-256 computed while streaming.
    ///
    /// The caller owns `tmp_path` and performs the atomic rename; on any
    /// error the partial file is removed here so no garbage outlives the
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidContent`] when the body is not an
    /// acceptable PDF, or any other [`FetchError`] after retries.
    #[instrument(skip(self, tmp_path), fields(url = %url))]
    pub async fn download_pdf(
        &self,
        url: &str,
        tmp_path: &Path,
    ) -> Result<PdfDownload, FetchError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.rate_limiter.acquire(url).await;

            match self.try_download(url, tmp_path).await {
                Ok(download) => {
                    debug!(
                        bytes = download.bytes,
                        sha256 = %download.sha256,
                        "pdf download validated"
                    );
                    return Ok(download);
                }
                Err(error) => {
                    // Never leave a partial tmp file behind between attempts.
                    let _ = tokio::fs::remove_file(tmp_path).await;

                    if !self.backoff_or_give_up(url, &error, attempt).await {
                        return Err(error);
                    }
                }
            }
        }
    }

    /// Sends a GET with the shared retry loop, returning the raw response.
    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.rate_limiter.acquire(url).await;

            match self.send_get(url).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !self.backoff_or_give_up(url, &error, attempt).await {
                        return Err(error);
                    }
                }
            }
        }
    }

    /// Classifies an error, records any Retry-After penalty, and sleeps when
    /// a retry is due. Returns false when the caller should give up.
    async fn backoff_or_give_up(&self, url: &str, error: &FetchError, attempt: u32) -> bool {
        let failure_type = classify_error(error);

        let retry_after_delay = if failure_type == FailureType::RateLimited {
            self.extract_retry_after(url, error)
        } else {
            None
        };

        match self.retry_policy.should_retry(failure_type, attempt) {
            RetryDecision::Retry {
                delay: backoff_delay,
                attempt: next_attempt,
            } => {
                let delay = retry_after_delay.unwrap_or(backoff_delay);
                info!(
                    url = %url,
                    attempt = next_attempt,
                    max_attempts = self.retry_policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    using_retry_after = retry_after_delay.is_some(),
                    error = %error,
                    "retrying fetch"
                );
                tokio::time::sleep(delay).await;
                true
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(url = %url, %reason, error = %error, "not retrying fetch");
                false
            }
        }
    }

    /// Parses the Retry-After header from a 429 error and records the
    /// penalty with the rate limiter.
    fn extract_retry_after(&self, url: &str, error: &FetchError) -> Option<Duration> {
        let FetchError::HttpStatus {
            retry_after: Some(header),
            ..
        } = error
        else {
            return None;
        };
        let delay = parse_retry_after(header)?;
        self.rate_limiter.record_rate_limit(url, delay);
        debug!(url = %url, retry_after = %header, delay_ms = delay.as_millis(), "using Retry-After delay");
        Some(delay)
    }

    /// Sends one GET and maps transport/status failures to [`FetchError`].
    async fn send_get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = (status == StatusCode::TOO_MANY_REQUESTS)
                .then(|| {
                    response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                })
                .flatten();
            return Err(FetchError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }

    /// One download attempt: stream to file, hash, and validate.
    async fn try_download(&self, url: &str, tmp_path: &Path) -> Result<PdfDownload, FetchError> {
        let response = self.send_get(url).await?;
        let final_url = response.url().to_string();

        let file = File::create(tmp_path)
            .await
            .map_err(|e| FetchError::io(tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();

        let mut hasher = Sha256::new();
        let mut head: Vec<u8> = Vec::with_capacity(8);
        let mut tail: Vec<u8> = Vec::with_capacity(TAIL_WINDOW);
        let mut total: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| FetchError::network(url, e))?;
            total += chunk.len() as u64;

            // Abort oversized bodies instead of writing them out in full.
            if total > self.limits.max_bytes {
                warn!(url = %url, bytes = total, "aborting oversized download");
                return Err(FetchError::invalid_content(
                    url,
                    format!(
                        "body exceeds the {} byte maximum",
                        self.limits.max_bytes
                    ),
                ));
            }

            hasher.update(&chunk);
            if head.len() < 8 {
                head.extend_from_slice(&chunk[..chunk.len().min(8 - head.len())]);
            }
            update_tail(&mut tail, &chunk);

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(tmp_path, e))?;
        }

        writer
            .flush()
            .await
            .map_err(|e| FetchError::io(tmp_path, e))?;

        validate_pdf(&head, &tail, total, self.limits)
            .map_err(|e| FetchError::invalid_content(url, e.to_string()))?;

        Ok(PdfDownload {
            bytes: total,
            sha256: hex_digest(hasher),
            final_url,
        })
    }
}

/// Hex-encodes a finished SHA-256 digest.
fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Keeps `tail` holding the last [`TAIL_WINDOW`] bytes seen.
fn update_tail(tail: &mut Vec<u8>, chunk: &[u8]) {
    if chunk.len() >= TAIL_WINDOW {
        tail.clear();
        tail.extend_from_slice(&chunk[chunk.len() - TAIL_WINDOW..]);
        return;
    }
    tail.extend_from_slice(chunk);
    if tail.len() > TAIL_WINDOW {
        tail.drain(..tail.len() - TAIL_WINDOW);
    }
}

/// Temporary-file guard: removes the file on drop unless committed.
///
/// Guarantees cancelled or failed downloads leave no `.tmp` files behind,
/// including when the owning task is aborted at an await point.
#[derive(Debug)]
pub struct TmpFileGuard {
    path: PathBuf,
    committed: bool,
}

impl TmpFileGuard {
    /// Creates a guard for `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    /// Returns the guarded path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the file as kept; drop will no longer remove it.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for TmpFileGuard {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fetch::validate::minimal_pdf;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_fetcher() -> Fetcher {
        let config = FetcherConfig {
            max_retries: 3,
            retry_backoff_s: 0.01,
            timeout_s: 5.0,
            min_pdf_bytes: 100,
            max_pdf_bytes: 1024 * 1024,
            cookie_file: None,
        };
        Fetcher::new(&config, "test@example.org").unwrap()
    }

    #[tokio::test]
    async fn test_download_pdf_success() {
        let server = MockServer::start().await;
        let body = minimal_pdf(2000);

        Mock::given(method("GET"))
            .and(path("/paper.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("paper.pdf.tmp");
        let fetcher = test_fetcher();

        let download = fetcher
            .download_pdf(&format!("{}/paper.pdf", server.uri()), &tmp)
            .await
            .unwrap();

        assert_eq!(download.bytes, body.len() as u64);
        assert_eq!(std::fs::read(&tmp).unwrap(), body);

        // The hash must match the bytes on disk.
        let mut hasher = Sha256::new();
        hasher.update(&body);
        assert_eq!(download.sha256, hex_digest(hasher));
    }

    #[tokio::test]
    async fn test_download_pdf_html_body_is_invalid_content() {
        let server = MockServer::start().await;
        let html = "<html><body>Please sign in</body></html>".repeat(20);

        Mock::given(method("GET"))
            .and(path("/paper.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("paper.pdf.tmp");
        let fetcher = test_fetcher();

        let result = fetcher
            .download_pdf(&format!("{}/paper.pdf", server.uri()), &tmp)
            .await;

        assert!(matches!(result, Err(FetchError::InvalidContent { .. })));
        assert!(!tmp.exists(), "partial tmp file must be cleaned up");
    }

    #[tokio::test]
    async fn test_download_pdf_404_fails_without_retry() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = test_fetcher();

        let result = fetcher
            .download_pdf(
                &format!("{}/missing.pdf", server.uri()),
                &dir.path().join("m.tmp"),
            )
            .await;

        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_download_pdf_retries_5xx_then_succeeds() {
        let server = MockServer::start().await;
        let body = minimal_pdf(2000);

        Mock::given(method("GET"))
            .and(path("/flaky.pdf"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = test_fetcher();

        let result = fetcher
            .download_pdf(
                &format!("{}/flaky.pdf", server.uri()),
                &dir.path().join("f.tmp"),
            )
            .await;

        assert!(result.is_ok(), "expected recovery after 5xx, got {result:?}");
    }

    #[tokio::test]
    async fn test_download_pdf_exhausts_retries_on_persistent_5xx() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/down.pdf"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = test_fetcher();

        let result = fetcher
            .download_pdf(
                &format!("{}/down.pdf", server.uri()),
                &dir.path().join("d.tmp"),
            )
            .await;

        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_get_json_decodes_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"status": "ok", "count": 3}"#),
            )
            .mount(&server)
            .await;

        let fetcher = test_fetcher();
        let value: serde_json::Value = fetcher
            .get_json(&format!("{}/api", server.uri()))
            .await
            .unwrap();
        assert_eq!(value["count"], 3);
    }

    #[tokio::test]
    async fn test_invalid_url_is_terminal() {
        let fetcher = test_fetcher();
        let result = fetcher.get_text("not a url").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }

    #[test]
    fn test_tmp_file_guard_removes_uncommitted_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.tmp");
        std::fs::write(&path, b"partial").unwrap();

        drop(TmpFileGuard::new(path.clone()));
        assert!(!path.exists());
    }

    #[test]
    fn test_tmp_file_guard_keeps_committed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kept.tmp");
        std::fs::write(&path, b"kept").unwrap();

        let mut guard = TmpFileGuard::new(path.clone());
        guard.commit();
        drop(guard);
        assert!(path.exists());
    }

    #[test]
    fn test_update_tail_keeps_last_window() {
        let mut tail = Vec::new();
        update_tail(&mut tail, &[1u8; 600]);
        update_tail(&mut tail, &[2u8; 600]);
        assert_eq!(tail.len(), TAIL_WINDOW);
        assert_eq!(tail[TAIL_WINDOW - 1], 2);
        assert_eq!(tail[0], 1);

        // A chunk larger than the window replaces it entirely.
        update_tail(&mut tail, &[3u8; 2048]);
        assert_eq!(tail.len(), TAIL_WINDOW);
        assert!(tail.iter().all(|&b| b == 3));
    }
}
