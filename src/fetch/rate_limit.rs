//! Per-host token-bucket rate limiting for outbound requests.
//!
//! Each host gets a bucket sized from the owning source's declared rate
//! (`requests_per_window` / `window_seconds`). Requests to different hosts
//! proceed in parallel; requests to the same host wait for a token. A
//! server-mandated Retry-After pauses the host's bucket entirely until the
//! penalty expires.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Warning threshold for a single computed wait (30 seconds).
const LONG_WAIT_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// A declared request rate: `capacity` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Requests allowed per window.
    pub capacity: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimit {
    /// Creates a rate of `capacity` requests per `window_seconds`.
    #[must_use]
    pub fn per_seconds(capacity: u32, window_seconds: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            window: Duration::from_secs(window_seconds.max(1)),
        }
    }

    /// Token refill rate in tokens per second.
    fn refill_per_second(self) -> f64 {
        f64::from(self.capacity) / self.window.as_secs_f64()
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::per_seconds(5, 1)
    }
}

/// State tracked for each host.
#[derive(Debug)]
struct HostBucket {
    rate: RateLimit,
    /// Protected by Mutex for atomic read-update operations.
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// Fractional tokens currently available.
    tokens: f64,
    /// Last refill instant.
    last_refill: Instant,
    /// Server-mandated pause (Retry-After), when set.
    penalty_until: Option<Instant>,
}

impl HostBucket {
    fn new(rate: RateLimit) -> Self {
        Self {
            rate,
            state: Mutex::new(BucketState {
                tokens: f64::from(rate.capacity),
                last_refill: Instant::now(),
                penalty_until: None,
            }),
        }
    }
}

/// Per-host token-bucket rate limiter.
///
/// Designed to be wrapped in `Arc` and shared across tasks. Uses `DashMap`
/// for lock-free access to per-host buckets; the bucket `Arc` is cloned out
/// of the map before awaiting so no shard lock is held across a suspension
/// point.
#[derive(Debug)]
pub struct HostRateLimiter {
    default_rate: RateLimit,
    /// Declared rates, keyed by host; registered at startup from the source
    /// configuration.
    declared: DashMap<String, RateLimit>,
    buckets: DashMap<String, Arc<HostBucket>>,
}

impl HostRateLimiter {
    /// Creates a limiter with the given default rate for unregistered hosts.
    #[must_use]
    pub fn new(default_rate: RateLimit) -> Self {
        Self {
            default_rate,
            declared: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Registers a source's declared rate for one host.
    ///
    /// Later registrations for the same host keep the stricter (slower) rate
    /// so two sources sharing an API host cannot widen each other's budget.
    #[instrument(skip(self))]
    pub fn register_host(&self, host: &str, rate: RateLimit) {
        let host = host.to_ascii_lowercase();
        let mut entry = self.declared.entry(host).or_insert(rate);
        if rate.refill_per_second() < entry.refill_per_second() {
            *entry.value_mut() = rate;
        }
    }

    /// Acquires permission to make one request to the given URL's host.
    ///
    /// Waits for a token (and any active Retry-After penalty) before
    /// returning. URLs without a parseable host proceed immediately.
    pub async fn acquire(&self, url: &str) {
        let Some(host) = host_of(url) else {
            return;
        };

        let bucket = self.bucket_for(&host);
        loop {
            let wait = {
                let mut state = bucket.state.lock().await;
                let now = Instant::now();

                if let Some(until) = state.penalty_until {
                    if until > now {
                        until - now
                    } else {
                        state.penalty_until = None;
                        continue;
                    }
                } else {
                    // Refill tokens for elapsed time, capped at capacity.
                    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                    state.tokens = (state.tokens + elapsed * bucket.rate.refill_per_second())
                        .min(f64::from(bucket.rate.capacity));
                    state.last_refill = now;

                    if state.tokens >= 1.0 {
                        state.tokens -= 1.0;
                        return;
                    }
                    Duration::from_secs_f64(
                        (1.0 - state.tokens) / bucket.rate.refill_per_second(),
                    )
                }
            };

            if wait >= LONG_WAIT_WARNING_THRESHOLD {
                warn!(host = %host, wait_ms = wait.as_millis(), "long rate-limit wait");
            } else {
                debug!(host = %host, wait_ms = wait.as_millis(), "rate limited, waiting");
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Records a server-mandated delay (Retry-After) for the URL's host.
    ///
    /// The host's bucket is paused until the delay expires. Delays above one
    /// hour are capped.
    pub fn record_rate_limit(&self, url: &str, delay: Duration) {
        let Some(host) = host_of(url) else {
            return;
        };
        let delay = delay.min(MAX_RETRY_AFTER);
        let bucket = self.bucket_for(&host);
        let until = Instant::now() + delay;
        // try_lock: a concurrent acquire holding the lock will observe the
        // penalty on its next loop iteration anyway.
        if let Ok(mut state) = bucket.state.try_lock() {
            let current = state.penalty_until.unwrap_or(until);
            state.penalty_until = Some(current.max(until));
        }
        debug!(host = %host, delay_ms = delay.as_millis(), "recorded Retry-After penalty");
    }

    fn bucket_for(&self, host: &str) -> Arc<HostBucket> {
        if let Some(bucket) = self.buckets.get(host) {
            return Arc::clone(&bucket);
        }
        let rate = self
            .declared
            .get(host)
            .map_or(self.default_rate, |r| *r.value());
        self.buckets
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostBucket::new(rate)))
            .clone()
    }
}

impl Default for HostRateLimiter {
    fn default() -> Self {
        Self::new(RateLimit::default())
    }
}

/// Extracts the lowercased host from a URL string.
fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

/// Parses a Retry-After header value into a [`Duration`].
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date per RFC 7231. Returns
/// `None` for unparseable values or dates in the past.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    let when = httpdate::parse_http_date(trimmed).ok()?;
    when.duration_since(SystemTime::now())
        .ok()
        .map(|d| d.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_retry_after_caps_excessive_values() {
        assert_eq!(parse_retry_after("999999"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_http_date_in_future() {
        let future = SystemTime::now() + Duration::from_secs(60);
        let header = httpdate::fmt_http_date(future);
        let parsed = parse_retry_after(&header).unwrap();
        assert!(parsed <= Duration::from_secs(60));
        assert!(parsed >= Duration::from_secs(55));
    }

    #[test]
    fn test_host_of_extracts_lowercase_host() {
        assert_eq!(
            host_of("https://API.Example.com/path"),
            Some("api.example.com".to_string())
        );
        assert_eq!(host_of("not a url"), None);
    }

    #[tokio::test]
    async fn test_first_requests_within_capacity_are_immediate() {
        let limiter = HostRateLimiter::new(RateLimit::per_seconds(3, 60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire("https://example.com/a").await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_request_waits_for_refill() {
        let limiter = HostRateLimiter::new(RateLimit::per_seconds(3, 3));
        for _ in 0..3 {
            limiter.acquire("https://example.com/a").await;
        }
        let start = Instant::now();
        limiter.acquire("https://example.com/a").await;
        // Refill is 1 token/sec; the wait should be about a second.
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_different_hosts_do_not_block_each_other() {
        let limiter = HostRateLimiter::new(RateLimit::per_seconds(1, 60));
        limiter.acquire("https://one.example.com/a").await;
        let start = Instant::now();
        limiter.acquire("https://two.example.com/a").await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_penalty_pauses_host() {
        let limiter = HostRateLimiter::new(RateLimit::per_seconds(100, 1));
        limiter.record_rate_limit("https://example.com/a", Duration::from_secs(2));
        let start = Instant::now();
        limiter.acquire("https://example.com/b").await;
        assert!(start.elapsed() >= Duration::from_millis(1900));
    }

    #[test]
    fn test_register_host_keeps_stricter_rate() {
        let limiter = HostRateLimiter::default();
        limiter.register_host("api.example.com", RateLimit::per_seconds(10, 1));
        limiter.register_host("api.example.com", RateLimit::per_seconds(1, 1));
        let declared = *limiter.declared.get("api.example.com").unwrap().value();
        assert_eq!(declared, RateLimit::per_seconds(1, 1));

        // A faster re-registration must not widen the budget.
        limiter.register_host("api.example.com", RateLimit::per_seconds(50, 1));
        let declared = *limiter.declared.get("api.example.com").unwrap().value();
        assert_eq!(declared, RateLimit::per_seconds(1, 1));
    }
}
