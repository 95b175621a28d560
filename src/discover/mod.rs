//! URL discovery waterfall: parallel fan-out, strict tier-order consumption.
//!
//! All enabled sources are invoked concurrently the moment discovery starts,
//! but candidates are handed to the consumer strictly by tier: no tier-2
//! candidate is yielded before every tier-1 source has completed or timed
//! out. Within a tier, ordering is deterministic (static priority, then
//! source name, then each source's kind preference). Duplicate URLs are
//! suppressed across the whole stream.
//!
//! The consumer stops pulling once its need is satisfied; dropping the
//! stream aborts every still-running resolve task, so an early stop wastes
//! no bandwidth.
//!
//! Per-source failures (transport errors, timeouts) never fail the
//! publication: they are collected on the stream for the coordinator to
//! record as pipeline events, and the waterfall continues with the
//! remaining sources. An exhausted stream with no candidates leads
//! downstream to the `paywalled` classification.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::model::{Publication, UrlCandidate, UrlKind};
#[cfg(test)]
use crate::source::SourceClient;
use crate::source::{SourceError, SourceRegistry};

/// Outcome of one source's resolve call, reported for event logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    /// Which source failed.
    pub source_name: String,
    /// Failure description (`timed out after …` or the transport error).
    pub reason: String,
}

/// Discovery options for one publication.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryOptions {
    /// What the downstream consumer needs.
    pub need: UrlKind,
    /// Whether tier-7/8 last-resort mirrors participate in this run.
    pub include_last_resort: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            need: UrlKind::Pdf,
            include_last_resort: false,
        }
    }
}

/// The URL discovery waterfall.
#[derive(Clone)]
pub struct UrlDiscovery {
    registry: Arc<SourceRegistry>,
    per_source_timeout: Duration,
}

impl UrlDiscovery {
    /// Creates a waterfall over the configured source registry.
    #[must_use]
    pub fn new(registry: Arc<SourceRegistry>, per_source_timeout: Duration) -> Self {
        Self {
            registry,
            per_source_timeout,
        }
    }

    /// Starts discovery for one publication.
    ///
    /// Every eligible source's `resolve` is spawned immediately; the
    /// returned stream yields candidates in tier order as the consumer pulls
    /// them.
    #[instrument(skip(self, publication), fields(publication_id = %publication.id))]
    pub fn discover(
        &self,
        publication: &Publication,
        options: DiscoveryOptions,
    ) -> CandidateStream {
        let mut tiers: BTreeMap<u8, Vec<SpawnedResolve>> = BTreeMap::new();

        for client in self.registry.clients() {
            if client.last_resort() && !options.include_last_resort {
                continue;
            }

            let client = Arc::clone(client);
            let publication = publication.clone();
            let timeout = self.per_source_timeout;
            let source_name = client.name();
            let tier = client.tier();
            let kind_ranks: Vec<UrlKind> = client.kind_preference().to_vec();

            let handle = tokio::spawn(async move {
                match tokio::time::timeout(timeout, client.resolve(&publication)).await {
                    Ok(Ok(candidates)) => Ok(candidates),
                    Ok(Err(error)) => Err(describe_failure(&error)),
                    Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
                }
            });

            tiers.entry(tier).or_default().push(SpawnedResolve {
                source_name,
                kind_preference: kind_ranks,
                handle,
            });
        }

        debug!(
            sources = tiers.values().map(Vec::len).sum::<usize>(),
            tiers = tiers.len(),
            "discovery fan-out started"
        );

        CandidateStream {
            tiers: tiers.into_iter().collect(),
            ready: VecDeque::new(),
            seen: HashSet::new(),
            failures: Vec::new(),
            yielded: Vec::new(),
        }
    }
}

fn describe_failure(error: &SourceError) -> String {
    match error {
        SourceError::Unavailable { reason, .. } => reason.clone(),
    }
}

/// One spawned resolve task awaiting consumption.
struct SpawnedResolve {
    source_name: &'static str,
    kind_preference: Vec<UrlKind>,
    handle: JoinHandle<Result<Vec<UrlCandidate>, String>>,
}

/// Tier-ordered candidate stream.
///
/// Dropping the stream aborts all still-running resolve tasks.
pub struct CandidateStream {
    /// Remaining tiers, lowest tier number first.
    tiers: VecDeque<(u8, Vec<SpawnedResolve>)>,
    /// Candidates from completed tiers not yet handed out.
    ready: VecDeque<UrlCandidate>,
    /// Normalized URLs already yielded (duplicate suppression).
    seen: HashSet<String>,
    /// Per-source failures observed so far.
    failures: Vec<SourceFailure>,
    /// Candidates handed to the consumer, for persistence after the fact.
    yielded: Vec<UrlCandidate>,
}

impl CandidateStream {
    /// Builds a stream over already-known candidates (fresh discoveries
    /// reused from the store). The list must already be tier-ordered.
    #[must_use]
    pub fn from_candidates(candidates: Vec<UrlCandidate>) -> Self {
        Self {
            tiers: VecDeque::new(),
            ready: candidates.into(),
            seen: HashSet::new(),
            failures: Vec::new(),
            yielded: Vec::new(),
        }
    }

    /// Yields the next candidate in strict tier order, or `None` when every
    /// source has completed and all candidates were handed out.
    pub async fn next_candidate(&mut self) -> Option<UrlCandidate> {
        loop {
            if let Some(candidate) = self.ready.pop_front() {
                self.yielded.push(candidate.clone());
                return Some(candidate);
            }

            let (tier, mut tasks) = self.tiers.pop_front()?;

            // Deterministic within-tier order: static priority is the tier
            // itself here, so the tie-break is the source name.
            tasks.sort_by_key(|t| t.source_name);

            for task in tasks {
                match task.handle.await {
                    Ok(Ok(mut candidates)) => {
                        sort_by_kind_preference(&mut candidates, &task.kind_preference);
                        for candidate in candidates {
                            let key = normalize_url(&candidate.url);
                            if self.seen.insert(key) {
                                self.ready.push_back(candidate);
                            }
                        }
                    }
                    Ok(Err(reason)) => {
                        warn!(source = task.source_name, %reason, "source failed during discovery");
                        self.failures.push(SourceFailure {
                            source_name: task.source_name.to_string(),
                            reason,
                        });
                    }
                    Err(join_error) => {
                        warn!(source = task.source_name, error = %join_error, "resolve task panicked");
                        self.failures.push(SourceFailure {
                            source_name: task.source_name.to_string(),
                            reason: format!("task failed: {join_error}"),
                        });
                    }
                }
            }

            debug!(tier, ready = self.ready.len(), "tier consumed");
        }
    }

    /// Drains every remaining candidate, preserving tier order.
    pub async fn collect_all(&mut self) -> Vec<UrlCandidate> {
        let mut all = Vec::new();
        while let Some(candidate) = self.next_candidate().await {
            all.push(candidate);
        }
        all
    }

    /// Takes the per-source failures observed so far.
    pub fn take_failures(&mut self) -> Vec<SourceFailure> {
        std::mem::take(&mut self.failures)
    }

    /// Candidates handed out so far, in yield order.
    #[must_use]
    pub fn yielded(&self) -> &[UrlCandidate] {
        &self.yielded
    }
}

impl Drop for CandidateStream {
    fn drop(&mut self) {
        for (_, tasks) in &self.tiers {
            for task in tasks {
                task.handle.abort();
            }
        }
    }
}

/// Stable-sorts candidates by the source's kind preference.
fn sort_by_kind_preference(candidates: &mut [UrlCandidate], preference: &[UrlKind]) {
    let rank = |kind: UrlKind| {
        preference
            .iter()
            .position(|&k| k == kind)
            .unwrap_or(preference.len())
    };
    candidates.sort_by_key(|c| rank(c.kind));
}

/// Normalizes a URL for duplicate suppression: lowercased scheme and host,
/// no fragment, no trailing slash.
fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw) else {
        return raw.trim().to_string();
    };
    url.set_fragment(None);
    let mut normalized = url.to_string();
    if normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}
