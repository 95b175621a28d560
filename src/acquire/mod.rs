//! PDF download manager: ordered candidate attempts, atomic writes,
//! per-publication coalescing, bounded concurrency.
//!
//! # Algorithm
//!
//! Candidates are consumed in the exact order the discovery waterfall emits
//! them. Each is attempted once through the fetcher (which owns per-URL
//! retries); a transport failure, terminal HTTP status, invalid content, or
//! a landing page when a PDF is required records a sub-attempt and moves on.
//! The first validated PDF is renamed from its `.tmp` sibling onto the final
//! `<pdf_root>/<dataset>/<role>/<publication>.pdf` path and wins; an
//! exhausted stream yields a single `paywalled` record carrying the best
//! sub-attempt classification.
//!
//! # Concurrency
//!
//! A semaphore caps concurrent downloads globally (default 3); per-host
//! pacing is the fetcher's job. Concurrent requests for the same publication
//! from different dataset tasks coalesce on an in-flight map: one download
//! proceeds, the others wait and share its result.

mod layout;

pub use layout::PdfLayout;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::discover::CandidateStream;
use crate::fetch::{FetchError, Fetcher, TmpFileGuard};
use crate::model::{
    AcquisitionStatus, DatasetId, PdfAcquisition, Publication, PublicationRole, UrlKind,
};

/// Shared slot for one publication's in-flight acquisition.
type InFlightSlot = Arc<Mutex<Option<PdfAcquisition>>>;

/// PDF download manager.
///
/// Cheap to clone; clones share the concurrency cap and the in-flight map.
#[derive(Clone)]
pub struct PdfDownloadManager {
    fetcher: Fetcher,
    layout: PdfLayout,
    download_permits: Arc<Semaphore>,
    in_flight: Arc<DashMap<String, InFlightSlot>>,
}

impl PdfDownloadManager {
    /// Creates a manager writing under `layout` with a global cap of
    /// `max_concurrent_downloads`.
    #[must_use]
    pub fn new(fetcher: Fetcher, layout: PdfLayout, max_concurrent_downloads: usize) -> Self {
        Self {
            fetcher,
            layout,
            download_permits: Arc::new(Semaphore::new(max_concurrent_downloads.max(1))),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Returns the on-disk layout.
    #[must_use]
    pub fn layout(&self) -> &PdfLayout {
        &self.layout
    }

    /// Number of publications currently in the coalescing map.
    ///
    /// Exposed for shutdown checks: after a run (cancelled or not) this must
    /// drain back to zero.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Acquires a PDF for one publication from an ordered candidate stream.
    ///
    /// Always returns a terminal [`PdfAcquisition`]; failures are encoded in
    /// its status, never raised. The caller persists the record and emits
    /// pipeline events.
    #[instrument(skip(self, publication, candidates), fields(dataset_id = %dataset_id, publication_id = %publication.id))]
    pub async fn acquire(
        &self,
        dataset_id: &DatasetId,
        role: PublicationRole,
        publication: &Publication,
        candidates: &mut CandidateStream,
        need: UrlKind,
    ) -> PdfAcquisition {
        let key = publication.id.as_key();
        let slot = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let cleanup = InFlightCleanup {
            map: Arc::clone(&self.in_flight),
            key,
            slot,
        };

        let mut state = cleanup.slot.lock().await;
        if let Some(existing) = state.as_ref() {
            debug!("coalesced onto concurrent acquisition");
            return existing.clone();
        }

        let acquisition = self
            .acquire_inner(dataset_id, role, publication, candidates, need)
            .await;
        *state = Some(acquisition.clone());
        acquisition
    }

    async fn acquire_inner(
        &self,
        dataset_id: &DatasetId,
        role: PublicationRole,
        publication: &Publication,
        candidates: &mut CandidateStream,
        need: UrlKind,
    ) -> PdfAcquisition {
        // Global concurrency cap. Permit held for the whole candidate loop so
        // one publication counts once regardless of how many URLs it tries.
        let Ok(_permit) = self.download_permits.acquire().await else {
            // The semaphore is never closed while the manager lives.
            return PdfAcquisition {
                publication_id: publication.id.clone(),
                source_name: None,
                local_path: None,
                bytes: None,
                sha256: None,
                final_url: None,
                status: AcquisitionStatus::Failed,
                error_detail: Some("download pool shut down".to_string()),
                downloaded_at: Utc::now(),
            };
        };

        let mut best_failure: Option<SubAttemptFailure> = None;

        while let Some(candidate) = candidates.next_candidate().await {
            if need == UrlKind::Pdf && candidate.kind == UrlKind::LandingHtml {
                debug!(url = %candidate.url, "skipping landing page; pdf required");
                record_failure(
                    &mut best_failure,
                    SubAttemptFailure {
                        status: AcquisitionStatus::Failed,
                        detail: format!("{}: landing page when a PDF was required", candidate.source_name),
                    },
                );
                continue;
            }

            if let Err(e) = self.layout.ensure_dir(dataset_id, role).await {
                warn!(error = %e, "cannot create pdf directory");
                record_failure(
                    &mut best_failure,
                    SubAttemptFailure {
                        status: AcquisitionStatus::Failed,
                        detail: format!("io: {e}"),
                    },
                );
                continue;
            }

            let final_path = self.layout.final_path(dataset_id, role, &publication.id);
            let tmp_path = self.layout.tmp_path(dataset_id, role, &publication.id);
            let mut tmp_guard = TmpFileGuard::new(tmp_path.clone());

            match self.fetcher.download_pdf(&candidate.url, &tmp_path).await {
                Ok(download) => {
                    if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
                        warn!(error = %e, path = %final_path.display(), "rename failed");
                        record_failure(
                            &mut best_failure,
                            SubAttemptFailure {
                                status: AcquisitionStatus::Failed,
                                detail: format!("io: {e}"),
                            },
                        );
                        continue;
                    }
                    tmp_guard.commit();

                    info!(
                        source = %candidate.source_name,
                        bytes = download.bytes,
                        path = %final_path.display(),
                        "pdf acquired"
                    );
                    return PdfAcquisition {
                        publication_id: publication.id.clone(),
                        source_name: Some(candidate.source_name.clone()),
                        local_path: Some(final_path.to_string_lossy().into_owned()),
                        bytes: Some(download.bytes as i64),
                        sha256: Some(download.sha256),
                        final_url: Some(download.final_url),
                        status: AcquisitionStatus::Success,
                        error_detail: None,
                        downloaded_at: Utc::now(),
                    };
                }
                Err(error) => {
                    warn!(
                        source = %candidate.source_name,
                        url = %candidate.url,
                        error = %error,
                        "candidate failed; trying next"
                    );
                    record_failure(&mut best_failure, classify_sub_attempt(&candidate.source_name, &error));
                }
            }
        }

        // Stream exhausted without a validated PDF.
        let (status_detail, error_detail) = match best_failure {
            Some(failure) => (failure.status, Some(failure.detail)),
            None => (
                AcquisitionStatus::Paywalled,
                Some("no full-text URLs discovered".to_string()),
            ),
        };
        debug!(classification = status_detail.as_str(), "candidates exhausted");
        PdfAcquisition {
            publication_id: publication.id.clone(),
            source_name: None,
            local_path: None,
            bytes: None,
            sha256: None,
            final_url: None,
            status: AcquisitionStatus::Paywalled,
            error_detail: error_detail
                .map(|detail| format!("{}: {detail}", status_detail.as_str())),
            downloaded_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for PdfDownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDownloadManager")
            .field("root", &self.layout.root())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

/// Best sub-attempt failure seen so far.
struct SubAttemptFailure {
    status: AcquisitionStatus,
    detail: String,
}

/// `invalid_content` outranks plain transport failure as the terminal
/// classification: it proves a server answered with the wrong thing.
fn failure_rank(status: AcquisitionStatus) -> u8 {
    match status {
        AcquisitionStatus::InvalidContent => 0,
        _ => 1,
    }
}

fn record_failure(best: &mut Option<SubAttemptFailure>, incoming: SubAttemptFailure) {
    let replace = best
        .as_ref()
        .is_none_or(|current| failure_rank(incoming.status) < failure_rank(current.status));
    if replace {
        *best = Some(incoming);
    }
}

fn classify_sub_attempt(source_name: &str, error: &FetchError) -> SubAttemptFailure {
    let status = if error.is_invalid_content() {
        AcquisitionStatus::InvalidContent
    } else {
        AcquisitionStatus::Failed
    };
    SubAttemptFailure {
        status,
        detail: format!("{source_name}: {error}"),
    }
}

/// Drops the in-flight entry once the last interested caller is gone, so a
/// cancelled run leaves the coalescing map empty.
struct InFlightCleanup {
    map: Arc<DashMap<String, InFlightSlot>>,
    key: String,
    slot: InFlightSlot,
}

impl Drop for InFlightCleanup {
    fn drop(&mut self) {
        // Two references remain when this cleanup is the last holder: the
        // map's and ours.
        let slot = Arc::clone(&self.slot);
        self.map
            .remove_if(&self.key, |_, _| Arc::strong_count(&slot) <= 3);
    }
}
