//! Pipeline coordinator: search → citation discovery → URL discovery →
//! download → parse → persist.
//!
//! One [`Coordinator::run`] serves one user request. The search stage runs
//! once; each dataset hit then becomes an independent async task, and
//! within a dataset task publications flow through
//! `discover → acquire → parse → persist` with bounded concurrency (a
//! per-dataset cap on publications in flight, plus the download manager's
//! global cap underneath).
//!
//! # Failure semantics
//!
//! Source-local failures are absorbed inside discovery. A failed step for a
//! publication skips its remaining steps, appends a `failed` pipeline
//! event, and leaves the publication in its partial state. Storage failures
//! are retried once and then abort the dataset task (other datasets are
//! unaffected). A search or fatal setup failure aborts the run.
//!
//! # Idempotence
//!
//! Re-running the same query reuses persisted state: a publication with a
//! successful acquisition is never re-downloaded, its cached parse is
//! reused, and URL discovery is skipped while stored candidates are within
//! the freshness window.
//!
//! # Cancellation
//!
//! The caller's [`CancelToken`] unwinds tasks at their next suspension
//! point. Persisted rows stay persisted; temporary download files are
//! swept; the coalescing and in-flight maps drain.

mod cancel;
mod options;

pub use cancel::CancelToken;
pub use options::{
    DatasetReport, DatasetRunStatus, PublicationReport, RunOptions, RunResult,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::acquire::PdfDownloadManager;
use crate::citations::CitationDiscovery;
use crate::config::CoordinatorConfig;
use crate::discover::{CandidateStream, DiscoveryOptions, UrlDiscovery};
use crate::extract::{ParsedContentCache, PdfExtractor};
use crate::hotcache::DatasetHotCache;
use crate::model::{
    AcquisitionStatus, DatasetId, PipelineEvent, PipelineStage, Publication, PublicationRole,
    StageOutcome, UrlKind,
};
use crate::search::{DatasetHit, DatasetSearch};
use crate::store::{PublicationSubstatus, Store, StoreError};

/// Fatal run-level errors. Everything else degrades to statuses and events.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The search collaborator failed; nothing to process.
    #[error("search failed: {0}")]
    Search(String),

    /// A storage failure outside any dataset task.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a dataset task aborted instead of finishing its flow.
#[derive(Debug)]
enum DatasetAbort {
    Storage(StoreError),
    TimedOut,
    Cancelled,
}

/// The pipeline coordinator.
///
/// Cheap to clone; clones share every underlying component.
#[derive(Clone)]
pub struct Coordinator {
    search: Arc<dyn DatasetSearch>,
    citations: CitationDiscovery,
    discovery: UrlDiscovery,
    manager: PdfDownloadManager,
    extractor: PdfExtractor,
    parsed_cache: Arc<ParsedContentCache>,
    store: Store,
    hot_cache: Arc<DatasetHotCache>,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Assembles a coordinator from its components.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        search: Arc<dyn DatasetSearch>,
        citations: CitationDiscovery,
        discovery: UrlDiscovery,
        manager: PdfDownloadManager,
        extractor: PdfExtractor,
        parsed_cache: Arc<ParsedContentCache>,
        store: Store,
        hot_cache: Arc<DatasetHotCache>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            search,
            citations,
            discovery,
            manager,
            extractor,
            parsed_cache,
            store,
            hot_cache,
            config,
        }
    }

    /// Returns the hot cache serving this coordinator's datasets.
    #[must_use]
    pub fn hot_cache(&self) -> &Arc<DatasetHotCache> {
        &self.hot_cache
    }

    /// Returns the download manager (shutdown checks, layout access).
    #[must_use]
    pub fn download_manager(&self) -> &PdfDownloadManager {
        &self.manager
    }

    /// Runs the pipeline for one query.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Search`] when the search collaborator fails;
    /// per-dataset and per-publication failures are reported in the
    /// [`RunResult`] instead.
    pub async fn run(
        &self,
        query: &str,
        max_datasets: usize,
        options: RunOptions,
    ) -> Result<RunResult, PipelineError> {
        self.run_with_cancel(query, max_datasets, options, CancelToken::new())
            .await
    }

    /// Runs the pipeline with an external cancellation handle.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    #[instrument(skip(self, options, cancel), fields(query = %query, max_datasets))]
    pub async fn run_with_cancel(
        &self,
        query: &str,
        max_datasets: usize,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Result<RunResult, PipelineError> {
        let run_started = Instant::now();

        // Startup hygiene: the store is authoritative, tmp files are garbage.
        if let Err(e) = self.manager.layout().sweep_tmp_files() {
            warn!(error = %e, "tmp sweep failed at run start");
        }

        // Stage 1: search, once.
        let search_started = Instant::now();
        let hits = match self.search.search(query, max_datasets).await {
            Ok(hits) => {
                self.append_event(PipelineEvent::now(
                    None,
                    None,
                    PipelineStage::Search,
                    StageOutcome::Ok,
                    elapsed_ms(search_started),
                    Some(format!("{} datasets for '{query}'", hits.len())),
                ))
                .await;
                hits
            }
            Err(e) => {
                self.append_event(PipelineEvent::now(
                    None,
                    None,
                    PipelineStage::Search,
                    StageOutcome::Failed,
                    elapsed_ms(search_started),
                    Some(e.to_string()),
                ))
                .await;
                return Err(PipelineError::Search(e.to_string()));
            }
        };

        info!(datasets = hits.len(), "search complete; launching dataset tasks");

        // Stage 2+: one independent task per dataset. Handles abort on drop
        // so an abandoned run leaves no background work behind.
        let mut handles = Vec::with_capacity(hits.len());
        for hit in hits {
            let coordinator = self.clone();
            let options = options.clone();
            let cancel = cancel.clone();
            handles.push(AbortOnDrop(tokio::spawn(async move {
                coordinator.run_dataset(hit, options, cancel).await
            })));
        }

        let mut datasets = Vec::with_capacity(handles.len());
        for mut handle in handles {
            match (&mut handle.0).await {
                Ok(report) => datasets.push(report),
                Err(e) => warn!(error = %e, "dataset task panicked"),
            }
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            // Cancelled downloads may have been aborted mid-write.
            if let Err(e) = self.manager.layout().sweep_tmp_files() {
                warn!(error = %e, "tmp sweep failed after cancellation");
            }
        }

        info!(
            datasets = datasets.len(),
            cancelled,
            duration_ms = elapsed_ms(run_started),
            "run finished"
        );
        Ok(RunResult {
            query: query.to_string(),
            datasets,
            duration: run_started.elapsed(),
            cancelled,
        })
    }

    /// One dataset's task, bounded by the per-dataset timeout and the run's
    /// cancellation token.
    #[instrument(skip(self, hit, options, cancel), fields(dataset_id = %hit.dataset.id))]
    async fn run_dataset(
        &self,
        hit: DatasetHit,
        options: RunOptions,
        cancel: CancelToken,
    ) -> DatasetReport {
        let started = Instant::now();
        let dataset_id = hit.dataset.id.clone();

        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(DatasetAbort::Cancelled),
            result = tokio::time::timeout(
                options.per_dataset_timeout,
                self.dataset_flow(&hit, &options, &cancel),
            ) => match result {
                Ok(flow) => flow,
                Err(_) => Err(DatasetAbort::TimedOut),
            },
        };

        match outcome {
            Ok(publications) => {
                let status = if options.enable_enrichment {
                    dataset_status(&publications)
                } else {
                    DatasetRunStatus::Complete
                };
                DatasetReport {
                    dataset_id,
                    status,
                    publications,
                    duration: started.elapsed(),
                }
            }
            Err(abort) => {
                let detail = match &abort {
                    DatasetAbort::Storage(e) => format!("storage failure: {e}"),
                    DatasetAbort::TimedOut => "dataset timeout exceeded".to_string(),
                    DatasetAbort::Cancelled => "cancelled".to_string(),
                };
                warn!(dataset_id = %dataset_id, %detail, "dataset task aborted");
                self.append_event(PipelineEvent::now(
                    Some(dataset_id.clone()),
                    None,
                    PipelineStage::Store,
                    StageOutcome::Failed,
                    elapsed_ms(started),
                    Some(detail),
                ))
                .await;
                DatasetReport {
                    dataset_id,
                    status: DatasetRunStatus::Failed,
                    publications: Vec::new(),
                    duration: started.elapsed(),
                }
            }
        }
    }

    /// Citation discovery, linking, and per-publication enrichment for one
    /// dataset.
    async fn dataset_flow(
        &self,
        hit: &DatasetHit,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<PublicationReport>, DatasetAbort> {
        let dataset_id = hit.dataset.id.clone();

        self.persist(|| self.store.upsert_dataset(&hit.dataset))
            .await
            .map_err(DatasetAbort::Storage)?;
        self.hot_cache.invalidate(&dataset_id);

        // Stage: citation discovery (both strategies inside).
        let citation_started = Instant::now();
        let related = self
            .citations
            .find_related(&dataset_id, &hit.original_pmids, options.max_citing_per_dataset)
            .await;
        self.append_event(PipelineEvent::now(
            Some(dataset_id.clone()),
            None,
            PipelineStage::Citation,
            StageOutcome::Ok,
            elapsed_ms(citation_started),
            Some(format!(
                "{} original, {} citing",
                related.original.len(),
                related.citing.len()
            )),
        ))
        .await;

        // Link originals before citers so role conflicts settle to origin.
        let mut roster: Vec<(Publication, PublicationRole)> = Vec::new();
        for publication in related.original {
            roster.push((publication, PublicationRole::Origin));
        }
        for publication in related.citing {
            roster.push((publication, PublicationRole::Citing));
        }

        for (publication, role) in &mut roster {
            let effective = self
                .persist(|| self.store.link_publication(&dataset_id, publication, *role))
                .await
                .map_err(DatasetAbort::Storage)?;
            *role = effective;
        }
        self.hot_cache.invalidate(&dataset_id);

        if !options.enable_enrichment || roster.is_empty() {
            return Ok(self.reports_from_store(&dataset_id, &roster).await);
        }

        // Per-publication enrichment, bounded per dataset.
        let per_dataset = Arc::new(Semaphore::new(
            self.config.max_concurrent_publications_per_dataset.max(1),
        ));
        let mut handles = Vec::with_capacity(roster.len());
        for (publication, role) in roster {
            let coordinator = self.clone();
            let dataset_id = dataset_id.clone();
            let options = options.clone();
            let cancel = cancel.clone();
            let permits = Arc::clone(&per_dataset);
            // Abort-on-drop: a dataset timeout tears these down instead of
            // leaving downloads running in the background.
            handles.push(AbortOnDrop(tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Ok(skipped_report(&publication, role));
                };
                coordinator
                    .publication_task(&dataset_id, publication, role, &options, &cancel)
                    .await
            })));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for mut handle in handles {
            match (&mut handle.0).await {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => return Err(DatasetAbort::Storage(e)),
                Err(e) => warn!(error = %e, "publication task panicked"),
            }
        }
        Ok(reports)
    }

    /// One publication's timeout- and cancel-bounded pipeline.
    async fn publication_task(
        &self,
        dataset_id: &DatasetId,
        publication: Publication,
        role: PublicationRole,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<PublicationReport, StoreError> {
        tokio::select! {
            () = cancel.cancelled() => {
                self.append_event(PipelineEvent::now(
                    Some(dataset_id.clone()),
                    Some(publication.id.clone()),
                    PipelineStage::Download,
                    StageOutcome::Skipped,
                    0,
                    Some("cancelled".to_string()),
                ))
                .await;
                Ok(skipped_report(&publication, role))
            }
            result = tokio::time::timeout(
                options.per_publication_timeout,
                self.process_publication(dataset_id, &publication, role, options),
            ) => match result {
                Ok(report) => report,
                Err(_) => {
                    self.append_event(PipelineEvent::now(
                        Some(dataset_id.clone()),
                        Some(publication.id.clone()),
                        PipelineStage::Download,
                        StageOutcome::Failed,
                        options.per_publication_timeout.as_millis() as i64,
                        Some("publication timeout exceeded".to_string()),
                    ))
                    .await;
                    Ok(skipped_report(&publication, role))
                }
            }
        }
    }

    /// The discover → acquire → parse → persist flow for one publication.
    #[instrument(skip(self, publication, options), fields(dataset_id = %dataset_id, publication_id = %publication.id))]
    async fn process_publication(
        &self,
        dataset_id: &DatasetId,
        publication: &Publication,
        role: PublicationRole,
        options: &RunOptions,
    ) -> Result<PublicationReport, StoreError> {
        // Idempotent re-run: a successful acquisition is never repeated, and
        // a recent terminal failure (paywalled included) is not retried
        // within the freshness window.
        if let Some(latest) = self.store.latest_acquisition(&publication.id).await? {
            if let Some(success) = self.store.success_acquisition(&publication.id).await? {
                debug!("pdf already acquired; reusing");
                self.append_event(PipelineEvent::now(
                    Some(dataset_id.clone()),
                    Some(publication.id.clone()),
                    PipelineStage::Download,
                    StageOutcome::Skipped,
                    0,
                    Some("already acquired".to_string()),
                ))
                .await;
                let substatus = self
                    .reuse_or_parse(dataset_id, publication, &success)
                    .await?;
                return Ok(PublicationReport {
                    publication_id: publication.id.clone(),
                    role,
                    substatus,
                });
            }

            let window = Duration::from_secs(self.config.discovery_freshness_s);
            let age = chrono::Utc::now()
                .signed_duration_since(latest.downloaded_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if age <= window {
                debug!(status = latest.status.as_str(), "recent terminal acquisition; not retrying");
                self.append_event(PipelineEvent::now(
                    Some(dataset_id.clone()),
                    Some(publication.id.clone()),
                    PipelineStage::Download,
                    StageOutcome::Skipped,
                    0,
                    Some(format!("recently {}", latest.status.as_str())),
                ))
                .await;
                return Ok(PublicationReport {
                    publication_id: publication.id.clone(),
                    role,
                    substatus: PublicationSubstatus::MetadataOnly,
                });
            }
        }

        // Stage: URL discovery (skipped within the freshness window).
        let discovery_started = Instant::now();
        let mut stream = match self.fresh_candidates(publication).await? {
            Some(candidates) => {
                self.append_event(PipelineEvent::now(
                    Some(dataset_id.clone()),
                    Some(publication.id.clone()),
                    PipelineStage::UrlDiscovery,
                    StageOutcome::Skipped,
                    0,
                    Some(format!("{} candidates within freshness window", candidates.len())),
                ))
                .await;
                CandidateStream::from_candidates(candidates)
            }
            None => self.discovery.discover(
                publication,
                DiscoveryOptions {
                    need: UrlKind::Pdf,
                    include_last_resort: options.enable_last_resort_mirrors,
                },
            ),
        };

        // Stage: acquisition (consumes the stream in tier order).
        let acquisition = self
            .manager
            .acquire(dataset_id, role, publication, &mut stream, UrlKind::Pdf)
            .await;

        // Persist what discovery yielded and what failed.
        for candidate in stream.yielded() {
            self.persist(|| self.store.record_url_candidate(candidate))
                .await?;
        }
        for failure in stream.take_failures() {
            self.append_event(PipelineEvent::now(
                Some(dataset_id.clone()),
                Some(publication.id.clone()),
                PipelineStage::UrlDiscovery,
                StageOutcome::Failed,
                elapsed_ms(discovery_started),
                Some(format!("{}: {}", failure.source_name, failure.reason)),
            ))
            .await;
        }
        self.append_event(PipelineEvent::now(
            Some(dataset_id.clone()),
            Some(publication.id.clone()),
            PipelineStage::UrlDiscovery,
            StageOutcome::Ok,
            elapsed_ms(discovery_started),
            Some(format!("{} candidates yielded", stream.yielded().len())),
        ))
        .await;

        let download_outcome = if acquisition.status == AcquisitionStatus::Success {
            StageOutcome::Ok
        } else {
            StageOutcome::Failed
        };
        self.persist(|| self.store.record_pdf_acquisition(&acquisition))
            .await?;
        self.hot_cache.invalidate(dataset_id);
        self.append_event(PipelineEvent::now(
            Some(dataset_id.clone()),
            Some(publication.id.clone()),
            PipelineStage::Download,
            download_outcome,
            0,
            acquisition
                .error_detail
                .clone()
                .or_else(|| acquisition.source_name.clone()),
        ))
        .await;

        if acquisition.status != AcquisitionStatus::Success {
            return Ok(PublicationReport {
                publication_id: publication.id.clone(),
                role,
                substatus: PublicationSubstatus::MetadataOnly,
            });
        }

        // Another dataset task may have won the success row; parse against
        // the authoritative one.
        let authoritative = self
            .store
            .success_acquisition(&publication.id)
            .await?
            .unwrap_or(acquisition);
        let substatus = self
            .reuse_or_parse(dataset_id, publication, &authoritative)
            .await?;
        Ok(PublicationReport {
            publication_id: publication.id.clone(),
            role,
            substatus,
        })
    }

    /// Parses the acquired PDF, reusing the parsed-content cache and the
    /// store's extraction row when their hashes match the acquisition.
    async fn reuse_or_parse(
        &self,
        dataset_id: &DatasetId,
        publication: &Publication,
        acquisition: &crate::model::PdfAcquisition,
    ) -> Result<PublicationSubstatus, StoreError> {
        let Some(sha256) = acquisition.sha256.clone() else {
            return Ok(PublicationSubstatus::PdfDownloaded);
        };

        // Cache tiers first.
        if let Some(content) = self.parsed_cache.get(&publication.id, &sha256).await {
            if self
                .store
                .get_extracted_content(&publication.id)
                .await?
                .is_none_or(|stored| stored.pdf_sha256 != sha256)
            {
                self.persist(|| self.store.upsert_extracted_content(&content))
                    .await?;
                self.hot_cache.invalidate(dataset_id);
            }
            self.append_event(PipelineEvent::now(
                Some(dataset_id.clone()),
                Some(publication.id.clone()),
                PipelineStage::Parse,
                StageOutcome::Skipped,
                0,
                Some("cached parse reused".to_string()),
            ))
            .await;
            return Ok(substatus_for_quality(content.extraction_quality));
        }

        if let Some(stored) = self.store.get_extracted_content(&publication.id).await?
            && stored.pdf_sha256 == sha256
        {
            if let Err(e) = self.parsed_cache.put(&stored).await {
                warn!(error = %e, "parsed-content cache write failed");
            }
            return Ok(substatus_for_quality(stored.extraction_quality));
        }

        // Stage: parse (offloaded; never raises).
        let Some(local_path) = acquisition.local_path.clone() else {
            return Ok(PublicationSubstatus::PdfDownloaded);
        };
        let parse_started = Instant::now();
        let content = self
            .extractor
            .parse_offloaded(local_path.into(), publication.id.clone(), sha256)
            .await;

        if let Err(e) = self.parsed_cache.put(&content).await {
            warn!(error = %e, "parsed-content cache write failed");
        }
        self.persist(|| self.store.upsert_extracted_content(&content))
            .await?;
        self.hot_cache.invalidate(dataset_id);

        let outcome = if content.extraction_quality > 0.0 {
            StageOutcome::Ok
        } else {
            StageOutcome::Failed
        };
        self.append_event(PipelineEvent::now(
            Some(dataset_id.clone()),
            Some(publication.id.clone()),
            PipelineStage::Parse,
            outcome,
            elapsed_ms(parse_started),
            Some(format!(
                "quality {:.2} via {}",
                content.extraction_quality, content.extractor_used
            )),
        ))
        .await;

        Ok(substatus_for_quality(content.extraction_quality))
    }

    /// Stored candidates when the newest discovery is inside the freshness
    /// window; `None` means discovery should run.
    async fn fresh_candidates(
        &self,
        publication: &Publication,
    ) -> Result<Option<Vec<crate::model::UrlCandidate>>, StoreError> {
        let window = Duration::from_secs(self.config.discovery_freshness_s);
        let Some(latest) = self.store.latest_discovery_at(&publication.id).await? else {
            return Ok(None);
        };
        let age = chrono::Utc::now()
            .signed_duration_since(latest)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > window {
            return Ok(None);
        }
        let candidates = self.store.candidates_for(&publication.id).await?;
        Ok((!candidates.is_empty()).then_some(candidates))
    }

    /// Builds reports from the stored view (no-enrichment path).
    async fn reports_from_store(
        &self,
        dataset_id: &DatasetId,
        roster: &[(Publication, PublicationRole)],
    ) -> Vec<PublicationReport> {
        let view = self.store.get_complete_geo_data(dataset_id).await.ok().flatten();
        roster
            .iter()
            .map(|(publication, role)| {
                let substatus = view
                    .as_ref()
                    .and_then(|view| {
                        view.publications
                            .iter()
                            .find(|p| p.publication.id == publication.id)
                            .map(crate::store::PublicationView::substatus)
                    })
                    .unwrap_or(PublicationSubstatus::MetadataOnly);
                PublicationReport {
                    publication_id: publication.id.clone(),
                    role: *role,
                    substatus,
                }
            })
            .collect()
    }

    /// Runs a store mutation, retrying once on failure.
    async fn persist<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!(error = %first, "store write failed; retrying once");
                op().await
            }
        }
    }

    /// Best-effort event append; an unloggable event never fails the flow.
    async fn append_event(&self, event: PipelineEvent) {
        if let Err(e) = self.store.append_event(&event).await {
            warn!(error = %e, "failed to append pipeline event");
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Join handle wrapper that aborts the task when dropped, so unwinding a
/// dataset or run scope cannot leave spawned work running.
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

fn substatus_for_quality(quality: f64) -> PublicationSubstatus {
    if quality > 0.0 {
        PublicationSubstatus::Parsed
    } else {
        PublicationSubstatus::PdfDownloaded
    }
}

fn skipped_report(publication: &Publication, role: PublicationRole) -> PublicationReport {
    PublicationReport {
        publication_id: publication.id.clone(),
        role,
        substatus: PublicationSubstatus::MetadataOnly,
    }
}

/// A dataset is complete when every publication reached `parsed` (or it has
/// none); anything short of that is partial.
fn dataset_status(reports: &[PublicationReport]) -> DatasetRunStatus {
    if reports
        .iter()
        .all(|r| r.substatus == PublicationSubstatus::Parsed)
    {
        DatasetRunStatus::Complete
    } else {
        DatasetRunStatus::Partial
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::acquire::PdfLayout;
    use crate::config::FetcherConfig;
    use crate::db::Database;
    use crate::fetch::Fetcher;
    use crate::model::Dataset;
    use crate::source::SourceRegistry;
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    /// Search stub returning a fixed hit list.
    struct StubSearch {
        hits: Vec<DatasetHit>,
        fail: bool,
    }

    #[async_trait]
    impl DatasetSearch for StubSearch {
        async fn search(
            &self,
            _query: &str,
            _max_datasets: usize,
        ) -> anyhow::Result<Vec<DatasetHit>> {
            if self.fail {
                anyhow::bail!("search backend down");
            }
            Ok(self.hits.clone())
        }
    }

    fn dataset_hit(id: &str, pmids: &[&str]) -> DatasetHit {
        DatasetHit {
            dataset: Dataset {
                id: id.parse().unwrap(),
                title: "Test dataset".to_string(),
                organism: Some("Homo sapiens".to_string()),
                platform: None,
                sample_count: Some(4),
                summary: None,
                first_seen_at: Utc::now(),
            },
            original_pmids: pmids.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// Coordinator over an unreachable network: sources empty, citation
    /// APIs refused. Good enough for flow-control tests.
    async fn offline_coordinator(search: StubSearch, dir: &TempDir) -> Coordinator {
        let fetcher = Fetcher::new(
            &FetcherConfig {
                max_retries: 1,
                retry_backoff_s: 0.01,
                timeout_s: 2.0,
                min_pdf_bytes: 100,
                ..FetcherConfig::default()
            },
            "test@example.org",
        )
        .unwrap();
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let hot_cache = Arc::new(DatasetHotCache::new(
            store.clone(),
            16,
            Duration::from_secs(60),
        ));
        let registry = Arc::new(SourceRegistry::from_clients(vec![]));
        Coordinator::new(
            Arc::new(search),
            CitationDiscovery::with_base_urls(
                fetcher.clone(),
                "test@example.org",
                "http://127.0.0.1:9",
                "http://127.0.0.1:9",
                "http://127.0.0.1:9",
            ),
            UrlDiscovery::new(registry, Duration::from_secs(1)),
            PdfDownloadManager::new(
                fetcher,
                PdfLayout::new(dir.path().join("pdfs")),
                3,
            ),
            PdfExtractor::new(),
            Arc::new(ParsedContentCache::new(dir.path().join("parsed"), 16)),
            store,
            hot_cache,
            CoordinatorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_search_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let coordinator = offline_coordinator(
            StubSearch {
                hits: vec![],
                fail: true,
            },
            &dir,
        )
        .await;

        let result = coordinator
            .run(
                "q",
                2,
                RunOptions::from_config(&CoordinatorConfig::default()),
            )
            .await;
        assert!(matches!(result, Err(PipelineError::Search(_))));
    }

    #[tokio::test]
    async fn test_dataset_without_publications_is_complete() {
        // Scenario S2: no originals, mention search finds nothing.
        let dir = TempDir::new().unwrap();
        let coordinator = offline_coordinator(
            StubSearch {
                hits: vec![dataset_hit("GSE100", &[])],
                fail: false,
            },
            &dir,
        )
        .await;

        let result = coordinator
            .run(
                "q",
                2,
                RunOptions::from_config(&CoordinatorConfig::default()),
            )
            .await
            .unwrap();

        assert_eq!(result.datasets.len(), 1);
        assert_eq!(result.datasets[0].status, DatasetRunStatus::Complete);
        assert!(result.datasets[0].publications.is_empty());

        // The dataset itself is persisted and visible through the cache.
        let view = coordinator
            .hot_cache()
            .get(&"GSE100".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.dataset.title, "Test dataset");
    }

    #[tokio::test]
    async fn test_enrichment_disabled_links_metadata_only() {
        let dir = TempDir::new().unwrap();
        let coordinator = offline_coordinator(
            StubSearch {
                hits: vec![dataset_hit("GSE100", &["38376465"])],
                fail: false,
            },
            &dir,
        )
        .await;

        let mut options = RunOptions::from_config(&CoordinatorConfig::default());
        options.enable_enrichment = false;

        let result = coordinator.run("q", 2, options).await.unwrap();
        assert_eq!(result.datasets[0].status, DatasetRunStatus::Complete);
        assert_eq!(result.datasets[0].publications.len(), 1);
        assert_eq!(
            result.datasets[0].publications[0].substatus,
            PublicationSubstatus::MetadataOnly
        );
        assert_eq!(
            result.datasets[0].publications[0].role,
            PublicationRole::Origin
        );
    }

    #[tokio::test]
    async fn test_unreachable_sources_leave_publication_metadata_only() {
        let dir = TempDir::new().unwrap();
        let coordinator = offline_coordinator(
            StubSearch {
                hits: vec![dataset_hit("GSE100", &["38376465"])],
                fail: false,
            },
            &dir,
        )
        .await;

        let result = coordinator
            .run(
                "q",
                2,
                RunOptions::from_config(&CoordinatorConfig::default()),
            )
            .await
            .unwrap();

        assert_eq!(result.datasets[0].status, DatasetRunStatus::Partial);
        assert_eq!(
            result.datasets[0].publications[0].substatus,
            PublicationSubstatus::MetadataOnly
        );
        // The coalescing map must drain even on the paywalled path.
        assert_eq!(coordinator.download_manager().in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_cancelled_and_sweeps() {
        let dir = TempDir::new().unwrap();
        let coordinator = offline_coordinator(
            StubSearch {
                hits: vec![dataset_hit("GSE100", &["1"]), dataset_hit("GSE200", &["2"])],
                fail: false,
            },
            &dir,
        )
        .await;

        let cancel = CancelToken::new();
        cancel.cancel(); // cancel before the run starts

        let result = coordinator
            .run_with_cancel(
                "q",
                2,
                RunOptions::from_config(&CoordinatorConfig::default()),
                cancel,
            )
            .await
            .unwrap();

        assert!(result.cancelled);
        for dataset in &result.datasets {
            assert_eq!(dataset.status, DatasetRunStatus::Failed);
        }
        assert_eq!(coordinator.download_manager().in_flight_count(), 0);
    }

    #[test]
    fn test_dataset_status_rules() {
        let parsed = PublicationReport {
            publication_id: crate::model::PublicationId::Pmid("1".to_string()),
            role: PublicationRole::Origin,
            substatus: PublicationSubstatus::Parsed,
        };
        let metadata_only = PublicationReport {
            publication_id: crate::model::PublicationId::Pmid("2".to_string()),
            role: PublicationRole::Citing,
            substatus: PublicationSubstatus::MetadataOnly,
        };

        assert_eq!(dataset_status(&[]), DatasetRunStatus::Complete);
        assert_eq!(
            dataset_status(&[parsed.clone()]),
            DatasetRunStatus::Complete
        );
        assert_eq!(
            dataset_status(&[parsed, metadata_only]),
            DatasetRunStatus::Partial
        );
    }
}
