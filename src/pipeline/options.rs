//! Run options and results for the pipeline coordinator.

use std::time::Duration;

use serde::Serialize;

use crate::config::CoordinatorConfig;
use crate::model::{DatasetId, PublicationId, PublicationRole};
use crate::store::PublicationSubstatus;

/// Options for one coordinator run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run URL discovery + download + parse after search.
    pub enable_enrichment: bool,
    /// Allow tier-7/8 mirror sources in this run's discovery.
    pub enable_last_resort_mirrors: bool,
    /// Cap on citing publications considered per dataset.
    pub max_citing_per_dataset: usize,
    /// Budget for one publication's whole discover+download+parse flow.
    pub per_publication_timeout: Duration,
    /// Budget for one dataset's whole task.
    pub per_dataset_timeout: Duration,
}

impl RunOptions {
    /// Builds the default options from coordinator configuration.
    #[must_use]
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            enable_enrichment: true,
            enable_last_resort_mirrors: false,
            max_citing_per_dataset: 5,
            per_publication_timeout: Duration::from_secs_f64(config.per_publication_timeout_s),
            per_dataset_timeout: Duration::from_secs_f64(config.per_dataset_timeout_s),
        }
    }
}

/// Per-dataset outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetRunStatus {
    /// Every linked publication reached its terminal best state.
    Complete,
    /// The dataset was processed but some publications fell short of
    /// parsed (paywalled, failed, or not attempted).
    Partial,
    /// The dataset task itself aborted (storage failure, timeout, cancel).
    Failed,
}

/// Final state of one publication within a dataset run.
#[derive(Debug, Clone)]
pub struct PublicationReport {
    pub publication_id: PublicationId,
    pub role: PublicationRole,
    pub substatus: PublicationSubstatus,
}

/// Outcome of one dataset task.
#[derive(Debug, Clone)]
pub struct DatasetReport {
    pub dataset_id: DatasetId,
    pub status: DatasetRunStatus,
    pub publications: Vec<PublicationReport>,
    pub duration: Duration,
}

/// Result of a whole coordinator run.
///
/// Never carries stack traces; failures surface as statuses and the
/// pipeline event log.
#[derive(Debug)]
pub struct RunResult {
    pub query: String,
    pub datasets: Vec<DatasetReport>,
    pub duration: Duration,
    /// True when the run was cut short by cancellation.
    pub cancelled: bool,
}

impl RunResult {
    /// Counts datasets with the given status.
    #[must_use]
    pub fn count_with_status(&self, status: DatasetRunStatus) -> usize {
        self.datasets.iter().filter(|d| d.status == status).count()
    }
}
