//! Unified persistent store for datasets, publications, and pipeline records.
//!
//! This module is the single owner of every entity: datasets, publications,
//! dataset↔publication edges, URL discovery rows, PDF acquisitions,
//! extraction records, and the append-only pipeline event log. All mutations
//! are transactional; readers see consistent snapshots. The hot cache mirrors
//! this store but never creates entities.
//!
//! # Overview
//!
//! - [`Store`] - transactional operation surface
//! - [`StoreError`] - operation error types
//! - [`CompleteGeoData`] - denormalized view consumed by the API via the hot cache
//!
//! # Example
//!
//! ```ignore
//! use geoharvest_core::store::Store;
//! use geoharvest_core::Database;
//!
//! let db = Database::new_in_memory().await?;
//! let store = Store::new(db);
//! store.upsert_dataset(&dataset).await?;
//! let view = store.get_complete_geo_data(&dataset.id).await?;
//! ```

mod error;
mod view;

pub use error::{Result, StoreError};
pub use view::{CompleteGeoData, PublicationSubstatus, PublicationView};

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, instrument, warn};

use crate::db::Database;
use crate::model::{
    AcquisitionStatus, Dataset, DatasetId, PdfAcquisition, PipelineEvent, Publication,
    PublicationId, PublicationRole, UrlCandidate,
};

/// Transactional persistence surface over the SQLite schema.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ==================== Datasets ====================

    /// Inserts a dataset or merges metadata into the existing row.
    ///
    /// Idempotent on `id`. `first_seen_at` is preserved on update; metadata
    /// fields are overwritten only by non-empty incoming values, so a later
    /// sparse search hit cannot erase previously stored detail.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on write failure.
    #[instrument(skip(self, dataset), fields(dataset_id = %dataset.id))]
    pub async fn upsert_dataset(&self, dataset: &Dataset) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO geo_datasets (id, title, organism, platform, sample_count, summary, first_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = CASE WHEN excluded.title != '' THEN excluded.title ELSE geo_datasets.title END,
                organism = COALESCE(excluded.organism, geo_datasets.organism),
                platform = COALESCE(excluded.platform, geo_datasets.platform),
                sample_count = COALESCE(excluded.sample_count, geo_datasets.sample_count),
                summary = COALESCE(excluded.summary, geo_datasets.summary)
            ",
        )
        .bind(dataset.id.as_str())
        .bind(&dataset.title)
        .bind(&dataset.organism)
        .bind(&dataset.platform)
        .bind(dataset.sample_count)
        .bind(&dataset.summary)
        .bind(dataset.first_seen_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Fetches one dataset row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    pub async fn get_dataset(&self, id: &DatasetId) -> Result<Option<Dataset>> {
        let row = sqlx::query(
            "SELECT id, title, organism, platform, sample_count, summary, first_seen_at \
             FROM geo_datasets WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| dataset_from_row(&r)).transpose()
    }

    // ==================== Publications & edges ====================

    /// Stores a publication (insert or metadata merge) and links it to a
    /// dataset with the given role.
    ///
    /// Idempotent on `(dataset_id, publication_id)`. When the edge already
    /// exists with a different role, the existing role is kept, except that
    /// a citing edge is upgraded to origin (ties break to origin).
    ///
    /// Returns the effective role of the edge after the call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on write failure.
    #[instrument(skip(self, publication), fields(dataset_id = %dataset_id, publication_id = %publication.id))]
    pub async fn link_publication(
        &self,
        dataset_id: &DatasetId,
        publication: &Publication,
        role: PublicationRole,
    ) -> Result<PublicationRole> {
        let authors_json = serde_json::to_string(&publication.authors)?;
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r"
            INSERT INTO publications (id, pmid, doi, title, authors, journal, year, abstract)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                doi = COALESCE(excluded.doi, publications.doi),
                title = CASE WHEN excluded.title != '' THEN excluded.title ELSE publications.title END,
                authors = CASE WHEN excluded.authors != '[]' THEN excluded.authors ELSE publications.authors END,
                journal = COALESCE(excluded.journal, publications.journal),
                year = COALESCE(excluded.year, publications.year),
                abstract = COALESCE(excluded.abstract, publications.abstract)
            ",
        )
        .bind(publication.id.as_key())
        .bind(publication.id.pmid())
        .bind(&publication.doi)
        .bind(&publication.title)
        .bind(authors_json)
        .bind(&publication.journal)
        .bind(publication.year)
        .bind(&publication.abstract_text)
        .execute(&mut *tx)
        .await?;

        // Keep the existing role on conflict; origin wins when the incoming
        // role is origin and the stored role is citing.
        sqlx::query(
            r"
            INSERT INTO dataset_publications (dataset_id, publication_id, role, linked_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(dataset_id, publication_id) DO UPDATE SET
                role = CASE
                    WHEN excluded.role = 'origin' THEN 'origin'
                    ELSE dataset_publications.role
                END
            ",
        )
        .bind(dataset_id.as_str())
        .bind(publication.id.as_key())
        .bind(role.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let effective: (String,) = sqlx::query_as(
            "SELECT role FROM dataset_publications WHERE dataset_id = ? AND publication_id = ?",
        )
        .bind(dataset_id.as_str())
        .bind(publication.id.as_key())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        PublicationRole::parse(&effective.0).ok_or_else(|| StoreError::CorruptRow {
            column: "dataset_publications.role",
            value: effective.0.clone(),
        })
    }

    /// Fetches one publication row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    pub async fn get_publication(&self, id: &PublicationId) -> Result<Option<Publication>> {
        let row = sqlx::query(
            "SELECT id, pmid, doi, title, authors, journal, year, abstract \
             FROM publications WHERE id = ?",
        )
        .bind(id.as_key())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| publication_from_row(&r)).transpose()
    }

    // ==================== URL discovery ====================

    /// Records a discovered URL candidate.
    ///
    /// Idempotent on `(publication_id, url)`; returns `true` when a new row
    /// was inserted, `false` for a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on write failure.
    #[instrument(skip(self, candidate), fields(publication_id = %candidate.publication_id, source = %candidate.source_name))]
    pub async fn record_url_candidate(&self, candidate: &UrlCandidate) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO url_discovery (publication_id, source_name, url, kind, tier, discovered_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(publication_id, url) DO NOTHING
            ",
        )
        .bind(candidate.publication_id.as_key())
        .bind(&candidate.source_name)
        .bind(&candidate.url)
        .bind(candidate.kind.as_str())
        .bind(i64::from(candidate.tier))
        .bind(candidate.discovered_at)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns all candidates recorded for a publication, tier order first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    pub async fn candidates_for(&self, id: &PublicationId) -> Result<Vec<UrlCandidate>> {
        let rows = sqlx::query(
            "SELECT publication_id, source_name, url, kind, tier, discovered_at \
             FROM url_discovery WHERE publication_id = ? \
             ORDER BY tier ASC, source_name ASC, id ASC",
        )
        .bind(id.as_key())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(candidate_from_row).collect()
    }

    /// Returns the newest discovery timestamp for a publication, if any.
    ///
    /// Supports the coordinator's discovery-freshness window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    pub async fn latest_discovery_at(
        &self,
        id: &PublicationId,
    ) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT discovered_at FROM url_discovery WHERE publication_id = ? \
             ORDER BY discovered_at DESC LIMIT 1",
        )
        .bind(id.as_key())
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(|r| r.0))
    }

    // ==================== PDF acquisitions ====================

    /// Records a finished PDF acquisition.
    ///
    /// Enforces at-most-one `success` per publication in the same
    /// transaction: when a success row already exists, an incoming success is
    /// stored with status `redundant` instead. Returns the status actually
    /// stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on write failure.
    #[instrument(skip(self, acquisition), fields(publication_id = %acquisition.publication_id, status = acquisition.status.as_str()))]
    pub async fn record_pdf_acquisition(
        &self,
        acquisition: &PdfAcquisition,
    ) -> Result<AcquisitionStatus> {
        let mut tx = self.db.pool().begin().await?;

        let stored_status = if acquisition.status == AcquisitionStatus::Success {
            let existing: Option<(i64,)> = sqlx::query_as(
                "SELECT id FROM pdf_acquisition \
                 WHERE publication_id = ? AND status = 'success' LIMIT 1",
            )
            .bind(acquisition.publication_id.as_key())
            .fetch_optional(&mut *tx)
            .await?;

            if existing.is_some() {
                warn!(
                    publication_id = %acquisition.publication_id,
                    "success already recorded; storing as redundant"
                );
                AcquisitionStatus::Redundant
            } else {
                AcquisitionStatus::Success
            }
        } else {
            acquisition.status
        };

        sqlx::query(
            r"
            INSERT INTO pdf_acquisition
                (publication_id, source_name, local_path, bytes, sha256, final_url,
                 status, error_detail, downloaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(acquisition.publication_id.as_key())
        .bind(&acquisition.source_name)
        .bind(&acquisition.local_path)
        .bind(acquisition.bytes)
        .bind(&acquisition.sha256)
        .bind(&acquisition.final_url)
        .bind(stored_status.as_str())
        .bind(&acquisition.error_detail)
        .bind(acquisition.downloaded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(stored_status)
    }

    /// Returns the `success` acquisition for a publication, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    pub async fn success_acquisition(
        &self,
        id: &PublicationId,
    ) -> Result<Option<PdfAcquisition>> {
        let row = sqlx::query(
            "SELECT publication_id, source_name, local_path, bytes, sha256, final_url, \
                    status, error_detail, downloaded_at \
             FROM pdf_acquisition WHERE publication_id = ? AND status = 'success' LIMIT 1",
        )
        .bind(id.as_key())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| acquisition_from_row(&r)).transpose()
    }

    /// Returns the newest acquisition row for a publication, if any.
    ///
    /// Supports the coordinator's re-run logic: a recent terminal
    /// acquisition (paywalled included) is not retried within the
    /// freshness window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    pub async fn latest_acquisition(
        &self,
        id: &PublicationId,
    ) -> Result<Option<PdfAcquisition>> {
        let row = sqlx::query(
            "SELECT publication_id, source_name, local_path, bytes, sha256, final_url, \
                    status, error_detail, downloaded_at \
             FROM pdf_acquisition WHERE publication_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(id.as_key())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| acquisition_from_row(&r)).transpose()
    }

    /// Returns every acquisition row for a publication, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    pub async fn acquisitions_for(&self, id: &PublicationId) -> Result<Vec<PdfAcquisition>> {
        let rows = sqlx::query(
            "SELECT publication_id, source_name, local_path, bytes, sha256, final_url, \
                    status, error_detail, downloaded_at \
             FROM pdf_acquisition WHERE publication_id = ? ORDER BY id ASC",
        )
        .bind(id.as_key())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(acquisition_from_row).collect()
    }

    // ==================== Extracted content ====================

    /// Stores extracted sections, replacing any previous extraction for the
    /// publication.
    ///
    /// Validates that `pdf_sha256` matches the publication's current success
    /// acquisition; a mismatch (or missing success row) is rejected so the
    /// store can never associate sections with a PDF it does not hold.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoAcquisition`] when no success row exists,
    /// [`StoreError::HashMismatch`] when the hashes disagree, or
    /// [`StoreError::Database`] on write failure.
    #[instrument(skip(self, content), fields(publication_id = %content.publication_id))]
    pub async fn upsert_extracted_content(
        &self,
        content: &crate::model::ExtractedContent,
    ) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        let current: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT sha256 FROM pdf_acquisition \
             WHERE publication_id = ? AND status = 'success' LIMIT 1",
        )
        .bind(content.publication_id.as_key())
        .fetch_optional(&mut *tx)
        .await?;

        let acquisition_sha = current
            .and_then(|r| r.0)
            .ok_or_else(|| StoreError::NoAcquisition(content.publication_id.clone()))?;

        if acquisition_sha != content.pdf_sha256 {
            return Err(StoreError::HashMismatch {
                publication_id: content.publication_id.clone(),
                extraction_sha256: content.pdf_sha256.clone(),
                acquisition_sha256: acquisition_sha,
            });
        }

        let sections_json = serde_json::to_string(&content.sections)?;
        sqlx::query(
            r"
            INSERT INTO content_extraction
                (publication_id, pdf_sha256, sections, extractor_used, extraction_quality, extracted_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(publication_id) DO UPDATE SET
                pdf_sha256 = excluded.pdf_sha256,
                sections = excluded.sections,
                extractor_used = excluded.extractor_used,
                extraction_quality = excluded.extraction_quality,
                extracted_at = excluded.extracted_at
            ",
        )
        .bind(content.publication_id.as_key())
        .bind(&content.pdf_sha256)
        .bind(sections_json)
        .bind(&content.extractor_used)
        .bind(content.extraction_quality)
        .bind(content.extracted_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(publication_id = %content.publication_id, "extraction stored");
        Ok(())
    }

    /// Fetches the extraction row for a publication.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    pub async fn get_extracted_content(
        &self,
        id: &PublicationId,
    ) -> Result<Option<crate::model::ExtractedContent>> {
        let row = sqlx::query(
            "SELECT publication_id, pdf_sha256, sections, extractor_used, \
                    extraction_quality, extracted_at \
             FROM content_extraction WHERE publication_id = ?",
        )
        .bind(id.as_key())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| extraction_from_row(&r)).transpose()
    }

    // ==================== Pipeline events ====================

    /// Appends one pipeline event. Events are immutable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on write failure.
    pub async fn append_event(&self, event: &PipelineEvent) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO pipeline_events
                (dataset_id, publication_id, stage, outcome, duration_ms, detail, ts)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(event.dataset_id.as_ref().map(DatasetId::as_str))
        .bind(event.publication_id.as_ref().map(PublicationId::as_key))
        .bind(event.stage.as_str())
        .bind(event.outcome.as_str())
        .bind(event.duration_ms)
        .bind(&event.detail)
        .bind(event.ts)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Returns `(stage, outcome, detail)` tuples for a dataset, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    pub async fn events_for_dataset(
        &self,
        dataset_id: &DatasetId,
    ) -> Result<Vec<(String, String, Option<String>)>> {
        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            "SELECT stage, outcome, detail FROM pipeline_events \
             WHERE dataset_id = ? ORDER BY id ASC",
        )
        .bind(dataset_id.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    // ==================== Denormalized view ====================

    /// Builds the denormalized view for one dataset in a single JOIN-based
    /// publication query: role, URL count, best non-redundant acquisition
    /// status, and extraction quality per linked publication.
    ///
    /// Returns `None` when the dataset is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on read failure.
    #[instrument(skip(self), fields(dataset_id = %dataset_id))]
    pub async fn get_complete_geo_data(
        &self,
        dataset_id: &DatasetId,
    ) -> Result<Option<CompleteGeoData>> {
        let Some(dataset) = self.get_dataset(dataset_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r"
            SELECT
                p.id AS pub_id, p.pmid, p.doi, p.title, p.authors, p.journal, p.year, p.abstract,
                dp.role,
                COALESCE(u.url_count, 0) AS url_count,
                a.status_rank,
                ce.extraction_quality
            FROM dataset_publications dp
            JOIN publications p ON p.id = dp.publication_id
            LEFT JOIN (
                SELECT publication_id, COUNT(*) AS url_count
                FROM url_discovery GROUP BY publication_id
            ) u ON u.publication_id = p.id
            LEFT JOIN (
                SELECT publication_id,
                       MIN(CASE status
                           WHEN 'success' THEN 0
                           WHEN 'invalid_content' THEN 1
                           WHEN 'paywalled' THEN 2
                           WHEN 'failed' THEN 3
                       END) AS status_rank
                FROM pdf_acquisition
                WHERE status != 'redundant'
                GROUP BY publication_id
            ) a ON a.publication_id = p.id
            LEFT JOIN content_extraction ce ON ce.publication_id = p.id
            WHERE dp.dataset_id = ?
            ORDER BY CASE dp.role WHEN 'origin' THEN 0 ELSE 1 END, p.id ASC
            ",
        )
        .bind(dataset_id.as_str())
        .fetch_all(self.db.pool())
        .await?;

        let mut publications = Vec::with_capacity(rows.len());
        for row in &rows {
            let publication = publication_from_prefixed_row(row)?;
            let role_raw: String = row.try_get("role")?;
            let role = PublicationRole::parse(&role_raw).ok_or_else(|| StoreError::CorruptRow {
                column: "dataset_publications.role",
                value: role_raw,
            })?;
            let url_count: i64 = row.try_get("url_count")?;
            let status_rank: Option<i64> = row.try_get("status_rank")?;
            let extraction_quality: Option<f64> = row.try_get("extraction_quality")?;

            publications.push(PublicationView {
                publication,
                role,
                url_count,
                pdf_status: status_rank.map(status_from_rank).transpose()?,
                extraction_quality,
            });
        }

        Ok(Some(CompleteGeoData {
            dataset,
            publications,
            computed_at: Utc::now(),
        }))
    }
}

// ==================== Row mapping ====================

fn status_from_rank(rank: i64) -> Result<AcquisitionStatus> {
    match rank {
        0 => Ok(AcquisitionStatus::Success),
        1 => Ok(AcquisitionStatus::InvalidContent),
        2 => Ok(AcquisitionStatus::Paywalled),
        3 => Ok(AcquisitionStatus::Failed),
        other => Err(StoreError::CorruptRow {
            column: "pdf_acquisition.status",
            value: other.to_string(),
        }),
    }
}

fn dataset_from_row(row: &SqliteRow) -> Result<Dataset> {
    let id_raw: String = row.try_get("id")?;
    let id = id_raw.parse().map_err(|_| StoreError::CorruptRow {
        column: "geo_datasets.id",
        value: id_raw,
    })?;
    Ok(Dataset {
        id,
        title: row.try_get("title")?,
        organism: row.try_get("organism")?,
        platform: row.try_get("platform")?,
        sample_count: row.try_get("sample_count")?,
        summary: row.try_get("summary")?,
        first_seen_at: row.try_get("first_seen_at")?,
    })
}

fn publication_id_from(raw: String, column: &'static str) -> Result<PublicationId> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        column,
        value: raw,
    })
}

fn publication_fields(
    row: &SqliteRow,
    id_column: &str,
    id_column_name: &'static str,
) -> Result<Publication> {
    let id_raw: String = row.try_get(id_column)?;
    let id = publication_id_from(id_raw, id_column_name)?;
    let authors_json: String = row.try_get("authors")?;
    let authors: Vec<String> = serde_json::from_str(&authors_json)?;
    Ok(Publication {
        id,
        doi: row.try_get("doi")?,
        title: row.try_get("title")?,
        authors,
        journal: row.try_get("journal")?,
        year: row.try_get("year")?,
        abstract_text: row.try_get("abstract")?,
    })
}

fn publication_from_row(row: &SqliteRow) -> Result<Publication> {
    publication_fields(row, "id", "publications.id")
}

fn publication_from_prefixed_row(row: &SqliteRow) -> Result<Publication> {
    publication_fields(row, "pub_id", "publications.id")
}

fn candidate_from_row(row: &SqliteRow) -> Result<UrlCandidate> {
    let id_raw: String = row.try_get("publication_id")?;
    let kind_raw: String = row.try_get("kind")?;
    let kind = crate::model::UrlKind::parse(&kind_raw).ok_or_else(|| StoreError::CorruptRow {
        column: "url_discovery.kind",
        value: kind_raw,
    })?;
    let tier: i64 = row.try_get("tier")?;
    Ok(UrlCandidate {
        publication_id: publication_id_from(id_raw, "url_discovery.publication_id")?,
        source_name: row.try_get("source_name")?,
        url: row.try_get("url")?,
        kind,
        tier: u8::try_from(tier).unwrap_or(u8::MAX),
        discovered_at: row.try_get("discovered_at")?,
    })
}

fn acquisition_from_row(row: &SqliteRow) -> Result<PdfAcquisition> {
    let id_raw: String = row.try_get("publication_id")?;
    let status_raw: String = row.try_get("status")?;
    let status =
        AcquisitionStatus::parse(&status_raw).ok_or_else(|| StoreError::CorruptRow {
            column: "pdf_acquisition.status",
            value: status_raw,
        })?;
    Ok(PdfAcquisition {
        publication_id: publication_id_from(id_raw, "pdf_acquisition.publication_id")?,
        source_name: row.try_get("source_name")?,
        local_path: row.try_get("local_path")?,
        bytes: row.try_get("bytes")?,
        sha256: row.try_get("sha256")?,
        final_url: row.try_get("final_url")?,
        status,
        error_detail: row.try_get("error_detail")?,
        downloaded_at: row.try_get("downloaded_at")?,
    })
}

fn extraction_from_row(row: &SqliteRow) -> Result<crate::model::ExtractedContent> {
    let id_raw: String = row.try_get("publication_id")?;
    let sections_json: String = row.try_get("sections")?;
    Ok(crate::model::ExtractedContent {
        publication_id: publication_id_from(id_raw, "content_extraction.publication_id")?,
        pdf_sha256: row.try_get("pdf_sha256")?,
        sections: serde_json::from_str(&sections_json)?,
        extractor_used: row.try_get("extractor_used")?,
        extraction_quality: row.try_get("extraction_quality")?,
        extracted_at: row.try_get("extracted_at")?,
    })
}
