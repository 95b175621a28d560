//! Outbound summarizer collaborator contract.
//!
//! The analysis step lives outside this engine. The core hands a dataset
//! summary and the parsed sections of selected publications to an
//! implementation of [`Summarizer`] and passes the returned text through
//! without interpreting it.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::model::PublicationId;

/// Parsed sections of one publication, as handed to the summarizer.
#[derive(Debug, Clone)]
pub struct PublicationSections {
    pub publication_id: PublicationId,
    /// Section name → extracted text.
    pub sections: BTreeMap<String, String>,
}

/// Outbound collaborator: turns parsed sections into analysis text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarizes a dataset from its metadata and parsed publications.
    async fn summarize(
        &self,
        dataset_summary: &str,
        publications: &[PublicationSections],
    ) -> anyhow::Result<String>;
}
