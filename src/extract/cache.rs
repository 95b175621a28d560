//! Two-tier parsed-content cache keyed by publication identifier.
//!
//! Memory tier: bounded LRU. Disk tier: one JSON file per publication at
//! `<parsed_cache_root>/<publication_id>.json`. Every read is validated
//! against the SHA-256 of the publication's current PDF: a stored entry
//! whose hash differs is a miss, so the cache can never serve sections
//! parsed from a PDF that has since been replaced.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use tracing::{debug, instrument, warn};

use crate::model::{ExtractedContent, PublicationId};

/// Parsed-content cache: memory LRU over a JSON disk tier.
#[derive(Debug)]
pub struct ParsedContentCache {
    root: PathBuf,
    memory: Mutex<LruCache<String, ExtractedContent>>,
}

impl ParsedContentCache {
    /// Creates a cache rooted at `root` with a bounded memory tier.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, max_memory_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_memory_entries.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            root: root.into(),
            memory: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Disk path for one publication's parsed content.
    #[must_use]
    pub fn disk_path(&self, id: &PublicationId) -> PathBuf {
        self.root.join(format!("{}.json", id.file_stem()))
    }

    /// Reads cached content, validating against the current PDF hash.
    ///
    /// Read path: memory → disk → miss. A hash mismatch at either tier is a
    /// miss (the stale entry is dropped from memory); the caller re-parses
    /// and overwrites.
    #[instrument(skip(self, id), fields(publication_id = %id))]
    pub async fn get(
        &self,
        id: &PublicationId,
        current_pdf_sha256: &str,
    ) -> Option<ExtractedContent> {
        {
            let mut memory = self.memory.lock().ok()?;
            if let Some(entry) = memory.get(&id.as_key()) {
                if entry.pdf_sha256 == current_pdf_sha256 {
                    debug!("parsed-content memory hit");
                    return Some(entry.clone());
                }
                debug!("memory entry stale; dropping");
                memory.pop(&id.as_key());
            }
        }

        let path = self.disk_path(id);
        let raw = tokio::fs::read(&path).await.ok()?;
        let content: ExtractedContent = match serde_json::from_slice(&raw) {
            Ok(content) => content,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "unreadable parsed-content file");
                return None;
            }
        };

        if content.pdf_sha256 != current_pdf_sha256 {
            debug!("disk entry stale relative to current pdf");
            return None;
        }

        if let Ok(mut memory) = self.memory.lock() {
            memory.put(id.as_key(), content.clone());
        }
        debug!("parsed-content disk hit");
        Some(content)
    }

    /// Writes content through both tiers.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the disk tier cannot be written;
    /// the memory tier is updated regardless.
    #[instrument(skip(self, content), fields(publication_id = %content.publication_id))]
    pub async fn put(&self, content: &ExtractedContent) -> std::io::Result<()> {
        if let Ok(mut memory) = self.memory.lock() {
            memory.put(content.publication_id.as_key(), content.clone());
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.disk_path(&content.publication_id);
        let json = serde_json::to_vec_pretty(content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&path, json).await?;
        debug!(path = %path.display(), "parsed content written through");
        Ok(())
    }

    /// Returns the cache root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
