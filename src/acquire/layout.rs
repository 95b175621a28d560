//! On-disk PDF layout: `<pdf_root>/<dataset_id>/<role>/<publication_id>.pdf`.
//!
//! Writes are atomic: the fetcher streams into a `.tmp` sibling and the
//! manager renames it onto the final path only after validation. The store
//! row is authoritative; any `.tmp` file found on disk is garbage from an
//! interrupted run and is swept away.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::model::{DatasetId, PublicationId, PublicationRole};

/// Suffix marking in-progress downloads.
const TMP_SUFFIX: &str = ".tmp";

/// Content-addressed PDF directory layout under a configured root.
#[derive(Debug, Clone)]
pub struct PdfLayout {
    root: PathBuf,
}

impl PdfLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the layout root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for one publication's PDF.
    #[must_use]
    pub fn final_path(
        &self,
        dataset_id: &DatasetId,
        role: PublicationRole,
        publication_id: &PublicationId,
    ) -> PathBuf {
        self.root
            .join(dataset_id.as_str())
            .join(role.as_str())
            .join(format!("{}.pdf", publication_id.file_stem()))
    }

    /// Temporary sibling of [`final_path`](Self::final_path); same directory
    /// so the rename is atomic.
    #[must_use]
    pub fn tmp_path(
        &self,
        dataset_id: &DatasetId,
        role: PublicationRole,
        publication_id: &PublicationId,
    ) -> PathBuf {
        let mut path = self.final_path(dataset_id, role, publication_id);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.set_file_name(format!("{file_name}{TMP_SUFFIX}"));
        path
    }

    /// Creates the directory for a publication's PDF.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error.
    pub async fn ensure_dir(
        &self,
        dataset_id: &DatasetId,
        role: PublicationRole,
    ) -> std::io::Result<()> {
        let dir = self.root.join(dataset_id.as_str()).join(role.as_str());
        tokio::fs::create_dir_all(&dir).await
    }

    /// Removes every `.tmp` file under the root.
    ///
    /// Run at startup and after a cancelled run. Returns the number of files
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error when the root cannot be walked; a
    /// missing root is treated as zero files.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn sweep_tmp_files(&self) -> std::io::Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(TMP_SUFFIX))
                {
                    match std::fs::remove_file(&path) {
                        Ok(()) => {
                            debug!(path = %path.display(), "removed orphan tmp file");
                            removed += 1;
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "failed to remove tmp file");
                        }
                    }
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ids() -> (DatasetId, PublicationId) {
        (
            "GSE12345".parse().unwrap(),
            PublicationId::Pmid("38376465".to_string()),
        )
    }

    #[test]
    fn test_final_path_shape() {
        let (dataset_id, publication_id) = ids();
        let layout = PdfLayout::new("/data/pdfs");
        let path = layout.final_path(&dataset_id, PublicationRole::Origin, &publication_id);
        assert_eq!(
            path,
            PathBuf::from("/data/pdfs/GSE12345/origin/pmid_38376465.pdf")
        );
    }

    #[test]
    fn test_tmp_path_is_sibling_with_suffix() {
        let (dataset_id, publication_id) = ids();
        let layout = PdfLayout::new("/data/pdfs");
        let final_path = layout.final_path(&dataset_id, PublicationRole::Citing, &publication_id);
        let tmp_path = layout.tmp_path(&dataset_id, PublicationRole::Citing, &publication_id);
        assert_eq!(tmp_path.parent(), final_path.parent());
        assert!(tmp_path.to_string_lossy().ends_with(".pdf.tmp"));
    }

    #[test]
    fn test_doi_publication_path_has_no_separators() {
        let dataset_id: DatasetId = "GSE1".parse().unwrap();
        let publication_id = PublicationId::Doi("10.1000/j.test.1".to_string());
        let layout = PdfLayout::new("/data/pdfs");
        let path = layout.final_path(&dataset_id, PublicationRole::Origin, &publication_id);
        // The DOI slash must not create extra directories.
        assert_eq!(path.parent(), Some(Path::new("/data/pdfs/GSE1/origin")));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_tmp_files() {
        let dir = TempDir::new().unwrap();
        let layout = PdfLayout::new(dir.path());
        let (dataset_id, _) = ids();
        layout
            .ensure_dir(&dataset_id, PublicationRole::Origin)
            .await
            .unwrap();

        let keep = dir.path().join("GSE12345/origin/kept.pdf");
        let sweep_a = dir.path().join("GSE12345/origin/partial.pdf.tmp");
        let sweep_b = dir.path().join("GSE12345/stray.tmp");
        std::fs::write(&keep, b"pdf").unwrap();
        std::fs::write(&sweep_a, b"partial").unwrap();
        std::fs::write(&sweep_b, b"stray").unwrap();

        let removed = layout.sweep_tmp_files().unwrap();
        assert_eq!(removed, 2);
        assert!(keep.exists());
        assert!(!sweep_a.exists());
        assert!(!sweep_b.exists());
    }

    #[test]
    fn test_sweep_missing_root_is_zero() {
        let layout = PdfLayout::new("/nonexistent/geoharvest-test-root");
        assert_eq!(layout.sweep_tmp_files().unwrap(), 0);
    }
}
