//! Per-request file resources: the source PDF and the scratch workspace.
//!
//! ## Ownership
//!
//! An uploaded PDF and the workspace directory belong to exactly one request.
//! Both are held through `tempfile` handles, so they are deleted when the
//! handle is dropped, including when a request future is cancelled or a
//! panic unwinds. On the normal path the pipeline calls `cleanup` instead,
//! which deletes eagerly and logs (but never returns) any error.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, TempPath};
use tracing::debug;

/// The PDF an analysis reads.
#[derive(Debug)]
pub enum SourcePdf {
    /// An upload written by the service; deleted after processing.
    Uploaded(TempPath),
    /// A caller-owned file (CLI); never deleted.
    Local(PathBuf),
}

impl SourcePdf {
    /// Path to the PDF regardless of ownership.
    pub fn path(&self) -> &Path {
        match self {
            SourcePdf::Uploaded(p) => &**p,
            SourcePdf::Local(p) => p.as_path(),
        }
    }

    /// Write uploaded bytes to a fresh `upload-*.pdf` file under `dir`.
    pub async fn persist_upload(dir: &Path, bytes: &[u8]) -> Result<Self, PipelineError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::io(dir, e))?;

        let file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".pdf")
            .tempfile_in(dir)
            .map_err(|e| PipelineError::io(dir, e))?;
        let path = file.into_temp_path();

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::io(path.to_path_buf(), e))?;
        debug!("Stored upload ({} bytes) at {}", bytes.len(), path.display());
        Ok(SourcePdf::Uploaded(path))
    }

    /// Delete an uploaded file now. Local files are left alone.
    pub fn cleanup(self) {
        if let SourcePdf::Uploaded(path) = self {
            let shown = path.display().to_string();
            if let Err(e) = path.close() {
                debug!("Could not remove upload {}: {}", shown, e);
            }
        }
    }
}

/// Scratch directory for one request, created on first use.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    dir: Option<TempDir>,
}

impl Workspace {
    /// A workspace under `root`. Nothing touches the disk yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dir: None,
        }
    }

    /// Directory path, creating `root/pdfvision-*` on the first call.
    pub fn dir(&mut self) -> Result<&Path, PipelineError> {
        if self.dir.is_none() {
            std::fs::create_dir_all(&self.root).map_err(|e| PipelineError::io(&self.root, e))?;
            let dir = tempfile::Builder::new()
                .prefix("pdfvision-")
                .tempdir_in(&self.root)
                .map_err(|e| PipelineError::io(&self.root, e))?;
            debug!("Created workspace {}", dir.path().display());
            self.dir = Some(dir);
        }
        match self.dir {
            Some(ref dir) => Ok(dir.path()),
            None => Err(PipelineError::Internal("workspace missing after creation".into())),
        }
    }

    /// Whether the directory has been created.
    pub fn is_created(&self) -> bool {
        self.dir.is_some()
    }

    /// Remove the directory and everything in it. Safe if it was never created.
    pub fn cleanup(self) {
        if let Some(dir) = self.dir {
            let shown = dir.path().display().to_string();
            if let Err(e) = dir.close() {
                debug!("Could not remove workspace {}: {}", shown, e);
            }
        }
    }
}
