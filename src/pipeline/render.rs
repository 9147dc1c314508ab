//! PDF rasterisation: run an external tool, collect the page images it wrote.
//!
//! The tool is one of `pdftoppm`, `magick` or `gm`, chosen by
//! [`crate::pipeline::converter`]. It runs as a child process under a
//! timeout and is killed if the future is dropped.
//!
//! ## Page numbering
//!
//! Page numbers come from the output file names, not from the PDF. The tool
//! writes `page-<N>.png`; [`collect_pages`] keeps only names of that shape
//! and sorts numerically, so `page-10.png` follows `page-9.png` and stray
//! files in the directory are ignored.

use crate::error::PipelineError;
use crate::pipeline::converter::{self, ConverterKind, DetectedConverter, PAGE_PREFIX};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

static PAGE_FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^{}-(\d+)\.png$", regex::escape(PAGE_PREFIX)))
        .expect("page file pattern is a valid regex")
});

/// One rendered page: 1-based number and the image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterizedPage {
    pub page_num: usize,
    pub path: PathBuf,
}

/// Renders every page of a PDF into `output_dir`.
#[async_trait]
pub trait Rasterize: Send + Sync {
    /// Returns pages in strictly ascending page order.
    async fn rasterize(
        &self,
        pdf: &Path,
        output_dir: &Path,
        dpi: u32,
    ) -> Result<Vec<RasterizedPage>, PipelineError>;
}

/// Runs one of the supported command-line rasterizers.
#[derive(Debug, Clone)]
pub struct ExternalRasterizer {
    kind: ConverterKind,
    program: PathBuf,
    timeout: Duration,
}

impl ExternalRasterizer {
    /// Detect a tool on `PATH`. Fails with `NoConverterAvailable` when none is installed.
    pub fn detect(timeout_secs: u64) -> Result<Self, PipelineError> {
        converter::detect_program()
            .map(|d| Self::with_program(d, timeout_secs))
            .ok_or(PipelineError::NoConverterAvailable)
    }

    /// Use an already-resolved tool.
    pub fn with_program(detected: DetectedConverter, timeout_secs: u64) -> Self {
        Self {
            kind: detected.kind,
            program: detected.program,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn kind(&self) -> ConverterKind {
        self.kind
    }

    fn tool_name(&self) -> String {
        self.kind.to_string()
    }
}

#[async_trait]
impl Rasterize for ExternalRasterizer {
    async fn rasterize(
        &self,
        pdf: &Path,
        output_dir: &Path,
        dpi: u32,
    ) -> Result<Vec<RasterizedPage>, PipelineError> {
        let converter = self
            .kind
            .converter()
            .ok_or(PipelineError::NoConverterAvailable)?;

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| PipelineError::io(output_dir, e))?;

        let args = converter.args(pdf, output_dir, dpi);
        debug!("Running {} {:?}", self.program.display(), args);

        let start = Instant::now();
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| PipelineError::RasterizationTimeout {
                tool: self.tool_name(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| PipelineError::RasterizationFailed {
                tool: self.tool_name(),
                code: None,
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(PipelineError::RasterizationFailed {
                tool: self.tool_name(),
                code: output.status.code(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pages = collect_pages(output_dir).await?;
        info!(
            "{} rendered {} pages at {} DPI in {}ms",
            self.kind,
            pages.len(),
            dpi,
            start.elapsed().as_millis()
        );
        Ok(pages)
    }
}

/// Page number encoded in a rasterizer output file name.
pub fn page_number(file_name: &str) -> Option<usize> {
    PAGE_FILE_RE
        .captures(file_name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// List `dir`, keep `page-<N>.png` files, sort by `N`.
pub async fn collect_pages(dir: &Path) -> Result<Vec<RasterizedPage>, PipelineError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PipelineError::io(dir, e))?;

    let mut pages = Vec::new();
    let mut skipped = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::io(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        match page_number(&name) {
            Some(page_num) => pages.push(RasterizedPage {
                page_num,
                path: entry.path(),
            }),
            None => skipped.push(name),
        }
    }

    if pages.is_empty() {
        warn!(
            "No '{}-<N>.png' files in {}; found {:?}",
            PAGE_PREFIX,
            dir.display(),
            skipped
        );
    } else if !skipped.is_empty() {
        debug!("Ignored {} non-page files: {:?}", skipped.len(), skipped);
    }

    pages.sort_by_key(|p| p.page_num);
    pages.dedup_by_key(|p| p.page_num);
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_number_accepts_any_padding() {
        assert_eq!(page_number("page-1.png"), Some(1));
        assert_eq!(page_number("page-07.png"), Some(7));
        assert_eq!(page_number("page-123.png"), Some(123));
    }

    #[test]
    fn page_number_rejects_other_names() {
        assert_eq!(page_number("page.png"), None);
        assert_eq!(page_number("page-1.jpg"), None);
        assert_eq!(page_number("cover-1.png"), None);
        assert_eq!(page_number("page-a.png"), None);
        assert_eq!(page_number("xpage-1.png"), None);
    }

    #[tokio::test]
    async fn collect_pages_sorts_numerically_and_skips_strays() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page-10.png", "page-2.png", "page-1.png", "notes.txt", "page-x.png"] {
            std::fs::write(dir.path().join(name), b"png").unwrap();
        }
        let pages = collect_pages(dir.path()).await.unwrap();
        let nums: Vec<usize> = pages.iter().map(|p| p.page_num).collect();
        assert_eq!(nums, vec![1, 2, 10]);
        assert_eq!(pages[2].path, dir.path().join("page-10.png"));
    }

    #[tokio::test]
    async fn collect_pages_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_pages(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn none_kind_fails_without_spawning() {
        let rasterizer = ExternalRasterizer::with_program(
            DetectedConverter {
                kind: ConverterKind::None,
                program: PathBuf::from("/definitely/not/here"),
            },
            5,
        );
        let dir = tempfile::tempdir().unwrap();
        let err = rasterizer
            .rasterize(Path::new("in.pdf"), &dir.path().join("out"), 150)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoConverterAvailable));
        assert!(!dir.path().join("out").exists());
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_pdftoppm_and_orders_output() {
        let bin = tempfile::tempdir().unwrap();
        // Arguments: -r <dpi> -png <pdf> <prefix>
        let program = script(
            bin.path(),
            "pdftoppm",
            r#"for n in 3 1 2; do printf png > "$5-$n.png"; done"#,
        );
        let rasterizer = ExternalRasterizer::with_program(
            DetectedConverter {
                kind: ConverterKind::Pdftoppm,
                program,
            },
            30,
        );

        let work = tempfile::tempdir().unwrap();
        let out = work.path().join("pages");
        let pages = rasterizer
            .rasterize(Path::new("doc.pdf"), &out, 150)
            .await
            .unwrap();
        assert_eq!(
            pages.iter().map(|p| p.page_num).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(pages.iter().all(|p| p.path.starts_with(&out)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_rasterization_failed() {
        let bin = tempfile::tempdir().unwrap();
        let program = script(bin.path(), "gm", "echo 'no delegate' >&2; exit 3");
        let rasterizer = ExternalRasterizer::with_program(
            DetectedConverter {
                kind: ConverterKind::GraphicsMagick,
                program,
            },
            30,
        );
        let work = tempfile::tempdir().unwrap();
        let err = rasterizer
            .rasterize(Path::new("doc.pdf"), work.path(), 150)
            .await
            .unwrap_err();
        match err {
            PipelineError::RasterizationFailed { tool, code, detail } => {
                assert_eq!(tool, "gm");
                assert_eq!(code, Some(3));
                assert!(detail.contains("no delegate"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_tool_times_out() {
        let bin = tempfile::tempdir().unwrap();
        let program = script(bin.path(), "magick", "sleep 5");
        let rasterizer = ExternalRasterizer::with_program(
            DetectedConverter {
                kind: ConverterKind::ImageMagick,
                program,
            },
            1,
        );
        let work = tempfile::tempdir().unwrap();
        let err = rasterizer
            .rasterize(Path::new("doc.pdf"), work.path(), 150)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RasterizationTimeout { secs: 1, .. }
        ));
    }
}
