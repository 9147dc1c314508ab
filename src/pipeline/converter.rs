//! External rasterizer detection and per-tool argument building.
//!
//! Three tools are supported, probed in this order:
//!
//! | Kind             | Executable | Package          |
//! |------------------|------------|------------------|
//! | `Pdftoppm`       | `pdftoppm` | poppler-utils    |
//! | `ImageMagick`    | `magick`   | ImageMagick 7    |
//! | `GraphicsMagick` | `gm`       | GraphicsMagick   |
//!
//! The two Magick tools delegate to Ghostscript and can emit transparent
//! backgrounds; their invocations flatten onto white.
//!
//! Probing only resolves executables on `PATH`; nothing is spawned.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Output file-name prefix every converter writes to.
pub const PAGE_PREFIX: &str = "page";

/// Which rasterizer is available on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    Pdftoppm,
    ImageMagick,
    GraphicsMagick,
    None,
}

impl ConverterKind {
    /// Probe order.
    pub const PRIORITY: [ConverterKind; 3] = [
        ConverterKind::Pdftoppm,
        ConverterKind::ImageMagick,
        ConverterKind::GraphicsMagick,
    ];

    /// Executable name looked up on `PATH`.
    pub fn executable(self) -> Option<&'static str> {
        match self {
            Self::Pdftoppm => Some("pdftoppm"),
            Self::ImageMagick => Some("magick"),
            Self::GraphicsMagick => Some("gm"),
            Self::None => None,
        }
    }

    /// Strategy implementing this kind, if any.
    pub fn converter(self) -> Option<&'static dyn PageConverter> {
        match self {
            Self::Pdftoppm => Some(&Pdftoppm),
            Self::ImageMagick => Some(&ImageMagick),
            Self::GraphicsMagick => Some(&GraphicsMagick),
            Self::None => None,
        }
    }
}

impl fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable().unwrap_or("none"))
    }
}

/// A detected tool: its kind and the resolved executable path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedConverter {
    pub kind: ConverterKind,
    pub program: PathBuf,
}

/// Detect a rasterizer on the process `PATH`.
pub fn detect() -> ConverterKind {
    detect_program().map_or(ConverterKind::None, |d| d.kind)
}

/// Like [`detect`], also returning the resolved executable path.
pub fn detect_program() -> Option<DetectedConverter> {
    probe(|name| which::which(name).ok())
}

/// Detect a rasterizer against an explicit search path (`PATH` syntax).
pub fn detect_in(search_path: impl Into<OsString>) -> Option<DetectedConverter> {
    let search_path = search_path.into();
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    probe(|name| which::which_in(name, Some(&search_path), &cwd).ok())
}

fn probe(resolve: impl Fn(&str) -> Option<PathBuf>) -> Option<DetectedConverter> {
    for kind in ConverterKind::PRIORITY {
        let Some(name) = kind.executable() else {
            continue;
        };
        if let Some(program) = resolve(name) {
            debug!("Rasterizer detected: {} at {}", kind, program.display());
            return Some(DetectedConverter { kind, program });
        }
        debug!("Rasterizer '{}' not found", name);
    }
    None
}

/// Builds the command line for one rasterization tool.
///
/// Every implementation must write `<output_dir>/page-<N>.png`, one file per
/// page, with `N` counting from 1 (zero padding is allowed).
pub trait PageConverter: Send + Sync {
    fn kind(&self) -> ConverterKind;

    fn args(&self, pdf: &Path, output_dir: &Path, dpi: u32) -> Vec<OsString>;
}

/// poppler's `pdftoppm -r <dpi> -png <pdf> <dir>/page`.
pub struct Pdftoppm;

impl PageConverter for Pdftoppm {
    fn kind(&self) -> ConverterKind {
        ConverterKind::Pdftoppm
    }

    fn args(&self, pdf: &Path, output_dir: &Path, dpi: u32) -> Vec<OsString> {
        vec![
            "-r".into(),
            dpi.to_string().into(),
            "-png".into(),
            pdf.into(),
            output_dir.join(PAGE_PREFIX).into(),
        ]
    }
}

/// ImageMagick 7: `magick -density <dpi> <pdf> -background white -alpha remove …`.
pub struct ImageMagick;

impl PageConverter for ImageMagick {
    fn kind(&self) -> ConverterKind {
        ConverterKind::ImageMagick
    }

    fn args(&self, pdf: &Path, output_dir: &Path, dpi: u32) -> Vec<OsString> {
        vec![
            "-density".into(),
            dpi.to_string().into(),
            pdf.into(),
            "-background".into(),
            "white".into(),
            "-alpha".into(),
            "remove".into(),
            "-alpha".into(),
            "off".into(),
            "-scene".into(),
            "1".into(),
            output_pattern(output_dir),
        ]
    }
}

/// GraphicsMagick: `gm convert -density <dpi> <pdf> -background white +matte …`.
pub struct GraphicsMagick;

impl PageConverter for GraphicsMagick {
    fn kind(&self) -> ConverterKind {
        ConverterKind::GraphicsMagick
    }

    fn args(&self, pdf: &Path, output_dir: &Path, dpi: u32) -> Vec<OsString> {
        vec![
            "convert".into(),
            "-density".into(),
            dpi.to_string().into(),
            pdf.into(),
            "-background".into(),
            "white".into(),
            "+matte".into(),
            "+adjoin".into(),
            "-scene".into(),
            "1".into(),
            output_pattern(output_dir),
        ]
    }
}

fn output_pattern(output_dir: &Path) -> OsString {
    output_dir.join(format!("{PAGE_PREFIX}-%d.png")).into()
}
