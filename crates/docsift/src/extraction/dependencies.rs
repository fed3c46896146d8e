//! Host toolchain detection for page conversion and OCR

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::config::ExtractionConfig;
use crate::types::SystemDependencies;

/// How long a single `--version` probe may take
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tool used to rasterize PDF pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionBackend {
    /// poppler `pdftoppm`
    Pdftoppm,
    /// GraphicsMagick `gm convert`
    GraphicsMagick,
    /// ImageMagick `magick`
    ImageMagick,
}

impl std::fmt::Display for ConversionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionBackend::Pdftoppm => write!(f, "pdftoppm"),
            ConversionBackend::GraphicsMagick => write!(f, "graphicsmagick"),
            ConversionBackend::ImageMagick => write!(f, "imagemagick"),
        }
    }
}

/// Result of probing the host
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    pub graphics_lib: bool,
    pub image_lib: bool,
    pub converter: bool,
    pub ocr: bool,
    pub checked_at: DateTime<Utc>,
}

impl DependencyReport {
    pub fn new(graphics_lib: bool, image_lib: bool, converter: bool, ocr: bool) -> Self {
        Self {
            graphics_lib,
            image_lib,
            converter,
            ocr,
            checked_at: Utc::now(),
        }
    }

    /// Snapshot recorded in result metadata
    pub fn system_dependencies(&self) -> SystemDependencies {
        SystemDependencies {
            graphics_lib: self.graphics_lib,
            image_lib: self.image_lib,
            converter: self.converter,
        }
    }

    /// First available backend: pdftoppm, then GraphicsMagick, then ImageMagick
    pub fn preferred_backend(&self) -> Option<ConversionBackend> {
        if self.converter {
            Some(ConversionBackend::Pdftoppm)
        } else if self.graphics_lib {
            Some(ConversionBackend::GraphicsMagick)
        } else if self.image_lib {
            Some(ConversionBackend::ImageMagick)
        } else {
            None
        }
    }

    /// Conversion needs a rasterizer and an OCR engine
    pub fn conversion_supported(&self) -> bool {
        self.preferred_backend().is_some() && self.ocr
    }

    /// Names what is missing, or `None` when conversion is supported
    pub fn missing_message(&self) -> Option<String> {
        let mut missing = Vec::new();
        if self.preferred_backend().is_none() {
            missing.push(
                "no PDF page converter found (install poppler-utils for pdftoppm, GraphicsMagick, or ImageMagick)",
            );
        }
        if !self.ocr {
            missing.push("tesseract not found (install tesseract-ocr)");
        }

        if missing.is_empty() {
            None
        } else {
            Some(missing.join("; "))
        }
    }
}

struct CachedReport {
    report: DependencyReport,
    at: Instant,
}

/// Detects and caches toolchain availability
pub struct DependencyDetector {
    programs: crate::config::ProgramNames,
    cache_ttl: Duration,
    cached: RwLock<Option<CachedReport>>,
    pinned: bool,
}

impl DependencyDetector {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            programs: config.programs.clone(),
            cache_ttl: Duration::from_secs(config.dependency_cache_secs),
            cached: RwLock::new(None),
            pinned: false,
        }
    }

    /// A detector that always answers with `report` and never probes
    pub fn pinned(report: DependencyReport) -> Self {
        Self {
            programs: crate::config::ProgramNames::default(),
            cache_ttl: Duration::MAX,
            cached: RwLock::new(Some(CachedReport {
                report,
                at: Instant::now(),
            })),
            pinned: true,
        }
    }

    /// Probe the host, or answer from cache while it is fresh
    pub async fn check_system_dependencies(&self) -> DependencyReport {
        if let Some(report) = self.fresh() {
            return report;
        }

        let (converter, graphics_lib, image_lib, ocr) = tokio::join!(
            probe(&self.programs.pdftoppm, &["-v"]),
            probe(&self.programs.graphicsmagick, &["version"]),
            probe(&self.programs.imagemagick, &["-version"]),
            probe(&self.programs.tesseract, &["--version"]),
        );
        let report = DependencyReport::new(graphics_lib, image_lib, converter, ocr);

        match report.missing_message() {
            None => tracing::info!(
                "Conversion toolchain available: backend={:?}, tesseract={}",
                report.preferred_backend(),
                report.ocr
            ),
            Some(missing) => tracing::warn!("Conversion toolchain incomplete: {}", missing),
        }

        *self.cached.write() = Some(CachedReport {
            report: report.clone(),
            at: Instant::now(),
        });
        report
    }

    pub async fn is_conversion_supported(&self) -> bool {
        self.check_system_dependencies().await.conversion_supported()
    }

    /// Last known report without probing
    pub fn snapshot(&self) -> Option<DependencyReport> {
        self.cached.read().as_ref().map(|c| c.report.clone())
    }

    fn fresh(&self) -> Option<DependencyReport> {
        let cached = self.cached.read();
        let entry = cached.as_ref()?;
        if self.pinned || entry.at.elapsed() < self.cache_ttl {
            Some(entry.report.clone())
        } else {
            None
        }
    }
}

/// A tool counts as available if it can be started and exits within the probe
/// timeout. `pdftoppm -v` exits non-zero on some poppler builds, so the exit code
/// is not checked.
async fn probe(program: &str, args: &[&str]) -> bool {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!("{} unavailable: {}", program, e);
            return false;
        }
    };

    match tokio::time::timeout(PROBE_TIMEOUT, child.wait()).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!("{} probe failed: {}", program, e);
            false
        }
        Err(_) => {
            tracing::warn!("{} probe timed out after {}s", program, PROBE_TIMEOUT.as_secs());
            false
        }
    }
}
