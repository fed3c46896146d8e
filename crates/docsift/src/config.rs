//! Configuration for the document pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::MIN_SUMMARY_LENGTH;
use crate::types::MAX_SUMMARY_LENGTH;

/// Environment variable naming a TOML config file
pub const CONFIG_PATH_ENV: &str = "DOCSIFT_CONFIG";

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Job queue configuration
    pub queue: QueueConfig,
    /// Extraction engine configuration
    pub extraction: ExtractionConfig,
    /// Temp files and memory
    pub resources: ResourceConfig,
    /// Summary defaults
    pub summary: SummaryConfig,
    /// Graceful shutdown
    pub shutdown: ShutdownConfig,
}

impl PipelineConfig {
    /// Load configuration: file named by `DOCSIFT_CONFIG` (if set), then env overrides,
    /// then validation.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing sections and fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&raw)
    }

    /// Parse TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Apply the handful of supported environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("DOCSIFT_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("DOCSIFT_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("DOCSIFT_PORT is not a port: {}", port)))?;
        }
        if let Ok(jobs) = std::env::var("DOCSIFT_MAX_CONCURRENT_JOBS") {
            self.queue.max_concurrent_jobs = jobs.parse().map_err(|_| {
                Error::Config(format!("DOCSIFT_MAX_CONCURRENT_JOBS is not a number: {}", jobs))
            })?;
        }
        if let Ok(dir) = std::env::var("DOCSIFT_TEMP_DIR") {
            self.resources.temp_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Check numeric ranges
    pub fn validate(&self) -> Result<()> {
        fn at_least_one(name: &str, value: usize) -> Result<()> {
            if value == 0 {
                return Err(Error::Config(format!("{} must be at least 1", name)));
            }
            Ok(())
        }

        at_least_one("queue.max_concurrent_jobs", self.queue.max_concurrent_jobs)?;
        at_least_one("extraction.conversion_concurrency", self.extraction.conversion_concurrency)?;
        at_least_one("extraction.ocr_concurrency", self.extraction.ocr_concurrency)?;
        at_least_one("extraction.max_pages", self.extraction.max_pages as usize)?;
        at_least_one("resources.sweep_batch_size", self.resources.sweep_batch_size)?;
        at_least_one("resources.max_artifacts", self.resources.max_artifacts)?;
        at_least_one("extraction.parse_timeout_secs", self.extraction.parse_timeout_secs as usize)?;
        at_least_one("extraction.conversion_timeout_secs", self.extraction.conversion_timeout_secs as usize)?;
        at_least_one("extraction.ocr_timeout_secs", self.extraction.ocr_timeout_secs as usize)?;
        at_least_one("shutdown.timeout_secs", self.shutdown.timeout_secs as usize)?;

        if self.extraction.min_page_chars == 0 && self.extraction.min_page_words == 0 {
            return Err(Error::Config(
                "extraction.min_page_chars and extraction.min_page_words cannot both be 0".to_string(),
            ));
        }
        if !(36..=600).contains(&self.extraction.render_dpi) {
            return Err(Error::Config(format!(
                "extraction.render_dpi must be between 36 and 600, got {}",
                self.extraction.render_dpi
            )));
        }

        let r = &self.resources;
        if !(r.memory_warning_ratio > 0.0
            && r.memory_warning_ratio < r.memory_critical_ratio
            && r.memory_critical_ratio <= 1.0)
        {
            return Err(Error::Config(format!(
                "memory ratios must satisfy 0 < warning ({}) < critical ({}) <= 1",
                r.memory_warning_ratio, r.memory_critical_ratio
            )));
        }

        if !(MIN_SUMMARY_LENGTH..=MAX_SUMMARY_LENGTH).contains(&self.summary.default_max_length) {
            return Err(Error::Config(format!(
                "summary.default_max_length must be between {} and {}",
                MIN_SUMMARY_LENGTH, MAX_SUMMARY_LENGTH
            )));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 50MB)
    pub max_upload_size: usize,
    /// Where uploads are written before processing (default: <temp_dir>/uploads)
    pub upload_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 50 * 1024 * 1024, // 50MB
            upload_dir: None,
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Jobs running at once; the rest wait in FIFO order
    pub max_concurrent_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_concurrent_jobs: 10 }
    }
}

/// Extraction engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Simultaneous page-image conversions
    pub conversion_concurrency: usize,
    /// Simultaneous OCR operations
    pub ocr_concurrency: usize,
    /// Pages converted in the fallback cascade
    pub max_pages: u32,
    /// Non-whitespace chars that make a page text-bearing
    pub min_page_chars: usize,
    /// Words that make a page text-bearing
    pub min_page_words: usize,
    /// Rasterization resolution
    pub render_dpi: u32,
    /// Tesseract language
    pub ocr_language: String,
    /// Timeout for the direct PDF parse
    pub parse_timeout_secs: u64,
    /// Timeout per page conversion
    pub conversion_timeout_secs: u64,
    /// Timeout per OCR call
    pub ocr_timeout_secs: u64,
    /// Keep sparse direct text when the cascade fails entirely
    pub accept_sparse_text: bool,
    /// How long a dependency probe stays valid
    pub dependency_cache_secs: u64,
    /// Toolchain program names
    pub programs: ProgramNames,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            conversion_concurrency: 3,
            ocr_concurrency: num_cpus::get().min(8),
            max_pages: 10,
            min_page_chars: 50,
            min_page_words: 10,
            render_dpi: 150, // good balance of quality and speed
            ocr_language: "eng".to_string(),
            parse_timeout_secs: 60,
            conversion_timeout_secs: 120,
            ocr_timeout_secs: 120,
            accept_sparse_text: false,
            dependency_cache_secs: 60,
            programs: ProgramNames::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn parse_timeout(&self) -> Duration {
        Duration::from_secs(self.parse_timeout_secs)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }
}

/// External program names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramNames {
    pub pdftoppm: String,
    pub graphicsmagick: String,
    pub imagemagick: String,
    pub tesseract: String,
}

impl Default for ProgramNames {
    fn default() -> Self {
        Self {
            pdftoppm: "pdftoppm".to_string(),
            graphicsmagick: "gm".to_string(),
            imagemagick: "magick".to_string(),
            tesseract: "tesseract".to_string(),
        }
    }
}

/// Temp artifact and memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Root for per-session temp directories
    pub temp_dir: PathBuf,
    /// Artifacts older than this are swept
    pub artifact_ttl_secs: u64,
    /// Sweep trims down to this many artifacts
    pub max_artifacts: usize,
    /// Sweep trims down to this many bytes
    pub max_total_bytes: u64,
    /// Background sweep period
    pub sweep_interval_secs: u64,
    /// Deletions per batch
    pub sweep_batch_size: usize,
    /// Delay before a finished session's artifacts are removed
    pub cleanup_delay_secs: u64,
    /// Size of each pooled buffer
    pub buffer_size: usize,
    /// Buffers reserved per conversion session
    pub buffers_per_session: usize,
    /// Free-pool capacity
    pub max_pooled_buffers: usize,
    /// Memory budget for pressure checks (0 = total system memory)
    pub memory_limit_bytes: u64,
    pub memory_warning_ratio: f64,
    pub memory_critical_ratio: f64,
    /// Memory monitor period
    pub memory_check_interval_secs: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        let temp_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("docsift");

        Self {
            temp_dir,
            artifact_ttl_secs: 3600,
            max_artifacts: 500,
            max_total_bytes: 1024 * 1024 * 1024, // 1GB
            sweep_interval_secs: 300,
            sweep_batch_size: 50,
            cleanup_delay_secs: 5,
            buffer_size: 4 * 1024 * 1024, // 4MB
            buffers_per_session: 4,
            max_pooled_buffers: 16,
            memory_limit_bytes: 0,
            memory_warning_ratio: 0.75,
            memory_critical_ratio: 0.90,
            memory_check_interval_secs: 30,
        }
    }
}

impl ResourceConfig {
    pub fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn memory_check_interval(&self) -> Duration {
        Duration::from_secs(self.memory_check_interval_secs.max(1))
    }
}

/// Summary defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Used when a request does not name a length
    pub default_max_length: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { default_max_length: 200 }
    }
}

/// Graceful shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Budget for all shutdown hooks together
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
