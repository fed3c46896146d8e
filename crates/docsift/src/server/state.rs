//! Application state for the docsift server

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::monitoring::HealthMonitor;
use crate::orchestrator::ProcessingOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: PipelineConfig,
    /// Pipeline entry point
    orchestrator: Arc<ProcessingOrchestrator>,
    /// Health scoring over the orchestrator
    monitor: HealthMonitor,
    /// Where uploaded files are written
    upload_dir: PathBuf,
    /// Ready state
    ready: RwLock<bool>,
}

impl AppState {
    pub fn new(config: PipelineConfig, orchestrator: Arc<ProcessingOrchestrator>) -> Self {
        let upload_dir = config
            .server
            .upload_dir
            .clone()
            .unwrap_or_else(|| config.resources.temp_dir.join("uploads"));
        let monitor = HealthMonitor::new(Arc::clone(&orchestrator));

        Self {
            inner: Arc::new(AppStateInner {
                config,
                orchestrator,
                monitor,
                upload_dir,
                ready: RwLock::new(true),
            }),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn orchestrator(&self) -> &Arc<ProcessingOrchestrator> {
        &self.inner.orchestrator
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.inner.monitor
    }

    pub fn upload_dir(&self) -> &Path {
        &self.inner.upload_dir
    }

    /// Ready to take uploads: not flagged down and the pipeline still accepts work
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read() && self.inner.orchestrator.is_accepting()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}
