//! Resource guard: temp artifacts and memory

mod memory;
mod temp_files;

pub use memory::{
    classify_pressure, ConversionReservation, MemoryOptimizer, MemoryPressure, MemorySample, MemoryStats,
};
pub use temp_files::{ArtifactKind, IoStats, SweepReport, TempArtifact, TempFileRegistry};

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ResourceConfig;

/// Owns the temp artifact registry and the memory optimizer
pub struct ResourceGuard {
    temp_files: Arc<TempFileRegistry>,
    memory: Arc<MemoryOptimizer>,
    config: ResourceConfig,
}

impl ResourceGuard {
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            temp_files: Arc::new(TempFileRegistry::new(config)),
            memory: Arc::new(MemoryOptimizer::new(config)),
            config: config.clone(),
        }
    }

    pub fn temp_files(&self) -> &Arc<TempFileRegistry> {
        &self.temp_files
    }

    pub fn memory(&self) -> &Arc<MemoryOptimizer> {
        &self.memory
    }

    /// Start the periodic sweeper and memory monitor
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            Arc::clone(&self.temp_files).spawn_sweeper(self.config.sweep_interval(), cancel.child_token()),
            Arc::clone(&self.memory).spawn_monitor(self.config.memory_check_interval(), cancel.child_token()),
        ]
    }

    /// Final cleanup at shutdown: drop everything still registered
    pub async fn shutdown(&self) -> SweepReport {
        for artifact_id in self.temp_files.artifact_ids() {
            self.temp_files.schedule_cleanup(artifact_id);
        }
        self.memory.relieve(MemoryPressure::Critical);
        self.temp_files.sweep().await
    }
}
