//! Health scoring and monitoring snapshots

mod health;

pub use health::{
    score, HealthComponents, HealthInputs, HealthReport, HealthStatus, SubScore, IO_THRESHOLD,
    MEMORY_THRESHOLD, POOL_THRESHOLD, QUEUE_THRESHOLD,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::extraction::{ConcurrencyStats, PoolStats, QueueInfo};
use crate::orchestrator::ProcessingOrchestrator;
use crate::processing::QueueStats;
use crate::resources::{IoStats, MemorySample, MemoryStats};
use crate::tasks::TaskCounts;

/// Everything the monitoring endpoint reports
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSnapshot {
    pub health: HealthReport,
    pub pool: PoolStats,
    pub concurrency: ConcurrencyStats,
    pub extraction_queue: QueueInfo,
    pub jobs: QueueStats,
    pub io: IoStats,
    pub memory: MemoryStats,
    pub memory_sample: MemorySample,
    pub tasks: TaskCounts,
    pub accepting: bool,
    pub timestamp: DateTime<Utc>,
}

/// Reads the orchestrator's components and scores them
#[derive(Clone)]
pub struct HealthMonitor {
    orchestrator: Arc<ProcessingOrchestrator>,
}

impl HealthMonitor {
    pub fn new(orchestrator: Arc<ProcessingOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Latest memory reading. Falls back to a fresh sample before the monitor's first tick.
    fn memory_sample(&self) -> MemorySample {
        let memory = self.orchestrator.resources().memory();
        memory.last_sample().unwrap_or_else(|| memory.sample())
    }

    fn inputs(&self, memory: &MemorySample) -> HealthInputs {
        HealthInputs {
            memory_ratio: memory.ratio,
            queue: self.orchestrator.queue_stats(),
            pool_utilization: self.orchestrator.engine().pool_stats().utilization,
            io: self.orchestrator.resources().temp_files().io_stats(),
        }
    }

    pub fn report(&self) -> HealthReport {
        let memory = self.memory_sample();
        let report = score(&self.inputs(&memory));
        if report.status != HealthStatus::Healthy {
            tracing::warn!(
                "Health {:?} ({:.1}): memory {:.0}, queue {:.0}, pool {:.0}, io {:.0}",
                report.status,
                report.score,
                report.components.memory.score,
                report.components.queue.score,
                report.components.extraction_pool.score,
                report.components.io.score
            );
        }
        report
    }

    pub fn snapshot(&self) -> MonitoringSnapshot {
        let memory_sample = self.memory_sample();
        let inputs = self.inputs(&memory_sample);
        let engine = self.orchestrator.engine();
        let resources = self.orchestrator.resources();

        MonitoringSnapshot {
            health: score(&inputs),
            pool: engine.pool_stats(),
            concurrency: engine.concurrency_stats(),
            extraction_queue: engine.queue_info(),
            jobs: inputs.queue,
            io: inputs.io,
            memory: resources.memory().memory_stats(),
            memory_sample,
            tasks: self.orchestrator.tasks().counts(),
            accepting: self.orchestrator.is_accepting(),
            timestamp: Utc::now(),
        }
    }
}
