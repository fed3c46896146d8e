//! Composite health score
//!
//! Four sub-scores (memory, queue, extraction pool, I/O), each 100 up to its
//! utilization threshold and 2 points lower per percentage point beyond it.
//! The overall score is their mean.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::processing::QueueStats;
use crate::resources::IoStats;

/// Utilization thresholds in percent
pub const MEMORY_THRESHOLD: f64 = 75.0;
pub const QUEUE_THRESHOLD: f64 = 80.0;
pub const POOL_THRESHOLD: f64 = 85.0;
pub const IO_THRESHOLD: f64 = 80.0;

/// Points lost per percentage point over threshold
const PENALTY_PER_POINT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score > 80.0 {
            HealthStatus::Healthy
        } else if score > 60.0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubScore {
    pub score: f64,
    /// Percent
    pub utilization: f64,
    pub threshold: f64,
}

impl SubScore {
    pub fn new(utilization: f64, threshold: f64) -> Self {
        let score = if utilization <= threshold {
            100.0
        } else {
            (100.0 - (utilization - threshold) * PENALTY_PER_POINT).max(0.0)
        };
        Self {
            score,
            utilization,
            threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthComponents {
    pub memory: SubScore,
    pub queue: SubScore,
    pub extraction_pool: SubScore,
    pub io: SubScore,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub score: f64,
    pub components: HealthComponents,
    pub timestamp: DateTime<Utc>,
}

/// Raw readings the score is computed from
#[derive(Debug, Clone)]
pub struct HealthInputs {
    /// 0.0-1.0
    pub memory_ratio: f64,
    pub queue: QueueStats,
    /// Percent, the busier extraction limiter
    pub pool_utilization: f64,
    pub io: IoStats,
}

pub fn score(inputs: &HealthInputs) -> HealthReport {
    let queue_utilization = if inputs.queue.max_concurrent_jobs == 0 {
        0.0
    } else {
        (inputs.queue.active + inputs.queue.waiting) as f64 / inputs.queue.max_concurrent_jobs as f64
            * 100.0
    };

    let components = HealthComponents {
        memory: SubScore::new(inputs.memory_ratio * 100.0, MEMORY_THRESHOLD),
        queue: SubScore::new(queue_utilization, QUEUE_THRESHOLD),
        extraction_pool: SubScore::new(inputs.pool_utilization, POOL_THRESHOLD),
        io: SubScore::new(io_utilization(&inputs.io), IO_THRESHOLD),
    };

    let score = (components.memory.score
        + components.queue.score
        + components.extraction_pool.score
        + components.io.score)
        / 4.0;

    HealthReport {
        status: HealthStatus::from_score(score),
        score,
        components,
        timestamp: Utc::now(),
    }
}

/// Worst of artifact count, artifact bytes and delete failure rate, in percent
fn io_utilization(io: &IoStats) -> f64 {
    let ratio = |used: f64, max: f64| if max > 0.0 { used / max } else { 0.0 };

    let count = ratio(io.active_artifacts as f64, io.max_artifacts as f64);
    let bytes = ratio(io.active_bytes as f64, io.max_bytes as f64);
    let failures = ratio(
        io.delete_failures as f64,
        (io.files_deleted + io.delete_failures) as f64,
    );

    count.max(bytes).max(failures) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> HealthInputs {
        HealthInputs {
            memory_ratio: 0.4,
            queue: QueueStats {
                waiting: 0,
                active: 2,
                completed: 10,
                failed: 1,
                max_concurrent_jobs: 10,
            },
            pool_utilization: 33.0,
            io: IoStats {
                active_artifacts: 10,
                max_artifacts: 500,
                max_bytes: 1000,
                ..IoStats::default()
            },
        }
    }

    #[test]
    fn test_sub_score_penalty() {
        assert_eq!(SubScore::new(50.0, 75.0).score, 100.0);
        assert_eq!(SubScore::new(75.0, 75.0).score, 100.0);
        assert_eq!(SubScore::new(85.0, 75.0).score, 80.0);
        assert_eq!(SubScore::new(200.0, 80.0).score, 0.0);
    }

    #[test]
    fn test_idle_system_is_healthy() {
        let report = score(&inputs());
        assert_eq!(report.score, 100.0);
        assert_eq!(report.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_backlog_degrades_queue_score() {
        let mut i = inputs();
        i.queue.active = 10;
        i.queue.waiting = 5;
        let report = score(&i);
        // 150% utilization: 100 - 70 * 2 => 0
        assert_eq!(report.components.queue.score, 0.0);
        assert_eq!(report.score, 75.0);
        assert_eq!(report.status, HealthStatus::Warning);
    }

    #[test]
    fn test_bands() {
        assert_eq!(HealthStatus::from_score(80.1), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(80.0), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(60.0), HealthStatus::Critical);
    }

    #[test]
    fn test_delete_failures_count_as_io_pressure() {
        let mut i = inputs();
        i.io.files_deleted = 1;
        i.io.delete_failures = 9;
        let report = score(&i);
        assert_eq!(report.components.io.utilization, 90.0);
        assert_eq!(report.components.io.score, 80.0);
    }
}
