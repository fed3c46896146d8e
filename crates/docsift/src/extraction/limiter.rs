//! Concurrency limiter for conversion and OCR slots
//!
//! A thin wrapper over tokio's semaphore, which queues waiters FIFO, plus the
//! counters the monitoring surface reads.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Snapshot of one limiter
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStats {
    pub current: usize,
    pub limit: usize,
    pub waiting: usize,
    pub peak: usize,
}

struct Counters {
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Clone)]
pub struct Limiter {
    name: &'static str,
    limit: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl Limiter {
    pub fn new(name: &'static str, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            name,
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            counters: Arc::new(Counters {
                in_flight: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for a slot. The slot is held until the returned permit is dropped.
    pub async fn acquire(&self) -> Result<LimiterPermit> {
        self.counters.waiting.fetch_add(1, Ordering::SeqCst);
        let acquired = Arc::clone(&self.semaphore).acquire_owned().await;
        self.counters.waiting.fetch_sub(1, Ordering::SeqCst);

        let permit = acquired.map_err(|_| Error::internal(format!("{} limiter closed", self.name)))?;
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);

        Ok(LimiterPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Stop handing out slots; pending and future `acquire` calls fail
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            current: self.counters.in_flight.load(Ordering::SeqCst),
            limit: self.limit,
            waiting: self.counters.waiting.load(Ordering::SeqCst),
            peak: self.counters.peak.load(Ordering::SeqCst),
        }
    }

    /// Busy slots as a percentage of the limit
    pub fn utilization(&self) -> f64 {
        self.counters.in_flight.load(Ordering::SeqCst) as f64 / self.limit as f64 * 100.0
    }
}

/// A held limiter slot
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
