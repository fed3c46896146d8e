//! Memory optimizer
//!
//! Keeps a pool of reusable I/O buffers. A conversion session reserves a few
//! buffers up front and hands them back when it finishes. The pool shrinks under
//! memory pressure.

use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ResourceConfig;

/// Memory pressure level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressure {
    Normal,
    Warning,
    Critical,
}

/// Classify a usage ratio against the warning and critical thresholds
pub fn classify_pressure(ratio: f64, warning: f64, critical: f64) -> MemoryPressure {
    if ratio >= critical {
        MemoryPressure::Critical
    } else if ratio >= warning {
        MemoryPressure::Warning
    } else {
        MemoryPressure::Normal
    }
}

/// Point-in-time memory reading
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub pooled_buffers: usize,
    pub max_pooled_buffers: usize,
    pub buffer_size: usize,
    pub active_sessions: usize,
    pub reserved_buffers: usize,
    pub reservations: u64,
    pub releases: u64,
    pub relief_events: u64,
    pub pressure: MemoryPressure,
    pub sample: Option<MemorySample>,
}

pub struct MemoryOptimizer {
    buffer_size: usize,
    buffers_per_session: usize,
    max_pooled: usize,
    limit_bytes: u64,
    warning_ratio: f64,
    critical_ratio: f64,
    pool: Mutex<Vec<BytesMut>>,
    sessions: DashMap<String, Vec<BytesMut>>,
    system: Mutex<System>,
    pid: Option<Pid>,
    last_sample: Mutex<Option<MemorySample>>,
    reservations: AtomicU64,
    releases: AtomicU64,
    relief_events: AtomicU64,
}

impl MemoryOptimizer {
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.max(1),
            buffers_per_session: config.buffers_per_session,
            max_pooled: config.max_pooled_buffers,
            limit_bytes: config.memory_limit_bytes,
            warning_ratio: config.memory_warning_ratio,
            critical_ratio: config.memory_critical_ratio,
            pool: Mutex::new(Vec::new()),
            sessions: DashMap::new(),
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            last_sample: Mutex::new(None),
            reservations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            relief_events: AtomicU64::new(0),
        }
    }

    /// Reserve buffers for a conversion session. Dropping the reservation
    /// releases them back to the pool.
    pub fn optimize_for_conversion(self: &Arc<Self>, session_id: &str) -> ConversionReservation {
        let reserved: Vec<BytesMut> = {
            let mut pool = self.pool.lock();
            (0..self.buffers_per_session)
                .map(|_| pool.pop().unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size)))
                .collect()
        };

        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .extend(reserved);
        self.reservations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[{}] Reserved conversion buffers", session_id);

        ConversionReservation {
            optimizer: Arc::clone(self),
            session_id: session_id.to_string(),
        }
    }

    /// Return a session's buffers to the pool. Returns how many were released.
    pub fn optimize_after_conversion(&self, session_id: &str) -> usize {
        let Some((_, buffers)) = self.sessions.remove(session_id) else {
            return 0;
        };
        let released = buffers.len();

        let mut pool = self.pool.lock();
        for mut buffer in buffers {
            if pool.len() >= self.max_pooled {
                break;
            }
            buffer.clear();
            pool.push(buffer);
        }
        drop(pool);

        self.releases.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[{}] Released {} conversion buffers", session_id, released);
        released
    }

    /// Take a buffer from the session's reservation, or a fresh one
    pub fn checkout(&self, session_id: &str) -> BytesMut {
        self.sessions
            .get_mut(session_id)
            .and_then(|mut buffers| buffers.pop())
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size))
    }

    /// Give a buffer back to the session. Dropped if the session is gone.
    pub fn checkin(&self, session_id: &str, mut buffer: BytesMut) {
        buffer.clear();
        if let Some(mut buffers) = self.sessions.get_mut(session_id) {
            buffers.push(buffer);
        }
    }

    /// Shrink the free pool according to the pressure level. Returns buffers freed.
    pub fn relieve(&self, level: MemoryPressure) -> usize {
        let mut pool = self.pool.lock();
        let before = pool.len();
        match level {
            MemoryPressure::Normal => return 0,
            MemoryPressure::Warning => pool.truncate(before / 2),
            MemoryPressure::Critical => pool.clear(),
        }
        pool.shrink_to_fit();
        let freed = before - pool.len();
        drop(pool);

        if freed > 0 {
            self.relief_events.fetch_add(1, Ordering::Relaxed);
        }
        freed
    }

    /// Read current usage. Uses this process's resident memory against the configured
    /// limit, or system memory when no limit is set.
    pub fn sample(&self) -> MemorySample {
        let mut system = self.system.lock();
        system.refresh_memory();

        let (used_bytes, limit_bytes) = if self.limit_bytes > 0 {
            let used = match self.pid {
                Some(pid) => {
                    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
                    system.process(pid).map(|p| p.memory()).unwrap_or(0)
                }
                None => system.used_memory(),
            };
            (used, self.limit_bytes)
        } else {
            (system.used_memory(), system.total_memory())
        };
        drop(system);

        let ratio = if limit_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / limit_bytes as f64
        };
        let sample = MemorySample {
            used_bytes,
            limit_bytes,
            ratio,
        };
        *self.last_sample.lock() = Some(sample);
        sample
    }

    pub fn classify(&self, ratio: f64) -> MemoryPressure {
        classify_pressure(ratio, self.warning_ratio, self.critical_ratio)
    }

    /// Sample, classify and relieve in one step
    pub fn check_memory_pressure(&self) -> MemoryPressure {
        let sample = self.sample();
        let level = self.classify(sample.ratio);
        if level != MemoryPressure::Normal {
            let freed = self.relieve(level);
            tracing::warn!(
                "Memory pressure {:?}: {:.0}% used, freed {} pooled buffers",
                level,
                sample.ratio * 100.0,
                freed
            );
        }
        level
    }

    pub fn spawn_monitor(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let optimizer = Arc::clone(&self);
                        // sysinfo refreshes read /proc synchronously
                        if let Err(e) = tokio::task::spawn_blocking(move || optimizer.check_memory_pressure()).await {
                            tracing::error!("Memory check failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("Memory monitor stopped");
        })
    }

    pub fn last_sample(&self) -> Option<MemorySample> {
        *self.last_sample.lock()
    }

    pub fn pooled_buffers(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let sample = self.last_sample();
        MemoryStats {
            pooled_buffers: self.pooled_buffers(),
            max_pooled_buffers: self.max_pooled,
            buffer_size: self.buffer_size,
            active_sessions: self.sessions.len(),
            reserved_buffers: self.sessions.iter().map(|s| s.len()).sum(),
            reservations: self.reservations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            relief_events: self.relief_events.load(Ordering::Relaxed),
            pressure: sample
                .map(|s| self.classify(s.ratio))
                .unwrap_or(MemoryPressure::Normal),
            sample,
        }
    }
}

/// Buffers held for one conversion session
pub struct ConversionReservation {
    optimizer: Arc<MemoryOptimizer>,
    session_id: String,
}

impl ConversionReservation {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn checkout(&self) -> BytesMut {
        self.optimizer.checkout(&self.session_id)
    }

    pub fn checkin(&self, buffer: BytesMut) {
        self.optimizer.checkin(&self.session_id, buffer)
    }
}

impl Drop for ConversionReservation {
    fn drop(&mut self) {
        self.optimizer.optimize_after_conversion(&self.session_id);
    }
}
