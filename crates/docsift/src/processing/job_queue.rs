//! Bounded-concurrency job queue
//!
//! At most `max_concurrent_jobs` handlers run at once. Submissions beyond the cap
//! wait in a FIFO list and are dispatched by whichever job finishes first.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::QueueJob;

/// Runs one job to completion
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process the job. An `Err` counts the job as failed; it is not retried.
    async fn handle(&self, job: QueueJob) -> Result<()>;

    /// Called when `handle` panicked, so the task can still be finalised
    fn handle_panic(&self, task_id: Uuid, message: String) {
        tracing::error!("[{}] Job handler panicked: {}", task_id, message);
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub max_concurrent_jobs: usize,
}

struct QueueState {
    waiting: VecDeque<QueueJob>,
    active: usize,
    closed: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    max_concurrent_jobs: usize,
    completed: AtomicU64,
    failed: AtomicU64,
    idle: Notify,
    handler: Arc<dyn JobHandler>,
}

/// Job queue for background document processing
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn new(max_concurrent_jobs: usize, handler: Arc<dyn JobHandler>) -> Self {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        tracing::info!("Job queue configured: {} concurrent jobs", max_concurrent_jobs);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    waiting: VecDeque::new(),
                    active: 0,
                    closed: false,
                }),
                max_concurrent_jobs,
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                idle: Notify::new(),
                handler,
            }),
        }
    }

    /// Enqueue a job. Dispatches immediately when a slot is free, otherwise the
    /// job waits its turn. Never blocks.
    pub fn submit(&self, job: QueueJob) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(Error::QueueClosed);
        }

        if state.active < self.inner.max_concurrent_jobs {
            state.active += 1;
            drop(state);
            tracing::debug!("[{}] Dispatching job immediately", job.task_id());
            tokio::spawn(Self::run(Arc::clone(&self.inner), job));
        } else {
            tracing::debug!(
                "[{}] All {} slots busy, job waits at position {}",
                job.task_id(),
                self.inner.max_concurrent_jobs,
                state.waiting.len() + 1
            );
            state.waiting.push_back(job);
        }
        Ok(())
    }

    /// Worker loop for one slot: run the job, then keep pulling waiting jobs
    /// until none are left.
    async fn run(inner: Arc<Inner>, first: QueueJob) {
        let mut job = first;
        loop {
            Self::execute(&inner, job).await;

            let next = {
                let mut state = inner.state.lock();
                match state.waiting.pop_front() {
                    Some(next) => next,
                    None => {
                        state.active -= 1;
                        if state.active == 0 {
                            inner.idle.notify_waiters();
                        }
                        return;
                    }
                }
            };
            job = next;
        }
    }

    async fn execute(inner: &Inner, job: QueueJob) {
        let task_id = job.task_id();
        let outcome = AssertUnwindSafe(inner.handler.handle(job)).catch_unwind().await;

        match outcome {
            Ok(Ok(())) => {
                inner.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("[{}] Job failed: {}", task_id, e);
            }
            Err(panic) => {
                inner.failed.fetch_add(1, Ordering::Relaxed);
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                inner.handler.handle_panic(task_id, message);
            }
        }
    }

    /// Stop accepting jobs. Returns the jobs that were still waiting so the caller
    /// can finalise their tasks; running jobs are left to finish.
    pub fn close(&self) -> Vec<QueueJob> {
        let mut state = self.inner.state.lock();
        state.closed = true;
        state.waiting.drain(..).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Resolve once no job is running and none is waiting, or the timeout elapses.
    /// Returns whether the queue became idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                {
                    let state = self.inner.state.lock();
                    if state.active == 0 && state.waiting.is_empty() {
                        return;
                    }
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.inner.max_concurrent_jobs
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let (waiting, active) = {
            let state = self.inner.state.lock();
            (state.waiting.len(), state.active)
        };
        QueueStats {
            waiting,
            active,
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            max_concurrent_jobs: self.inner.max_concurrent_jobs,
        }
    }
}
