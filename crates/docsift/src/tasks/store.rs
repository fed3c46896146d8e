//! In-memory task store with per-task atomic updates
//!
//! Tasks live in a `DashMap`; every mutation happens while holding the entry's
//! shard lock, so a progress update and a terminal transition never interleave.
//! State is not persisted across restarts.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{ProcessingResult, Task, TaskStatus};

/// Task counts by status
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Owns task records and their state transitions
#[derive(Default)]
pub struct TaskStore {
    tasks: DashMap<Uuid, Task>,
    /// Signalled on every terminal transition
    settled: Notify,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending task
    pub fn create(&self, id: Uuid, file_name: &str, file_type: &str) -> Result<Task> {
        match self.tasks.entry(id) {
            Entry::Occupied(_) => Err(Error::internal(format!("Task {} already exists", id))),
            Entry::Vacant(slot) => {
                let task = Task::new(id, file_name, file_type);
                slot.insert(task.clone());
                tracing::debug!("[{}] Task created for {}", id, file_name);
                Ok(task)
            }
        }
    }

    /// Snapshot of a task
    pub fn get(&self, id: Uuid) -> Result<Task> {
        self.tasks
            .get(&id)
            .map(|t| t.clone())
            .ok_or(Error::TaskNotFound(id))
    }

    /// Move a task to pending/processing and optionally raise its progress.
    ///
    /// Terminal states are only reachable through [`update_result`](Self::update_result)
    /// and [`update_error`](Self::update_error).
    pub fn update_status(&self, id: Uuid, status: TaskStatus, progress: Option<u8>) -> Result<Task> {
        self.mutate(id, |task| {
            if status.is_terminal() || !task.status.can_transition_to(status) {
                return Err(Error::InvalidTransition {
                    id,
                    from: task.status,
                    to: status,
                });
            }
            task.status = status;
            if let Some(p) = progress {
                raise_progress(task, p);
            }
            Ok(())
        })
    }

    /// Raise progress on a processing task. Lower values are ignored.
    pub fn update_progress(&self, id: Uuid, progress: u8) -> Result<Task> {
        self.update_status(id, TaskStatus::Processing, Some(progress))
    }

    /// Complete a task: status, result and progress change together
    pub fn update_result(&self, id: Uuid, result: ProcessingResult) -> Result<Task> {
        let task = self.mutate(id, |task| {
            if !task.status.can_transition_to(TaskStatus::Completed) {
                return Err(Error::InvalidTransition {
                    id,
                    from: task.status,
                    to: TaskStatus::Completed,
                });
            }
            task.status = TaskStatus::Completed;
            task.progress = 100;
            task.result = Some(result);
            task.error = None;
            Ok(())
        })?;
        self.settled.notify_waiters();
        Ok(task)
    }

    /// Fail a task with a message
    pub fn update_error(&self, id: Uuid, message: impl Into<String>) -> Result<Task> {
        let message = message.into();
        let task = self.mutate(id, |task| {
            if !task.status.can_transition_to(TaskStatus::Failed) {
                return Err(Error::InvalidTransition {
                    id,
                    from: task.status,
                    to: TaskStatus::Failed,
                });
            }
            task.status = TaskStatus::Failed;
            task.error = Some(message);
            task.result = None;
            Ok(())
        })?;
        self.settled.notify_waiters();
        Ok(task)
    }

    /// Wait until the task is completed or failed
    pub async fn wait_for_terminal(&self, id: Uuid, timeout: Duration) -> Result<Task> {
        let wait = async {
            loop {
                let notified = self.settled.notified();
                tokio::pin!(notified);
                // Register before checking so a transition in between is not missed
                notified.as_mut().enable();

                let task = self.get(id)?;
                if task.is_terminal() {
                    return Ok(task);
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!("Waiting for task {}", id), timeout.as_secs())),
        }
    }

    /// All tasks, newest first
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|e| e.value().clone()).collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for entry in self.tasks.iter() {
            match entry.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Administrative reset. Returns the number of tasks dropped.
    pub fn clear(&self) -> usize {
        let count = self.tasks.len();
        self.tasks.clear();
        tracing::warn!("Task store cleared ({} tasks dropped)", count);
        count
    }

    fn mutate<F>(&self, id: Uuid, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let mut entry = self.tasks.get_mut(&id).ok_or(Error::TaskNotFound(id))?;
        f(&mut entry)?;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }
}

fn raise_progress(task: &mut Task, progress: u8) {
    let progress = progress.min(100);
    if progress > task.progress {
        task.progress = progress;
    }
}

/// Reports progress for one task; failures are logged, never propagated
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<TaskStore>,
    task_id: Uuid,
}

impl ProgressReporter {
    pub fn new(store: Arc<TaskStore>, task_id: Uuid) -> Self {
        Self { store, task_id }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn report(&self, progress: u8) {
        if let Err(e) = self.store.update_progress(self.task_id, progress) {
            tracing::debug!("[{}] Progress update ignored: {}", self.task_id, e);
        }
    }

    /// Report `done/total` of the span `[from, to]`
    pub fn report_span(&self, from: u8, to: u8, done: usize, total: usize) {
        if total == 0 || to <= from {
            return;
        }
        let span = (to - from) as usize;
        let value = from as usize + span * done.min(total) / total;
        self.report(value as u8);
    }
}
