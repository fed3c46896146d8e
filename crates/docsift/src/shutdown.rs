//! Ordered graceful shutdown
//!
//! Hooks run one at a time in ascending priority. A failing hook is logged and
//! the rest still run. The whole sequence is bounded by a single timeout.

use futures::future::BoxFuture;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::Result;

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct Registered {
    name: String,
    priority: u32,
    hook: Hook,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every hook ran; names of the ones that failed
    Completed { failed: Vec<String> },
    /// The timeout hit while the named hook was running
    TimedOut { pending: String },
}

impl ShutdownOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ShutdownOutcome::Completed { failed } if failed.is_empty())
    }
}

pub struct ShutdownCoordinator {
    hooks: Vec<Registered>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            hooks: Vec::new(),
            timeout,
        }
    }

    /// Add a hook. Lower priorities run first; equal priorities run in registration order.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, priority: u32, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.hooks.push(Registered {
            name: name.into(),
            priority,
            hook: Box::new(move || Box::pin(hook())),
        });
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn run(mut self) -> ShutdownOutcome {
        self.hooks.sort_by_key(|h| h.priority);
        let deadline = Instant::now() + self.timeout;
        let mut failed = Vec::new();

        tracing::info!("Shutting down ({} steps, {:?} budget)", self.hooks.len(), self.timeout);

        for Registered { name, priority, hook } in self.hooks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let started = Instant::now();
            tracing::info!("Shutdown step {} (priority {})", name, priority);

            match tokio::time::timeout(remaining, hook()).await {
                Ok(Ok(())) => {
                    tracing::debug!("Shutdown step {} done in {:?}", name, started.elapsed());
                }
                Ok(Err(e)) => {
                    tracing::error!("Shutdown step {} failed: {}", name, e);
                    failed.push(name);
                }
                Err(_) => {
                    tracing::error!("Shutdown timed out during {}", name);
                    return ShutdownOutcome::TimedOut { pending: name };
                }
            }
        }

        tracing::info!("Shutdown complete");
        ShutdownOutcome::Completed { failed }
    }
}
