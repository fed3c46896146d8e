//! Temp artifact registry
//!
//! Every file created during conversion/OCR is registered here against a session
//! (the task id). Artifacts leave the registry through session cleanup, explicit
//! scheduling, or the background sweep, which also enforces TTL, count and size caps.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ResourceConfig;
use crate::error::Result;

/// What a temp artifact holds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rendered PDF page
    PageImage,
    /// Uploaded source document
    Upload,
    Other,
}

/// A tracked temp file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempArtifact {
    pub id: Uuid,
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub scheduled_for_cleanup: bool,
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub bytes_freed: u64,
    pub remaining: usize,
}

/// Disk I/O counters for monitoring
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IoStats {
    pub active_artifacts: usize,
    pub active_bytes: u64,
    pub max_artifacts: usize,
    pub max_bytes: u64,
    pub files_created: u64,
    pub files_deleted: u64,
    pub delete_failures: u64,
    pub bytes_written: u64,
    pub sweeps: u64,
}

#[derive(Default)]
struct IoCounters {
    created: AtomicU64,
    deleted: AtomicU64,
    delete_failures: AtomicU64,
    bytes_written: AtomicU64,
    sweeps: AtomicU64,
}

/// Thread-safe registry of temp artifacts
pub struct TempFileRegistry {
    temp_root: PathBuf,
    ttl: Duration,
    max_artifacts: usize,
    max_total_bytes: u64,
    batch_size: usize,
    cleanup_delay: Duration,
    artifacts: DashMap<Uuid, TempArtifact>,
    counters: IoCounters,
}

impl TempFileRegistry {
    pub fn new(config: &ResourceConfig) -> Self {
        Self {
            temp_root: config.temp_dir.clone(),
            ttl: config.artifact_ttl(),
            max_artifacts: config.max_artifacts,
            max_total_bytes: config.max_total_bytes,
            batch_size: config.sweep_batch_size.max(1),
            cleanup_delay: config.cleanup_delay(),
            artifacts: DashMap::new(),
            counters: IoCounters::default(),
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Directory for one session's artifacts, created on demand
    pub async fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        let dir = self.temp_root.join(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Track a file. Size is read from disk if the file exists.
    pub fn register(&self, path: impl Into<PathBuf>, kind: ArtifactKind, session_id: &str) -> Uuid {
        let path = path.into();
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let artifact = TempArtifact {
            id: Uuid::new_v4(),
            path,
            kind,
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            size_bytes,
            scheduled_for_cleanup: false,
        };
        let id = artifact.id;

        self.counters.created.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_written.fetch_add(size_bytes, Ordering::Relaxed);
        tracing::debug!("[{}] Registered {:?} artifact {} ({} bytes)", session_id, kind, id, size_bytes);

        self.artifacts.insert(id, artifact);
        id
    }

    /// Mark an artifact for removal on the next sweep. Returns false if unknown.
    pub fn schedule_cleanup(&self, id: Uuid) -> bool {
        match self.artifacts.get_mut(&id) {
            Some(mut artifact) => {
                artifact.scheduled_for_cleanup = true;
                true
            }
            None => false,
        }
    }

    /// Mark all of a session's artifacts and remove them after the cleanup delay
    pub fn schedule_session_cleanup(self: &Arc<Self>, session_id: &str) -> JoinHandle<usize> {
        for mut artifact in self.artifacts.iter_mut() {
            if artifact.session_id == session_id {
                artifact.scheduled_for_cleanup = true;
            }
        }

        let registry = Arc::clone(self);
        let session_id = session_id.to_string();
        let delay = self.cleanup_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            registry.cleanup_by_session(&session_id).await
        })
    }

    /// Remove every artifact of a session now. Returns how many were removed.
    pub async fn cleanup_by_session(&self, session_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .artifacts
            .iter()
            .filter(|a| a.session_id == session_id)
            .map(|a| a.id)
            .collect();

        let mut removed = 0;
        for id in ids {
            if self.remove_artifact(id).await.is_some() {
                removed += 1;
            }
        }

        // Only succeeds once the directory is empty
        let _ = tokio::fs::remove_dir(self.temp_root.join(session_id)).await;

        if removed > 0 {
            tracing::debug!("[{}] Cleaned up {} temp artifacts", session_id, removed);
        }
        removed
    }

    /// Remove scheduled and expired artifacts, then the oldest ones until the
    /// count and size caps hold. Deletes in bounded batches.
    pub async fn sweep(&self) -> SweepReport {
        self.counters.sweeps.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();

        let mut entries: Vec<(DateTime<Utc>, Uuid, u64, bool)> = self
            .artifacts
            .iter()
            .map(|a| {
                let expired = (now - a.created_at)
                    .to_std()
                    .map(|age| age > self.ttl)
                    .unwrap_or(false);
                let due = a.scheduled_for_cleanup || expired;
                (a.created_at, a.id, a.size_bytes, due)
            })
            .collect();
        entries.sort_by_key(|(created, ..)| *created);

        let mut victims: Vec<Uuid> = Vec::new();
        let mut count = entries.len();
        let mut bytes: u64 = entries.iter().map(|(_, _, size, _)| size).sum();

        for (_, id, size, due) in &entries {
            if *due {
                victims.push(*id);
                count -= 1;
                bytes = bytes.saturating_sub(*size);
            }
        }
        for (_, id, size, due) in &entries {
            if count <= self.max_artifacts && bytes <= self.max_total_bytes {
                break;
            }
            if !due {
                victims.push(*id);
                count -= 1;
                bytes = bytes.saturating_sub(*size);
            }
        }

        let mut report = SweepReport::default();
        for batch in victims.chunks(self.batch_size) {
            for id in batch {
                if let Some(size) = self.remove_artifact(*id).await {
                    report.removed += 1;
                    report.bytes_freed += size;
                }
            }
            tokio::task::yield_now().await;
        }
        report.remaining = self.artifacts.len();

        if report.removed > 0 {
            tracing::info!(
                "Temp sweep removed {} artifacts ({} bytes), {} remaining",
                report.removed,
                report.bytes_freed,
                report.remaining
            );
        }
        report
    }

    /// Delete files under the temp root that the registry does not know about and
    /// that are older than the TTL (e.g. left behind by a previous process).
    pub async fn sweep_orphans(&self) -> usize {
        let known: HashSet<PathBuf> = self.artifacts.iter().map(|a| a.path.clone()).collect();
        let root = self.temp_root.clone();
        let ttl = self.ttl;

        let result = tokio::task::spawn_blocking(move || {
            let mut removed = 0usize;
            if !root.exists() {
                return removed;
            }
            let now = SystemTime::now();
            let is_stale = |path: &Path| {
                std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .map(|age| age > ttl)
                    .unwrap_or(false)
            };

            for entry in walkdir::WalkDir::new(&root)
                .min_depth(1)
                .contents_first(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if entry.file_type().is_file() {
                    if !known.contains(path) && is_stale(path) && std::fs::remove_file(path).is_ok() {
                        removed += 1;
                    }
                } else if entry.file_type().is_dir() && is_stale(path) {
                    // Fails unless empty
                    let _ = std::fs::remove_dir(path);
                }
            }
            removed
        })
        .await;

        match result {
            Ok(removed) => {
                if removed > 0 {
                    self.counters.deleted.fetch_add(removed as u64, Ordering::Relaxed);
                    tracing::info!("Removed {} orphaned temp files", removed);
                }
                removed
            }
            Err(e) => {
                tracing::error!("Orphan sweep task failed: {}", e);
                0
            }
        }
    }

    /// Run `sweep` and `sweep_orphans` periodically until cancelled
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                        self.sweep_orphans().await;
                    }
                }
            }
            tracing::debug!("Temp sweeper stopped");
        })
    }

    pub fn get(&self, id: Uuid) -> Option<TempArtifact> {
        self.artifacts.get(&id).map(|a| a.clone())
    }

    pub fn artifact_ids(&self) -> Vec<Uuid> {
        self.artifacts.iter().map(|a| a.id).collect()
    }

    pub fn count(&self) -> usize {
        self.artifacts.len()
    }

    pub fn session_count(&self, session_id: &str) -> usize {
        self.artifacts.iter().filter(|a| a.session_id == session_id).count()
    }

    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size_bytes).sum()
    }

    pub fn io_stats(&self) -> IoStats {
        IoStats {
            active_artifacts: self.count(),
            active_bytes: self.total_bytes(),
            max_artifacts: self.max_artifacts,
            max_bytes: self.max_total_bytes,
            files_created: self.counters.created.load(Ordering::Relaxed),
            files_deleted: self.counters.deleted.load(Ordering::Relaxed),
            delete_failures: self.counters.delete_failures.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
            sweeps: self.counters.sweeps.load(Ordering::Relaxed),
        }
    }

    /// Delete one artifact. Returns its size when it left the registry.
    /// A failed delete keeps the artifact scheduled so a later sweep retries.
    async fn remove_artifact(&self, id: Uuid) -> Option<u64> {
        let (_, artifact) = self.artifacts.remove(&id)?;

        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                self.counters.delete_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "[{}] Failed to delete temp artifact {}: {}",
                    artifact.session_id,
                    artifact.id,
                    e
                );
                let mut artifact = artifact;
                artifact.scheduled_for_cleanup = true;
                self.artifacts.insert(id, artifact);
                return None;
            }
        }

        self.counters.deleted.fetch_add(1, Ordering::Relaxed);
        Some(artifact.size_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_in(dir: &Path, tweak: impl FnOnce(&mut ResourceConfig)) -> Arc<TempFileRegistry> {
        let mut config = ResourceConfig {
            temp_dir: dir.to_path_buf(),
            cleanup_delay_secs: 0,
            ..ResourceConfig::default()
        };
        tweak(&mut config);
        Arc::new(TempFileRegistry::new(&config))
    }

    async fn write_file(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, vec![b'x'; len]).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_register_and_cleanup_by_session() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path(), |_| {});
        let dir = registry.session_dir("s1").await.unwrap();

        let a = write_file(&dir, "p1.png", 10).await;
        let b = write_file(&dir, "p2.png", 20).await;
        registry.register(&a, ArtifactKind::PageImage, "s1");
        registry.register(&b, ArtifactKind::PageImage, "s1");
        let other = write_file(tmp.path(), "other.png", 5).await;
        registry.register(&other, ArtifactKind::PageImage, "s2");

        assert_eq!(registry.session_count("s1"), 2);
        assert_eq!(registry.total_bytes(), 35);

        let removed = registry.cleanup_by_session("s1").await;
        assert_eq!(removed, 2);
        assert!(!a.exists());
        assert!(!b.exists());
        assert!(!dir.exists());
        assert!(other.exists());
        assert_eq!(registry.session_count("s1"), 0);
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_schedule_session_cleanup_runs_after_delay() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path(), |_| {});
        let path = write_file(tmp.path(), "p.png", 3).await;
        let id = registry.register(&path, ArtifactKind::PageImage, "task");

        let handle = registry.schedule_session_cleanup("task");
        assert_eq!(handle.await.unwrap(), 1);
        assert!(registry.get(id).is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_sweep_removes_scheduled_first() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path(), |_| {});
        let keep = write_file(tmp.path(), "keep.png", 1).await;
        let drop = write_file(tmp.path(), "drop.png", 1).await;
        registry.register(&keep, ArtifactKind::PageImage, "s");
        let id = registry.register(&drop, ArtifactKind::PageImage, "s");
        assert!(registry.schedule_cleanup(id));
        assert!(!registry.schedule_cleanup(Uuid::new_v4()));

        let report = registry.sweep().await;
        assert_eq!(report.removed, 1);
        assert_eq!(report.remaining, 1);
        assert!(keep.exists());
        assert!(!drop.exists());
    }

    #[tokio::test]
    async fn test_sweep_enforces_count_oldest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path(), |c| {
            c.max_artifacts = 2;
            c.sweep_batch_size = 1;
        });

        let mut paths = Vec::new();
        for i in 0..5 {
            let path = write_file(tmp.path(), &format!("{}.png", i), 1).await;
            registry.register(&path, ArtifactKind::PageImage, "s");
            paths.push(path);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let report = registry.sweep().await;
        assert_eq!(report.removed, 3);
        assert_eq!(registry.count(), 2);
        assert!(!paths[0].exists() && !paths[1].exists() && !paths[2].exists());
        assert!(paths[3].exists() && paths[4].exists());
    }

    #[tokio::test]
    async fn test_sweep_enforces_total_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path(), |c| c.max_total_bytes = 100);
        for i in 0..3 {
            let path = write_file(tmp.path(), &format!("{}.png", i), 60).await;
            registry.register(&path, ArtifactKind::PageImage, "s");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        registry.sweep().await;
        assert_eq!(registry.count(), 1);
        assert!(registry.total_bytes() <= 100);
    }

    #[tokio::test]
    async fn test_sweep_expires_by_ttl() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path(), |c| c.artifact_ttl_secs = 0);
        let path = write_file(tmp.path(), "old.png", 1).await;
        registry.register(&path, ArtifactKind::PageImage, "s");
        tokio::time::sleep(Duration::from_millis(5)).await;

        let report = registry.sweep().await;
        assert_eq!(report.removed, 1);
        let stats = registry.io_stats();
        assert_eq!(stats.files_created, 1);
        assert_eq!(stats.files_deleted, 1);
        assert_eq!(stats.sweeps, 1);
    }

    #[tokio::test]
    async fn test_missing_file_still_leaves_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path(), |_| {});
        registry.register(tmp.path().join("never-written.png"), ArtifactKind::PageImage, "s");
        assert_eq!(registry.cleanup_by_session("s").await, 1);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_orphans_skips_known_files() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = registry_in(tmp.path(), |c| c.artifact_ttl_secs = 0);
        let known = write_file(tmp.path(), "known.png", 1).await;
        registry.register(&known, ArtifactKind::PageImage, "s");
        let orphan = write_file(tmp.path(), "orphan.png", 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let removed = registry.sweep_orphans().await;
        assert_eq!(removed, 1);
        assert!(known.exists());
        assert!(!orphan.exists());
    }
}
