//! Run manager (spec §4.7): a registry of in-flight runs plus start / stop
//! / restart / status / cleanup_exited over two supervision backends.
//! Grounded on the teacher's `SupervisorState::acquire_lock`
//! (`state.rs`): delete the stale entry, then create — never an outright
//! reject when the existing entry merely looks occupied. Reimplemented
//! in-process over a `tokio::sync::Mutex<HashMap<..>>` instead of a graph
//! database lock node, since the harvester has no shared store to hold it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("retailer {0} already has a live run in progress")]
    AlreadyRunning(String),
    #[error("no run registered for retailer {0}")]
    NotFound(String),
}

/// A unit the manager can poll for liveness and ask to stop. One impl
/// wraps an in-process tokio task (cooperative cancellation), the other a
/// child process (signal + kill).
#[async_trait]
pub trait Supervised: Send + Sync {
    async fn is_alive(&mut self) -> bool;
    async fn stop(&mut self);
}

pub struct TaskSupervisor {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl TaskSupervisor {
    pub fn new(handle: JoinHandle<()>, cancel: CancellationToken) -> Self {
        Self { handle, cancel }
    }
}

#[async_trait]
impl Supervised for TaskSupervisor {
    async fn is_alive(&mut self) -> bool {
        !self.handle.is_finished()
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        if tokio::time::timeout(Duration::from_secs(10), &mut self.handle).await.is_err() {
            self.handle.abort();
        }
    }
}

pub struct SubprocessSupervisor {
    child: Child,
}

impl SubprocessSupervisor {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

#[async_trait]
impl Supervised for SubprocessSupervisor {
    async fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn stop(&mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

struct RunEntry {
    run_id: String,
    started_at: DateTime<Utc>,
    supervised: Box<dyn Supervised>,
}

#[derive(Debug, Clone)]
pub struct RunStatusSnapshot {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub alive: bool,
}

/// One process-wide registry, one entry per retailer with a live run
/// (spec §5: at most one active run per retailer at a time).
pub struct Manager {
    entries: Mutex<HashMap<String, RunEntry>>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new run for `retailer`. If an entry already exists, it
    /// is probed first (spec §4.7's stale-entry rule): liveness is the
    /// sole criterion, no time-based lease. A dead supervised unit is
    /// stopped and evicted; only a genuinely live entry blocks the start.
    pub async fn start(
        &self,
        retailer: &str,
        run_id: &str,
        mut supervised: Box<dyn Supervised>,
    ) -> Result<(), ManagerError> {
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.get_mut(retailer) {
            if existing.supervised.is_alive().await {
                return Err(ManagerError::AlreadyRunning(retailer.to_string()));
            }
            warn!(retailer, run_id = %existing.run_id, "evicting stale run entry");
            let mut stale = entries.remove(retailer).expect("just probed");
            stale.supervised.stop().await;
        }

        entries.insert(
            retailer.to_string(),
            RunEntry {
                run_id: run_id.to_string(),
                started_at: Utc::now(),
                supervised,
            },
        );
        Ok(())
    }

    pub async fn stop(&self, retailer: &str) -> Result<(), ManagerError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(retailer)
            .ok_or_else(|| ManagerError::NotFound(retailer.to_string()))?;
        entry.supervised.stop().await;
        entries.remove(retailer);
        Ok(())
    }

    pub async fn restart(
        &self,
        retailer: &str,
        run_id: &str,
        supervised: Box<dyn Supervised>,
    ) -> Result<(), ManagerError> {
        let _ = self.stop(retailer).await;
        self.start(retailer, run_id, supervised).await
    }

    pub async fn status(&self, retailer: &str) -> Option<RunStatusSnapshot> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(retailer)?;
        Some(RunStatusSnapshot {
            run_id: entry.run_id.clone(),
            started_at: entry.started_at,
            alive: entry.supervised.is_alive().await,
        })
    }

    /// Drop every entry whose supervised unit has already exited without
    /// going through `stop` (spec §4.7).
    pub async fn cleanup_exited(&self) -> Vec<String> {
        let mut entries = self.entries.lock().await;
        let keys: Vec<String> = entries.keys().cloned().collect();
        let mut removed = Vec::new();
        for key in keys {
            let alive = entries.get_mut(&key).expect("key from this map").supervised.is_alive().await;
            if !alive {
                entries.remove(&key);
                removed.push(key);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_long_task() -> (JoinHandle<()>, CancellationToken) {
        let cancel = CancellationToken::new();
        let inner = cancel.clone();
        let handle = tokio::spawn(async move {
            inner.cancelled().await;
        });
        (handle, cancel)
    }

    #[tokio::test]
    async fn start_then_start_again_while_alive_is_rejected() {
        let manager = Manager::new();
        let (h, c) = spawn_long_task();
        manager.start("acme", "run-1", Box::new(TaskSupervisor::new(h, c))).await.unwrap();

        let (h2, c2) = spawn_long_task();
        let err = manager
            .start("acme", "run-2", Box::new(TaskSupervisor::new(h2, c2)))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn s6_stale_entry_is_evicted_and_replaced_not_rejected() {
        let manager = Manager::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(async {});
        // Give the task a moment to finish so is_alive() reports false.
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.start("acme", "run-1", Box::new(TaskSupervisor::new(handle, cancel))).await.unwrap();

        let (h2, c2) = spawn_long_task();
        manager
            .start("acme", "run-2", Box::new(TaskSupervisor::new(h2, c2)))
            .await
            .expect("stale entry should be evicted, not rejected");

        let status = manager.status("acme").await.unwrap();
        assert_eq!(status.run_id, "run-2");
    }

    #[tokio::test]
    async fn stop_removes_the_entry() {
        let manager = Manager::new();
        let (h, c) = spawn_long_task();
        manager.start("acme", "run-1", Box::new(TaskSupervisor::new(h, c))).await.unwrap();
        manager.stop("acme").await.unwrap();
        assert!(manager.status("acme").await.is_none());
    }

    #[tokio::test]
    async fn cleanup_exited_drops_dead_entries_only() {
        let manager = Manager::new();
        let finished = tokio::spawn(async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager
            .start("dead-retailer", "run-1", Box::new(TaskSupervisor::new(finished, CancellationToken::new())))
            .await
            .unwrap();

        let (h, c) = spawn_long_task();
        manager.start("alive-retailer", "run-2", Box::new(TaskSupervisor::new(h, c))).await.unwrap();

        let removed = manager.cleanup_exited().await;
        assert_eq!(removed, vec!["dead-retailer".to_string()]);
        assert!(manager.status("alive-retailer").await.is_some());
    }

    #[tokio::test]
    async fn subprocess_supervisor_reports_liveness_after_exit() {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .unwrap();
        let mut supervisor = SubprocessSupervisor::new(child);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!supervisor.is_alive().await);
    }
}
