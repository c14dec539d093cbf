//! Run metadata, lifecycle state machine, per-run log, and the global run
//! ledger (spec §4.6, §3). Grounded on the teacher's `RunLog` (`run_log.rs`):
//! one file per run under a retailer-scoped directory plus a stats snapshot
//! written alongside it. The teacher rewrites its whole log file on
//! `save()`; the metadata file here is instead rewritten atomically via
//! temp-file + rename on every transition, same discipline as the
//! checkpoint store.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use harvester_common::HarvestError;

/// `{retailer}-{yyyymmddHHMMSS}-{uuid8}`, sortable lexically by start time.
pub fn generate_run_id(retailer: &str, started_at: DateTime<Utc>) -> String {
    let short = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("{retailer}-{}-{short}", started_at.format("%Y%m%d%H%M%S"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Complete,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub discovered: u64,
    pub extracted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub new: u64,
    pub closed: u64,
    pub modified: u64,
    pub unchanged: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub retailer: String,
    pub status: RunStatus,
    pub phase: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: RunStats,
    pub error: Option<String>,
}

impl RunMetadata {
    pub fn with_id(run_id: String, retailer: &str) -> Self {
        Self {
            run_id,
            retailer: retailer.to_string(),
            status: RunStatus::Running,
            phase: "starting".to_string(),
            started_at: Utc::now(),
            finished_at: None,
            stats: RunStats::default(),
            error: None,
        }
    }
}

/// One line appended to the process-wide `data/.runs/ledger.jsonl` when a
/// run reaches a terminal status (spec's "Run ledger": one entry per
/// completed/failed run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub retailer: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub status: RunStatus,
    pub stores_found: u64,
    pub stats: RunStats,
}

/// One run's lifecycle: an in-memory `RunMetadata` snapshot, a per-run text
/// log at `data/{retailer}/logs/{run_id}.log`, and (on a terminal
/// transition) one line appended to the shared `data/.runs/ledger.jsonl`.
pub struct RunTracker {
    data_dir: PathBuf,
    retailer: String,
    runs_dir: PathBuf,
    logs_dir: PathBuf,
    run_id: String,
    metadata: RunMetadata,
}

impl RunTracker {
    /// Start tracking a run. `run_id`, when given, is used as-is (the
    /// caller already minted and registered it); otherwise one is
    /// generated here.
    pub fn start(data_dir: impl AsRef<Path>, retailer: &str, run_id: Option<String>) -> Result<Self, HarvestError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let run_id = run_id.unwrap_or_else(|| generate_run_id(retailer, Utc::now()));
        let metadata = RunMetadata::with_id(run_id.clone(), retailer);

        let runs_dir = data_dir.join(retailer).join("runs");
        let logs_dir = data_dir.join(retailer).join("logs");
        std::fs::create_dir_all(&runs_dir)?;
        std::fs::create_dir_all(&logs_dir)?;

        let tracker = Self {
            data_dir,
            retailer: retailer.to_string(),
            runs_dir,
            logs_dir,
            run_id,
            metadata,
        };
        tracker.persist_metadata()?;
        tracker.log_line(LogLevel::Info, "run started")?;
        info!(run_id = %tracker.run_id, retailer, "run started");
        Ok(tracker)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    fn metadata_path(&self) -> PathBuf {
        self.runs_dir.join(format!("{}.json", self.run_id))
    }

    /// `data/{retailer}/logs/{run_id}.log` — the human-readable per-run log.
    pub fn log_path(data_dir: impl AsRef<Path>, retailer: &str, run_id: &str) -> PathBuf {
        data_dir.as_ref().join(retailer).join("logs").join(format!("{run_id}.log"))
    }

    fn this_log_path(&self) -> PathBuf {
        self.logs_dir.join(format!("{}.log", self.run_id))
    }

    /// `data/.runs/ledger.jsonl`, shared across every retailer and run.
    fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(".runs").join("ledger.jsonl")
    }

    /// Append one line to this run's text log: `%Y-%m-%d %H:%M:%S - LEVEL -
    /// [retailer] message`, matching the documented log format.
    pub fn log_line(&self, level: LogLevel, message: &str) -> Result<(), HarvestError> {
        let line = format!(
            "{} - {} - [{}] {message}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            level.as_str(),
            self.retailer,
        );
        let mut file = OpenOptions::new().create(true).append(true).open(self.this_log_path())?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Atomic snapshot write, same temp+rename discipline as the
    /// checkpoint store: a status poll never observes a half-written
    /// metadata file (spec §8 invariant 3's guarantee extended to runs).
    fn persist_metadata(&self) -> Result<(), HarvestError> {
        let target = self.metadata_path();
        let tmp = self.runs_dir.join(format!("{}.json.tmp.{}", self.run_id, std::process::id()));
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.metadata)?)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Append one terminal-transition entry to the shared ledger and fsync
    /// it, so a reader tailing the file never needs to distinguish a
    /// torn write from a short one.
    fn append_ledger(&self) -> Result<(), HarvestError> {
        let finished_at = self.metadata.finished_at.unwrap_or_else(Utc::now);
        let entry = LedgerEntry {
            retailer: self.retailer.clone(),
            run_id: self.run_id.clone(),
            started_at: self.metadata.started_at,
            finished_at,
            duration_seconds: (finished_at - self.metadata.started_at).num_milliseconds() as f64 / 1000.0,
            status: self.metadata.status,
            stores_found: self.metadata.stats.extracted,
            stats: self.metadata.stats.clone(),
        };

        if let Some(parent) = self.ledger_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(self.ledger_path())?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn advance_phase(&mut self, phase: &str) -> Result<(), HarvestError> {
        self.metadata.phase = phase.to_string();
        self.log_line(LogLevel::Info, &format!("phase advanced to {phase}"))?;
        self.persist_metadata()
    }

    pub fn update_stats(&mut self, stats: RunStats) -> Result<(), HarvestError> {
        self.metadata.stats = stats;
        self.persist_metadata()
    }

    pub fn log_error(&mut self, message: &str) -> Result<(), HarvestError> {
        self.log_line(LogLevel::Error, message)
    }

    pub fn complete(&mut self) -> Result<(), HarvestError> {
        self.metadata.status = RunStatus::Complete;
        self.metadata.finished_at = Some(Utc::now());
        self.persist_metadata()?;
        self.log_line(LogLevel::Info, "run completed")?;
        self.append_ledger()?;
        info!(run_id = %self.run_id, "run completed");
        Ok(())
    }

    pub fn fail(&mut self, reason: &str) -> Result<(), HarvestError> {
        self.metadata.status = RunStatus::Failed;
        self.metadata.finished_at = Some(Utc::now());
        self.metadata.error = Some(reason.to_string());
        self.persist_metadata()?;
        self.log_line(LogLevel::Error, &format!("run failed: {reason}"))?;
        self.append_ledger()?;
        info!(run_id = %self.run_id, reason, "run failed");
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), HarvestError> {
        self.metadata.status = RunStatus::Canceled;
        self.metadata.finished_at = Some(Utc::now());
        self.persist_metadata()?;
        self.log_line(LogLevel::Warning, "run canceled")?;
        self.append_ledger()?;
        info!(run_id = %self.run_id, "run canceled");
        Ok(())
    }

    /// Read back a previously persisted run's metadata snapshot (used by
    /// the status/control plane, spec §4.9).
    pub fn load_metadata(data_dir: impl AsRef<Path>, retailer: &str, run_id: &str) -> Option<RunMetadata> {
        let path = data_dir.as_ref().join(retailer).join("runs").join(format!("{run_id}.json"));
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn list_runs(data_dir: impl AsRef<Path>, retailer: &str) -> Vec<RunMetadata> {
        let dir = data_dir.as_ref().join(retailer).join("runs");
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut runs: Vec<RunMetadata> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "json").unwrap_or(false))
            .filter_map(|e| std::fs::read_to_string(e.path()).ok())
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect();
        runs.sort_by_key(|r: &RunMetadata| r.started_at);
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_unique_across_calls() {
        let now = Utc::now();
        let a = generate_run_id("acme", now);
        let b = generate_run_id("acme", now);
        assert_ne!(a, b);
        assert!(a.starts_with("acme-"));
    }

    #[test]
    fn start_honors_a_preallocated_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RunTracker::start(dir.path(), "acme", Some("acme-fixed-id".to_string())).unwrap();
        assert_eq!(tracker.run_id(), "acme-fixed-id");
    }

    #[test]
    fn lifecycle_transitions_persist_metadata_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = RunTracker::start(dir.path(), "acme", None).unwrap();
        let run_id = tracker.run_id().to_string();

        tracker.advance_phase("discovering").unwrap();
        tracker.update_stats(RunStats { discovered: 10, extracted: 2, ..Default::default() }).unwrap();
        tracker.complete().unwrap();

        let loaded = RunTracker::load_metadata(dir.path(), "acme", &run_id).unwrap();
        assert_eq!(loaded.status, RunStatus::Complete);
        assert!(loaded.finished_at.is_some());
        assert_eq!(loaded.stats.discovered, 10);

        let log_contents = std::fs::read_to_string(RunTracker::log_path(dir.path(), "acme", &run_id)).unwrap();
        assert!(log_contents.contains(" - INFO - [acme] run started"));
        assert!(log_contents.contains(" - INFO - [acme] phase advanced to discovering"));
        assert!(log_contents.contains(" - INFO - [acme] run completed"));
    }

    #[test]
    fn completed_run_appends_exactly_one_ledger_entry_with_stores_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = RunTracker::start(dir.path(), "acme", None).unwrap();
        tracker.update_stats(RunStats { extracted: 2, ..Default::default() }).unwrap();
        tracker.complete().unwrap();

        let ledger = std::fs::read_to_string(dir.path().join(".runs").join("ledger.jsonl")).unwrap();
        let lines: Vec<&str> = ledger.lines().collect();
        assert_eq!(lines.len(), 1);

        let entry: LedgerEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry.retailer, "acme");
        assert_eq!(entry.status, RunStatus::Complete);
        assert_eq!(entry.stores_found, 2);
    }

    #[test]
    fn ledger_is_shared_across_retailers() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = RunTracker::start(dir.path(), "acme", None).unwrap();
        a.complete().unwrap();
        let mut b = RunTracker::start(dir.path(), "bravo", None).unwrap();
        b.fail("boom").unwrap();

        let ledger = std::fs::read_to_string(dir.path().join(".runs").join("ledger.jsonl")).unwrap();
        assert_eq!(ledger.lines().count(), 2);
    }

    #[test]
    fn failed_run_records_error_reason() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = RunTracker::start(dir.path(), "acme", None).unwrap();
        tracker.fail("transport exhausted").unwrap();
        assert_eq!(tracker.metadata().status, RunStatus::Failed);
        assert_eq!(tracker.metadata().error.as_deref(), Some("transport exhausted"));
    }

    #[test]
    fn metadata_lives_under_retailer_then_runs() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RunTracker::start(dir.path(), "acme", Some("acme-run-1".to_string())).unwrap();
        assert!(dir.path().join("acme").join("runs").join("acme-run-1.json").exists());
    }

    #[test]
    fn list_runs_returns_every_persisted_run_sorted_by_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut t1 = RunTracker::start(dir.path(), "acme", None).unwrap();
        t1.complete().unwrap();
        let mut t2 = RunTracker::start(dir.path(), "acme", None).unwrap();
        t2.complete().unwrap();

        let runs = RunTracker::list_runs(dir.path(), "acme");
        assert_eq!(runs.len(), 2);
    }
}
