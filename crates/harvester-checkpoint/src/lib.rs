//! Per-retailer resume state (spec §3). Written by a temp-file + rename so
//! `load_checkpoint` never observes a partial JSON document — the same
//! atomic-write discipline the teacher's `RunLog::save` uses for run
//! timelines, tightened here with an explicit rename instead of a direct
//! write.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use harvester_common::{HarvestError, Store};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Checkpoint {
    pub completed_identifiers: HashSet<String>,
    pub partial_stores: Vec<Store>,
    /// Phase-specific data (HTML-crawl state list, paginated sitemap
    /// index, ...). Kept as an opaque JSON value so each `ScraperKind`
    /// defines its own phase payload shape.
    pub phase_data: Option<Value>,
    pub last_updated: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self {
            completed_identifiers: HashSet::new(),
            partial_stores: Vec::new(),
            phase_data: None,
            last_updated: Utc::now(),
        }
    }

    pub fn mark_completed(&mut self, identifier: impl Into<String>, store: Option<Store>) {
        self.completed_identifiers.insert(identifier.into());
        if let Some(s) = store {
            self.partial_stores.push(s);
        }
        self.last_updated = Utc::now();
    }
}

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(data_dir: impl AsRef<Path>, retailer: &str) -> Self {
        Self {
            dir: data_dir.as_ref().join(retailer).join("checkpoints"),
        }
    }

    fn path(&self) -> PathBuf {
        self.dir.join("current.json")
    }

    /// Atomic write: serialize to a sibling temp file, then rename over
    /// the target. At no point does a partial JSON document exist at
    /// `current.json` (spec §8 invariant 3).
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), HarvestError> {
        std::fs::create_dir_all(&self.dir)?;
        let target = self.path();
        let tmp = self.dir.join(format!("current.json.tmp.{}", std::process::id()));
        std::fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?)?;
        std::fs::rename(&tmp, &target)?;
        info!(path = %target.display(), completed = checkpoint.completed_identifiers.len(), "checkpoint saved");
        Ok(())
    }

    /// Returns `None` when no checkpoint exists yet ("no checkpoint" per
    /// spec §8 invariant 3); a corrupt file is treated the same way
    /// rather than propagating a parse error, since a checkpoint is purely
    /// an optimization — discovery/extraction can always restart cold.
    pub fn load(&self) -> Option<Checkpoint> {
        let contents = std::fs::read_to_string(self.path()).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Checkpoints are deleted only when the run completes successfully
    /// (spec §3 ownership & lifecycle).
    pub fn clear(&self) -> Result<(), HarvestError> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
