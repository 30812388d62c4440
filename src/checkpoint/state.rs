//! Checkpoint state management for resumable pipelines.
//!
//! Epistemic foundation:
//! - K_i: Checkpoints track which units have been processed
//! - K_i: State is persisted to disk atomically (write-then-rename)
//! - K_i: The in-memory state only advances after the write succeeded
//! - B_i: Checkpoint file may not exist → fresh state
//! - I^B: Unreadable file → CorruptCheckpoint, never overwritten

use super::migrate;
use crate::enrich::is_usable_key;
use crate::models::{AltdataError, EnrichmentStatus, Result, WorkResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Lifecycle status of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Freshly created
    Initialized,
    /// At least one unit recorded
    InProgress,
    /// Planner reported no remaining work
    Complete,
    /// Created by an explicit reset
    Reset,
}

/// Durable progress + accumulated results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// On-disk schema version
    pub schema_version: u32,
    /// Pipeline that produced the results
    #[serde(default)]
    pub pipeline: String,
    /// Identifier of this checkpoint lineage (observability only)
    pub run_id: Uuid,
    /// Highest unit index ever recorded, -1 when none
    pub last_processed_index: i64,
    /// Number of recorded results
    pub total_processed: usize,
    /// Recorded results, append-only
    pub results: Vec<WorkResult>,
    /// When this checkpoint was created
    pub started_at: DateTime<Utc>,
    /// Last successful save
    pub last_updated: DateTime<Utc>,
    /// Lifecycle status
    pub status: CheckpointStatus,
}

impl Checkpoint {
    /// Create an empty checkpoint.
    pub fn new(pipeline: &str, status: CheckpointStatus) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            pipeline: pipeline.to_string(),
            run_id: Uuid::new_v4(),
            last_processed_index: -1,
            total_processed: 0,
            results: Vec::new(),
            started_at: now,
            last_updated: now,
            status,
        }
    }

    /// First unit index not yet covered by the cursor.
    pub fn resume_index(&self) -> usize {
        (self.last_processed_index + 1).max(0) as usize
    }

    /// Whether a unit index is already recorded.
    pub fn contains(&self, unit_index: usize) -> bool {
        // Anything above the cursor cannot be recorded yet.
        if unit_index as i64 > self.last_processed_index {
            return false;
        }
        self.results.iter().any(|r| r.unit_index == unit_index)
    }

    /// Position of a unit's result in `results`.
    pub fn position_of(&self, unit_index: usize) -> Option<usize> {
        self.results.iter().position(|r| r.unit_index == unit_index)
    }

    /// Append a result and advance the cursor.
    ///
    /// K_i: `total_processed == results.len()` and the cursor equals the
    /// highest recorded index after every call.
    pub fn apply_result(&mut self, result: WorkResult) -> Result<()> {
        if self.contains(result.unit_index) {
            return Err(AltdataError::DuplicateUnit(result.unit_index));
        }
        self.last_processed_index = self.last_processed_index.max(result.unit_index as i64);
        self.results.push(result);
        self.total_processed += 1;
        self.status = CheckpointStatus::InProgress;
        Ok(())
    }

    /// Check structural invariants of a loaded checkpoint.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.total_processed != self.results.len() {
            return Err(format!(
                "total_processed is {} but {} results are stored",
                self.total_processed,
                self.results.len()
            ));
        }
        let max_index = self.results.iter().map(|r| r.unit_index as i64).max();
        if let Some(max_index) = max_index {
            if max_index > self.last_processed_index {
                return Err(format!(
                    "result for unit {max_index} lies beyond last_processed_index {}",
                    self.last_processed_index
                ));
            }
        }
        if self.last_processed_index < -1 {
            return Err("last_processed_index is below -1".to_string());
        }
        Ok(())
    }

    /// Progress counters for status reporting.
    pub fn summary(&self) -> CheckpointSummary {
        let mut summary = CheckpointSummary {
            total_processed: self.total_processed,
            last_processed_index: self.last_processed_index,
            started_at: self.started_at,
            last_updated: self.last_updated,
            status: self.status,
            ..Default::default()
        };

        for result in &self.results {
            if result.is_failure() {
                summary.failed += 1;
            }
            for item in result.payload() {
                summary.items += 1;
                match item.status {
                    EnrichmentStatus::Unresolved => summary.unresolved += 1,
                    EnrichmentStatus::Pending if !is_usable_key(&item.lookup_key) => {
                        summary.pending += 1;
                        summary.unmatchable += 1;
                    }
                    EnrichmentStatus::Pending => summary.pending += 1,
                    EnrichmentStatus::Resolved => summary.resolved += 1,
                }
                if item.is_target {
                    summary.targets += 1;
                }
            }
        }

        summary
    }
}

/// Counts derived from a checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub total_processed: usize,
    pub last_processed_index: i64,
    pub failed: usize,
    pub items: usize,
    pub unresolved: usize,
    pub pending: usize,
    pub unmatchable: usize,
    pub resolved: usize,
    pub targets: usize,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub status: CheckpointStatus,
}

impl Default for CheckpointSummary {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            total_processed: 0,
            last_processed_index: -1,
            failed: 0,
            items: 0,
            unresolved: 0,
            pending: 0,
            unmatchable: 0,
            resolved: 0,
            targets: 0,
            started_at: now,
            last_updated: now,
            status: CheckpointStatus::Initialized,
        }
    }
}

/// Owns the checkpoint file and the in-memory state mirrored from it.
///
/// All mutation goes through [`CheckpointStore::update`], which writes the
/// candidate state to disk before making it visible.
pub struct CheckpointStore {
    /// Path to the checkpoint file
    path: PathBuf,
    /// Pipeline name stamped on fresh checkpoints
    pipeline: String,
    /// Current state
    state: Checkpoint,
}

impl CheckpointStore {
    /// Load the checkpoint at `path`, or start an empty one.
    ///
    /// A fresh checkpoint is persisted immediately so later runs resume it.
    pub fn open(path: &Path, pipeline: &str) -> Result<Self> {
        let mut store = Self::unread(path, pipeline, CheckpointStatus::Initialized)?;

        match Self::read(path)? {
            Some(state) => {
                if !state.pipeline.is_empty() && state.pipeline != pipeline {
                    warn!(
                        expected = pipeline,
                        found = %state.pipeline,
                        "Checkpoint was written by a different pipeline"
                    );
                }
                info!(
                    total_processed = state.total_processed,
                    resume_at = state.resume_index(),
                    "Resuming from checkpoint"
                );
                store.state = state;
            }
            None => {
                store.save()?;
                info!(path = %path.display(), "Created new checkpoint");
            }
        }

        Ok(store)
    }

    /// Archive whatever is at `path` without parsing it, then start over.
    ///
    /// Unlike [`CheckpointStore::reset`] this needs no readable state, so a
    /// corrupt file is moved to the backup name byte for byte.
    pub fn reset_path(path: &Path, pipeline: &str) -> Result<(Self, Option<PathBuf>)> {
        let mut store = Self::unread(path, pipeline, CheckpointStatus::Reset)?;
        let archived = store.reset()?;
        Ok((store, archived))
    }

    /// A store for `path` that has not looked at the file yet.
    fn unread(path: &Path, pipeline: &str, status: CheckpointStatus) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| AltdataError::io("creating checkpoint dir", e))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            pipeline: pipeline.to_string(),
            state: Checkpoint::new(pipeline, status),
        })
    }

    /// Read and validate persisted state.
    ///
    /// Returns `None` if the file does not exist. Legacy layouts are
    /// migrated in memory; the migrated shape is written on the next save.
    pub fn read(path: &Path) -> Result<Option<Checkpoint>> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AltdataError::io("reading checkpoint", e)),
        };

        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| AltdataError::corrupt(path, format!("invalid JSON: {e}")))?;

        let state = if migrate::is_legacy(&value) {
            warn!(path = %path.display(), "Migrating legacy checkpoint layout");
            migrate::from_legacy(value).map_err(|reason| AltdataError::corrupt(path, reason))?
        } else {
            serde_json::from_value::<Checkpoint>(value)
                .map_err(|e| AltdataError::corrupt(path, e.to_string()))?
        };

        if state.schema_version > SCHEMA_VERSION {
            return Err(AltdataError::corrupt(
                path,
                format!("unsupported schema_version {}", state.schema_version),
            ));
        }
        state
            .validate()
            .map_err(|reason| AltdataError::corrupt(path, reason))?;

        Ok(Some(state))
    }

    /// Reload state from disk, discarding the in-memory copy.
    pub fn load(&mut self) -> Result<&Checkpoint> {
        self.state = Self::read(&self.path)?
            .unwrap_or_else(|| Checkpoint::new(&self.pipeline, CheckpointStatus::Initialized));
        Ok(&self.state)
    }

    /// Persist the current state (atomic write).
    pub fn save(&mut self) -> Result<()> {
        let mut state = self.state.clone();
        state.last_updated = Utc::now();
        self.write(&state)?;
        self.state = state;
        Ok(())
    }

    /// Apply `f` to a copy of the state, persist the copy, then publish it.
    ///
    /// If `f` fails or the write fails, the visible state is unchanged.
    pub fn update<T>(&mut self, f: impl FnOnce(&mut Checkpoint) -> Result<T>) -> Result<T> {
        let mut next = self.state.clone();
        let out = f(&mut next)?;
        next.last_updated = Utc::now();
        self.write(&next)?;
        self.state = next;
        Ok(out)
    }

    /// Record one completed unit and save before returning.
    pub fn record(&mut self, result: WorkResult) -> Result<()> {
        let unit_index = result.unit_index;
        self.update(|state| state.apply_result(result))?;
        debug!(unit_index, total = self.state.total_processed, "Recorded unit");
        Ok(())
    }

    /// Mark the run complete.
    pub fn mark_complete(&mut self) -> Result<()> {
        if self.state.status == CheckpointStatus::Complete {
            return Ok(());
        }
        self.update(|state| {
            state.status = CheckpointStatus::Complete;
            Ok(())
        })
    }

    /// Archive the current file and start over.
    ///
    /// Returns the archive path if a file existed.
    pub fn reset(&mut self) -> Result<Option<PathBuf>> {
        let archived = if self.path.exists() {
            let backup = self.backup_path();
            fs::rename(&self.path, &backup)
                .map_err(|e| AltdataError::io("archiving checkpoint", e))?;
            info!(backup = %backup.display(), "Archived checkpoint");
            Some(backup)
        } else {
            None
        };

        self.state = Checkpoint::new(&self.pipeline, CheckpointStatus::Reset);
        self.save()?;
        Ok(archived)
    }

    /// Archived checkpoints next to the live file, oldest first.
    pub fn backups(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.with_suffix("_backup_*.json");
        let pattern_str = pattern.to_string_lossy();

        let mut found: Vec<PathBuf> = glob::glob(&pattern_str)
            .map_err(|e| AltdataError::Internal(format!("Invalid glob pattern: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        found.sort();
        Ok(found)
    }

    /// Get reference to state.
    pub fn state(&self) -> &Checkpoint {
        &self.state
    }

    /// Path of the live checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let mut backup = self.with_suffix(&format!("_backup_{stamp}.json"));
        let mut n = 1;
        while backup.exists() {
            backup = self.with_suffix(&format!("_backup_{stamp}_{n}.json"));
            n += 1;
        }
        backup
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint".to_string());
        self.path.with_file_name(format!("{stem}{suffix}"))
    }

    /// Write state to a temp file in the same directory, sync, rename over.
    fn write(&self, state: &Checkpoint) -> Result<()> {
        let temp_path = self.with_suffix(".tmp.json");
        {
            let file = File::create(&temp_path)
                .map_err(|e| AltdataError::io("creating temp checkpoint", e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, state)
                .map_err(|e| AltdataError::Internal(format!("Serializing checkpoint: {e}")))?;
            writer
                .flush()
                .map_err(|e| AltdataError::io("flushing temp checkpoint", e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| AltdataError::io("syncing temp checkpoint", e))?;
        }

        fs::rename(&temp_path, &self.path)
            .map_err(|e| AltdataError::io("renaming checkpoint", e))?;

        debug!(results = state.results.len(), "Checkpoint saved");
        Ok(())
    }
}
