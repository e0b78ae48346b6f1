//! Durable migration checkpoints.
//!
//! Progress is tracked in a single JSON file under the configured checkpoint
//! directory. Every mutation is persisted immediately with an atomic
//! whole-file replace (write to a temp file, then rename), so a crashed run
//! can always reconstruct exactly which batches were durably completed. A
//! batch left in `processing` is treated as unconfirmed and redone in full;
//! upsert writes make that safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// File name of the checkpoint inside the checkpoint directory.
pub const CHECKPOINT_FILE: &str = "migration-checkpoint.json";

/// Phases of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// Connectivity and schema preparation.
    Precheck,
    /// Reading the full corpus from the source.
    FullExport,
    /// Writing the full corpus to the target.
    FullImport,
    /// Target index construction.
    IndexBuild,
    /// Source/target count comparison.
    Validation,
    /// Continuous incremental sync.
    CdcSync,
    /// Terminal phase of a successful offline run.
    Completed,
}

/// Status of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created but not yet started.
    Pending,
    /// Read/write in flight; not confirmed durable.
    Processing,
    /// Read and written successfully.
    Completed,
    /// Aborted the run.
    Failed,
}

/// Progress record for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCheckpoint {
    /// Deterministic id, `batch-{index}`.
    pub batch_id: String,
    /// First record id in the batch.
    pub start_id: String,
    /// Last record id in the batch.
    pub end_id: String,
    /// Records written.
    pub processed: u64,
    /// Records counted as failed.
    pub failed: u64,
    /// Lifecycle status.
    pub status: BatchStatus,
    /// When the batch started.
    pub start_time: DateTime<Utc>,
    /// When the batch reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Durable progress marker for a whole migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Current phase.
    pub phase: MigrationPhase,
    /// Source record count measured at run start.
    pub total_records: u64,
    /// Records successfully written, cumulative. Never decremented.
    pub total_processed: u64,
    /// Records counted as failed, cumulative. Never decremented.
    pub total_failed: u64,
    /// When the run started.
    pub start_time: DateTime<Utc>,
    /// Refreshed on every save.
    pub last_update_time: DateTime<Utc>,
    /// CDC watermark.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Per-batch progress, in batch-index order.
    pub batches: Vec<BatchCheckpoint>,
}

impl Checkpoint {
    /// Id cursor to resume full migration from: the `end_id` of the last
    /// completed batch. Batches are appended in index order, so the last
    /// completed entry carries the high-water id.
    #[must_use]
    pub fn resume_cursor(&self) -> Option<&str> {
        self.batches
            .iter()
            .rev()
            .find(|b| b.status == BatchStatus::Completed)
            .map(|b| b.end_id.as_str())
    }

    /// Number of batches in a terminal `Completed` state.
    #[must_use]
    pub fn completed_batches(&self) -> usize {
        self.batches
            .iter()
            .filter(|b| b.status == BatchStatus::Completed)
            .count()
    }
}

/// Owner of the on-disk checkpoint file.
///
/// The manager is the sole writer of the file; the migrator owns the
/// in-memory [`Checkpoint`] for the duration of a run and routes every
/// mutation through here so it is persisted before the run proceeds.
pub struct CheckpointManager {
    dir: PathBuf,
    path: PathBuf,
}

impl CheckpointManager {
    /// Create a manager rooted at `dir`. The directory is created lazily on
    /// the first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(CHECKPOINT_FILE);
        Self { dir, path }
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the checkpoint, refreshing `last_update_time`.
    ///
    /// The file is replaced atomically: the serialized checkpoint is written
    /// to a temp file in the same directory and renamed over the target, so
    /// a concurrent `load` never observes a partial write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] if the directory or file cannot be
    /// written.
    pub fn save(&self, checkpoint: &mut Checkpoint) -> Result<()> {
        checkpoint.last_update_time = Utc::now();

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Checkpoint(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        let json = serde_json::to_string_pretty(checkpoint)?;
        let tmp = self.dir.join(format!("{CHECKPOINT_FILE}.tmp"));
        std::fs::write(&tmp, json)
            .map_err(|e| Error::Checkpoint(format!("cannot write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            Error::Checkpoint(format!("cannot replace {}: {}", self.path.display(), e))
        })?;

        debug!(path = %self.path.display(), "checkpoint saved");
        Ok(())
    }

    /// Load the checkpoint, or `None` if no file exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Checkpoint(format!("cannot read {}: {}", self.path.display(), e)))?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .map_err(|e| Error::Checkpoint(format!("corrupt checkpoint: {e}")))?;
        Ok(Some(checkpoint))
    }

    /// Create and persist a fresh checkpoint for a run over `total_records`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial save fails.
    pub fn create_initial(&self, total_records: u64) -> Result<Checkpoint> {
        let now = Utc::now();
        let mut checkpoint = Checkpoint {
            phase: MigrationPhase::Precheck,
            total_records,
            total_processed: 0,
            total_failed: 0,
            start_time: now,
            last_update_time: now,
            last_timestamp: None,
            batches: Vec::new(),
        };
        self.save(&mut checkpoint)?;
        Ok(checkpoint)
    }

    /// Advance the phase and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the save fails.
    pub fn update_phase(&self, checkpoint: &mut Checkpoint, phase: MigrationPhase) -> Result<()> {
        checkpoint.phase = phase;
        self.save(checkpoint)
    }

    /// Add `processed`/`failed` to the running totals and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the save fails.
    pub fn update_progress(
        &self,
        checkpoint: &mut Checkpoint,
        processed: u64,
        failed: u64,
    ) -> Result<()> {
        checkpoint.total_processed += processed;
        checkpoint.total_failed += failed;
        self.save(checkpoint)
    }

    /// Register a new pending batch and persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the save fails.
    pub fn add_batch(
        &self,
        checkpoint: &mut Checkpoint,
        batch_id: &str,
        start_id: &str,
        end_id: &str,
    ) -> Result<()> {
        checkpoint.batches.push(BatchCheckpoint {
            batch_id: batch_id.to_string(),
            start_id: start_id.to_string(),
            end_id: end_id.to_string(),
            processed: 0,
            failed: 0,
            status: BatchStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
        });
        self.save(checkpoint)
    }

    /// Transition a batch's status (optionally recording counts) and persist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] if the batch id is unknown or the save
    /// fails.
    pub fn update_batch(
        &self,
        checkpoint: &mut Checkpoint,
        batch_id: &str,
        status: BatchStatus,
        processed: Option<u64>,
        failed: Option<u64>,
    ) -> Result<()> {
        let batch = checkpoint
            .batches
            .iter_mut()
            .find(|b| b.batch_id == batch_id)
            .ok_or_else(|| Error::Checkpoint(format!("unknown batch {batch_id}")))?;

        batch.status = status;
        if let Some(p) = processed {
            batch.processed = p;
        }
        if let Some(f) = failed {
            batch.failed = f;
        }
        if matches!(status, BatchStatus::Completed | BatchStatus::Failed) {
            batch.end_time = Some(Utc::now());
        }
        self.save(checkpoint)
    }

    /// Delete the checkpoint file. The next run starts a fresh migration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] if the file exists but cannot be
    /// removed.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                Error::Checkpoint(format!("cannot remove {}: {}", self.path.display(), e))
            })?;
        }
        Ok(())
    }
}
