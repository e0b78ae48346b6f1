//! Migration orchestration.
//!
//! One [`Migrator`] drives a run end to end: precheck, the combined
//! export/import batch loop, index build, validation, and (online mode) the
//! CDC polling loop. Progress is routed through [`CheckpointManager`] after
//! every unit of work, so a crashed process resumes from the last durably
//! completed batch. Execution is single-threaded and cooperative; one batch
//! or one CDC tick runs end to end before the next begins.

use chrono::{Duration as ChronoDuration, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapters::DatabaseAdapter;
use crate::checkpoint::{BatchStatus, Checkpoint, CheckpointManager, MigrationPhase};
use crate::config::MigrationConfig;
use crate::error::{Error, Result};

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// Records written over the run, cumulative across resumes.
    pub total_processed: u64,
    /// Records counted as failed, cumulative across resumes.
    pub total_failed: u64,
    /// Wall-clock duration of this invocation in seconds.
    pub duration_secs: f64,
}

impl MigrationReport {
    /// Throughput in records per second for this invocation.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.total_processed as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Snapshot of run progress derived from the checkpoint.
#[derive(Debug, Clone)]
pub struct MigrationProgress {
    /// Current phase.
    pub phase: MigrationPhase,
    /// Source count measured at the last full-loop entry.
    pub total_records: u64,
    /// Records written.
    pub total_processed: u64,
    /// Records counted as failed.
    pub total_failed: u64,
    /// Processed share of accumulated attempts. Relative to
    /// processed+failed, not to the true source total, and `failed` is never
    /// decremented after a successful redo, so this can understate actual
    /// completion.
    pub percentage: f64,
}

/// Derive progress from a checkpoint.
#[must_use]
pub fn get_progress(checkpoint: &Checkpoint) -> MigrationProgress {
    let attempts = checkpoint.total_processed + checkpoint.total_failed;
    let percentage = if attempts == 0 {
        0.0
    } else {
        checkpoint.total_processed as f64 / attempts as f64 * 100.0
    };
    MigrationProgress {
        phase: checkpoint.phase,
        total_records: checkpoint.total_records,
        total_processed: checkpoint.total_processed,
        total_failed: checkpoint.total_failed,
        percentage,
    }
}

/// Orchestrates a migration between one source and one target adapter.
///
/// A single migrator instance assumes it is the only writer against its
/// checkpoint file and target table; running two concurrently against the
/// same pair is unsafe and must be prevented operationally.
pub struct Migrator {
    source: Box<dyn DatabaseAdapter>,
    target: Box<dyn DatabaseAdapter>,
    checkpoints: CheckpointManager,
    batch_size: usize,
    enable_cdc: bool,
    cdc_poll_interval: Duration,
    show_progress: bool,
}

impl Migrator {
    /// Build a migrator from explicit adapters. Used directly by tests; the
    /// CLI goes through [`from_config`](Self::from_config).
    #[must_use]
    pub fn new(
        source: Box<dyn DatabaseAdapter>,
        target: Box<dyn DatabaseAdapter>,
        checkpoints: CheckpointManager,
        batch_size: usize,
        enable_cdc: bool,
        cdc_poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            target,
            checkpoints,
            batch_size,
            enable_cdc,
            cdc_poll_interval,
            show_progress: false,
        }
    }

    /// Build a migrator from a migration config, constructing both adapters
    /// via the factory.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        config.validate()?;
        let source = crate::adapters::create_adapter(&config.source)?;
        let target = crate::adapters::create_adapter(&config.target)?;
        let checkpoints = CheckpointManager::new(&config.checkpoint_dir);
        Ok(Self {
            source,
            target,
            checkpoints,
            batch_size: config.batch_size,
            enable_cdc: config.enable_cdc,
            cdc_poll_interval: Duration::from_millis(config.cdc_poll_interval),
            show_progress: true,
        })
    }

    /// Connect both adapters, log the current counts and prepare the target
    /// schema. Counts are logged only; comparison happens in the validation
    /// phase.
    ///
    /// # Errors
    ///
    /// Returns an error if either adapter fails to connect or the target
    /// schema cannot be created.
    pub async fn precheck(&mut self) -> Result<()> {
        self.source.connect().await?;
        self.target.connect().await?;

        let source_count = self.source.get_total_count().await?;
        info!(
            source = %self.source.db_type(),
            target = %self.target.db_type(),
            source_count,
            "precheck: adapters connected"
        );

        self.target.init_schema().await?;
        let target_count = self.target.get_total_count().await?;
        info!(target_count, "precheck: target schema ready");
        Ok(())
    }

    /// Run a one-shot full migration: precheck, batch copy, index build and
    /// count validation. Fail-fast: the first batch error aborts the run,
    /// leaving the checkpoint positioned for resume.
    ///
    /// # Errors
    ///
    /// Returns an error on any batch failure, or [`Error::Validation`] if
    /// the final source/target counts disagree (the checkpoint phase then
    /// stays at `validation`).
    pub async fn migrate_offline(&mut self) -> Result<MigrationReport> {
        let start = std::time::Instant::now();

        let result = self.run_offline_phases().await;
        self.release_adapters().await;
        let checkpoint = result?;

        let report = MigrationReport {
            total_processed: checkpoint.total_processed,
            total_failed: checkpoint.total_failed,
            duration_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            processed = report.total_processed,
            failed = report.total_failed,
            duration_secs = report.duration_secs,
            "offline migration completed"
        );
        Ok(report)
    }

    async fn run_offline_phases(&mut self) -> Result<Checkpoint> {
        self.precheck().await?;
        let mut checkpoint = self.load_or_create_checkpoint().await?;

        self.run_full_migration(&mut checkpoint).await?;

        self.checkpoints
            .update_phase(&mut checkpoint, MigrationPhase::IndexBuild)?;
        self.target.init_schema().await?;

        self.checkpoints
            .update_phase(&mut checkpoint, MigrationPhase::Validation)?;
        self.validate_counts().await?;

        self.checkpoints
            .update_phase(&mut checkpoint, MigrationPhase::Completed)?;
        Ok(checkpoint)
    }

    /// Run a full migration (if not already past it) and then, when CDC is
    /// enabled, poll the source for new records until `shutdown` flips to
    /// `true`. An in-flight tick is drained before exit; adapters stay
    /// connected while polling and are released on shutdown or on error.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial full migration fails. CDC tick errors
    /// are logged and swallowed.
    pub async fn migrate_online(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<MigrationReport> {
        let start = std::time::Instant::now();

        let result = self.run_online_phases(&mut shutdown).await;
        self.release_adapters().await;
        let checkpoint = result?;

        Ok(MigrationReport {
            total_processed: checkpoint.total_processed,
            total_failed: checkpoint.total_failed,
            duration_secs: start.elapsed().as_secs_f64(),
        })
    }

    async fn run_online_phases(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Checkpoint> {
        self.precheck().await?;
        let mut checkpoint = self.load_or_create_checkpoint().await?;

        // A checkpoint already in cdc_sync has finished its full copy.
        if checkpoint.phase != MigrationPhase::CdcSync {
            self.run_full_migration(&mut checkpoint).await?;
        }

        if self.enable_cdc {
            self.checkpoints
                .update_phase(&mut checkpoint, MigrationPhase::CdcSync)?;
            self.run_cdc_loop(&mut checkpoint, shutdown).await?;
        } else {
            self.checkpoints
                .update_phase(&mut checkpoint, MigrationPhase::Completed)?;
        }
        Ok(checkpoint)
    }

    /// Best-effort release of both adapters, also on error paths, so an
    /// aborted run does not leak connection pools. Disconnect failures are
    /// logged and swallowed to keep the run's own error primary.
    async fn release_adapters(&mut self) {
        if let Err(e) = self.source.disconnect().await {
            warn!(error = %e, "source disconnect failed");
        }
        if let Err(e) = self.target.disconnect().await {
            warn!(error = %e, "target disconnect failed");
        }
    }

    /// Current progress derived from the persisted checkpoint, or `None`
    /// before the first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file cannot be read.
    pub fn progress(&self) -> Result<Option<MigrationProgress>> {
        Ok(self.checkpoints.load()?.map(|cp| get_progress(&cp)))
    }

    /// Clear the on-disk checkpoint. Does not signal a running process; it
    /// only forces the next run to start from scratch.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn reset(&self) -> Result<()> {
        self.checkpoints.clear()
    }

    async fn load_or_create_checkpoint(&mut self) -> Result<Checkpoint> {
        if let Some(checkpoint) = self.checkpoints.load()? {
            info!(
                phase = ?checkpoint.phase,
                processed = checkpoint.total_processed,
                "resuming from existing checkpoint"
            );
            return Ok(checkpoint);
        }
        let total = self.source.get_total_count().await?;
        self.checkpoints.create_initial(total)
    }

    /// The combined export/import loop. Reads a page of records past the
    /// resume cursor, upserts it into the target, and persists every batch
    /// transition before moving on.
    async fn run_full_migration(&mut self, checkpoint: &mut Checkpoint) -> Result<()> {
        // Measured once at loop entry, not re-queried per batch.
        let total = self.source.get_total_count().await?;
        checkpoint.total_records = total;
        self.checkpoints
            .update_phase(checkpoint, MigrationPhase::FullImport)?;

        // The batch id sequence is re-derived from the completed count on
        // resume, so an unfinished batch keeps its id across attempts.
        let mut batch_index = checkpoint.completed_batches();
        let mut cursor = checkpoint.resume_cursor().map(ToString::to_string);

        let progress = self.progress_bar(total, checkpoint.total_processed);

        while checkpoint.total_processed < total {
            let batch_id = format!("batch-{batch_index}");
            let limit = self.batch_size;

            let records = match self.source.read_batch(cursor.as_deref(), limit).await {
                Ok(records) => records,
                Err(e) => {
                    self.record_batch_failure(checkpoint, &batch_id, cursor.as_deref(), limit)?;
                    return Err(e);
                }
            };

            if records.is_empty() {
                // The source shrank since `total` was measured.
                info!(batch_id, "source exhausted early, stopping full copy");
                break;
            }

            let start_id = records[0].id.clone();
            let end_id = records[records.len() - 1].id.clone();
            self.mark_batch_processing(checkpoint, &batch_id, &start_id, &end_id)?;

            if let Err(e) = self.target.write_batch(&records).await {
                // The failed count is the requested limit; the true number of
                // affected records is unknown at this point.
                self.checkpoints.update_batch(
                    checkpoint,
                    &batch_id,
                    BatchStatus::Failed,
                    None,
                    Some(limit as u64),
                )?;
                self.checkpoints
                    .update_progress(checkpoint, 0, limit as u64)?;
                return Err(e);
            }

            let written = records.len() as u64;
            self.checkpoints.update_batch(
                checkpoint,
                &batch_id,
                BatchStatus::Completed,
                Some(written),
                Some(0),
            )?;
            self.checkpoints.update_progress(checkpoint, written, 0)?;

            progress.inc(written);
            cursor = Some(end_id);
            batch_index += 1;
        }

        progress.finish_and_clear();
        info!(
            batches = checkpoint.completed_batches(),
            processed = checkpoint.total_processed,
            "full copy finished"
        );
        Ok(())
    }

    /// Create the batch entry if this is its first attempt, then mark it
    /// processing. A retried batch refreshes its id range: the re-read may
    /// not return the same page the failed attempt saw.
    fn mark_batch_processing(
        &self,
        checkpoint: &mut Checkpoint,
        batch_id: &str,
        start_id: &str,
        end_id: &str,
    ) -> Result<()> {
        if let Some(batch) = checkpoint
            .batches
            .iter_mut()
            .find(|b| b.batch_id == batch_id)
        {
            batch.start_id = start_id.to_string();
            batch.end_id = end_id.to_string();
        } else {
            self.checkpoints
                .add_batch(checkpoint, batch_id, start_id, end_id)?;
        }
        self.checkpoints
            .update_batch(checkpoint, batch_id, BatchStatus::Processing, None, None)
    }

    /// Record a read failure against the batch that was about to run.
    fn record_batch_failure(
        &self,
        checkpoint: &mut Checkpoint,
        batch_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<()> {
        let exists = checkpoint.batches.iter().any(|b| b.batch_id == batch_id);
        if !exists {
            self.checkpoints
                .add_batch(checkpoint, batch_id, cursor.unwrap_or(""), "")?;
        }
        self.checkpoints.update_batch(
            checkpoint,
            batch_id,
            BatchStatus::Failed,
            None,
            Some(limit as u64),
        )?;
        self.checkpoints
            .update_progress(checkpoint, 0, limit as u64)
    }

    async fn validate_counts(&self) -> Result<()> {
        let source_count = self.source.get_total_count().await?;
        let target_count = self.target.get_total_count().await?;
        if source_count != target_count {
            return Err(Error::Validation(format!(
                "count mismatch: source={source_count} target={target_count}"
            )));
        }
        info!(count = source_count, "validation passed");
        Ok(())
    }

    /// Time-window polling loop. Tick errors are logged and swallowed so a
    /// transient fault never terminates background replication; the sync
    /// window is not advanced past a failed tick, so its records are
    /// re-read on the next attempt.
    async fn run_cdc_loop(
        &mut self,
        checkpoint: &mut Checkpoint,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut last_sync = checkpoint
            .last_timestamp
            .unwrap_or_else(|| Utc::now() - ChronoDuration::hours(24));

        info!(since = %last_sync, interval = ?self.cdc_poll_interval, "entering CDC sync");

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, draining CDC loop");
                break;
            }

            let now = Utc::now();
            match self.cdc_tick(checkpoint, last_sync, now).await {
                Ok(synced) => {
                    if synced > 0 {
                        info!(synced, watermark = %now, "CDC tick applied");
                    }
                    last_sync = now;
                }
                Err(e) => {
                    warn!(error = %e, "CDC tick failed, will retry next poll");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.cdc_poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        Ok(())
    }

    async fn cdc_tick(
        &mut self,
        checkpoint: &mut Checkpoint,
        since: chrono::DateTime<Utc>,
        now: chrono::DateTime<Utc>,
    ) -> Result<u64> {
        let records = self.source.read_by_time_range(since, now).await?;
        if records.is_empty() {
            return Ok(0);
        }

        self.target.write_batch(&records).await?;
        let written = records.len() as u64;
        checkpoint.last_timestamp = Some(now);
        self.checkpoints.update_progress(checkpoint, written, 0)?;
        Ok(written)
    }

    fn progress_bar(&self, total: u64, position: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_position(position);
        pb
    }
}
