//! Background driver for the migrate handle.
//!
//! The core performs one budgeted transaction per call; something has to
//! keep calling it. [`MigrationStepper`] is that loop: it pulls the next
//! migration from a [`MigrationSource`], runs one pass, sleeps, and repeats
//! until the source runs dry or the stepper is cancelled. When a table
//! completes, the stepper drops the source table and notifies the source.
//!
//! Engine calls are short (one budgeted transaction, tens of milliseconds)
//! and run inline; handles are single-threaded cooperative, so the stepper
//! future is not `Send` and belongs on a local task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::EngineHandle;
use crate::error::Result;
use crate::migration::info::MigrationInfo;
use crate::migration::migrate::MigrateHandle;

/// Supplies the stepper with work.
///
/// Typically implemented by the migration registry: `next_migration` returns
/// the next table that still has rows to move, and `migration_finished` is
/// the registry's chance to retire a completed table.
#[async_trait(?Send)]
pub trait MigrationSource {
    /// The next migration to work on, or `None` when nothing remains.
    async fn next_migration(&self) -> Option<Arc<MigrationInfo>>;

    /// Called after a table has been fully migrated and its source dropped.
    async fn migration_finished(&self, info: &Arc<MigrationInfo>);
}

/// Summary of one stepper run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepperReport {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub completed_at: DateTime<Utc>,

    /// Migration passes performed (one budgeted transaction each).
    pub passes: u64,

    /// Tables fully migrated during this run.
    pub tables_migrated: u64,

    /// Passes that failed with a transient error.
    pub failed_passes: u64,
}

impl StepperReport {
    /// Convert to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Drives a [`MigrateHandle`] until its source of work runs dry.
pub struct MigrationStepper<E: EngineHandle, S: MigrationSource> {
    handle: MigrateHandle<E>,
    source: S,
    interval: Duration,
    cancel: CancellationToken,
}

impl<E: EngineHandle, S: MigrationSource> MigrationStepper<E, S> {
    /// Create a stepper over a migrate handle.
    pub fn new(handle: MigrateHandle<E>, source: S) -> Self {
        Self {
            handle,
            source,
            interval: Duration::from_secs(2),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the pause between migration passes.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// A token that stops the stepper when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled or out of work.
    ///
    /// Transient pass failures are logged and retried on the next tick; a
    /// single bad pass never ends the run.
    pub async fn run(mut self) -> StepperReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut passes = 0u64;
        let mut tables_migrated = 0u64;
        let mut failed_passes = 0u64;

        info!("migration stepper {} started", run_id);
        while !self.cancel.is_cancelled() {
            let Some(migration) = self.source.next_migration().await else {
                debug!("no migration left to work on");
                break;
            };

            passes += 1;
            match self.handle.migrate_rows(&migration) {
                Ok(true) => match self.handle.drop_source_table(&migration) {
                    Ok(()) => {
                        tables_migrated += 1;
                        self.source.migration_finished(&migration).await;
                        info!("table {} fully migrated", migration.table());
                        continue;
                    }
                    Err(e) => {
                        failed_passes += 1;
                        warn!(
                            "dropping source of {} failed: {}; retrying",
                            migration.table(),
                            e
                        );
                    }
                },
                Ok(false) => {
                    debug!("table {} still has rows to migrate", migration.table());
                }
                Err(e) => {
                    failed_passes += 1;
                    warn!("migration pass for {} failed: {}", migration.table(), e);
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        let report = StepperReport {
            run_id,
            started_at,
            completed_at: Utc::now(),
            passes,
            tables_migrated,
            failed_passes,
        };
        info!(
            "migration stepper {} finished: {} table(s) in {} pass(es), {} failed",
            report.run_id, report.tables_migrated, report.passes, report.failed_passes
        );
        report
    }
}
