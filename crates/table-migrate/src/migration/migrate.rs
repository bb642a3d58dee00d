//! The background worker handle that moves rows.
//!
//! A [`MigrateHandle`] performs one-row migrations inside short transactions.
//! Each transaction keeps migrating rows until either the source is drained
//! or the adaptive time budget derived from previous transactions runs out,
//! so application writers are never blocked for long.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::core::schema::Schema;
use crate::engine::{EngineHandle, StatementHandle};
use crate::error::Result;
use crate::migration::attach::SourceAttachment;
use crate::migration::info::MigrationInfo;
use crate::migration::pacing::{PacingConfig, SampleRing};

/// Background handle performing incremental row movement.
pub struct MigrateHandle<E: EngineHandle> {
    engine: E,
    attachment: SourceAttachment,
    migrating: Option<Arc<MigrationInfo>>,
    migrate_statement: E::Stmt,
    remove_migrated_statement: E::Stmt,
    samples: SampleRing,
    pacing: PacingConfig,
}

impl<E: EngineHandle> MigrateHandle<E> {
    /// Create a migrate handle over an engine connection.
    pub fn new(engine: E) -> Self {
        Self::with_pacing(engine, PacingConfig::default())
    }

    /// Create a migrate handle with explicit pacing knobs.
    pub fn with_pacing(engine: E, pacing: PacingConfig) -> Self {
        let migrate_statement = engine.new_statement();
        let remove_migrated_statement = engine.new_statement();
        Self {
            engine,
            attachment: SourceAttachment::new(),
            migrating: None,
            migrate_statement,
            remove_migrated_statement,
            samples: SampleRing::new(),
            pacing,
        }
    }

    /// The underlying engine connection.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Switch the attached source schema to the info's, detaching any other.
    ///
    /// Clears the per-row statements unconditionally: they reference the
    /// previously attached schema.
    pub fn re_attach(&mut self, info: &MigrationInfo) -> Result<()> {
        debug_assert!(!self.engine.is_in_transaction());
        self.migrating = None;
        self.finalize_migration_statements();
        self.attachment.re_attach(&self.engine, info.user())?;
        Ok(())
    }

    /// Attach the source database of a migration up front.
    pub fn attach_source_database(&mut self, info: &MigrationInfo) -> Result<()> {
        self.re_attach(info)
    }

    /// All user tables of the main schema, excluding builtin objects.
    pub fn get_all_tables(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .engine
            .string_values(&MigrationInfo::statement_for_selecting_all_tables(), 0)?)
    }

    /// Drop the drained source table. Called by the registry once
    /// [`migrate_rows`](Self::migrate_rows) has reported completion.
    pub fn drop_source_table(&mut self, info: &Arc<MigrationInfo>) -> Result<()> {
        self.re_attach(info)?;
        self.migrating = Some(info.clone());
        self.engine
            .execute(info.statement_for_dropping_source_table())?;
        info!("dropped source table {} of {}", info.source_table(), info.table());
        Ok(())
    }

    /// Migrate rows for one budgeted transaction.
    ///
    /// Returns `Ok(true)` when no un-migrated row remains (migration of this
    /// table is complete), `Ok(false)` when rows remain, and an error on any
    /// engine failure (the caller retries on its next tick).
    ///
    /// A missing destination table also reports completion: the destination
    /// is only ever dropped after the whole migration (source drop included)
    /// has finished, so its absence means everything was already cleaned up.
    /// Callers must not drop the destination while the source still holds
    /// rows; this layer does not detect that misuse.
    pub fn migrate_rows(&mut self, info: &Arc<MigrationInfo>) -> Result<bool> {
        if !self.engine.table_exists(&Schema::Main, info.table())? {
            return Ok(true);
        }

        if !self
            .migrating
            .as_ref()
            .is_some_and(|migrating| Arc::ptr_eq(migrating, info))
        {
            self.re_attach(info)?;
            self.migrating = Some(info.clone());
        }

        if !self.migrate_statement.is_prepared() {
            self.migrate_statement
                .prepare(info.statement_for_migrating_one_row())?;
        }
        if !self.remove_migrated_statement.is_prepared() {
            self.remove_migrated_statement
                .prepare(info.statement_for_deleting_migrated_one_row())?;
        }

        let budget = self.samples.budget(&self.pacing);
        let before = Instant::now();
        self.engine.begin_transaction()?;

        let mut rows = 0u64;
        let within;
        let migrated = loop {
            let migrated = self.migrate_row();
            let cost = before.elapsed();
            match migrated {
                Ok(false) => {
                    rows += 1;
                    if cost < budget {
                        continue;
                    }
                    within = cost;
                    break Ok(false);
                }
                other => {
                    within = cost;
                    break other;
                }
            }
        };

        match migrated {
            Ok(done) => {
                self.engine.commit_transaction()?;
                let whole = before.elapsed();
                self.samples.record(within, whole);
                debug!(
                    "migrated {} row(s) of {} in {:?} (budget {:?}, done: {})",
                    rows,
                    info.table(),
                    whole,
                    budget,
                    done
                );
                Ok(done)
            }
            Err(e) => {
                self.engine.rollback_transaction();
                Err(e)
            }
        }
    }

    /// Move one row and delete it from the source, atomically within the
    /// surrounding transaction.
    ///
    /// `Ok(true)` means the source held no un-migrated row; `Ok(false)` means
    /// one row was moved and more may remain.
    fn migrate_row(&mut self) -> Result<bool> {
        debug_assert!(self.migrate_statement.is_prepared());
        debug_assert!(self.remove_migrated_statement.is_prepared());
        debug_assert!(self.engine.is_in_transaction());

        self.migrate_statement.reset();
        self.remove_migrated_statement.reset();
        self.migrate_statement.step()?;
        if self.engine.changes() == 0 {
            return Ok(true);
        }
        self.remove_migrated_statement.step()?;
        Ok(false)
    }

    fn finalize_migration_statements(&mut self) {
        self.migrate_statement.finalize();
        self.remove_migrated_statement.finalize();
    }
}

impl<E: EngineHandle> Drop for MigrateHandle<E> {
    fn drop(&mut self) {
        self.finalize_migration_statements();
    }
}
