//! The application-facing handle during migration.
//!
//! A [`MigratingHandle`] is the execution site of every application
//! statement while tables are being migrated. It makes a destination table
//! behave as if it already contained every row of its source: reads go
//! through a temp-schema unioned view, metadata queries are filtered down to
//! the columns both sides share, and schema changes are mirrored to the
//! source. The set of views and attached schemas is reconciled against the
//! registry through the [`Binder`] contract.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::core::identifier::qualify;
use crate::core::schema::{Schema, SCHEMA_PREFIX, UNIONED_VIEW_PREFIX};
use crate::engine::{EngineHandle, ErrorCode, StatementHandle};
use crate::error::{MigrateError, Result};
use crate::migration::attach::attach_database;
use crate::migration::binder::{Binder, MigratingInfos};
use crate::migration::info::{MigrationInfo, MigrationUserInfo};

/// Pre-built probe forcing a lock upgrade after an in-transaction attach.
/// Expected to fail inside a transaction; the failure is marked ignorable.
const SYNCHRONOUS_TRANSACTION_STATEMENT: &str = "BEGIN IMMEDIATE";

/// Name of the engine's catalog table.
const MASTER_TABLE: &str = "sqlite_master";

/// Stable identity of a statement issued by a migrating handle.
///
/// Slots are reused after [`MigratingHandle::return_statement`], so an id is
/// only valid until the statement it names is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementId(usize);

struct MigratingStatement<S> {
    statement: S,
    /// Permits silently widening the unioned view when this statement's
    /// preparation trips over a missing column.
    auto_add_column: bool,
}

/// Application-facing handle that fuses destination and source tables.
pub struct MigratingHandle<E: EngineHandle, B: Binder> {
    engine: E,
    binder: B,
    bound: HashMap<String, Option<Arc<MigrationInfo>>>,
    created_new_view_in_transaction: bool,
    statements: Vec<Option<MigratingStatement<E::Stmt>>>,
    main_statement: StatementId,
}

impl<E: EngineHandle, B: Binder> MigratingHandle<E, B> {
    /// Create a migrating handle over an engine connection, bound to the
    /// registry through `binder`.
    pub fn new(engine: E, binder: B) -> Self {
        let mut handle = Self {
            engine,
            binder,
            bound: HashMap::new(),
            created_new_view_in_transaction: false,
            statements: Vec::new(),
            main_statement: StatementId(0),
        };
        handle.main_statement = handle.statement();
        handle
    }

    /// The underlying engine connection.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The handle's primary statement.
    pub fn main_statement(&self) -> StatementId {
        self.main_statement
    }

    // ===== Binding =====

    /// The migration a table is part of: `Ok(Some(..))` when it is being
    /// migrated, `Ok(None)` for a normal table.
    ///
    /// Results are cached; a miss runs a full binding cycle on the registry
    /// and, when the registry commits, reconciles views and schemas before
    /// the result is cached.
    pub fn binding_info(&mut self, table: &str) -> Result<Option<Arc<MigrationInfo>>> {
        if let Some(bound) = self.bound.get(table) {
            return Ok(bound.clone());
        }

        self.binder.start_binding();
        let result = self.binder.bind_table(table);
        let need_binding = matches!(&result, Ok(Some(_)));
        let stopped = self.binder.stop_binding(need_binding);
        let info = result?;

        match stopped {
            Ok(Some(migratings)) => {
                if let Err(e) = self.bind_infos(&migratings) {
                    self.binder.set_need_rebind();
                    return Err(e);
                }
                self.bound.clear();
            }
            Ok(None) => {}
            Err(e) => {
                if need_binding {
                    return Err(e);
                }
            }
        }

        self.bound.insert(table.to_string(), info.clone());
        Ok(info)
    }

    /// Confirm that the registry-bound info agrees with a caller-supplied
    /// source table.
    pub fn check_source_table(&mut self, table: &str, source_table: &str) -> Result<bool> {
        Ok(self
            .binding_info(table)?
            .is_some_and(|info| info.source_table() == source_table))
    }

    /// The object reads of `table` should target: its unioned view while it
    /// is being migrated, the table itself otherwise.
    pub fn read_target(&mut self, table: &str) -> Result<String> {
        Ok(match self.binding_info(table)? {
            Some(info) => info.unioned_view().to_string(),
            None => table.to_string(),
        })
    }

    // ===== Meta =====

    /// Column names of a table, restricted for migrated main-schema tables
    /// to the intersection of destination and source so callers never see a
    /// column that exists on only one side.
    pub fn columns_of(&mut self, schema: &Schema, table: &str) -> Result<std::collections::BTreeSet<String>> {
        let mut columns = self.engine.columns_of(schema, table)?;
        if !schema.is_main() {
            return Ok(columns);
        }
        let Some(info) = self.binding_info(table)? else {
            return Ok(columns);
        };
        let source = self
            .engine
            .columns_of(info.schema_for_source_database(), info.source_table())?;
        columns.retain(|column| source.contains(column));
        Ok(columns)
    }

    /// Add a column to a table and, when the table is under migration, to
    /// its source as well. Destination first; a source that lags behind is
    /// hidden by the intersection discipline of
    /// [`columns_of`](Self::columns_of).
    pub fn add_column(&mut self, schema: &Schema, table: &str, column_def: &str) -> Result<()> {
        self.engine.execute(&format!(
            "ALTER TABLE {} ADD COLUMN {}",
            qualify(schema.name(), table)?,
            column_def
        ))?;
        if !schema.is_main() {
            return Ok(());
        }
        let Some(info) = self.binding_info(table)? else {
            return Ok(());
        };
        self.engine.execute(&format!(
            "ALTER TABLE {} ADD COLUMN {}",
            qualify(info.schema_for_source_database().name(), info.source_table())?,
            column_def
        ))?;
        Ok(())
    }

    /// Recreate a table's unioned view with a new column projection, inside
    /// a transaction when none is already open.
    pub fn rebind_union_view(&mut self, table: &str, columns: &[String]) -> Result<()> {
        let Some(info) = self.binding_info(table)? else {
            return Ok(());
        };
        let drop = MigrationInfo::statement_for_dropping_unioned_view_named(info.unioned_view())?;
        let create = info.statement_for_creating_unioned_view_with(columns)?;
        self.run_transaction_if_not_in_transaction(|engine| {
            engine.execute(&drop)?;
            engine.execute(&create)?;
            Ok(())
        })
    }

    /// Attach the source database of a migration if it is not attached yet.
    pub fn attach_source_database(&mut self, info: &MigrationUserInfo) -> Result<()> {
        let schema = info.schema_for_source_database();
        if schema.is_main() {
            return Ok(());
        }
        let attached = self
            .engine
            .string_values(MigrationInfo::statement_for_selecting_database_list(), 1)?;
        if !attached.contains(schema.name()) {
            attach_database(&self.engine, info)?;
            self.try_synchronous_transaction_after_attached()?;
        }
        Ok(())
    }

    // ===== Binder reconciliation =====

    /// Reconcile views and attached schemas with the registry's desired set.
    ///
    /// Views go first: a newly created view only records name references and
    /// does not validate until executed, so it may mention a schema attached
    /// a moment later.
    pub fn bind_infos(&mut self, migratings: &MigratingInfos) -> Result<()> {
        self.rebind_views(migratings)?;
        self.rebind_schemas(migratings)
    }

    fn rebind_views(&mut self, migratings: &MigratingInfos) -> Result<()> {
        let mut desired: HashMap<&str, &Arc<MigrationInfo>> = migratings
            .values()
            .map(|info| (info.unioned_view(), info))
            .collect();

        if self.engine.table_exists(&Schema::Temp, MASTER_TABLE)? {
            let existing = self
                .engine
                .string_values(&MigrationInfo::statement_for_selecting_unioned_views(), 0)?;
            for view in existing {
                debug_assert!(view.starts_with(UNIONED_VIEW_PREFIX));
                if desired.remove(view.as_str()).is_none() {
                    // No longer needed.
                    self.engine.execute(
                        &MigrationInfo::statement_for_dropping_unioned_view_named(&view)?,
                    )?;
                    debug!("dropped stale unioned view {}", view);
                }
            }
        }

        let mut has_new_view = false;
        for info in desired.values() {
            self.engine
                .execute(info.statement_for_creating_unioned_view())?;
            has_new_view = true;
        }
        if has_new_view && self.engine.is_in_transaction() {
            self.created_new_view_in_transaction = true;
        }
        Ok(())
    }

    fn rebind_schemas(&mut self, migratings: &MigratingInfos) -> Result<()> {
        let mut desired: HashMap<&str, &Arc<MigrationInfo>> = migratings
            .values()
            .filter(|info| info.is_cross_database())
            .map(|info| (info.schema_for_source_database().name(), info))
            .collect();

        let existing = self
            .engine
            .string_values(MigrationInfo::statement_for_selecting_database_list(), 1)?;
        for schema in existing {
            if !schema.starts_with(SCHEMA_PREFIX) {
                continue;
            }
            if desired.remove(schema.as_str()).is_none() && !self.engine.is_in_transaction() {
                // Attached schemas cannot be detached mid-transaction; a
                // stale one is left for a later reconciliation.
                self.engine
                    .execute(&MigrationInfo::statement_for_detaching_schema_named(&schema)?)?;
                debug!("detached stale schema {}", schema);
            }
        }

        let mut attached = false;
        for info in desired.values() {
            attach_database(&self.engine, info.user())?;
            attached = true;
        }
        if attached {
            return self.try_synchronous_transaction_after_attached();
        }
        Ok(())
    }

    fn try_synchronous_transaction_after_attached(&self) -> Result<()> {
        if !self.engine.is_in_transaction() {
            return Ok(());
        }
        self.engine.mark_error_as_ignorable(ErrorCode::Error);
        let probed = self.engine.execute(SYNCHRONOUS_TRANSACTION_STATEMENT);
        self.engine.mark_error_as_unignorable();
        match probed {
            Ok(()) => Ok(()),
            Err(e) if e.ignorable => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ===== Transactions =====

    /// Open a transaction on the underlying connection.
    pub fn begin_transaction(&mut self) -> Result<()> {
        Ok(self.engine.begin_transaction()?)
    }

    /// Commit; when this exits the outermost transaction, view creations are
    /// durable and the in-transaction flag is cleared.
    pub fn commit_transaction(&mut self) -> Result<()> {
        self.engine.commit_transaction()?;
        if !self.engine.is_in_transaction() {
            self.created_new_view_in_transaction = false;
        }
        Ok(())
    }

    /// Roll back; a view created inside the transaction is gone now, so the
    /// registry's cached beliefs are stale and a rebind is requested.
    pub fn rollback_transaction(&mut self) {
        self.engine.rollback_transaction();
        if self.created_new_view_in_transaction {
            self.binder.set_need_rebind();
            self.bound.clear();
            self.created_new_view_in_transaction = false;
        }
    }

    fn run_transaction_if_not_in_transaction(
        &self,
        f: impl FnOnce(&E) -> Result<()>,
    ) -> Result<()> {
        if self.engine.is_in_transaction() {
            return f(&self.engine);
        }
        self.engine.begin_transaction()?;
        match f(&self.engine) {
            Ok(()) => Ok(self.engine.commit_transaction()?),
            Err(e) => {
                self.engine.rollback_transaction();
                Err(e)
            }
        }
    }

    // ===== Statements =====

    /// Issue a new child statement; auto add column is enabled on all of
    /// them.
    pub fn statement(&mut self) -> StatementId {
        let statement = MigratingStatement {
            statement: self.engine.new_statement(),
            auto_add_column: true,
        };
        match self.statements.iter().position(Option::is_none) {
            Some(slot) => {
                self.statements[slot] = Some(statement);
                StatementId(slot)
            }
            None => {
                self.statements.push(Some(statement));
                StatementId(self.statements.len() - 1)
            }
        }
    }

    /// Finalize and release a child statement; its slot is reused.
    pub fn return_statement(&mut self, id: StatementId) {
        if let Some(slot) = self.statements.get_mut(id.0) {
            if let Some(mut statement) = slot.take() {
                statement.statement.finalize();
            }
        }
    }

    /// Direct access to a child statement for binding and stepping.
    pub fn statement_mut(&mut self, id: StatementId) -> Option<&mut E::Stmt> {
        self.statements
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|s| &mut s.statement)
    }

    /// Prepare a child statement.
    ///
    /// When preparation fails with the distinguished missing-column error
    /// and the statement permits it, the unioned view of `table` is widened
    /// to `columns` and the preparation retried once.
    pub fn prepare_statement(
        &mut self,
        id: StatementId,
        sql: &str,
        table: &str,
        columns: &[String],
    ) -> Result<()> {
        let auto_add_column = self
            .statements
            .get(id.0)
            .and_then(Option::as_ref)
            .map(|s| s.auto_add_column)
            .unwrap_or(false);
        match self.try_prepare(id, sql) {
            Err(e) if auto_add_column && e.is_no_such_column() => {
                debug!("widening unioned view of {} and retrying prepare", table);
                self.rebind_union_view(table, columns)?;
                self.try_prepare(id, sql)
            }
            other => other,
        }
    }

    fn try_prepare(&mut self, id: StatementId, sql: &str) -> Result<()> {
        let statement = self
            .statements
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| MigrateError::misuse(format!("unknown statement {:?}", id)))?;
        Ok(statement.statement.prepare(sql)?)
    }

    /// Finalize every child statement, keeping the slots.
    pub fn finalize_statements(&mut self) {
        for statement in self.statements.iter_mut().flatten() {
            statement.statement.finalize();
        }
    }

    /// Reset every prepared child statement.
    pub fn reset_all_statements(&mut self) {
        for statement in self.statements.iter_mut().flatten() {
            if statement.statement.is_prepared() {
                statement.statement.reset();
            }
        }
    }
}
