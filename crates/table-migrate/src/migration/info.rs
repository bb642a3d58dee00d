//! Migration descriptors and their pre-rendered statements.
//!
//! A [`MigrationUserInfo`] names one (source, destination) pair: which table
//! to fill, which table to drain, and optionally which database file (and
//! cipher) the source lives in. A [`MigrationInfo`] is the immutable,
//! fully-rendered form: every statement the handles will ever need for the
//! pair is built once here, so the hot paths only hand SQL text to the
//! engine.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use bytes::Bytes;

use crate::core::identifier::{qualify, quote_ident, quote_literal};
use crate::core::schema::{Schema, BUILTIN_PREFIX, UNIONED_VIEW_PREFIX};
use crate::error::{MigrateError, Result};

/// User-supplied description of a single table migration.
///
/// This is the attach-level half of a descriptor: it knows where the source
/// lives and how to attach it, but nothing about columns or views.
#[derive(Debug, Clone)]
pub struct MigrationUserInfo {
    table: String,
    source_table: String,
    source_database: Option<PathBuf>,
    source_cipher: Option<Bytes>,
    raw_source_cipher: OnceLock<Bytes>,
    schema: Schema,
}

impl MigrationUserInfo {
    /// Describe a migration whose source table lives in the main database.
    pub fn new(table: impl Into<String>, source_table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            source_table: source_table.into(),
            source_database: None,
            source_cipher: None,
            raw_source_cipher: OnceLock::new(),
            schema: Schema::Main,
        }
    }

    /// Move the source into a separate database file; the attached schema
    /// name is derived from the path.
    pub fn with_source_database(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.schema = Schema::for_source_path(&path);
        self.source_database = Some(path);
        self
    }

    /// Set the cipher key of the source database file.
    pub fn with_source_cipher(mut self, cipher: impl Into<Bytes>) -> Self {
        self.source_cipher = Some(cipher.into());
        self
    }

    /// Destination table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Source table name.
    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    /// Path of the source database file, if the source is cross-database.
    pub fn source_database(&self) -> Option<&Path> {
        self.source_database.as_deref()
    }

    /// Cipher key of the source database file, if any.
    pub fn source_cipher(&self) -> Option<&Bytes> {
        self.source_cipher.as_ref()
    }

    /// The schema the source table is reachable under.
    pub fn schema_for_source_database(&self) -> &Schema {
        &self.schema
    }

    /// True iff the source resides in a different file than the main database.
    pub fn is_cross_database(&self) -> bool {
        !self.schema.is_main()
    }

    /// Whether the post-KDF cipher key still needs to be read back after a
    /// successful attach.
    pub fn need_raw_source_cipher(&self) -> bool {
        self.source_cipher.is_some() && self.raw_source_cipher.get().is_none()
    }

    /// Store the post-KDF cipher key obtained from the engine. Later calls
    /// are no-ops.
    pub fn set_raw_source_cipher(&self, key: Bytes) {
        let _ = self.raw_source_cipher.set(key);
    }

    /// The post-KDF cipher key, once read back.
    pub fn raw_source_cipher(&self) -> Option<&Bytes> {
        self.raw_source_cipher.get()
    }

    /// `ATTACH DATABASE '<path>' AS "<schema>" [KEY ?]`.
    ///
    /// The cipher is not inlined: it is bound as BLOB parameter 1 at
    /// execution time.
    pub fn statement_for_attaching_schema(&self) -> Result<String> {
        let path = self.source_database.as_ref().ok_or_else(|| {
            MigrateError::misuse(format!(
                "table {} migrates within the main database; nothing to attach",
                self.table
            ))
        })?;
        let mut sql = format!(
            "ATTACH DATABASE {} AS {}",
            quote_literal(&path.to_string_lossy()),
            quote_ident(self.schema.name())?
        );
        if self.source_cipher.is_some() {
            sql.push_str(" KEY ?");
        }
        Ok(sql)
    }

    /// `DETACH DATABASE "<schema>"`.
    pub fn statement_for_detaching_schema(&self) -> Result<String> {
        MigrationInfo::statement_for_detaching_schema_named(self.schema.name())
    }
}

/// Immutable descriptor of a single (source, destination) migration with
/// every statement pre-rendered.
///
/// Owned by the registry; handles hold non-owning `Arc` references.
#[derive(Debug, Clone)]
pub struct MigrationInfo {
    user: MigrationUserInfo,
    columns: Vec<String>,
    unioned_view: String,
    statement_for_creating_unioned_view: String,
    statement_for_dropping_unioned_view: String,
    statement_for_migrating_one_row: String,
    statement_for_deleting_migrated_one_row: String,
    statement_for_dropping_source_table: String,
}

impl MigrationInfo {
    /// Build the descriptor from a user info and the unioned column set.
    ///
    /// `columns` is the projection both sides share; order is preserved.
    pub fn new(user: MigrationUserInfo, columns: Vec<String>) -> Result<Self> {
        if columns.is_empty() {
            return Err(MigrateError::Config(format!(
                "migration of table {} has no columns",
                user.table()
            )));
        }
        let quoted: Vec<String> = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<_>>()?;
        let projection = {
            let mut p = String::from("rowid");
            for q in &quoted {
                p.push_str(", ");
                p.push_str(q);
            }
            p
        };

        let unioned_view = format!("{}{}", UNIONED_VIEW_PREFIX, user.table());
        let destination = qualify("main", user.table())?;
        let source = qualify(user.schema_for_source_database().name(), user.source_table())?;

        let statement_for_creating_unioned_view =
            Self::render_unioned_view(&unioned_view, &projection, &destination, &source)?;
        let statement_for_dropping_unioned_view =
            Self::statement_for_dropping_unioned_view_named(&unioned_view)?;
        let statement_for_migrating_one_row = format!(
            "INSERT INTO {}(rowid{}) SELECT {} FROM {} ORDER BY rowid DESC LIMIT 1",
            destination,
            quoted.iter().fold(String::new(), |mut acc, q| {
                acc.push_str(", ");
                acc.push_str(q);
                acc
            }),
            projection,
            source
        );
        let statement_for_deleting_migrated_one_row = format!(
            "DELETE FROM {} WHERE rowid == (SELECT max(rowid) FROM {})",
            source, source
        );
        let statement_for_dropping_source_table =
            format!("DROP TABLE IF EXISTS {}", source);

        Ok(Self {
            user,
            columns,
            unioned_view,
            statement_for_creating_unioned_view,
            statement_for_dropping_unioned_view,
            statement_for_migrating_one_row,
            statement_for_deleting_migrated_one_row,
            statement_for_dropping_source_table,
        })
    }

    fn render_unioned_view(
        view: &str,
        projection: &str,
        destination: &str,
        source: &str,
    ) -> Result<String> {
        Ok(format!(
            "CREATE TEMP VIEW IF NOT EXISTS {} AS SELECT {} FROM {} UNION ALL SELECT {} FROM {} ORDER BY rowid",
            quote_ident(view)?,
            projection,
            destination,
            projection,
            source
        ))
    }

    /// The attach-level half of the descriptor.
    pub fn user(&self) -> &MigrationUserInfo {
        &self.user
    }

    /// Destination table name.
    pub fn table(&self) -> &str {
        self.user.table()
    }

    /// Source table name.
    pub fn source_table(&self) -> &str {
        self.user.source_table()
    }

    /// The schema the source table is reachable under.
    pub fn schema_for_source_database(&self) -> &Schema {
        self.user.schema_for_source_database()
    }

    /// True iff the source resides in a different file than the main database.
    pub fn is_cross_database(&self) -> bool {
        self.user.is_cross_database()
    }

    /// Columns projected through the unioned view.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Name of the unioned view in the temp schema.
    pub fn unioned_view(&self) -> &str {
        &self.unioned_view
    }

    /// Create the unioned view with this descriptor's column set.
    pub fn statement_for_creating_unioned_view(&self) -> &str {
        &self.statement_for_creating_unioned_view
    }

    /// Create the unioned view with a widened column set (auto add column).
    pub fn statement_for_creating_unioned_view_with(&self, columns: &[String]) -> Result<String> {
        if columns.is_empty() {
            return Err(MigrateError::misuse(format!(
                "rebinding view {} with no columns",
                self.unioned_view
            )));
        }
        let mut projection = String::from("rowid");
        for column in columns {
            projection.push_str(", ");
            projection.push_str(&quote_ident(column)?);
        }
        let destination = qualify("main", self.table())?;
        let source = qualify(self.schema_for_source_database().name(), self.source_table())?;
        Self::render_unioned_view(&self.unioned_view, &projection, &destination, &source)
    }

    /// Drop this descriptor's unioned view.
    pub fn statement_for_dropping_unioned_view(&self) -> &str {
        &self.statement_for_dropping_unioned_view
    }

    /// Migrate exactly one row (highest rowid first) into the destination.
    pub fn statement_for_migrating_one_row(&self) -> &str {
        &self.statement_for_migrating_one_row
    }

    /// Delete the row just migrated from the source.
    pub fn statement_for_deleting_migrated_one_row(&self) -> &str {
        &self.statement_for_deleting_migrated_one_row
    }

    /// Drop the drained source table.
    pub fn statement_for_dropping_source_table(&self) -> &str {
        &self.statement_for_dropping_source_table
    }

    /// `PRAGMA database_list`; schema names are in column 1.
    pub fn statement_for_selecting_database_list() -> &'static str {
        "PRAGMA database_list"
    }

    /// Select the names of all unioned views in the temp schema.
    pub fn statement_for_selecting_unioned_views() -> String {
        format!(
            "SELECT name FROM temp.sqlite_master WHERE type == 'view' AND name LIKE '{}%'",
            UNIONED_VIEW_PREFIX
        )
    }

    /// Select all user tables of the main schema, excluding builtin objects.
    pub fn statement_for_selecting_all_tables() -> String {
        format!(
            "SELECT name FROM main.sqlite_master WHERE type == 'table' AND name NOT LIKE '{}%'",
            BUILTIN_PREFIX
        )
    }

    /// Drop an arbitrary unioned view by name.
    pub fn statement_for_dropping_unioned_view_named(view: &str) -> Result<String> {
        Ok(format!("DROP VIEW IF EXISTS temp.{}", quote_ident(view)?))
    }

    /// Detach an arbitrary source schema by name.
    pub fn statement_for_detaching_schema_named(schema: &str) -> Result<String> {
        Ok(format!("DETACH DATABASE {}", quote_ident(schema)?))
    }
}
