//! Engine-facing traits.
//!
//! The SQL parser, statement preparation and the raw execution engine are
//! external collaborators. This module names the exact surface the migration
//! core relies on:
//!
//! - [`EngineHandle`]: one connection to the embedded engine
//! - [`StatementHandle`]: a prepared statement owned by the caller
//!
//! Statements are owned objects rather than borrows of the handle;
//! implementations share interior connection state. That gives every
//! statement a stable identity for the migrating handle's statement pool and
//! lets a handle keep several statements prepared at once.
//!
//! # Scheduling model
//!
//! Handles are single-threaded cooperative: each handle is owned by exactly
//! one thread of execution at a time and no trait method is required to be
//! `Send`. Only engine calls may block on I/O or the engine's write lock.

#[cfg(test)]
pub(crate) mod mock;

use std::collections::BTreeSet;

use bytes::Bytes;
use thiserror::Error;

use crate::core::schema::Schema;

/// Error codes reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Generic engine failure.
    Error,
    /// The engine's write lock is held elsewhere.
    Busy,
    /// A statement referenced a column missing from the schema it was
    /// prepared against. Drives the auto-add-column retry.
    NoSuchColumn,
    /// The operation was interrupted.
    Interrupt,
}

/// An error surfaced by the engine.
///
/// `ignorable` is set by the engine when the failing operation ran while its
/// code was marked ignorable on the handle (see
/// [`EngineHandle::mark_error_as_ignorable`]).
#[derive(Error, Debug, Clone)]
#[error("{code:?}: {message}")]
pub struct EngineError {
    /// Engine error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Whether the error was marked ignorable when it occurred.
    pub ignorable: bool,
}

impl EngineError {
    /// Create a non-ignorable engine error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            ignorable: false,
        }
    }
}

/// Result type for raw engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A prepared statement owned by the caller.
pub trait StatementHandle {
    /// Prepare the statement from rendered SQL. Re-preparing replaces the
    /// previous statement.
    fn prepare(&mut self, sql: &str) -> EngineResult<()>;

    /// Whether the statement currently holds a prepared statement.
    fn is_prepared(&self) -> bool;

    /// Bind a BLOB parameter at a 1-based index.
    fn bind_blob(&mut self, blob: &[u8], index: usize) -> EngineResult<()>;

    /// Execute one step. `Ok(true)` means a result row is available.
    fn step(&mut self) -> EngineResult<bool>;

    /// Reset the statement so it can be stepped again.
    fn reset(&mut self);

    /// Finalize the statement, releasing engine resources. Idempotent.
    fn finalize(&mut self);
}

/// One connection to the embedded engine.
pub trait EngineHandle {
    /// Statement type produced by this handle.
    type Stmt: StatementHandle;

    /// Create a new, unprepared statement bound to this connection.
    fn new_statement(&self) -> Self::Stmt;

    /// Prepare, step and finalize a statement in one call.
    fn execute(&self, sql: &str) -> EngineResult<()>;

    /// Rows affected by the most recent insert/update/delete.
    fn changes(&self) -> u64;

    /// Whether a table exists in the given schema.
    fn table_exists(&self, schema: &Schema, table: &str) -> EngineResult<bool>;

    /// Column names of a table.
    fn columns_of(&self, schema: &Schema, table: &str) -> EngineResult<BTreeSet<String>>;

    /// Run a query and collect the string values of one result column.
    fn string_values(&self, sql: &str, column: usize) -> EngineResult<BTreeSet<String>>;

    /// Whether a transaction (possibly nested) is open on this connection.
    fn is_in_transaction(&self) -> bool;

    /// Open a transaction; nested calls stack.
    fn begin_transaction(&self) -> EngineResult<()>;

    /// Commit the innermost transaction. A failed commit leaves no
    /// transaction open.
    fn commit_transaction(&self) -> EngineResult<()>;

    /// Roll back the current transaction stack.
    fn rollback_transaction(&self);

    /// Mark an error code as ignorable: until unmarked, failures with this
    /// code carry `ignorable = true`.
    fn mark_error_as_ignorable(&self, code: ErrorCode);

    /// Clear any ignorable marking.
    fn mark_error_as_unignorable(&self);

    /// The raw (post-KDF) cipher key of an attached schema.
    fn raw_cipher_key(&self, schema: &Schema) -> EngineResult<Bytes>;
}
