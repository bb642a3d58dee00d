//! Idempotent attach/detach of source database files.

use tracing::debug;

use crate::core::schema::Schema;
use crate::engine::{EngineHandle, StatementHandle};
use crate::error::Result;
use crate::migration::info::{MigrationInfo, MigrationUserInfo};

/// Attach a source database file to a handle.
///
/// Binds the cipher as BLOB parameter 1 when present and reads the post-KDF
/// key back onto the info afterwards if it is still needed. The statement is
/// finalized regardless of intermediate failures.
pub(crate) fn attach_database<E: EngineHandle>(engine: &E, info: &MigrationUserInfo) -> Result<()> {
    let attach = info.statement_for_attaching_schema()?;
    let mut statement = engine.new_statement();
    let outcome = statement.prepare(&attach).and_then(|()| {
        if let Some(cipher) = info.source_cipher() {
            statement.bind_blob(cipher, 1)?;
        }
        statement.step().map(|_| ())
    });
    statement.finalize();
    outcome?;

    if info.need_raw_source_cipher() {
        let key = engine.raw_cipher_key(info.schema_for_source_database())?;
        info.set_raw_source_cipher(key);
    }
    debug!(
        "attached {} as {}",
        info.source_database().unwrap_or_else(|| std::path::Path::new("?")).display(),
        info.schema_for_source_database()
    );
    Ok(())
}

/// Tracks the single source schema attached through a migrate handle.
///
/// At most one non-main schema is attached per handle via this path; the
/// handle must be outside any transaction and hold no prepared statement
/// when switching.
#[derive(Debug)]
pub(crate) struct SourceAttachment {
    attached: Schema,
}

impl SourceAttachment {
    pub(crate) fn new() -> Self {
        Self {
            attached: Schema::Main,
        }
    }

    /// Attach the info's source schema. Precondition: nothing attached.
    pub(crate) fn attach<E: EngineHandle>(
        &mut self,
        engine: &E,
        info: &MigrationUserInfo,
    ) -> Result<()> {
        debug_assert!(!engine.is_in_transaction());
        debug_assert!(self.attached.is_main());
        attach_database(engine, info)?;
        self.attached = info.schema_for_source_database().clone();
        Ok(())
    }

    /// Detach whatever is attached; a no-op when only main is present.
    pub(crate) fn detach<E: EngineHandle>(&mut self, engine: &E) -> Result<()> {
        debug_assert!(!engine.is_in_transaction());
        if !self.attached.is_main() {
            engine.execute(&MigrationInfo::statement_for_detaching_schema_named(
                self.attached.name(),
            )?)?;
            debug!("detached {}", self.attached);
            self.attached = Schema::Main;
        }
        Ok(())
    }

    /// Make the info's source schema the attached one.
    ///
    /// Already targeting the same schema is a no-op. Returns whether the
    /// attachment changed. Partial state after a failure (detached but not
    /// re-attached) is acceptable; the next call retries from whatever state
    /// remains.
    pub(crate) fn re_attach<E: EngineHandle>(
        &mut self,
        engine: &E,
        info: &MigrationUserInfo,
    ) -> Result<bool> {
        if self.attached == *info.schema_for_source_database() {
            return Ok(false);
        }
        self.detach(engine)?;
        if info.is_cross_database() {
            self.attach(engine, info)?;
        }
        Ok(true)
    }
}
