//! # table-migrate
//!
//! Online, incremental table migration core for embedded relational
//! databases.
//!
//! Rows move from a *source* table (possibly in a different, possibly
//! encrypted, database file) into a *destination* table in the main database
//! while the application keeps reading and writing under the destination
//! name. Two handles share the work:
//!
//! - **[`MigratingHandle`]** routes application statements: reads target a
//!   temp-schema unioned view fusing both tables, metadata queries are
//!   filtered to the columns both sides share, and schema changes are
//!   mirrored to the source.
//! - **[`MigrateHandle`]** moves rows in the background, one short
//!   transaction at a time, pacing itself from a rolling sample of observed
//!   transaction timings so application writers are never blocked for long.
//!
//! The SQL engine itself stays behind the [`EngineHandle`] and
//! [`StatementHandle`] traits; the migration registry stays behind
//! [`Binder`]. [`MigrationStepper`] is the background loop that drives a
//! migrate handle until every configured table has been drained and its
//! source dropped.
//!
//! ## Example
//!
//! ```rust,ignore
//! use table_migrate::{Config, MigrateHandle, MigrationInfo, MigrationStepper};
//!
//! let config = Config::load("migrations.yaml")?;
//! let handle = MigrateHandle::with_pacing(engine, (&config.pacing).into());
//! let stepper = MigrationStepper::new(handle, registry);
//! let report = stepper.run().await;
//! println!("{}", report.to_json()?);
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod migration;
pub mod stepper;

// Re-exports for convenient access
pub use crate::core::schema::Schema;
pub use config::{Config, PacingSettings, TableMigrationConfig};
pub use engine::{EngineError, EngineHandle, EngineResult, ErrorCode, StatementHandle};
pub use error::{MigrateError, Result};
pub use migration::binder::{Binder, MigratingInfos};
pub use migration::info::{MigrationInfo, MigrationUserInfo};
pub use migration::migrate::MigrateHandle;
pub use migration::migrating::{MigratingHandle, StatementId};
pub use migration::pacing::PacingConfig;
pub use stepper::{MigrationSource, MigrationStepper, StepperReport};
