//! The two-handle migration engine.
//!
//! [`migrate::MigrateHandle`] moves rows in the background under an adaptive
//! time budget; [`migrating::MigratingHandle`] is the application-facing
//! handle that makes the destination and source tables appear fused while
//! that happens. Both work from the same immutable
//! [`info::MigrationInfo`] descriptors and cooperate with the registry
//! through [`binder::Binder`].

pub mod attach;
pub mod binder;
pub mod info;
pub mod migrate;
pub mod migrating;
pub mod pacing;
