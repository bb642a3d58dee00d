//! The contract between a migrating handle and the migration registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::migration::info::MigrationInfo;

/// The set of migrations currently in effect, keyed by destination table.
pub type MigratingInfos = BTreeMap<String, Arc<MigrationInfo>>;

/// Registry-side contract a migrating handle binds tables through.
///
/// The registry exclusively owns its handles; a handle reaches the registry
/// only through this trait, so no owning cycle can form. A binding cycle is:
/// `start_binding`, any number of `bind_table` lookups, then
/// `stop_binding(commit)`. Committing returns the full desired migrating set
/// and the handle reconciles its views and attached schemas against it
/// (`MigratingHandle::bind_infos`); if that reconciliation fails the handle
/// reports back via [`set_need_rebind`](Binder::set_need_rebind) so the
/// registry invalidates whatever it published.
pub trait Binder {
    /// Begin a binding transaction on the registry.
    fn start_binding(&self);

    /// Look up the migration for a table. `Ok(None)` means the table is not
    /// under migration.
    fn bind_table(&self, table: &str) -> Result<Option<Arc<MigrationInfo>>>;

    /// End the binding transaction. With `commit = true` the registry
    /// publishes its state and returns the desired migrating set for the
    /// handle to reconcile; with `commit = false` it returns `Ok(None)`.
    fn stop_binding(&self, commit: bool) -> Result<Option<MigratingInfos>>;

    /// Invalidate the registry's cached view/schema beliefs for this handle;
    /// the next binding cycle starts fresh.
    fn set_need_rebind(&self);
}

macro_rules! forward_binder {
    ($pointer:ty) => {
        impl<B: Binder + ?Sized> Binder for $pointer {
            fn start_binding(&self) {
                (**self).start_binding()
            }
            fn bind_table(&self, table: &str) -> Result<Option<Arc<MigrationInfo>>> {
                (**self).bind_table(table)
            }
            fn stop_binding(&self, commit: bool) -> Result<Option<MigratingInfos>> {
                (**self).stop_binding(commit)
            }
            fn set_need_rebind(&self) {
                (**self).set_need_rebind()
            }
        }
    };
}

forward_binder!(std::rc::Rc<B>);
forward_binder!(Arc<B>);
