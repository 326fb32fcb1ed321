pub mod missing;
pub mod ordered;

pub use missing::MissingPatchStrategy;
pub use ordered::OrderedStrategy;

use std::sync::Arc;

use crate::models::{MigrationError, MigrationResult};
use crate::persistence::PatchInfoStore;
use crate::tasks::MigrationTask;

/// Pluggable policy answering "should this task run", "is this node in
/// sync", and "what should be rolled back".
pub trait RunnerStrategy: Send + Sync {
    fn should_run(&self, level: i64, store: &dyn PatchInfoStore) -> MigrationResult<bool>;

    fn is_synchronized(
        &self,
        reference: &dyn PatchInfoStore,
        candidate: &dyn PatchInfoStore,
    ) -> MigrationResult<bool>;

    /// The subset of `tasks` to roll back for `target_levels`, descending by
    /// level. An empty target set is an Argument error.
    fn rollback_candidates(
        &self,
        tasks: &[Arc<dyn MigrationTask>],
        target_levels: &[i64],
        store: &dyn PatchInfoStore,
    ) -> MigrationResult<Vec<Arc<dyn MigrationTask>>>;
}

pub(crate) fn max_target(target_levels: &[i64]) -> MigrationResult<i64> {
    target_levels
        .iter()
        .copied()
        .max()
        .ok_or_else(|| MigrationError::argument("rollback requires at least one target level"))
}
