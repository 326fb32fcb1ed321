use std::sync::Arc;

use crate::models::MigrationResult;
use crate::persistence::PatchInfoStore;
use crate::strategy::{RunnerStrategy, max_target};
use crate::tasks::MigrationTask;

/// Applied-set policy for branches whose patches land out of numeric order.
///
/// A task runs iff its level is not already recorded as applied, so a patch
/// merged late with a lower level than the current scalar level is still
/// back-filled. Synchronization compares applied sets rather than scalar
/// levels, and rollback candidates are the applied tasks above the target.
#[derive(Clone, Copy, Debug, Default)]
pub struct MissingPatchStrategy;

impl RunnerStrategy for MissingPatchStrategy {
    fn should_run(&self, level: i64, store: &dyn PatchInfoStore) -> MigrationResult<bool> {
        Ok(!store.is_applied(level)?)
    }

    fn is_synchronized(
        &self,
        reference: &dyn PatchInfoStore,
        candidate: &dyn PatchInfoStore,
    ) -> MigrationResult<bool> {
        Ok(reference.applied_levels()? == candidate.applied_levels()?)
    }

    fn rollback_candidates(
        &self,
        tasks: &[Arc<dyn MigrationTask>],
        target_levels: &[i64],
        store: &dyn PatchInfoStore,
    ) -> MigrationResult<Vec<Arc<dyn MigrationTask>>> {
        let floor = max_target(target_levels)?;

        let mut candidates = Vec::new();
        for task in tasks {
            let Some(level) = task.level() else { continue };
            if level > floor && store.is_applied(level)? {
                candidates.push(task.clone());
            }
        }
        candidates.sort_by_key(|task| std::cmp::Reverse(task.level().unwrap_or(i64::MIN)));
        Ok(candidates)
    }
}
