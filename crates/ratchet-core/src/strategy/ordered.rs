use std::sync::Arc;

use crate::models::MigrationResult;
use crate::persistence::PatchInfoStore;
use crate::strategy::{RunnerStrategy, max_target};
use crate::tasks::MigrationTask;

/// Default policy: a single scalar patch level per context.
///
/// A task runs iff its level lies above the stored level; two nodes are in
/// sync iff they report the same level; rollback candidates are the tasks
/// whose level lies in `(max(targets), current]`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderedStrategy;

impl RunnerStrategy for OrderedStrategy {
    fn should_run(&self, level: i64, store: &dyn PatchInfoStore) -> MigrationResult<bool> {
        Ok(level > store.current_level()?)
    }

    fn is_synchronized(
        &self,
        reference: &dyn PatchInfoStore,
        candidate: &dyn PatchInfoStore,
    ) -> MigrationResult<bool> {
        Ok(reference.current_level()? == candidate.current_level()?)
    }

    fn rollback_candidates(
        &self,
        tasks: &[Arc<dyn MigrationTask>],
        target_levels: &[i64],
        store: &dyn PatchInfoStore,
    ) -> MigrationResult<Vec<Arc<dyn MigrationTask>>> {
        let floor = max_target(target_levels)?;
        let current = store.current_level()?;

        let mut candidates: Vec<Arc<dyn MigrationTask>> = tasks
            .iter()
            .filter(|task| {
                task.level()
                    .is_some_and(|level| level > floor && level <= current)
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|task| std::cmp::Reverse(task.level().unwrap_or(i64::MIN)));
        Ok(candidates)
    }
}
