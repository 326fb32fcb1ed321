use std::sync::Arc;

use crate::context::MigrationContext;
use crate::events::{Broadcaster, MigrationEventKind};
use crate::models::{MigrationError, MigrationResult};
use crate::persistence::PatchInfoStore;
use crate::strategy::{RunnerStrategy, max_target};
use crate::tasks::MigrationTask;

/// Computes and executes reverse-order rollback for one context.
pub struct RollbackEngine {
    strategy: Arc<dyn RunnerStrategy>,
}

impl RollbackEngine {
    pub fn new(strategy: Arc<dyn RunnerStrategy>) -> Self {
        Self { strategy }
    }

    /// Rolls one context back to `max(target_levels)`.
    ///
    /// The capability check runs over the whole batch before any reverse
    /// operation, so a refusal performs zero rollbacks. With `force`, a
    /// candidate with no reverse operation is still counted, notified, and
    /// has its level reverted. A reverse-operation failure aborts the
    /// remaining candidates. Returns the number of rollbacks performed.
    #[allow(clippy::too_many_arguments)]
    pub fn rollback_context(
        &self,
        subsystem: &str,
        context_name: &str,
        store: &dyn PatchInfoStore,
        session: &mut dyn MigrationContext,
        tasks: &[Arc<dyn MigrationTask>],
        target_levels: &[i64],
        force: bool,
        broadcaster: &Broadcaster,
    ) -> MigrationResult<usize> {
        let floor = max_target(target_levels)?;
        let current = store.current_level()?;
        if floor > current {
            return Err(MigrationError::argument(format!(
                "rollback target level {floor} is above the current level {current} of '{subsystem}/{context_name}'"
            ))
            .for_subsystem(subsystem));
        }

        let candidates = self
            .strategy
            .rollback_candidates(tasks, target_levels, store)?;
        ensure_rollback_capable(&candidates, force, subsystem)?;

        let mut performed = 0;
        for (position, task) in candidates.iter().enumerate() {
            let Some(level) = task.level() else { continue };
            let next_lower = candidates
                .get(position + 1)
                .and_then(|next| next.level())
                .unwrap_or(floor);

            broadcaster.notify(task.as_ref(), context_name, MigrationEventKind::RollbackStarted)?;

            if task.supports_rollback() {
                match task.rollback(session) {
                    Ok(()) => {
                        session
                            .commit()
                            .map_err(|error| error.for_subsystem(subsystem).for_task(task.name()))?;
                    }
                    Err(error) => {
                        if let Err(rollback_error) = session.rollback() {
                            tracing::error!(
                                subsystem = %subsystem,
                                context = %context_name,
                                task = %task.name(),
                                message = %rollback_error.message,
                                "failed to roll back the transaction of a failed rollback"
                            );
                        }
                        broadcaster.notify(
                            task.as_ref(),
                            context_name,
                            MigrationEventKind::RollbackFailed,
                        )?;
                        return Err(MigrationError::execution(format!(
                            "rollback of patch '{}' (level {level}) failed on '{subsystem}/{context_name}': {}",
                            task.name(),
                            error.message
                        ))
                        .for_subsystem(subsystem)
                        .for_task(task.name()));
                    }
                }
            } else {
                // force: counted and notified despite having no reverse
                // operation to run.
                tracing::warn!(
                    subsystem = %subsystem,
                    context = %context_name,
                    task = %task.name(),
                    level,
                    "forced rollback of a patch with no reverse operation"
                );
            }

            store.revert_level(level, next_lower)?;
            broadcaster.notify(
                task.as_ref(),
                context_name,
                MigrationEventKind::RollbackSucceeded,
            )?;
            performed += 1;
        }
        Ok(performed)
    }
}

/// Refuses the whole batch when any candidate lacks rollback support,
/// unless `force` is set.
pub(crate) fn ensure_rollback_capable(
    candidates: &[Arc<dyn MigrationTask>],
    force: bool,
    subsystem: &str,
) -> MigrationResult<()> {
    if force {
        return Ok(());
    }
    for task in candidates {
        if !task.supports_rollback() {
            return Err(MigrationError::validation(format!(
                "patch '{}' (level {}) does not support rollback; no rollbacks were performed",
                task.name(),
                task.level().unwrap_or(0)
            ))
            .for_subsystem(subsystem)
            .for_task(task.name()));
        }
    }
    Ok(())
}
