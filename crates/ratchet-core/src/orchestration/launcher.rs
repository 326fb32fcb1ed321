use std::sync::Arc;

use crate::config::{ListenerSettings, LockSettings};
use crate::context::MigrationContext;
use crate::events::{Broadcaster, MigrationEventKind, MigrationListener};
use crate::models::{MigrationError, MigrationResult};
use crate::orchestration::rollback::RollbackEngine;
use crate::orchestration::{acquire_with_polling, release_after_run};
use crate::persistence::PatchInfoStore;
use crate::strategy::RunnerStrategy;
use crate::tasks::{MigrationTask, TaskSource, catalog};

/// One physical database target owned by a launcher: a context name, its
/// persisted patch record, and the session the tasks execute within.
pub struct LauncherContext {
    name: String,
    store: Arc<dyn PatchInfoStore>,
    session: Box<dyn MigrationContext>,
}

impl LauncherContext {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn PatchInfoStore>,
        session: Box<dyn MigrationContext>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            session,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn PatchInfoStore> {
        &self.store
    }
}

/// Drives one subsystem across its owned contexts: task discovery and
/// validation, the advisory-lock poll protocol, ascending task application
/// inside each context's commit/rollback boundary, and event broadcasting.
pub struct MigrationLauncher {
    subsystem: String,
    contexts: Vec<LauncherContext>,
    sources: Vec<Arc<dyn TaskSource>>,
    search_paths: Vec<String>,
    strategy: Arc<dyn RunnerStrategy>,
    broadcaster: Broadcaster,
    lock_settings: LockSettings,
    listener_settings: ListenerSettings,
    read_only: bool,
}

impl MigrationLauncher {
    pub fn new(subsystem: impl Into<String>, strategy: Arc<dyn RunnerStrategy>) -> Self {
        Self {
            subsystem: subsystem.into(),
            contexts: Vec::new(),
            sources: Vec::new(),
            search_paths: Vec::new(),
            strategy,
            broadcaster: Broadcaster::new(),
            lock_settings: LockSettings::default(),
            listener_settings: ListenerSettings::new(),
            read_only: false,
        }
    }

    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    pub fn add_context(&mut self, context: LauncherContext) {
        self.contexts.push(context);
    }

    pub fn add_source(&mut self, source: Arc<dyn TaskSource>) {
        self.sources.push(source);
    }

    pub fn add_search_path(&mut self, path: impl Into<String>) {
        self.search_paths.push(path.into());
    }

    pub fn add_listener(&mut self, listener: Arc<dyn MigrationListener>) -> bool {
        self.broadcaster.add(listener)
    }

    pub fn remove_listener(&mut self, listener: &Arc<dyn MigrationListener>) -> bool {
        self.broadcaster.remove(listener)
    }

    pub fn set_lock_settings(&mut self, settings: LockSettings) {
        self.lock_settings = settings;
    }

    pub fn set_listener_settings(&mut self, settings: ListenerSettings) {
        self.listener_settings = settings;
    }

    /// Read-only runs fail before touching any store if any task would run.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn contexts(&self) -> &[LauncherContext] {
        &self.contexts
    }

    pub(crate) fn strategy(&self) -> &Arc<dyn RunnerStrategy> {
        &self.strategy
    }

    /// The subsystem's discovered task list, unsorted and unvalidated.
    /// Single-subsystem runs validate it themselves; the distributed
    /// orchestrator validates the combined list instead.
    pub fn migration_tasks(&self) -> MigrationResult<Vec<Arc<dyn MigrationTask>>> {
        catalog::collect(&self.sources, &self.search_paths)
    }

    pub(crate) fn initialize_listeners(&self) -> MigrationResult<()> {
        self.broadcaster
            .initialize_all(&self.subsystem, &self.listener_settings)
    }

    /// Applies every pending task to every owned context, ascending by
    /// level. Returns the total number of task applications.
    pub fn run_migrations(&mut self) -> MigrationResult<usize> {
        let mut tasks = self.migration_tasks()?;
        catalog::validate(&tasks)?;
        catalog::sort_by_level(&mut tasks);

        if self.read_only {
            return self.ensure_nothing_pending(&tasks).map(|()| 0);
        }

        self.initialize_listeners()?;

        let mut applied = 0;
        for index in 0..self.contexts.len() {
            applied += self.run_context(index, &tasks)?;
        }
        Ok(applied)
    }

    /// Rolls every owned context back to `max(target_levels)`. Returns the
    /// total number of rollbacks performed.
    pub fn do_rollbacks(&mut self, target_levels: &[i64], force: bool) -> MigrationResult<usize> {
        let mut tasks = self.migration_tasks()?;
        catalog::validate(&tasks)?;
        catalog::sort_by_level(&mut tasks);

        // Target validation precedes listeners, locks, and any store write.
        let floor = crate::strategy::max_target(target_levels)?;
        for context in &self.contexts {
            let current = context.store.current_level()?;
            if floor > current {
                return Err(MigrationError::argument(format!(
                    "rollback target level {floor} is above the current level {current} of '{}/{}'",
                    self.subsystem,
                    context.name
                ))
                .for_subsystem(&self.subsystem));
            }
        }

        self.initialize_listeners()?;

        let engine = RollbackEngine::new(self.strategy.clone());
        let mut performed = 0;
        for index in 0..self.contexts.len() {
            let broadcaster = self.broadcaster.clone();
            let subsystem = self.subsystem.clone();
            let store = self.contexts[index].store.clone();

            store.ensure_initialized()?;
            acquire_with_polling(store.as_ref(), &self.lock_settings, &subsystem)?;
            let context = &mut self.contexts[index];
            let result = engine.rollback_context(
                &subsystem,
                &context.name,
                store.as_ref(),
                context.session.as_mut(),
                &tasks,
                target_levels,
                force,
                &broadcaster,
            );
            performed += release_after_run(store.as_ref(), &subsystem, result)?;
        }
        Ok(performed)
    }

    fn ensure_nothing_pending(&self, tasks: &[Arc<dyn MigrationTask>]) -> MigrationResult<()> {
        for context in &self.contexts {
            for task in tasks {
                let Some(level) = task.level() else { continue };
                if self.strategy.should_run(level, context.store.as_ref())? {
                    return Err(MigrationError::validation(format!(
                        "read-only run: patch '{}' (level {level}) is pending on '{}/{}'",
                        task.name(),
                        self.subsystem,
                        context.name
                    ))
                    .for_subsystem(&self.subsystem)
                    .for_task(task.name()));
                }
            }
        }
        Ok(())
    }

    fn run_context(
        &mut self,
        index: usize,
        tasks: &[Arc<dyn MigrationTask>],
    ) -> MigrationResult<usize> {
        let store = self.contexts[index].store.clone();
        store.ensure_initialized()?;
        acquire_with_polling(store.as_ref(), &self.lock_settings, &self.subsystem)?;
        let result = self.apply_tasks(index, tasks);
        release_after_run(store.as_ref(), &self.subsystem, result)
    }

    fn apply_tasks(
        &mut self,
        index: usize,
        tasks: &[Arc<dyn MigrationTask>],
    ) -> MigrationResult<usize> {
        let sibling_stores: Vec<(String, Arc<dyn PatchInfoStore>)> = self
            .contexts
            .iter()
            .map(|context| (context.name.clone(), context.store.clone()))
            .collect();
        let strategy = self.strategy.clone();
        let broadcaster = self.broadcaster.clone();
        let subsystem = self.subsystem.clone();
        let context = &mut self.contexts[index];
        let store = context.store.clone();

        let mut applied = 0;
        for task in tasks {
            let Some(level) = task.level() else { continue };
            if !strategy.should_run(level, store.as_ref())? {
                continue;
            }

            broadcaster.notify(task.as_ref(), &context.name, MigrationEventKind::Started)?;
            match task.execute(context.session.as_mut()) {
                Ok(()) => {
                    context
                        .session
                        .commit()
                        .map_err(|error| attribute(error, &subsystem, task.name()))?;
                    // The active context always records the level; a sibling
                    // is only advanced past a level it has not reached, so a
                    // slower node that progressed elsewhere is never clobbered.
                    for (name, sibling) in &sibling_stores {
                        if *name == context.name || sibling.current_level()? < level {
                            sibling.advance_level(level)?;
                        }
                    }
                    broadcaster.notify(
                        task.as_ref(),
                        &context.name,
                        MigrationEventKind::Succeeded,
                    )?;
                    applied += 1;
                }
                Err(error) => {
                    if let Err(rollback_error) = context.session.rollback() {
                        tracing::error!(
                            subsystem = %subsystem,
                            context = %context.name,
                            task = %task.name(),
                            message = %rollback_error.message,
                            "failed to roll back the transaction of a failed patch"
                        );
                    }
                    broadcaster.notify(task.as_ref(), &context.name, MigrationEventKind::Failed)?;
                    return Err(MigrationError::execution(format!(
                        "patch '{}' (level {level}) failed on '{subsystem}/{}': {}",
                        task.name(),
                        context.name,
                        error.message
                    ))
                    .for_subsystem(&subsystem)
                    .for_task(task.name()));
                }
            }
        }
        Ok(applied)
    }

    /// Distributed routing: applies one globally-sorted task to every owned
    /// context that still needs it, broadcasting through the subsystem's own
    /// listener set and the orchestrator's. Returns the number of contexts
    /// the task was applied to.
    pub(crate) fn apply_routed_task(
        &mut self,
        task: &Arc<dyn MigrationTask>,
        orchestrator_broadcaster: &Broadcaster,
    ) -> MigrationResult<usize> {
        let Some(level) = task.level() else {
            return Ok(0);
        };
        let strategy = self.strategy.clone();
        let broadcaster = self.broadcaster.clone();
        let subsystem = self.subsystem.clone();

        let mut applied = 0;
        for context in &mut self.contexts {
            if !strategy.should_run(level, context.store.as_ref())? {
                continue;
            }
            context.store.ensure_initialized()?;

            broadcaster.notify(task.as_ref(), &context.name, MigrationEventKind::Started)?;
            orchestrator_broadcaster.notify(
                task.as_ref(),
                &context.name,
                MigrationEventKind::Started,
            )?;
            match task.execute(context.session.as_mut()) {
                Ok(()) => {
                    context
                        .session
                        .commit()
                        .map_err(|error| attribute(error, &subsystem, task.name()))?;
                    context.store.advance_level(level)?;
                    broadcaster.notify(
                        task.as_ref(),
                        &context.name,
                        MigrationEventKind::Succeeded,
                    )?;
                    orchestrator_broadcaster.notify(
                        task.as_ref(),
                        &context.name,
                        MigrationEventKind::Succeeded,
                    )?;
                    applied += 1;
                }
                Err(error) => {
                    if let Err(rollback_error) = context.session.rollback() {
                        tracing::error!(
                            subsystem = %subsystem,
                            context = %context.name,
                            task = %task.name(),
                            message = %rollback_error.message,
                            "failed to roll back the transaction of a failed patch"
                        );
                    }
                    broadcaster.notify(task.as_ref(), &context.name, MigrationEventKind::Failed)?;
                    orchestrator_broadcaster.notify(
                        task.as_ref(),
                        &context.name,
                        MigrationEventKind::Failed,
                    )?;
                    return Err(MigrationError::execution(format!(
                        "patch '{}' (level {level}) failed on '{subsystem}/{}': {}",
                        task.name(),
                        context.name,
                        error.message
                    ))
                    .for_subsystem(&subsystem)
                    .for_task(task.name()));
                }
            }
        }
        Ok(applied)
    }

    /// Distributed routing for rollback: reverts one candidate on every
    /// owned context that has the level applied. Each context's level drops
    /// to the highest level it still has applied below the rolled-back one.
    pub(crate) fn rollback_routed_task(
        &mut self,
        task: &Arc<dyn MigrationTask>,
        orchestrator_broadcaster: &Broadcaster,
    ) -> MigrationResult<usize> {
        let Some(level) = task.level() else {
            return Ok(0);
        };
        let broadcaster = self.broadcaster.clone();
        let subsystem = self.subsystem.clone();

        let mut reverted = 0;
        for context in &mut self.contexts {
            if !context.store.is_applied(level)? {
                continue;
            }

            broadcaster.notify(
                task.as_ref(),
                &context.name,
                MigrationEventKind::RollbackStarted,
            )?;
            orchestrator_broadcaster.notify(
                task.as_ref(),
                &context.name,
                MigrationEventKind::RollbackStarted,
            )?;

            if task.supports_rollback() {
                match task.rollback(context.session.as_mut()) {
                    Ok(()) => {
                        context
                            .session
                            .commit()
                            .map_err(|error| attribute(error, &subsystem, task.name()))?;
                    }
                    Err(error) => {
                        if let Err(rollback_error) = context.session.rollback() {
                            tracing::error!(
                                subsystem = %subsystem,
                                context = %context.name,
                                task = %task.name(),
                                message = %rollback_error.message,
                                "failed to roll back the transaction of a failed rollback"
                            );
                        }
                        broadcaster.notify(
                            task.as_ref(),
                            &context.name,
                            MigrationEventKind::RollbackFailed,
                        )?;
                        orchestrator_broadcaster.notify(
                            task.as_ref(),
                            &context.name,
                            MigrationEventKind::RollbackFailed,
                        )?;
                        return Err(MigrationError::execution(format!(
                            "rollback of patch '{}' (level {level}) failed on '{subsystem}/{}': {}",
                            task.name(),
                            context.name,
                            error.message
                        ))
                        .for_subsystem(&subsystem)
                        .for_task(task.name()));
                    }
                }
            } else {
                tracing::warn!(
                    subsystem = %subsystem,
                    context = %context.name,
                    task = %task.name(),
                    level,
                    "forced rollback of a patch with no reverse operation"
                );
            }

            let target = context
                .store
                .applied_levels()?
                .into_iter()
                .filter(|&applied| applied < level)
                .max()
                .unwrap_or(0);
            context.store.revert_level(level, target)?;
            broadcaster.notify(
                task.as_ref(),
                &context.name,
                MigrationEventKind::RollbackSucceeded,
            )?;
            orchestrator_broadcaster.notify(
                task.as_ref(),
                &context.name,
                MigrationEventKind::RollbackSucceeded,
            )?;
            reverted += 1;
        }
        Ok(reverted)
    }
}

fn attribute(error: MigrationError, subsystem: &str, task: &str) -> MigrationError {
    error.for_subsystem(subsystem).for_task(task)
}
