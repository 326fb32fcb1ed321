use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{ListenerSettings, LockSettings};
use crate::events::{Broadcaster, MigrationListener};
use crate::models::{MigrationError, MigrationResult};
use crate::orchestration::launcher::MigrationLauncher;
use crate::orchestration::rollback::ensure_rollback_capable;
use crate::orchestration::{acquire_with_polling, release_after_run};
use crate::persistence::PatchInfoStore;
use crate::strategy::{RunnerStrategy, max_target};
use crate::tasks::{MigrationTask, catalog};

/// A task tagged with the subsystem that owns it, for routing a combined
/// run back to the right launcher.
pub struct RoutedTask {
    pub subsystem: String,
    pub task: Arc<dyn MigrationTask>,
}

/// Composes the launchers of several subsystems into one coordinated run.
///
/// The orchestrator keeps its own reference patch record for the fleet
/// level, validates that every controlled context is synchronized against it
/// before acting (unless force-sync drives laggards forward instead), and
/// routes each globally-sorted task to its owning launcher. The registry is
/// built at construction time and read-only during a run.
pub struct DistributedOrchestrator {
    name: String,
    reference: Arc<dyn PatchInfoStore>,
    subsystems: BTreeMap<String, MigrationLauncher>,
    strategy: Arc<dyn RunnerStrategy>,
    broadcaster: Broadcaster,
    lock_settings: LockSettings,
    listener_settings: ListenerSettings,
    force_sync: bool,
    read_only: bool,
}

impl DistributedOrchestrator {
    pub fn new(
        name: impl Into<String>,
        reference: Arc<dyn PatchInfoStore>,
        strategy: Arc<dyn RunnerStrategy>,
    ) -> Self {
        Self {
            name: name.into(),
            reference,
            subsystems: BTreeMap::new(),
            strategy,
            broadcaster: Broadcaster::new(),
            lock_settings: LockSettings::default(),
            listener_settings: ListenerSettings::new(),
            force_sync: false,
            read_only: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a controlled subsystem under its launcher's subsystem name.
    pub fn add_subsystem(&mut self, launcher: MigrationLauncher) -> MigrationResult<()> {
        let name = launcher.subsystem().to_string();
        if self.subsystems.contains_key(&name) {
            return Err(MigrationError::argument(format!(
                "duplicate controlled subsystem registration for '{name}'"
            ))
            .for_subsystem(name));
        }
        self.subsystems.insert(name, launcher);
        Ok(())
    }

    pub fn subsystem(&self, name: &str) -> Option<&MigrationLauncher> {
        self.subsystems.get(name)
    }

    /// Top-level listeners observe every sub-launcher's events exactly once.
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

    /// Force-sync drives an out-of-sync context forward to the reference
    /// level during the run instead of rejecting the fleet.
    pub fn set_force_sync(&mut self, force_sync: bool) {
        self.force_sync = force_sync;
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Every controlled subsystem's task list, tagged with its owner,
    /// validated as one combined set (so level collisions across subsystems
    /// are caught) and sorted globally by level.
    pub fn migration_tasks(&self) -> MigrationResult<Vec<RoutedTask>> {
        let mut routed = Vec::new();
        for (name, launcher) in &self.subsystems {
            for task in launcher.migration_tasks()? {
                routed.push(RoutedTask {
                    subsystem: name.clone(),
                    task,
                });
            }
        }

        let combined: Vec<Arc<dyn MigrationTask>> =
            routed.iter().map(|entry| entry.task.clone()).collect();
        catalog::validate(&combined)?;
        routed.sort_by_key(|entry| entry.task.level().unwrap_or(i64::MIN));
        Ok(routed)
    }

    /// Rejects the run when any controlled context has drifted from the
    /// reference record. One silently lagging node fails the whole fleet.
    pub fn validate_controlled_systems(&self) -> MigrationResult<()> {
        for (name, launcher) in &self.subsystems {
            for context in launcher.contexts() {
                if !self
                    .strategy
                    .is_synchronized(self.reference.as_ref(), context.store().as_ref())?
                {
                    return Err(MigrationError::validation(format!(
                        "context '{}' of subsystem '{name}' is out of sync: reference level {}, context level {}",
                        context.name(),
                        self.reference.current_level()?,
                        context.store().current_level()?
                    ))
                    .for_subsystem(name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Runs the combined, globally-ordered migration across every controlled
    /// subsystem. Returns the number of tasks that were applied to at least
    /// one context.
    pub fn run_migrations(&mut self) -> MigrationResult<usize> {
        let routed = self.migration_tasks()?;

        if self.read_only {
            return self.ensure_nothing_pending(&routed).map(|()| 0);
        }

        self.broadcaster
            .initialize_all(&self.name, &self.listener_settings)?;
        for launcher in self.subsystems.values() {
            launcher.initialize_listeners()?;
        }

        self.reference.ensure_initialized()?;
        acquire_with_polling(self.reference.as_ref(), &self.lock_settings, &self.name)?;
        let result = self.apply_routed(&routed);
        release_after_run(self.reference.as_ref(), &self.name, result)
    }

    /// Rolls the whole fleet back to `max(target_levels)`, globally
    /// descending. Returns the number of candidates rolled back.
    pub fn do_rollbacks(&mut self, target_levels: &[i64], force: bool) -> MigrationResult<usize> {
        let routed = self.migration_tasks()?;

        let floor = max_target(target_levels)?;
        let current = self.reference.current_level()?;
        if floor > current {
            return Err(MigrationError::argument(format!(
                "rollback target level {floor} is above the fleet level {current} of '{}'",
                self.name
            )));
        }

        self.broadcaster
            .initialize_all(&self.name, &self.listener_settings)?;
        for launcher in self.subsystems.values() {
            launcher.initialize_listeners()?;
        }

        self.reference.ensure_initialized()?;
        acquire_with_polling(self.reference.as_ref(), &self.lock_settings, &self.name)?;
        let result = self.rollback_routed(&routed, target_levels, floor, force);
        release_after_run(self.reference.as_ref(), &self.name, result)
    }

    fn ensure_nothing_pending(&self, routed: &[RoutedTask]) -> MigrationResult<()> {
        for entry in routed {
            let Some(level) = entry.task.level() else {
                continue;
            };
            let launcher = self.launcher(&entry.subsystem)?;
            for context in launcher.contexts() {
                if launcher.strategy().should_run(level, context.store().as_ref())? {
                    return Err(MigrationError::validation(format!(
                        "read-only run: patch '{}' (level {level}) is pending on '{}/{}'",
                        entry.task.name(),
                        entry.subsystem,
                        context.name()
                    ))
                    .for_subsystem(entry.subsystem.clone())
                    .for_task(entry.task.name()));
                }
            }
        }
        Ok(())
    }

    fn apply_routed(&mut self, routed: &[RoutedTask]) -> MigrationResult<usize> {
        if !self.force_sync {
            self.validate_controlled_systems()?;
        }

        let broadcaster = self.broadcaster.clone();
        let mut applied = 0;
        for entry in routed {
            let Some(level) = entry.task.level() else {
                continue;
            };
            let launcher = self.launcher_mut(&entry.subsystem)?;
            if launcher.apply_routed_task(&entry.task, &broadcaster)? > 0 {
                applied += 1;
            }
            self.reference.advance_level(level)?;
        }
        Ok(applied)
    }

    fn rollback_routed(
        &mut self,
        routed: &[RoutedTask],
        target_levels: &[i64],
        floor: i64,
        force: bool,
    ) -> MigrationResult<usize> {
        let combined: Vec<Arc<dyn MigrationTask>> =
            routed.iter().map(|entry| entry.task.clone()).collect();
        let candidates =
            self.strategy
                .rollback_candidates(&combined, target_levels, self.reference.as_ref())?;
        ensure_rollback_capable(&candidates, force, &self.name)?;

        let broadcaster = self.broadcaster.clone();
        let mut performed = 0;
        for (position, task) in candidates.iter().enumerate() {
            let Some(level) = task.level() else { continue };
            let next_lower = candidates
                .get(position + 1)
                .and_then(|next| next.level())
                .unwrap_or(floor);

            let owner = self.owner_of(routed, task)?;
            let launcher = self.launcher_mut(&owner)?;
            launcher.rollback_routed_task(task, &broadcaster)?;
            self.reference.revert_level(level, next_lower)?;
            performed += 1;
        }
        Ok(performed)
    }

    fn owner_of(&self, routed: &[RoutedTask], task: &Arc<dyn MigrationTask>) -> MigrationResult<String> {
        routed
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.task, task))
            .map(|entry| entry.subsystem.clone())
            .ok_or_else(|| {
                MigrationError::execution(format!(
                    "no controlled subsystem owns patch '{}'",
                    task.name()
                ))
                .for_task(task.name())
            })
    }

    fn launcher(&self, name: &str) -> MigrationResult<&MigrationLauncher> {
        self.subsystems.get(name).ok_or_else(|| {
            MigrationError::execution(format!("unknown controlled subsystem '{name}'"))
                .for_subsystem(name)
        })
    }

    fn launcher_mut(&mut self, name: &str) -> MigrationResult<&mut MigrationLauncher> {
        self.subsystems.get_mut(name).ok_or_else(|| {
            MigrationError::execution(format!("unknown controlled subsystem '{name}'"))
                .for_subsystem(name)
        })
    }
}
