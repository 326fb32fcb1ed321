use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use crate::models::MigrationError;
use crate::persistence::{PatchInfoStore, PersistenceResult};

/// Process-local `PatchInfoStore`, primarily for tests and embedders that
/// keep patch state outside a database.
pub struct InMemoryPatchStore {
    subsystem: String,
    context: String,
    state: Mutex<RecordState>,
}

#[derive(Default)]
struct RecordState {
    initialized: bool,
    patch_level: i64,
    applied: BTreeSet<i64>,
    lock_held: bool,
}

impl InMemoryPatchStore {
    pub fn new(subsystem: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            context: context.into(),
            state: Mutex::new(RecordState::default()),
        }
    }

    fn lock_state(&self) -> PersistenceResult<MutexGuard<'_, RecordState>> {
        self.state.lock().map_err(|_| {
            MigrationError::storage("patch record mutex poisoned")
                .for_subsystem(&self.subsystem)
        })
    }
}

impl PatchInfoStore for InMemoryPatchStore {
    fn subsystem(&self) -> &str {
        &self.subsystem
    }

    fn context(&self) -> &str {
        &self.context
    }

    fn ensure_initialized(&self) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        state.initialized = true;
        Ok(())
    }

    fn current_level(&self) -> PersistenceResult<i64> {
        Ok(self.lock_state()?.patch_level)
    }

    fn is_applied(&self, level: i64) -> PersistenceResult<bool> {
        Ok(self.lock_state()?.applied.contains(&level))
    }

    fn applied_levels(&self) -> PersistenceResult<Vec<i64>> {
        Ok(self.lock_state()?.applied.iter().copied().collect())
    }

    fn advance_level(&self, level: i64) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        state.applied.insert(level);
        if level > state.patch_level {
            state.patch_level = level;
        }
        Ok(())
    }

    fn revert_level(&self, rolled_back: i64, target: i64) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        state.applied.remove(&rolled_back);
        state.patch_level = target;
        Ok(())
    }

    fn is_locked(&self) -> PersistenceResult<bool> {
        Ok(self.lock_state()?.lock_held)
    }

    fn acquire_lock(&self) -> PersistenceResult<()> {
        let mut state = self.lock_state()?;
        if state.lock_held {
            return Err(MigrationError::state(format!(
                "patch record for '{}/{}' is already locked",
                self.subsystem, self.context
            ))
            .for_subsystem(&self.subsystem));
        }
        state.lock_held = true;
        Ok(())
    }

    fn release_lock(&self) -> PersistenceResult<()> {
        self.lock_state()?.lock_held = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::models::MigrationErrorKind;
    use crate::persistence::PatchInfoStore;

    use super::InMemoryPatchStore;

    #[test]
    fn acquire_on_held_lock_is_a_state_error_and_release_is_idempotent() {
        let store = InMemoryPatchStore::new("orders", "node-a");
        store.acquire_lock().unwrap();
        let error = store.acquire_lock().unwrap_err();
        assert_eq!(error.kind, MigrationErrorKind::State);

        store.release_lock().unwrap();
        store.release_lock().unwrap();
        assert!(!store.is_locked().unwrap());
    }

    #[test]
    fn advance_is_monotonic_and_records_the_applied_set() {
        let store = InMemoryPatchStore::new("orders", "node-a");
        store.advance_level(3).unwrap();
        store.advance_level(5).unwrap();
        store.advance_level(4).unwrap();

        assert_eq!(store.current_level().unwrap(), 5);
        assert_eq!(store.applied_levels().unwrap(), vec![3, 4, 5]);
        assert!(store.is_applied(4).unwrap());
    }

    #[test]
    fn revert_lowers_the_level_and_removes_the_applied_entry() {
        let store = InMemoryPatchStore::new("orders", "node-a");
        store.advance_level(2).unwrap();
        store.advance_level(5).unwrap();

        store.revert_level(5, 2).unwrap();
        assert_eq!(store.current_level().unwrap(), 2);
        assert!(!store.is_applied(5).unwrap());
        assert!(store.is_applied(2).unwrap());
    }
}
