pub mod catalog;

use std::sync::Arc;

use crate::context::MigrationContext;
use crate::models::{MigrationError, MigrationResult};

/// One atomic, leveled migration unit.
///
/// Tasks are produced by an external `TaskSource` and are immutable once
/// discovered. The level is the ordering key and must be unique across the
/// combined task set of a run; a task without a level is rejected by
/// validation before anything executes. Rollback is an optional capability,
/// not a separate interface.
pub trait MigrationTask: Send + Sync {
    /// Task name, unique within a run. Used for error attribution and events.
    fn name(&self) -> &str;

    /// Ordering key. `None` marks a malformed task; validation names it.
    fn level(&self) -> Option<i64>;

    fn execute(&self, context: &mut dyn MigrationContext) -> MigrationResult<()>;

    fn supports_rollback(&self) -> bool {
        false
    }

    fn rollback(&self, _context: &mut dyn MigrationContext) -> MigrationResult<()> {
        Err(
            MigrationError::execution(format!("task '{}' does not support rollback", self.name()))
                .for_task(self.name()),
        )
    }
}

impl std::fmt::Debug for dyn MigrationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationTask")
            .field("name", &self.name())
            .field("level", &self.level())
            .finish()
    }
}

/// Discovers tasks under one search path.
///
/// A source that fails to construct a task must fail the whole discovery
/// call with a descriptive error rather than silently dropping the task.
/// Returning an empty sequence is fine.
pub trait TaskSource: Send + Sync {
    fn discover(&self, search_path: &str) -> MigrationResult<Vec<Arc<dyn MigrationTask>>>;
}
