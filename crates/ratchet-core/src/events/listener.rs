use crate::config::ListenerSettings;
use crate::models::MigrationResult;
use crate::tasks::MigrationTask;

/// Every task transition a launcher or the rollback engine broadcasts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MigrationEventKind {
    Started,
    Succeeded,
    Failed,
    RollbackStarted,
    RollbackSucceeded,
    RollbackFailed,
}

/// One listener capability set: required forward-migration methods plus
/// optional rollback methods with no-op defaults.
///
/// Listener errors are never swallowed; a listener may represent a required
/// side effect (audit logging, say) whose failure must abort the run.
pub trait MigrationListener: Send + Sync {
    /// One-time hook, called before any patching begins.
    fn initialize(
        &self,
        _subsystem: &str,
        _settings: &ListenerSettings,
    ) -> MigrationResult<()> {
        Ok(())
    }

    fn started(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()>;

    fn succeeded(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()>;

    fn failed(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()>;

    fn rollback_started(
        &self,
        _task: &dyn MigrationTask,
        _context: &str,
    ) -> MigrationResult<()> {
        Ok(())
    }

    fn rollback_succeeded(
        &self,
        _task: &dyn MigrationTask,
        _context: &str,
    ) -> MigrationResult<()> {
        Ok(())
    }

    fn rollback_failed(
        &self,
        _task: &dyn MigrationTask,
        _context: &str,
    ) -> MigrationResult<()> {
        Ok(())
    }
}
