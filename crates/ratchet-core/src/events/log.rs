use crate::config::ListenerSettings;
use crate::events::MigrationListener;
use crate::models::MigrationResult;
use crate::tasks::MigrationTask;

/// Built-in listener that reports every transition through `tracing`.
pub struct LogListener;

impl MigrationListener for LogListener {
    fn initialize(&self, subsystem: &str, settings: &ListenerSettings) -> MigrationResult<()> {
        tracing::debug!(
            subsystem = %subsystem,
            settings = settings.len(),
            "patch run starting"
        );
        Ok(())
    }

    fn started(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()> {
        tracing::info!(task = %task.name(), level = task.level(), context = %context, "patch started");
        Ok(())
    }

    fn succeeded(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()> {
        tracing::info!(task = %task.name(), level = task.level(), context = %context, "patch applied");
        Ok(())
    }

    fn failed(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()> {
        tracing::error!(task = %task.name(), level = task.level(), context = %context, "patch failed");
        Ok(())
    }

    fn rollback_started(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()> {
        tracing::info!(task = %task.name(), level = task.level(), context = %context, "rollback started");
        Ok(())
    }

    fn rollback_succeeded(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()> {
        tracing::info!(task = %task.name(), level = task.level(), context = %context, "rollback applied");
        Ok(())
    }

    fn rollback_failed(&self, task: &dyn MigrationTask, context: &str) -> MigrationResult<()> {
        tracing::error!(task = %task.name(), level = task.level(), context = %context, "rollback failed");
        Ok(())
    }
}
