use std::sync::Arc;

use crate::config::ListenerSettings;
use crate::events::{MigrationEventKind, MigrationListener};
use crate::models::MigrationResult;
use crate::tasks::MigrationTask;

/// Ordered, de-duplicated listener registry.
///
/// Listeners are notified in insertion order. De-duplication is by `Arc`
/// identity, so the same listener instance registered twice still receives
/// each event exactly once.
#[derive(Clone, Default)]
pub struct Broadcaster {
    listeners: Vec<Arc<dyn MigrationListener>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the listener instance was already registered.
    pub fn add(&mut self, listener: Arc<dyn MigrationListener>) -> bool {
        if self
            .listeners
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &listener))
        {
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Returns `false` when the listener was not registered; never raises.
    pub fn remove(&mut self, listener: &Arc<dyn MigrationListener>) -> bool {
        let before = self.listeners.len();
        self.listeners
            .retain(|existing| !Arc::ptr_eq(existing, listener));
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Runs every listener's one-time `initialize` hook, in order.
    pub fn initialize_all(
        &self,
        subsystem: &str,
        settings: &ListenerSettings,
    ) -> MigrationResult<()> {
        for listener in &self.listeners {
            listener.initialize(subsystem, settings)?;
        }
        Ok(())
    }

    /// Dispatches one event to every listener in order. A listener error
    /// stops dispatch and propagates to the caller.
    pub fn notify(
        &self,
        task: &dyn MigrationTask,
        context: &str,
        kind: MigrationEventKind,
    ) -> MigrationResult<()> {
        for listener in &self.listeners {
            match kind {
                MigrationEventKind::Started => listener.started(task, context)?,
                MigrationEventKind::Succeeded => listener.succeeded(task, context)?,
                MigrationEventKind::Failed => listener.failed(task, context)?,
                MigrationEventKind::RollbackStarted => listener.rollback_started(task, context)?,
                MigrationEventKind::RollbackSucceeded => {
                    listener.rollback_succeeded(task, context)?
                }
                MigrationEventKind::RollbackFailed => listener.rollback_failed(task, context)?,
            }
        }
        Ok(())
    }
}
