use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MigrationErrorKind {
    /// Duplicate or missing task level, out-of-sync controlled node,
    /// invalid rollback target. Raised before any state mutation.
    Validation,
    /// A task's execute or rollback operation failed, or lock-poll retries
    /// were exhausted. Always carries the task identity where one exists.
    Execution,
    /// The advisory lock was already held when `acquire_lock` ran outside
    /// the poll protocol.
    State,
    /// A dynamically invalid input, e.g. an empty rollback target set.
    Argument,
    /// The persisted patch record could not be read or written.
    Storage,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MigrationError {
    pub subsystem: Option<String>,
    pub task: Option<String>,
    pub kind: MigrationErrorKind,
    pub message: String,
}

impl MigrationError {
    pub fn new(kind: MigrationErrorKind, message: impl Into<String>) -> Self {
        Self {
            subsystem: None,
            task: None,
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(MigrationErrorKind::Validation, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(MigrationErrorKind::Execution, message)
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::new(MigrationErrorKind::State, message)
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(MigrationErrorKind::Argument, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(MigrationErrorKind::Storage, message)
    }

    pub fn for_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = self.subsystem.or(Some(subsystem.into()));
        self
    }

    pub fn for_task(mut self, task: impl Into<String>) -> Self {
        self.task = self.task.or(Some(task.into()));
        self
    }
}

impl Display for MigrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for MigrationError {}

pub type MigrationResult<T> = Result<T, MigrationError>;
