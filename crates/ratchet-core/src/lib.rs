//! # ratchet-core
//!
//! Distributed, idempotent schema-patch orchestration for relational
//! databases: leveled tasks discovered through pluggable sources, a
//! persisted patch-level-plus-advisory-lock record per (subsystem, context),
//! a cooperative polling lock protocol, single- and multi-subsystem
//! launchers, reverse-order rollback, and ordered event broadcasting.
//!
//! Patch content, connection acquisition, and CLI/config glue are external
//! collaborators behind the `MigrationTask`, `TaskSource`, and
//! `MigrationContext` traits.

pub mod config;
pub mod context;
pub mod events;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod sqlite;
pub mod strategy;
pub mod tasks;

pub use config::{ListenerSettings, LockSettings};
pub use context::MigrationContext;
pub use events::{Broadcaster, LogListener, MigrationEventKind, MigrationListener};
pub use models::{MigrationError, MigrationErrorKind, MigrationResult};
pub use orchestration::{
    DistributedOrchestrator, LauncherContext, MigrationLauncher, RollbackEngine, RoutedTask,
};
pub use persistence::{InMemoryPatchStore, PatchInfoStore, PersistenceResult};
pub use sqlite::SqlitePatchStore;
pub use strategy::{MissingPatchStrategy, OrderedStrategy, RunnerStrategy};
pub use tasks::{MigrationTask, TaskSource, catalog};
