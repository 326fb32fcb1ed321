pub mod memory;

pub use memory::InMemoryPatchStore;

use crate::models::MigrationError;

pub type PersistenceResult<T> = Result<T, MigrationError>;

/// The persisted patch record for one (subsystem, context): a scalar patch
/// level, the set of individually applied levels, and an advisory lock flag.
///
/// The lock is a flag, not a native database lock; correctness depends on
/// the launcher's poll protocol, not on the store. Writers must hold the
/// lock. Readers (`current_level`, `is_locked`) are unsynchronized by design
/// and tolerate committed-read visibility.
pub trait PatchInfoStore: Send + Sync {
    /// Subsystem this record belongs to.
    fn subsystem(&self) -> &str;

    /// Context (node) this record belongs to.
    fn context(&self) -> &str;

    /// Idempotently creates the persisted record if absent.
    fn ensure_initialized(&self) -> PersistenceResult<()>;

    /// Current patch level; 0 before initialization.
    fn current_level(&self) -> PersistenceResult<i64>;

    fn is_applied(&self, level: i64) -> PersistenceResult<bool>;

    /// Applied levels, ascending.
    fn applied_levels(&self) -> PersistenceResult<Vec<i64>>;

    /// Records `level` as applied and raises the patch level to it if
    /// greater. A back-filled lower level is recorded without regressing
    /// the scalar level. Callers must hold the lock.
    fn advance_level(&self, level: i64) -> PersistenceResult<()>;

    /// Explicit rollback path: removes `rolled_back` from the applied set
    /// and lowers the patch level to `target`. Callers must hold the lock.
    fn revert_level(&self, rolled_back: i64, target: i64) -> PersistenceResult<()>;

    fn is_locked(&self) -> PersistenceResult<bool>;

    /// Fails with a State error if the lock is already held. Never blocks;
    /// waiting is the launcher's poll protocol.
    fn acquire_lock(&self) -> PersistenceResult<()>;

    /// Idempotent.
    fn release_lock(&self) -> PersistenceResult<()>;
}
