use crate::models::MigrationResult;

/// The transactional boundary a task executes within.
///
/// Each task runs inside one commit/rollback boundary: the launcher commits
/// after a successful execute and attempts a rollback after a failed one.
/// How the boundary maps onto physical connections is the caller's concern;
/// tasks only ever see this trait.
pub trait MigrationContext: Send {
    fn commit(&mut self) -> MigrationResult<()>;

    fn rollback(&mut self) -> MigrationResult<()>;
}
