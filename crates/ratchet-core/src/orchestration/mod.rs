pub mod distributed;
pub mod launcher;
pub mod rollback;

pub use distributed::{DistributedOrchestrator, RoutedTask};
pub use launcher::{LauncherContext, MigrationLauncher};
pub use rollback::RollbackEngine;

use std::thread;

use crate::config::LockSettings;
use crate::models::{MigrationError, MigrationErrorKind, MigrationResult};
use crate::persistence::PatchInfoStore;

/// The advisory-lock wait protocol shared by the launcher and the
/// distributed orchestrator.
///
/// Polls `is_locked` with bounded retries and a sleep interval. Losing the
/// acquisition race between a poll and the acquire is not an error; the
/// loser goes back to polling. The optional escape valve forcibly releases
/// a lock that stayed held across `forced_release_after` consecutive
/// observations, recovering from a crashed holder at the documented risk of
/// racing a live one.
pub(crate) fn acquire_with_polling(
    store: &dyn PatchInfoStore,
    settings: &LockSettings,
    subsystem: &str,
) -> MigrationResult<()> {
    let mut consecutive_locked = 0u32;
    let mut attempts = 0u32;

    while attempts < settings.max_poll_attempts {
        attempts += 1;
        if store.is_locked()? {
            consecutive_locked += 1;
            if let Some(threshold) = settings.forced_release_after {
                if consecutive_locked >= threshold {
                    tracing::warn!(
                        subsystem = %subsystem,
                        context = %store.context(),
                        polls = consecutive_locked,
                        "forcibly releasing abandoned advisory lock"
                    );
                    store.release_lock()?;
                    consecutive_locked = 0;
                    continue;
                }
            }
        } else {
            match store.acquire_lock() {
                Ok(()) => return Ok(()),
                Err(error) if error.kind == MigrationErrorKind::State => {
                    // Another process won between the poll and the acquire.
                    consecutive_locked = 0;
                }
                Err(error) => return Err(error),
            }
        }
        thread::sleep(settings.poll_interval());
    }

    Err(MigrationError::execution(format!(
        "gave up waiting for the patch lock on '{subsystem}/{}' after {attempts} attempts",
        store.context()
    ))
    .for_subsystem(subsystem))
}

/// Releases the lock as guaranteed cleanup, preferring the run's own error
/// over a release failure. A release failure after a successful run is
/// surfaced; after a failed run it is only logged.
pub(crate) fn release_after_run<T>(
    store: &dyn PatchInfoStore,
    subsystem: &str,
    result: MigrationResult<T>,
) -> MigrationResult<T> {
    match store.release_lock() {
        Ok(()) => result,
        Err(release_error) => match result {
            Ok(_) => Err(release_error),
            Err(run_error) => {
                tracing::error!(
                    subsystem = %subsystem,
                    context = %store.context(),
                    message = %release_error.message,
                    "failed to release advisory lock after a failed run"
                );
                Err(run_error)
            }
        },
    }
}
