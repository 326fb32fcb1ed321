use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the advisory-lock poll protocol.
///
/// The lock is a flag row, not a native database lock, so waiting is
/// cooperative polling: sleep `poll_interval_ms` between observations, up to
/// `max_poll_attempts`. `forced_release_after` is the stale-lock escape
/// valve: after that many consecutive "still locked" observations the waiter
/// forcibly releases the lock and keeps polling. It is `None` (disabled) by
/// default because a forced release can race a genuinely live holder.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockSettings {
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub forced_release_after: Option<u32>,
}

impl LockSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for LockSettings {
    /// One-second polls, thirty attempts, escape valve disabled.
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_poll_attempts: 30,
            forced_release_after: None,
        }
    }
}

/// Opaque key/value settings handed to each listener's one-time
/// `initialize` hook before any patching begins.
pub type ListenerSettings = BTreeMap<String, String>;
