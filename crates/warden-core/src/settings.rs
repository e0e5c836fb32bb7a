//! Auto-lock settings

use serde::{Deserialize, Serialize};

/// Default inactivity timeout in minutes
pub const DEFAULT_AUTO_LOCK_MINUTES: u32 = 15;

/// Upper bound accepted from the UI (one day)
pub const MAX_AUTO_LOCK_MINUTES: u32 = 24 * 60;

/// Persisted auto-lock configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoLockSettings {
    /// Inactivity timeout in minutes; zero disables the timer
    pub time_auto_lock: u32,
    /// With a zero timeout, lock right after each sensitive action
    pub always_lock: bool,
}

impl AutoLockSettings {
    /// Whether the countdown timer should be armed
    pub fn timer_enabled(&self) -> bool {
        self.time_auto_lock > 0
    }

    /// Whether sensitive actions trigger an immediate lock
    pub fn locks_after_action(&self) -> bool {
        self.time_auto_lock == 0 && self.always_lock
    }
}

impl Default for AutoLockSettings {
    fn default() -> Self {
        Self {
            time_auto_lock: DEFAULT_AUTO_LOCK_MINUTES,
            always_lock: false,
        }
    }
}
