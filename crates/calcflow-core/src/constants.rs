//! Constants for polling cadence, retention windows, and synthetic progress.

use std::time::Duration;

/// Interval between two updater ticks for one calculation.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Interval at which handler workers poll the remote service.
pub const DEFAULT_REMOTE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long a terminal cache entry stays readable after its last write.
pub const TERMINAL_RETENTION: Duration = Duration::from_secs(10 * 60);

/// How long a pending cache entry with no further writes survives (abandoned calculation).
pub const ABANDONED_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Estimate used when the caller registers a calculation without one.
pub const DEFAULT_ESTIMATED_DURATION: Duration = Duration::from_secs(60);

/// Typical duration of a household calculation.
pub const HOUSEHOLD_ESTIMATED_DURATION: Duration = Duration::from_secs(45);

/// Typical duration of a population-wide (economy) calculation.
pub const ECONOMY_ESTIMATED_DURATION: Duration = Duration::from_secs(5 * 60);

/// Synthetic progress never reaches this value until the outcome settles.
pub const MAX_SYNTHETIC_PROGRESS: f64 = 95.0;

/// Progress reported once a calculation completed.
pub const COMPLETE_PROGRESS: f64 = 100.0;

/// Message reported once a calculation completed.
pub const COMPLETE_MESSAGE: &str = "Complete!";

/// Message used for a freshly started calculation.
pub const INITIAL_MESSAGE: &str = "Initializing calculation...";

/// Delay before the single persistence retry.
pub const PERSIST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Consecutive remote poll failures tolerated before a calculation is failed.
pub const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 3;

/// Error codes carried by [`crate::status::CalcError`].
pub mod error_codes {
    /// The remote service rejected the initial submission.
    pub const REMOTE_SUBMIT_FAILED: &str = "REMOTE_SUBMIT_FAILED";
    /// Polling the remote service failed repeatedly.
    pub const REMOTE_POLL_FAILED: &str = "REMOTE_POLL_FAILED";
    /// The remote computation reported a failure.
    pub const CALCULATION_FAILED: &str = "CALCULATION_FAILED";
    /// The handler no longer knows about the calculation.
    pub const CALCULATION_LOST: &str = "CALCULATION_LOST";
}

/// Process exit codes used by the `calcflow` binary.
pub mod exit_codes {
    /// Every calculation completed.
    pub const SUCCESS: i32 = 0;
    /// Generic error.
    pub const ERROR_GENERIC: i32 = 1;
    /// At least one calculation ended in error.
    pub const ERROR_CALCULATION: i32 = 3;
    /// Invalid configuration or request.
    pub const ERROR_CONFIG: i32 = 4;
    /// Cancelled by the user (Ctrl+C).
    pub const ERROR_CANCELED: i32 = 130;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_entries_evict_before_abandoned_ones() {
        assert!(TERMINAL_RETENTION < ABANDONED_RETENTION);
    }

    #[test]
    fn synthetic_cap_is_below_complete() {
        assert!(MAX_SYNTHETIC_PROGRESS < COMPLETE_PROGRESS);
    }
}
