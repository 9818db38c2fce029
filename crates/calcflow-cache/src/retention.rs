//! Retention windows for cache entries.

use std::time::{Duration, Instant};

use calcflow_core::constants::{ABANDONED_RETENTION, TERMINAL_RETENTION};
use calcflow_core::{CalcStatus, Settings};

/// How long entries survive after their last write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Window after a terminal write.
    pub terminal: Duration,
    /// Window after a non-terminal write (abandoned calculations).
    pub abandoned: Duration,
}

impl RetentionPolicy {
    /// Policy from runtime settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            terminal: settings.terminal_retention,
            abandoned: settings.abandoned_retention,
        }
    }

    /// Retention window for a value.
    #[must_use]
    pub fn ttl_for(&self, status: &CalcStatus) -> Duration {
        if status.is_terminal() {
            self.terminal
        } else {
            self.abandoned
        }
    }

    /// Whether a value written at `written_at` has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, status: &CalcStatus, written_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(written_at) > self.ttl_for(status)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            terminal: TERMINAL_RETENTION,
            abandoned: ABANDONED_RETENTION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn terminal_and_pending_windows() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.ttl_for(&CalcStatus::complete(json!(1))), Duration::from_secs(600));
        assert_eq!(policy.ttl_for(&CalcStatus::pending(1.0, "x")), Duration::from_secs(1800));
    }

    #[test]
    fn expiry_is_strictly_after_window() {
        let policy = RetentionPolicy::default();
        let t0 = Instant::now();
        let status = CalcStatus::complete(json!(1));
        assert!(!policy.is_expired(&status, t0, t0 + Duration::from_secs(600)));
        assert!(policy.is_expired(&status, t0, t0 + Duration::from_secs(601)));
    }
}
