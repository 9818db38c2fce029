//! Runtime settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calculation::CalcKind;
use crate::constants::{
    ABANDONED_RETENTION, DEFAULT_ESTIMATED_DURATION, DEFAULT_REMOTE_POLL_INTERVAL,
    DEFAULT_UPDATE_INTERVAL, ECONOMY_ESTIMATED_DURATION, HOUSEHOLD_ESTIMATED_DURATION,
    MAX_SYNTHETIC_PROGRESS, PERSIST_RETRY_DELAY, TERMINAL_RETENTION,
};
use crate::progress::ProgressModel;

/// Error loading a settings file.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The file could not be read.
    #[error("cannot read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid settings JSON.
    #[error("invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Timing and retention settings. Durations are milliseconds on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Interval between cache writes of a polling loop.
    #[serde(with = "millis")]
    pub update_interval: Duration,
    /// Interval between remote status polls inside a handler.
    #[serde(with = "millis")]
    pub remote_poll_interval: Duration,
    /// How long a terminal cache entry is kept.
    #[serde(with = "millis")]
    pub terminal_retention: Duration,
    /// How long a pending entry is kept without writes.
    #[serde(with = "millis")]
    pub abandoned_retention: Duration,
    /// Estimate when nothing better is known.
    #[serde(with = "millis")]
    pub default_estimated_duration: Duration,
    /// Estimate for household calculations.
    #[serde(with = "millis")]
    pub household_estimated_duration: Duration,
    /// Estimate for economy calculations.
    #[serde(with = "millis")]
    pub economy_estimated_duration: Duration,
    /// Ceiling of synthetic progress (percent).
    pub max_synthetic_progress: f64,
    /// Delay before the single persistence retry.
    #[serde(with = "millis")]
    pub persist_retry_delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_interval: DEFAULT_UPDATE_INTERVAL,
            remote_poll_interval: DEFAULT_REMOTE_POLL_INTERVAL,
            terminal_retention: TERMINAL_RETENTION,
            abandoned_retention: ABANDONED_RETENTION,
            default_estimated_duration: DEFAULT_ESTIMATED_DURATION,
            household_estimated_duration: HOUSEHOLD_ESTIMATED_DURATION,
            economy_estimated_duration: ECONOMY_ESTIMATED_DURATION,
            max_synthetic_progress: MAX_SYNTHETIC_PROGRESS,
            persist_retry_delay: PERSIST_RETRY_DELAY,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str::<Self>(&text)?.normalize())
    }

    /// Normalize settings, applying defaults where values are zero.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.update_interval.is_zero() {
            self.update_interval = DEFAULT_UPDATE_INTERVAL;
        }
        if self.remote_poll_interval.is_zero() {
            self.remote_poll_interval = DEFAULT_REMOTE_POLL_INTERVAL;
        }
        if self.default_estimated_duration.is_zero() {
            self.default_estimated_duration = DEFAULT_ESTIMATED_DURATION;
        }
        if self.household_estimated_duration.is_zero() {
            self.household_estimated_duration = HOUSEHOLD_ESTIMATED_DURATION;
        }
        if self.economy_estimated_duration.is_zero() {
            self.economy_estimated_duration = ECONOMY_ESTIMATED_DURATION;
        }
        if !(self.max_synthetic_progress > 0.0 && self.max_synthetic_progress < 100.0) {
            self.max_synthetic_progress = MAX_SYNTHETIC_PROGRESS;
        }
        self
    }

    /// Estimated duration for a calculation kind.
    #[must_use]
    pub fn estimated_duration(&self, kind: CalcKind) -> Duration {
        match kind {
            CalcKind::Household => self.household_estimated_duration,
            CalcKind::Economy => self.economy_estimated_duration,
        }
    }

    /// Progress model for a calculation kind.
    #[must_use]
    pub fn progress_model(&self, kind: CalcKind) -> ProgressModel {
        ProgressModel::for_kind(kind).with_max_progress(self.max_synthetic_progress)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.update_interval, Duration::from_millis(500));
        assert_eq!(s.remote_poll_interval, Duration::from_secs(2));
        assert_eq!(s.terminal_retention, Duration::from_secs(600));
        assert_eq!(s.abandoned_retention, Duration::from_secs(1800));
        assert_eq!(s.estimated_duration(CalcKind::Economy), Duration::from_secs(300));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: Settings = serde_json::from_str(r#"{"updateInterval": 50}"#).unwrap();
        assert_eq!(s.update_interval, Duration::from_millis(50));
        assert_eq!(s.persist_retry_delay, PERSIST_RETRY_DELAY);
    }

    #[test]
    fn normalize_zero_values() {
        let s = Settings {
            update_interval: Duration::ZERO,
            max_synthetic_progress: 0.0,
            ..Settings::default()
        }
        .normalize();
        assert_eq!(s.update_interval, DEFAULT_UPDATE_INTERVAL);
        assert!((s.max_synthetic_progress - MAX_SYNTHETIC_PROGRESS).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_model_uses_ceiling() {
        let s = Settings {
            max_synthetic_progress: 90.0,
            ..Settings::default()
        };
        assert!((s.progress_model(CalcKind::Household).max_progress - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn serializes_durations_as_millis() {
        let s = Settings::default();
        let text = serde_json::to_string(&s).unwrap();
        assert!(text.contains("\"terminalRetention\":600000"));
    }

    #[test]
    fn from_file_reads_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"remotePollInterval": 10}}"#).unwrap();
        let s = Settings::from_file(file.path()).unwrap();
        assert_eq!(s.remote_poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(SettingsError::Parse(_))
        ));
    }
}
