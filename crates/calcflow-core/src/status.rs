//! Calculation status model.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure payload of a calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CalcError {
    /// Human-readable description.
    pub message: String,
    /// Stable machine-readable code.
    pub code: String,
    /// Whether starting the calculation again is sensible.
    pub retryable: bool,
}

impl CalcError {
    /// Create a new error payload.
    #[must_use]
    pub fn new(message: impl Into<String>, code: impl Into<String>, retryable: bool) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            retryable,
        }
    }
}

/// Progress snapshot of a running calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStatus {
    /// Completion percentage in `[0, 100]`.
    pub progress: f64,
    /// Human-readable stage description.
    pub message: String,
    /// Position in the remote queue, if queued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    /// Remaining time estimate in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<u64>,
}

impl PendingStatus {
    /// Create a pending status with no queue or time information.
    #[must_use]
    pub fn new(progress: f64, message: impl Into<String>) -> Self {
        Self {
            progress: progress.clamp(0.0, 100.0),
            message: message.into(),
            queue_position: None,
            estimated_time_remaining_ms: None,
        }
    }

    /// Attach a queue position.
    #[must_use]
    pub fn with_queue_position(mut self, position: u32) -> Self {
        self.queue_position = Some(position);
        self
    }

    /// Attach a remaining time estimate.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_time_remaining(mut self, remaining: Duration) -> Self {
        self.estimated_time_remaining_ms = Some(remaining.as_millis() as u64);
        self
    }

    /// Remaining time estimate as a `Duration`.
    #[must_use]
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        self.estimated_time_remaining_ms.map(Duration::from_millis)
    }
}

/// Lifecycle state of one calculation.
///
/// Transitions only move toward a terminal variant (`Complete` or `Error`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CalcStatus {
    /// Nothing is known about the calculation yet.
    Initializing,
    /// The calculation is running.
    Pending(PendingStatus),
    /// The calculation finished with a result.
    Complete {
        /// Opaque result payload.
        result: Value,
    },
    /// The calculation failed.
    Error(CalcError),
}

impl CalcStatus {
    /// Shorthand for a pending status.
    #[must_use]
    pub fn pending(progress: f64, message: impl Into<String>) -> Self {
        Self::Pending(PendingStatus::new(progress, message))
    }

    /// Shorthand for a complete status.
    #[must_use]
    pub fn complete(result: Value) -> Self {
        Self::Complete { result }
    }

    /// Whether no further transitions can occur.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error(_))
    }

    /// Whether the calculation is running.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Whether the calculation finished successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    /// Whether the calculation failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Completion percentage: 0 while initializing, 100 once complete.
    #[must_use]
    pub fn progress(&self) -> Option<f64> {
        match self {
            Self::Initializing => Some(0.0),
            Self::Pending(p) => Some(p.progress),
            Self::Complete { .. } => Some(100.0),
            Self::Error(_) => None,
        }
    }

    /// Result payload, if complete.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Complete { result } => Some(result),
            _ => None,
        }
    }

    /// Error payload, if failed.
    #[must_use]
    pub fn error(&self) -> Option<&CalcError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Short lowercase state name.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Pending(_) => "pending",
            Self::Complete { .. } => "complete",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for CalcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(p) => write!(f, "pending ({:.0}%): {}", p.progress, p.message),
            Self::Error(err) => write!(f, "error: {err}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Progress answer of the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    /// Completion percentage in `[0, 100]`.
    pub progress: f64,
    /// Human-readable stage description.
    pub message: String,
    /// Remaining time estimate.
    pub estimated_time_remaining: Duration,
}

impl ProgressInfo {
    /// Convert into a pending cache status.
    #[must_use]
    pub fn to_status(&self) -> CalcStatus {
        CalcStatus::Pending(
            PendingStatus::new(self.progress, self.message.clone())
                .with_time_remaining(self.estimated_time_remaining),
        )
    }
}
