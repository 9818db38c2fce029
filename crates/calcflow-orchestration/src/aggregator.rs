//! Combine several calculation statuses into one report-level status.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use calcflow_core::constants::COMPLETE_PROGRESS;
use calcflow_core::{CalcError, CalcStatus};

/// Overall state of a set of calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateState {
    /// No constituent has a known state yet.
    Initializing,
    /// Nothing was requested.
    Idle,
    /// At least one constituent is still running.
    Pending,
    /// Every constituent completed.
    Complete,
    /// At least one constituent failed.
    Error,
}

/// Derived status of several calculations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedCalcStatus {
    /// Overall state.
    pub state: AggregateState,
    /// Constituent statuses, in input order.
    pub calculations: Vec<CalcStatus>,
    /// Progress of the least advanced constituent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Constituent messages joined with `"; "`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Queue position of the least advanced constituent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    /// Remaining time of the least advanced constituent, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_ms: Option<u64>,
    /// First error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CalcError>,
    /// First result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl AggregatedCalcStatus {
    fn bare(state: AggregateState, calculations: Vec<CalcStatus>) -> Self {
        Self {
            state,
            calculations,
            progress: None,
            message: None,
            queue_position: None,
            estimated_time_remaining_ms: None,
            error: None,
            result: None,
        }
    }

    /// Whether no constituent has a known state yet.
    #[must_use]
    pub fn is_initializing(&self) -> bool {
        self.state == AggregateState::Initializing
    }

    /// Whether nothing was requested.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == AggregateState::Idle
    }

    /// Whether a constituent is still running.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == AggregateState::Pending
    }

    /// Whether every constituent completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == AggregateState::Complete
    }

    /// Whether a constituent failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.state == AggregateState::Error
    }

    /// Remaining time of the least advanced constituent.
    #[must_use]
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        self.estimated_time_remaining_ms.map(Duration::from_millis)
    }

    /// Results of every complete constituent, in input order.
    #[must_use]
    pub fn results(&self) -> Vec<&Value> {
        self.calculations.iter().filter_map(CalcStatus::result).collect()
    }
}

/// Aggregate constituent statuses.
///
/// Errors win over everything (first error reported). Otherwise any running
/// constituent makes the whole pending at the minimum progress.
#[must_use]
pub fn aggregate(statuses: &[CalcStatus]) -> AggregatedCalcStatus {
    let calculations = statuses.to_vec();
    if statuses.is_empty() {
        return AggregatedCalcStatus::bare(AggregateState::Idle, calculations);
    }

    if let Some(error) = statuses.iter().find_map(CalcStatus::error) {
        let mut agg = AggregatedCalcStatus::bare(AggregateState::Error, calculations);
        agg.message = Some(error.message.clone());
        agg.error = Some(error.clone());
        return agg;
    }

    if statuses.iter().all(|s| matches!(s, CalcStatus::Initializing)) {
        return AggregatedCalcStatus::bare(AggregateState::Initializing, calculations);
    }

    if statuses.iter().all(CalcStatus::is_complete) {
        let mut agg = AggregatedCalcStatus::bare(AggregateState::Complete, calculations);
        agg.progress = Some(COMPLETE_PROGRESS);
        agg.result = statuses.iter().find_map(CalcStatus::result).cloned();
        return agg;
    }

    // Pending: at least one pending or initializing, none failed.
    let least = statuses
        .iter()
        .min_by(|a, b| {
            let pa = a.progress().unwrap_or(0.0);
            let pb = b.progress().unwrap_or(0.0);
            pa.total_cmp(&pb)
        })
        .unwrap_or(&statuses[0]);

    let messages: Vec<&str> = statuses
        .iter()
        .filter_map(|s| match s {
            CalcStatus::Pending(p) if !p.message.is_empty() => Some(p.message.as_str()),
            _ => None,
        })
        .collect();

    let mut agg = AggregatedCalcStatus::bare(AggregateState::Pending, calculations);
    agg.progress = Some(least.progress().unwrap_or(0.0));
    agg.message = (!messages.is_empty()).then(|| messages.join("; "));
    if let CalcStatus::Pending(p) = least {
        agg.queue_position = p.queue_position;
        agg.estimated_time_remaining_ms = p.estimated_time_remaining_ms;
    }
    agg
}
