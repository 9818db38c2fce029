//! In-memory registry of in-flight calculations and their synthetic progress.
//!
//! The tracker never mutates a record while computing progress: progress is
//! a pure function of elapsed time read from the injected clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::calculation::CalcId;
use crate::clock::{system_clock, SharedClock};
use crate::constants::{COMPLETE_MESSAGE, COMPLETE_PROGRESS, DEFAULT_ESTIMATED_DURATION};
use crate::progress::{synthetic_progress, PendingOutcome, ProgressModel, Settlement};
use crate::status::{CalcError, ProgressInfo};

#[derive(Debug, Clone)]
enum RecordState {
    Active,
    Completed { at: Instant, result: Value },
    Failed { at: Instant, error: CalcError },
}

#[derive(Debug, Clone)]
struct ProgressRecord {
    started_at: Instant,
    estimated_duration: Duration,
    model: ProgressModel,
    state: RecordState,
    outcome: PendingOutcome,
}

impl ProgressRecord {
    fn is_active(&self) -> bool {
        matches!(self.state, RecordState::Active) && !self.outcome.is_resolved()
    }

    fn settled_at(&self) -> Option<Instant> {
        match self.state {
            RecordState::Active => None,
            RecordState::Completed { at, .. } | RecordState::Failed { at, .. } => Some(at),
        }
    }
}

/// Registration parameters beyond the id and outcome.
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Expected run time; the tracker default is used when `None`.
    pub estimated_duration: Option<Duration>,
    /// Message ladder; the household ladder is used when `None`.
    pub model: Option<ProgressModel>,
}

/// Registry of in-flight calculations.
///
/// Records are keyed by id alone, so an id names one in-flight calculation
/// whatever its target. `CalcOrchestrator` refuses a start that would reuse
/// an active id under another target.
pub struct ProgressTracker {
    records: RwLock<HashMap<CalcId, ProgressRecord>>,
    clock: SharedClock,
    default_estimate: Duration,
}

impl ProgressTracker {
    /// Create a tracker reading time from `clock`.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self::with_default_estimate(clock, DEFAULT_ESTIMATED_DURATION)
    }

    /// Create a tracker with a custom fallback estimate.
    #[must_use]
    pub fn with_default_estimate(clock: SharedClock, default_estimate: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
            default_estimate,
        }
    }

    /// Register a calculation with an optional duration estimate.
    ///
    /// Returns `false` (and changes nothing) if `calc_id` is already active.
    /// A settled record is replaced.
    pub fn register(
        &self,
        calc_id: &CalcId,
        outcome: PendingOutcome,
        estimated_duration: Option<Duration>,
    ) -> bool {
        self.register_with(
            calc_id,
            outcome,
            TrackOptions {
                estimated_duration,
                model: None,
            },
        )
    }

    /// Register with full options.
    pub fn register_with(
        &self,
        calc_id: &CalcId,
        outcome: PendingOutcome,
        options: TrackOptions,
    ) -> bool {
        let mut records = self.records.write();
        if records.get(calc_id).is_some_and(ProgressRecord::is_active) {
            debug!(calc_id = %calc_id, "already tracked, ignoring registration");
            return false;
        }
        let estimated_duration = options.estimated_duration.unwrap_or(self.default_estimate);
        records.insert(
            calc_id.clone(),
            ProgressRecord {
                started_at: self.clock.now(),
                estimated_duration,
                model: options.model.unwrap_or_default(),
                state: RecordState::Active,
                outcome,
            },
        );
        debug!(calc_id = %calc_id, estimate_ms = estimated_duration.as_millis(), "tracking");
        true
    }

    /// Progress of a calculation.
    ///
    /// `None` when unregistered or failed (including an outcome that resolved
    /// to an error before `fail` was called).
    #[must_use]
    pub fn get_progress(&self, calc_id: &CalcId) -> Option<ProgressInfo> {
        let records = self.records.read();
        let record = records.get(calc_id)?;
        match &record.state {
            RecordState::Completed { .. } => Some(complete_info()),
            RecordState::Failed { .. } => None,
            RecordState::Active => match record.outcome.peek() {
                Some(Settlement::Completed(_)) => Some(complete_info()),
                Some(Settlement::Failed(_)) => None,
                None => {
                    let elapsed = self.clock.now().saturating_duration_since(record.started_at);
                    Some(synthetic_progress(
                        elapsed,
                        record.estimated_duration,
                        &record.model,
                    ))
                }
            },
        }
    }

    /// Mark a calculation complete. Returns `false` if it is not registered.
    pub fn complete(&self, calc_id: &CalcId, result: Value) -> bool {
        let at = self.clock.now();
        self.settle(calc_id, RecordState::Completed { at, result })
    }

    /// Mark a calculation failed. Returns `false` if it is not registered.
    pub fn fail(&self, calc_id: &CalcId, error: CalcError) -> bool {
        let at = self.clock.now();
        self.settle(calc_id, RecordState::Failed { at, error })
    }

    fn settle(&self, calc_id: &CalcId, state: RecordState) -> bool {
        let mut records = self.records.write();
        match records.get_mut(calc_id) {
            Some(record) => {
                record.state = state;
                true
            }
            None => {
                debug!(calc_id = %calc_id, "settle for untracked calculation");
                false
            }
        }
    }

    /// Whether the calculation is registered and not yet settled.
    #[must_use]
    pub fn is_active(&self, calc_id: &CalcId) -> bool {
        self.records
            .read()
            .get(calc_id)
            .is_some_and(ProgressRecord::is_active)
    }

    /// Result recorded by `complete`, if any.
    #[must_use]
    pub fn result(&self, calc_id: &CalcId) -> Option<Value> {
        match &self.records.read().get(calc_id)?.state {
            RecordState::Completed { result, .. } => Some(result.clone()),
            _ => None,
        }
    }

    /// Error recorded by `fail`, if any.
    #[must_use]
    pub fn error(&self, calc_id: &CalcId) -> Option<CalcError> {
        match &self.records.read().get(calc_id)?.state {
            RecordState::Failed { error, .. } => Some(error.clone()),
            _ => None,
        }
    }

    /// Drop a record regardless of its state.
    pub fn remove(&self, calc_id: &CalcId) -> bool {
        self.records.write().remove(calc_id).is_some()
    }

    /// Drop records settled more than `max_age` ago. Returns how many were dropped.
    pub fn prune_settled(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| {
            record
                .settled_at()
                .is_none_or(|at| now.saturating_duration_since(at) <= max_age)
        });
        before - records.len()
    }

    /// Ids of active calculations, sorted.
    #[must_use]
    pub fn active_ids(&self) -> Vec<CalcId> {
        let mut ids: Vec<CalcId> = self
            .records
            .read()
            .iter()
            .filter(|(_, record)| record.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of records (active or settled).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the tracker holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

fn complete_info() -> ProgressInfo {
    ProgressInfo {
        progress: COMPLETE_PROGRESS,
        message: COMPLETE_MESSAGE.to_string(),
        estimated_time_remaining: Duration::ZERO,
    }
}
