//! Synthetic progress, cancellation and the pending-outcome cell.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calculation::CalcKind;
use crate::constants::{INITIAL_MESSAGE, MAX_SYNTHETIC_PROGRESS};
use crate::status::{CalcError, ProgressInfo};

/// Cooperative cancellation token.
///
/// # Example
/// ```
/// use calcflow_core::progress::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_view = token.clone();
/// assert!(!worker_view.is_cancelled());
///
/// token.cancel();
/// assert!(worker_view.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Final value of a remote computation.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Result payload.
    Completed(Value),
    /// Terminal failure.
    Failed(CalcError),
}

impl Settlement {
    /// Whether the computation succeeded.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[derive(Debug, Default)]
struct OutcomeCell {
    value: Mutex<Option<Settlement>>,
    ready: Condvar,
}

/// Read side of an in-flight remote computation.
///
/// Clones share one cell. The cell is written at most once, by the paired
/// [`OutcomeResolver`].
#[derive(Debug, Clone)]
pub struct PendingOutcome {
    cell: Arc<OutcomeCell>,
}

/// Write side of a [`PendingOutcome`].
#[derive(Debug)]
pub struct OutcomeResolver {
    cell: Arc<OutcomeCell>,
}

impl PendingOutcome {
    /// Create an unresolved outcome and its resolver.
    #[must_use]
    pub fn channel() -> (Self, OutcomeResolver) {
        let cell = Arc::new(OutcomeCell::default());
        (
            Self {
                cell: Arc::clone(&cell),
            },
            OutcomeResolver { cell },
        )
    }

    /// An outcome that is already settled.
    #[must_use]
    pub fn settled(value: Settlement) -> Self {
        let (outcome, resolver) = Self::channel();
        resolver.resolve(value);
        outcome
    }

    /// Whether the computation has settled either way.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.cell.value.lock().is_some()
    }

    /// Current settlement, if any.
    #[must_use]
    pub fn peek(&self) -> Option<Settlement> {
        self.cell.value.lock().clone()
    }

    /// Block until settled or until `timeout` elapses.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Settlement> {
        let deadline = Instant::now() + timeout;
        let mut value = self.cell.value.lock();
        while value.is_none() {
            if self.cell.ready.wait_until(&mut value, deadline).timed_out() {
                break;
            }
        }
        value.clone()
    }
}

impl OutcomeResolver {
    /// Settle the outcome. Returns `false` if it was already settled.
    pub fn resolve(&self, value: Settlement) -> bool {
        let mut slot = self.cell.value.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        drop(slot);
        self.cell.ready.notify_all();
        true
    }

    /// Settle with a result.
    pub fn complete(&self, result: Value) -> bool {
        self.resolve(Settlement::Completed(result))
    }

    /// Settle with an error.
    pub fn fail(&self, error: CalcError) -> bool {
        self.resolve(Settlement::Failed(error))
    }

    /// Whether the outcome has settled.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.cell.value.lock().is_some()
    }
}

/// One rung of the message ladder: `message` applies while progress is below `below`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStage {
    /// Exclusive upper bound (percent).
    pub below: f64,
    /// Message shown in this stage.
    pub message: String,
}

/// Thresholds and messages for synthetic progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressModel {
    /// Ceiling for synthetic progress (percent).
    pub max_progress: f64,
    /// Stages in ascending order of `below`.
    pub stages: Vec<MessageStage>,
    /// Message once every stage has been passed.
    pub final_message: String,
}

impl ProgressModel {
    fn ladder(stages: [(f64, &str); 4]) -> Self {
        Self {
            max_progress: MAX_SYNTHETIC_PROGRESS,
            stages: stages
                .into_iter()
                .map(|(below, message)| MessageStage {
                    below,
                    message: message.to_string(),
                })
                .collect(),
            final_message: "Finalizing results...".to_string(),
        }
    }

    /// Ladder for household calculations.
    #[must_use]
    pub fn household() -> Self {
        Self::ladder([
            (10.0, INITIAL_MESSAGE),
            (30.0, "Loading household data..."),
            (60.0, "Running policy simulation..."),
            (80.0, "Calculating impacts..."),
        ])
    }

    /// Ladder for population-wide calculations.
    #[must_use]
    pub fn economy() -> Self {
        Self::ladder([
            (10.0, INITIAL_MESSAGE),
            (30.0, "Loading population data..."),
            (60.0, "Running economy-wide simulation..."),
            (80.0, "Aggregating distributional impacts..."),
        ])
    }

    /// Ladder for a calculation kind.
    #[must_use]
    pub fn for_kind(kind: CalcKind) -> Self {
        match kind {
            CalcKind::Household => Self::household(),
            CalcKind::Economy => Self::economy(),
        }
    }

    /// Override the progress ceiling.
    #[must_use]
    pub fn with_max_progress(mut self, max_progress: f64) -> Self {
        self.max_progress = max_progress.clamp(0.0, 100.0);
        self
    }

    /// Message for a progress value.
    #[must_use]
    pub fn message_for(&self, progress: f64) -> &str {
        self.stages
            .iter()
            .find(|stage| progress < stage.below)
            .map_or(self.final_message.as_str(), |stage| stage.message.as_str())
    }
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self::household()
    }
}

/// Synthetic progress after `elapsed` of an `estimated` run.
///
/// Non-decreasing in `elapsed` and capped at `model.max_progress`.
/// A zero estimate is treated as already overdue.
#[must_use]
pub fn synthetic_progress(
    elapsed: Duration,
    estimated: Duration,
    model: &ProgressModel,
) -> ProgressInfo {
    let raw = if estimated.is_zero() {
        100.0
    } else {
        elapsed.as_secs_f64() / estimated.as_secs_f64() * 100.0
    };
    let progress = raw.min(model.max_progress).max(0.0);
    ProgressInfo {
        progress,
        message: model.message_for(progress).to_string(),
        estimated_time_remaining: estimated.saturating_sub(elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    #[test]
    fn token_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn resolver_settles_once() {
        let (outcome, resolver) = PendingOutcome::channel();
        assert!(!outcome.is_resolved());
        assert!(resolver.complete(json!(1)));
        assert!(!resolver.fail(CalcError::new("late", "X", false)));
        assert_eq!(outcome.peek(), Some(Settlement::Completed(json!(1))));
    }

    #[test]
    fn wait_timeout_returns_none_when_unsettled() {
        let (outcome, _resolver) = PendingOutcome::channel();
        assert!(outcome.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn wait_timeout_wakes_on_resolve() {
        let (outcome, resolver) = PendingOutcome::channel();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.complete(json!({"ok": true}));
        });
        let settled = outcome.wait_timeout(Duration::from_secs(5));
        handle.join().unwrap();
        assert!(settled.unwrap().is_completed());
    }

    #[test]
    fn settled_outcome_is_resolved() {
        let outcome = PendingOutcome::settled(Settlement::Failed(CalcError::new("x", "E", true)));
        assert!(outcome.is_resolved());
    }

    #[test]
    fn progress_halfway() {
        let info = synthetic_progress(
            Duration::from_secs(30),
            Duration::from_secs(60),
            &ProgressModel::household(),
        );
        assert!((info.progress - 50.0).abs() < 1e-9);
        assert_eq!(info.message, "Running policy simulation...");
        assert_eq!(info.estimated_time_remaining, Duration::from_secs(30));
    }

    #[test]
    fn progress_capped_when_overdue() {
        let info = synthetic_progress(
            Duration::from_secs(600),
            Duration::from_secs(60),
            &ProgressModel::economy(),
        );
        assert!((info.progress - MAX_SYNTHETIC_PROGRESS).abs() < f64::EPSILON);
        assert_eq!(info.message, "Finalizing results...");
        assert_eq!(info.estimated_time_remaining, Duration::ZERO);
    }

    #[test]
    fn zero_estimate_is_capped() {
        let info = synthetic_progress(Duration::ZERO, Duration::ZERO, &ProgressModel::default());
        assert!((info.progress - MAX_SYNTHETIC_PROGRESS).abs() < f64::EPSILON);
    }

    #[test]
    fn ladder_thresholds() {
        let model = ProgressModel::household();
        assert_eq!(model.message_for(0.0), INITIAL_MESSAGE);
        assert_eq!(model.message_for(9.99), INITIAL_MESSAGE);
        assert_eq!(model.message_for(10.0), "Loading household data...");
        assert_eq!(model.message_for(79.0), "Calculating impacts...");
        assert_eq!(model.message_for(80.0), "Finalizing results...");
    }

    #[test]
    fn economy_ladder_differs() {
        let model = ProgressModel::for_kind(CalcKind::Economy);
        assert_eq!(model.message_for(15.0), "Loading population data...");
        assert_eq!(model.message_for(70.0), "Aggregating distributional impacts...");
    }

    #[test]
    fn custom_ceiling() {
        let model = ProgressModel::household().with_max_progress(90.0);
        let info = synthetic_progress(Duration::from_secs(100), Duration::from_secs(10), &model);
        assert!((info.progress - 90.0).abs() < f64::EPSILON);
    }
}
