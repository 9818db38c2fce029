//! Remote computation service seam and an in-process simulation of it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use calcflow_core::error_codes::{CALCULATION_FAILED, REMOTE_POLL_FAILED, REMOTE_SUBMIT_FAILED};
use calcflow_core::{system_clock, CalcError, CalcId, CalcKind, SharedClock, StartConfig};

/// Payload submitted to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcRequest {
    /// Calculation id.
    pub calc_id: CalcId,
    /// Kind of computation.
    pub kind: CalcKind,
    /// Country model.
    pub country_id: String,
    /// Household or geography id.
    pub population_id: String,
    /// Policy to simulate.
    pub policy_id: String,
    /// Baseline policy to compare against.
    pub baseline_policy_id: String,
    /// Region code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Simulation year.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
}

impl From<&StartConfig> for CalcRequest {
    fn from(config: &StartConfig) -> Self {
        let params = config.params();
        Self {
            calc_id: config.calc_id().clone(),
            kind: config.kind(),
            country_id: params.country_id.clone(),
            population_id: params.population_id.clone(),
            policy_id: params.policies.effective().to_string(),
            baseline_policy_id: params.policies.baseline.clone(),
            region: params.region.clone(),
            year: params.year.clone(),
        }
    }
}

/// Handle to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobTicket {
    /// Server-side job id.
    pub job_id: String,
    /// Calculation the job belongs to.
    pub calc_id: CalcId,
}

/// Remote job state as reported by a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteJobState {
    /// Waiting for a worker.
    Queued {
        /// 1-based queue position.
        position: u32,
    },
    /// Running; the server may or may not report progress.
    Running {
        /// Server-side progress (percent).
        progress: Option<f64>,
    },
    /// Finished with a result.
    Completed(Value),
    /// Finished with an error.
    Failed(CalcError),
}

/// Remote computation service.
pub trait RemoteClient: Send + Sync {
    /// Submit a calculation.
    fn submit(&self, request: &CalcRequest) -> Result<JobTicket, CalcError>;

    /// Poll a submitted job.
    fn poll(&self, ticket: &JobTicket) -> Result<RemoteJobState, CalcError>;
}

#[derive(Debug, Clone)]
struct SimulatedJob {
    request: CalcRequest,
    submitted_at: Instant,
}

/// Behaviour knobs of [`SimulatedRemote`].
#[derive(Debug, Clone)]
pub struct SimulatedBehavior {
    /// Time spent queued before running.
    pub queue_time: Duration,
    /// Household run time.
    pub household_duration: Duration,
    /// Economy run time.
    pub economy_duration: Duration,
    /// Whether running jobs report server-side progress.
    pub report_progress: bool,
    /// Calculation ids whose jobs fail.
    pub failing: HashSet<CalcId>,
    /// Fail every job.
    pub fail_all: bool,
    /// Reject every submission.
    pub reject_submissions: bool,
    /// Every poll errors out.
    pub unreachable: bool,
}

impl Default for SimulatedBehavior {
    fn default() -> Self {
        Self {
            queue_time: Duration::ZERO,
            household_duration: Duration::from_secs(2),
            economy_duration: Duration::from_secs(5),
            report_progress: false,
            failing: HashSet::new(),
            fail_all: false,
            reject_submissions: false,
            unreachable: false,
        }
    }
}

/// In-process remote service whose jobs advance with a clock.
pub struct SimulatedRemote {
    behavior: Mutex<SimulatedBehavior>,
    jobs: Mutex<HashMap<String, SimulatedJob>>,
    next_job: AtomicU64,
    clock: SharedClock,
}

impl SimulatedRemote {
    /// Remote on the system clock.
    #[must_use]
    pub fn new(behavior: SimulatedBehavior) -> Self {
        Self::with_clock(behavior, system_clock())
    }

    /// Remote on an explicit clock.
    #[must_use]
    pub fn with_clock(behavior: SimulatedBehavior, clock: SharedClock) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            jobs: Mutex::new(HashMap::new()),
            next_job: AtomicU64::new(1),
            clock,
        }
    }

    /// Change behaviour for subsequent polls and submissions.
    pub fn update(&self, f: impl FnOnce(&mut SimulatedBehavior)) {
        f(&mut self.behavior.lock());
    }

    /// Number of jobs ever submitted.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.jobs.lock().len()
    }

    fn run_time(behavior: &SimulatedBehavior, kind: CalcKind) -> Duration {
        match kind {
            CalcKind::Household => behavior.household_duration,
            CalcKind::Economy => behavior.economy_duration,
        }
    }

    fn queue_position(&self, job: &SimulatedJob, queue_time: Duration, now: Instant) -> u32 {
        let ahead = self
            .jobs
            .lock()
            .values()
            .filter(|other| {
                other.submitted_at < job.submitted_at
                    && now.saturating_duration_since(other.submitted_at) < queue_time
            })
            .count();
        u32::try_from(ahead + 1).unwrap_or(u32::MAX)
    }
}

impl RemoteClient for SimulatedRemote {
    fn submit(&self, request: &CalcRequest) -> Result<JobTicket, CalcError> {
        if self.behavior.lock().reject_submissions {
            return Err(CalcError::new(
                "calculation service rejected the request",
                REMOTE_SUBMIT_FAILED,
                true,
            ));
        }
        let job_id = format!("job-{}", self.next_job.fetch_add(1, Ordering::Relaxed));
        self.jobs.lock().insert(
            job_id.clone(),
            SimulatedJob {
                request: request.clone(),
                submitted_at: self.clock.now(),
            },
        );
        debug!(job_id = %job_id, calc_id = %request.calc_id, "simulated job submitted");
        Ok(JobTicket {
            job_id,
            calc_id: request.calc_id.clone(),
        })
    }

    fn poll(&self, ticket: &JobTicket) -> Result<RemoteJobState, CalcError> {
        let behavior = self.behavior.lock().clone();
        if behavior.unreachable {
            return Err(CalcError::new(
                "calculation service unreachable",
                REMOTE_POLL_FAILED,
                true,
            ));
        }
        let job = self.jobs.lock().get(&ticket.job_id).cloned().ok_or_else(|| {
            CalcError::new(
                format!("unknown job {}", ticket.job_id),
                REMOTE_POLL_FAILED,
                false,
            )
        })?;

        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(job.submitted_at);
        if elapsed < behavior.queue_time {
            return Ok(RemoteJobState::Queued {
                position: self.queue_position(&job, behavior.queue_time, now),
            });
        }

        let run_time = Self::run_time(&behavior, job.request.kind);
        let running_for = elapsed - behavior.queue_time;
        if running_for < run_time {
            let progress = behavior
                .report_progress
                .then(|| running_for.as_secs_f64() / run_time.as_secs_f64() * 100.0);
            return Ok(RemoteJobState::Running { progress });
        }

        if behavior.fail_all || behavior.failing.contains(&job.request.calc_id) {
            return Ok(RemoteJobState::Failed(CalcError::new(
                format!("simulation of {} failed", job.request.calc_id),
                CALCULATION_FAILED,
                false,
            )));
        }
        Ok(RemoteJobState::Completed(simulated_result(&job.request)))
    }
}

/// Deterministic result payload for a request.
#[must_use]
pub fn simulated_result(request: &CalcRequest) -> Value {
    let seed: u64 = request
        .calc_id
        .as_str()
        .bytes()
        .chain(request.policy_id.bytes())
        .fold(17, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    #[allow(clippy::cast_precision_loss)]
    let impact = (seed % 2_000_000) as f64 - 1_000_000.0;
    json!({
        "calcId": request.calc_id,
        "kind": request.kind,
        "countryId": request.country_id,
        "policyId": request.policy_id,
        "budget": { "budgetaryImpact": impact },
    })
}
