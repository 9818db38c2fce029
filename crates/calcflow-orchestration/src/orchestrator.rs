//! Start, track and tear down calculations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use calcflow_cache::{CalcCache, QueryKey};
use calcflow_core::constants::INITIAL_MESSAGE;
use calcflow_core::{
    CalcId, CalcStatus, CalculationTarget, HandlerContext, HandlerFactory, ProgressInfo,
    ProgressTracker, StartConfig, StartError, TrackOptions,
};

use crate::persister::ResultPersister;
use crate::updater::{LoopEnd, ProgressUpdater, SettleCallback};

/// Result of a successful `start_calculation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The remote request was issued and polling began.
    Started,
    /// A polling loop for this calculation was already running.
    AlreadyRunning,
}

/// Debug view of one running calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCalculation {
    /// Calculation id.
    pub calc_id: CalcId,
    /// Target type.
    pub target: CalculationTarget,
    /// Tracker progress, if the tracker still knows the calculation.
    pub progress: Option<f64>,
    /// Tracker message.
    pub message: Option<String>,
}

/// Entry point for starting calculations.
pub struct CalcOrchestrator {
    cache: Arc<CalcCache>,
    tracker: Arc<ProgressTracker>,
    updater: ProgressUpdater,
    factory: Arc<dyn HandlerFactory>,
    persister: Arc<ResultPersister>,
    ctx: HandlerContext,
    owned: Arc<Mutex<HashSet<QueryKey>>>,
    starting: Mutex<HashMap<CalcId, CalculationTarget>>,
}

/// Claim on an id while its start is in flight. Released on drop.
struct StartClaim<'a> {
    starting: &'a Mutex<HashMap<CalcId, CalculationTarget>>,
    calc_id: CalcId,
}

impl<'a> StartClaim<'a> {
    /// Claim `calc_id`, or return the target already holding it.
    fn acquire(
        starting: &'a Mutex<HashMap<CalcId, CalculationTarget>>,
        calc_id: &CalcId,
        target: CalculationTarget,
    ) -> Result<Self, CalculationTarget> {
        let mut claims = starting.lock();
        if let Some(holder) = claims.get(calc_id) {
            return Err(*holder);
        }
        claims.insert(calc_id.clone(), target);
        Ok(Self {
            starting,
            calc_id: calc_id.clone(),
        })
    }
}

impl Drop for StartClaim<'_> {
    fn drop(&mut self) {
        self.starting.lock().remove(&self.calc_id);
    }
}

impl CalcOrchestrator {
    /// Assemble an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        cache: Arc<CalcCache>,
        updater: ProgressUpdater,
        factory: Arc<dyn HandlerFactory>,
        persister: Arc<ResultPersister>,
        ctx: HandlerContext,
    ) -> Self {
        Self {
            cache,
            tracker: Arc::clone(&ctx.tracker),
            updater,
            factory,
            persister,
            ctx,
            owned: Arc::new(Mutex::new(HashSet::new())),
            starting: Mutex::new(HashMap::new()),
        }
    }

    /// Start a calculation.
    ///
    /// Returns once the remote request has been issued. A failed start
    /// leaves no tracker record, cache entry or polling loop behind.
    ///
    /// Ids are unique across targets: a start whose id is in flight under
    /// the other target fails with [`StartError::Registration`] before
    /// anything is submitted.
    pub fn start_calculation(&self, config: &StartConfig) -> Result<StartOutcome, StartError> {
        let calc_id = config.calc_id();
        let target = config.target_type();
        let key = QueryKey::calculation(target, calc_id);

        let _claim = match StartClaim::acquire(&self.starting, calc_id, target) {
            Ok(claim) => claim,
            Err(holder) if holder == target => {
                debug!(calc_id = %calc_id, target = %target, "calculation already starting");
                return Ok(StartOutcome::AlreadyRunning);
            }
            Err(holder) => {
                warn!(
                    calc_id = %calc_id,
                    target = %target,
                    holder = %holder,
                    "id is starting under another target"
                );
                return Err(StartError::Registration(calc_id.to_string()));
            }
        };
        if self.updater.is_running(&key) {
            debug!(calc_id = %calc_id, target = %target, "calculation already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        if self.tracker.is_active(calc_id) {
            warn!(calc_id = %calc_id, target = %target, "id is still tracked");
            return Err(StartError::Registration(calc_id.to_string()));
        }

        let handler = self.factory.create(config, &self.ctx)?;
        let outcome = handler.start().map_err(StartError::Remote)?;

        let kind = config.kind();
        let registered = self.tracker.register_with(
            calc_id,
            outcome,
            TrackOptions {
                estimated_duration: Some(self.ctx.settings.estimated_duration(kind)),
                model: Some(self.ctx.settings.progress_model(kind)),
            },
        );
        if !registered {
            warn!(calc_id = %calc_id, "tracker refused registration");
            return Err(StartError::Registration(calc_id.to_string()));
        }

        // A new run replaces a finished one.
        let previous = self
            .cache
            .get(&key)
            .filter(CalcStatus::is_terminal)
            .and_then(|_| self.cache.remove(&key));
        self.cache
            .set(key.clone(), CalcStatus::pending(0.0, INITIAL_MESSAGE));

        let started = self.updater.start_progress_updates_with(
            key.clone(),
            handler,
            Some(self.settle_callback(config)),
        );
        match started {
            Ok(true) => {}
            Ok(false) => {
                debug!(calc_id = %calc_id, "updates already running, keeping existing loop");
                self.tracker.remove(calc_id);
                return Ok(StartOutcome::AlreadyRunning);
            }
            Err(e) => {
                warn!(calc_id = %calc_id, error = %e, "rolling back start");
                self.tracker.remove(calc_id);
                self.cache.remove(&key);
                if let Some(previous) = previous {
                    self.cache.set(key, previous);
                }
                return Err(e);
            }
        }

        self.owned.lock().insert(key);
        info!(calc_id = %calc_id, target = %target, kind = %kind, "calculation started");
        Ok(StartOutcome::Started)
    }

    fn settle_callback(&self, config: &StartConfig) -> SettleCallback {
        let tracker = Arc::clone(&self.tracker);
        let persister = Arc::clone(&self.persister);
        let owned = Arc::clone(&self.owned);
        let config = config.clone();
        Arc::new(move |key: &QueryKey, end: LoopEnd| {
            let calc_id = config.calc_id();
            match end {
                LoopEnd::Complete(result) => {
                    tracker.complete(calc_id, result.clone());
                    info!(calc_id = %calc_id, "calculation complete");
                    persister.on_complete(&config, &result);
                }
                LoopEnd::Error(error) => {
                    warn!(
                        calc_id = %calc_id,
                        code = %error.code,
                        retryable = error.retryable,
                        "calculation failed"
                    );
                    persister.on_error(&config, &error);
                    tracker.fail(calc_id, error);
                }
                LoopEnd::Lost => {
                    warn!(calc_id = %calc_id, "calculation lost");
                    tracker.remove(calc_id);
                }
            }
            owned.lock().remove(key);
        })
    }

    /// Stop every polling loop this orchestrator started.
    pub fn cleanup(&self) {
        let keys: Vec<QueryKey> = self.owned.lock().drain().collect();
        for key in &keys {
            if self.updater.stop_progress_updates(key) {
                // The handler is gone, so its outcome will never settle.
                if let Some((_, calc_id)) = key.as_calculation() {
                    if self.tracker.is_active(&calc_id) {
                        self.tracker.remove(&calc_id);
                    }
                }
            }
        }
        if !keys.is_empty() {
            debug!(count = keys.len(), "orchestrator cleaned up");
        }
    }

    /// Whether a polling loop is running for the calculation.
    #[must_use]
    pub fn is_running(&self, calc_id: &CalcId, target: CalculationTarget) -> bool {
        self.updater
            .is_running(&QueryKey::calculation(target, calc_id))
    }

    /// Running calculations, sorted by key.
    #[must_use]
    pub fn active_calculations(&self) -> Vec<ActiveCalculation> {
        self.updater
            .active_keys()
            .into_iter()
            .filter_map(|key| key.as_calculation())
            .map(|(target, calc_id)| {
                let info: Option<ProgressInfo> = self.tracker.get_progress(&calc_id);
                ActiveCalculation {
                    progress: info.as_ref().map(|i| i.progress),
                    message: info.map(|i| i.message),
                    calc_id,
                    target,
                }
            })
            .collect()
    }

    /// Shared progress tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }
}

impl Drop for CalcOrchestrator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::DefaultHandlerFactory;
    use crate::persister::MemoryResultStore;
    use crate::remote::{RemoteClient, SimulatedBehavior, SimulatedRemote};
    use crate::updater::ManualTicker;
    use calcflow_core::{ManualClock, Settings, SharedClock, StartRequest};
    use std::time::{Duration, Instant};

    struct Fixture {
        clock: Arc<ManualClock>,
        cache: Arc<CalcCache>,
        ticker: Arc<ManualTicker>,
        remote: Arc<SimulatedRemote>,
        orchestrator: CalcOrchestrator,
    }

    fn fixture(behavior: SimulatedBehavior) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let shared: SharedClock = clock.clone();
        let cache = Arc::new(CalcCache::with_clock(Arc::clone(&shared), Default::default()));
        let ticker = Arc::new(ManualTicker::new());
        let remote = Arc::new(SimulatedRemote::with_clock(behavior, Arc::clone(&shared)));
        let settings = Arc::new(Settings {
            remote_poll_interval: Duration::from_millis(5),
            persist_retry_delay: Duration::from_millis(1),
            ..Settings::default()
        });
        let ctx = HandlerContext {
            tracker: Arc::new(ProgressTracker::new(Arc::clone(&shared))),
            clock: shared,
            settings,
        };
        let client: Arc<dyn RemoteClient> = remote.clone();
        let orchestrator = CalcOrchestrator::new(
            Arc::clone(&cache),
            ProgressUpdater::with_ticks(Arc::clone(&cache), ticker.clone()),
            Arc::new(DefaultHandlerFactory::new(client)),
            Arc::new(ResultPersister::with_retry_delay(
                Arc::new(MemoryResultStore::new()),
                Arc::clone(&cache),
                Duration::from_millis(1),
            )),
            ctx,
        );
        Fixture {
            clock,
            cache,
            ticker,
            remote,
            orchestrator,
        }
    }

    fn config(id: &str) -> StartConfig {
        StartConfig::try_from(StartRequest {
            calc_id: id.into(),
            target_type: "report".into(),
            calc_kind: "economy".into(),
            country_id: "us".into(),
            baseline_policy_id: "1".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn key(id: &str) -> QueryKey {
        QueryKey::calculation(CalculationTarget::Report, &CalcId::new(id).unwrap())
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn start_writes_initial_status_and_registers() {
        let f = fixture(SimulatedBehavior::default());
        assert_eq!(
            f.orchestrator.start_calculation(&config("r1")).unwrap(),
            StartOutcome::Started
        );
        let status = f.cache.get(&key("r1")).unwrap();
        assert_eq!(status, CalcStatus::pending(0.0, INITIAL_MESSAGE));
        assert!(f.orchestrator.tracker().is_active(&CalcId::new("r1").unwrap()));
        assert!(f.orchestrator.is_running(&CalcId::new("r1").unwrap(), CalculationTarget::Report));
    }

    #[test]
    fn second_start_is_already_running() {
        let f = fixture(SimulatedBehavior::default());
        f.orchestrator.start_calculation(&config("r1")).unwrap();
        assert_eq!(
            f.orchestrator.start_calculation(&config("r1")).unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(f.remote.submitted(), 1);
    }

    #[test]
    fn concurrent_starts_submit_once() {
        for round in 0..50 {
            let f = fixture(SimulatedBehavior::default());
            let orchestrator = &f.orchestrator;
            let barrier = std::sync::Barrier::new(2);
            let cfg = config("r1");
            let outcomes: Vec<Result<StartOutcome, StartError>> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            orchestrator.start_calculation(&cfg)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
            let started = outcomes
                .iter()
                .filter(|o| matches!(o, Ok(StartOutcome::Started)))
                .count();
            let already = outcomes
                .iter()
                .filter(|o| matches!(o, Ok(StartOutcome::AlreadyRunning)))
                .count();
            assert_eq!((started, already), (1, 1), "round {round}: {outcomes:?}");
            assert_eq!(f.remote.submitted(), 1, "round {round}");
        }
    }

    #[test]
    fn id_in_flight_under_other_target_is_refused_before_submission() {
        let f = fixture(SimulatedBehavior::default());
        f.orchestrator.start_calculation(&config("x1")).unwrap();
        let simulation = StartConfig::try_from(StartRequest {
            calc_id: "x1".into(),
            target_type: "simulation".into(),
            calc_kind: "household".into(),
            country_id: "us".into(),
            population_id: "hh".into(),
            baseline_policy_id: "1".into(),
            ..Default::default()
        })
        .unwrap();

        let err = f.orchestrator.start_calculation(&simulation).unwrap_err();
        assert!(matches!(err, StartError::Registration(_)));
        assert_eq!(f.remote.submitted(), 1);
        let id = CalcId::new("x1").unwrap();
        assert!(f.orchestrator.is_running(&id, CalculationTarget::Report));
        assert!(!f.orchestrator.is_running(&id, CalculationTarget::Simulation));
        assert!(f.orchestrator.tracker().is_active(&id));
    }

    #[test]
    fn rejected_submission_leaves_nothing() {
        let f = fixture(SimulatedBehavior {
            reject_submissions: true,
            ..SimulatedBehavior::default()
        });
        let err = f.orchestrator.start_calculation(&config("r1")).unwrap_err();
        assert!(matches!(err, StartError::Remote(_)));
        assert!(f.cache.get(&key("r1")).is_none());
        assert!(f.orchestrator.tracker().is_empty());
        assert!(f.orchestrator.active_calculations().is_empty());
    }

    #[test]
    fn completion_settles_tracker_and_stops_loop() {
        let f = fixture(SimulatedBehavior::default());
        f.orchestrator.start_calculation(&config("r1")).unwrap();
        let id = CalcId::new("r1").unwrap();

        f.clock.advance(Duration::from_secs(60));
        assert!(wait_until(|| !f.orchestrator.tracker().is_active(&id)));
        assert!(f.ticker.tick(&key("r1")));
        assert!(wait_until(|| !f.orchestrator.is_running(&id, CalculationTarget::Report)));
        assert!(f.cache.get(&key("r1")).unwrap().is_complete());
        assert!(wait_until(|| f.orchestrator.tracker().result(&id).is_some()));
    }

    #[test]
    fn cleanup_stops_owned_loops() {
        let f = fixture(SimulatedBehavior::default());
        f.orchestrator.start_calculation(&config("r1")).unwrap();
        f.orchestrator.start_calculation(&config("r2")).unwrap();
        assert_eq!(f.orchestrator.active_calculations().len(), 2);
        f.orchestrator.cleanup();
        assert!(f.orchestrator.active_calculations().is_empty());
        assert!(!f.ticker.tick(&key("r1")));
        assert!(f.orchestrator.tracker().active_ids().is_empty());
        assert_eq!(
            f.orchestrator.start_calculation(&config("r1")).unwrap(),
            StartOutcome::Started
        );
    }

    #[test]
    fn restart_after_error_replaces_terminal_entry() {
        let f = fixture(SimulatedBehavior {
            fail_all: true,
            ..SimulatedBehavior::default()
        });
        f.orchestrator.start_calculation(&config("r1")).unwrap();
        f.clock.advance(Duration::from_secs(60));
        let id = CalcId::new("r1").unwrap();
        assert!(wait_until(|| !f.orchestrator.tracker().is_active(&id)));
        assert!(f.ticker.tick(&key("r1")));
        assert!(wait_until(|| !f.orchestrator.is_running(&id, CalculationTarget::Report)));
        assert!(f.cache.get(&key("r1")).unwrap().is_error());

        f.remote.update(|b| b.fail_all = false);
        assert_eq!(
            f.orchestrator.start_calculation(&config("r1")).unwrap(),
            StartOutcome::Started
        );
        assert!(f.cache.get(&key("r1")).unwrap().is_pending());
    }
}
