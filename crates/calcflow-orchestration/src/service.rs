//! Public facade over the orchestrator, cache, persister and aggregator.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use calcflow_cache::{CacheObserver, CalcCache, QueryKey, RetentionPolicy, SubscriptionId};
use calcflow_core::{
    system_clock, CalcId, CalcStatus, CalculationTarget, HandlerContext, HandlerFactory,
    ProgressTracker, Settings, SharedClock, StartConfig, StartError, StartRequest,
};

use crate::aggregator::{aggregate, AggregatedCalcStatus};
use crate::handlers::DefaultHandlerFactory;
use crate::monitor::{PendingReportsMonitor, ReportSummary};
use crate::orchestrator::{ActiveCalculation, CalcOrchestrator, StartOutcome};
use crate::persister::{MemoryResultStore, PersistError, ResultPersister, ResultStore};
use crate::remote::RemoteClient;
use crate::updater::{IntervalTicks, ProgressUpdater, TickSource};

/// Builder for [`CalculationService`].
pub struct ServiceBuilder {
    remote: Arc<dyn RemoteClient>,
    settings: Settings,
    clock: SharedClock,
    store: Option<Arc<dyn ResultStore>>,
    ticks: Option<Arc<dyn TickSource>>,
    factory: Option<Arc<dyn HandlerFactory>>,
}

impl ServiceBuilder {
    /// Use these settings.
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Use this clock for progress and retention.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Persist results into `store` instead of memory.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Drive polling loops from `ticks` instead of the update interval.
    #[must_use]
    pub fn ticks(mut self, ticks: Arc<dyn TickSource>) -> Self {
        self.ticks = Some(ticks);
        self
    }

    /// Replace the default handler factory.
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Assemble the service.
    #[must_use]
    pub fn build(self) -> CalculationService {
        let settings = Arc::new(self.settings.normalize());
        let cache = Arc::new(CalcCache::with_clock(
            Arc::clone(&self.clock),
            RetentionPolicy::from_settings(&settings),
        ));
        let tracker = Arc::new(ProgressTracker::with_default_estimate(
            Arc::clone(&self.clock),
            settings.default_estimated_duration,
        ));
        let ticks = self
            .ticks
            .unwrap_or_else(|| Arc::new(IntervalTicks::new(settings.update_interval)));
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(DefaultHandlerFactory::new(self.remote)));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryResultStore::new()));
        let persister = Arc::new(ResultPersister::with_retry_delay(
            store,
            Arc::clone(&cache),
            settings.persist_retry_delay,
        ));
        let ctx = HandlerContext {
            tracker,
            clock: self.clock,
            settings: Arc::clone(&settings),
        };
        let orchestrator = Arc::new(CalcOrchestrator::new(
            Arc::clone(&cache),
            ProgressUpdater::with_ticks(Arc::clone(&cache), ticks),
            factory,
            Arc::clone(&persister),
            ctx,
        ));
        CalculationService {
            cache,
            orchestrator,
            persister,
            settings,
        }
    }
}

/// The calculation lifecycle API.
pub struct CalculationService {
    cache: Arc<CalcCache>,
    orchestrator: Arc<CalcOrchestrator>,
    persister: Arc<ResultPersister>,
    settings: Arc<Settings>,
}

impl CalculationService {
    /// Start building a service backed by `remote`.
    #[must_use]
    pub fn builder(remote: Arc<dyn RemoteClient>) -> ServiceBuilder {
        ServiceBuilder {
            remote,
            settings: Settings::default(),
            clock: system_clock(),
            store: None,
            ticks: None,
            factory: None,
        }
    }

    /// Validate a loose request and start it.
    pub fn start_calculation(&self, request: &StartRequest) -> Result<StartOutcome, StartError> {
        let config = StartConfig::try_from(request)?;
        self.start(&config)
    }

    /// Start a validated configuration.
    pub fn start(&self, config: &StartConfig) -> Result<StartOutcome, StartError> {
        self.orchestrator.start_calculation(config)
    }

    /// Current status; a missing entry reads as `initializing`.
    #[must_use]
    pub fn get_calculation_status(
        &self,
        calc_id: &CalcId,
        target: CalculationTarget,
    ) -> CalcStatus {
        self.cache
            .get(&QueryKey::calculation(target, calc_id))
            .unwrap_or(CalcStatus::Initializing)
    }

    /// Aggregated status of several calculations of the same target type.
    #[must_use]
    pub fn get_aggregated_status(
        &self,
        calc_ids: &[CalcId],
        target: CalculationTarget,
    ) -> AggregatedCalcStatus {
        let statuses: Vec<CalcStatus> = calc_ids
            .iter()
            .map(|id| self.get_calculation_status(id, target))
            .collect();
        aggregate(&statuses)
    }

    /// Track pending reports, resuming their calculations when configs are given.
    pub fn monitor_pending_reports(&self, reports: &[ReportSummary]) -> PendingReportsMonitor {
        let monitor = PendingReportsMonitor::new(
            Arc::clone(&self.cache),
            Some(Arc::clone(&self.orchestrator)),
        );
        monitor.monitor(reports);
        monitor
    }

    /// Subscribe to cache events under `prefix`.
    pub fn subscribe(&self, prefix: QueryKey, observer: Arc<dyn CacheObserver>) -> SubscriptionId {
        self.cache.subscribe(prefix, observer)
    }

    /// Cancel a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.cache.unsubscribe(id)
    }

    /// Load a persisted result.
    pub fn load_result(
        &self,
        target: CalculationTarget,
        calc_id: &CalcId,
    ) -> Result<Option<Value>, PersistError> {
        self.persister.load(target, calc_id)
    }

    /// Running calculations.
    #[must_use]
    pub fn active_calculations(&self) -> Vec<ActiveCalculation> {
        self.orchestrator.active_calculations()
    }

    /// Whether a calculation is still being polled.
    #[must_use]
    pub fn is_running(&self, calc_id: &CalcId, target: CalculationTarget) -> bool {
        self.orchestrator.is_running(calc_id, target)
    }

    /// Sweep expired cache entries and old tracker records.
    pub fn evict_expired(&self) -> usize {
        let evicted = self.cache.evict_expired();
        let pruned = self
            .orchestrator
            .tracker()
            .prune_settled(self.settings.terminal_retention);
        debug!(evicted, pruned, "retention sweep");
        evicted
    }

    /// Effective settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stop every polling loop.
    pub fn cleanup(&self) {
        self.orchestrator.cleanup();
    }
}
