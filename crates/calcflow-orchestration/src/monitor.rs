//! Watch pending reports and refresh report lists when they finish.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use calcflow_cache::{CacheEvent, CacheObserver, CalcCache, QueryKey, SubscriptionId};
use calcflow_core::{CalcId, CalculationTarget, StartConfig};

use crate::orchestrator::CalcOrchestrator;

/// Stored status of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportState {
    /// Calculation not finished.
    Pending,
    /// Output available.
    Complete,
    /// Calculation failed.
    Error,
}

impl ReportState {
    /// Whether the report is finished either way.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Report as listed to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    /// Report id; reports without one cannot be tracked.
    pub id: Option<String>,
    /// Stored status.
    pub status: ReportState,
    /// Start config used to (re)start the report's calculation.
    pub calculation: Option<StartConfig>,
}

impl ReportSummary {
    /// Pending report with an id and no start config.
    #[must_use]
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: ReportState::Pending,
            calculation: None,
        }
    }

    /// Attach a start config.
    #[must_use]
    pub fn with_calculation(mut self, config: StartConfig) -> Self {
        self.calculation = Some(config);
        self
    }
}

struct MonitorState {
    cache: Arc<CalcCache>,
    tracked: Mutex<HashMap<CalcId, SubscriptionId>>,
    open: Mutex<bool>,
}

impl MonitorState {
    /// Stop tracking `id` and refresh the report lists, once.
    fn refresh(&self, id: &CalcId) {
        let open = self.open.lock();
        if !*open {
            return;
        }
        let Some(subscription) = self.tracked.lock().remove(id) else {
            return;
        };
        self.cache.unsubscribe(subscription);
        info!(report_id = %id, "report finished, refreshing report lists");
        self.cache.invalidate(&QueryKey::reports_all());
        self.cache.invalidate(&QueryKey::report_associations_all());
        drop(open);
    }
}

struct ReportObserver {
    id: CalcId,
    state: Weak<MonitorState>,
}

impl CacheObserver for ReportObserver {
    fn on_event(&self, event: &CacheEvent) {
        if event.is_terminal_transition() {
            if let Some(state) = self.state.upgrade() {
                state.refresh(&self.id);
            }
        }
    }
}

/// Tracks pending reports until their calculations reach a terminal state.
///
/// Observers run on the thread that wrote the cache. Do not call
/// [`stop`](Self::stop) from a report-list invalidation observer.
pub struct PendingReportsMonitor {
    state: Arc<MonitorState>,
    orchestrator: Option<Arc<CalcOrchestrator>>,
}

impl PendingReportsMonitor {
    /// Monitor over `cache`; report calculations are started through `orchestrator`.
    #[must_use]
    pub fn new(cache: Arc<CalcCache>, orchestrator: Option<Arc<CalcOrchestrator>>) -> Self {
        Self {
            state: Arc::new(MonitorState {
                cache,
                tracked: Mutex::new(HashMap::new()),
                open: Mutex::new(true),
            }),
            orchestrator,
        }
    }

    /// Track every non-terminal report. Returns how many were newly tracked.
    pub fn monitor(&self, reports: &[ReportSummary]) -> usize {
        let mut added = 0;
        for report in reports.iter().filter(|r| !r.status.is_terminal()) {
            let Some(id) = report.id.as_deref().and_then(|raw| CalcId::new(raw).ok()) else {
                warn!("skipping pending report without an id");
                continue;
            };
            if self.track(&id) {
                added += 1;
            }
            if self.refresh_if_settled(&id) {
                continue;
            }
            if let (Some(config), Some(orchestrator)) = (&report.calculation, &self.orchestrator) {
                if let Err(e) = orchestrator.start_calculation(config) {
                    warn!(report_id = %id, error = %e, "could not resume report calculation");
                }
            }
        }
        added
    }

    fn track(&self, id: &CalcId) -> bool {
        if !*self.state.open.lock() {
            return false;
        }
        let mut tracked = self.state.tracked.lock();
        if tracked.contains_key(id) {
            return false;
        }
        let observer = Arc::new(ReportObserver {
            id: id.clone(),
            state: Arc::downgrade(&self.state),
        });
        let subscription = self
            .state
            .cache
            .subscribe(QueryKey::calculation(CalculationTarget::Report, id), observer);
        tracked.insert(id.clone(), subscription);
        debug!(report_id = %id, "monitoring report");
        true
    }

    fn refresh_if_settled(&self, id: &CalcId) -> bool {
        let key = QueryKey::calculation(CalculationTarget::Report, id);
        let settled = self
            .state
            .cache
            .get(&key)
            .is_some_and(|status| status.is_terminal());
        if settled {
            self.state.refresh(id);
        }
        settled
    }

    /// Ids still being tracked, sorted.
    #[must_use]
    pub fn tracked_ids(&self) -> Vec<CalcId> {
        let mut ids: Vec<CalcId> = self.state.tracked.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `id` is tracked.
    #[must_use]
    pub fn is_tracking(&self, id: &CalcId) -> bool {
        self.state.tracked.lock().contains_key(id)
    }

    /// Unsubscribe everything. No refresh fires after this returns.
    pub fn stop(&self) {
        *self.state.open.lock() = false;
        let subscriptions: Vec<SubscriptionId> =
            self.state.tracked.lock().drain().map(|(_, s)| s).collect();
        for subscription in subscriptions {
            self.state.cache.unsubscribe(subscription);
        }
    }
}

impl Drop for PendingReportsMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcflow_core::{CalcError, CalcStatus};
    use serde_json::json;

    fn report_key(id: &str) -> QueryKey {
        QueryKey::calculation(CalculationTarget::Report, &CalcId::new(id).unwrap())
    }

    fn invalidation_counter(cache: &CalcCache) -> Arc<Mutex<HashMap<String, usize>>> {
        let counts = Arc::new(Mutex::new(HashMap::new()));
        for prefix in [QueryKey::reports_all(), QueryKey::report_associations_all()] {
            let sink = Arc::clone(&counts);
            cache.subscribe(
                prefix,
                Arc::new(move |e: &CacheEvent| {
                    if let CacheEvent::Invalidated { prefix } = e {
                        *sink.lock().entry(prefix.to_string()).or_insert(0) += 1;
                    }
                }),
            );
        }
        counts
    }

    #[test]
    fn terminal_transition_invalidates_once_each() {
        let cache = Arc::new(CalcCache::new());
        let counts = invalidation_counter(&cache);
        let monitor = PendingReportsMonitor::new(Arc::clone(&cache), None);
        assert_eq!(monitor.monitor(&[ReportSummary::pending("r1")]), 1);

        cache.set(report_key("r1"), CalcStatus::pending(50.0, "x"));
        assert!(counts.lock().is_empty());

        cache.set(report_key("r1"), CalcStatus::complete(json!(1)));
        cache.set(report_key("r1"), CalcStatus::complete(json!(1)));
        let counts = counts.lock();
        assert_eq!(counts.get("reports"), Some(&1));
        assert_eq!(counts.get("report-associations"), Some(&1));
        assert!(!monitor.is_tracking(&CalcId::new("r1").unwrap()));
    }

    #[test]
    fn error_transition_also_refreshes() {
        let cache = Arc::new(CalcCache::new());
        let counts = invalidation_counter(&cache);
        let monitor = PendingReportsMonitor::new(Arc::clone(&cache), None);
        monitor.monitor(&[ReportSummary::pending("r1")]);
        cache.set(
            report_key("r1"),
            CalcStatus::Error(CalcError::new("x", "E", false)),
        );
        assert_eq!(counts.lock().get("reports"), Some(&1));
    }

    #[test]
    fn skips_terminal_and_unidentified_reports() {
        let cache = Arc::new(CalcCache::new());
        let monitor = PendingReportsMonitor::new(Arc::clone(&cache), None);
        let reports = [
            ReportSummary {
                id: None,
                status: ReportState::Pending,
                calculation: None,
            },
            ReportSummary {
                id: Some("  ".into()),
                status: ReportState::Pending,
                calculation: None,
            },
            ReportSummary {
                id: Some("done".into()),
                status: ReportState::Complete,
                calculation: None,
            },
            ReportSummary::pending("r1"),
        ];
        assert_eq!(monitor.monitor(&reports), 1);
        assert_eq!(monitor.tracked_ids(), vec![CalcId::new("r1").unwrap()]);
        assert_eq!(cache.subscriber_count(), 1);
    }

    #[test]
    fn stop_prevents_later_refresh() {
        let cache = Arc::new(CalcCache::new());
        let counts = invalidation_counter(&cache);
        let monitor = PendingReportsMonitor::new(Arc::clone(&cache), None);
        monitor.monitor(&[ReportSummary::pending("r1")]);
        monitor.stop();
        cache.set(report_key("r1"), CalcStatus::complete(json!(1)));
        assert!(counts.lock().is_empty());
        assert!(monitor.tracked_ids().is_empty());
    }

    #[test]
    fn drop_unsubscribes() {
        let cache = Arc::new(CalcCache::new());
        let before = cache.subscriber_count();
        {
            let monitor = PendingReportsMonitor::new(Arc::clone(&cache), None);
            monitor.monitor(&[ReportSummary::pending("r1"), ReportSummary::pending("r2")]);
            assert_eq!(cache.subscriber_count(), before + 2);
        }
        assert_eq!(cache.subscriber_count(), before);
    }

    #[test]
    fn already_terminal_entry_refreshes_immediately() {
        let cache = Arc::new(CalcCache::new());
        cache.set(report_key("r1"), CalcStatus::complete(json!(1)));
        let counts = invalidation_counter(&cache);
        let monitor = PendingReportsMonitor::new(Arc::clone(&cache), None);
        monitor.monitor(&[ReportSummary::pending("r1")]);
        assert_eq!(counts.lock().get("reports"), Some(&1));
        assert!(monitor.tracked_ids().is_empty());
    }

    #[test]
    fn monitoring_twice_does_not_duplicate() {
        let cache = Arc::new(CalcCache::new());
        let monitor = PendingReportsMonitor::new(Arc::clone(&cache), None);
        assert_eq!(monitor.monitor(&[ReportSummary::pending("r1")]), 1);
        assert_eq!(monitor.monitor(&[ReportSummary::pending("r1")]), 0);
        assert_eq!(cache.subscriber_count(), 1);
    }
}
