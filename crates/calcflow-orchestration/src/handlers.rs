//! Remote-backed calculation handlers and the default handler factory.
//!
//! A handler submits one job and runs a worker thread that polls the remote
//! service until the job settles. `get_status` never blocks on the remote:
//! it reads the worker's last view and fills gaps with synthetic progress.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use calcflow_core::constants::{INITIAL_MESSAGE, MAX_CONSECUTIVE_POLL_ERRORS};
use calcflow_core::error_codes::REMOTE_POLL_FAILED;
use calcflow_core::{
    CalcError, CalcId, CalcKind, CalcStatus, CalculationHandler, CancellationToken,
    HandlerContext, HandlerFactory, OutcomeResolver, PendingOutcome, PendingStatus,
    ProgressModel, ProgressTracker, Settlement, StartConfig, StartError,
};

use crate::remote::{CalcRequest, JobTicket, RemoteClient, RemoteJobState};

/// Where running progress comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSource {
    /// Always synthesize from elapsed time.
    Synthetic,
    /// Use server progress and queue position when reported.
    ServerPreferred,
}

impl ProgressSource {
    /// Default source for a calculation kind.
    #[must_use]
    pub fn for_kind(kind: CalcKind) -> Self {
        match kind {
            CalcKind::Household => Self::Synthetic,
            CalcKind::Economy => Self::ServerPreferred,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum JobView {
    Submitted,
    Queued { position: u32 },
    Running { progress: Option<f64> },
    Settled(Settlement),
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Handler that runs a calculation on a [`RemoteClient`].
pub struct RemoteCalculationHandler {
    kind: CalcKind,
    request: CalcRequest,
    remote: Arc<dyn RemoteClient>,
    tracker: Arc<ProgressTracker>,
    model: ProgressModel,
    source: ProgressSource,
    poll_interval: Duration,
    view: Arc<Mutex<JobView>>,
    reported: Mutex<f64>,
    outcome: Mutex<Option<PendingOutcome>>,
    cancel: CancellationToken,
    worker: Mutex<Option<Worker>>,
}

impl RemoteCalculationHandler {
    /// Build a handler for `config`.
    #[must_use]
    pub fn new(config: &StartConfig, remote: Arc<dyn RemoteClient>, ctx: &HandlerContext) -> Self {
        let kind = config.kind();
        Self {
            kind,
            request: CalcRequest::from(config),
            remote,
            tracker: Arc::clone(&ctx.tracker),
            model: ctx.settings.progress_model(kind),
            source: ProgressSource::for_kind(kind),
            poll_interval: ctx.settings.remote_poll_interval,
            view: Arc::new(Mutex::new(JobView::Submitted)),
            reported: Mutex::new(0.0),
            outcome: Mutex::new(None),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Override where running progress comes from.
    #[must_use]
    pub fn with_progress_source(mut self, source: ProgressSource) -> Self {
        self.source = source;
        self
    }

    /// Calculation id.
    #[must_use]
    pub fn calc_id(&self) -> &CalcId {
        &self.request.calc_id
    }

    fn synthetic_status(&self) -> PendingStatus {
        match self.tracker.get_progress(&self.request.calc_id) {
            Some(info) => PendingStatus::new(info.progress, info.message)
                .with_time_remaining(info.estimated_time_remaining),
            None => PendingStatus::new(0.0, INITIAL_MESSAGE),
        }
    }

    /// Hold pending progress at or above the last value reported.
    fn never_backwards(&self, status: CalcStatus) -> CalcStatus {
        match status {
            CalcStatus::Pending(mut pending) => {
                let mut reported = self.reported.lock();
                pending.progress = pending.progress.max(*reported);
                *reported = pending.progress;
                CalcStatus::Pending(pending)
            }
            other => other,
        }
    }

    fn spawn_worker(&self, ticket: JobTicket, resolver: OutcomeResolver) -> Result<(), CalcError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let remote = Arc::clone(&self.remote);
        let view = Arc::clone(&self.view);
        let cancel = self.cancel.clone();
        let interval = self.poll_interval;

        let handle = thread::Builder::new()
            .name(format!("calcflow-remote-{}", ticket.calc_id))
            .spawn(move || {
                let ticker = tick(interval);
                let mut failures = 0u32;
                loop {
                    if cancel.is_cancelled() {
                        debug!(calc_id = %ticket.calc_id, "remote worker cancelled");
                        return;
                    }
                    match remote.poll(&ticket) {
                        Ok(RemoteJobState::Queued { position }) => {
                            failures = 0;
                            *view.lock() = JobView::Queued { position };
                        }
                        Ok(RemoteJobState::Running { progress }) => {
                            failures = 0;
                            *view.lock() = JobView::Running { progress };
                        }
                        Ok(RemoteJobState::Completed(result)) => {
                            settle(&view, &resolver, Settlement::Completed(result));
                            info!(calc_id = %ticket.calc_id, "remote job completed");
                            return;
                        }
                        Ok(RemoteJobState::Failed(error)) => {
                            warn!(
                                calc_id = %ticket.calc_id,
                                code = %error.code,
                                "remote job failed"
                            );
                            settle(&view, &resolver, Settlement::Failed(error));
                            return;
                        }
                        Err(error) => {
                            failures += 1;
                            warn!(
                                calc_id = %ticket.calc_id,
                                failures,
                                error = %error,
                                "remote poll failed"
                            );
                            if failures >= MAX_CONSECUTIVE_POLL_ERRORS {
                                let lost = CalcError::new(
                                    format!(
                                        "lost contact with calculation service: {}",
                                        error.message
                                    ),
                                    REMOTE_POLL_FAILED,
                                    true,
                                );
                                settle(&view, &resolver, Settlement::Failed(lost));
                                return;
                            }
                        }
                    }
                    select! {
                        recv(ticker) -> _ => {}
                        recv(stop_rx) -> _ => return,
                    }
                }
            })
            .map_err(|e| {
                CalcError::new(
                    format!("cannot spawn remote worker: {e}"),
                    REMOTE_POLL_FAILED,
                    true,
                )
            })?;

        *self.worker.lock() = Some(Worker {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }
}

fn settle(view: &Mutex<JobView>, resolver: &OutcomeResolver, value: Settlement) {
    *view.lock() = JobView::Settled(value.clone());
    resolver.resolve(value);
}

impl CalculationHandler for RemoteCalculationHandler {
    fn start(&self) -> Result<PendingOutcome, CalcError> {
        let mut slot = self.outcome.lock();
        if let Some(outcome) = slot.as_ref() {
            return Ok(outcome.clone());
        }
        let ticket = self.remote.submit(&self.request)?;
        debug!(
            calc_id = %self.request.calc_id,
            job_id = %ticket.job_id,
            kind = %self.kind,
            "job submitted"
        );
        let (outcome, resolver) = PendingOutcome::channel();
        self.spawn_worker(ticket, resolver)?;
        *slot = Some(outcome.clone());
        Ok(outcome)
    }

    fn get_status(&self) -> Option<CalcStatus> {
        self.outcome.lock().as_ref()?;
        let view = self.view.lock().clone();
        let status = match view {
            JobView::Settled(Settlement::Completed(result)) => CalcStatus::complete(result),
            JobView::Settled(Settlement::Failed(error)) => CalcStatus::Error(error),
            JobView::Queued { position } if self.source == ProgressSource::ServerPreferred => {
                let synthetic = self.synthetic_status();
                let mut pending = PendingStatus::new(
                    0.0,
                    format!("Waiting in queue (position {position})..."),
                )
                .with_queue_position(position);
                pending.estimated_time_remaining_ms = synthetic.estimated_time_remaining_ms;
                CalcStatus::Pending(pending)
            }
            JobView::Running {
                progress: Some(server),
            } if self.source == ProgressSource::ServerPreferred => {
                let progress = server.clamp(0.0, self.model.max_progress);
                let synthetic = self.synthetic_status();
                let mut pending = PendingStatus::new(progress, self.model.message_for(progress));
                pending.estimated_time_remaining_ms = synthetic.estimated_time_remaining_ms;
                CalcStatus::Pending(pending)
            }
            JobView::Submitted | JobView::Queued { .. } | JobView::Running { .. } => {
                CalcStatus::Pending(self.synthetic_status())
            }
        };
        Some(self.never_backwards(status))
    }

    fn kind(&self) -> CalcKind {
        self.kind
    }
}

impl Drop for RemoteCalculationHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.stop.try_send(());
            if worker.handle.thread().id() != thread::current().id() {
                let _ = worker.handle.join();
            }
        }
    }
}

/// Factory mapping calculation kinds to remote handlers.
pub struct DefaultHandlerFactory {
    remote: Arc<dyn RemoteClient>,
    kinds: Vec<CalcKind>,
}

impl DefaultHandlerFactory {
    /// Factory for every kind, backed by `remote`.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
        Self {
            remote,
            kinds: vec![CalcKind::Household, CalcKind::Economy],
        }
    }

    /// Restrict the kinds this factory accepts.
    #[must_use]
    pub fn with_kinds(mut self, kinds: Vec<CalcKind>) -> Self {
        self.kinds = kinds;
        self
    }
}

impl HandlerFactory for DefaultHandlerFactory {
    fn create(
        &self,
        config: &StartConfig,
        ctx: &HandlerContext,
    ) -> Result<Arc<dyn CalculationHandler>, StartError> {
        if !self.kinds.contains(&config.kind()) {
            return Err(StartError::Handler(format!(
                "no handler for {} calculations",
                config.kind()
            )));
        }
        Ok(Arc::new(RemoteCalculationHandler::new(
            config,
            Arc::clone(&self.remote),
            ctx,
        )))
    }

    fn supported(&self) -> Vec<CalcKind> {
        self.kinds.clone()
    }
}
