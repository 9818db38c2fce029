//! Per-calculation polling loops that copy handler status into the cache.
//!
//! Each loop is a [`PollTask`]: a named thread driven by a tick channel,
//! with a stop channel and a write gate. Once `cancel()` returns, the loop
//! performs no further cache writes, even if a tick was in flight.
//!
//! Cache observers run on the loop thread while the gate is held, so a
//! loop cancelled from inside its own write only raises the flag. The
//! write in progress finishes and the loop exits without settling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace, warn};

use calcflow_cache::{CalcCache, QueryKey};
use calcflow_core::{CalcError, CalcStatus, CalculationHandler, CancellationToken, StartError};

/// How a polling loop ended on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEnd {
    /// The handler reported completion.
    Complete(Value),
    /// The handler reported an error.
    Error(CalcError),
    /// The handler no longer knows the calculation.
    Lost,
}

/// Callback run on the loop thread after a loop ends on its own.
pub type SettleCallback = Arc<dyn Fn(&QueryKey, LoopEnd) + Send + Sync>;

/// Source of tick channels for polling loops.
pub trait TickSource: Send + Sync {
    /// Tick channel for the loop owning `key`.
    fn ticks(&self, key: &QueryKey) -> Receiver<Instant>;
}

/// Real ticks at a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct IntervalTicks {
    interval: Duration,
}

impl IntervalTicks {
    /// Tick every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl TickSource for IntervalTicks {
    fn ticks(&self, _key: &QueryKey) -> Receiver<Instant> {
        tick(self.interval)
    }
}

/// Ticks delivered by hand, one rendezvous per call.
///
/// `tick` returns once the loop has taken the tick, or `false` if the
/// loop is gone.
#[derive(Default)]
pub struct ManualTicker {
    senders: Mutex<HashMap<QueryKey, Sender<Instant>>>,
}

impl ManualTicker {
    /// Create a ticker with no loops attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one tick to the loop owning `key`.
    pub fn tick(&self, key: &QueryKey) -> bool {
        let Some(sender) = self.senders.lock().get(key).cloned() else {
            return false;
        };
        sender
            .send_timeout(Instant::now(), Duration::from_secs(2))
            .is_ok()
    }
}

impl TickSource for ManualTicker {
    fn ticks(&self, key: &QueryKey) -> Receiver<Instant> {
        let (tx, rx) = bounded(0);
        self.senders.lock().insert(key.clone(), tx);
        rx
    }
}

/// Handle of one polling loop.
pub struct PollTask {
    id: u64,
    key: QueryKey,
    cancel: CancellationToken,
    gate: Arc<Mutex<bool>>,
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PollTask {
    /// Key this loop writes.
    #[must_use]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Stop the loop. No cache write happens after this returns.
    pub fn cancel(&self) {
        if self.on_loop_thread() {
            // The gate is already held further up this stack.
            self.cancel.cancel();
        } else {
            *self.gate.lock() = false;
            self.cancel.cancel();
        }
        let _ = self.stop.try_send(());
    }

    /// Wait for the loop thread to exit.
    pub fn join(mut self) {
        if self.on_loop_thread() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn on_loop_thread(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }
}

type TaskMap = Arc<Mutex<HashMap<QueryKey, PollTask>>>;

/// Owner of every polling loop.
pub struct ProgressUpdater {
    cache: Arc<CalcCache>,
    ticks: Arc<dyn TickSource>,
    tasks: TaskMap,
    next_id: AtomicU64,
}

impl ProgressUpdater {
    /// Updater ticking every `interval`.
    #[must_use]
    pub fn new(cache: Arc<CalcCache>, interval: Duration) -> Self {
        Self::with_ticks(cache, Arc::new(IntervalTicks::new(interval)))
    }

    /// Updater with an explicit tick source.
    #[must_use]
    pub fn with_ticks(cache: Arc<CalcCache>, ticks: Arc<dyn TickSource>) -> Self {
        Self {
            cache,
            ticks,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start polling `handler` into `key`.
    ///
    /// Returns `Ok(false)` if a loop for `key` is already running.
    pub fn start_progress_updates(
        &self,
        key: QueryKey,
        handler: Arc<dyn CalculationHandler>,
    ) -> Result<bool, StartError> {
        self.start_progress_updates_with(key, handler, None)
    }

    /// Like [`start_progress_updates`](Self::start_progress_updates), with a
    /// callback invoked when the loop ends on its own.
    pub fn start_progress_updates_with(
        &self,
        key: QueryKey,
        handler: Arc<dyn CalculationHandler>,
        on_settle: Option<SettleCallback>,
    ) -> Result<bool, StartError> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&key) {
            debug!(key = %key, "updates already running");
            return Ok(false);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let gate = Arc::new(Mutex::new(true));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticks = self.ticks.ticks(&key);

        let poll_loop = PollLoop {
            id,
            key: key.clone(),
            handler,
            cache: Arc::clone(&self.cache),
            tasks: Arc::clone(&self.tasks),
            cancel: cancel.clone(),
            gate: Arc::clone(&gate),
            on_settle,
        };
        let handle = thread::Builder::new()
            .name(format!("calcflow-poll-{key}"))
            .spawn(move || poll_loop.run(&ticks, &stop_rx))
            .map_err(|e| StartError::Updater(e.to_string()))?;

        tasks.insert(
            key.clone(),
            PollTask {
                id,
                key: key.clone(),
                cancel,
                gate,
                stop: stop_tx,
                handle: Some(handle),
            },
        );
        debug!(key = %key, "updates started");
        Ok(true)
    }

    /// Stop the loop for `key`, if any.
    pub fn stop_progress_updates(&self, key: &QueryKey) -> bool {
        let task = self.tasks.lock().remove(key);
        match task {
            Some(task) => {
                task.cancel();
                task.join();
                debug!(key = %key, "updates stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every loop.
    pub fn stop_all_updates(&self) {
        let tasks: Vec<PollTask> = self.tasks.lock().drain().map(|(_, task)| task).collect();
        for task in &tasks {
            task.cancel();
        }
        let count = tasks.len();
        for task in tasks {
            task.join();
        }
        if count > 0 {
            debug!(count, "all updates stopped");
        }
    }

    /// Whether a loop for `key` is running.
    #[must_use]
    pub fn is_running(&self, key: &QueryKey) -> bool {
        self.tasks.lock().contains_key(key)
    }

    /// Number of running loops.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Keys of running loops, sorted.
    #[must_use]
    pub fn active_keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self.tasks.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Drop for ProgressUpdater {
    fn drop(&mut self) {
        self.stop_all_updates();
    }
}

struct PollLoop {
    id: u64,
    key: QueryKey,
    handler: Arc<dyn CalculationHandler>,
    cache: Arc<CalcCache>,
    tasks: TaskMap,
    cancel: CancellationToken,
    gate: Arc<Mutex<bool>>,
    on_settle: Option<SettleCallback>,
}

impl PollLoop {
    fn run(self, ticks: &Receiver<Instant>, stop: &Receiver<()>) {
        loop {
            select! {
                recv(ticks) -> msg => if msg.is_err() {
                    warn!(key = %self.key, "tick source closed");
                    self.deregister();
                    return;
                },
                recv(stop) -> _ => return,
            }
            if self.cancel.is_cancelled() {
                return;
            }

            let status = self.handler.get_status();

            let open = self.gate.lock();
            if !*open || self.cancel.is_cancelled() {
                trace!(key = %self.key, "dropping write after cancel");
                return;
            }
            let end = match status {
                None => Some(LoopEnd::Lost),
                Some(CalcStatus::Complete { result }) => {
                    self.cache
                        .set(self.key.clone(), CalcStatus::complete(result.clone()));
                    Some(LoopEnd::Complete(result))
                }
                Some(CalcStatus::Error(error)) => {
                    self.cache
                        .set(self.key.clone(), CalcStatus::Error(error.clone()));
                    Some(LoopEnd::Error(error))
                }
                Some(status) => {
                    self.cache.set(self.key.clone(), status);
                    None
                }
            };
            drop(open);

            if self.cancel.is_cancelled() {
                debug!(key = %self.key, "cancelled during write");
                return;
            }
            if let Some(end) = end {
                if end == LoopEnd::Lost {
                    warn!(key = %self.key, "handler lost the calculation");
                } else {
                    debug!(key = %self.key, "terminal status written");
                }
                self.deregister();
                if let Some(callback) = &self.on_settle {
                    callback(&self.key, end);
                }
                return;
            }
        }
    }

    fn deregister(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.get(&self.key).is_some_and(|t| t.id == self.id) {
            tasks.remove(&self.key);
        }
    }
}
