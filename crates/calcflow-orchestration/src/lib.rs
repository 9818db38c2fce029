//! # calcflow-orchestration
//!
//! Calculation handlers over a remote service, polling loops that feed the
//! status cache, result persistence, status aggregation, the pending
//! reports monitor and the [`CalculationService`] facade.

pub mod aggregator;
pub mod handlers;
pub mod monitor;
pub mod orchestrator;
pub mod persister;
pub mod remote;
pub mod service;
pub mod updater;

pub use aggregator::{aggregate, AggregateState, AggregatedCalcStatus};
pub use handlers::{DefaultHandlerFactory, ProgressSource, RemoteCalculationHandler};
pub use monitor::{PendingReportsMonitor, ReportState, ReportSummary};
pub use orchestrator::{ActiveCalculation, CalcOrchestrator, StartOutcome};
pub use persister::{JsonFileStore, MemoryResultStore, PersistError, ResultPersister, ResultStore};
pub use remote::{
    CalcRequest, JobTicket, RemoteClient, RemoteJobState, SimulatedBehavior, SimulatedRemote,
};
pub use service::{CalculationService, ServiceBuilder};
pub use updater::{
    IntervalTicks, LoopEnd, ManualTicker, PollTask, ProgressUpdater, SettleCallback, TickSource,
};
