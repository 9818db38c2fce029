//! # calcflow-core
//!
//! Data model and building blocks of the calculation lifecycle: ids and
//! statuses, validated start configuration, the clock seam, synthetic
//! progress and the progress tracker.

pub mod calculation;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod handler;
pub mod options;
pub mod progress;
pub mod status;
pub mod tracker;

// Re-exports
pub use calculation::{CalcId, CalcKind, CalculationTarget};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::{CalcParams, PolicyIds, ReportLink, StartConfig, StartRequest, TargetSpec};
pub use constants::{error_codes, exit_codes};
pub use error::StartError;
pub use handler::{CalculationHandler, HandlerContext, HandlerFactory};
pub use options::{Settings, SettingsError};
pub use progress::{
    synthetic_progress, CancellationToken, OutcomeResolver, PendingOutcome, ProgressModel,
    Settlement,
};
pub use status::{CalcError, CalcStatus, PendingStatus, ProgressInfo};
pub use tracker::{ProgressTracker, TrackOptions};
