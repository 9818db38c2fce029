//! Handler seam: the orchestrator only knows these traits.

use std::sync::Arc;

use crate::calculation::CalcKind;
use crate::clock::SharedClock;
use crate::config::StartConfig;
use crate::error::StartError;
use crate::options::Settings;
use crate::progress::PendingOutcome;
use crate::status::{CalcError, CalcStatus};
use crate::tracker::ProgressTracker;

/// Adapter for one remote calculation.
pub trait CalculationHandler: Send + Sync {
    /// Issue the remote request. Returns once the request is accepted.
    fn start(&self) -> Result<PendingOutcome, CalcError>;

    /// Current status snapshot. `None` means the calculation is unknown.
    fn get_status(&self) -> Option<CalcStatus>;

    /// Kind of calculation this handler runs.
    fn kind(&self) -> CalcKind;
}

/// Shared collaborators handed to a factory.
#[derive(Clone)]
pub struct HandlerContext {
    /// Progress registry used for synthetic progress.
    pub tracker: Arc<ProgressTracker>,
    /// Time source.
    pub clock: SharedClock,
    /// Timing settings.
    pub settings: Arc<Settings>,
}

/// Factory selecting a handler for a start configuration.
pub trait HandlerFactory: Send + Sync {
    /// Build a handler for `config`.
    fn create(
        &self,
        config: &StartConfig,
        ctx: &HandlerContext,
    ) -> Result<Arc<dyn CalculationHandler>, StartError>;

    /// Kinds this factory can build handlers for.
    fn supported(&self) -> Vec<CalcKind>;
}
