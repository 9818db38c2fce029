//! Error types for starting calculations.

use crate::status::CalcError;

/// Why a calculation could not be started.
///
/// Every variant is raised before any tracking state is left behind.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StartError {
    /// The start configuration is malformed or an invalid combination.
    #[error("invalid calculation config: {0}")]
    InvalidConfig(String),

    /// No handler could be constructed for the configuration.
    #[error("handler unavailable: {0}")]
    Handler(String),

    /// The remote service rejected the initial request.
    #[error("remote request rejected: {0}")]
    Remote(#[source] CalcError),

    /// The tracker refused the registration.
    #[error("calculation {0} is already registered")]
    Registration(String),

    /// The polling loop could not be started.
    #[error("failed to start progress updates: {0}")]
    Updater(String),
}

impl StartError {
    /// Whether calling `start_calculation` again might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidConfig(_) | Self::Handler(_) => false,
            Self::Remote(err) => err.retryable,
            Self::Registration(_) | Self::Updater(_) => true,
        }
    }
}
