//! Error handling and exit codes.

use std::time::Duration;

use calcflow_core::exit_codes;
use calcflow_core::{SettingsError, StartError};

/// Why a run did not end with every calculation complete.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad flags or settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// The settings file could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A calculation could not be started.
    #[error(transparent)]
    Start(#[from] StartError),

    /// At least one calculation ended in error.
    #[error("{failed} of {total} calculations failed")]
    CalculationsFailed { failed: usize, total: usize },

    /// Interrupted by the user.
    #[error("cancelled")]
    Cancelled,

    /// Calculations were still running when the timeout elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Exit code for an application error.
pub fn handle_error(err: &AppError) -> i32 {
    match err {
        AppError::Config(_)
        | AppError::Settings(_)
        | AppError::Start(StartError::InvalidConfig(_)) => exit_codes::ERROR_CONFIG,
        AppError::CalculationsFailed { .. } => exit_codes::ERROR_CALCULATION,
        AppError::Cancelled => exit_codes::ERROR_CANCELED,
        AppError::Start(_) | AppError::Timeout(_) => exit_codes::ERROR_GENERIC,
    }
}

/// Exit code for any error returned by [`crate::app::run`].
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<AppError>()
        .map_or(exit_codes::ERROR_GENERIC, handle_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(handle_error(&AppError::Cancelled), 130);
        assert_eq!(handle_error(&AppError::CalculationsFailed { failed: 1, total: 2 }), 3);
        assert_eq!(handle_error(&AppError::Config("bad".into())), 4);
        assert_eq!(
            handle_error(&AppError::Start(StartError::InvalidConfig("x".into()))),
            4
        );
        assert_eq!(handle_error(&AppError::Start(StartError::Handler("x".into()))), 1);
        assert_eq!(handle_error(&AppError::Timeout(Duration::from_secs(1))), 1);
    }

    #[test]
    fn unknown_errors_are_generic() {
        assert_eq!(exit_code(&anyhow::anyhow!("disk on fire")), 1);
        assert_eq!(exit_code(&anyhow::Error::new(AppError::Cancelled)), 130);
    }
}
