//! CLI status presenter.

use std::time::Duration;

use calcflow_core::CalcStatus;
use calcflow_orchestration::{AggregateState, AggregatedCalcStatus};

use crate::output::{format_duration, format_progress, format_result, format_status};
use crate::ui;

/// Renders calculation outcomes.
pub trait StatusPresenter {
    /// One calculation's final status.
    fn present_status(&self, label: &str, status: &CalcStatus);

    /// The combined status of a run.
    fn present_summary(&self, summary: &AggregatedCalcStatus, elapsed: Duration);

    /// A failure outside any calculation.
    fn present_error(&self, error: &str);
}

/// Presenter writing to stdout and stderr.
pub struct CliStatusPresenter {
    verbose: bool,
    quiet: bool,
}

impl CliStatusPresenter {
    #[must_use]
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }
}

impl StatusPresenter for CliStatusPresenter {
    fn present_status(&self, label: &str, status: &CalcStatus) {
        if self.quiet {
            return;
        }
        println!("  {:<28} {} {}", label, ui::status_badge(status), format_status(status));
        if self.verbose {
            if let Some(result) = status.result() {
                println!("    {}", format_result(result, true).replace('\n', "\n    "));
            }
        }
    }

    fn present_summary(&self, summary: &AggregatedCalcStatus, elapsed: Duration) {
        let state = match summary.state {
            AggregateState::Initializing => "initializing",
            AggregateState::Idle => "idle",
            AggregateState::Pending => "pending",
            AggregateState::Complete => "complete",
            AggregateState::Error => "error",
        };
        if self.quiet {
            println!("{state}");
            return;
        }

        println!();
        println!(
            "Overall: {state} ({} calculations, {})",
            summary.calculations.len(),
            format_duration(elapsed)
        );
        if let Some(progress) = summary.progress {
            println!("Progress: {}", format_progress(progress));
        }
        match summary.state {
            AggregateState::Complete => ui::print_success("all calculations completed"),
            AggregateState::Error => {
                if let Some(err) = &summary.error {
                    ui::print_error(&format!("{} ({})", err.message, err.code));
                }
            }
            _ => {
                if let Some(message) = &summary.message {
                    println!("Waiting on: {message}");
                }
            }
        }
    }

    fn present_error(&self, error: &str) {
        ui::print_error(error);
    }
}
