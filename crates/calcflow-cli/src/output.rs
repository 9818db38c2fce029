//! CLI output formatting.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use calcflow_core::CalcStatus;

/// Longest rendered result before truncation in non-verbose mode.
const MAX_RESULT_CHARS: usize = 120;

/// Format a JSON result for display, potentially truncating.
#[must_use]
pub fn format_result(value: &Value, verbose: bool) -> String {
    if verbose {
        return serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    }
    let s = value.to_string();
    let chars = s.chars().count();
    if chars > MAX_RESULT_CHARS {
        let head: String = s.chars().take(MAX_RESULT_CHARS).collect();
        format!("{head}... ({chars} chars)")
    } else {
        s
    }
}

/// Format a duration for display.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        let mins = (secs / 60.0).floor() as u64;
        let remaining = secs - (mins as f64 * 60.0);
        format!("{mins}m{remaining:.0}s")
    }
}

/// Format a completion percentage.
#[must_use]
pub fn format_progress(progress: f64) -> String {
    format!("{:.0}%", progress.clamp(0.0, 100.0))
}

/// One-line summary of a status, without styling.
#[must_use]
pub fn format_status(status: &CalcStatus) -> String {
    match status {
        CalcStatus::Initializing => "initializing".to_string(),
        CalcStatus::Pending(p) => {
            let mut line = format!("{} {}", format_progress(p.progress), p.message);
            if let Some(remaining) = p.estimated_time_remaining() {
                line.push_str(&format!(" (~{} left)", format_duration(remaining)));
            }
            line
        }
        CalcStatus::Complete { .. } => "complete".to_string(),
        CalcStatus::Error(err) => {
            let hint = if err.retryable { ", retryable" } else { "" };
            format!("error [{}{hint}]: {}", err.code, err.message)
        }
    }
}

/// Write a JSON document to a file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be created or written.
pub fn write_json(path: &Path, value: &Value) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    writeln!(file)?;
    debug!(path = %path.display(), "wrote json");
    Ok(())
}
