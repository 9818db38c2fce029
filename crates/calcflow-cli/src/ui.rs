//! UI helpers for CLI display.

use console::style;

use calcflow_core::CalcStatus;

/// Check if color output is disabled via `NO_COLOR` env var.
#[must_use]
pub fn is_color_disabled() -> bool {
    std::env::var("NO_COLOR").is_ok()
}

/// Print a styled header.
pub fn print_header(text: &str) {
    if is_color_disabled() {
        println!("=== {text} ===");
    } else {
        println!("{}", style(format!("=== {text} ===")).bold().cyan());
    }
}

/// Print a success message.
pub fn print_success(text: &str) {
    if is_color_disabled() {
        println!("[OK] {text}");
    } else {
        println!("{} {text}", style("[OK]").green().bold());
    }
}

/// Print a warning to stderr.
pub fn print_warning(text: &str) {
    if is_color_disabled() {
        eprintln!("[WARN] {text}");
    } else {
        eprintln!("{} {text}", style("[WARN]").yellow().bold());
    }
}

/// Print an error message.
pub fn print_error(text: &str) {
    if is_color_disabled() {
        eprintln!("[ERROR] {text}");
    } else {
        eprintln!("{} {text}", style("[ERROR]").red().bold());
    }
}

/// Bracketed state label, colored by state unless `NO_COLOR` is set.
#[must_use]
pub fn status_badge(status: &CalcStatus) -> String {
    let label = format!("[{}]", status.label().to_uppercase());
    if is_color_disabled() {
        return label;
    }
    let styled = match status {
        CalcStatus::Initializing => style(label).dim(),
        CalcStatus::Pending(_) => style(label).yellow(),
        CalcStatus::Complete { .. } => style(label).green().bold(),
        CalcStatus::Error(_) => style(label).red().bold(),
    };
    styled.to_string()
}
