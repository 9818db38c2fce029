//! # calcflow-cli
//!
//! Terminal presentation for calcflow: status lines, live progress bars,
//! and shell completion.

pub mod completion;
pub mod output;
pub mod presenter;
pub mod progress_display;
pub mod ui;

pub use presenter::{CliStatusPresenter, StatusPresenter};
pub use progress_display::ProgressBoard;
