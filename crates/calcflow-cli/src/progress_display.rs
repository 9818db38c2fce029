//! Live progress bars, one per calculation.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use calcflow_core::CalcStatus;

use crate::output::format_status;

const BAR_TEMPLATE: &str = "{prefix:<28} [{bar:30.cyan/blue}] {pos:>3}% {msg}";

/// A set of progress bars keyed by calculation label.
pub struct ProgressBoard {
    multi: MultiProgress,
    bars: Vec<(String, ProgressBar)>,
    style: ProgressStyle,
}

impl ProgressBoard {
    /// Board drawing to stderr, or nowhere when `hidden`.
    #[must_use]
    pub fn new(hidden: bool) -> Self {
        let target = if hidden {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Vec::new(),
            style,
        }
    }

    /// Add a bar for `label`. Adding a label twice keeps the first bar.
    pub fn add(&mut self, label: &str) {
        if self.bar(label).is_some() {
            return;
        }
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(self.style.clone());
        bar.set_prefix(label.to_string());
        bar.set_message("initializing");
        self.bars.push((label.to_string(), bar));
    }

    /// Reflect `status` on the bar for `label`. Finished bars are left alone.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn update(&self, label: &str, status: &CalcStatus) {
        let Some(bar) = self.bar(label) else {
            return;
        };
        if bar.is_finished() {
            return;
        }
        match status {
            CalcStatus::Initializing => bar.set_message("initializing"),
            CalcStatus::Pending(p) => {
                bar.set_position(p.progress.clamp(0.0, 100.0) as u64);
                bar.set_message(format_status(status));
            }
            CalcStatus::Complete { .. } => {
                bar.set_position(100);
                bar.finish_with_message("complete");
            }
            CalcStatus::Error(_) => bar.abandon_with_message(format_status(status)),
        }
    }

    /// Current bar position for `label`.
    #[must_use]
    pub fn position(&self, label: &str) -> Option<u64> {
        self.bar(label).map(ProgressBar::position)
    }

    /// Whether the bar for `label` reached a terminal state.
    #[must_use]
    pub fn is_finished(&self, label: &str) -> bool {
        self.bar(label).is_some_and(ProgressBar::is_finished)
    }

    /// Stop drawing, leaving unfinished bars as they are.
    pub fn finish(&self) {
        for (_, bar) in &self.bars {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    fn bar(&self, label: &str) -> Option<&ProgressBar> {
        self.bars.iter().find(|(l, _)| l == label).map(|(_, bar)| bar)
    }
}
