//! Terminal progress for plan execution

use colored::Colorize;
use declarative::{Action, ApplyResult, ExecuteSummary, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui;

/// Progress bar advanced once per action
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|s| s.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        Self { bar }
    }
}

impl ProgressCallback for BarProgress {
    fn on_plan_start(&mut self, total: usize, _dry_run: bool) {
        self.bar.set_length(total as u64);
    }

    fn on_action_start(&mut self, action: &Action) {
        self.bar.set_message(ui::truncate(&action.to_string(), 40));
    }

    fn on_action_complete(&mut self, action: &Action, result: &ApplyResult) {
        if let ApplyResult::Failed { error } = result {
            self.bar
                .println(format!("  {} {} ({})", "✗".red(), action, error));
        }
        self.bar.inc(1);
    }

    fn on_plan_complete(&mut self, _summary: &ExecuteSummary) {
        self.bar.finish_and_clear();
    }
}
