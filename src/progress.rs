//! Progress bar for reconciliation runs

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{DirectorySpec, OperationOutcome, ProgressCallback};

/// Progress bar driven by engine callbacks; failures are printed above the bar
pub struct BarProgress {
    pb: ProgressBar,
    visible: bool,
}

impl BarProgress {
    pub fn new(visible: bool) -> Self {
        let pb = if visible {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };
        Self { pb, visible }
    }
}

impl ProgressCallback for BarProgress {
    fn on_run_start(&self, total: usize) {
        self.pb.set_length(total as u64);
    }

    fn on_outcome(&self, node: &str, spec: &DirectorySpec, outcome: &OperationOutcome) {
        if let OperationOutcome::Failed { kind, reason } = outcome
            && self.visible
        {
            self.pb.suspend(|| {
                println!(
                    "  {} {} {} ({}: {})",
                    "✗".red(),
                    node.bold(),
                    spec.path.display(),
                    kind,
                    reason.dimmed()
                );
            });
        }
        self.pb.set_message(format!("{node} {}", spec.class));
        self.pb.inc(1);
    }

    fn on_run_complete(&self) {
        self.pb.finish_and_clear();
    }
}
