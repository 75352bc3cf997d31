//! Progress reporting for walks that touch resources

use colored::Colorize;
use declarative::{Action, Operation, ProgressCallback, ResourceAddress, ResourceOutcome, RunSummary};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar plus one line per resource that changed or failed
pub struct WalkProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl WalkProgress {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn line(&self, text: &str) {
        match &self.bar {
            Some(bar) => bar.suspend(|| println!("{text}")),
            None => println!("{text}"),
        }
    }
}

/// Render one resource outcome, `None` when there is nothing worth a line
pub fn outcome_line(address: &ResourceAddress, outcome: &ResourceOutcome) -> Option<String> {
    let line = match outcome {
        ResourceOutcome::Succeeded { action } => {
            format!("  {} {address}: {action}", "✓".green())
        }
        ResourceOutcome::Failed { cause } => {
            format!("  {} {address}: {}", "✗".red(), cause.red())
        }
        ResourceOutcome::Skipped { dependency } => format!(
            "  {} {address}: skipped ({dependency} failed)",
            "⊘".yellow()
        ),
        ResourceOutcome::Canceled => format!("  {} {address}: canceled", "⊘".dimmed()),
        ResourceOutcome::Unchanged => return None,
    };
    Some(line)
}

impl ProgressCallback for WalkProgress {
    fn on_walk_start(&mut self, operation: Operation, count: usize) {
        log::debug!("{operation} started for {count} resource(s)");
        if self.quiet || count == 0 {
            return;
        }
        let bar = ProgressBar::new(count as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        self.bar = Some(bar);
    }

    fn on_resource_start(&mut self, address: &ResourceAddress, action: Action) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{} {address}", action.verb()));
        }
    }

    fn on_resource_complete(&mut self, address: &ResourceAddress, outcome: &ResourceOutcome) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
        let worth_showing = !self.quiet || matches!(outcome, ResourceOutcome::Failed { .. });
        if worth_showing && let Some(line) = outcome_line(address, outcome) {
            self.line(&line);
        }
    }

    fn on_walk_complete(&mut self, summary: &RunSummary) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        log::debug!("walk finished: {} resource(s)", summary.total());
    }
}
