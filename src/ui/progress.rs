//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::error::PlinthError;
use crate::pipeline::{RunObserver, StepRecord};
use crate::step::StepStatus;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    /// Create a new spinner (shows once started, in interactive mode)
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else if self.interactive {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else if self.interactive {
            println!("{} {}", style("✗").red(), message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }
}

/// Pipeline progress.
///
/// Shows an indicatif bar across the steps in interactive mode and one
/// plain line per step otherwise.
pub struct RunProgress {
    bar: Option<ProgressBar>,
}

impl RunProgress {
    pub fn new(ctx: &UiContext, total: usize) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total as u64);
            if let Ok(bar_style) = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} {bar:20.cyan/dim} {pos}/{len} {msg}  {elapsed:.dim}")
            {
                bar.set_style(bar_style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ").progress_chars("━╸─"));
            }
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self { bar }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }

    fn line(&self, text: String) {
        match self.bar {
            Some(ref bar) => bar.println(text),
            None => println!("{}", text),
        }
    }
}

impl RunObserver for RunProgress {
    fn step_started(&self, index: usize, total: usize, step: &str) {
        match self.bar {
            Some(ref bar) => {
                bar.set_position(index as u64);
                bar.set_message(step.to_string());
            }
            None => println!("{} [{}/{}] {}", style("...").dim(), index + 1, total, step),
        }
    }

    fn step_finished(&self, record: &StepRecord) {
        if let Some(ref bar) = self.bar {
            bar.inc(1);
        }
        self.line(describe_record(record));
    }

    fn step_failed(&self, step: &str, error: &PlinthError) {
        self.line(format!("  {} {}: {}", style("[FAIL]").red(), step, error));
    }
}

/// One-line summary of a finished step
pub fn describe_record(record: &StepRecord) -> String {
    let fingerprint = record
        .fingerprint
        .map(|f| f.short())
        .unwrap_or_else(|| "-".to_string());
    match record.status {
        StepStatus::Executed => format!(
            "  {} {:<12} {}  {} change(s) in {} ms",
            style("[RUN]").green(),
            record.step,
            style(fingerprint).dim(),
            record.changes,
            record.duration_ms
        ),
        StepStatus::Cached => format!(
            "  {} {:<12} {}  cached",
            style("[HIT]").cyan(),
            record.step,
            style(fingerprint).dim()
        ),
        StepStatus::Skipped => format!(
            "  {} {:<12} nothing to do",
            style("[-]").dim(),
            record.step
        ),
    }
}
