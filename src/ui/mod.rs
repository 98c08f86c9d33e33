//! Terminal output
//!
//! Uses `cliclack` and `indicatif` in interactive terminals, with plain
//! line output in CI and when stdout is not a TTY.

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{intro, notice, outro_success, summary, Notice};
pub use progress::{describe_record, RunProgress, TaskSpinner};
pub use prompts::confirm;
