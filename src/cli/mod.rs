//! Command-line interface

pub mod args;
pub mod commands;
pub mod inputs;

pub use args::{Cli, Commands};
