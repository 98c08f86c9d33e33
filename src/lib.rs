//! Plinth - deterministic environment provisioning
//!
//! Builds an application environment as an ordered chain of immutable
//! layers (base, dependencies, source, package). Every layer is keyed by a
//! fingerprint of its inputs and the layer below, so unchanged steps are
//! served from a content-addressed cache instead of re-running.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod journal;
pub mod layer;
pub mod manifest;
pub mod pipeline;
pub mod step;
pub mod ui;

pub use error::{PlinthError, PlinthResult};
