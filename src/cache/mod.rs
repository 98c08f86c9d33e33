//! Content-addressed layer cache
//!
//! Maps a step's fingerprint to what the step produced. Fingerprints are a
//! pure function of a step's inputs and of the layer below it, so a hit means
//! the step can be skipped outright.
//!
//! # Guarantees
//!
//! - Cache keys are SHA256 over (previous fingerprint, step id, input bytes)
//! - Entries are write-once; divergent content under one key is corruption
//! - Failures are recorded too, so unchanged inputs fail fast without rerunning
//!
//! # Entry States
//!
//! | State | Meaning |
//! |-------|---------|
//! | absent | Never run with these inputs, will execute |
//! | success | Layer available, step skipped |
//! | failure | Recorded failure replayed, step skipped |

pub mod entry;
pub mod fingerprint;
pub mod store;

pub use entry::{format_bytes, CacheEntry, EntryMeta, EntryStatus, Outcome, StepFailure};
pub use fingerprint::Fingerprint;
pub use store::LayerCache;
