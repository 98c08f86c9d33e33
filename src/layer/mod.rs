//! Layer system
//!
//! Every pipeline step produces one immutable layer: the filesystem delta it
//! made on top of the layers below. Layers stack into a [`LayerChain`], and
//! a chain can be checked out into a real directory ([`Workspace`]) when an
//! external tool needs to run against it.

pub mod chain;
pub mod delta;
pub mod fs;

pub use chain::{Layer, LayerChain};
pub use delta::{normalize_path, Delta, FileChange};
pub use fs::{diff, materialize, snapshot, TreeView, Workspace};
