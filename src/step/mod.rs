//! Provisioning steps
//!
//! A step is a unit of work with a stable id, a set of declared input bytes
//! and an action producing a filesystem delta. Anything the action depends
//! on (manifest contents, tool command lines, source digests) must be in the
//! declared inputs, otherwise the cache cannot see it change.
//!
//! The canonical pipeline uses four steps:
//!
//! | Step | Id | Inputs |
//! |------|----|--------|
//! | [`BaseStep`] | `base` | image reference + rootfs digest |
//! | [`InstallStep`] | `dependencies` | canonical manifest + installer command |
//! | [`SourceStep`] | `source` | workdir + source tree digest |
//! | [`BuildStep`] | `package` | workdir + builder command |

pub mod base;
pub mod build;
pub mod command;
pub mod executor;
pub mod install;
pub mod source;

pub use base::{BaseStep, ImageBase};
pub use build::{BuildStep, CommandBuilder};
pub use command::CommandTemplate;
pub use executor::{StepExecutor, StepOutcome, StepStatus};
pub use install::{CommandInstaller, InstallStep};
pub use source::{SourceStep, SourceTree};

use crate::cache::{Fingerprint, StepFailure};
use crate::error::StepErrorKind;
use crate::layer::{Delta, LayerChain, Workspace};
use crate::manifest::Manifest;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// What a step action sees while it runs
pub struct StepContext<'a> {
    input: &'a LayerChain,
    fingerprint: Fingerprint,
    scratch: &'a Path,
}

impl<'a> StepContext<'a> {
    pub fn new(input: &'a LayerChain, fingerprint: Fingerprint, scratch: &'a Path) -> Self {
        Self {
            input,
            fingerprint,
            scratch,
        }
    }

    /// Layers below this step
    pub fn input(&self) -> &LayerChain {
        self.input
    }

    /// Fingerprint this step's output will be cached under
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Private directory for this action, removed once it returns
    pub fn scratch_dir(&self) -> &Path {
        self.scratch
    }

    /// Materialize the input chain into `<scratch>/root`
    pub async fn checkout(&self) -> Result<Workspace, StepFailure> {
        Workspace::checkout(self.input, self.scratch)
            .await
            .map_err(|e| StepFailure::new(StepErrorKind::Action, format!("checkout failed: {}", e)))
    }
}

/// A single pipeline step
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable identifier, part of the fingerprint
    fn id(&self) -> &str;

    /// Declared input bytes, part of the fingerprint
    fn inputs(&self) -> Vec<u8>;

    /// Steps with nothing to do are skipped without producing a layer
    fn is_noop(&self) -> bool {
        false
    }

    /// Time budget overriding the executor default
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the action against the input chain
    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Delta, StepFailure>;
}

/// Fingerprint `step` would have on top of a layer with fingerprint `below`
pub fn fingerprint_for(step: &dyn Step, below: &Fingerprint) -> Fingerprint {
    Fingerprint::chain(below, step.id(), &step.inputs())
}

/// Supplies the initial filesystem state
#[async_trait]
pub trait BaseProvider: Send + Sync {
    /// Identity of the base, folded into the base step's inputs
    fn describe(&self) -> String;

    async fn provision(&self, ctx: &StepContext<'_>) -> Result<Delta, StepFailure>;
}

/// Installs a manifest's requirements into the environment
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Identity of the installer, folded into the install step's inputs
    fn describe(&self) -> String;

    async fn install(&self, manifest: &Manifest, ctx: &StepContext<'_>) -> Result<Delta, StepFailure>;
}

/// Builds and installs the source tree found at `workdir`
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    /// Identity of the builder, folded into the build step's inputs
    fn describe(&self) -> String;

    async fn build(&self, workdir: &str, ctx: &StepContext<'_>) -> Result<Delta, StepFailure>;
}
