//! Dependency installation step

use crate::cache::StepFailure;
use crate::error::{PlinthError, StepErrorKind};
use crate::layer::Delta;
use crate::manifest::Manifest;
use crate::step::{CommandTemplate, DependencyInstaller, Step, StepContext};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// File name the canonical manifest is written to inside the scratch dir
const MANIFEST_FILE: &str = "requirements.txt";

/// Installs the manifest's requirements on top of the base layer
pub struct InstallStep {
    manifest: Arc<Manifest>,
    installer: Arc<dyn DependencyInstaller>,
    timeout: Option<Duration>,
}

impl InstallStep {
    pub fn new(manifest: Arc<Manifest>, installer: Arc<dyn DependencyInstaller>) -> Self {
        Self {
            manifest,
            installer,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Step for InstallStep {
    fn id(&self) -> &str {
        "dependencies"
    }

    fn inputs(&self) -> Vec<u8> {
        let mut bytes = self.manifest.canonical_bytes();
        bytes.push(0);
        bytes.extend_from_slice(self.installer.describe().as_bytes());
        bytes
    }

    fn is_noop(&self) -> bool {
        self.manifest.is_empty()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Delta, StepFailure> {
        self.installer.install(&self.manifest, ctx).await
    }
}

/// Installer that runs a command line against the canonical manifest.
///
/// Placeholders: `{root}` and `{manifest}` (path of the written manifest).
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    command: CommandTemplate,
}

impl CommandInstaller {
    pub fn new(command: CommandTemplate) -> Self {
        Self { command }
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    fn describe(&self) -> String {
        self.command.describe()
    }

    async fn install(&self, manifest: &Manifest, ctx: &StepContext<'_>) -> Result<Delta, StepFailure> {
        let path = ctx.scratch_dir().join(MANIFEST_FILE);
        tokio::fs::write(&path, manifest.canonical())
            .await
            .map_err(|e| {
                let err = PlinthError::io(format!("writing {}", path.display()), e);
                StepFailure::new(StepErrorKind::Action, err.to_string())
            })?;

        let manifest_path = path.to_string_lossy();
        self.command
            .run(StepErrorKind::Install, ctx, None, &[("manifest", manifest_path.as_ref())])
            .await
    }
}
