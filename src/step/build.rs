//! Package build step

use crate::cache::StepFailure;
use crate::error::StepErrorKind;
use crate::layer::Delta;
use crate::step::{CommandTemplate, PackageBuilder, Step, StepContext};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Builds the application from the source copied in by the source step
pub struct BuildStep {
    builder: Arc<dyn PackageBuilder>,
    workdir: String,
    timeout: Option<Duration>,
}

impl BuildStep {
    pub fn new(builder: Arc<dyn PackageBuilder>, workdir: impl Into<String>) -> Self {
        Self {
            builder,
            workdir: workdir.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Step for BuildStep {
    fn id(&self) -> &str {
        "package"
    }

    fn inputs(&self) -> Vec<u8> {
        format!("workdir={}\n{}", self.workdir, self.builder.describe()).into_bytes()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Delta, StepFailure> {
        self.builder.build(&self.workdir, ctx).await
    }
}

/// Builder that runs a command line from inside the working directory.
///
/// Placeholders: `{root}` and `{workdir}`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: CommandTemplate,
}

impl CommandBuilder {
    pub fn new(command: CommandTemplate) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PackageBuilder for CommandBuilder {
    fn describe(&self) -> String {
        self.command.describe()
    }

    async fn build(&self, workdir: &str, ctx: &StepContext<'_>) -> Result<Delta, StepFailure> {
        self.command
            .run(StepErrorKind::Build, ctx, Some(workdir), &[("workdir", workdir)])
            .await
    }
}
