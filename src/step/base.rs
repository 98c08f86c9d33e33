//! Base environment step

use crate::cache::StepFailure;
use crate::error::{PlinthError, PlinthResult, StepErrorKind};
use crate::layer::{snapshot, Delta};
use crate::step::{BaseProvider, Step, StepContext};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Where the base layer records which image it stands for
pub const BASE_MARKER: &str = ".plinth/base";

/// Base described by an image reference, optionally seeded from a local
/// root filesystem directory.
#[derive(Debug, Clone)]
pub struct ImageBase {
    image: String,
    rootfs: Option<Delta>,
}

impl ImageBase {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            rootfs: None,
        }
    }

    /// Seed the base with the contents of `dir`, read once at construction
    pub async fn with_rootfs(image: impl Into<String>, dir: &Path) -> PlinthResult<Self> {
        if !dir.is_dir() {
            return Err(PlinthError::PathNotFound(dir.to_path_buf()));
        }
        let view = snapshot(dir, &[]).await?;
        Ok(Self {
            image: image.into(),
            rootfs: Some(Delta::from_entries(view)),
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }
}

#[async_trait]
impl BaseProvider for ImageBase {
    fn describe(&self) -> String {
        match &self.rootfs {
            Some(rootfs) => format!("image={}\nrootfs={}", self.image, rootfs.digest()),
            None => format!("image={}", self.image),
        }
    }

    async fn provision(&self, _ctx: &StepContext<'_>) -> Result<Delta, StepFailure> {
        let mut delta = self.rootfs.clone().unwrap_or_default();
        let marker = delta
            .mkdir(".plinth")
            .and_then(|()| delta.write(BASE_MARKER, format!("{}\n", self.image)));
        marker.map_err(|e| StepFailure::new(StepErrorKind::Provision, e.to_string()))?;
        Ok(delta)
    }
}

/// First step of every pipeline
pub struct BaseStep {
    provider: Arc<dyn BaseProvider>,
}

impl BaseStep {
    pub fn new(provider: Arc<dyn BaseProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Step for BaseStep {
    fn id(&self) -> &str {
        "base"
    }

    fn inputs(&self) -> Vec<u8> {
        self.provider.describe().into_bytes()
    }

    async fn apply(&self, ctx: &StepContext<'_>) -> Result<Delta, StepFailure> {
        self.provider.provision(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Fingerprint;
    use crate::layer::{FileChange, LayerChain};
    use tempfile::TempDir;

    #[tokio::test]
    async fn image_base_writes_marker() {
        let scratch = TempDir::new().unwrap();
        let chain = LayerChain::empty();
        let ctx = StepContext::new(&chain, Fingerprint::ZERO, scratch.path());

        let base = ImageBase::new("python:3.12-slim");
        let delta = base.provision(&ctx).await.unwrap();

        assert_eq!(delta.get(".plinth"), Some(&FileChange::Dir));
        assert_eq!(delta.get(BASE_MARKER), Some(&FileChange::file("python:3.12-slim\n")));
    }

    #[tokio::test]
    async fn rootfs_contents_are_part_of_identity() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join("etc/os-release"), "ID=debian").unwrap();

        let plain = ImageBase::new("python:3.12-slim");
        let seeded = ImageBase::with_rootfs("python:3.12-slim", dir.path()).await.unwrap();
        assert_ne!(plain.describe(), seeded.describe());

        std::fs::write(dir.path().join("etc/os-release"), "ID=alpine").unwrap();
        let changed = ImageBase::with_rootfs("python:3.12-slim", dir.path()).await.unwrap();
        assert_ne!(seeded.describe(), changed.describe());

        let scratch = TempDir::new().unwrap();
        let chain = LayerChain::empty();
        let ctx = StepContext::new(&chain, Fingerprint::ZERO, scratch.path());
        let delta = changed.provision(&ctx).await.unwrap();
        assert_eq!(delta.get("etc/os-release"), Some(&FileChange::file("ID=alpine")));
    }

    #[tokio::test]
    async fn missing_rootfs_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = ImageBase::with_rootfs("x", &dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, PlinthError::PathNotFound(_)));
    }

    #[test]
    fn base_step_inputs_follow_image() {
        let a = BaseStep::new(Arc::new(ImageBase::new("python:3.12-slim")));
        let b = BaseStep::new(Arc::new(ImageBase::new("python:3.11-slim")));
        assert_eq!(a.id(), "base");
        assert_ne!(a.inputs(), b.inputs());
    }
}
