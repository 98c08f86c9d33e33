//! Source tree step

use crate::cache::{Fingerprint, StepFailure};
use crate::error::{PlinthError, PlinthResult, StepErrorKind};
use crate::layer::{snapshot, Delta};
use crate::step::{Step, StepContext};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Immutable snapshot of an application's source directory
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
    files: Delta,
}

impl SourceTree {
    /// Read `dir`, skipping entries named in `ignore`
    pub async fn scan(dir: &Path, ignore: &[String]) -> PlinthResult<Self> {
        if !dir.exists() {
            return Err(PlinthError::PathNotFound(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(PlinthError::SourceInvalid {
                path: dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let view = snapshot(dir, ignore).await?;
        debug!("Scanned {} entries from {}", view.len(), dir.display());
        Ok(Self {
            root: dir.to_path_buf(),
            files: Delta::from_entries(view),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &Delta {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Content digest; changes whenever any file, mode or link changes
    pub fn digest(&self) -> Fingerprint {
        self.files.digest()
    }
}

/// Copies the source tree into the environment under a working directory
pub struct SourceStep {
    tree: Arc<SourceTree>,
    workdir: String,
}

impl SourceStep {
    pub fn new(tree: Arc<SourceTree>, workdir: impl Into<String>) -> Self {
        Self {
            tree,
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl Step for SourceStep {
    fn id(&self) -> &str {
        "source"
    }

    fn inputs(&self) -> Vec<u8> {
        format!("workdir={}\ndigest={}", self.workdir, self.tree.digest()).into_bytes()
    }

    async fn apply(&self, _ctx: &StepContext<'_>) -> Result<Delta, StepFailure> {
        self.tree
            .files()
            .prefixed(&self.workdir)
            .map_err(|e| StepFailure::new(StepErrorKind::Source, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{FileChange, LayerChain};
    use std::fs;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/main.py"), "print('hi')").unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        dir
    }

    #[tokio::test]
    async fn scan_respects_ignore() {
        let dir = project();
        let tree = SourceTree::scan(dir.path(), &[".git".to_string()]).await.unwrap();
        assert!(tree.files().get("app/main.py").is_some());
        assert!(tree.files().get(".git/HEAD").is_none());
    }

    #[tokio::test]
    async fn digest_tracks_content() {
        let dir = project();
        let before = SourceTree::scan(dir.path(), &[]).await.unwrap();
        let same = SourceTree::scan(dir.path(), &[]).await.unwrap();
        assert_eq!(before.digest(), same.digest());

        fs::write(dir.path().join("app/main.py"), "print('bye')").unwrap();
        let after = SourceTree::scan(dir.path(), &[]).await.unwrap();
        assert_ne!(before.digest(), after.digest());
    }

    #[tokio::test]
    async fn scan_missing_dir() {
        let dir = TempDir::new().unwrap();
        let err = SourceTree::scan(&dir.path().join("missing"), &[]).await.unwrap_err();
        assert!(matches!(err, PlinthError::PathNotFound(_)));

        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        let err = SourceTree::scan(&file, &[]).await.unwrap_err();
        assert!(matches!(err, PlinthError::SourceInvalid { .. }));
    }

    #[tokio::test]
    async fn step_places_tree_under_workdir() {
        let dir = project();
        let tree = Arc::new(SourceTree::scan(dir.path(), &[".git".to_string()]).await.unwrap());
        let step = SourceStep::new(tree, "srv/app");

        let scratch = TempDir::new().unwrap();
        let chain = LayerChain::empty();
        let ctx = StepContext::new(&chain, Fingerprint::ZERO, scratch.path());
        let delta = step.apply(&ctx).await.unwrap();

        assert_eq!(delta.get("srv/app"), Some(&FileChange::Dir));
        assert_eq!(
            delta.get("srv/app/app/main.py"),
            Some(&FileChange::file("print('hi')"))
        );
    }

    #[tokio::test]
    async fn invalid_workdir_fails_as_source_error() {
        let dir = project();
        let tree = Arc::new(SourceTree::scan(dir.path(), &[]).await.unwrap());
        let step = SourceStep::new(tree, "../escape");

        let scratch = TempDir::new().unwrap();
        let chain = LayerChain::empty();
        let ctx = StepContext::new(&chain, Fingerprint::ZERO, scratch.path());
        let failure = step.apply(&ctx).await.unwrap_err();
        assert_eq!(failure.kind, StepErrorKind::Source);
    }
}
