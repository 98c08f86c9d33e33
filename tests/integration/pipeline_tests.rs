//! Provisioning pipeline properties, exercised through the library API

use async_trait::async_trait;
use plinth::cache::{LayerCache, StepFailure};
use plinth::error::{PlinthError, StepErrorKind};
use plinth::layer::{Delta, FileChange};
use plinth::manifest::Manifest;
use plinth::pipeline::{Orchestrator, Pipeline, PipelineRun, Provisioning};
use plinth::step::{
    DependencyInstaller, ImageBase, PackageBuilder, SourceTree, StepContext, StepExecutor,
    StepStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Installs one marker file per requirement and counts invocations
#[derive(Default)]
struct FakeInstaller {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl DependencyInstaller for FakeInstaller {
    fn describe(&self) -> String {
        "fake-installer/1".to_string()
    }

    async fn install(&self, manifest: &Manifest, _ctx: &StepContext<'_>) -> Result<Delta, StepFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StepFailure::new(StepErrorKind::Install, "no matching distribution"));
        }
        let mut delta = Delta::new();
        for req in manifest.requirements() {
            delta
                .write(&format!("site-packages/{}", req.normalized_name()), req.to_string())
                .map_err(|e| StepFailure::new(StepErrorKind::Install, e.to_string()))?;
        }
        Ok(delta)
    }
}

/// Packages whatever source is present under the workdir
#[derive(Default)]
struct FakeBuilder {
    calls: AtomicUsize,
}

#[async_trait]
impl PackageBuilder for FakeBuilder {
    fn describe(&self) -> String {
        "fake-builder/1".to_string()
    }

    async fn build(&self, workdir: &str, ctx: &StepContext<'_>) -> Result<Delta, StepFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let main = ctx
            .input()
            .resolve(&format!("{}/main.py", workdir))
            .cloned()
            .ok_or_else(|| StepFailure::new(StepErrorKind::Build, "main.py missing"))?;
        let mut delta = Delta::new();
        delta
            .insert("dist/app.bin", main)
            .map_err(|e| StepFailure::new(StepErrorKind::Build, e.to_string()))?;
        Ok(delta)
    }
}

struct Fixture {
    source_dir: TempDir,
    scratch: TempDir,
    cache: Arc<LayerCache>,
    installer: Arc<FakeInstaller>,
    builder: Arc<FakeBuilder>,
}

impl Fixture {
    fn new() -> Self {
        let source_dir = TempDir::new().unwrap();
        std::fs::write(source_dir.path().join("main.py"), "print('hello')").unwrap();
        Self {
            source_dir,
            scratch: TempDir::new().unwrap(),
            cache: Arc::new(LayerCache::in_memory()),
            installer: Arc::new(FakeInstaller::default()),
            builder: Arc::new(FakeBuilder::default()),
        }
    }

    async fn pipeline(&self, manifest: &str) -> Pipeline {
        let source = SourceTree::scan(self.source_dir.path(), &[]).await.unwrap();
        Pipeline::provisioning(Provisioning {
            base: Arc::new(ImageBase::new("python:3.12-slim")),
            manifest: Arc::new(Manifest::parse(manifest).unwrap()),
            installer: self.installer.clone(),
            source: Arc::new(source),
            builder: self.builder.clone(),
            workdir: "app".to_string(),
            install_timeout: None,
            build_timeout: None,
        })
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            StepExecutor::new(self.cache.clone()).with_scratch_root(self.scratch.path()),
        )
    }

    async fn run(&self, manifest: &str) -> Result<PipelineRun, PlinthError> {
        let pipeline = self.pipeline(manifest).await;
        self.orchestrator().execute(&pipeline).await
    }

    fn installs(&self) -> usize {
        self.installer.calls.load(Ordering::SeqCst)
    }

    fn builds(&self) -> usize {
        self.builder.calls.load(Ordering::SeqCst)
    }
}

fn status(run: &PipelineRun, step: &str) -> StepStatus {
    run.record(step).unwrap().status
}

#[tokio::test]
async fn unchanged_inputs_are_fully_cached() {
    let fx = Fixture::new();

    let first = fx.run("requests *\n").await.unwrap();
    let second = fx.run("requests *\n").await.unwrap();

    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(first.count(StepStatus::Executed), 4);
    assert_eq!(second.count(StepStatus::Cached), 4);
    assert_eq!(fx.installs(), 1);
    assert_eq!(fx.builds(), 1);
}

#[tokio::test]
async fn final_chain_contains_every_layer() {
    let fx = Fixture::new();
    let run = fx.run("requests==2.31\n").await.unwrap();

    let steps: Vec<&str> = run.chain.layers().iter().map(|l| l.step.as_str()).collect();
    assert_eq!(steps, vec!["base", "dependencies", "source", "package"]);
    assert!(run.chain.resolve(".plinth/base").is_some());
    assert!(run.chain.resolve("site-packages/requests").is_some());
    assert_eq!(
        run.chain.resolve("dist/app.bin"),
        Some(&FileChange::file("print('hello')"))
    );
}

#[tokio::test]
async fn source_edit_keeps_dependency_layer() {
    let fx = Fixture::new();
    let before = fx.run("requests\n").await.unwrap();

    std::fs::write(fx.source_dir.path().join("main.py"), "print('bye')").unwrap();
    let after = fx.run("requests\n").await.unwrap();

    assert_eq!(status(&after, "base"), StepStatus::Cached);
    assert_eq!(status(&after, "dependencies"), StepStatus::Cached);
    assert_eq!(status(&after, "source"), StepStatus::Executed);
    assert_eq!(status(&after, "package"), StepStatus::Executed);
    assert_eq!(
        before.record("dependencies").unwrap().fingerprint,
        after.record("dependencies").unwrap().fingerprint
    );
    assert_eq!(fx.installs(), 1);
}

#[tokio::test]
async fn constraint_change_rebuilds_dependencies_and_package() {
    let fx = Fixture::new();
    let before = fx.run("requests *\n").await.unwrap();
    let after = fx.run("requests >=2.0\n").await.unwrap();

    assert_ne!(
        before.record("dependencies").unwrap().fingerprint,
        after.record("dependencies").unwrap().fingerprint
    );
    assert_eq!(status(&after, "base"), StepStatus::Cached);
    assert_eq!(status(&after, "dependencies"), StepStatus::Executed);
    assert_eq!(status(&after, "package"), StepStatus::Executed);
    assert_eq!(fx.builds(), 2);
}

#[tokio::test]
async fn manifest_cosmetics_do_not_invalidate() {
    let fx = Fixture::new();
    fx.run("requests>=2.0\n").await.unwrap();
    let again = fx.run("# http client\n\nrequests >= 2.0   # pinned\n").await.unwrap();

    assert_eq!(again.count(StepStatus::Cached), 4);
}

#[tokio::test]
async fn empty_manifest_skips_dependency_step() {
    let fx = Fixture::new();
    let run = fx.run("# nothing yet\n").await.unwrap();

    assert_eq!(status(&run, "dependencies"), StepStatus::Skipped);
    assert!(run.record("dependencies").unwrap().fingerprint.is_none());
    assert_eq!(run.chain.len(), 3);
    assert_eq!(fx.installs(), 0);
}

#[tokio::test]
async fn install_failure_stops_the_run() {
    let mut fx = Fixture::new();
    fx.installer = Arc::new(FakeInstaller {
        calls: AtomicUsize::new(0),
        fail: true,
    });

    let err = fx.run("nonexistent-package==9.9\n").await.unwrap_err();
    match &err {
        PlinthError::Pipeline { step, .. } => assert_eq!(step, "dependencies"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(err.step_error().unwrap().kind, StepErrorKind::Install);
    assert_eq!(fx.builds(), 0);

    // Replayed from the cache without invoking the installer again
    let err = fx.run("nonexistent-package==9.9\n").await.unwrap_err();
    assert!(err.step_error().unwrap().cached);
    assert!(err.hint().unwrap().contains("cache forget"));
    assert_eq!(fx.installs(), 1);
}

#[tokio::test]
async fn concurrent_runs_share_one_cache() {
    let fx = Fixture::new();
    let a = fx.pipeline("requests\n").await;
    let b = fx.pipeline("requests\n").await;
    let (oa, ob) = (fx.orchestrator(), fx.orchestrator());

    let (ra, rb) = tokio::join!(oa.execute(&a), ob.execute(&b));
    assert_eq!(ra.unwrap().fingerprint(), rb.unwrap().fingerprint());
}

#[tokio::test]
async fn persistent_cache_survives_reopen() {
    let cache_dir = TempDir::new().unwrap();
    let mut fx = Fixture::new();
    fx.cache = Arc::new(LayerCache::open(cache_dir.path()).await.unwrap());
    let first = fx.run("flask==3.0\n").await.unwrap();

    fx.cache = Arc::new(LayerCache::open(cache_dir.path()).await.unwrap());
    let second = fx.run("flask==3.0\n").await.unwrap();

    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(second.count(StepStatus::Cached), 4);
    assert_eq!(fx.installs(), 1);
}

#[tokio::test]
async fn plan_predicts_run_fingerprints() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline("requests\nflask\n").await;

    let planned: Vec<_> = pipeline.plan().into_iter().map(|p| p.fingerprint).collect();
    let run = fx.orchestrator().execute(&pipeline).await.unwrap();
    let actual: Vec<_> = run.records.iter().map(|r| r.fingerprint).collect();

    assert_eq!(planned, actual);
}
