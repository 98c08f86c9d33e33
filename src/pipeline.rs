//! Pipeline assembly and orchestration
//!
//! A pipeline is an ordered list of steps run fail-fast from the empty base
//! layer. Each step sees the chain of layers produced before it; the final
//! chain is the provisioned environment.

use crate::cache::Fingerprint;
use crate::error::{PlinthError, PlinthResult};
use crate::journal::RunJournal;
use crate::layer::LayerChain;
use crate::manifest::Manifest;
use crate::step::{
    fingerprint_for, BaseProvider, BaseStep, BuildStep, DependencyInstaller, InstallStep,
    PackageBuilder, SourceStep, SourceTree, Step, StepExecutor, StepStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Everything the canonical four-step pipeline needs
pub struct Provisioning {
    pub base: Arc<dyn BaseProvider>,
    pub manifest: Arc<Manifest>,
    pub installer: Arc<dyn DependencyInstaller>,
    pub source: Arc<SourceTree>,
    pub builder: Arc<dyn PackageBuilder>,
    /// Directory inside the environment holding the source tree
    pub workdir: String,
    pub install_timeout: Option<Duration>,
    pub build_timeout: Option<Duration>,
}

/// Ordered list of steps
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Step>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Base, dependencies, source, package.
    ///
    /// Dependencies come before the source so editing application code
    /// leaves the dependency layer's fingerprint untouched.
    pub fn provisioning(p: Provisioning) -> Self {
        let mut install = InstallStep::new(p.manifest, p.installer);
        if let Some(timeout) = p.install_timeout {
            install = install.with_timeout(timeout);
        }
        let mut build = BuildStep::new(p.builder, p.workdir.clone());
        if let Some(timeout) = p.build_timeout {
            build = build.with_timeout(timeout);
        }

        Self::new()
            .with_step(BaseStep::new(p.base))
            .with_step(install)
            .with_step(SourceStep::new(p.source, p.workdir))
            .with_step(build)
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Fingerprint of every step, without running anything.
    ///
    /// No-op steps get no fingerprint and leave the chain unchanged.
    pub fn plan(&self) -> Vec<PlannedStep> {
        let mut below = Fingerprint::ZERO;
        self.steps
            .iter()
            .map(|step| {
                if step.is_noop() {
                    return PlannedStep {
                        step: step.id().to_string(),
                        fingerprint: None,
                    };
                }
                let fingerprint = fingerprint_for(step.as_ref(), &below);
                below = fingerprint;
                PlannedStep {
                    step: step.id().to_string(),
                    fingerprint: Some(fingerprint),
                }
            })
            .collect()
    }
}

/// One entry of [`Pipeline::plan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub step: String,
    pub fingerprint: Option<Fingerprint>,
}

/// What happened to one step during a run
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    pub fingerprint: Option<Fingerprint>,
    pub status: StepStatus,
    /// Entries in the produced layer
    pub changes: usize,
    pub duration_ms: u64,
}

/// A finished pipeline run
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub chain: LayerChain,
    pub records: Vec<StepRecord>,
    pub duration: Duration,
}

impl PipelineRun {
    /// Fingerprint of the final layer
    pub fn fingerprint(&self) -> Fingerprint {
        self.chain.fingerprint()
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    pub fn record(&self, step: &str) -> Option<&StepRecord> {
        self.records.iter().find(|r| r.step == step)
    }
}

/// Cooperative cancellation, checked before each step
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callbacks
pub trait RunObserver: Send + Sync {
    fn step_started(&self, _index: usize, _total: usize, _step: &str) {}

    fn step_finished(&self, _record: &StepRecord) {}

    fn step_failed(&self, _step: &str, _error: &PlinthError) {}
}

/// Observer that ignores everything
pub struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Runs pipelines through a [`StepExecutor`]
pub struct Orchestrator {
    executor: StepExecutor,
    journal: RunJournal,
    cancel: CancelToken,
    observer: Arc<dyn RunObserver>,
}

impl Orchestrator {
    pub fn new(executor: StepExecutor) -> Self {
        Self {
            executor,
            journal: RunJournal::disabled(),
            cancel: CancelToken::new(),
            observer: Arc::new(SilentObserver),
        }
    }

    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// Errors from a step are wrapped with the step id and fingerprint.
    /// Nothing already cached is rolled back.
    pub async fn execute(&self, pipeline: &Pipeline) -> PlinthResult<PipelineRun> {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_started = Instant::now();
        let total = pipeline.len();
        let names: Vec<&str> = pipeline.steps().iter().map(|s| s.id()).collect();

        info!("Starting run {} ({} steps)", id, total);
        self.journal
            .log("run.started", &serde_json::json!({ "run": id, "steps": names }))
            .await;

        let mut chain = LayerChain::empty();
        let mut records = Vec::with_capacity(total);

        for (index, step) in pipeline.steps().iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Run {} cancelled before step '{}'", id, step.id());
                self.finish(id, "cancelled", None).await;
                return Err(PlinthError::Cancelled {
                    step: step.id().to_string(),
                });
            }

            self.observer.step_started(index, total, step.id());
            let step_started = Instant::now();

            if step.is_noop() {
                debug!("Skipping no-op step '{}'", step.id());
                let record = StepRecord {
                    step: step.id().to_string(),
                    fingerprint: None,
                    status: StepStatus::Skipped,
                    changes: 0,
                    duration_ms: 0,
                };
                self.journal
                    .log("step.skipped", &serde_json::json!({ "run": id, "step": step.id() }))
                    .await;
                self.observer.step_finished(&record);
                records.push(record);
                continue;
            }

            let fingerprint = fingerprint_for(step.as_ref(), &chain.fingerprint());

            match self.executor.run(step.as_ref(), &chain).await {
                Ok(outcome) => {
                    let record = StepRecord {
                        step: step.id().to_string(),
                        fingerprint: Some(*outcome.fingerprint()),
                        status: outcome.status,
                        changes: outcome.layer.delta.len(),
                        duration_ms: step_started.elapsed().as_millis() as u64,
                    };
                    let event = match outcome.status {
                        StepStatus::Cached => "step.cached",
                        _ => "step.executed",
                    };
                    self.journal
                        .log(
                            event,
                            &serde_json::json!({
                                "run": id,
                                "step": step.id(),
                                "fingerprint": fingerprint,
                                "changes": record.changes,
                                "duration_ms": record.duration_ms,
                            }),
                        )
                        .await;
                    self.observer.step_finished(&record);
                    records.push(record);
                    chain = chain.push(outcome.layer);
                }
                Err(e) => {
                    let cached = e.step_error().is_some_and(|s| s.cached);
                    self.journal
                        .log(
                            "step.failed",
                            &serde_json::json!({
                                "run": id,
                                "step": step.id(),
                                "fingerprint": fingerprint,
                                "cached": cached,
                                "error": e.to_string(),
                            }),
                        )
                        .await;
                    self.observer.step_failed(step.id(), &e);
                    self.finish(id, "failed", None).await;
                    return Err(e.at_step(step.id(), fingerprint.to_hex()));
                }
            }
        }

        let fingerprint = chain.fingerprint();
        info!("Run {} finished at {}", id, fingerprint.short());
        self.finish(id, "success", Some(fingerprint)).await;

        Ok(PipelineRun {
            id,
            started_at,
            chain,
            records,
            duration: run_started.elapsed(),
        })
    }

    async fn finish(&self, id: Uuid, status: &str, fingerprint: Option<Fingerprint>) {
        self.journal
            .log(
                "run.finished",
                &serde_json::json!({ "run": id, "status": status, "fingerprint": fingerprint }),
            )
            .await;
    }
}
