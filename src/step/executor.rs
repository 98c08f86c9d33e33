//! Cached step execution
//!
//! The executor computes a step's fingerprint, consults the layer cache and
//! only runs the action on a miss. Successes and failures are both written
//! back, except failures that do not depend on the inputs (timeouts, tools
//! killed by a signal).

use crate::cache::{CacheEntry, Fingerprint, LayerCache, StepFailure};
use crate::error::{PlinthError, PlinthResult, StepErrorKind};
use crate::layer::{Delta, Layer, LayerChain};
use crate::step::{fingerprint_for, Step, StepContext};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCRATCH_REMOVE_ATTEMPTS: u32 = 5;

/// How a step's layer was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Action ran and its result was cached
    Executed,
    /// Layer came from the cache
    Cached,
    /// Nothing to do, no layer produced
    Skipped,
}

/// Result of running one step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub layer: Arc<Layer>,
    pub status: StepStatus,
}

impl StepOutcome {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.layer.fingerprint
    }
}

/// Runs steps against the layer cache
pub struct StepExecutor {
    cache: Arc<LayerCache>,
    scratch_root: PathBuf,
    default_timeout: Option<Duration>,
}

impl StepExecutor {
    pub fn new(cache: Arc<LayerCache>) -> Self {
        Self {
            cache,
            scratch_root: std::env::temp_dir().join("plinth"),
            default_timeout: None,
        }
    }

    /// Directory under which per-action scratch dirs are created
    pub fn with_scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_root = dir.into();
        self
    }

    /// Time budget for steps that do not set their own
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<LayerCache> {
        &self.cache
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Run `step` on top of `input`.
    ///
    /// A cached success returns its layer without running the action; a
    /// cached failure is returned as an error marked `cached`.
    pub async fn run(&self, step: &dyn Step, input: &LayerChain) -> PlinthResult<StepOutcome> {
        let fingerprint = fingerprint_for(step, &input.fingerprint());

        if let Some(entry) = self.cache.get(&fingerprint).await {
            return match entry.layer() {
                Some(layer) => {
                    debug!("Cache hit for step '{}' ({})", step.id(), fingerprint.short());
                    Ok(StepOutcome {
                        layer: Arc::new(layer),
                        status: StepStatus::Cached,
                    })
                }
                None => {
                    let failure = entry.failure_info().cloned().unwrap_or_else(|| {
                        StepFailure::new(StepErrorKind::Action, "recorded failure without details")
                    });
                    debug!(
                        "Cached failure for step '{}' ({}): {}",
                        step.id(),
                        fingerprint.short(),
                        failure
                    );
                    Err(failure.into_error(step.id(), true).into())
                }
            };
        }

        info!("Running step '{}' ({})", step.id(), fingerprint.short());
        let result = self.apply(step, input, fingerprint).await?;

        match result {
            Ok(delta) => {
                debug!(
                    "Step '{}' produced {} change(s)",
                    step.id(),
                    delta.len()
                );
                let entry = self
                    .cache
                    .put(CacheEntry::success(fingerprint, step.id(), delta))
                    .await?;
                let layer = entry.layer().ok_or_else(|| {
                    PlinthError::CacheCorruption {
                        fingerprint: fingerprint.to_hex(),
                        reason: "expected a successful entry".to_string(),
                    }
                })?;
                Ok(StepOutcome {
                    layer: Arc::new(layer),
                    status: StepStatus::Executed,
                })
            }
            Err(failure) => {
                warn!("Step '{}' failed: {}", step.id(), failure);
                if !failure.kind.is_cacheable() {
                    debug!("Not caching {} failure for {}", failure.kind, fingerprint.short());
                } else {
                    self.cache
                        .put(CacheEntry::failure(fingerprint, step.id(), failure.clone()))
                        .await?;
                }
                Err(failure.into_error(step.id(), false).into())
            }
        }
    }

    /// Run the action in a fresh scratch directory, enforcing the time budget
    async fn apply(
        &self,
        step: &dyn Step,
        input: &LayerChain,
        fingerprint: Fingerprint,
    ) -> PlinthResult<Result<Delta, StepFailure>> {
        let scratch = self.scratch_root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| PlinthError::io(format!("creating {}", scratch.display()), e))?;

        let ctx = StepContext::new(input, fingerprint, &scratch);
        let result = match step.timeout().or(self.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, step.apply(&ctx)).await {
                Ok(result) => result,
                Err(_) => Err(StepFailure::new(
                    StepErrorKind::Timeout,
                    format!("exceeded time limit of {:?}", limit),
                )),
            },
            None => step.apply(&ctx).await,
        };

        remove_scratch(&scratch).await;

        Ok(result)
    }

    /// Remove scratch dirs left behind by earlier processes, e.g. after a
    /// crash. Returns how many were removed.
    pub async fn sweep_scratch(&self, older_than: Duration) -> usize {
        let mut dirs = match tokio::fs::read_dir(&self.scratch_root).await {
            Ok(dirs) => dirs,
            Err(_) => return 0,
        };

        let mut removed = 0;
        while let Ok(Some(item)) = dirs.next_entry().await {
            let path = item.path();
            let is_scratch = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| Uuid::parse_str(n).is_ok());
            if !is_scratch {
                continue;
            }
            let age = item
                .metadata()
                .await
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok());
            if age.is_some_and(|age| age >= older_than)
                && tokio::fs::remove_dir_all(&path).await.is_ok()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Swept {} stale scratch dir(s) from {}", removed, self.scratch_root.display());
        }
        removed
    }
}

/// Remove a scratch dir. A blocking task abandoned by a timeout may still be
/// writing into it, so removal is retried briefly.
async fn remove_scratch(scratch: &Path) {
    for attempt in 1..=SCRATCH_REMOVE_ATTEMPTS {
        match tokio::fs::remove_dir_all(scratch).await {
            Ok(()) => return,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) if attempt == SCRATCH_REMOVE_ATTEMPTS => {
                warn!("Failed to remove scratch dir {}: {}", scratch.display(), e);
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await,
        }
    }
}
