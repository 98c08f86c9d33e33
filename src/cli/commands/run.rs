//! Run command - provision the environment

use crate::cli::args::{OutputFormat, RunArgs};
use crate::cli::inputs::{load_pipeline, open_cache};
use crate::config::{Config, ConfigManager};
use crate::error::PlinthResult;
use crate::journal::RunJournal;
use crate::pipeline::{CancelToken, Orchestrator, PipelineRun, RunObserver, SilentObserver};
use crate::step::{StepExecutor, StepStatus};
use crate::ui::{self, RunProgress, TaskSpinner, UiContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Scratch dirs untouched for this long belong to no live run
const STALE_SCRATCH_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config, cancel: CancelToken) -> PlinthResult<()> {
    let json = args.format == OutputFormat::Json;
    let ctx = UiContext::detect().with_quiet(json);

    if !json {
        ui::intro(&ctx, "plinth run");
    }

    let mut spinner = (!json).then(|| TaskSpinner::new(&ctx));
    if let Some(s) = spinner.as_mut() {
        s.start("Reading manifest and source tree...");
    }
    let timeout = args.timeout.map(Duration::from_secs);
    let pipeline = match load_pipeline(&args.input, config, timeout).await {
        Ok(pipeline) => {
            if let Some(s) = spinner.as_mut() {
                s.stop(&format!("Inputs loaded from {}", args.input.source.display()));
            }
            pipeline
        }
        Err(e) => {
            if let Some(s) = spinner.as_mut() {
                s.stop_error("Failed to read inputs");
            }
            return Err(e);
        }
    };
    let cache = open_cache(config, args.no_cache).await?;
    debug!("Cache holds {} entries", cache.len().await);

    let executor = StepExecutor::new(cache).with_scratch_root(ConfigManager::scratch_dir());
    executor.sweep_scratch(STALE_SCRATCH_AGE).await;

    let progress = (!json).then(|| Arc::new(RunProgress::new(&ctx, pipeline.len())));
    let observer: Arc<dyn RunObserver> = match &progress {
        Some(p) => p.clone(),
        None => Arc::new(SilentObserver),
    };

    let orchestrator = Orchestrator::new(executor)
        .with_journal(RunJournal::new(config))
        .with_cancel_token(cancel)
        .with_observer(observer);

    let result = orchestrator.execute(&pipeline).await;
    if let Some(p) = &progress {
        p.finish();
    }
    let run = result?;

    if json {
        print_run_json(&run)?;
    } else {
        print_run_summary(&ctx, &run);
    }

    Ok(())
}

fn print_run_summary(ctx: &UiContext, run: &PipelineRun) {
    let fingerprint = run.fingerprint();
    ui::summary(
        ctx,
        &[
            ("Fingerprint", fingerprint.to_hex()),
            ("Layers", run.chain.len().to_string()),
            (
                "Steps",
                format!(
                    "{} executed, {} cached, {} skipped",
                    run.count(StepStatus::Executed),
                    run.count(StepStatus::Cached),
                    run.count(StepStatus::Skipped)
                ),
            ),
            ("Duration", format!("{:.1}s", run.duration.as_secs_f64())),
        ],
    );
    ui::outro_success(ctx, &format!("Environment ready ({})", fingerprint.short()));
}

fn print_run_json(run: &PipelineRun) -> PlinthResult<()> {
    let output = serde_json::json!({
        "run": run.id,
        "started_at": run.started_at,
        "fingerprint": run.fingerprint(),
        "layers": run.chain.len(),
        "duration_ms": run.duration.as_millis() as u64,
        "steps": run.records,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
