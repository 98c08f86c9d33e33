//! Plan command - show what a run would do

use crate::cache::{EntryStatus, LayerCache};
use crate::cli::args::{OutputFormat, PlanArgs};
use crate::cli::inputs::{load_pipeline, open_cache};
use crate::config::Config;
use crate::error::PlinthResult;
use crate::pipeline::PlannedStep;
use console::style;
use serde::Serialize;

/// Cache status of a planned step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum PlanStatus {
    /// Layer cached, step will be skipped
    Hit,
    /// Recorded failure will be replayed
    Failed,
    /// Step will execute
    Miss,
    /// No-op step
    Skip,
}

#[derive(Debug, Serialize)]
struct PlanRow {
    #[serde(flatten)]
    planned: PlannedStep,
    status: PlanStatus,
}

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &Config) -> PlinthResult<()> {
    let pipeline = load_pipeline(&args.input, config, None).await?;
    let cache = open_cache(config, false).await?;

    let rows = classify(&cache, pipeline.plan()).await;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => print_plan_table(&rows),
    }

    Ok(())
}

async fn classify(cache: &LayerCache, plan: Vec<PlannedStep>) -> Vec<PlanRow> {
    let mut rows = Vec::with_capacity(plan.len());
    for planned in plan {
        let status = match planned.fingerprint {
            None => PlanStatus::Skip,
            Some(fp) => match cache.get(&fp).await.map(|e| e.status()) {
                Some(EntryStatus::Success) => PlanStatus::Hit,
                Some(EntryStatus::Failure) => PlanStatus::Failed,
                None => PlanStatus::Miss,
            },
        };
        rows.push(PlanRow { planned, status });
    }
    rows
}

fn print_plan_table(rows: &[PlanRow]) {
    println!("{:<14} {:<14} {:<8}", "STEP", "FINGERPRINT", "STATUS");
    println!("{}", "-".repeat(38));

    for row in rows {
        let fingerprint = row
            .planned
            .fingerprint
            .map(|f| f.short())
            .unwrap_or_else(|| "-".to_string());
        let status = match row.status {
            PlanStatus::Hit => style("hit").green().to_string(),
            PlanStatus::Failed => style("failed").red().to_string(),
            PlanStatus::Miss => style("miss").yellow().to_string(),
            PlanStatus::Skip => style("skip").dim().to_string(),
        };
        println!("{:<14} {:<14} {}", row.planned.step, fingerprint, status);
    }

    let to_run = rows.iter().filter(|r| r.status == PlanStatus::Miss).count();
    println!();
    println!("{} of {} step(s) would execute", to_run, rows.len());
}
