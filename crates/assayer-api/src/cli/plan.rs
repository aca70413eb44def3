//! CLI plan subcommands: show dependency batches or run a plan file once.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use assayer_infra::files::load_plan;
use assayer_observe::attrs::SPAN_PLAN_RUN;

use crate::cli::format::{new_table, print_result};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum PlanCommand {
    /// Print the dependency batches of a plan file.
    Batches {
        /// Path to a TOML or JSON plan file.
        file: PathBuf,
    },

    /// Run a plan file once and print the consolidated result.
    Run {
        /// Path to a TOML or JSON plan file.
        file: PathBuf,
    },
}

pub async fn handle_plan_command(cmd: PlanCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        PlanCommand::Batches { file } => handle_batches(&file, state, json).await,
        PlanCommand::Run { file } => handle_run(&file, state, json).await,
    }
}

async fn handle_batches(file: &PathBuf, state: &AppState, json: bool) -> Result<()> {
    let plan = load_plan(file)
        .await
        .with_context(|| format!("Failed to load plan {}", file.display()))?;
    let batches = state.orchestrator.plan_batches(&plan)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&batches)?);
        return Ok(());
    }

    let mut table = new_table(vec!["Batch", "Workloads"]);
    for batch in &batches.batches {
        let label = if batch.forced {
            Cell::new(format!("{} (forced)", batch.index)).fg(Color::Yellow)
        } else {
            Cell::new(batch.index)
        };
        table.add_row(vec![label, Cell::new(batch.workloads.join(", "))]);
    }

    println!();
    println!("  {} {}", style("Strategy:").bold(), plan.strategy);
    println!("{table}");
    if let Some(problem) = &batches.forced {
        println!(
            "  {} {}",
            style("!").yellow().bold(),
            style(problem).yellow()
        );
    }
    println!();
    Ok(())
}

async fn handle_run(file: &PathBuf, state: &AppState, json: bool) -> Result<()> {
    let plan = load_plan(file)
        .await
        .with_context(|| format!("Failed to load plan {}", file.display()))?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let span = tracing::info_span!(SPAN_PLAN_RUN, file = %file.display(), strategy = %plan.strategy);
    let report = state
        .orchestrator
        .run_plan(&plan, cancel)
        .instrument(span)
        .await;
    ctrl_c.abort();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!(
            "  {} {} ({} batches)",
            style("Plan run").bold(),
            style(report.run_id).dim(),
            report.batches.batches.len()
        );
        println!();
        print_result(&report.result);
        println!();
    }

    if report.cancelled {
        bail!("plan run cancelled");
    }
    if !report.succeeded {
        bail!("plan run failed with risk {}", report.result.risk_level);
    }
    Ok(())
}
