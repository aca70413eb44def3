//! CLI job management subcommands.
//!
//! Provides create, list, show, update, delete, trigger and cancel for test
//! jobs. Triggered executions run inside this process, so `trigger` waits
//! for them and cancels them on Ctrl+C.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color};
use console::style;
use tracing::Instrument;

use assayer_infra::files::{load_job_spec, load_plan};
use assayer_observe::attrs::SPAN_BATCHED_TRIGGER;
use assayer_types::execution::{Execution, ExecutionStatus, TriggeredBy};
use assayer_types::job::{Job, JobUpdate, TriggerSpec};

use crate::cli::format::{
    describe_trigger, format_time, new_table, print_execution, status_cell, styled_status,
};
use crate::state::AppState;

/// Job management subcommands.
#[derive(Subcommand)]
pub enum JobCommand {
    /// Create a job from a TOML or JSON job file.
    Create {
        /// Path to the job file.
        file: PathBuf,
    },

    /// List jobs.
    #[command(alias = "ls")]
    List,

    /// Show a job, its current and last execution and next scheduled run.
    Show {
        /// Job name or ID.
        job: String,
    },

    /// Update fields of an existing job.
    Update {
        /// Job name or ID.
        job: String,

        /// Replace the execution plan with the plan in this file.
        #[arg(long)]
        plan: Option<PathBuf>,

        /// New cron expression (switches the trigger to cron).
        #[arg(long, conflicts_with_all = ["interval", "manual"])]
        cron: Option<String>,

        /// New interval in seconds (switches the trigger to interval).
        #[arg(long, conflicts_with = "manual")]
        interval: Option<u64>,

        /// Only run the job when explicitly triggered.
        #[arg(long)]
        manual: bool,

        #[arg(long)]
        timeout_secs: Option<u64>,

        #[arg(long)]
        max_retries: Option<u32>,

        /// Enable or disable the job.
        #[arg(long)]
        enabled: Option<bool>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a job, cancelling its running execution.
    #[command(alias = "rm")]
    Delete {
        /// Job name or ID.
        job: String,
    },

    /// Run one job, or several jobs in dependency order, and wait.
    Trigger {
        /// Job names or IDs.
        #[arg(required = true)]
        jobs: Vec<String>,
    },

    /// Cancel a job's running execution.
    Cancel {
        /// Job name or ID.
        job: String,
    },
}

/// Handle a job subcommand.
pub async fn handle_job_command(cmd: JobCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        JobCommand::Create { file } => handle_create(&file, state, json).await,
        JobCommand::List => handle_list(state, json),
        JobCommand::Show { job } => handle_show(&job, state, json),
        JobCommand::Update {
            job,
            plan,
            cron,
            interval,
            manual,
            timeout_secs,
            max_retries,
            enabled,
            description,
        } => {
            let trigger = match (cron, interval, manual) {
                (Some(expression), _, _) => Some(TriggerSpec::Cron { expression }),
                (None, Some(seconds), _) => Some(TriggerSpec::Interval { seconds }),
                (None, None, true) => Some(TriggerSpec::Manual),
                (None, None, false) => None,
            };
            let plan = match plan {
                Some(path) => Some(
                    load_plan(&path)
                        .await
                        .with_context(|| format!("Failed to load plan {}", path.display()))?,
                ),
                None => None,
            };
            let update = JobUpdate {
                description,
                trigger,
                timeout_secs,
                max_retries,
                enabled,
                plan,
                ..Default::default()
            };
            handle_update(&job, update, state, json).await
        }
        JobCommand::Delete { job } => handle_delete(&job, state, json).await,
        JobCommand::Trigger { jobs } => handle_trigger(&jobs, state, json).await,
        JobCommand::Cancel { job } => handle_cancel(&job, state, json),
    }
}

// ---------------------------------------------------------------------------
// Create / update / delete
// ---------------------------------------------------------------------------

async fn handle_create(file: &PathBuf, state: &AppState, json: bool) -> Result<()> {
    let spec = load_job_spec(file)
        .await
        .with_context(|| format!("Failed to load job file {}", file.display()))?;
    let job = state.orchestrator.create_job(spec).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Created job '{}'",
        style("✓").green().bold(),
        style(&job.name).cyan()
    );
    print_job_summary(&job);
    println!();
    println!(
        "  Run it now: {}",
        style(format!("assay job trigger {}", job.name)).dim()
    );
    println!();
    Ok(())
}

async fn handle_update(target: &str, update: JobUpdate, state: &AppState, json: bool) -> Result<()> {
    let job = state.orchestrator.resolve_job(target)?;
    let job = state.orchestrator.update_job(job.id, update).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Updated job '{}'",
        style("✓").green().bold(),
        style(&job.name).cyan()
    );
    print_job_summary(&job);
    println!();
    Ok(())
}

async fn handle_delete(target: &str, state: &AppState, json: bool) -> Result<()> {
    let job = state.orchestrator.resolve_job(target)?;
    let job = state.orchestrator.delete_job(job.id).await?;

    if json {
        let out = serde_json::json!({ "id": job.id, "name": job.name, "deleted": true });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Deleted job '{}'",
            style("✓").green().bold(),
            style(&job.name).cyan()
        );
        println!();
    }
    Ok(())
}

fn print_job_summary(job: &Job) {
    println!("  {}  {}", style("ID:").bold(), style(job.id).dim());
    println!("  {}  {}", style("Trigger:").bold(), describe_trigger(&job.trigger));
    println!("  {}  {}", style("Strategy:").bold(), job.plan.strategy);
    println!(
        "  {}  {}s, {} retries",
        style("Limits:").bold(),
        job.timeout_secs,
        job.max_retries
    );
    if !job.dependencies.is_empty() {
        println!("  {}  {}", style("Depends on:").bold(), job.dependencies.join(", "));
    }
    if !job.enabled {
        println!("  {}  {}", style("Enabled:").bold(), style("no").yellow());
    }
}

// ---------------------------------------------------------------------------
// List / show
// ---------------------------------------------------------------------------

fn handle_list(state: &AppState, json: bool) -> Result<()> {
    let jobs = state.orchestrator.list_jobs();

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!();
        println!("  No jobs defined.");
        println!(
            "  Create one with: {}",
            style("assay job create <job.toml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = new_table(vec!["Name", "Trigger", "Strategy", "Priority", "Last run", "Enabled"]);
    for job in &jobs {
        let status = state.orchestrator.get_job_status(job.id)?;
        let last = match (&status.current_status, &status.last_execution) {
            (Some(current), _) => status_cell(*current),
            (None, Some(last)) => status_cell(last.status),
            (None, None) => Cell::new("never").fg(Color::DarkGrey),
        };
        let enabled = if job.enabled {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Yellow)
        };
        table.add_row(vec![
            Cell::new(&job.name),
            Cell::new(describe_trigger(&job.trigger)),
            Cell::new(job.plan.strategy.to_string()),
            Cell::new(job.priority.to_string()),
            last,
            enabled,
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn handle_show(target: &str, state: &AppState, json: bool) -> Result<()> {
    let job = state.orchestrator.resolve_job(target)?;
    let status = state.orchestrator.get_job_status(job.id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {}", style(&status.job.name).cyan().bold());
    if let Some(description) = &status.job.description {
        println!("  {}", style(description).dim());
    }
    print_job_summary(&status.job);
    if let (Some(id), Some(current)) = (status.current_execution, status.current_status) {
        println!("  {}  {} ({})", style("Running:").bold(), id, styled_status(current));
    }
    if let Some(next) = &status.next_run_at {
        println!("  {}  {}", style("Next run:").bold(), format_time(next));
    }
    match &status.last_execution {
        Some(last) => print_execution(last),
        None => {
            println!();
            println!("  No executions yet.");
            println!();
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Trigger / cancel
// ---------------------------------------------------------------------------

async fn handle_trigger(targets: &[String], state: &AppState, json: bool) -> Result<()> {
    let jobs = targets
        .iter()
        .map(|t| state.orchestrator.resolve_job(t))
        .collect::<Result<Vec<_>, _>>()?;

    let orchestrator = state.orchestrator.clone();
    let run = async move {
        if jobs.len() == 1 {
            let execution = orchestrator.run_job(jobs[0].id, TriggeredBy::Manual).await?;
            Ok::<_, anyhow::Error>(vec![(jobs[0].name.clone(), execution)])
        } else {
            let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
            let span = tracing::info_span!(SPAN_BATCHED_TRIGGER, jobs = ids.len());
            let runs = orchestrator
                .trigger_jobs_batched(&ids, TriggeredBy::Manual)
                .instrument(span)
                .await?;
            Ok(runs.into_iter().map(|r| (r.job_name, r.execution)).collect())
        }
    };

    let outcomes = tokio::select! {
        outcome = run => outcome?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("  Cancelling...");
            state.orchestrator.shutdown().await;
            bail!("interrupted");
        }
    };

    if json {
        let out: Vec<_> = outcomes
            .iter()
            .map(|(name, execution)| serde_json::json!({ "job": name, "execution": execution }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for (name, execution) in &outcomes {
            match execution {
                Some(execution) => print_execution(execution),
                None => {
                    println!();
                    println!(
                        "  {} '{}' was not started (disabled or already running)",
                        style("!").yellow().bold(),
                        style(name).cyan()
                    );
                }
            }
        }
    }

    let failed: Vec<&Execution> = outcomes
        .iter()
        .filter_map(|(_, e)| e.as_ref())
        .filter(|e| e.status != ExecutionStatus::Completed)
        .collect();
    if let Some(first) = failed.first() {
        bail!(
            "{} execution(s) did not complete; '{}' ended {}",
            failed.len(),
            first.job_name,
            first.status
        );
    }
    Ok(())
}

fn handle_cancel(target: &str, state: &AppState, json: bool) -> Result<()> {
    let job = state.orchestrator.resolve_job(target)?;
    let cancelled = state.orchestrator.cancel_job(job.id)?;

    if json {
        let out = serde_json::json!({ "job": job.name, "execution_id": cancelled });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    match cancelled {
        Some(id) => println!(
            "  {} Cancellation requested for execution {}",
            style("✓").green().bold(),
            style(id).dim()
        ),
        None => println!("  '{}' has no running execution.", style(&job.name).cyan()),
    }
    println!();
    Ok(())
}
