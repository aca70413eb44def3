//! CLI execution inspection subcommands.

use anyhow::{Result, anyhow};
use clap::Subcommand;
use comfy_table::Cell;
use uuid::Uuid;

use assayer_types::execution::{ExecutionFilter, ExecutionStatus, TriggeredBy};

use crate::cli::format::{format_duration_ms, format_time, new_table, print_execution, status_cell, styled_risk};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ExecCommand {
    /// List executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Only executions of this job (name or ID).
        #[arg(long)]
        job: Option<String>,

        /// Only executions in this status.
        #[arg(long)]
        status: Option<ExecutionStatus>,

        /// Only executions started by this origin (manual, scheduler, api, dependency).
        #[arg(long)]
        triggered_by: Option<TriggeredBy>,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show one execution with its logs and result.
    Show {
        /// Execution UUID.
        id: String,
    },
}

pub async fn handle_exec_command(cmd: ExecCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        ExecCommand::List {
            job,
            status,
            triggered_by,
            limit,
        } => {
            let job_id = match job {
                Some(target) => Some(state.orchestrator.resolve_job(&target)?.id),
                None => None,
            };
            let filter = ExecutionFilter {
                job_id,
                status,
                triggered_by,
                limit: Some(limit),
            };
            handle_list(&filter, state, json)
        }
        ExecCommand::Show { id } => handle_show(&id, state, json),
    }
}

fn handle_list(filter: &ExecutionFilter, state: &AppState, json: bool) -> Result<()> {
    let executions = state.orchestrator.list_executions(filter);

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions found.");
        println!();
        return Ok(());
    }

    let mut table = new_table(vec![
        "ID", "Job", "Status", "Trigger", "Created", "Attempts", "Duration", "Score", "Risk",
    ]);
    for execution in &executions {
        let (score, risk) = match &execution.result {
            Some(result) => (
                format!("{:.3}", result.overall_score),
                styled_risk(result.risk_level),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        table.add_row(vec![
            Cell::new(execution.id),
            Cell::new(&execution.job_name),
            status_cell(execution.status),
            Cell::new(execution.triggered_by),
            Cell::new(format_time(&execution.created_at)),
            Cell::new(execution.attempts),
            Cell::new(
                execution
                    .duration_ms
                    .map(format_duration_ms)
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(score),
            Cell::new(risk),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn handle_show(id: &str, state: &AppState, json: bool) -> Result<()> {
    let id: Uuid = id
        .parse()
        .map_err(|_| anyhow!("Invalid execution ID: {id}"))?;
    let execution = state.orchestrator.get_execution_status(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        print_execution(&execution);
    }
    Ok(())
}
