//! CLI command definitions and dispatch for the `assay` binary.
//!
//! Uses clap derive macros for argument parsing. The CLI follows a
//! noun-verb pattern (e.g., `assay job create`, `assay plan run`).

pub mod exec;
pub mod format;
pub mod job;
pub mod plan;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Orchestrate functional, security and compliance test workloads.
#[derive(Parser)]
#[command(name = "assay", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding `config.toml` and the database.
    #[arg(long, global = true, env = "ASSAYER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage test jobs (create, list, show, update, delete, trigger, cancel).
    Job {
        #[command(subcommand)]
        action: job::JobCommand,
    },

    /// Inspect executions.
    #[command(alias = "execution")]
    Exec {
        #[command(subcommand)]
        action: exec::ExecCommand,
    },

    /// Inspect or run an execution plan file without creating a job.
    Plan {
        #[command(subcommand)]
        action: plan::PlanCommand,
    },

    /// Run the trigger scheduler and the REST API until Ctrl+C.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8470")]
        port: u16,

        /// Host address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Serve the API without firing scheduled jobs.
        #[arg(long)]
        no_scheduler: bool,

        /// Browser origin allowed to call the API (repeatable).
        #[arg(long = "cors-origin", value_name = "ORIGIN")]
        cors_origins: Vec<String>,

        /// Revoke the current API key and print a new one.
        #[arg(long)]
        rotate_key: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_job_trigger_with_global_flags() {
        let cli = Cli::try_parse_from(["assay", "job", "trigger", "nightly", "smoke", "--json", "-vv"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Job {
                action: job::JobCommand::Trigger { jobs },
            } => assert_eq!(jobs, vec!["nightly", "smoke"]),
            _ => panic!("expected job trigger"),
        }
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["assay", "serve"]).unwrap();
        match cli.command {
            Commands::Serve {
                port,
                host,
                no_scheduler,
                cors_origins,
                rotate_key,
            } => {
                assert_eq!(port, 8470);
                assert_eq!(host, "127.0.0.1");
                assert!(!no_scheduler);
                assert!(cors_origins.is_empty());
                assert!(!rotate_key);
            }
            _ => panic!("expected serve"),
        }
    }
}
