//! Assayer CLI and REST API entry point.
//!
//! Binary name: `assay`
//!
//! Parses CLI arguments, loads configuration, opens the database and the
//! orchestrator, then dispatches to the command handler or starts the
//! scheduler and REST API server.

mod cli;
mod http;
mod state;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;
use tracing::Instrument;

use assayer_infra::config::{load_config, resolve_data_dir};
use assayer_observe::attrs::{SPAN_COMMAND, SPAN_SERVE};
use assayer_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
use assayer_types::config::LogFormat;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "assay", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let config = load_config(&data_dir).await;

    init_tracing(&TracingOptions {
        json: config.log_format == LogFormat::Json,
        otel: config.otel,
        default_filter: TracingOptions::filter_for_verbosity(cli.verbose).to_string(),
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init(data_dir.clone(), config)
        .await
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;

    let result = run(cli, &state).await;
    state.orchestrator.flush_notifications().await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli, state: &AppState) -> anyhow::Result<()> {
    match cli.command {
        Commands::Job { action } => {
            cli::job::handle_job_command(action, state, cli.json)
                .instrument(tracing::info_span!(SPAN_COMMAND, command = "job"))
                .await
        }

        Commands::Exec { action } => {
            cli::exec::handle_exec_command(action, state, cli.json)
                .instrument(tracing::info_span!(SPAN_COMMAND, command = "exec"))
                .await
        }

        Commands::Plan { action } => {
            cli::plan::handle_plan_command(action, state, cli.json)
                .instrument(tracing::info_span!(SPAN_COMMAND, command = "plan"))
                .await
        }

        Commands::Serve {
            port,
            host,
            no_scheduler,
            cors_origins,
            rotate_key,
        } => serve(state, &host, port, no_scheduler, &cors_origins, rotate_key)
            .instrument(tracing::info_span!(SPAN_SERVE, %host, port))
            .await,

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

/// Run the trigger scheduler and the REST API until Ctrl+C or SIGTERM, then
/// shut the orchestrator down.
async fn serve(
    state: &AppState,
    host: &str,
    port: u16,
    no_scheduler: bool,
    cors_origins: &[String],
    rotate_key: bool,
) -> anyhow::Result<()> {
    let allowed_origins = http::router::parse_origins(cors_origins).map_err(anyhow::Error::msg)?;
    let new_key = if rotate_key {
        Some(state.api_keys.rotate().await.context("failed to rotate API key")?)
    } else {
        state
            .api_keys
            .ensure_key()
            .await
            .context("failed to prepare API key")?
    };

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    if !no_scheduler {
        state.orchestrator.start_scheduler().await;
    }

    println!(
        "  {} Assayer API listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!(
        "  {} data in {}",
        console::style("•").dim(),
        state.data_dir.display()
    );
    println!(
        "  {} scheduler {}",
        console::style("•").dim(),
        if no_scheduler { "disabled" } else { "running" }
    );
    match &new_key {
        Some(key) => {
            println!(
                "  {} API key (shown once): {}",
                console::style("•").dim(),
                console::style(key).yellow().bold()
            );
        }
        None => println!(
            "  {} API key required (rotate with --rotate-key)",
            console::style("•").dim()
        ),
    }
    if !allowed_origins.is_empty() {
        println!(
            "  {} CORS origins: {}",
            console::style("•").dim(),
            cors_origins.join(", ")
        );
    }
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state.clone(), allowed_origins);
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    state.orchestrator.shutdown().await;
    println!("\n  Server stopped.");
    served?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
