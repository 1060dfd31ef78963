//! Seedbed: build a bounded local mirror of a remote batch catalog.

use clap::{Parser, Subcommand};
use seedbed_config::Config;
use seedbed_import::{Pipeline, SeedState};
use seedbed_import::error::Result;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON). Environment variables
    /// prefixed with `SEEDBED_` override it.
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Empty the artifact directory, download artifacts within budget, then
    /// reconcile the catalog.
    Import {
        /// Import on top of the artifacts already on disk.
        #[arg(long)]
        keep_existing: bool,
    },
    /// Reconcile the catalog against the artifacts already on disk.
    Reconcile {
        /// Report what would be deleted without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every downloaded artifact.
    Clean,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Exit,
}

/// Cancel `token` on the first interrupt; ask for an exit on any later one.
fn interrupt(token: &CancellationToken) -> Interrupt {
    if token.is_cancelled() {
        return Interrupt::Exit;
    }
    token.cancel();
    Interrupt::Cancel
}

fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match interrupt(&token) {
                Interrupt::Cancel => {
                    tracing::warn!("interrupt received; stopping after the current download (Ctrl-C again to exit)");
                },
                Interrupt::Exit => {
                    tracing::error!("second interrupt received; exiting");
                    std::process::exit(130);
                },
            }
        }
    });
}

async fn execute(command: Command, config: &Config) -> Result<()> {
    let (state, marker) = SeedState::new();
    let pipeline = Pipeline::from_config(config).await?.with_marker(marker);
    let pipeline = match command {
        Command::Import { keep_existing } => pipeline.keep_existing(keep_existing || config.import.keep_existing),
        Command::Reconcile { dry_run } => pipeline.dry_run(dry_run),
        Command::Clean => pipeline,
    };
    let result = match command {
        Command::Import { .. } => {
            let cancel = CancellationToken::new();
            cancel_on_interrupt(cancel.clone());
            pipeline.run(cancel).await.map(|report| {
                let tally = report.import.tally;
                tracing::info!(
                    stopped = %report.import.stopped,
                    downloaded = tally.downloaded,
                    failed = tally.failed,
                    bytes = tally.bytes,
                    removed = %report.reconcile.map(|r| r.total()).unwrap_or_default(),
                    readiness = %state.readiness(),
                    "seed import finished",
                );
            })
        },
        Command::Reconcile { dry_run } => pipeline
            .reconcile_only()
            .await
            .map(|report| tracing::info!(dry_run, removed = %report.total(), "reconciliation finished")),
        Command::Clean => pipeline.clean().await,
    };
    pipeline.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = ?e, "invalid configuration");
            return ExitCode::FAILURE;
        },
    };

    match execute(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "seedbed failed");
            ExitCode::FAILURE
        },
    }
}
