//! Surge API - Main Entry Point
//!
//! Serves the HTTP API and runs the database-backed scheduler. The `fetch`
//! and `init-scheduler` subcommands perform one-off maintenance runs.

use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use surge_api::config::AppConfig;
use surge_api::logging::init_tracing;
use surge_api::scheduler::{default_beat_schedule, init_scheduler};
use surge_api::server;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "surge-api")]
#[command(about = "Surge API - IFRC surge alert sync and scheduler")]
#[command(version)]
struct Args {
    /// Log level, overrides the configured one.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server and scheduler (default).
    Serve {
        /// Host to bind to.
        #[arg(long, env = "SURGE_API_HOST")]
        host: Option<String>,

        /// Port to listen on.
        #[arg(short, long, env = "SURGE_API_PORT")]
        port: Option<u16>,

        /// Serve the API without the periodic scheduler.
        #[arg(long)]
        no_scheduler: bool,
    },
    /// Pull every surge alert page once and print the counts.
    Fetch,
    /// Seed the schedule table with the built-in defaults.
    InitScheduler,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load()?;
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level, config.logging.json);

    match args.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
        no_scheduler: false,
    }) {
        Command::Serve {
            host,
            port,
            no_scheduler,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if no_scheduler {
                config.scheduler.enabled = false;
            }
            server::serve(config).await
        }
        Command::Fetch => {
            let state = server::build_state(config).await?;
            let summary = state.sync.run().await?;
            println!("Created: {}, Updated: {}", summary.created, summary.updated);
            Ok(())
        }
        Command::InitScheduler => {
            let state = server::build_state(config).await?;
            let report = init_scheduler(&state.db, &default_beat_schedule()).await?;
            for name in &report.created {
                println!("Created schedule: {name}");
            }
            for name in &report.skipped {
                println!("Schedule already exists: {name}");
            }
            Ok(())
        }
    }
}
