//! teamlens-inspect - dump reconstructed team sessions as JSON
//!
//! Runs the same pipeline as the server once and prints the result, which is
//! handy for scripting and for checking what the dashboard will show.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use teamlens_core::{Config, TeamService};

#[derive(Parser)]
#[command(name = "teamlens-inspect")]
#[command(about = "Print reconstructed team sessions as JSON")]
#[command(version)]
struct Args {
    /// Claude data root holding `projects/` (overrides sources.claude_dir)
    #[arg(long, global = true)]
    claude_dir: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List discovered team sessions, most recent first
    Sessions,
    /// Session and agent totals
    Summary,
    /// Session metadata, agents and stats
    Session { id: String },
    /// One page of the merged event timeline
    Timeline {
        id: String,
        /// 0-based page number
        #[arg(long, default_value = "0")]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Reconstructed inter-agent messages
    Communications { id: String },
    /// Reconstructed task lifecycles
    Tasks { id: String },
    /// One agent and its first events
    Teammate { id: String, agent: String },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    if let Some(dir) = args.claude_dir {
        config.sources.claude_dir = Some(dir);
    }
    // stdout carries the JSON; keep the console quiet
    config.logging.stderr = false;

    let _log_guard =
        teamlens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let service = TeamService::from_config(config);
    tracing::debug!(projects_dir = %service.projects_dir().display(), "teamlens-inspect starting");

    match args.command {
        Command::Sessions => print_json(&service.discover().await),
        Command::Summary => print_json(&service.summary().await),
        Command::Session { id } => print_json(&service.session_detail(&id).await?),
        Command::Timeline {
            id,
            page,
            page_size,
        } => print_json(&service.timeline(&id, Some(page), page_size).await?),
        Command::Communications { id } => print_json(&service.communications(&id).await?),
        Command::Tasks { id } => print_json(&service.tasks(&id).await?),
        Command::Teammate { id, agent } => print_json(&service.teammate(&id, &agent).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}
