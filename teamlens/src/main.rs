//! teamlens - HTTP API for multi-agent team session transcripts
//!
//! Discovers Claude Code team sessions, reconstructs who spawned whom and
//! who said what to whom, and serves the result as read-only JSON.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/teamlens/teamlens.log (~/.local/state/teamlens/teamlens.log)
//! - Config: $XDG_CONFIG_HOME/teamlens/config.toml (~/.config/teamlens/config.toml)

mod server;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teamlens_core::discovery::check_root;
use teamlens_core::{Config, TeamService};

#[derive(Parser)]
#[command(name = "teamlens")]
#[command(about = "Serve multi-agent team sessions over HTTP")]
#[command(version)]
struct Args {
    /// Address to listen on (overrides server.bind)
    #[arg(long)]
    bind: Option<String>,

    /// Claude data root holding `projects/` (overrides sources.claude_dir)
    #[arg(long)]
    claude_dir: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("failed to load configuration")?;

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(dir) = args.claude_dir {
        config.sources.claude_dir = Some(dir);
    }

    // Initialize logging
    let _log_guard =
        teamlens_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("teamlens starting");

    let projects_dir = config.sources.projects_dir();
    check_root(&projects_dir).context("no Claude transcripts to serve")?;

    let bind = config.server.bind.clone();
    let service = Arc::new(TeamService::from_config(config));

    server::serve(service, &bind).await
}
