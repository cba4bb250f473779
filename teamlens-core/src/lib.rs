//! # teamlens-core
//!
//! Core library for teamlens - a reconstruction engine for multi-agent
//! Claude Code team sessions.
//!
//! This library provides:
//! - Discovery of team sessions under `~/.claude/projects`
//! - Per-file transcript ingestion into normalized events
//! - Correlation of spawns, teammate messages and tasks across agents
//! - A session-keyed parse cache and the query service built on it
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows strictly forward:
//! - **Discovery:** bounded reads pick out team sessions and their metadata
//! - **Ingestion:** every transcript line becomes an [`Event`] owned by one agent
//! - **Correlation:** events are merged by timestamp and agents, communications
//!   and tasks are inferred from them
//! - **Query:** [`TeamService`] pages and slices the cached result
//!
//! ## Example
//!
//! ```rust,no_run
//! use teamlens_core::{Config, TeamService};
//!
//! # async fn run() -> teamlens_core::Result<()> {
//! let service = TeamService::from_config(Config::load()?);
//!
//! for session in service.discover().await {
//!     let detail = service.session_detail(&session.id).await?;
//!     println!("{} agents in {}", detail.agents.len(), session.project_name);
//! }
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use cache::{CachePolicy, SessionCache};
pub use config::Config;
pub use error::{Error, Result};
pub use service::{DiscoverySummary, SessionDetail, TeamService, TeammateDetail, TimelinePage};
pub use types::*;

// Public modules
pub mod cache;
pub mod config;
pub mod correlate;
pub mod discovery;
pub mod error;
pub mod format;
pub mod ingest;
pub mod logging;
pub mod service;
pub mod stats;
pub mod types;
