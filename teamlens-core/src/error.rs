//! Error types for teamlens-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the teamlens-core library
///
/// Data-quality problems in transcripts never surface here; they are
/// skipped where they occur. These variants cover lookups that miss and
/// conditions the caller must act on.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The configured projects directory does not exist
    #[error("projects directory not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Agent not found within a session
    #[error("agent {agent_id} not found in session {session_id}")]
    AgentNotFound {
        session_id: String,
        agent_id: String,
    },
}

impl Error {
    /// Whether this error means the caller asked for something that is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::SessionNotFound(_) | Error::AgentNotFound { .. })
    }
}

/// Result type alias for teamlens-core
pub type Result<T> = std::result::Result<T, Error>;
