//! Core domain types for teamlens
//!
//! These types describe a reconstructed multi-agent team session.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One team collaboration: a lead transcript plus its sub-agent transcripts |
//! | **Lead** | The orchestrating agent; owns the top-level transcript |
//! | **Teammate** | A sub-agent with its own `agent-<id>.jsonl` transcript |
//! | **Event** | One conversational line of a transcript (`user` or `assistant`) |
//! | **Spawn** | A tool call by which one agent starts another |
//! | **Communication** | A directed message between agents, reconstructed after the fact |
//! | **Task** | A tracked unit of work built from `TaskCreate`/`TaskUpdate` calls |
//!
//! Everything except [`SessionInfo`] is derived per parse and lives only as long
//! as the cached [`CorrelatedSession`] that holds it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Agent id used for every event of the lead transcript.
pub const LEAD_AGENT_ID: &str = "lead";

/// Name other agents use for the lead in teammate tags and `SendMessage` calls.
pub const LEAD_DISPLAY_NAME: &str = "team-lead";

// ============================================
// Session
// ============================================

/// Cache key for a parsed session (the session directory name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lightweight descriptor produced by discovery.
///
/// Built from bounded reads of each transcript; never holds events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session directory name
    pub id: String,
    /// Raw project directory name (flattened path)
    pub project_dir: String,
    /// Project path decoded from the directory name
    pub project_path: String,
    /// Last component of the decoded project path
    pub project_name: String,
    pub git_branch: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_ms: Option<i64>,
    /// Human-readable duration (e.g. "12m 04s")
    pub duration: Option<String>,
    /// Lead plus sub-agents
    pub agent_count: usize,
    /// Sub-agent id -> resolved teammate name
    pub teammates: BTreeMap<String, String>,
    #[serde(skip)]
    pub lead_path: PathBuf,
    #[serde(skip)]
    pub subagent_paths: Vec<PathBuf>,
}

// ============================================
// Events
// ============================================

/// Conversational record type of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    User,
    Assistant,
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EventKind::User),
            "assistant" => Ok(EventKind::Assistant),
            _ => Err(format!("unknown event kind: {}", s)),
        }
    }
}

/// A tool invocation inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUse {
    pub id: Option<String>,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolUse {
    /// String field of the structured input, if present and non-empty.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// A tool result returned to the model (content truncated at ingestion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_use_id: Option<String>,
    pub content: String,
    pub is_error: bool,
}

/// One parsed transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Owning agent (`lead` for the lead transcript)
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// ISO-8601 timestamp; sorting is lexicographic on this string
    pub timestamp: String,
    pub text: String,
    pub tool_uses: Vec<ToolUse>,
    pub tool_results: Vec<ToolResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_sidechain: Option<bool>,
}

// ============================================
// Agents
// ============================================

/// Which heuristic produced an agent's display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSource {
    /// The lead agent
    Lead,
    /// `name` argument of a matched spawn call
    SpawnCall,
    /// `subject` carried in an inbound teammate tag
    TeammateTag,
    /// Spawner known, name unknown: `"{spawner}/{short-id}"`
    Spawner,
    /// Nothing known: truncated agent id
    AgentId,
}

/// A session participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub name_source: NameSource,
    pub is_lead: bool,
    /// Agent-map key of the spawner (identifier lookup, not ownership)
    pub spawned_by: Option<String>,
    pub spawn_name: Option<String>,
    pub task_subject: Option<String>,
    pub event_count: usize,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    pub tool_counts: BTreeMap<String, usize>,
    /// Outbound messages sent by this agent
    pub message_count: usize,
}

impl Agent {
    /// Empty agent record; counts are filled by [`crate::stats`].
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let is_lead = id == LEAD_AGENT_ID;
        Self {
            display_name: if is_lead {
                LEAD_DISPLAY_NAME.to_string()
            } else {
                crate::format::short_id(&id).to_string()
            },
            name_source: if is_lead {
                NameSource::Lead
            } else {
                NameSource::AgentId
            },
            id,
            is_lead,
            spawned_by: None,
            spawn_name: None,
            task_subject: None,
            event_count: 0,
            first_timestamp: None,
            last_timestamp: None,
            tool_counts: BTreeMap::new(),
            message_count: 0,
        }
    }
}

// ============================================
// Communications
// ============================================

/// Which side of the conversation a communication was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A teammate tag received by the owning agent
    Inbound,
    /// A `SendMessage` call made by the owning agent
    Outbound,
}

/// A directed message between two agents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
    pub timestamp: String,
    pub from: String,
    pub to: String,
    /// Agent-map key for `from`, when it resolves
    pub from_agent: Option<String>,
    /// Agent-map key for `to`, when it resolves
    pub to_agent: Option<String>,
    pub direction: Direction,
    pub message_type: String,
    pub content: serde_json::Value,
    pub summary: Option<String>,
    pub color: Option<String>,
    pub raw: String,
}

// ============================================
// Tasks
// ============================================

/// One `TaskUpdate` applied to a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdateRecord {
    pub timestamp: String,
    pub agent_id: String,
    pub status: Option<String>,
    pub owner: Option<String>,
}

/// A tracked unit of work.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub subject: String,
    pub description: Option<String>,
    pub creator: String,
    pub created_at: String,
    pub updates: Vec<TaskUpdateRecord>,
    pub latest_status: Option<String>,
    pub owner: Option<String>,
    /// Built from an update whose task was never seen being created
    pub synthesized: bool,
}

// ============================================
// Aggregates
// ============================================

/// One entry of a tool usage ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCount {
    pub name: String,
    pub count: usize,
}

/// Session-wide reductions over the merged event stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_events: usize,
    pub user_events: usize,
    pub assistant_events: usize,
    pub tool_calls: usize,
    pub tool_counts: BTreeMap<String, usize>,
    /// Most used tools across the session, highest count first
    pub top_tools: Vec<ToolCount>,
    pub message_count: usize,
    pub task_count: usize,
    pub agent_count: usize,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    pub duration_ms: Option<i64>,
}

/// Fully correlated session, as held by the parse cache.
#[derive(Debug, Clone)]
pub struct CorrelatedSession {
    pub info: SessionInfo,
    /// Merged stream, non-decreasing by timestamp
    pub events: Vec<Event>,
    pub agents: BTreeMap<String, Agent>,
    pub communications: Vec<Communication>,
    pub tasks: Vec<Task>,
    pub stats: SessionStats,
}
