//! Transcript ingestion
//!
//! Parses Claude Code JSONL transcripts into [`Event`]s, one file at a time.
//! Each line is an independent JSON record; this stage does no cross-agent
//! reasoning and preserves file order.
//!
//! # Error Handling
//!
//! Ingestion never fails on transcript content:
//!
//! - **Malformed JSON lines**: skipped, counted in [`IngestReport::skipped`],
//!   and described in [`IngestReport::warnings`].
//! - **Bookkeeping records** (`file-history-snapshot`): dropped entirely.
//! - **Non-conversational records** (`summary`, `system`, ...): not events.
//! - **Missing timestamps**: the last timestamp seen in the file is reused.
//! - **Unreadable files**: produce no events and a single warning.
//!
//! # Truncation
//!
//! Event text is cut to [`MAX_TEXT_CHARS`] and tool-result content to
//! [`MAX_TOOL_RESULT_CHARS`]. The dashboard only ever displays these
//! prefixes, and downstream code relies on the bounds.

use crate::format::truncate_chars;
use crate::types::{Event, EventKind, SessionInfo, ToolResult, ToolUse, LEAD_AGENT_ID};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Maximum characters kept from a message's text blocks.
pub const MAX_TEXT_CHARS: usize = 2000;

/// Maximum characters kept from a tool result.
pub const MAX_TOOL_RESULT_CHARS: usize = 500;

/// Record type for internal file snapshots; never an event.
const SNAPSHOT_RECORD_TYPE: &str = "file-history-snapshot";

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// A single line from a Claude Code transcript.
///
/// Uses `#[serde(default)]` liberally to handle missing fields gracefully.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct RawRecord {
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub timestamp: Option<String>,
    pub is_sidechain: Option<bool>,
    pub agent_id: Option<String>,
    pub message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct RawMessage {
    pub role: Option<String>,
    pub model: Option<String>,
    pub content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawContent {
    Text(String),
    Blocks(Vec<serde_json::Value>),
}

/// Typed content block. Blocks are decoded one by one so a single odd block
/// cannot invalidate the whole record.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    // thinking, image, and anything newer
    #[serde(other)]
    Unknown,
}

/// Whose transcript is being parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOwner {
    /// The lead transcript; every event is owned by [`LEAD_AGENT_ID`]
    Lead,
    /// A sub-agent transcript; the id comes from the filename and is
    /// overridden by a record's own `agentId`
    Subagent(String),
}

impl TranscriptOwner {
    fn agent_for(&self, record: &RawRecord) -> String {
        match self {
            TranscriptOwner::Lead => LEAD_AGENT_ID.to_string(),
            TranscriptOwner::Subagent(file_id) => record
                .agent_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| file_id.clone()),
        }
    }

    /// Agent id implied by the file alone.
    pub fn file_agent_id(&self) -> &str {
        match self {
            TranscriptOwner::Lead => LEAD_AGENT_ID,
            TranscriptOwner::Subagent(id) => id,
        }
    }
}

/// Data-quality summary for one parsed file.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    pub path: Option<PathBuf>,
    /// Non-empty lines seen
    pub lines: usize,
    /// Events produced
    pub events: usize,
    /// Lines that were not valid JSON records
    pub skipped: usize,
    /// Warnings encountered during parsing (non-fatal)
    pub warnings: Vec<String>,
}

/// Events from one transcript file.
#[derive(Debug, Clone)]
pub struct AgentTranscript {
    pub owner: TranscriptOwner,
    pub events: Vec<Event>,
    pub report: IngestReport,
}

/// Extract the agent id from an `agent-<id>.jsonl` filename.
pub fn agent_id_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix("agent-")
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Parse transcript text into events, in file order.
pub fn parse_transcript(text: &str, owner: &TranscriptOwner) -> (Vec<Event>, IngestReport) {
    let mut report = IngestReport::default();
    let mut events = Vec::new();
    let mut last_timestamp: Option<String> = None;

    for (idx, line) in text.lines().enumerate() {
        let line_number = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        report.lines += 1;

        let record: RawRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                report.skipped += 1;
                report
                    .warnings
                    .push(format!("Line {}: JSON parse error: {}", line_number, e));
                continue;
            }
        };

        if record.record_type.as_deref() == Some(SNAPSHOT_RECORD_TYPE) {
            continue;
        }

        if let Some(ts) = record.timestamp.as_ref().filter(|ts| !ts.is_empty()) {
            last_timestamp = Some(ts.clone());
        }

        let Some(kind) = record_kind(&record) else {
            continue;
        };

        let Some(timestamp) = record
            .timestamp
            .clone()
            .filter(|ts| !ts.is_empty())
            .or_else(|| last_timestamp.clone())
        else {
            report
                .warnings
                .push(format!("Line {}: no timestamp, skipped", line_number));
            continue;
        };

        events.push(record_to_event(&record, kind, timestamp, owner));
    }

    report.events = events.len();
    (events, report)
}

fn record_kind(record: &RawRecord) -> Option<EventKind> {
    record
        .record_type
        .as_deref()
        .and_then(|t| t.parse().ok())
        .or_else(|| {
            if record.record_type.is_some() {
                return None;
            }
            record
                .message
                .as_ref()
                .and_then(|m| m.role.as_deref())
                .and_then(|r| r.parse().ok())
        })
}

fn record_to_event(
    record: &RawRecord,
    kind: EventKind,
    timestamp: String,
    owner: &TranscriptOwner,
) -> Event {
    let content = record.message.as_ref().and_then(|m| m.content.as_ref());
    let decoded_blocks: Vec<ContentBlock> = match content {
        Some(RawContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|b| serde_json::from_value(b.clone()).ok())
            .collect(),
        _ => Vec::new(),
    };

    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_uses = Vec::new();
    let mut tool_results = Vec::new();

    if let Some(RawContent::Text(text)) = content {
        text_parts.push(text);
    }

    for block in &decoded_blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    text_parts.push(text);
                }
            }
            ContentBlock::ToolUse { id, name, input } => tool_uses.push(ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => tool_results.push(ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: truncate_chars(&tool_result_text(content), MAX_TOOL_RESULT_CHARS),
                is_error: *is_error,
            }),
            ContentBlock::Unknown => {}
        }
    }

    Event {
        agent_id: owner.agent_for(record),
        kind,
        timestamp,
        text: truncate_chars(&text_parts.join("\n"), MAX_TEXT_CHARS),
        tool_uses,
        tool_results,
        model: record.message.as_ref().and_then(|m| m.model.clone()),
        is_sidechain: record.is_sidechain,
    }
}

/// Flatten tool-result content (string, or a list of text blocks).
fn tool_result_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.as_str()),
                other => other.get("text").and_then(|t| t.as_str()),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Read and parse one transcript file.
///
/// An unreadable file yields no events and one warning.
pub async fn read_transcript(path: &Path, owner: TranscriptOwner) -> AgentTranscript {
    let (events, mut report) = match tokio::fs::read(path).await {
        Ok(bytes) => parse_transcript(&String::from_utf8_lossy(&bytes), &owner),
        Err(e) => {
            let report = IngestReport {
                warnings: vec![format!("failed to read {}: {}", path.display(), e)],
                ..Default::default()
            };
            (Vec::new(), report)
        }
    };
    report.path = Some(path.to_path_buf());

    if report.skipped > 0 || !report.warnings.is_empty() {
        tracing::debug!(
            path = %path.display(),
            skipped = report.skipped,
            warnings = report.warnings.len(),
            "Transcript parsed with warnings"
        );
    }

    AgentTranscript {
        owner,
        events,
        report,
    }
}

/// Parse the lead transcript and every sub-agent transcript of a session.
///
/// Files are read one after another; the lead always comes first.
pub async fn ingest_session(info: &SessionInfo) -> Vec<AgentTranscript> {
    let mut transcripts = Vec::with_capacity(info.subagent_paths.len() + 1);

    if tokio::fs::try_exists(&info.lead_path).await.unwrap_or(false) {
        transcripts.push(read_transcript(&info.lead_path, TranscriptOwner::Lead).await);
    }

    for path in &info.subagent_paths {
        let Some(agent_id) = agent_id_from_path(path) else {
            continue;
        };
        transcripts.push(read_transcript(path, TranscriptOwner::Subagent(agent_id)).await);
    }

    let events: usize = transcripts.iter().map(|t| t.events.len()).sum();
    tracing::debug!(
        session_id = %info.id,
        files = transcripts.len(),
        events,
        "Session transcripts ingested"
    );

    transcripts
}
