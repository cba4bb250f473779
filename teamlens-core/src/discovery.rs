//! Session discovery
//!
//! Scans `<claude-root>/projects` for team sessions:
//!
//! ```text
//! projects/
//! └── -Users-me-code-app/           # flattened project path
//!     ├── 5f0c...e1.jsonl           # lead transcript
//!     └── 5f0c...e1/
//!         └── subagents/
//!             ├── agent-a4f21c7.jsonl
//!             └── agent-acompact-91b2.jsonl   # auto-compaction, ignored
//! ```
//!
//! A session directory is a candidate when `subagents/` holds at least one
//! non-compaction `agent-*.jsonl`, and is confirmed when the lead transcript
//! mentions a team protocol tool. Metadata comes from the first few lines and
//! the last line of each transcript, never from a full parse.
//!
//! Discovery never fails: unreadable entries are skipped and logged.

use crate::config::CorrelationConfig;
use crate::correlate::{collect_spawn_calls, pair_spawns, AgentStart, SPAWN_TOOLS};
use crate::error::{Error, Result};
use crate::format::{duration_millis, format_duration, timestamp_millis};
use crate::ingest::{agent_id_from_path, parse_transcript, TranscriptOwner};
use crate::types::SessionInfo;
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};

/// Directory of sub-agent transcripts inside a session directory.
pub const SUBAGENTS_DIR: &str = "subagents";

/// Filename infix of auto-compaction agents.
pub const COMPACTION_MARKER: &str = "acompact";

/// Substrings whose presence in the lead transcript marks a team session.
pub const TEAM_MARKERS: &[&str] = &["TeamCreate", "SendMessage"];

/// Lines read from the start of a transcript for metadata.
pub const PREFIX_LINES: usize = 10;

/// Bytes read from the end of a transcript to find its last record.
pub const TAIL_BYTES: u64 = 64 * 1024;

/// Fail if the projects directory does not exist.
///
/// The only fatal discovery condition, checked once at startup.
pub fn check_root(projects_dir: &Path) -> Result<()> {
    if projects_dir.is_dir() {
        Ok(())
    } else {
        Err(Error::RootNotFound(projects_dir.to_path_buf()))
    }
}

/// Invert the flattened project directory name (`-Users-me-app` -> `/Users/me/app`).
///
/// The flattening is lossy for paths that contained `-`; those decode with
/// extra separators.
pub fn decode_project_dir(name: &str) -> String {
    name.replace('-', "/")
}

/// Last path component of a decoded project path.
pub fn project_name(path: &str) -> String {
    path.rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or(path)
        .to_string()
}

/// Whether raw lead transcript text carries a team protocol marker.
///
/// A plain substring check: a transcript that only quotes a marker in prose
/// also passes.
pub fn is_team_transcript(raw: &str) -> bool {
    TEAM_MARKERS.iter().any(|marker| raw.contains(marker))
}

/// Whether a file in `subagents/` is a teammate transcript.
pub fn is_subagent_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with("agent-") && name.ends_with(".jsonl") && !name.contains(COMPACTION_MARKER)
}

/// Discover every team session under `projects_dir`, most recent first.
pub async fn discover_sessions(
    projects_dir: &Path,
    config: &CorrelationConfig,
) -> Vec<SessionInfo> {
    let mut sessions = Vec::new();

    for project in list_dirs(projects_dir).await {
        let Some(project_dir) = dir_name(&project) else {
            continue;
        };
        for session_dir in list_dirs(&project).await {
            match inspect_session(&project_dir, &session_dir, config).await {
                Some(info) => sessions.push(info),
                None => tracing::trace!(path = %session_dir.display(), "Not a team session"),
            }
        }
    }

    sort_sessions(&mut sessions);

    tracing::debug!(
        root = %projects_dir.display(),
        sessions = sessions.len(),
        "Discovery complete"
    );

    sessions
}

/// Most recent first; sessions without a start time last; ties by id.
pub fn sort_sessions(sessions: &mut [SessionInfo]) {
    sessions.sort_by(|a, b| match (&a.start_time, &b.start_time) {
        (Some(x), Some(y)) => y.cmp(x).then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
}

async fn inspect_session(
    project_dir: &str,
    session_dir: &Path,
    config: &CorrelationConfig,
) -> Option<SessionInfo> {
    let id = dir_name(session_dir)?;
    let subagent_paths = list_subagents(&session_dir.join(SUBAGENTS_DIR)).await;
    if subagent_paths.is_empty() {
        return None;
    }

    let lead_path = session_dir.with_file_name(format!("{}.jsonl", id));
    let lead_raw = match tokio::fs::read(&lead_path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::debug!(path = %lead_path.display(), error = %e, "Lead transcript unreadable");
            return None;
        }
    };
    if !is_team_transcript(&lead_raw) {
        return None;
    }

    let mut meta = PrefixMeta::default();
    meta.absorb(lead_raw.lines().take(PREFIX_LINES));
    let mut end_time = last_timestamp(&lead_path).await;

    let mut starts = Vec::with_capacity(subagent_paths.len());
    for path in &subagent_paths {
        let prefix = read_prefix(path, PREFIX_LINES).await;
        let mut agent_meta = PrefixMeta::default();
        agent_meta.absorb(prefix.iter().map(String::as_str));

        if let (Some(agent_id), Some(first)) = (agent_id_from_path(path), &agent_meta.first_timestamp)
        {
            if let Some(first_ms) = timestamp_millis(first) {
                starts.push(AgentStart { agent_id, first_ms });
            }
        }
        meta.merge(agent_meta);
        end_time = max_timestamp(end_time, last_timestamp(path).await);
    }

    let teammates = teammate_names(&lead_raw, &starts, config);
    let project_path = decode_project_dir(project_dir);
    let start_time = meta.first_timestamp;
    let duration_ms = match (&start_time, &end_time) {
        (Some(start), Some(end)) => duration_millis(start, end),
        _ => None,
    };

    Some(SessionInfo {
        id,
        project_dir: project_dir.to_string(),
        project_name: project_name(&project_path),
        project_path,
        git_branch: meta.git_branch,
        start_time,
        end_time,
        duration_ms,
        duration: duration_ms.map(format_duration),
        agent_count: subagent_paths.len() + 1,
        teammates,
        lead_path,
        subagent_paths,
    })
}

/// Resolve teammate names from the lead's named spawn calls.
///
/// Only lines that carry a tool use of a spawn tool are parsed.
fn teammate_names(
    lead_raw: &str,
    starts: &[AgentStart],
    config: &CorrelationConfig,
) -> BTreeMap<String, String> {
    let tool_lines: String = lead_raw
        .lines()
        .filter(|line| line.contains("\"tool_use\"") && mentions_spawn_tool(line))
        .collect::<Vec<_>>()
        .join("\n");
    let (events, _) = parse_transcript(&tool_lines, &TranscriptOwner::Lead);
    let spawns = collect_spawn_calls(&events);

    pair_spawns(&spawns, starts, config)
        .into_iter()
        .map(|m| (m.agent_id, m.name))
        .collect()
}

fn mentions_spawn_tool(line: &str) -> bool {
    SPAWN_TOOLS
        .iter()
        .any(|tool| line.contains(&format!("\"{}\"", tool)))
}

#[derive(Debug, Default)]
struct PrefixMeta {
    first_timestamp: Option<String>,
    git_branch: Option<String>,
}

impl PrefixMeta {
    fn absorb<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            let Ok(record) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };
            if self.first_timestamp.is_none() {
                self.first_timestamp = str_field(&record, "timestamp");
            }
            if self.git_branch.is_none() {
                self.git_branch = str_field(&record, "gitBranch");
            }
        }
    }

    fn merge(&mut self, other: PrefixMeta) {
        self.first_timestamp = match (self.first_timestamp.take(), other.first_timestamp) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if self.git_branch.is_none() {
            self.git_branch = other.git_branch;
        }
    }
}

fn str_field(record: &serde_json::Value, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn max_timestamp(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()?.to_str().map(str::to_string)
}

async fn list_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(path = %dir.display(), error = %e, "Directory unreadable");
            return dirs;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    dirs
}

async fn list_subagents(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return files;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if is_subagent_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    files
}

/// First `n` lines of a file; fewer when the file is short or unreadable.
pub async fn read_prefix(path: &Path, n: usize) -> Vec<String> {
    let mut lines = Vec::with_capacity(n);
    let Ok(file) = tokio::fs::File::open(path).await else {
        return lines;
    };
    let mut reader = BufReader::new(file).lines();
    while lines.len() < n {
        match reader.next_line().await {
            Ok(Some(line)) => lines.push(line),
            _ => break,
        }
    }
    lines
}

/// Complete lines at the end of a file, in file order.
///
/// Reads the last [`TAIL_BYTES`]; when that window holds no complete line
/// (one record longer than the window), it doubles until a line fits or the
/// whole file has been read.
pub async fn read_tail_lines(path: &Path) -> Vec<String> {
    let mut window = TAIL_BYTES;
    loop {
        match tail_bytes(path, window).await {
            Ok((bytes, from_start)) => {
                let lines = complete_lines(&bytes, from_start);
                if !lines.is_empty() || from_start {
                    return lines;
                }
                tracing::trace!(path = %path.display(), window, "Tail window too small, widening");
                window = window.saturating_mul(2);
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Tail read failed");
                return Vec::new();
            }
        }
    }
}

fn complete_lines(bytes: &[u8], from_start: bool) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines: Vec<String> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect();
    // the first line is partial unless the read began at offset 0
    if !from_start && !lines.is_empty() {
        lines.remove(0);
    }
    lines
}

async fn tail_bytes(path: &Path, window: u64) -> std::io::Result<(Vec<u8>, bool)> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let offset = len.saturating_sub(window);
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;
    Ok((buf, offset == 0))
}

/// Timestamp of the last timestamped record in a file.
pub async fn last_timestamp(path: &Path) -> Option<String> {
    read_tail_lines(path)
        .await
        .iter()
        .rev()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find_map(|record| str_field(&record, "timestamp"))
}
