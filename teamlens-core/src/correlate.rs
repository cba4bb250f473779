//! Structural correlation
//!
//! Rebuilds who-spawned-whom and who-said-what-to-whom from per-agent event
//! lists that share no foreign keys. Every heuristic is a pure function that
//! degrades to "no match" instead of failing.
//!
//! ## Naming and lineage
//!
//! Applied in priority order, each only to agents the previous one left
//! unresolved:
//!
//! 1. **Spawn-name pairing** ([`pair_spawns`]): named spawn calls from any
//!    agent are matched to sub-agent start times inside a bounded window.
//! 2. **Teammate tag** ([`inspect_inline_tag`]): an inbound message that
//!    *starts with* `<teammate-message teammate_id="...">` names the sender
//!    and may carry a task `subject`.
//! 3. **Proximity to lead**: an unnamed lead spawn close to the agent's first
//!    event marks the lead as spawner.
//!
//! Display names fall back from spawn name to tag subject to
//! `"{spawner}/{short-id}"` to the short id.

use crate::config::CorrelationConfig;
use crate::format::{short_id, timestamp_millis, truncate_chars};
use crate::ingest::AgentTranscript;
use crate::types::{
    Agent, Communication, CorrelatedSession, Direction, Event, EventKind, NameSource,
    SessionInfo, Task, TaskUpdateRecord, ToolUse, LEAD_AGENT_ID, LEAD_DISPLAY_NAME,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Tools that start a sub-agent.
pub const SPAWN_TOOLS: &[&str] = &["Task", "Agent"];

/// Tool an agent uses to message a teammate.
pub const SEND_MESSAGE_TOOL: &str = "SendMessage";

pub const TASK_CREATE_TOOL: &str = "TaskCreate";
pub const TASK_UPDATE_TOOL: &str = "TaskUpdate";

/// Tag wrapping a message delivered from another agent.
pub const TEAMMATE_TAG: &str = "teammate-message";

/// Maximum characters kept in [`Communication::raw`].
pub const MAX_RAW_MESSAGE_CHARS: usize = 500;

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<teammate-message\b([^>]*)>(.*?)</teammate-message>").expect("valid regex")
});

// A tag whose closing half was cut off by ingestion truncation.
static OPEN_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^<teammate-message\b([^>]*)>(.*)$").expect("valid regex"));

static ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*"([^"]*)""#).expect("valid regex"));

static TASK_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Task #(\w+)").expect("valid regex"));

// ============================================
// Spawn pairing
// ============================================

/// A named spawn call observed in some agent's events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnCall {
    pub timestamp_ms: i64,
    /// Agent that made the call
    pub spawner: String,
    pub name: String,
}

/// First-event time of a sub-agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStart {
    pub agent_id: String,
    pub first_ms: i64,
}

/// Result of pairing one spawn call with one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnMatch {
    pub agent_id: String,
    pub spawner: String,
    pub name: String,
}

fn is_spawn_tool(tool: &ToolUse) -> bool {
    SPAWN_TOOLS.contains(&tool.name.as_str())
}

/// Named spawn calls across all events, in event order.
pub fn collect_spawn_calls(events: &[Event]) -> Vec<SpawnCall> {
    events
        .iter()
        .filter_map(|event| timestamp_millis(&event.timestamp).map(|ms| (event, ms)))
        .flat_map(|(event, ms)| {
            event
                .tool_uses
                .iter()
                .filter(|tool| is_spawn_tool(tool))
                .filter_map(move |tool| {
                    tool.input_str("name").map(|name| SpawnCall {
                        timestamp_ms: ms,
                        spawner: event.agent_id.clone(),
                        name: name.to_string(),
                    })
                })
        })
        .collect()
}

/// Greedily pair spawn calls with agents by start time.
///
/// Spawn calls are taken in time order; each claims the earliest unclaimed
/// agent whose first event lies in
/// `[spawn - spawn_slack_ms, spawn + spawn_window_ms]`. Agents are kept in an
/// ordered set keyed by start time, so the whole pass is `O(n log n)`.
///
/// The result is injective both ways: no agent is claimed twice and no call
/// claims two agents. An agent is never paired with a call it made itself.
pub fn pair_spawns(
    spawns: &[SpawnCall],
    starts: &[AgentStart],
    config: &CorrelationConfig,
) -> Vec<SpawnMatch> {
    let mut order: Vec<usize> = (0..spawns.len()).collect();
    order.sort_by_key(|&i| (spawns[i].timestamp_ms, i));

    let mut available: BTreeSet<(i64, usize)> = starts
        .iter()
        .enumerate()
        .map(|(idx, start)| (start.first_ms, idx))
        .collect();

    let mut matches = Vec::new();
    for idx in order {
        let spawn = &spawns[idx];
        let earliest = spawn.timestamp_ms.saturating_sub(config.spawn_slack_ms);
        let latest = spawn.timestamp_ms.saturating_add(config.spawn_window_ms);

        let claimed = available
            .range((earliest, 0)..)
            .take_while(|(first_ms, _)| *first_ms <= latest)
            .find(|(_, start_idx)| starts[*start_idx].agent_id != spawn.spawner)
            .copied();

        if let Some(key) = claimed {
            available.remove(&key);
            matches.push(SpawnMatch {
                agent_id: starts[key.1].agent_id.clone(),
                spawner: spawn.spawner.clone(),
                name: spawn.name.clone(),
            });
        }
    }

    matches
}

// ============================================
// Teammate tags
// ============================================

/// One `<teammate-message ...>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeammateTag {
    pub teammate_id: String,
    pub color: Option<String>,
    pub summary: Option<String>,
    pub content: String,
}

/// Parse the teammate tags of a message.
///
/// Returns nothing unless the trimmed text *begins* with the tag; a tag quoted
/// mid-paragraph (pasted documentation, for example) is not a real message.
/// Back-to-back tags separated only by whitespace are all returned; anything
/// after the first gap of other text is ignored.
pub fn parse_teammate_tags(text: &str) -> Vec<TeammateTag> {
    let trimmed = text.trim();
    if !trimmed.starts_with(&format!("<{}", TEAMMATE_TAG)) {
        return Vec::new();
    }

    let mut tags = Vec::new();
    let mut rest = trimmed;
    while let Some(caps) = TAG_RE.captures(rest) {
        let (Some(whole), Some(attrs), Some(body)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            break;
        };
        if whole.start() != 0 {
            break;
        }
        tags.extend(build_tag(attrs.as_str(), body.as_str()));
        rest = rest[whole.end()..].trim_start();
    }

    if !tags.is_empty() {
        return tags;
    }

    OPEN_TAG_RE
        .captures(trimmed)
        .and_then(|caps| build_tag(caps.get(1)?.as_str(), caps.get(2)?.as_str()))
        .into_iter()
        .collect()
}

fn build_tag(attrs: &str, content: &str) -> Option<TeammateTag> {
    let attrs: HashMap<&str, &str> = ATTR_RE
        .captures_iter(attrs)
        .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .collect();

    let teammate_id = attrs.get("teammate_id").filter(|id| !id.is_empty())?;
    Some(TeammateTag {
        teammate_id: teammate_id.to_string(),
        color: attrs.get("color").map(|c| c.to_string()),
        summary: attrs.get("summary").map(|s| s.to_string()),
        content: content.trim().to_string(),
    })
}

/// Decode a message body: a JSON object when it is one, else a text wrapper.
pub fn parse_payload(content: &str) -> Value {
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "type": "text", "text": content }),
    }
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// What an agent's own inbound tags reveal about it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagInspection {
    /// `teammate_id` of the first tagged message received
    pub sender: Option<String>,
    /// First `subject` carried by a tagged JSON payload
    pub subject: Option<String>,
}

/// Scan an agent's user events for teammate tags.
pub fn inspect_inline_tag<'a>(events: impl IntoIterator<Item = &'a Event>) -> TagInspection {
    let mut found = TagInspection::default();

    for event in events {
        if event.kind != EventKind::User {
            continue;
        }
        for tag in parse_teammate_tags(&event.text) {
            if found.sender.is_none() {
                found.sender = Some(tag.teammate_id.clone());
            }
            if found.subject.is_none() {
                found.subject =
                    payload_str(&parse_payload(&tag.content), "subject").map(str::to_string);
            }
        }
        if found.sender.is_some() && found.subject.is_some() {
            break;
        }
    }

    found
}

// ============================================
// Name index
// ============================================

/// Maps the names agents use for each other onto agent-map keys.
#[derive(Debug, Default)]
pub struct NameIndex {
    names: HashMap<String, String>,
}

impl NameIndex {
    pub fn build(agents: &BTreeMap<String, Agent>) -> Self {
        let mut names = HashMap::new();
        for agent in agents.values() {
            names.insert(agent.id.clone(), agent.id.clone());
            if let Some(name) = &agent.spawn_name {
                names.entry(name.clone()).or_insert_with(|| agent.id.clone());
            }
            names
                .entry(agent.display_name.clone())
                .or_insert_with(|| agent.id.clone());
        }
        if agents.contains_key(LEAD_AGENT_ID) {
            names.insert(LEAD_DISPLAY_NAME.to_string(), LEAD_AGENT_ID.to_string());
        }
        Self { names }
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(String::as_str)
    }
}

// ============================================
// Agent resolution
// ============================================

/// Apply the three naming heuristics and set display names.
pub fn resolve_agents(
    agents: &mut BTreeMap<String, Agent>,
    events: &[Event],
    config: &CorrelationConfig,
) {
    // 1. explicit spawn names
    let starts: Vec<AgentStart> = agents
        .values()
        .filter(|a| !a.is_lead)
        .filter_map(|a| {
            let first_ms = timestamp_millis(a.first_timestamp.as_deref()?)?;
            Some(AgentStart {
                agent_id: a.id.clone(),
                first_ms,
            })
        })
        .collect();
    let spawns = collect_spawn_calls(events);
    for matched in pair_spawns(&spawns, &starts, config) {
        if let Some(agent) = agents.get_mut(&matched.agent_id) {
            agent.spawned_by = Some(matched.spawner);
            agent.spawn_name = Some(matched.name);
        }
    }

    // 2. inline teammate tags, resolved against names known so far
    let mut events_by_agent: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in events {
        events_by_agent
            .entry(event.agent_id.as_str())
            .or_default()
            .push(event);
    }
    let index = NameIndex::build(agents);
    let inspections: Vec<(String, TagInspection)> = agents
        .values()
        .filter(|a| !a.is_lead && a.spawn_name.is_none())
        .map(|a| {
            let own = events_by_agent.get(a.id.as_str()).cloned().unwrap_or_default();
            (a.id.clone(), inspect_inline_tag(own))
        })
        .collect();
    for (agent_id, found) in inspections {
        let Some(agent) = agents.get_mut(&agent_id) else {
            continue;
        };
        if agent.spawned_by.is_none() {
            agent.spawned_by = found
                .sender
                .as_deref()
                .map(|sender| index.resolve(sender).unwrap_or(sender).to_string())
                .filter(|spawner| *spawner != agent_id);
        }
        agent.task_subject = found.subject;
    }

    // 3. unnamed lead spawns close to the agent's first event
    let unnamed_lead_spawns: Vec<i64> = events
        .iter()
        .filter(|e| e.agent_id == LEAD_AGENT_ID)
        .filter(|e| {
            e.tool_uses
                .iter()
                .any(|t| is_spawn_tool(t) && t.input_str("name").is_none())
        })
        .filter_map(|e| timestamp_millis(&e.timestamp))
        .collect();
    if agents.contains_key(LEAD_AGENT_ID) {
        for start in &starts {
            let Some(agent) = agents.get_mut(&start.agent_id) else {
                continue;
            };
            if agent.spawned_by.is_some() {
                continue;
            }
            if unnamed_lead_spawns
                .iter()
                .any(|ms| (ms - start.first_ms).abs() <= config.proximity_ms)
            {
                agent.spawned_by = Some(LEAD_AGENT_ID.to_string());
            }
        }
    }

    for agent in agents.values_mut() {
        assign_display_name(agent);
    }
}

/// Display-name precedence for one agent.
pub fn assign_display_name(agent: &mut Agent) {
    if agent.is_lead {
        agent.display_name = LEAD_DISPLAY_NAME.to_string();
        agent.name_source = NameSource::Lead;
    } else if let Some(name) = &agent.spawn_name {
        agent.display_name = name.clone();
        agent.name_source = NameSource::SpawnCall;
    } else if let Some(subject) = &agent.task_subject {
        agent.display_name = subject.clone();
        agent.name_source = NameSource::TeammateTag;
    } else if let Some(spawner) = &agent.spawned_by {
        agent.display_name = format!("{}/{}", spawner, short_id(&agent.id));
        agent.name_source = NameSource::Spawner;
    } else {
        agent.display_name = short_id(&agent.id).to_string();
        agent.name_source = NameSource::AgentId;
    }
}

// ============================================
// Communications
// ============================================

/// Rebuild inter-agent messages from both observation points.
///
/// Inbound: user events that start with teammate tags (one communication per
/// tag, recipient is the owning agent). Outbound: `SendMessage` calls on
/// assistant events. The result is stably sorted by timestamp.
pub fn extract_communications(events: &[Event], index: &NameIndex) -> Vec<Communication> {
    let mut comms = Vec::new();

    for event in events.iter().filter(|e| e.kind == EventKind::User) {
        for tag in parse_teammate_tags(&event.text) {
            let content = parse_payload(&tag.content);
            comms.push(Communication {
                timestamp: event.timestamp.clone(),
                from_agent: index.resolve(&tag.teammate_id).map(str::to_string),
                to_agent: Some(event.agent_id.clone()),
                from: tag.teammate_id,
                to: event.agent_id.clone(),
                direction: Direction::Inbound,
                message_type: payload_str(&content, "type").unwrap_or("message").to_string(),
                summary: tag
                    .summary
                    .or_else(|| payload_str(&content, "summary").map(str::to_string)),
                color: tag.color,
                raw: truncate_chars(&tag.content, MAX_RAW_MESSAGE_CHARS),
                content,
            });
        }
    }

    for event in events.iter().filter(|e| e.kind == EventKind::Assistant) {
        for tool in event
            .tool_uses
            .iter()
            .filter(|t| t.name == SEND_MESSAGE_TOOL)
        {
            comms.push(outbound_communication(event, tool, index));
        }
    }

    comms.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    comms
}

fn outbound_communication(event: &Event, tool: &ToolUse, index: &NameIndex) -> Communication {
    let message_type = tool.input_str("type").unwrap_or("message").to_string();
    let to = tool
        .input_str("recipient")
        .map(str::to_string)
        .unwrap_or_else(|| {
            if message_type == "broadcast" {
                "*".to_string()
            } else {
                String::new()
            }
        });
    let summary = tool.input_str("summary").map(str::to_string);

    let (content, raw) = match tool.input.get("content") {
        Some(Value::String(text)) => (parse_payload(text), text.clone()),
        Some(value @ Value::Object(_)) => (value.clone(), value.to_string()),
        _ => {
            let text = summary.clone().unwrap_or_default();
            (parse_payload(&text), text)
        }
    };

    Communication {
        timestamp: event.timestamp.clone(),
        from: event.agent_id.clone(),
        from_agent: Some(event.agent_id.clone()),
        to_agent: index.resolve(&to).map(str::to_string),
        to,
        direction: Direction::Outbound,
        message_type,
        content,
        summary,
        color: None,
        raw: truncate_chars(&raw, MAX_RAW_MESSAGE_CHARS),
    }
}

// ============================================
// Tasks
// ============================================

struct TaskDraft {
    task: Task,
    // id came from the log rather than from position
    explicit_id: bool,
    // 1-based position among created tasks; None when synthesized
    ordinal: Option<usize>,
}

/// First id at or after `n` that no draft already carries.
fn unused_id(drafts: &[TaskDraft], prefix: &str, mut n: usize) -> String {
    loop {
        let id = format!("{}{}", prefix, n);
        if drafts.iter().all(|d| d.task.id != id) {
            return id;
        }
        n += 1;
    }
}

fn input_id(tool: &ToolUse, key: &str) -> Option<String> {
    match tool.input.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Rebuild task lifecycles from `TaskCreate` / `TaskUpdate` calls.
///
/// A create takes its id from `taskId`, else from the `Task #N` text of its
/// tool result, else from its position among created tasks (skipping ids
/// already taken by synthesized tasks). An update merges into the task with
/// that id, else the task with that subject, else the positional task that
/// never received an id; when nothing matches a task is synthesized from the
/// update. Every update lands in exactly one task.
pub fn extract_tasks(events: &[Event]) -> Vec<Task> {
    let result_ids: HashMap<&str, String> = events
        .iter()
        .flat_map(|e| e.tool_results.iter())
        .filter_map(|r| {
            let id = TASK_NUMBER_RE.captures(&r.content)?.get(1)?.as_str().to_string();
            Some((r.tool_use_id.as_deref()?, id))
        })
        .collect();

    let mut drafts: Vec<TaskDraft> = Vec::new();
    let mut created = 0usize;

    for event in events {
        for tool in &event.tool_uses {
            match tool.name.as_str() {
                TASK_CREATE_TOOL => {
                    created += 1;
                    let (id, explicit_id) = match input_id(tool, "taskId").or_else(|| {
                        tool.id
                            .as_deref()
                            .and_then(|use_id| result_ids.get(use_id).cloned())
                    }) {
                        Some(id) => (id, true),
                        None => (unused_id(&drafts, "", created), false),
                    };
                    drafts.push(TaskDraft {
                        task: Task {
                            subject: tool
                                .input_str("subject")
                                .map(str::to_string)
                                .unwrap_or_else(|| format!("Task {}", id)),
                            id,
                            description: tool.input_str("description").map(str::to_string),
                            creator: event.agent_id.clone(),
                            created_at: event.timestamp.clone(),
                            updates: Vec::new(),
                            latest_status: Some(
                                tool.input_str("status").unwrap_or("pending").to_string(),
                            ),
                            owner: tool.input_str("owner").map(str::to_string),
                            synthesized: false,
                        },
                        explicit_id,
                        ordinal: Some(created),
                    });
                }
                TASK_UPDATE_TOOL => apply_update(&mut drafts, event, tool),
                _ => {}
            }
        }
    }

    drafts.into_iter().map(|d| d.task).collect()
}

fn find_task(drafts: &[TaskDraft], task_ref: &str) -> Option<usize> {
    drafts
        .iter()
        .position(|d| d.task.id == task_ref)
        .or_else(|| drafts.iter().position(|d| d.task.subject == task_ref))
        .or_else(|| {
            let n: usize = task_ref.parse().ok()?;
            drafts
                .iter()
                .position(|d| d.ordinal == Some(n) && !d.explicit_id)
        })
}

fn apply_update(drafts: &mut Vec<TaskDraft>, event: &Event, tool: &ToolUse) {
    let task_ref = input_id(tool, "taskId");
    let idx = match task_ref.as_deref().and_then(|r| find_task(drafts, r)) {
        Some(idx) => idx,
        None => {
            let id = task_ref.unwrap_or_else(|| unused_id(drafts, "update-", drafts.len() + 1));
            drafts.push(TaskDraft {
                task: Task {
                    subject: tool
                        .input_str("subject")
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Task {}", id)),
                    id,
                    description: None,
                    creator: event.agent_id.clone(),
                    created_at: event.timestamp.clone(),
                    updates: Vec::new(),
                    latest_status: None,
                    owner: None,
                    synthesized: true,
                },
                explicit_id: true,
                ordinal: None,
            });
            drafts.len() - 1
        }
    };

    let task = &mut drafts[idx].task;
    let status = tool.input_str("status").map(str::to_string);
    let owner = tool.input_str("owner").map(str::to_string);

    if let Some(status) = &status {
        task.latest_status = Some(status.clone());
    }
    if let Some(owner) = &owner {
        task.owner = Some(owner.clone());
    }
    if let Some(subject) = tool.input_str("subject") {
        task.subject = subject.to_string();
    }
    if let Some(description) = tool.input_str("description") {
        task.description = Some(description.to_string());
    }
    task.updates.push(TaskUpdateRecord {
        timestamp: event.timestamp.clone(),
        agent_id: event.agent_id.clone(),
        status,
        owner,
    });
}

// ============================================
// Session assembly
// ============================================

/// Merge per-file events and run every correlation pass.
pub fn correlate(
    info: SessionInfo,
    transcripts: Vec<AgentTranscript>,
    config: &CorrelationConfig,
) -> CorrelatedSession {
    let mut agents: BTreeMap<String, Agent> = BTreeMap::new();
    let mut events: Vec<Event> = Vec::new();

    for transcript in transcripts {
        let file_agent = transcript.owner.file_agent_id();
        // an empty file still names an agent; otherwise only record-level ids count
        if transcript.events.is_empty()
            || transcript.events.iter().any(|e| e.agent_id == file_agent)
        {
            agents
                .entry(file_agent.to_string())
                .or_insert_with(|| Agent::new(file_agent.to_string()));
        }
        for event in &transcript.events {
            agents
                .entry(event.agent_id.clone())
                .or_insert_with(|| Agent::new(event.agent_id.clone()));
        }
        events.extend(transcript.events);
    }

    // Stable: ties keep lead-first, file order
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    for event in &events {
        if let Some(agent) = agents.get_mut(&event.agent_id) {
            if agent.first_timestamp.is_none() {
                agent.first_timestamp = Some(event.timestamp.clone());
            }
            agent.last_timestamp = Some(event.timestamp.clone());
        }
    }

    resolve_agents(&mut agents, &events, config);

    let index = NameIndex::build(&agents);
    let communications = extract_communications(&events, &index);
    let tasks = extract_tasks(&events);
    let stats = crate::stats::aggregate(&mut agents, &events, &communications, &tasks);

    tracing::debug!(
        session_id = %info.id,
        events = events.len(),
        agents = agents.len(),
        communications = communications.len(),
        tasks = tasks.len(),
        "Session correlated"
    );

    CorrelatedSession {
        info,
        events,
        agents,
        communications,
        tasks,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestReport, TranscriptOwner};
    use crate::types::ToolResult;
    use std::path::PathBuf;

    fn cfg() -> CorrelationConfig {
        CorrelationConfig::default()
    }

    fn event(agent: &str, kind: EventKind, ts: &str, text: &str) -> Event {
        Event {
            agent_id: agent.to_string(),
            kind,
            timestamp: ts.to_string(),
            text: text.to_string(),
            tool_uses: vec![],
            tool_results: vec![],
            model: None,
            is_sidechain: None,
        }
    }

    fn tool_event(agent: &str, ts: &str, name: &str, input: Value) -> Event {
        let mut e = event(agent, EventKind::Assistant, ts, "");
        e.tool_uses.push(ToolUse {
            id: Some(format!("tu-{}-{}", name, ts)),
            name: name.to_string(),
            input,
        });
        e
    }

    fn spawn(ms: i64, spawner: &str, name: &str) -> SpawnCall {
        SpawnCall {
            timestamp_ms: ms,
            spawner: spawner.to_string(),
            name: name.to_string(),
        }
    }

    fn start(id: &str, ms: i64) -> AgentStart {
        AgentStart {
            agent_id: id.to_string(),
            first_ms: ms,
        }
    }

    // ---------- pairing ----------

    #[test]
    fn test_pairing_allows_small_negative_skew() {
        let matches = pair_spawns(
            &[spawn(10_000, "lead", "Researcher")],
            &[start("a1", 8_500)],
            &cfg(),
        );
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].agent_id, "a1");
        assert_eq!(matches[0].name, "Researcher");
    }

    #[test]
    fn test_pairing_window_bounds() {
        let spawns = [spawn(10_000, "lead", "X")];
        assert!(pair_spawns(&spawns, &[start("early", 7_999)], &cfg()).is_empty());
        assert!(pair_spawns(&spawns, &[start("late", 130_001)], &cfg()).is_empty());
        assert_eq!(
            pair_spawns(&spawns, &[start("edge", 130_000)], &cfg()).len(),
            1
        );
    }

    #[test]
    fn test_pairing_greedy_earliest_unused() {
        let spawns = [
            spawn(1_000, "lead", "First"),
            spawn(1_500, "lead", "Second"),
            spawn(2_000, "lead", "Third"),
        ];
        let starts = [start("c", 4_000), start("a", 2_000), start("b", 3_000)];
        let matches = pair_spawns(&spawns, &starts, &cfg());

        let names: HashMap<_, _> = matches
            .iter()
            .map(|m| (m.agent_id.as_str(), m.name.as_str()))
            .collect();
        assert_eq!(names["a"], "First");
        assert_eq!(names["b"], "Second");
        assert_eq!(names["c"], "Third");
    }

    #[test]
    fn test_pairing_is_injective() {
        let spawns: Vec<SpawnCall> = (0..20)
            .map(|i| spawn(1_000 * (i % 5), "lead", &format!("n{}", i)))
            .collect();
        let starts: Vec<AgentStart> = (0..12)
            .map(|i| start(&format!("a{}", i), 500 * i))
            .collect();
        let matches = pair_spawns(&spawns, &starts, &cfg());

        let agents: BTreeSet<_> = matches.iter().map(|m| m.agent_id.clone()).collect();
        let names: BTreeSet<_> = matches.iter().map(|m| m.name.clone()).collect();
        assert_eq!(agents.len(), matches.len());
        assert_eq!(names.len(), matches.len());
        assert!(matches.len() <= starts.len());
    }

    #[test]
    fn test_pairing_skips_self_spawn() {
        let matches = pair_spawns(
            &[spawn(1_000, "a1", "Helper")],
            &[start("a1", 1_000), start("a2", 2_000)],
            &cfg(),
        );
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].agent_id, "a2");
    }

    // ---------- tags ----------

    #[test]
    fn test_tag_parsed_at_start() {
        let text = "  <teammate-message teammate_id=\"team-lead\" color=\"blue\" summary=\"kickoff\">\n{\"type\":\"task_assignment\",\"subject\":\"Audit deps\"}\n</teammate-message>";
        let tags = parse_teammate_tags(text);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].teammate_id, "team-lead");
        assert_eq!(tags[0].color.as_deref(), Some("blue"));
        assert_eq!(tags[0].summary.as_deref(), Some("kickoff"));
        assert!(tags[0].content.starts_with('{'));
    }

    #[test]
    fn test_tag_mid_text_is_ignored() {
        let text = "Here is how teammates talk: <teammate-message teammate_id=\"x\">hi</teammate-message>";
        assert!(parse_teammate_tags(text).is_empty());

        let e = event("a1", EventKind::User, "2026-02-23T00:00:00Z", text);
        assert!(extract_communications(&[e], &NameIndex::default()).is_empty());
    }

    #[test]
    fn test_multiple_and_truncated_tags() {
        let text = "<teammate-message teammate_id=\"a\">one</teammate-message>\n<teammate-message teammate_id=\"b\">two</teammate-message>";
        let tags = parse_teammate_tags(text);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].teammate_id, "b");

        let cut = "<teammate-message teammate_id=\"c\">partial body that was trunc";
        let tags = parse_teammate_tags(cut);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].content, "partial body that was trunc");
    }

    #[test]
    fn test_tag_quoted_after_real_tag_is_ignored() {
        let text = "<teammate-message teammate_id=\"team-lead\">hi</teammate-message>\n\nFor reference the docs say: <teammate-message teammate_id=\"fake\">quoted</teammate-message>";
        let tags = parse_teammate_tags(text);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].teammate_id, "team-lead");

        let e = event("a1", EventKind::User, "2026-02-23T00:00:00Z", text);
        let comms = extract_communications(&[e], &NameIndex::default());
        assert_eq!(comms.len(), 1);
        assert_eq!(comms[0].from, "team-lead");
    }

    #[test]
    fn test_tag_without_teammate_id_is_ignored() {
        assert!(parse_teammate_tags("<teammate-message color=\"red\">x</teammate-message>").is_empty());
    }

    #[test]
    fn test_parse_payload_fallback() {
        assert_eq!(parse_payload("{\"type\":\"shutdown\"}")["type"], "shutdown");
        let wrapped = parse_payload("just words");
        assert_eq!(wrapped["type"], "text");
        assert_eq!(wrapped["text"], "just words");
        assert_eq!(parse_payload("42")["type"], "text");
    }

    // ---------- agent resolution ----------

    fn agents_for(events: &[Event]) -> BTreeMap<String, Agent> {
        let mut agents = BTreeMap::new();
        for e in events {
            let agent = agents
                .entry(e.agent_id.clone())
                .or_insert_with(|| Agent::new(e.agent_id.clone()));
            if agent.first_timestamp.is_none() {
                agent.first_timestamp = Some(e.timestamp.clone());
            }
        }
        agents
    }

    #[test]
    fn test_spawn_name_resolution_with_skew() {
        // Agent's first event is 1.5s before the named spawn call.
        let events = vec![
            event("a1", EventKind::User, "2026-02-23T10:00:08.500Z", "go"),
            tool_event(
                "lead",
                "2026-02-23T10:00:10Z",
                "Task",
                json!({"name": "Researcher", "prompt": "dig"}),
            ),
        ];
        let mut agents = agents_for(&events);
        resolve_agents(&mut agents, &events, &cfg());

        let a1 = &agents["a1"];
        assert_eq!(a1.display_name, "Researcher");
        assert_eq!(a1.name_source, NameSource::SpawnCall);
        assert_eq!(a1.spawned_by.as_deref(), Some(LEAD_AGENT_ID));
    }

    #[test]
    fn test_tag_resolution_and_subject_name() {
        let events = vec![
            tool_event("lead", "2026-02-23T10:00:00Z", "TeamCreate", json!({})),
            event(
                "b2c3d4e5f6",
                EventKind::User,
                "2026-02-23T11:00:00Z",
                "<teammate-message teammate_id=\"team-lead\">{\"type\":\"task_assignment\",\"subject\":\"Write tests\"}</teammate-message>",
            ),
        ];
        let mut agents = agents_for(&events);
        resolve_agents(&mut agents, &events, &cfg());

        let agent = &agents["b2c3d4e5f6"];
        assert_eq!(agent.spawned_by.as_deref(), Some(LEAD_AGENT_ID));
        assert_eq!(agent.display_name, "Write tests");
        assert_eq!(agent.name_source, NameSource::TeammateTag);
    }

    #[test]
    fn test_proximity_fallback_and_id_label() {
        let events = vec![
            tool_event(
                "lead",
                "2026-02-23T10:00:00Z",
                "Task",
                json!({"description": "explore", "prompt": "look"}),
            ),
            event("c3d4e5f6a7", EventKind::User, "2026-02-23T10:00:03Z", "look"),
            event("d4e5f6a7b8", EventKind::User, "2026-02-23T10:05:00Z", "alone"),
        ];
        let mut agents = agents_for(&events);
        resolve_agents(&mut agents, &events, &cfg());

        let near = &agents["c3d4e5f6a7"];
        assert_eq!(near.spawned_by.as_deref(), Some(LEAD_AGENT_ID));
        assert_eq!(near.display_name, "lead/c3d4e5f");
        assert_eq!(near.name_source, NameSource::Spawner);

        let far = &agents["d4e5f6a7b8"];
        assert!(far.spawned_by.is_none());
        assert_eq!(far.display_name, "d4e5f6a");
        assert_eq!(far.name_source, NameSource::AgentId);

        assert_eq!(agents[LEAD_AGENT_ID].display_name, LEAD_DISPLAY_NAME);
        assert!(agents[LEAD_AGENT_ID].spawned_by.is_none());
    }

    // ---------- communications ----------

    #[test]
    fn test_communications_both_directions_sorted() {
        let mut agents = BTreeMap::new();
        let mut lead = Agent::new(LEAD_AGENT_ID);
        assign_display_name(&mut lead);
        agents.insert(LEAD_AGENT_ID.to_string(), lead);
        let mut worker = Agent::new("a1");
        worker.spawn_name = Some("researcher".to_string());
        assign_display_name(&mut worker);
        agents.insert("a1".to_string(), worker);
        let index = NameIndex::build(&agents);

        let events = vec![
            tool_event(
                "lead",
                "2026-02-23T10:00:05Z",
                SEND_MESSAGE_TOOL,
                json!({"type": "message", "recipient": "researcher", "content": "start", "summary": "go"}),
            ),
            event(
                "a1",
                EventKind::User,
                "2026-02-23T10:00:01Z",
                "<teammate-message teammate_id=\"team-lead\" color=\"green\">plain words</teammate-message>",
            ),
        ];
        let comms = extract_communications(&events, &index);

        assert_eq!(comms.len(), 2);
        assert_eq!(comms[0].direction, Direction::Inbound);
        assert_eq!(comms[0].from, "team-lead");
        assert_eq!(comms[0].from_agent.as_deref(), Some(LEAD_AGENT_ID));
        assert_eq!(comms[0].to, "a1");
        assert_eq!(comms[0].color.as_deref(), Some("green"));
        assert_eq!(comms[0].content["type"], "text");
        assert_eq!(comms[0].message_type, "text");

        assert_eq!(comms[1].direction, Direction::Outbound);
        assert_eq!(comms[1].from, LEAD_AGENT_ID);
        assert_eq!(comms[1].to, "researcher");
        assert_eq!(comms[1].to_agent.as_deref(), Some("a1"));
        assert_eq!(comms[1].summary.as_deref(), Some("go"));
        assert_eq!(comms[1].message_type, "message");
    }

    #[test]
    fn test_broadcast_without_recipient() {
        let events = vec![tool_event(
            "lead",
            "2026-02-23T10:00:05Z",
            SEND_MESSAGE_TOOL,
            json!({"type": "broadcast", "content": "{\"type\":\"shutdown_request\"}"}),
        )];
        let comms = extract_communications(&events, &NameIndex::default());
        assert_eq!(comms[0].to, "*");
        assert_eq!(comms[0].content["type"], "shutdown_request");
    }

    // ---------- tasks ----------

    #[test]
    fn test_create_then_update_by_subject() {
        let events = vec![
            tool_event("lead", "2026-02-23T10:00:00Z", TASK_CREATE_TOOL, json!({"subject": "A"})),
            tool_event(
                "a1",
                "2026-02-23T10:00:01Z",
                TASK_UPDATE_TOOL,
                json!({"taskId": "A", "status": "done"}),
            ),
        ];
        let tasks = extract_tasks(&events);

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].latest_status.as_deref(), Some("done"));
        assert_eq!(tasks[0].updates.len(), 1);
        assert_eq!(tasks[0].updates[0].agent_id, "a1");
        assert!(!tasks[0].synthesized);
    }

    #[test]
    fn test_task_id_from_tool_result() {
        let mut create = tool_event(
            "lead",
            "2026-02-23T10:00:00Z",
            TASK_CREATE_TOOL,
            json!({"subject": "Profile"}),
        );
        create.tool_uses[0].id = Some("tu_create".to_string());
        let mut result = event("lead", EventKind::User, "2026-02-23T10:00:01Z", "");
        result.tool_results.push(ToolResult {
            tool_use_id: Some("tu_create".to_string()),
            content: "Task #7 created successfully: Profile".to_string(),
            is_error: false,
        });
        let update = tool_event(
            "a1",
            "2026-02-23T10:00:02Z",
            TASK_UPDATE_TOOL,
            json!({"taskId": "7", "status": "in_progress", "owner": "profiler"}),
        );

        let tasks = extract_tasks(&[create, result, update]);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "7");
        assert_eq!(tasks[0].owner.as_deref(), Some("profiler"));
    }

    #[test]
    fn test_positional_ids_and_numeric_refs() {
        let events = vec![
            tool_event("lead", "2026-02-23T10:00:00Z", TASK_CREATE_TOOL, json!({"subject": "one"})),
            tool_event("lead", "2026-02-23T10:00:01Z", TASK_CREATE_TOOL, json!({"subject": "two"})),
            tool_event("a1", "2026-02-23T10:00:02Z", TASK_UPDATE_TOOL, json!({"taskId": 2, "status": "completed"})),
        ];
        let tasks = extract_tasks(&events);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].id, "2");
        assert_eq!(tasks[1].latest_status.as_deref(), Some("completed"));
        assert_eq!(tasks[0].latest_status.as_deref(), Some("pending"));
    }

    #[test]
    fn test_every_update_lands_once() {
        let events = vec![
            tool_event("lead", "2026-02-23T10:00:00Z", TASK_CREATE_TOOL, json!({"subject": "known"})),
            tool_event("a1", "2026-02-23T10:00:01Z", TASK_UPDATE_TOOL, json!({"taskId": "1", "status": "in_progress"})),
            tool_event("a1", "2026-02-23T10:00:02Z", TASK_UPDATE_TOOL, json!({"taskId": "99", "status": "completed"})),
            tool_event("a2", "2026-02-23T10:00:03Z", TASK_UPDATE_TOOL, json!({"status": "blocked"})),
            tool_event("a2", "2026-02-23T10:00:04Z", TASK_UPDATE_TOOL, json!({"taskId": "99", "owner": "a2"})),
        ];
        let tasks = extract_tasks(&events);

        let total_updates: usize = tasks.iter().map(|t| t.updates.len()).sum();
        assert_eq!(total_updates, 4);

        let synthesized: Vec<_> = tasks.iter().filter(|t| t.synthesized).collect();
        assert_eq!(synthesized.len(), 2);
        let ninety_nine = tasks.iter().find(|t| t.id == "99").unwrap();
        assert_eq!(ninety_nine.updates.len(), 2);
        assert_eq!(ninety_nine.latest_status.as_deref(), Some("completed"));
        assert_eq!(ninety_nine.owner.as_deref(), Some("a2"));
    }

    #[test]
    fn test_positional_id_skips_synthesized_ids() {
        let events = vec![
            tool_event("a1", "2026-02-23T10:00:00Z", TASK_UPDATE_TOOL, json!({"taskId": "2"})),
            tool_event("lead", "2026-02-23T10:00:01Z", TASK_CREATE_TOOL, json!({"subject": "first created"})),
            tool_event("lead", "2026-02-23T10:00:02Z", TASK_CREATE_TOOL, json!({"subject": "second created"})),
            tool_event(
                "a1",
                "2026-02-23T10:00:03Z",
                TASK_UPDATE_TOOL,
                json!({"taskId": "1", "status": "completed"}),
            ),
        ];
        let tasks = extract_tasks(&events);

        assert_eq!(tasks.len(), 3);
        let mut ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3, "task ids must be unique");

        let first = tasks.iter().find(|t| t.subject == "first created").unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(first.updates.len(), 1);
        assert_eq!(first.latest_status.as_deref(), Some("completed"));

        let second = tasks.iter().find(|t| t.subject == "second created").unwrap();
        assert_eq!(second.id, "3");
        assert!(second.updates.is_empty());
        assert_eq!(tasks.iter().filter(|t| t.synthesized).count(), 1);
    }

    // ---------- assembly ----------

    fn session_info() -> SessionInfo {
        SessionInfo {
            id: "s1".to_string(),
            project_dir: "-tmp-demo".to_string(),
            project_path: "/tmp/demo".to_string(),
            project_name: "demo".to_string(),
            git_branch: None,
            start_time: None,
            end_time: None,
            duration_ms: None,
            duration: None,
            agent_count: 2,
            teammates: BTreeMap::new(),
            lead_path: PathBuf::new(),
            subagent_paths: vec![],
        }
    }

    fn transcript(owner: TranscriptOwner, events: Vec<Event>) -> AgentTranscript {
        AgentTranscript {
            owner,
            events,
            report: IngestReport::default(),
        }
    }

    #[test]
    fn test_record_agent_id_replaces_file_agent() {
        let transcripts = vec![
            transcript(
                TranscriptOwner::Lead,
                vec![event("lead", EventKind::User, "2026-02-23T10:00:00Z", "go")],
            ),
            transcript(
                TranscriptOwner::Subagent("file-id".to_string()),
                vec![event("record-id", EventKind::Assistant, "2026-02-23T10:00:05Z", "ok")],
            ),
            transcript(TranscriptOwner::Subagent("idle".to_string()), vec![]),
        ];
        let session = correlate(session_info(), transcripts, &cfg());

        assert!(session.agents.contains_key("record-id"));
        assert!(!session.agents.contains_key("file-id"));
        // an empty file still shows up as an agent
        assert!(session.agents.contains_key("idle"));
        assert_eq!(session.agents.len(), 3);
        assert_eq!(session.events.len(), 2);
    }
}
