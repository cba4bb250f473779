//! Per-agent and per-session reductions over a correlated event stream.

use crate::format::duration_millis;
use crate::types::{
    Agent, Communication, Direction, Event, EventKind, SessionStats, Task, ToolCount,
};
use std::collections::BTreeMap;

/// Length of the session-wide tool ranking.
pub const TOP_TOOLS: usize = 5;

/// Fill agent counters and compute session totals.
///
/// Agent `first_timestamp`/`last_timestamp` must already be set; they are
/// left untouched. An agent's `message_count` counts outbound messages only,
/// so a message observed on both ends is not counted twice.
pub fn aggregate(
    agents: &mut BTreeMap<String, Agent>,
    events: &[Event],
    communications: &[Communication],
    tasks: &[Task],
) -> SessionStats {
    let mut stats = SessionStats {
        total_events: events.len(),
        agent_count: agents.len(),
        message_count: communications.len(),
        task_count: tasks.len(),
        ..Default::default()
    };

    for agent in agents.values_mut() {
        agent.event_count = 0;
        agent.tool_counts.clear();
        agent.message_count = 0;
    }

    for event in events {
        match event.kind {
            EventKind::User => stats.user_events += 1,
            EventKind::Assistant => stats.assistant_events += 1,
        }
        stats.tool_calls += event.tool_uses.len();

        if let Some(agent) = agents.get_mut(&event.agent_id) {
            agent.event_count += 1;
            for tool in &event.tool_uses {
                *agent.tool_counts.entry(tool.name.clone()).or_insert(0) += 1;
            }
        }
        for tool in &event.tool_uses {
            *stats.tool_counts.entry(tool.name.clone()).or_insert(0) += 1;
        }
    }

    for comm in communications
        .iter()
        .filter(|c| c.direction == Direction::Outbound)
    {
        if let Some(agent) = comm.from_agent.as_ref().and_then(|id| agents.get_mut(id)) {
            agent.message_count += 1;
        }
    }

    stats.top_tools = top_tools(&stats.tool_counts, TOP_TOOLS);
    stats.first_timestamp = events.first().map(|e| e.timestamp.clone());
    stats.last_timestamp = events.last().map(|e| e.timestamp.clone());
    stats.duration_ms = match (&stats.first_timestamp, &stats.last_timestamp) {
        (Some(first), Some(last)) => duration_millis(first, last),
        _ => None,
    };

    stats
}

/// The `n` most used tools, highest count first, ties by name.
pub fn top_tools(tool_counts: &BTreeMap<String, usize>, n: usize) -> Vec<ToolCount> {
    let mut tools: Vec<ToolCount> = tool_counts
        .iter()
        .map(|(name, count)| ToolCount {
            name: name.clone(),
            count: *count,
        })
        .collect();
    tools.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    tools.truncate(n);
    tools
}
