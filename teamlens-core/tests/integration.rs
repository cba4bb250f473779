//! Integration tests for the discovery → ingestion → correlation → query pipeline
//!
//! These tests use the fixture tree in `tests/fixtures/claude/` as the Claude
//! data root. It holds one team session (lead + two teammates + one
//! auto-compaction agent) and one ordinary session that must be excluded.

use std::path::PathBuf;
use teamlens_core::config::Config;
use teamlens_core::discovery::discover_sessions;
use teamlens_core::ingest::{ingest_session, MAX_TEXT_CHARS, MAX_TOOL_RESULT_CHARS};
use teamlens_core::types::{Direction, NameSource, LEAD_AGENT_ID};
use teamlens_core::{Error, TeamService};

const TEAM_SESSION: &str = "7d1e4c2a-5b6f-4e3d-9a8b-1c2d3e4f5a6b";

/// Get the fixture Claude root
fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/claude")
}

fn fixture_config() -> Config {
    let mut config = Config::default();
    config.sources.claude_dir = Some(fixture_root());
    config
}

// ============================================
// Discovery
// ============================================

#[tokio::test]
async fn test_discovery_finds_only_team_session() {
    let config = fixture_config();
    let sessions =
        discover_sessions(&config.sources.projects_dir(), &config.correlation).await;

    assert_eq!(sessions.len(), 1, "solo session must be excluded");
    let session = &sessions[0];
    assert_eq!(session.id, TEAM_SESSION);
    assert_eq!(session.project_dir, "-Users-dev-teamlens-demo");
    assert_eq!(session.project_path, "/Users/dev/teamlens/demo");
    assert_eq!(session.git_branch.as_deref(), Some("feature/parser"));
    assert_eq!(session.start_time.as_deref(), Some("2026-02-23T10:00:00.000Z"));
    assert_eq!(session.end_time.as_deref(), Some("2026-02-23T10:06:00.000Z"));
    assert_eq!(session.duration.as_deref(), Some("6m 00s"));

    // lead + auditor + tester; the compaction agent is not counted
    assert_eq!(session.agent_count, 3);
    assert_eq!(session.subagent_paths.len(), 2);
    assert_eq!(session.teammates["a11ce"], "auditor");
    assert_eq!(session.teammates["b0b"], "tester");
}

#[tokio::test]
async fn test_discovery_is_idempotent() {
    let config = fixture_config();
    let dir = config.sources.projects_dir();
    let first = discover_sessions(&dir, &config.correlation).await;
    let second = discover_sessions(&dir, &config.correlation).await;
    assert_eq!(first, second);
}

// ============================================
// Ingestion
// ============================================

#[tokio::test]
async fn test_ingestion_skips_snapshots_and_bad_lines() {
    let config = fixture_config();
    let sessions =
        discover_sessions(&config.sources.projects_dir(), &config.correlation).await;
    let transcripts = ingest_session(&sessions[0]).await;

    assert_eq!(transcripts.len(), 3);
    let lead = &transcripts[0];
    assert_eq!(lead.events.len(), 10);
    assert_eq!(lead.report.skipped, 1);
    assert!(lead.events.iter().all(|e| e.agent_id == LEAD_AGENT_ID));

    for transcript in &transcripts {
        for event in &transcript.events {
            assert!(event.text.chars().count() <= MAX_TEXT_CHARS);
            for result in &event.tool_results {
                assert!(result.content.chars().count() <= MAX_TOOL_RESULT_CHARS);
            }
        }
    }
}

// ============================================
// Correlation through the service
// ============================================

#[tokio::test]
async fn test_session_detail_resolves_agents() {
    let service = TeamService::from_config(fixture_config());
    let detail = service.session_detail(TEAM_SESSION).await.unwrap();

    assert_eq!(detail.agents.len(), 3);

    let lead = &detail.agents[LEAD_AGENT_ID];
    assert!(lead.is_lead);
    assert!(lead.spawned_by.is_none());
    assert_eq!(lead.display_name, "team-lead");
    assert_eq!(lead.event_count, 10);

    let auditor = &detail.agents["a11ce"];
    assert_eq!(auditor.display_name, "auditor");
    assert_eq!(auditor.name_source, NameSource::SpawnCall);
    assert_eq!(auditor.spawned_by.as_deref(), Some(LEAD_AGENT_ID));
    assert_eq!(auditor.tool_counts["TaskUpdate"], 2);
    assert_eq!(auditor.message_count, 1);

    // first event one second before its spawn call
    let tester = &detail.agents["b0b"];
    assert_eq!(tester.display_name, "tester");
    assert_eq!(tester.tool_counts["Bash"], 1);

    assert_eq!(detail.stats.total_events, 17);
    assert_eq!(detail.stats.agent_count, 3);
    assert_eq!(detail.stats.task_count, 2);
    assert_eq!(detail.stats.message_count, 3);
}

#[tokio::test]
async fn test_merged_timeline_is_ordered() {
    let service = TeamService::from_config(fixture_config());
    let page = service.timeline(TEAM_SESSION, Some(0), Some(500)).await.unwrap();

    assert_eq!(page.total, 17);
    assert!(!page.has_more);
    assert!(page
        .events
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
}

#[tokio::test]
async fn test_communications_both_directions() {
    let service = TeamService::from_config(fixture_config());
    let comms = service.communications(TEAM_SESSION).await.unwrap();

    assert_eq!(comms.len(), 3);

    let kickoff = &comms[0];
    assert_eq!(kickoff.direction, Direction::Outbound);
    assert_eq!(kickoff.from, LEAD_AGENT_ID);
    assert_eq!(kickoff.to_agent.as_deref(), Some("a11ce"));
    assert_eq!(kickoff.content["text"], "Start with ingest.rs");

    let report = &comms[1];
    assert_eq!(report.direction, Direction::Outbound);
    assert_eq!(report.to_agent.as_deref(), Some(LEAD_AGENT_ID));
    assert_eq!(report.message_type, "message");
    assert_eq!(report.content["type"], "task_completed");

    let received = &comms[2];
    assert_eq!(received.direction, Direction::Inbound);
    assert_eq!(received.from_agent.as_deref(), Some("a11ce"));
    assert_eq!(received.to, LEAD_AGENT_ID);
    assert_eq!(received.color.as_deref(), Some("blue"));
    assert_eq!(received.message_type, "task_completed");
}

#[tokio::test]
async fn test_tasks_merge_and_synthesize() {
    let service = TeamService::from_config(fixture_config());
    let tasks = service.tasks(TEAM_SESSION).await.unwrap();

    assert_eq!(tasks.len(), 2);

    let audit = &tasks[0];
    assert_eq!(audit.id, "1");
    assert_eq!(audit.subject, "Audit parser");
    assert_eq!(audit.creator, LEAD_AGENT_ID);
    assert_eq!(audit.updates.len(), 2);
    assert_eq!(audit.latest_status.as_deref(), Some("completed"));
    assert_eq!(audit.owner.as_deref(), Some("auditor"));
    assert!(!audit.synthesized);

    let orphan = &tasks[1];
    assert_eq!(orphan.id, "9");
    assert!(orphan.synthesized);
    assert_eq!(orphan.creator, "b0b");
}

#[tokio::test]
async fn test_teammate_detail_and_cache_reuse() {
    let service = TeamService::from_config(fixture_config());

    let detail = service.teammate(TEAM_SESSION, "a11ce").await.unwrap();
    assert_eq!(detail.events.len(), 4);
    assert_eq!(detail.total_events, 4);

    let first = service.load(TEAM_SESSION).await.unwrap();
    let second = service.load(TEAM_SESSION).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(service.cache().len(), 1);
}

#[tokio::test]
async fn test_not_found_paths() {
    let service = TeamService::from_config(fixture_config());

    let err = service.session_detail("0a0b0c0d-solo").await.unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));

    let err = service.teammate(TEAM_SESSION, "nobody").await.unwrap_err();
    assert!(matches!(err, Error::AgentNotFound { .. }));

    let summary = service.summary().await;
    assert_eq!(summary.total_sessions, 1);
    assert_eq!(summary.total_agents, 3);
}
