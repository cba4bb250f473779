//! Query layer over discovered and correlated sessions
//!
//! [`TeamService`] is what the HTTP server and the inspect CLI call. It owns
//! the configuration, an injected [`SessionCache`], and the most recent
//! discovery result.

use crate::cache::{CachePolicy, SessionCache};
use crate::config::Config;
use crate::correlate::correlate;
use crate::discovery::discover_sessions;
use crate::error::{Error, Result};
use crate::ingest::ingest_session;
use crate::types::{
    Agent, Communication, CorrelatedSession, Event, SessionId, SessionInfo, SessionStats, Task,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Totals across every discovered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySummary {
    pub total_sessions: usize,
    pub total_agents: usize,
}

/// Session metadata with its agents and stats, without events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session: SessionInfo,
    pub agents: BTreeMap<String, Agent>,
    pub stats: SessionStats,
}

/// One page of the merged event stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePage {
    pub events: Vec<Event>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub has_more: bool,
}

/// An agent and a bounded slice of its own events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeammateDetail {
    pub agent: Agent,
    pub events: Vec<Event>,
    /// Events the agent owns in total, before the slice
    pub total_events: usize,
}

/// Slice `events` into a 0-based page.
pub fn paginate(events: &[Event], page: usize, page_size: usize) -> TimelinePage {
    let total = events.len();
    let start = page.saturating_mul(page_size).min(total);
    let end = start.saturating_add(page_size).min(total);

    TimelinePage {
        events: events[start..end].to_vec(),
        page,
        page_size,
        total,
        has_more: end < total,
    }
}

pub struct TeamService {
    config: Config,
    projects_dir: PathBuf,
    cache: SessionCache,
    sessions: Mutex<Option<Vec<SessionInfo>>>,
}

impl TeamService {
    pub fn new(config: Config, cache: SessionCache) -> Self {
        let projects_dir = config.sources.projects_dir();
        Self {
            config,
            projects_dir,
            cache,
            sessions: Mutex::new(None),
        }
    }

    /// Service with a cache built from `config.cache`.
    pub fn from_config(config: Config) -> Self {
        let cache = SessionCache::new(CachePolicy::from(&config.cache));
        Self::new(config, cache)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn projects_dir(&self) -> &std::path::Path {
        &self.projects_dir
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    fn stored_sessions(&self) -> Option<Vec<SessionInfo>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-scan the projects directory and replace the stored list.
    pub async fn discover(&self) -> Vec<SessionInfo> {
        let sessions = discover_sessions(&self.projects_dir, &self.config.correlation).await;
        *self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sessions.clone());
        sessions
    }

    async fn known_sessions(&self) -> Vec<SessionInfo> {
        match self.stored_sessions() {
            Some(sessions) => sessions,
            None => self.discover().await,
        }
    }

    /// Totals over the last discovery, discovering first if needed.
    pub async fn summary(&self) -> DiscoverySummary {
        let sessions = self.known_sessions().await;
        DiscoverySummary {
            total_sessions: sessions.len(),
            total_agents: sessions.iter().map(|s| s.agent_count).sum(),
        }
    }

    /// Look up a session descriptor, re-discovering once on a miss.
    pub async fn find_session(&self, id: &str) -> Result<SessionInfo> {
        let lookup = |sessions: Vec<SessionInfo>| sessions.into_iter().find(|s| s.id == id);

        if let Some(info) = self.stored_sessions().and_then(lookup) {
            return Ok(info);
        }
        lookup(self.discover().await).ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Correlated session, parsing on a cache miss.
    pub async fn load(&self, id: &str) -> Result<Arc<CorrelatedSession>> {
        let key = SessionId::from(id);
        if let Some(session) = self.cache.get(&key) {
            return Ok(session);
        }

        let info = self.find_session(id).await?;
        let transcripts = ingest_session(&info).await;
        let session = correlate(info, transcripts, &self.config.correlation);

        tracing::info!(
            session_id = %key,
            events = session.events.len(),
            agents = session.agents.len(),
            "Session parsed"
        );

        Ok(self.cache.insert(key, session))
    }

    pub async fn session_detail(&self, id: &str) -> Result<SessionDetail> {
        let session = self.load(id).await?;
        Ok(SessionDetail {
            session: session.info.clone(),
            agents: session.agents.clone(),
            stats: session.stats.clone(),
        })
    }

    /// A page of the merged timeline. Page size defaults and is capped by
    /// `config.query`.
    pub async fn timeline(
        &self,
        id: &str,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> Result<TimelinePage> {
        let query = &self.config.query;
        let page_size = page_size
            .filter(|size| *size > 0)
            .unwrap_or(query.default_page_size)
            .min(query.max_page_size);

        let session = self.load(id).await?;
        Ok(paginate(&session.events, page.unwrap_or(0), page_size))
    }

    pub async fn communications(&self, id: &str) -> Result<Vec<Communication>> {
        Ok(self.load(id).await?.communications.clone())
    }

    pub async fn tasks(&self, id: &str) -> Result<Vec<Task>> {
        Ok(self.load(id).await?.tasks.clone())
    }

    /// One agent by id (or display name) with its first events.
    pub async fn teammate(&self, id: &str, agent_id: &str) -> Result<TeammateDetail> {
        let session = self.load(id).await?;
        let agent = session
            .agents
            .get(agent_id)
            .or_else(|| {
                session
                    .agents
                    .values()
                    .find(|a| a.display_name == agent_id)
            })
            .ok_or_else(|| Error::AgentNotFound {
                session_id: id.to_string(),
                agent_id: agent_id.to_string(),
            })?;

        let owned = session.events.iter().filter(|e| e.agent_id == agent.id);
        let total_events = owned.clone().count();
        let events = owned
            .take(self.config.query.teammate_event_limit)
            .cloned()
            .collect();

        Ok(TeammateDetail {
            agent: agent.clone(),
            events,
            total_events,
        })
    }

    /// Forget one parsed session. Returns whether it was cached.
    pub fn invalidate(&self, id: &str) -> bool {
        self.cache.invalidate(&SessionId::from(id))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
