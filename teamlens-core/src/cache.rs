//! In-memory cache of correlated sessions
//!
//! Correlation runs at most once per session per cache lifetime unless the
//! entry is invalidated. There is no single-flight: two concurrent misses for
//! the same id both parse, and the later insert wins.

use crate::config::CacheConfig;
use crate::types::{CorrelatedSession, SessionId};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Keep every parsed session until invalidated
    Unbounded,
    /// Evict the least recently used session beyond this many
    MaxEntries(NonZeroUsize),
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        match NonZeroUsize::new(config.max_sessions) {
            Some(n) => CachePolicy::MaxEntries(n),
            None => CachePolicy::Unbounded,
        }
    }
}

/// Session-keyed memo of correlation results.
pub struct SessionCache {
    entries: Mutex<LruCache<SessionId, Arc<CorrelatedSession>>>,
}

impl SessionCache {
    pub fn new(policy: CachePolicy) -> Self {
        let entries = match policy {
            CachePolicy::Unbounded => LruCache::unbounded(),
            CachePolicy::MaxEntries(n) => LruCache::new(n),
        };
        Self {
            entries: Mutex::new(entries),
        }
    }

    // A poisoned lock only means a panic elsewhere; the map itself is intact.
    fn lock(&self) -> MutexGuard<'_, LruCache<SessionId, Arc<CorrelatedSession>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<CorrelatedSession>> {
        self.lock().get(id).cloned()
    }

    pub fn insert(&self, id: SessionId, session: CorrelatedSession) -> Arc<CorrelatedSession> {
        let session = Arc::new(session);
        self.lock().put(id, Arc::clone(&session));
        session
    }

    /// Drop one entry. Returns whether it was cached.
    pub fn invalidate(&self, id: &SessionId) -> bool {
        self.lock().pop(id).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(CachePolicy::Unbounded)
    }
}
