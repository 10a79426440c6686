//! Per-connection session state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use cdp_adapter::PageDriver;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use cartscout_core_types::Target;

use crate::errors::{ScoutError, ScoutResult};
use crate::metrics;
use crate::pool::ContextPool;

static LAST_ISSUED: AtomicI64 = AtomicI64::new(0);

/// Millisecond-timestamp token identifying one client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(i64);

impl SessionId {
    /// Current time in milliseconds, bumped past the last issued id when two land together.
    pub fn next() -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = LAST_ISSUED.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match LAST_ISSUED.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocationStatus {
    pub confirmed: bool,
    pub title: Option<String>,
}

#[derive(Debug)]
struct SessionEntry {
    initialized: bool,
    location: HashMap<Target, LocationStatus>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            initialized: false,
            location: Target::ALL
                .into_iter()
                .map(|target| (target, LocationStatus::default()))
                .collect(),
        }
    }
}

/// A session's contexts and location flags at one point in time.
pub struct SessionSnapshot {
    pub contexts: HashMap<Target, Arc<dyn PageDriver>>,
    pub location: HashMap<Target, LocationStatus>,
}

impl SessionSnapshot {
    pub fn is_confirmed(&self, target: Target) -> bool {
        self.location
            .get(&target)
            .map(|status| status.confirmed)
            .unwrap_or(false)
    }

    pub fn any_confirmed(&self) -> bool {
        self.location.values().any(|status| status.confirmed)
    }
}

/// Owns every session and cascades teardown into the context pool.
pub struct SessionRegistry {
    pool: Arc<ContextPool>,
    sessions: DashMap<SessionId, SessionEntry>,
}

impl SessionRegistry {
    pub fn new(pool: Arc<ContextPool>) -> Self {
        Self {
            pool,
            sessions: DashMap::new(),
        }
    }

    pub fn pool(&self) -> &Arc<ContextPool> {
        &self.pool
    }

    /// Starts a session with no contexts and no confirmed location. Existing entries are kept.
    pub fn create(&self, session: SessionId) {
        self.sessions.entry(session).or_insert_with(|| {
            metrics::session_opened();
            debug!(target: "registry", %session, "session created");
            SessionEntry::new()
        });
    }

    /// Marks the session ready. Locations confirmed before this initialize are forgotten.
    pub fn mark_initialized(&self, session: SessionId) {
        if let Some(mut entry) = self.sessions.get_mut(&session) {
            *entry = SessionEntry {
                initialized: true,
                ..SessionEntry::new()
            };
        }
    }

    pub fn is_initialized(&self, session: SessionId) -> bool {
        self.sessions
            .get(&session)
            .map(|entry| entry.initialized)
            .unwrap_or(false)
    }

    pub fn mark_location_status(
        &self,
        session: SessionId,
        target: Target,
        confirmed: bool,
        title: Option<String>,
    ) {
        if let Some(mut entry) = self.sessions.get_mut(&session) {
            entry
                .location
                .insert(target, LocationStatus { confirmed, title });
        }
    }

    pub fn get(&self, session: SessionId) -> ScoutResult<SessionSnapshot> {
        let location = match self.sessions.get(&session) {
            Some(entry) if entry.initialized => entry.location.clone(),
            _ => return Err(ScoutError::NotInitialized(session.to_string())),
        };
        Ok(SessionSnapshot {
            contexts: self.pool.contexts(session),
            location,
        })
    }

    /// Drops the session and its browsers. Returns whether any browser was held.
    pub async fn destroy(&self, session: SessionId) -> bool {
        let existed = self.sessions.remove(&session).is_some();
        let released = self.pool.release_all(session).await;
        if existed {
            metrics::session_closed();
            info!(target: "registry", %session, released, "session destroyed");
        }
        released > 0
    }

    pub async fn destroy_all(&self) {
        let sessions: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for session in sessions {
            self.destroy(session).await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLauncher;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(ContextPool::new(Arc::new(MockLauncher::new()))))
    }

    #[test]
    fn session_ids_are_unique_and_increasing() {
        let ids: Vec<SessionId> = (0..64).map(|_| SessionId::next()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn uninitialized_sessions_are_not_readable() {
        let registry = registry();
        let session = SessionId::next();
        assert!(registry.get(session).is_err());

        registry.create(session);
        assert!(registry.get(session).err().unwrap().is_not_initialized());

        registry.mark_initialized(session);
        let snapshot = registry.get(session).unwrap();
        assert_eq!(snapshot.location.len(), 3);
        assert!(!snapshot.any_confirmed());
    }

    #[tokio::test]
    async fn location_flags_are_per_target() {
        let registry = registry();
        let session = SessionId::next();
        registry.create(session);
        registry.mark_initialized(session);
        registry.mark_location_status(session, Target::Zepto, true, Some("HSR Layout".into()));

        let snapshot = registry.get(session).unwrap();
        assert!(snapshot.is_confirmed(Target::Zepto));
        assert!(!snapshot.is_confirmed(Target::Blinkit));
        assert_eq!(
            snapshot.location[&Target::Zepto].title.as_deref(),
            Some("HSR Layout")
        );
    }

    #[tokio::test]
    async fn reinitializing_clears_confirmed_locations() {
        let registry = registry();
        let session = SessionId::next();
        registry.create(session);
        registry.mark_initialized(session);
        registry.mark_location_status(session, Target::Blinkit, true, Some("HSR".into()));

        registry.create(session);
        registry.mark_initialized(session);
        let snapshot = registry.get(session).unwrap();
        assert!(!snapshot.any_confirmed());
        assert_eq!(snapshot.location.len(), 3);
    }

    #[tokio::test]
    async fn destroy_releases_contexts() {
        let registry = registry();
        let session = SessionId::next();
        registry.create(session);
        registry.pool().acquire(session, Target::Blinkit).await.unwrap();

        assert!(registry.destroy(session).await);
        assert!(registry.is_empty());
        assert!(registry.pool().is_empty());
        assert!(!registry.destroy(session).await);
    }
}
