//! In-process session registry shared by all portal connectors

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Authenticated session for one portal branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub portal: String,
    pub branch: String,
    /// Opaque per-connector payload (token, cookies, ...)
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Summary row returned by [`SessionRegistry::list`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub portal: String,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Registry of active sessions across portals.
///
/// All operations run inside one mutex so read-modify-write pairs
/// (lookup-then-refresh, lookup-then-delete-if-expired) are atomic.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new session and return its id.
    ///
    /// The id encodes portal, branch, and creation instant, plus a short
    /// uniquifier so concurrent logins never collide.
    pub fn create(
        &self,
        portal: &str,
        branch: &str,
        payload: serde_json::Map<String, serde_json::Value>,
        ttl: std::time::Duration,
    ) -> String {
        let now = Utc::now();
        let id = format!(
            "{}_{}_{}-{}",
            portal,
            branch,
            now.timestamp_millis(),
            crate::utils::short_uid()
        );

        let record = SessionRecord {
            id: id.clone(),
            portal: portal.to_string(),
            branch: branch.to_string(),
            payload,
            created_at: now,
            last_accessed: now,
            expires_at: now + Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(3600)),
        };

        self.sessions.lock().insert(id.clone(), record);
        info!("Session created: {}", id);
        id
    }

    /// Get a session, eagerly removing it when expired and refreshing
    /// `last_accessed` otherwise.
    pub fn get(&self, id: &str) -> Option<SessionRecord> {
        let mut sessions = self.sessions.lock();

        let expired = matches!(sessions.get(id), Some(s) if s.is_expired());
        if expired {
            sessions.remove(id);
            debug!("Session expired and removed: {}", id);
            return None;
        }

        sessions.get_mut(id).map(|session| {
            session.last_accessed = Utc::now();
            session.clone()
        })
    }

    /// Merge a patch into the session payload. No-op when absent.
    pub fn update(&self, id: &str, patch: serde_json::Map<String, serde_json::Value>) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            Some(session) => {
                session.payload.extend(patch);
                session.last_accessed = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn delete(&self, id: &str) -> bool {
        let removed = self.sessions.lock().remove(id).is_some();
        if removed {
            info!("Session deleted: {}", id);
        }
        removed
    }

    /// List active sessions, optionally filtered by portal.
    ///
    /// Expired records are swept first so they are never returned.
    pub fn list(&self, portal: Option<&str>) -> Vec<SessionSummary> {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, s| !s.is_expired());

        sessions
            .values()
            .filter(|s| portal.map_or(true, |p| s.portal == p))
            .map(|s| SessionSummary {
                id: s.id.clone(),
                portal: s.portal.clone(),
                branch: s.branch.clone(),
                created_at: s.created_at,
                expires_at: s.expires_at,
            })
            .collect()
    }

    /// Remove all expired sessions and return how many were removed.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Cleaned up {} expired sessions", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
