use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default inactivity window before a session is swept.
pub const DEFAULT_SESSION_TIMEOUT_MINS: i64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active: bool,
    /// Free-form per-session state.
    pub context: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// In-memory table of connected-client sessions.
///
/// All mutation goes through the single write lock so that the timeout sweep
/// never deletes a session that a concurrent `touch` just refreshed.
#[derive(Clone, Default)]
pub struct SessionTable {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session for `client_id`. Any existing session for the
    /// same client is replaced; a client never has two concurrent sessions.
    pub async fn create(&self, client_id: &str) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            created_at: now,
            last_activity: now,
            active: true,
            context: Map::new(),
            provider: None,
        };
        let mut guard = self.sessions.write().await;
        guard.retain(|_, existing| existing.client_id != client_id);
        guard.insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Refresh last-activity. A session removed by a concurrent sweep is not
    /// an error; the touch just has nothing left to refresh.
    pub async fn touch(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.last_activity = Utc::now();
        }
    }

    /// Refresh last-activity for a client's current session.
    pub async fn touch_client(&self, client_id: &str) {
        let mut guard = self.sessions.write().await;
        if let Some(session) = guard.values_mut().find(|s| s.client_id == client_id) {
            session.last_activity = Utc::now();
        }
    }

    /// Record the provider name the client's session is currently using.
    pub async fn set_client_provider(&self, client_id: &str, provider: &str) {
        let mut guard = self.sessions.write().await;
        if let Some(session) = guard.values_mut().find(|s| s.client_id == client_id) {
            session.provider = Some(provider.to_string());
        }
    }

    /// Mark a session inactive. Idempotent.
    pub async fn close(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.active = false;
        }
    }

    /// Remove every session whose last activity predates `now - timeout`.
    /// The scan and the deletes happen under one write guard.
    pub async fn cleanup_inactive(&self, timeout: Duration) -> Vec<Session> {
        let cutoff = Utc::now() - timeout;
        let mut guard = self.sessions.write().await;
        let stale_ids = guard
            .iter()
            .filter(|(_, session)| session.last_activity < cutoff)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        let mut removed = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            if let Some(mut session) = guard.remove(&id) {
                session.active = false;
                removed.push(session);
            }
        }
        removed
    }

    /// Close and drop every session. Used at shutdown.
    pub async fn cleanup_all(&self) {
        let mut guard = self.sessions.write().await;
        for session in guard.values_mut() {
            session.active = false;
        }
        guard.clear();
    }

    pub async fn list_active(&self) -> Vec<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|session| session.active)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_replaces_existing_session_for_client() {
        let table = SessionTable::new();
        let first = table.create("web-1").await;
        let second = table.create("web-1").await;
        assert_ne!(first.id, second.id);
        assert!(table.get(&first.id).await.is_none());
        assert!(table.get(&second.id).await.is_some());
        assert_eq!(table.list_active().await.len(), 1);
    }

    #[tokio::test]
    async fn touch_missing_session_is_a_no_op() {
        let table = SessionTable::new();
        table.touch("no-such-session").await;
        assert!(table.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_hides_from_active_list() {
        let table = SessionTable::new();
        let session = table.create("web-1").await;
        table.close(&session.id).await;
        table.close(&session.id).await;
        assert!(table.list_active().await.is_empty());
        assert!(!table.get(&session.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn cleanup_removes_only_sessions_past_the_cutoff() {
        let table = SessionTable::new();
        let stale = table.create("web-stale").await;
        let fresh = table.create("web-fresh").await;

        {
            let mut guard = table.sessions.write().await;
            guard.get_mut(&stale.id).unwrap().last_activity =
                Utc::now() - Duration::minutes(45);
        }

        let removed = table.cleanup_inactive(Duration::minutes(30)).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, stale.id);
        assert!(table.get(&stale.id).await.is_none());
        assert!(table.get(&fresh.id).await.is_some());
    }

    #[tokio::test]
    async fn touch_before_cleanup_prevents_removal() {
        let table = SessionTable::new();
        let session = table.create("web-1").await;
        {
            let mut guard = table.sessions.write().await;
            guard.get_mut(&session.id).unwrap().last_activity =
                Utc::now() - Duration::minutes(45);
        }
        table.touch(&session.id).await;
        let removed = table.cleanup_inactive(Duration::minutes(30)).await;
        assert!(removed.is_empty());
        assert!(table.get(&session.id).await.is_some());
    }

    #[tokio::test]
    async fn cleanup_all_empties_the_table() {
        let table = SessionTable::new();
        table.create("web-1").await;
        table.create("web-2").await;
        table.cleanup_all().await;
        assert!(table.list_active().await.is_empty());
    }
}
