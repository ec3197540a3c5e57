use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::BridgeError;
use trestle_types::AskKind;

/// Resolved approvals kept for audit before the oldest are evicted.
pub const DEFAULT_MAX_RESOLVED: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub id: String,
    pub client_id: String,
    pub ask_type: AskKind,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

/// Correlates approval requests from the extension with the responses that
/// eventually arrive from the web client, over an unordered channel.
///
/// Resolution is the one state transition in the bridge and happens under a
/// single write guard: of two concurrent resolutions for the same
/// identifier, exactly one succeeds.
#[derive(Clone)]
pub struct ApprovalRegistry {
    entries: Arc<RwLock<HashMap<String, PendingApproval>>>,
    max_resolved: usize,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::with_max_resolved(DEFAULT_MAX_RESOLVED)
    }

    pub fn with_max_resolved(max_resolved: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_resolved,
        }
    }

    /// Store a new pending approval and hand back the full record. The
    /// generated identifier is what the web client must echo to resolve it.
    pub async fn register(
        &self,
        client_id: &str,
        ask_type: AskKind,
        data: Map<String, Value>,
    ) -> PendingApproval {
        let approval = PendingApproval {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            ask_type,
            data,
            created_at: Utc::now(),
            status: ApprovalStatus::Pending,
            responded_at: None,
        };
        self.entries
            .write()
            .await
            .insert(approval.id.clone(), approval.clone());
        approval
    }

    /// Transition an approval out of pending and return its owner and
    /// subtype so the decision can be forwarded downstream.
    pub async fn resolve(
        &self,
        approval_id: &str,
        approved: bool,
    ) -> Result<(String, AskKind), BridgeError> {
        let mut guard = self.entries.write().await;
        let entry = guard
            .get_mut(approval_id)
            .ok_or_else(|| BridgeError::UnknownApproval(approval_id.to_string()))?;
        if entry.status != ApprovalStatus::Pending {
            return Err(BridgeError::AlreadyResolved(approval_id.to_string()));
        }
        entry.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        };
        entry.responded_at = Some(Utc::now());
        let result = (entry.client_id.clone(), entry.ask_type.clone());
        self.prune_resolved(&mut guard);
        Ok(result)
    }

    pub async fn get(&self, approval_id: &str) -> Option<PendingApproval> {
        self.entries.read().await.get(approval_id).cloned()
    }

    /// Drop the oldest resolved entries beyond the retention cap. Pending
    /// entries are never evicted.
    fn prune_resolved(&self, guard: &mut HashMap<String, PendingApproval>) {
        let mut resolved = guard
            .values()
            .filter(|entry| entry.status != ApprovalStatus::Pending)
            .map(|entry| (entry.responded_at, entry.id.clone()))
            .collect::<Vec<_>>();
        if resolved.len() <= self.max_resolved {
            return;
        }
        resolved.sort();
        let excess = resolved.len() - self.max_resolved;
        for (_, id) in resolved.into_iter().take(excess) {
            guard.remove(&id);
        }
    }
}

impl Default for ApprovalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape an approval's raw payload for display in the web client.
///
/// Pure formatting: unknown subtypes pass the payload through unchanged, and
/// no branch can fail.
pub fn format_for_display(ask_type: &AskKind, data: &Map<String, Value>) -> Map<String, Value> {
    let str_field = |key: &str| -> String {
        data.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut formatted = Map::new();
    formatted.insert("type".to_string(), json!(ask_type.as_str()));
    formatted.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));

    match ask_type {
        AskKind::Command => {
            let command = str_field("command");
            formatted.insert("command".to_string(), json!(command));
            formatted.insert("working_directory".to_string(), json!(str_field("cwd")));
            formatted.insert(
                "description".to_string(),
                json!(format!("Execute command: {command}")),
            );
        }
        AskKind::Tool => {
            let tool = str_field("tool");
            formatted.insert("tool".to_string(), json!(tool));
            formatted.insert(
                "parameters".to_string(),
                data.get("parameters").cloned().unwrap_or(json!({})),
            );
            formatted.insert("description".to_string(), json!(format!("Use tool: {tool}")));
        }
        AskKind::Followup => {
            formatted.insert("question".to_string(), json!(str_field("question")));
            formatted.insert("context".to_string(), json!(str_field("context")));
            formatted.insert(
                "options".to_string(),
                data.get("options").cloned().unwrap_or(json!([])),
            );
        }
        AskKind::Other(_) => {
            for (key, value) in data {
                formatted.insert(key.clone(), value.clone());
            }
        }
    }
    formatted
}
