//! Outbound delivery capabilities, one per direction.
//!
//! Both registries map a client id to the sender half of that client's live
//! connection. Delivery is at-most-once per call; there is no retry.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use trestle_core::{BridgeError, Result};

/// Send a message to a connected web client.
#[async_trait]
pub trait WebGateway: Send + Sync {
    async fn send(&self, client_id: &str, message: Value) -> Result<()>;
}

/// Send a message to the editor extension on behalf of a client.
#[async_trait]
pub trait ExtensionGateway: Send + Sync {
    async fn send(&self, client_id: &str, message: Value) -> Result<()>;
}

/// Live WebSocket connections to web clients.
#[derive(Default)]
pub struct WebRegistry {
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<Value>>>,
}

impl WebRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, client_id: &str, tx: mpsc::UnboundedSender<Value>) {
        self.connections
            .write()
            .await
            .insert(client_id.to_string(), tx);
    }

    pub async fn unregister(&self, client_id: &str) {
        self.connections.write().await.remove(client_id);
    }
}

#[async_trait]
impl WebGateway for WebRegistry {
    async fn send(&self, client_id: &str, message: Value) -> Result<()> {
        let tx = self
            .connections
            .read()
            .await
            .get(client_id)
            .cloned()
            .ok_or_else(|| BridgeError::GatewayUnavailable(client_id.to_string()))?;
        tx.send(message)
            .map_err(|_| BridgeError::GatewayUnavailable(client_id.to_string()))
    }
}

/// Live IPC connections to the editor extension, keyed by the web client
/// they serve.
#[derive(Default)]
pub struct ExtensionRegistry {
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<Value>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, client_id: &str, tx: mpsc::UnboundedSender<Value>) {
        self.connections
            .write()
            .await
            .insert(client_id.to_string(), tx);
        tracing::info!(client_id, "registered extension connection");
    }

    pub async fn unregister(&self, client_id: &str) {
        if self
            .connections
            .write()
            .await
            .remove(client_id)
            .is_some()
        {
            tracing::info!(client_id, "unregistered extension connection");
        }
    }

    pub async fn is_connected(&self, client_id: &str) -> bool {
        self.connections.read().await.contains_key(client_id)
    }
}

#[async_trait]
impl ExtensionGateway for ExtensionRegistry {
    async fn send(&self, client_id: &str, message: Value) -> Result<()> {
        let tx = self
            .connections
            .read()
            .await
            .get(client_id)
            .cloned()
            .ok_or_else(|| BridgeError::GatewayUnavailable(client_id.to_string()))?;
        tx.send(message)
            .map_err(|_| BridgeError::GatewayUnavailable(client_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_to_unregistered_client_is_unavailable() {
        let registry = WebRegistry::new();
        let err = registry.send("web-1", json!({"type": "pong"})).await.unwrap_err();
        assert!(matches!(err, BridgeError::GatewayUnavailable(_)));
    }

    #[tokio::test]
    async fn registered_channel_receives_messages() {
        let registry = ExtensionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("web-1", tx).await;
        assert!(registry.is_connected("web-1").await);

        registry.send("web-1", json!({"type": "newTask"})).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), json!({"type": "newTask"}));

        registry.unregister("web-1").await;
        assert!(!registry.is_connected("web-1").await);
    }
}
