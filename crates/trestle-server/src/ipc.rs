//! Line-delimited JSON connection to the editor extension.
//!
//! One connection per web client. The extension's IPC server greets with a
//! welcome line; after that, each direction is newline-terminated JSON.
//! Outbound messages are stamped with a per-connection incrementing `id`.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use trestle_core::Result;
use trestle_types::ExtensionMessage;

use crate::gateway::ExtensionRegistry;
use crate::router::MessageRouter;

pub struct ExtensionLink {
    client_id: String,
    write_task: JoinHandle<()>,
    read_task: JoinHandle<()>,
}

impl ExtensionLink {
    /// Connect to the extension's IPC server on behalf of `client_id`,
    /// register the outbound channel with the gateway registry, and start
    /// the read/write pumps. Inbound messages flow into
    /// [`MessageRouter::route_from_extension`].
    pub async fn connect(
        addr: SocketAddr,
        client_id: &str,
        router: Arc<MessageRouter>,
        registry: Arc<ExtensionRegistry>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let welcome = lines.next_line().await?;
        info!(
            client_id,
            welcome = welcome.as_deref().unwrap_or(""),
            "connected to extension IPC server"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        registry.register(client_id, tx).await;

        let write_client = client_id.to_string();
        let write_task = tokio::spawn(async move {
            let mut next_id: u64 = 0;
            while let Some(mut message) = rx.recv().await {
                next_id += 1;
                if let Some(map) = message.as_object_mut() {
                    map.insert("id".to_string(), Value::String(next_id.to_string()));
                }
                let Ok(mut line) = serde_json::to_string(&message) else {
                    continue;
                };
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    warn!(client_id = %write_client, "extension IPC write failed, stopping writer");
                    break;
                }
            }
        });

        let read_client = client_id.to_string();
        let read_registry = registry.clone();
        let read_task = tokio::spawn(async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ExtensionMessage>(trimmed) {
                            Ok(message) => {
                                router.route_from_extension(&read_client, message).await
                            }
                            Err(err) => {
                                warn!(client_id = %read_client, %err, "unparseable line from extension")
                            }
                        }
                    }
                    Ok(None) => {
                        info!(client_id = %read_client, "extension IPC connection closed");
                        break;
                    }
                    Err(err) => {
                        warn!(client_id = %read_client, %err, "extension IPC read failed");
                        break;
                    }
                }
            }
            read_registry.unregister(&read_client).await;
        });

        Ok(Self {
            client_id: client_id.to_string(),
            write_task,
            read_task,
        })
    }

    /// Stop both pumps and drop the gateway registration.
    pub async fn shutdown(self, registry: &ExtensionRegistry) {
        self.read_task.abort();
        self.write_task.abort();
        registry.unregister(&self.client_id).await;
    }
}
