//! The message router: classifies traffic from either side, applies the
//! provider catalog and session/approval registries, and emits messages for
//! the opposite side.
//!
//! The router is a boundary. Every downstream failure is converted into an
//! `error` envelope for the side that sent the offending message; nothing a
//! single bad message can do is allowed to crash the process or another
//! client's stream.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::warn;

use trestle_core::{format_for_display, ApprovalRegistry, BridgeError, Result, SessionTable};
use trestle_providers::ProviderCatalog;
use trestle_types::{
    AskKind, ExtensionMessage, ImageAttachment, ImageSource, ProviderSettingsInput, WebviewMessage,
};

use crate::gateway::{ExtensionGateway, WebGateway};

/// Commands the router handles specially on the web-to-extension direction.
/// Everything else falls through `Other` and is forwarded untouched, since
/// the extension-side vocabulary evolves independently of this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebCommand {
    NewTask,
    AskResponse,
    SaveApiConfiguration,
    CancelTask,
    ResumeTask,
    Other,
}

impl WebCommand {
    pub fn classify(kind: &str) -> Self {
        match kind {
            "newTask" => WebCommand::NewTask,
            "askResponse" => WebCommand::AskResponse,
            "saveApiConfiguration" => WebCommand::SaveApiConfiguration,
            "cancelTask" => WebCommand::CancelTask,
            "resumeTask" => WebCommand::ResumeTask,
            _ => WebCommand::Other,
        }
    }
}

/// Signals the router handles specially on the extension-to-web direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionSignal {
    Ask,
    Say,
    Event,
    Other,
}

impl ExtensionSignal {
    pub fn classify(kind: &str) -> Self {
        match kind {
            "ask" => ExtensionSignal::Ask,
            "say" => ExtensionSignal::Say,
            "event" => ExtensionSignal::Event,
            _ => ExtensionSignal::Other,
        }
    }
}

/// Error envelope sent back to whichever side produced the failing message.
/// Names the message type where known, and a human-readable reason; never
/// internal state.
pub fn error_envelope(message_type: &str, reason: &str) -> Value {
    json!({
        "type": "error",
        "data": {
            "message": reason,
            "message_type": message_type,
        }
    })
}

pub struct MessageRouter {
    catalog: ProviderCatalog,
    sessions: SessionTable,
    approvals: ApprovalRegistry,
    web: Arc<dyn WebGateway>,
    extension: Arc<dyn ExtensionGateway>,
}

impl MessageRouter {
    pub fn new(
        catalog: ProviderCatalog,
        sessions: SessionTable,
        approvals: ApprovalRegistry,
        web: Arc<dyn WebGateway>,
        extension: Arc<dyn ExtensionGateway>,
    ) -> Self {
        Self {
            catalog,
            sessions,
            approvals,
            web,
            extension,
        }
    }

    /// Route one message from a web client toward the extension. Always
    /// returns an acknowledgement for the caller to deliver back to the
    /// client; failures become `error` envelopes rather than Err.
    pub async fn route_from_web(&self, client_id: &str, message: WebviewMessage) -> Value {
        tracing::debug!(client_id, kind = %message.kind, "routing from web");
        let kind = message.kind.clone();
        match self.dispatch_web(client_id, message).await {
            Ok(ack) => ack,
            Err(err) => {
                warn!(client_id, kind = %kind, %err, "web message failed");
                error_envelope(&kind, &err.to_string())
            }
        }
    }

    /// Route one message from the extension toward its web client. Failures
    /// are reported to that client as `error` envelopes.
    pub async fn route_from_extension(&self, client_id: &str, message: ExtensionMessage) {
        tracing::debug!(client_id, kind = %message.kind, "routing from extension");
        let kind = message.kind.clone();
        if let Err(err) = self.dispatch_extension(client_id, message).await {
            warn!(client_id, kind = %kind, %err, "extension message failed");
            let _ = self
                .web
                .send(client_id, error_envelope(&kind, &err.to_string()))
                .await;
        }
    }

    async fn dispatch_web(&self, client_id: &str, message: WebviewMessage) -> Result<Value> {
        match WebCommand::classify(&message.kind) {
            WebCommand::NewTask => self.start_task(client_id, message).await,
            WebCommand::AskResponse => self.handle_ask_response(client_id, &message.data).await,
            WebCommand::SaveApiConfiguration => {
                self.save_configuration(client_id, &message.data).await
            }
            WebCommand::CancelTask => {
                self.extension
                    .send(
                        client_id,
                        json!({
                            "type": "cancelTask",
                            "taskId": message.data.get("taskId").cloned().unwrap_or(Value::Null),
                        }),
                    )
                    .await?;
                Ok(json!({"status": "task_cancelled"}))
            }
            WebCommand::ResumeTask => {
                self.extension
                    .send(
                        client_id,
                        json!({
                            "type": "resumeTask",
                            "taskId": message.data.get("taskId").cloned().unwrap_or(Value::Null),
                        }),
                    )
                    .await?;
                Ok(json!({"status": "task_resumed"}))
            }
            WebCommand::Other => {
                self.extension
                    .send(
                        client_id,
                        json!({"type": message.kind.clone(), "data": message.data}),
                    )
                    .await?;
                Ok(json!({"status": "forwarded", "type": message.kind}))
            }
        }
    }

    async fn start_task(&self, client_id: &str, message: WebviewMessage) -> Result<Value> {
        let prompt = message
            .data
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut configuration = Value::Object(Map::new());
        if message.data.contains_key("provider") || message.data.contains_key("model") {
            let input: ProviderSettingsInput =
                serde_json::from_value(Value::Object(message.data.clone()))?;
            let settings = self
                .catalog
                .fill_defaults_and_validate(client_id, input)
                .await?;
            self.sessions
                .set_client_provider(client_id, &settings.provider)
                .await;
            configuration = serde_json::to_value(settings.to_api_configuration())?;
        }

        let mut task = json!({
            "type": "newTask",
            "prompt": prompt,
            "configuration": configuration,
        });
        if !message.images.is_empty() {
            task["images"] = Value::Array(filter_images(&message.images));
        }

        self.extension.send(client_id, task).await?;
        Ok(json!({"status": "task_started", "client_id": client_id}))
    }

    async fn handle_ask_response(
        &self,
        _client_id: &str,
        data: &Map<String, Value>,
    ) -> Result<Value> {
        let approval_id = data
            .get("approval_id")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Malformed("askResponse without approval_id".to_string()))?;
        let approved = data
            .get("approved")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // Resolve first: a decision for an unknown or already-resolved
        // approval must never reach the extension. The decision is forwarded
        // to the approval's registered owner, not whoever echoed the id.
        let (owner, ask_type) = self.approvals.resolve(approval_id, approved).await?;

        self.extension
            .send(
                &owner,
                json!({
                    "type": "askResponse",
                    "data": {
                        "approved": approved,
                        "response": data.get("response").cloned().unwrap_or(Value::Null),
                        "modifications": data.get("modifications").cloned().unwrap_or(Value::Null),
                        "ask_type": ask_type.as_str(),
                    }
                }),
            )
            .await?;
        Ok(json!({"status": "response_sent", "approval_id": approval_id}))
    }

    async fn save_configuration(
        &self,
        client_id: &str,
        data: &Map<String, Value>,
    ) -> Result<Value> {
        let input: ProviderSettingsInput = serde_json::from_value(Value::Object(data.clone()))?;
        let settings = self
            .catalog
            .fill_defaults_and_validate(client_id, input)
            .await?;
        self.sessions
            .set_client_provider(client_id, &settings.provider)
            .await;
        self.extension
            .send(
                client_id,
                json!({
                    "type": "saveApiConfiguration",
                    "data": settings.to_api_configuration(),
                }),
            )
            .await?;
        Ok(json!({"status": "config_updated", "provider": settings.provider}))
    }

    async fn dispatch_extension(&self, client_id: &str, message: ExtensionMessage) -> Result<()> {
        match ExtensionSignal::classify(&message.kind) {
            ExtensionSignal::Ask => self.handle_ask(client_id, &message.data).await,
            ExtensionSignal::Say => {
                let say_type = message
                    .data
                    .get("say_type")
                    .or_else(|| message.data.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.web
                    .send(
                        client_id,
                        json!({
                            "type": "status_update",
                            "say_type": say_type,
                            "data": message.data,
                        }),
                    )
                    .await
            }
            ExtensionSignal::Event => {
                let event_name = message
                    .data
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let event_data = message.data.get("data").cloned().unwrap_or(json!({}));
                self.web
                    .send(
                        client_id,
                        json!({
                            "type": "event",
                            "event_name": event_name,
                            "data": event_data,
                        }),
                    )
                    .await
            }
            ExtensionSignal::Other => {
                let forwarded = serde_json::to_value(&message)?;
                self.web.send(client_id, forwarded).await
            }
        }
    }

    async fn handle_ask(&self, client_id: &str, data: &Map<String, Value>) -> Result<()> {
        let kind = data
            .get("ask_type")
            .or_else(|| data.get("type"))
            .and_then(Value::as_str)
            .map(AskKind::parse)
            .unwrap_or_else(|| AskKind::Other("unknown".to_string()));

        let approval = self.approvals.register(client_id, kind.clone(), data.clone()).await;

        let mut payload = Map::new();
        payload.insert("approval_id".to_string(), json!(approval.id));
        payload.insert("ask_type".to_string(), json!(kind.as_str()));
        payload.insert(
            "data".to_string(),
            Value::Object(format_for_display(&kind, data)),
        );
        if kind == AskKind::Followup {
            if let Some(options) = data.get("options") {
                payload.insert("options".to_string(), options.clone());
                payload.insert(
                    "allow_text_response".to_string(),
                    data.get("allow_text_response")
                        .cloned()
                        .unwrap_or(Value::Bool(true)),
                );
            }
        }

        self.web
            .send(
                client_id,
                json!({"type": "approval_required", "data": payload}),
            )
            .await
    }
}

/// Keep the structurally valid base64 attachments, skip the rest. A bad
/// entry never aborts the remainder of the batch.
fn filter_images(images: &[Value]) -> Vec<Value> {
    let mut forwarded = Vec::new();
    for raw in images {
        let image: ImageAttachment = match serde_json::from_value(raw.clone()) {
            Ok(image) => image,
            Err(err) => {
                warn!(%err, "dropping malformed image attachment");
                continue;
            }
        };
        match image.source {
            ImageSource::Base64 => forwarded.push(json!({
                "data": image.data,
                "mime_type": image.mime_type,
                "name": image.name,
            })),
            ImageSource::Url => warn!("url image attachments not implemented, skipping"),
            ImageSource::Path => warn!("path image attachments not implemented, skipping"),
        }
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    /// Captures everything sent through it; can be flipped offline to model
    /// a missing connection.
    struct RecordingGateway {
        sent: Mutex<Vec<(String, Value)>>,
        online: bool,
    }

    impl RecordingGateway {
        fn online() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                online: true,
            })
        }

        fn offline() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                online: false,
            })
        }

        async fn take(&self) -> Vec<(String, Value)> {
            std::mem::take(&mut *self.sent.lock().await)
        }

        async fn record(&self, client_id: &str, message: Value) -> Result<()> {
            if !self.online {
                return Err(BridgeError::GatewayUnavailable(client_id.to_string()));
            }
            self.sent
                .lock()
                .await
                .push((client_id.to_string(), message));
            Ok(())
        }
    }

    #[async_trait]
    impl WebGateway for RecordingGateway {
        async fn send(&self, client_id: &str, message: Value) -> Result<()> {
            self.record(client_id, message).await
        }
    }

    #[async_trait]
    impl ExtensionGateway for RecordingGateway {
        async fn send(&self, client_id: &str, message: Value) -> Result<()> {
            self.record(client_id, message).await
        }
    }

    struct Fixture {
        router: MessageRouter,
        web: Arc<RecordingGateway>,
        extension: Arc<RecordingGateway>,
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingGateway::online(), RecordingGateway::online())
    }

    fn fixture_with(web: Arc<RecordingGateway>, extension: Arc<RecordingGateway>) -> Fixture {
        let router = MessageRouter::new(
            ProviderCatalog::new(),
            SessionTable::new(),
            ApprovalRegistry::new(),
            web.clone(),
            extension.clone(),
        );
        Fixture {
            router,
            web,
            extension,
        }
    }

    fn web_message(value: Value) -> WebviewMessage {
        serde_json::from_value(value).unwrap()
    }

    fn extension_message(value: Value) -> ExtensionMessage {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn new_task_applies_provider_defaults() {
        let fx = fixture();
        let ack = fx
            .router
            .route_from_web(
                "web-1",
                web_message(json!({
                    "type": "newTask",
                    "data": {"prompt": "hi", "provider": "anthropic", "model": "claude-3-sonnet"}
                })),
            )
            .await;
        assert_eq!(ack["status"], json!("task_started"));

        let sent = fx.extension.take().await;
        assert_eq!(sent.len(), 1);
        let (client, task) = &sent[0];
        assert_eq!(client, "web-1");
        assert_eq!(task["type"], json!("newTask"));
        assert_eq!(task["prompt"], json!("hi"));
        let config = &task["configuration"];
        assert_eq!(config["apiProvider"], json!("anthropic"));
        assert_eq!(config["apiModelId"], json!("claude-3-sonnet"));
        assert_eq!(config["maxTokens"], json!(4096));
        assert_eq!(config["temperature"], json!(0.7));
        assert_eq!(config["contextLength"], json!(200000));
    }

    #[tokio::test]
    async fn new_task_without_provider_keeps_configuration_empty() {
        let fx = fixture();
        let ack = fx
            .router
            .route_from_web(
                "web-1",
                web_message(json!({"type": "newTask", "data": {"prompt": "hi"}})),
            )
            .await;
        assert_eq!(ack["status"], json!("task_started"));
        let sent = fx.extension.take().await;
        assert_eq!(sent[0].1["configuration"], json!({}));
        assert!(sent[0].1.get("images").is_none());
    }

    #[tokio::test]
    async fn new_task_forwards_only_base64_images() {
        let fx = fixture();
        fx.router
            .route_from_web(
                "web-1",
                web_message(json!({
                    "type": "newTask",
                    "data": {"prompt": "look"},
                    "images": [
                        {"type": "base64", "data": "aGVsbG8=", "mime_type": "image/png", "name": "a.png"},
                        {"type": "url", "data": "https://example.com/b.png", "mime_type": "image/png"},
                        {"not": "an image"}
                    ]
                })),
            )
            .await;
        let sent = fx.extension.take().await;
        let images = sent[0].1["images"].as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0]["data"], json!("aGVsbG8="));
        assert_eq!(images[0]["name"], json!("a.png"));
    }

    #[tokio::test]
    async fn unknown_provider_becomes_error_ack_and_nothing_is_forwarded() {
        let fx = fixture();
        let ack = fx
            .router
            .route_from_web(
                "web-1",
                web_message(json!({
                    "type": "newTask",
                    "data": {"prompt": "hi", "provider": "does-not-exist"}
                })),
            )
            .await;
        assert_eq!(ack["type"], json!("error"));
        assert_eq!(ack["data"]["message_type"], json!("newTask"));
        assert!(fx.extension.take().await.is_empty());
    }

    #[tokio::test]
    async fn followup_round_trip_forwards_decision_once() {
        let fx = fixture();
        fx.router
            .route_from_extension(
                "web-1",
                extension_message(json!({
                    "type": "ask",
                    "data": {"ask_type": "followup", "question": "Which?", "options": ["A", "B"]}
                })),
            )
            .await;

        let to_web = fx.web.take().await;
        assert_eq!(to_web.len(), 1);
        let envelope = &to_web[0].1;
        assert_eq!(envelope["type"], json!("approval_required"));
        let payload = &envelope["data"];
        assert_eq!(payload["ask_type"], json!("followup"));
        assert_eq!(payload["options"], json!(["A", "B"]));
        assert_eq!(payload["allow_text_response"], json!(true));
        let approval_id = payload["approval_id"].as_str().unwrap().to_string();

        let ack = fx
            .router
            .route_from_web(
                "web-1",
                web_message(json!({
                    "type": "askResponse",
                    "data": {"approval_id": approval_id, "approved": true, "response": "A"}
                })),
            )
            .await;
        assert_eq!(ack["status"], json!("response_sent"));

        let to_extension = fx.extension.take().await;
        assert_eq!(to_extension.len(), 1);
        let decision = &to_extension[0].1;
        assert_eq!(decision["type"], json!("askResponse"));
        assert_eq!(decision["data"]["approved"], json!(true));
        assert_eq!(decision["data"]["ask_type"], json!("followup"));
        assert_eq!(decision["data"]["response"], json!("A"));
    }

    #[tokio::test]
    async fn ask_response_for_unknown_approval_is_rejected() {
        let fx = fixture();
        let ack = fx
            .router
            .route_from_web(
                "web-1",
                web_message(json!({
                    "type": "askResponse",
                    "data": {"approval_id": "11111111-1111-1111-1111-111111111111", "approved": true}
                })),
            )
            .await;
        assert_eq!(ack["type"], json!("error"));
        assert_eq!(ack["data"]["message_type"], json!("askResponse"));
        assert!(fx.extension.take().await.is_empty());
    }

    #[tokio::test]
    async fn second_resolution_of_same_approval_fails() {
        let fx = fixture();
        fx.router
            .route_from_extension(
                "web-1",
                extension_message(json!({
                    "type": "ask",
                    "data": {"ask_type": "command", "command": "ls"}
                })),
            )
            .await;
        let to_web = fx.web.take().await;
        let approval_id = to_web[0].1["data"]["approval_id"]
            .as_str()
            .unwrap()
            .to_string();

        let respond = |approved: bool| {
            web_message(json!({
                "type": "askResponse",
                "data": {"approval_id": approval_id.as_str(), "approved": approved}
            }))
        };
        let first = fx.router.route_from_web("web-1", respond(true)).await;
        assert_eq!(first["status"], json!("response_sent"));
        let second = fx.router.route_from_web("web-1", respond(false)).await;
        assert_eq!(second["type"], json!("error"));
        // Exactly one decision reached the extension.
        assert_eq!(fx.extension.take().await.len(), 1);
    }

    #[tokio::test]
    async fn unrecognized_web_type_is_forwarded_as_is() {
        let fx = fixture();
        let ack = fx
            .router
            .route_from_web(
                "web-1",
                web_message(json!({"type": "fooBar", "data": {"x": 1}})),
            )
            .await;
        assert_eq!(ack, json!({"status": "forwarded", "type": "fooBar"}));
        let sent = fx.extension.take().await;
        assert_eq!(sent[0].1, json!({"type": "fooBar", "data": {"x": 1}}));
    }

    #[tokio::test]
    async fn cancel_and_resume_forward_the_task_id() {
        let fx = fixture();
        let ack = fx
            .router
            .route_from_web(
                "web-1",
                web_message(json!({"type": "cancelTask", "data": {"taskId": "t-9"}})),
            )
            .await;
        assert_eq!(ack["status"], json!("task_cancelled"));

        let ack = fx
            .router
            .route_from_web(
                "web-1",
                web_message(json!({"type": "resumeTask", "data": {"taskId": "t-9"}})),
            )
            .await;
        assert_eq!(ack["status"], json!("task_resumed"));

        let sent = fx.extension.take().await;
        assert_eq!(sent[0].1, json!({"type": "cancelTask", "taskId": "t-9"}));
        assert_eq!(sent[1].1, json!({"type": "resumeTask", "taskId": "t-9"}));
    }

    #[tokio::test]
    async fn save_api_configuration_forwards_fixed_field_names() {
        let fx = fixture();
        let ack = fx
            .router
            .route_from_web(
                "web-1",
                web_message(json!({
                    "type": "saveApiConfiguration",
                    "data": {"provider": "openai-compatible", "model": "qwen-3-coder"}
                })),
            )
            .await;
        assert_eq!(ack["status"], json!("config_updated"));
        assert_eq!(ack["provider"], json!("openai-compatible"));

        let sent = fx.extension.take().await;
        let data = &sent[0].1["data"];
        assert_eq!(sent[0].1["type"], json!("saveApiConfiguration"));
        assert_eq!(data["apiProvider"], json!("openai-compatible"));
        assert_eq!(data["apiUrl"], json!("http://localhost:3000/v1"));
        assert_eq!(data["contextLength"], json!(131000));
        for key in [
            "apiProvider",
            "apiModelId",
            "apiKey",
            "apiUrl",
            "maxTokens",
            "temperature",
            "contextLength",
            "topP",
            "topK",
            "customInstructions",
        ] {
            assert!(data.get(key).is_some(), "missing field {key}");
        }
    }

    #[tokio::test]
    async fn say_and_event_become_web_envelopes() {
        let fx = fixture();
        fx.router
            .route_from_extension(
                "web-1",
                extension_message(json!({
                    "type": "say",
                    "data": {"say_type": "reasoning", "text": "thinking"}
                })),
            )
            .await;
        fx.router
            .route_from_extension(
                "web-1",
                extension_message(json!({
                    "type": "event",
                    "data": {"name": "taskCompleted", "data": {"taskId": "t-1"}}
                })),
            )
            .await;

        let sent = fx.web.take().await;
        assert_eq!(sent[0].1["type"], json!("status_update"));
        assert_eq!(sent[0].1["say_type"], json!("reasoning"));
        assert_eq!(sent[0].1["data"]["text"], json!("thinking"));
        assert_eq!(sent[1].1["type"], json!("event"));
        assert_eq!(sent[1].1["event_name"], json!("taskCompleted"));
        assert_eq!(sent[1].1["data"], json!({"taskId": "t-1"}));
    }

    #[tokio::test]
    async fn unrecognized_extension_type_is_forwarded_unchanged() {
        let fx = fixture();
        fx.router
            .route_from_extension(
                "web-1",
                extension_message(json!({"type": "heartbeat", "data": {"seq": 7}})),
            )
            .await;
        let sent = fx.web.take().await;
        assert_eq!(sent[0].1, json!({"type": "heartbeat", "data": {"seq": 7}}));
    }

    #[tokio::test]
    async fn missing_extension_connection_yields_named_error_ack() {
        let fx = fixture_with(RecordingGateway::online(), RecordingGateway::offline());
        let ack = fx
            .router
            .route_from_web(
                "web-7",
                web_message(json!({"type": "newTask", "data": {"prompt": "hi"}})),
            )
            .await;
        assert_eq!(ack["type"], json!("error"));
        assert_eq!(ack["data"]["message_type"], json!("newTask"));
        let reason = ack["data"]["message"].as_str().unwrap();
        assert!(reason.contains("no adapter connected"));
    }
}
