use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Message from a web client to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebviewMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Raw attachment entries; each is validated individually when routed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Value>,
}

/// Message from the editor extension to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Semantic subtype of an approval request coming off the extension.
///
/// The extension-side vocabulary grows faster than this list; anything
/// unrecognized is carried verbatim in `Other` rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskKind {
    Followup,
    Command,
    Tool,
    Other(String),
}

impl AskKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "followup" => AskKind::Followup,
            "command" => AskKind::Command,
            "tool" => AskKind::Tool,
            other => AskKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AskKind::Followup => "followup",
            AskKind::Command => "command",
            AskKind::Tool => "tool",
            AskKind::Other(raw) => raw,
        }
    }
}

impl fmt::Display for AskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AskKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AskKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(AskKind::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Base64,
    Url,
    Path,
}

/// Attachment entry on a `newTask` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    #[serde(rename = "type")]
    pub source: ImageSource,
    pub data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn webview_message_defaults_data_and_images() {
        let msg: WebviewMessage = serde_json::from_value(json!({"type": "newTask"})).unwrap();
        assert_eq!(msg.kind, "newTask");
        assert!(msg.data.is_empty());
        assert!(msg.images.is_empty());
    }

    #[test]
    fn ask_kind_round_trips_unknown_subtypes() {
        let kind = AskKind::parse("browser_action_launch");
        assert_eq!(kind, AskKind::Other("browser_action_launch".to_string()));
        assert_eq!(kind.as_str(), "browser_action_launch");

        let known: AskKind = serde_json::from_value(json!("command")).unwrap();
        assert_eq!(known, AskKind::Command);
        assert_eq!(serde_json::to_value(&known).unwrap(), json!("command"));
    }

    #[test]
    fn image_attachment_rejects_missing_fields() {
        let malformed = json!({"type": "base64", "data": "aGk="});
        assert!(serde_json::from_value::<ImageAttachment>(malformed).is_err());

        let ok = json!({"type": "url", "data": "https://example.com/a.png", "mime_type": "image/png"});
        let img: ImageAttachment = serde_json::from_value(ok).unwrap();
        assert_eq!(img.source, ImageSource::Url);
    }
}
