use serde::{Deserialize, Serialize};

/// Catalog entry for a known model provider. Defined once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub models: Vec<String>,
    pub default_max_tokens: u32,
    pub default_temperature: f64,
    pub supports_vision: bool,
    pub max_context: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_base_url: Option<String>,
}

impl ProviderProfile {
    /// The model filled in when a configuration names the provider but no model.
    pub fn default_model(&self) -> &str {
        self.models.first().map(String::as_str).unwrap_or_default()
    }
}

/// The subset of a profile exposed over the listing APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub models: Vec<String>,
    pub supports_vision: bool,
    pub max_context: u64,
}

/// Partial configuration as supplied by a web client. Unknown fields in the
/// source map (e.g. the task prompt riding alongside) are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettingsInput {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub context_length: Option<u64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub custom_instructions: Option<String>,
}

/// Finalized per-client provider configuration. Replaced wholesale on each
/// reconfiguration; never merged field-by-field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub context_length: u64,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub custom_instructions: Option<String>,
}

impl ProviderSettings {
    pub fn to_api_configuration(&self) -> ApiConfiguration {
        ApiConfiguration {
            api_provider: self.provider.clone(),
            api_model_id: self.model.clone(),
            api_key: self.api_key.clone(),
            api_url: self.base_url.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            context_length: self.context_length,
            top_p: self.top_p,
            top_k: self.top_k,
            custom_instructions: self.custom_instructions.clone(),
        }
    }
}

/// Payload of the `saveApiConfiguration` message. The field names are fixed
/// by the extension-side contract; every field is always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfiguration {
    pub api_provider: String,
    pub api_model_id: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub context_length: u64,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub custom_instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_configuration_uses_extension_field_names() {
        let settings = ProviderSettings {
            provider: "anthropic".to_string(),
            model: "claude-3-sonnet".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
            context_length: 200000,
            top_p: None,
            top_k: None,
            custom_instructions: None,
        };
        let value = serde_json::to_value(settings.to_api_configuration()).unwrap();
        assert_eq!(value["apiProvider"], json!("anthropic"));
        assert_eq!(value["apiModelId"], json!("claude-3-sonnet"));
        assert_eq!(value["maxTokens"], json!(4096));
        assert_eq!(value["contextLength"], json!(200000));
        // Unset optionals still appear, as null.
        assert!(value.as_object().unwrap().contains_key("apiKey"));
        assert!(value.as_object().unwrap().contains_key("topP"));
    }

    #[test]
    fn settings_input_ignores_unrelated_fields() {
        let input: ProviderSettingsInput = serde_json::from_value(json!({
            "prompt": "write a test",
            "provider": "openai",
            "temperature": 0.2
        }))
        .unwrap();
        assert_eq!(input.provider.as_deref(), Some("openai"));
        assert_eq!(input.temperature, Some(0.2));
        assert!(input.model.is_none());
    }
}
