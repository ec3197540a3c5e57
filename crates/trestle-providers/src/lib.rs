use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use trestle_types::{ProviderProfile, ProviderSettings, ProviderSettingsInput, ProviderSummary};

/// Provider used when a configuration names no provider, or an unknown one is
/// requested through the default path.
pub const FALLBACK_PROVIDER: &str = "openai-compatible";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Static catalog of known providers plus the per-client active
/// configuration store. The profile table never changes after construction;
/// active configs are replaced wholesale on each reconfiguration.
#[derive(Clone)]
pub struct ProviderCatalog {
    profiles: Arc<BTreeMap<String, ProviderProfile>>,
    active: Arc<RwLock<HashMap<String, ProviderSettings>>>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self {
            profiles: Arc::new(builtin_profiles()),
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn list_providers(&self) -> BTreeMap<String, ProviderSummary> {
        self.profiles
            .iter()
            .map(|(name, profile)| {
                (
                    name.clone(),
                    ProviderSummary {
                        models: profile.models.clone(),
                        supports_vision: profile.supports_vision,
                        max_context: profile.max_context,
                    },
                )
            })
            .collect()
    }

    /// Known models for a provider. Unknown providers yield an empty list
    /// rather than an error.
    pub fn get_models(&self, provider: &str) -> Vec<String> {
        self.profiles
            .get(provider)
            .map(|profile| profile.models.clone())
            .unwrap_or_default()
    }

    /// Default configuration for `provider`, falling back to
    /// [`FALLBACK_PROVIDER`] when it is omitted or unknown.
    pub fn default_config(&self, provider: Option<&str>) -> ProviderSettings {
        let name = provider
            .filter(|name| self.profiles.contains_key(*name))
            .unwrap_or(FALLBACK_PROVIDER);
        let profile = &self.profiles[name];
        ProviderSettings {
            provider: name.to_string(),
            model: profile.default_model().to_string(),
            api_key: None,
            base_url: profile.default_base_url.clone(),
            max_tokens: profile.default_max_tokens,
            temperature: profile.default_temperature,
            context_length: profile.max_context,
            top_p: None,
            top_k: None,
            custom_instructions: None,
        }
    }

    /// Fill in profile defaults, sanity-check the result, and store it as the
    /// client's active configuration.
    ///
    /// Unknown models and oversized context lengths are warnings, not errors:
    /// providers ship models faster than the static catalog tracks them. Only
    /// an unknown provider name is fatal, and in that case the client's
    /// previous configuration is left in place.
    pub async fn fill_defaults_and_validate(
        &self,
        client_id: &str,
        input: ProviderSettingsInput,
    ) -> Result<ProviderSettings, CatalogError> {
        let name = input.provider.clone().unwrap_or_default();
        let profile = self
            .profiles
            .get(&name)
            .ok_or_else(|| CatalogError::UnknownProvider(name.clone()))?;

        if let Some(model) = input.model.as_deref() {
            if !profile.models.iter().any(|known| known == model) {
                tracing::warn!(
                    provider = %name,
                    model = %model,
                    "model not in known models for provider, allowing anyway"
                );
            }
        }

        let settings = ProviderSettings {
            model: input
                .model
                .unwrap_or_else(|| profile.default_model().to_string()),
            api_key: input.api_key,
            base_url: input
                .base_url
                .or_else(|| profile.default_base_url.clone()),
            max_tokens: input.max_tokens.unwrap_or(profile.default_max_tokens),
            temperature: input.temperature.unwrap_or(profile.default_temperature),
            context_length: input.context_length.unwrap_or(profile.max_context),
            top_p: input.top_p,
            top_k: input.top_k,
            custom_instructions: input.custom_instructions,
            provider: name.clone(),
        };

        if settings.context_length > profile.max_context {
            tracing::warn!(
                provider = %name,
                context_length = settings.context_length,
                max_context = profile.max_context,
                "context length exceeds provider maximum"
            );
        }

        self.active
            .write()
            .await
            .insert(client_id.to_string(), settings.clone());
        tracing::info!(client_id = %client_id, provider = %name, model = %settings.model, "provider configuration updated");
        Ok(settings)
    }

    /// Structural pre-check on a raw configuration map. Returns `false`
    /// instead of failing, for use before committing a change.
    pub fn validate(&self, raw: &Value) -> bool {
        let Some(map) = raw.as_object() else {
            return false;
        };
        let Some(provider) = map.get("provider").and_then(Value::as_str) else {
            return false;
        };
        if !map.contains_key("model") {
            return false;
        }
        let Some(profile) = self.profiles.get(provider) else {
            return false;
        };
        if let Some(max_tokens) = map.get("max_tokens") {
            match max_tokens.as_f64() {
                Some(value) if value > 0.0 => {}
                _ => return false,
            }
        }
        if let Some(temperature) = map.get("temperature") {
            match temperature.as_f64() {
                Some(value) if (0.0..=2.0).contains(&value) => {}
                _ => return false,
            }
        }
        if let Some(context_length) = map.get("context_length").and_then(Value::as_u64) {
            if context_length > profile.max_context {
                tracing::warn!(
                    provider = %provider,
                    context_length,
                    max_context = profile.max_context,
                    "context length exceeds provider maximum"
                );
            }
        }
        true
    }

    /// The client's current active configuration, if it has set one.
    pub async fn get_provider(&self, client_id: &str) -> Option<ProviderSettings> {
        self.active.read().await.get(client_id).cloned()
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn profile(
    models: &[&str],
    default_max_tokens: u32,
    supports_vision: bool,
    max_context: u64,
    default_base_url: Option<&str>,
) -> ProviderProfile {
    ProviderProfile {
        models: models.iter().map(|m| m.to_string()).collect(),
        default_max_tokens,
        default_temperature: 0.7,
        supports_vision,
        max_context,
        default_base_url: default_base_url.map(str::to_string),
    }
}

fn builtin_profiles() -> BTreeMap<String, ProviderProfile> {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "anthropic".to_string(),
        profile(
            &[
                "claude-3-opus",
                "claude-3-sonnet",
                "claude-3-haiku",
                "claude-2.1",
                "claude-2",
            ],
            4096,
            true,
            200000,
            None,
        ),
    );
    profiles.insert(
        "openai".to_string(),
        profile(
            &["gpt-4-turbo", "gpt-4", "gpt-3.5-turbo", "gpt-4-vision-preview"],
            4096,
            true,
            128000,
            None,
        ),
    );
    profiles.insert(
        "gemini".to_string(),
        profile(
            &["gemini-pro", "gemini-pro-vision", "gemini-1.5-pro"],
            8192,
            true,
            1000000,
            None,
        ),
    );
    profiles.insert(
        "ollama".to_string(),
        profile(
            &["llama2", "codellama", "mistral", "mixtral", "deepseek-coder"],
            4096,
            false,
            32000,
            None,
        ),
    );
    profiles.insert(
        "azure".to_string(),
        profile(&["gpt-4", "gpt-35-turbo"], 4096, false, 32000, None),
    );
    profiles.insert(
        "openai-compatible".to_string(),
        profile(
            &[
                "qwen-3-coder",
                "qwen-2.5-coder",
                "deepseek-coder",
                "codellama",
                "custom",
            ],
            4096,
            false,
            131000,
            Some("http://localhost:3000/v1"),
        ),
    );
    profiles
}
