//! Validator identities, provider configuration, and snapshot structures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// The stable, unique identifier for a validator. Addresses are compared by
/// value everywhere; two `Validator` objects with the same address are the
/// same validator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

/// Plugin kind accepted by the execution backend's allowlist. A `custom`
/// provider is masqueraded as this before its config is handed to the backend.
pub const OPENAI_COMPATIBLE_PLUGIN: &str = "openai-compatible";

/// Plugin kind that triggers the masquerade.
pub const CUSTOM_PLUGIN: &str = "custom";

/// Plugin-specific configuration carried alongside a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Name of the environment variable holding the provider API key. The key
    /// itself never appears in any config structure; backends resolve it via
    /// `${ENV[..]}` interpolation.
    pub api_key_env_var: String,
    /// Endpoint URL for the provider, when it is not the plugin default.
    #[serde(default)]
    pub api_url: Option<String>,
}

/// An LLM provider configuration attached to a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmProvider {
    /// Provider class, e.g. "openai", "anthropic", or a custom deployment name.
    pub provider: String,
    /// Model name requested from the provider.
    pub model: String,
    /// Arbitrary provider knobs (temperature, max tokens, capability flags).
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
    /// Plugin kind the execution backend should use to talk to the provider.
    pub plugin: String,
    pub plugin_config: PluginConfig,
}

impl LlmProvider {
    /// Reads a boolean capability flag out of the free-form config map.
    pub fn config_flag(&self, key: &str) -> bool {
        self.config
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// The identity unit of a committee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    /// Non-negative sampling weight. Zero-stake validators exist in the
    /// registry but are excluded from the selection distribution entirely.
    pub stake: u64,
    pub provider: LlmProvider,
}

/// The real provider wiring preserved through the custom-plugin masquerade,
/// so that downstream consumers can still see what is actually being called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomPluginData {
    pub plugin: String,
    pub api_url: Option<String>,
    pub model: String,
}

/// Per-validator execution host data materialized into a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostData {
    /// Caller-facing backend identifier, always `node-<address>`. Unique
    /// within a snapshot by construction.
    pub studio_llm_id: String,
    pub address: Address,
    /// Canned response wiring for test setups.
    #[serde(default)]
    pub mock_response: Option<serde_json::Value>,
    /// Present iff the provider went through the custom-plugin rewrite.
    #[serde(default)]
    pub custom_plugin_data: Option<CustomPluginData>,
    /// Backend id of the diversity fallback, recomputed on every rebuild.
    #[serde(default)]
    pub fallback_llm_id: Option<String>,
}

/// Derives the caller-facing backend identifier for a validator.
pub fn studio_llm_id(address: &Address) -> String {
    format!("node-{}", address)
}

/// One validator paired with its execution host data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub validator: Validator,
    pub host_data: HostData,
}

/// The materialized, point-in-time mapping from validator identity to
/// execution-backend wiring. Immutable once built; a rebuild always produces
/// a fresh value that fully replaces the cached one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    /// The LLM backend config file that was in effect when this snapshot was
    /// built.
    pub llm_config_path: PathBuf,
}

impl ValidatorSnapshot {
    pub fn validators(&self) -> Vec<Validator> {
        self.nodes.iter().map(|n| n.validator.clone()).collect()
    }

    pub fn node(&self, address: &Address) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| &n.validator.address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> LlmProvider {
        LlmProvider {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            config: BTreeMap::new(),
            plugin: "openai".into(),
            plugin_config: PluginConfig {
                api_key_env_var: "OPENAI_API_KEY".into(),
                api_url: None,
            },
        }
    }

    #[test]
    fn studio_llm_id_is_derived_from_address() {
        let addr = Address::from("0xabc");
        assert_eq!(studio_llm_id(&addr), "node-0xabc");
    }

    #[test]
    fn config_flag_defaults_to_false() {
        let mut p = provider();
        assert!(!p.config_flag("supports_json"));
        p.config
            .insert("supports_json".into(), serde_json::Value::Bool(true));
        assert!(p.config_flag("supports_json"));
    }
}
