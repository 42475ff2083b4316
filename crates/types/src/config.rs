//! Node-facing configuration (`synod.toml`).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that overrides execution-backend binary discovery.
pub const MODULES_BIN_ENV: &str = "SYNOD_MODULES_BIN";

/// Name of the execution backend binary searched on `PATH` when no override
/// is configured.
pub const MODULES_BIN_NAME: &str = "synod-modules";

/// Configuration for the two execution-backend modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Explicit path to the backend binary. When absent, discovery falls back
    /// to `SYNOD_MODULES_BIN` and then to `PATH`.
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
    /// Directory holding the Lua scripts referenced by generated configs.
    #[serde(default = "default_lua_scripts_dir")]
    pub lua_scripts_dir: PathBuf,
    /// Bind address for the LLM module.
    #[serde(default = "default_llm_bind_address")]
    pub llm_bind_address: String,
    /// WebDriver endpoint the web module forwards fetches through.
    #[serde(default = "default_webdriver_host")]
    pub webdriver_host: String,
    /// Inclusive start of the port range probed for the web module.
    #[serde(default = "default_web_port_start")]
    pub web_port_start: u16,
    /// Exclusive end of the port range probed for the web module.
    #[serde(default = "default_web_port_end")]
    pub web_port_end: u16,
    /// Seconds to wait after SIGINT before escalating to SIGKILL.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Seconds to wait after SIGKILL before abandoning the process.
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
}

fn default_lua_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}
fn default_llm_bind_address() -> String {
    "127.0.0.1:3032".to_string()
}
fn default_webdriver_host() -> String {
    "http://127.0.0.1:4444".to_string()
}
fn default_web_port_start() -> u16 {
    3300
}
fn default_web_port_end() -> u16 {
    3400
}
fn default_stop_grace_secs() -> u64 {
    5
}
fn default_kill_grace_secs() -> u64 {
    2
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            lua_scripts_dir: default_lua_scripts_dir(),
            llm_bind_address: default_llm_bind_address(),
            webdriver_host: default_webdriver_host(),
            web_port_start: default_web_port_start(),
            web_port_end: default_web_port_end(),
            stop_grace_secs: default_stop_grace_secs(),
            kill_grace_secs: default_kill_grace_secs(),
        }
    }
}

/// Configuration for the round and appeal state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Target committee size, leader included. Clamped to the registry size
    /// at selection time.
    #[serde(default = "default_committee_size")]
    pub committee_size: usize,
    /// Maximum number of committee rotations before a transaction lands on
    /// its terminal failure status.
    #[serde(default = "default_max_rotations")]
    pub max_rotations: usize,
}

fn default_committee_size() -> usize {
    5
}
fn default_max_rotations() -> usize {
    3
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            committee_size: default_committee_size(),
            max_rotations: default_max_rotations(),
        }
    }
}

/// Top-level node configuration (`synod.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

impl NodeConfig {
    /// Parses and validates a `synod.toml` document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Validates the configuration for semantic correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.consensus.committee_size == 0 {
            return Err(
                "Configuration Error: 'committee_size' must be greater than 0.".to_string(),
            );
        }
        if self.backends.web_port_start >= self.backends.web_port_end {
            return Err(
                "Configuration Error: 'web_port_start' must be below 'web_port_end'.".to_string(),
            );
        }
        if self.backends.stop_grace_secs == 0 {
            return Err(
                "Configuration Error: 'stop_grace_secs' must be greater than 0.".to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_committee() {
        let mut cfg = NodeConfig::default();
        cfg.consensus.committee_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut cfg = NodeConfig::default();
        cfg.backends.web_port_start = 4000;
        cfg.backends.web_port_end = 3000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg = NodeConfig::from_toml_str(
            r#"
            [consensus]
            committee_size = 7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.consensus.committee_size, 7);
        assert_eq!(cfg.consensus.max_rotations, 3);
        assert_eq!(cfg.backends.llm_bind_address, "127.0.0.1:3032");
    }

    #[test]
    fn loader_rejects_semantically_invalid_toml() {
        let err = NodeConfig::from_toml_str(
            r#"
            [consensus]
            committee_size = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
