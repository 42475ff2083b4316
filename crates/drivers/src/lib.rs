#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]
//! Lifecycle management for the two long-lived execution-backend worker
//! processes (LLM dispatch and web fetch). Each module owns one OS process,
//! its bind address, and its generated config file.

pub mod llm;
pub mod process;
pub mod resolver;
pub mod web;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use synod_types::error::ModuleError;

/// One backend wired into the LLM module, keyed by its caller-facing id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendEntry {
    /// Endpoint the backend should talk to.
    pub host: String,
    /// Plugin kind, already past the custom-plugin rewrite; must satisfy the
    /// backend binary's supported-plugin allowlist.
    pub plugin: String,
    /// Environment variable the backend resolves the API key from.
    pub key_env_var: String,
    pub model: String,
    pub supports_json: bool,
    pub supports_image: bool,
}

/// The full provider wiring for one live validator-set configuration.
pub type BackendSet = BTreeMap<String, BackendEntry>;

/// The seam the validator manager holds its two modules behind.
///
/// `change_config` is always invoked with the manager's writer lock held, so
/// no locking beyond what `restart` already does is required of implementers.
#[async_trait]
pub trait ExecutionModule: Send + Sync {
    /// Mandatory call-before-read guard: restarts the module if its process
    /// is stopped or dead. No component may read a snapshot without it.
    async fn verify_for_read(&self) -> Result<(), ModuleError>;

    /// Stops any existing process, rewrites the config file, and spawns a
    /// fresh process. Serialized against concurrent restarts internally.
    async fn restart(&self) -> Result<(), ModuleError>;

    /// Stop, rewrite the config with the given provider set, restart.
    async fn change_config(&self, backends: BackendSet) -> Result<(), ModuleError>;

    /// Idempotent; safe to call when no process is running.
    async fn stop(&self) -> Result<(), ModuleError>;

    /// Stops the process and releases the config-file resource. The only
    /// path that marks the module done; dropping without it is a leak.
    async fn terminate(&self) -> Result<(), ModuleError>;

    /// Path of the generated config file owned by this module.
    fn config_path(&self) -> &Path;
}
