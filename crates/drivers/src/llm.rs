//! The LLM-dispatch backend module.

use crate::process::ModuleProcess;
use crate::resolver::BinaryResolver;
use crate::{BackendSet, ExecutionModule};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use synod_types::config::BackendsConfig;
use synod_types::error::{ConfigError, ModuleError};
use uuid::Uuid;

#[derive(Serialize)]
struct LlmFileModel {
    supports_json: bool,
    supports_image: bool,
}

#[derive(Serialize)]
struct LlmFileBackend {
    host: String,
    provider: String,
    key: String,
    models: BTreeMap<String, LlmFileModel>,
}

#[derive(Serialize)]
struct LlmFileConfig {
    lua_script_path: String,
    backends: BTreeMap<String, LlmFileBackend>,
    bind_address: String,
}

/// Renders the YAML config consumed by `<backend> llm --config <path>`.
/// Every wired backend's key env var must be present; the backend binary
/// resolves `${ENV[..]}` references at startup and an absent variable would
/// only fail there, long after the misconfiguration happened.
pub(crate) fn render_llm_config(
    lua_script_path: &Path,
    bind_address: &str,
    backends: &BackendSet,
) -> Result<String, ModuleError> {
    for entry in backends.values() {
        if std::env::var(&entry.key_env_var).is_err() {
            return Err(ModuleError::Config(ConfigError::MissingEnv(
                entry.key_env_var.clone(),
            )));
        }
    }
    let file = LlmFileConfig {
        lua_script_path: lua_script_path.display().to_string(),
        backends: backends
            .iter()
            .map(|(id, entry)| {
                let mut models = BTreeMap::new();
                models.insert(
                    entry.model.clone(),
                    LlmFileModel {
                        supports_json: entry.supports_json,
                        supports_image: entry.supports_image,
                    },
                );
                (
                    id.clone(),
                    LlmFileBackend {
                        host: entry.host.clone(),
                        provider: entry.plugin.clone(),
                        key: format!("${{ENV[{}]}}", entry.key_env_var),
                        models,
                    },
                )
            })
            .collect(),
        bind_address: bind_address.to_string(),
    };
    serde_yaml::to_string(&file).map_err(|e| ModuleError::ConfigRender(e.to_string()))
}

struct Inner {
    process: ModuleProcess,
    backends: BackendSet,
}

/// Supervisor for the LLM-dispatch worker process.
pub struct LlmModule {
    inner: Mutex<Inner>,
    resolver: BinaryResolver,
    config_path: PathBuf,
    bind_address: String,
    lua_script_path: PathBuf,
    terminated: AtomicBool,
}

impl LlmModule {
    /// Allocates the config-file resource and writes an initial empty config.
    /// Does not spawn a process yet; the first `restart` or `verify_for_read`
    /// does.
    pub async fn new(
        resolver: BinaryResolver,
        cfg: &BackendsConfig,
    ) -> Result<Self, ModuleError> {
        let config_path =
            std::env::temp_dir().join(format!("synod-llm-{}.yaml", Uuid::new_v4()));
        let lua_script_path = cfg.lua_scripts_dir.join("llm.lua");
        let rendered =
            render_llm_config(&lua_script_path, &cfg.llm_bind_address, &BackendSet::new())?;
        tokio::fs::write(&config_path, rendered).await?;
        Ok(Self {
            inner: Mutex::new(Inner {
                process: ModuleProcess::new(
                    "llm",
                    Duration::from_secs(cfg.stop_grace_secs),
                    Duration::from_secs(cfg.kill_grace_secs),
                ),
                backends: BackendSet::new(),
            }),
            resolver,
            config_path,
            bind_address: cfg.llm_bind_address.clone(),
            lua_script_path,
            terminated: AtomicBool::new(false),
        })
    }

    async fn restart_locked(&self, inner: &mut Inner) -> Result<(), ModuleError> {
        inner.process.stop().await;
        let rendered =
            render_llm_config(&self.lua_script_path, &self.bind_address, &inner.backends)?;
        tokio::fs::write(&self.config_path, rendered).await?;
        let mut cmd = Command::new(self.resolver.path());
        cmd.arg("llm")
            .arg("--config")
            .arg(&self.config_path)
            .arg("--allow-empty-backends")
            .arg("--die-with-parent");
        inner.process.spawn(cmd).await
    }

    /// Snapshot of the currently wired backend set.
    pub async fn backends(&self) -> BackendSet {
        self.inner.lock().await.backends.clone()
    }
}

#[async_trait]
impl ExecutionModule for LlmModule {
    async fn verify_for_read(&self) -> Result<(), ModuleError> {
        let mut inner = self.inner.lock().await;
        if !inner.process.is_running() {
            tracing::debug!(target: "drivers", module = "llm", "dead on read verification; restarting");
            self.restart_locked(&mut inner).await?;
        }
        Ok(())
    }

    async fn restart(&self) -> Result<(), ModuleError> {
        let mut inner = self.inner.lock().await;
        self.restart_locked(&mut inner).await
    }

    async fn change_config(&self, backends: BackendSet) -> Result<(), ModuleError> {
        let mut inner = self.inner.lock().await;
        inner.process.stop().await;
        inner.backends = backends;
        self.restart_locked(&mut inner).await
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        let mut inner = self.inner.lock().await;
        inner.process.stop().await;
        Ok(())
    }

    async fn terminate(&self) -> Result<(), ModuleError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner.process.stop().await;
        inner.process.mark_terminated();
        match tokio::fs::remove_file(&self.config_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn config_path(&self) -> &Path {
        &self.config_path
    }
}

impl Drop for LlmModule {
    fn drop(&mut self) {
        if !self.terminated.load(Ordering::SeqCst) {
            log::debug!("LlmModule dropped without terminate(); config file leaked");
            let _ = std::fs::remove_file(&self.config_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackendEntry;

    fn sample_set(key_env_var: &str) -> BackendSet {
        let mut set = BackendSet::new();
        set.insert(
            "node-0xabc".to_string(),
            BackendEntry {
                host: "https://api.openai.com".to_string(),
                plugin: "openai".to_string(),
                key_env_var: key_env_var.to_string(),
                model: "gpt-4o".to_string(),
                supports_json: true,
                supports_image: false,
            },
        );
        set
    }

    #[test]
    fn rendered_config_matches_backend_file_shape() {
        std::env::set_var("SYNOD_TEST_RENDER_KEY", "sk-test");
        let rendered = render_llm_config(
            Path::new("scripts/llm.lua"),
            "127.0.0.1:3032",
            &sample_set("SYNOD_TEST_RENDER_KEY"),
        )
        .unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(value["bind_address"], "127.0.0.1:3032");
        assert_eq!(value["lua_script_path"], "scripts/llm.lua");
        let backend = &value["backends"]["node-0xabc"];
        assert_eq!(backend["provider"], "openai");
        assert_eq!(backend["key"], "${ENV[SYNOD_TEST_RENDER_KEY]}");
        assert_eq!(backend["models"]["gpt-4o"]["supports_json"], true);
        assert_eq!(backend["models"]["gpt-4o"]["supports_image"], false);
    }

    #[test]
    fn unset_key_env_var_fails_the_render() {
        let err = render_llm_config(
            Path::new("scripts/llm.lua"),
            "127.0.0.1:3032",
            &sample_set("SYNOD_TEST_KEY_THAT_IS_NEVER_SET"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ModuleError::Config(ConfigError::MissingEnv(var)) if var == "SYNOD_TEST_KEY_THAT_IS_NEVER_SET"
        ));
    }

    #[test]
    fn empty_backend_set_still_renders() {
        let rendered =
            render_llm_config(Path::new("scripts/llm.lua"), "127.0.0.1:3032", &BackendSet::new())
                .unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert!(value["backends"].as_mapping().unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_writes_initial_config_and_terminate_unlinks_it() {
        let bin = tempfile::NamedTempFile::new().unwrap();
        let resolver = BinaryResolver::resolve(Some(bin.path())).unwrap();
        let module = LlmModule::new(resolver, &BackendsConfig::default())
            .await
            .unwrap();
        let path = module.config_path().to_path_buf();
        assert!(path.exists());
        module.terminate().await.unwrap();
        assert!(!path.exists());
        // terminate is idempotent
        module.terminate().await.unwrap();
    }
}
