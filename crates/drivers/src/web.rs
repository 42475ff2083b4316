//! The web-fetch backend module. Unlike the LLM module it owns ephemeral
//! port selection: the previously bound port may have been taken by another
//! process between starts, so availability is re-probed before each restart.

use crate::process::ModuleProcess;
use crate::resolver::BinaryResolver;
use crate::{BackendSet, ExecutionModule};
use async_trait::async_trait;
use serde::Serialize;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use synod_types::config::BackendsConfig;
use synod_types::error::ModuleError;
use uuid::Uuid;

#[derive(Serialize)]
struct WebFileConfig {
    webdriver_host: String,
    bind_address: String,
    lua_script_path: String,
}

pub(crate) fn render_web_config(
    webdriver_host: &str,
    bind_address: &str,
    lua_script_path: &Path,
) -> Result<String, ModuleError> {
    let file = WebFileConfig {
        webdriver_host: webdriver_host.to_string(),
        bind_address: bind_address.to_string(),
        lua_script_path: lua_script_path.display().to_string(),
    };
    serde_yaml::to_string(&file).map_err(|e| ModuleError::ConfigRender(e.to_string()))
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Probes the configured range for a free TCP bind, falling back to an
/// OS-assigned ephemeral port when the range is exhausted.
pub(crate) fn find_free_port(start: u16, end: u16) -> Result<u16, ModuleError> {
    for port in start..end {
        if port_is_free(port) {
            return Ok(port);
        }
    }
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .map_err(|_| ModuleError::NoFreePort("web".to_string()))?;
    let port = listener
        .local_addr()
        .map_err(|_| ModuleError::NoFreePort("web".to_string()))?
        .port();
    Ok(port)
}

struct Inner {
    process: ModuleProcess,
    port: u16,
}

/// Supervisor for the web-fetch worker process.
pub struct WebModule {
    inner: Mutex<Inner>,
    resolver: BinaryResolver,
    config_path: PathBuf,
    webdriver_host: String,
    lua_script_path: PathBuf,
    port_range: (u16, u16),
    terminated: AtomicBool,
}

impl WebModule {
    pub async fn new(
        resolver: BinaryResolver,
        cfg: &BackendsConfig,
    ) -> Result<Self, ModuleError> {
        let config_path =
            std::env::temp_dir().join(format!("synod-web-{}.yaml", Uuid::new_v4()));
        let lua_script_path = cfg.lua_scripts_dir.join("web.lua");
        let port = find_free_port(cfg.web_port_start, cfg.web_port_end)?;
        let rendered = render_web_config(
            &cfg.webdriver_host,
            &format!("127.0.0.1:{}", port),
            &lua_script_path,
        )?;
        tokio::fs::write(&config_path, rendered).await?;
        Ok(Self {
            inner: Mutex::new(Inner {
                process: ModuleProcess::new(
                    "web",
                    Duration::from_secs(cfg.stop_grace_secs),
                    Duration::from_secs(cfg.kill_grace_secs),
                ),
                port,
            }),
            resolver,
            config_path,
            webdriver_host: cfg.webdriver_host.clone(),
            lua_script_path,
            port_range: (cfg.web_port_start, cfg.web_port_end),
            terminated: AtomicBool::new(false),
        })
    }

    /// The port the module was last configured to bind.
    pub async fn port(&self) -> u16 {
        self.inner.lock().await.port
    }

    async fn restart_locked(&self, inner: &mut Inner) -> Result<(), ModuleError> {
        inner.process.stop().await;
        // The port may have been taken by another process between starts.
        if !port_is_free(inner.port) {
            let fresh = find_free_port(self.port_range.0, self.port_range.1)?;
            tracing::info!(
                target: "drivers",
                module = "web",
                old_port = inner.port,
                new_port = fresh,
                "previously bound port taken; rebinding"
            );
            inner.port = fresh;
        }
        let rendered = render_web_config(
            &self.webdriver_host,
            &format!("127.0.0.1:{}", inner.port),
            &self.lua_script_path,
        )?;
        tokio::fs::write(&self.config_path, rendered).await?;
        let mut cmd = Command::new(self.resolver.path());
        cmd.arg("web")
            .arg("--config")
            .arg(&self.config_path)
            .arg("--die-with-parent");
        inner.process.spawn(cmd).await
    }
}

#[async_trait]
impl ExecutionModule for WebModule {
    async fn verify_for_read(&self) -> Result<(), ModuleError> {
        let mut inner = self.inner.lock().await;
        if !inner.process.is_running() {
            tracing::debug!(target: "drivers", module = "web", "dead on read verification; restarting");
            self.restart_locked(&mut inner).await?;
        }
        Ok(())
    }

    async fn restart(&self) -> Result<(), ModuleError> {
        let mut inner = self.inner.lock().await;
        self.restart_locked(&mut inner).await
    }

    async fn change_config(&self, _backends: BackendSet) -> Result<(), ModuleError> {
        // The web module carries no per-provider wiring; a committee change
        // only needs a restart against the current config.
        let mut inner = self.inner.lock().await;
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

impl Drop for WebModule {
    fn drop(&mut self) {
        if !self.terminated.load(Ordering::SeqCst) {
            log::debug!("WebModule dropped without terminate(); config file leaked");
            let _ = std::fs::remove_file(&self.config_path);
        }
    }
}
