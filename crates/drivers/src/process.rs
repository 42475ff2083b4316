//! Wrapper around one OS-level worker process with a fixed stop escalation:
//! SIGINT, bounded wait, SIGKILL, bounded wait, then proceed regardless.

use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use synod_types::error::ModuleError;

/// At most one live process per wrapper at any time.
pub struct ModuleProcess {
    name: &'static str,
    child: Option<Child>,
    terminated: bool,
    stop_grace: Duration,
    kill_grace: Duration,
}

impl ModuleProcess {
    pub fn new(name: &'static str, stop_grace: Duration, kill_grace: Duration) -> Self {
        Self {
            name,
            child: None,
            terminated: false,
            stop_grace,
            kill_grace,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spawns a fresh process. Any previous process must have been stopped
    /// first; a lingering handle is stopped defensively before spawning.
    pub async fn spawn(&mut self, mut cmd: Command) -> Result<(), ModuleError> {
        if self.child.is_some() {
            self.stop().await;
        }
        let child = cmd
            .spawn()
            .map_err(|e| ModuleError::Spawn(self.name.to_string(), e.to_string()))?;
        tracing::info!(
            target: "drivers",
            module = self.name,
            pid = child.id(),
            "module process started"
        );
        self.child = Some(child);
        Ok(())
    }

    /// True while a process is attached and has not exited. A process that
    /// has exited on its own counts as dead and collapses to stopped here.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Idempotent stop. Fast path returns if no process is attached or it has
    /// already exited; otherwise SIGINT, wait, SIGKILL, wait, and the handle
    /// is cleared unconditionally regardless of outcome.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!(
                target: "drivers",
                module = self.name,
                %status,
                "module process already exited"
            );
            return;
        }
        if let Some(pid) = child.id() {
            // SIGINT is the backend's documented graceful-shutdown signal.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if rc != 0 {
                tracing::warn!(
                    target: "drivers",
                    module = self.name,
                    pid,
                    "failed to deliver SIGINT"
                );
            }
        }
        if timeout(self.stop_grace, child.wait()).await.is_ok() {
            return;
        }
        tracing::warn!(
            target: "drivers",
            module = self.name,
            "module ignored SIGINT; escalating to SIGKILL"
        );
        let _ = child.start_kill();
        if timeout(self.kill_grace, child.wait()).await.is_err() {
            tracing::warn!(
                target: "drivers",
                module = self.name,
                "module survived SIGKILL; abandoning handle"
            );
        }
    }

    /// Marks the wrapper as deliberately finished, silencing the drop-time
    /// leak signal.
    pub fn mark_terminated(&mut self) {
        self.terminated = true;
    }
}

impl Drop for ModuleProcess {
    fn drop(&mut self) {
        if !self.terminated && self.child.is_some() {
            log::debug!(
                "ModuleProcess '{}' dropped without terminate(); child process leaked",
                self.name
            );
        }
    }
}
