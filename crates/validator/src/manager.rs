//! The validator manager: owns the snapshot cache and the reader/writer
//! coordination between registry mutations and the execution backends.
//!
//! Invariant: the cache is emptied for the duration of any rebuild, so a
//! reader racing a write blocks on the lock instead of observing a
//! half-updated snapshot. Readers always receive a value copy, never a
//! reference into the live cache.

use crate::pool::ValidatorPool;
use crate::store::ValidatorStore;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use synod_drivers::{BackendEntry, BackendSet, ExecutionModule};
use synod_types::error::{StoreError, ValidatorError};
use synod_types::validator::{
    studio_llm_id, CustomPluginData, HostData, NodeSnapshot, Validator, ValidatorSnapshot,
    CUSTOM_PLUGIN, OPENAI_COMPATIBLE_PLUGIN,
};

/// Writes the held snapshot back into the cache slot on drop. Holding the
/// saved snapshot here instead of a local keeps the cache consistent even
/// when a temporal scope panics.
struct CacheRestore<'a> {
    slot: &'a mut Option<ValidatorSnapshot>,
    saved: Option<ValidatorSnapshot>,
}

impl Drop for CacheRestore<'_> {
    fn drop(&mut self) {
        *self.slot = self.saved.take();
    }
}

pub struct ValidatorManager {
    store: Arc<dyn ValidatorStore>,
    llm: Arc<dyn ExecutionModule>,
    web: Arc<dyn ExecutionModule>,
    cache: RwLock<Option<ValidatorSnapshot>>,
    terminated: AtomicBool,
}

impl ValidatorManager {
    pub fn new(
        store: Arc<dyn ValidatorStore>,
        llm: Arc<dyn ExecutionModule>,
        web: Arc<dyn ExecutionModule>,
    ) -> Self {
        Self {
            store,
            llm,
            web,
            cache: RwLock::new(None),
            terminated: AtomicBool::new(false),
        }
    }

    /// Materializes host data for a validator list. Fallback wiring is
    /// recomputed on every build since the viable fallback pool may have
    /// changed with the registry.
    fn build_snapshot(&self, validators: &[Validator]) -> ValidatorSnapshot {
        let wire_fallbacks = validators.len() > 1;
        let nodes = validators
            .iter()
            .map(|v| {
                let is_custom = v.provider.plugin == CUSTOM_PLUGIN;
                let host_data = HostData {
                    studio_llm_id: studio_llm_id(&v.address),
                    address: v.address.clone(),
                    mock_response: v.provider.config.get("mock_response").cloned(),
                    custom_plugin_data: is_custom.then(|| CustomPluginData {
                        plugin: v.provider.plugin.clone(),
                        api_url: v.provider.plugin_config.api_url.clone(),
                        model: v.provider.model.clone(),
                    }),
                    fallback_llm_id: if wire_fallbacks {
                        ValidatorPool::select_fallback(v, validators)
                            .map(|fb| studio_llm_id(&fb.address))
                    } else {
                        None
                    },
                };
                NodeSnapshot {
                    validator: v.clone(),
                    host_data,
                }
            })
            .collect();
        ValidatorSnapshot {
            nodes,
            llm_config_path: self.llm.config_path().to_path_buf(),
        }
    }

    /// Derives the backend wiring handed to the LLM module. The masquerade
    /// rewrites the outward plugin only; key env var, model, and config
    /// reach the backend untouched.
    fn backend_set(snapshot: &ValidatorSnapshot) -> BackendSet {
        snapshot
            .nodes
            .iter()
            .map(|n| {
                let v = &n.validator;
                let plugin = if v.provider.plugin == CUSTOM_PLUGIN {
                    OPENAI_COMPATIBLE_PLUGIN.to_string()
                } else {
                    v.provider.plugin.clone()
                };
                (
                    n.host_data.studio_llm_id.clone(),
                    BackendEntry {
                        host: v.provider.plugin_config.api_url.clone().unwrap_or_default(),
                        plugin,
                        key_env_var: v.provider.plugin_config.api_key_env_var.clone(),
                        model: v.provider.model.clone(),
                        supports_json: v.provider.config_flag("supports_json"),
                        supports_image: v.provider.config_flag("supports_image"),
                    },
                )
            })
            .collect()
    }

    async fn wire(&self, snapshot: &ValidatorSnapshot) -> Result<(), ValidatorError> {
        let set = Self::backend_set(snapshot);
        self.llm.change_config(set).await?;
        self.web.change_config(BackendSet::new()).await?;
        Ok(())
    }

    async fn wire_empty(&self) -> Result<(), ValidatorError> {
        self.llm.change_config(BackendSet::new()).await?;
        self.web.change_config(BackendSet::new()).await?;
        Ok(())
    }

    /// Rebuilds the snapshot from the current registry and pushes it to both
    /// backends. Caller must hold the writer lock with the cache emptied.
    async fn rebuild_locked(
        &self,
        guard: &mut Option<ValidatorSnapshot>,
    ) -> Result<(), ValidatorError> {
        let validators = self.store.list().await?;
        let snapshot = self.build_snapshot(&validators);
        self.wire(&snapshot).await?;
        tracing::debug!(
            target: "validator",
            nodes = snapshot.nodes.len(),
            "snapshot rebuilt"
        );
        *guard = Some(snapshot);
        Ok(())
    }

    /// Writer-exclusive: restarts both backend modules unconditionally, then
    /// rebuilds the snapshot and wires it in.
    pub async fn restart(&self) -> Result<(), ValidatorError> {
        let mut guard = self.cache.write().await;
        guard.take();
        self.llm.restart().await?;
        self.web.restart().await?;
        self.rebuild_locked(&mut guard).await
    }

    /// Reader-shared: verifies both backends are live, then hands out a deep
    /// copy of the cached snapshot.
    pub async fn snapshot(&self) -> Result<ValidatorSnapshot, ValidatorError> {
        let guard = self.cache.read().await;
        self.llm.verify_for_read().await?;
        self.web.verify_for_read().await?;
        guard.clone().ok_or(ValidatorError::SnapshotUnavailable)
    }

    /// Writer-exclusive scoped block around a registry mutation. The
    /// mutation is applied first; the snapshot is then unconditionally
    /// rebuilt from the now-current registry before the lock is released,
    /// so no reader ever observes a registry change without the matching
    /// snapshot update.
    pub async fn do_write<F, Fut, R>(&self, mutation: F) -> Result<R, ValidatorError>
    where
        F: FnOnce(Arc<dyn ValidatorStore>) -> Fut + Send,
        Fut: Future<Output = Result<R, StoreError>> + Send,
        R: Send,
    {
        let mut guard = self.cache.write().await;
        guard.take();
        let out = mutation(self.store.clone()).await;
        let rebuilt = self.rebuild_locked(&mut guard).await;
        match (out, rebuilt) {
            (Ok(r), Ok(())) => Ok(r),
            (Err(e), rebuilt) => {
                if let Err(re) = rebuilt {
                    tracing::warn!(
                        target: "validator",
                        error = %re,
                        "snapshot rebuild failed after failed mutation"
                    );
                }
                Err(e.into())
            }
            (Ok(_), Err(re)) => Err(re),
        }
    }

    /// Writer-exclusive transient committee substitution, used when an
    /// appeal rotates in a different committee. The backends are wired to a
    /// one-off snapshot for the duration of `scope`; the original cached
    /// snapshot and wiring are restored on every exit path, including a
    /// failing scope body.
    pub async fn temporal_snapshot<F, Fut, R>(
        &self,
        validators: Vec<Validator>,
        scope: F,
    ) -> Result<R, ValidatorError>
    where
        F: FnOnce(ValidatorSnapshot) -> Fut + Send,
        Fut: Future<Output = R> + Send,
        R: Send,
    {
        let mut guard = self.cache.write().await;
        let saved = guard.take();
        // The guard puts the saved snapshot back on every exit path, panics
        // out of `scope` included. Backend wiring cannot be replayed from a
        // destructor, so after a panic the temporal wiring stays in place
        // until the next rebuild.
        let restore = CacheRestore {
            slot: &mut *guard,
            saved,
        };
        let temp = self.build_snapshot(&validators);
        if let Err(e) = self.wire(&temp).await {
            let rewire = match &restore.saved {
                Some(snap) => self.wire(snap).await,
                None => self.wire_empty().await,
            };
            if let Err(re) = rewire {
                tracing::warn!(target: "validator", error = %re, "failed to restore wiring after temporal setup failure");
            }
            return Err(e);
        }
        let out = scope(temp).await;
        let rewire = match &restore.saved {
            Some(snap) => self.wire(snap).await,
            None => self.wire_empty().await,
        };
        drop(restore);
        rewire?;
        Ok(out)
    }

    /// Idempotent; stops both backends and releases their config files.
    pub async fn terminate(&self) -> Result<(), ValidatorError> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.llm.terminate().await?;
        self.web.terminate().await?;
        Ok(())
    }
}

impl Drop for ValidatorManager {
    fn drop(&mut self) {
        if !self.terminated.load(Ordering::SeqCst) {
            log::debug!("ValidatorManager dropped without terminate(); backend modules leaked");
        }
    }
}
