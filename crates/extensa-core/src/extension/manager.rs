//! The extension manager facade.
//!
//! Wires the scanner, bundler, build cache, server loader, coordinator and
//! watcher together and exposes the read side the delivery layer needs.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::bundler::{Bundler, Compiler, ModuleCompiler};
use super::cache::BuildCache;
use super::coordinator::{CoordinatorStatus, CycleOutcome, ReloadCoordinator, ReloadPipeline};
use super::host::HostRegistry;
use super::loader::ServerLoader;
use super::runtime::EntryRuntime;
use super::state::{Generation, ManagerState};
use super::types::{BuiltPayload, ExtensionMetadata, TypeTag};
use super::watcher::ExtensionWatcher;
use crate::config::ManagerConfig;
use crate::error::Result;

/// Builder for [`ExtensionManager`].
pub struct ExtensionManagerBuilder {
    config: ManagerConfig,
    compiler: Arc<dyn Compiler>,
    host: Option<Arc<HostRegistry>>,
    runtimes: Vec<Arc<dyn EntryRuntime>>,
}

impl ExtensionManagerBuilder {
    /// Replace the default [`ModuleCompiler`].
    pub fn compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = compiler;
        self
    }

    /// Share an existing host registry instead of creating one.
    pub fn host(mut self, host: Arc<HostRegistry>) -> Self {
        self.host = Some(host);
        self
    }

    /// Install an extra entry-point runtime.
    pub fn runtime(mut self, runtime: Arc<dyn EntryRuntime>) -> Self {
        self.runtimes.push(runtime);
        self
    }

    /// Validate the configuration and spawn the coordinator. Must be called
    /// inside a tokio runtime. No reload runs until [`ExtensionManager::start`]
    /// or [`ExtensionManager::reload`].
    pub fn build(self) -> Result<ExtensionManager> {
        self.config.validate()?;

        let state = Arc::new(ManagerState::new());
        let cache = Arc::new(BuildCache::new(state.clone()));
        let host = self.host.unwrap_or_default();
        let loader = Arc::new(
            self.runtimes
                .into_iter()
                .fold(ServerLoader::new(host.clone()), ServerLoader::with_runtime),
        );
        let bundler = Bundler::new(self.compiler).with_max_payload_bytes(self.config.max_payload_bytes);

        let pipeline = ReloadPipeline::new(
            self.config.clone(),
            state.clone(),
            cache.clone(),
            bundler,
            loader.clone(),
        );
        let coordinator = ReloadCoordinator::spawn(pipeline);

        Ok(ExtensionManager {
            config: self.config,
            state,
            cache,
            host,
            loader,
            coordinator,
            watcher: Mutex::new(None),
        })
    }
}

pub struct ExtensionManager {
    config: ManagerConfig,
    state: Arc<ManagerState>,
    cache: Arc<BuildCache>,
    host: Arc<HostRegistry>,
    loader: Arc<ServerLoader>,
    coordinator: ReloadCoordinator,
    watcher: Mutex<Option<ExtensionWatcher>>,
}

impl ExtensionManager {
    pub fn builder(config: ManagerConfig) -> ExtensionManagerBuilder {
        ExtensionManagerBuilder {
            config,
            compiler: Arc::new(ModuleCompiler),
            host: None,
            runtimes: Vec::new(),
        }
    }

    /// Run the first reload and, if configured, start watching.
    ///
    /// A failed first cycle is returned in the outcome, not as an error: the
    /// manager keeps running and delivery answers 404 until a cycle succeeds.
    pub async fn start(&self) -> Result<CycleOutcome> {
        let outcome = self.coordinator.reload().await?;
        if self.config.auto_reload {
            let watcher = ExtensionWatcher::start(&self.config.paths, self.coordinator.trigger_sender())?;
            *self.watcher.lock() = Some(watcher);
        }
        Ok(outcome)
    }

    /// Request a reload and wait for its outcome.
    pub async fn reload(&self) -> Result<CycleOutcome> {
        self.coordinator.reload().await
    }

    /// Stop watching, stop the coordinator, unload every server extension
    /// and clear the published state.
    pub async fn shutdown(&self) {
        self.watcher.lock().take();
        self.coordinator.shutdown().await;
        let removed = self.loader.unload_all();
        self.state.publish(Generation::empty());
        info!(category = "extensions", removed, "Extension manager shut down");
    }

    /// Enabled extensions of an app type.
    pub fn extensions_list(&self, tag: TypeTag) -> Vec<ExtensionMetadata> {
        self.state.current().extensions_list(tag)
    }

    /// Published payload for an app type, if any.
    pub fn app_extension_source(&self, tag: TypeTag) -> Option<Arc<BuiltPayload>> {
        self.cache.get(tag)
    }

    pub fn generation(&self) -> Arc<Generation> {
        self.state.current()
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.coordinator.status()
    }

    pub fn host(&self) -> &Arc<HostRegistry> {
        &self.host
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }
}
