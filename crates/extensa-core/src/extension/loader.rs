//! Server extension loader.
//!
//! Loading is split in two. [`ServerLoader::stage`] runs every entry point
//! inside its own [`Sandbox`] and collects the registrations without touching
//! the host. [`ServerLoader::commit`] then swaps the previous set for the
//! staged one with a single [`HostRegistry::apply`].

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::host::{HostRegistry, Registration, RegistrationKey};
use super::runtime::{DeclarativeRuntime, EntryRuntime};
use super::sandbox::Sandbox;
use super::state::ServerExtensionSummary;
use super::types::ExtensionDescriptor;
use crate::error::{ExtensionError, ExtensionWarning, Result, WarningStage};

/// A server extension whose registrations are live in the host.
#[derive(Debug, Clone)]
pub struct LoadedServerExtension {
    pub descriptor: ExtensionDescriptor,
    pub registered_hook_ids: Vec<String>,
    pub registered_endpoint_routes: Vec<String>,
    pub registered_operation_ids: Vec<String>,
}

impl LoadedServerExtension {
    fn from_registrations(descriptor: ExtensionDescriptor, registrations: &[Registration]) -> Self {
        let mut loaded = Self {
            descriptor,
            registered_hook_ids: Vec::new(),
            registered_endpoint_routes: Vec::new(),
            registered_operation_ids: Vec::new(),
        };
        for registration in registrations {
            match registration.key() {
                RegistrationKey::Hook(id) => loaded.registered_hook_ids.push(id),
                RegistrationKey::Endpoint(route) => loaded.registered_endpoint_routes.push(route),
                RegistrationKey::Operation(id) => loaded.registered_operation_ids.push(id),
            }
        }
        loaded
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Every key this extension owns in the host.
    pub fn keys(&self) -> Vec<RegistrationKey> {
        self.registered_hook_ids
            .iter()
            .cloned()
            .map(RegistrationKey::Hook)
            .chain(self.registered_endpoint_routes.iter().cloned().map(RegistrationKey::Endpoint))
            .chain(self.registered_operation_ids.iter().cloned().map(RegistrationKey::Operation))
            .collect()
    }

    pub fn summary(&self) -> ServerExtensionSummary {
        ServerExtensionSummary {
            name: self.descriptor.name.clone(),
            hooks: self.registered_hook_ids.clone(),
            endpoints: self.registered_endpoint_routes.clone(),
            operations: self.registered_operation_ids.clone(),
        }
    }
}

/// Registrations prepared by [`ServerLoader::stage`], not yet visible.
#[derive(Debug, Default)]
pub struct StagedLoad {
    extensions: Vec<(LoadedServerExtension, Vec<Registration>)>,
    warnings: Vec<ExtensionWarning>,
}

impl StagedLoad {
    pub fn warnings(&self) -> &[ExtensionWarning] {
        &self.warnings
    }

    pub fn names(&self) -> Vec<&str> {
        self.extensions.iter().map(|(loaded, _)| loaded.name()).collect()
    }
}

/// Result of [`ServerLoader::load`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<LoadedServerExtension>,
    pub warnings: Vec<ExtensionWarning>,
}

pub struct ServerLoader {
    host: Arc<HostRegistry>,
    runtimes: Vec<Arc<dyn EntryRuntime>>,
    active: Mutex<Vec<LoadedServerExtension>>,
}

impl ServerLoader {
    /// Loader with the declarative runtime installed.
    pub fn new(host: Arc<HostRegistry>) -> Self {
        Self {
            host,
            runtimes: vec![Arc::new(DeclarativeRuntime)],
            active: Mutex::new(Vec::new()),
        }
    }

    /// Add a runtime. Runtimes are tried in insertion order.
    pub fn with_runtime(mut self, runtime: Arc<dyn EntryRuntime>) -> Self {
        self.runtimes.push(runtime);
        self
    }

    pub fn host(&self) -> &Arc<HostRegistry> {
        &self.host
    }

    /// Extensions whose registrations are currently live.
    pub fn active(&self) -> Vec<LoadedServerExtension> {
        self.active.lock().clone()
    }

    pub fn summaries(&self) -> Vec<ServerExtensionSummary> {
        self.active.lock().iter().map(LoadedServerExtension::summary).collect()
    }

    fn runtime_for(&self, entry: &Path) -> Option<&Arc<dyn EntryRuntime>> {
        self.runtimes.iter().find(|r| r.supports(entry))
    }

    /// Run the entry points of every enabled api unit in `descriptors`.
    ///
    /// A unit that errors, panics or collides with another unit's keys is
    /// dropped with a warning, and none of its registrations are kept. Only
    /// cancellation fails the whole stage.
    pub fn stage(&self, descriptors: &[ExtensionDescriptor], cancel: &CancelToken) -> Result<StagedLoad> {
        let outgoing: HashSet<String> = self.active.lock().iter().map(|l| l.name().to_string()).collect();
        let mut claimed: HashSet<RegistrationKey> = HashSet::new();
        let mut staged = StagedLoad::default();

        for unit in descriptors.iter().flat_map(ExtensionDescriptor::api_units) {
            cancel.check()?;

            let registrations = match self.run_entry(unit) {
                Ok(registrations) => registrations,
                Err(e) => {
                    warn!(category = "extensions", extension = %unit.name, error = %e, "Server extension failed to register");
                    staged
                        .warnings
                        .push(ExtensionWarning::new(&unit.name, WarningStage::Register, e));
                    continue;
                }
            };

            let conflict = registrations.iter().map(Registration::key).find(|key| {
                claimed.contains(key)
                    || self
                        .host
                        .owner_of(key)
                        .is_some_and(|owner| !outgoing.contains(&owner))
            });
            if let Some(key) = conflict {
                warn!(category = "extensions", extension = %unit.name, key = %key, "Registration conflict");
                staged.warnings.push(ExtensionWarning::new(
                    &unit.name,
                    WarningStage::Register,
                    format!("{} is already registered", key),
                ));
                continue;
            }

            claimed.extend(registrations.iter().map(Registration::key));
            let loaded = LoadedServerExtension::from_registrations(unit.clone(), &registrations);
            debug!(
                category = "extensions",
                extension = %unit.name,
                hooks = loaded.registered_hook_ids.len(),
                endpoints = loaded.registered_endpoint_routes.len(),
                operations = loaded.registered_operation_ids.len(),
                "Staged server extension"
            );
            staged.extensions.push((loaded, registrations));
        }

        Ok(staged)
    }

    fn run_entry(&self, unit: &ExtensionDescriptor) -> Result<Vec<Registration>> {
        let entry = unit
            .entry_paths
            .api
            .as_deref()
            .ok_or_else(|| ExtensionError::Registration("no api entry".to_string()))?;
        let runtime = self.runtime_for(entry).ok_or_else(|| {
            ExtensionError::Registration(format!("no runtime can execute {}", entry.display()))
        })?;

        let sandbox = Sandbox::new(&unit.name);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            runtime.register(unit, entry, &sandbox.capabilities())
        }));
        match outcome {
            Ok(Ok(())) => Ok(sandbox.into_registrations()),
            Ok(Err(e)) => {
                debug!(category = "extensions", extension = %unit.name, discarded = sandbox.recorded(), "Rolled back partial registrations");
                Err(e)
            }
            Err(_) => Err(ExtensionError::Registration(format!(
                "entry point panicked ({} runtime)",
                runtime.name()
            ))),
        }
    }

    /// Replace the active set with `staged` in one host update.
    ///
    /// On failure the host and the active set are unchanged.
    pub fn commit(&self, staged: StagedLoad) -> Result<Vec<ServerExtensionSummary>> {
        let mut active = self.active.lock();
        let remove: Vec<RegistrationKey> = active.iter().flat_map(LoadedServerExtension::keys).collect();

        let mut loaded = Vec::with_capacity(staged.extensions.len());
        let mut add = Vec::new();
        for (extension, registrations) in staged.extensions {
            add.extend(registrations.into_iter().map(|r| (extension.name().to_string(), r)));
            loaded.push(extension);
        }

        self.host
            .apply(&remove, add)
            .map_err(|e| ExtensionError::Swap(e.to_string()))?;

        info!(
            category = "extensions",
            previous = active.len(),
            loaded = loaded.len(),
            "Server extensions swapped"
        );
        *active = loaded;
        Ok(active.iter().map(LoadedServerExtension::summary).collect())
    }

    /// Stage and commit in one call.
    pub fn load(&self, descriptors: &[ExtensionDescriptor]) -> Result<LoadReport> {
        let staged = self.stage(descriptors, &CancelToken::new())?;
        let warnings = staged.warnings.clone();
        self.commit(staged)?;
        Ok(LoadReport {
            loaded: self.active(),
            warnings,
        })
    }

    /// Remove every registration recorded for `loaded` that it still owns.
    /// Keys already gone or handed to another extension are untouched, so
    /// calling it again is a no-op. Returns how many keys were removed.
    pub fn unload(&self, loaded: &LoadedServerExtension) -> usize {
        let mut active = self.active.lock();
        let removed = self.host.unregister_owned(loaded.name(), &loaded.keys());
        active.retain(|l| l.name() != loaded.name());
        if removed > 0 {
            info!(category = "extensions", extension = %loaded.name(), removed, "Server extension unloaded");
        }
        removed
    }

    /// Unload everything. Used on shutdown.
    pub fn unload_all(&self) -> usize {
        let mut active = self.active.lock();
        active
            .drain(..)
            .map(|loaded| self.host.unregister_owned(loaded.name(), &loaded.keys()))
            .sum()
    }
}
