//! Host capability registry.
//!
//! The process-wide table of hooks, endpoints and operations contributed by
//! server extensions, and the dispatch side the host application calls into.
//! Changes are applied in batches under one write lock, so a reload that
//! swaps an extension's registrations is never observed half done.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ExtensionError, Result};

/// Handler for a lifecycle event.
pub type HookHandler = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Handler for a mounted endpoint.
pub type EndpointHandler = Arc<dyn Fn(&EndpointRequest) -> Result<Value> + Send + Sync>;

/// Handler for a workflow step.
pub type OperationHandler = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Wrap a closure as a [`HookHandler`].
pub fn hook_fn<F>(f: F) -> HookHandler
where
    F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as an [`EndpointHandler`].
pub fn endpoint_fn<F>(f: F) -> EndpointHandler
where
    F: Fn(&EndpointRequest) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as an [`OperationHandler`].
pub fn operation_fn<F>(f: F) -> OperationHandler
where
    F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Request passed to an endpoint handler.
#[derive(Debug, Clone)]
pub struct EndpointRequest {
    pub method: String,
    /// Path below the extension namespace, starting with `/`.
    pub path: String,
    pub body: Value,
}

/// Identity of one registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistrationKey {
    Hook(String),
    /// `"<METHOD> /<namespace><route>"`
    Endpoint(String),
    Operation(String),
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationKey::Hook(id) => write!(f, "hook {}", id),
            RegistrationKey::Endpoint(route) => write!(f, "endpoint {}", route),
            RegistrationKey::Operation(id) => write!(f, "operation {}", id),
        }
    }
}

/// Key for an endpoint route.
pub fn endpoint_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), path)
}

/// A registration waiting to be applied.
#[derive(Clone)]
pub enum Registration {
    Hook {
        id: String,
        event: String,
        handler: HookHandler,
    },
    Endpoint {
        key: String,
        handler: EndpointHandler,
    },
    Operation {
        id: String,
        handler: OperationHandler,
    },
}

impl Registration {
    pub fn key(&self) -> RegistrationKey {
        match self {
            Registration::Hook { id, .. } => RegistrationKey::Hook(id.clone()),
            Registration::Endpoint { key, .. } => RegistrationKey::Endpoint(key.clone()),
            Registration::Operation { id, .. } => RegistrationKey::Operation(id.clone()),
        }
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Registration({})", self.key())
    }
}

struct HookEntry {
    event: String,
    owner: String,
    handler: HookHandler,
}

struct Owned<H> {
    owner: String,
    handler: H,
}

#[derive(Default)]
struct Registrations {
    hooks: BTreeMap<String, HookEntry>,
    endpoints: BTreeMap<String, Owned<EndpointHandler>>,
    operations: BTreeMap<String, Owned<OperationHandler>>,
}

impl Registrations {
    fn owner(&self, key: &RegistrationKey) -> Option<&str> {
        match key {
            RegistrationKey::Hook(id) => self.hooks.get(id).map(|e| e.owner.as_str()),
            RegistrationKey::Endpoint(k) => self.endpoints.get(k).map(|e| e.owner.as_str()),
            RegistrationKey::Operation(id) => self.operations.get(id).map(|e| e.owner.as_str()),
        }
    }

    fn remove(&mut self, key: &RegistrationKey) -> bool {
        match key {
            RegistrationKey::Hook(id) => self.hooks.remove(id).is_some(),
            RegistrationKey::Endpoint(k) => self.endpoints.remove(k).is_some(),
            RegistrationKey::Operation(id) => self.operations.remove(id).is_some(),
        }
    }

    fn insert(&mut self, owner: &str, registration: Registration) {
        let owner = owner.to_string();
        match registration {
            Registration::Hook { id, event, handler } => {
                self.hooks.insert(id, HookEntry { event, owner, handler });
            }
            Registration::Endpoint { key, handler } => {
                self.endpoints.insert(key, Owned { owner, handler });
            }
            Registration::Operation { id, handler } => {
                self.operations.insert(id, Owned { owner, handler });
            }
        }
    }
}

/// Registry the host dispatches hooks, endpoints and operations from.
#[derive(Default)]
pub struct HostRegistry {
    inner: RwLock<Registrations>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner of `key`, if registered.
    pub fn owner_of(&self, key: &RegistrationKey) -> Option<String> {
        self.inner.read().owner(key).map(str::to_string)
    }

    /// Remove `remove`, then add `add`, as one step.
    ///
    /// Keys in `remove` that are not registered are ignored. If any added key
    /// is still taken after the removals, nothing changes and
    /// `AlreadyRegistered` is returned.
    pub fn apply(
        &self,
        remove: &[RegistrationKey],
        add: Vec<(String, Registration)>,
    ) -> Result<usize> {
        let mut inner = self.inner.write();

        for (owner, registration) in &add {
            let key = registration.key();
            let taken = inner.owner(&key).is_some() && !remove.contains(&key);
            if taken {
                warn!(category = "extensions", extension = %owner, key = %key, "Registration conflict");
                return Err(ExtensionError::AlreadyRegistered(key.to_string()));
            }
        }

        let removed = remove.iter().filter(|key| inner.remove(key)).count();
        let added = add.len();
        for (owner, registration) in add {
            inner.insert(&owner, registration);
        }

        debug!(category = "extensions", removed, added, "Applied registration batch");
        Ok(removed)
    }

    /// Register a single hook owned by the host itself.
    pub fn register_hook(&self, owner: &str, id: &str, event: &str, handler: HookHandler) -> Result<()> {
        self.apply(
            &[],
            vec![(
                owner.to_string(),
                Registration::Hook {
                    id: id.to_string(),
                    event: event.to_string(),
                    handler,
                },
            )],
        )
        .map(|_| ())
    }

    /// Remove the keys in `keys` that `owner` still holds. Missing keys and
    /// keys now held by someone else are left alone. Returns how many were
    /// removed.
    pub fn unregister_owned(&self, owner: &str, keys: &[RegistrationKey]) -> usize {
        let mut inner = self.inner.write();
        let mut removed = 0;
        for key in keys {
            if inner.owner(key) == Some(owner) && inner.remove(key) {
                removed += 1;
            }
        }
        removed
    }

    /// Run every hook subscribed to `event`. Handler errors and panics are
    /// logged, never propagated. Returns how many handlers ran successfully.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let handlers: Vec<(String, String, HookHandler)> = self
            .inner
            .read()
            .hooks
            .iter()
            .filter(|(_, e)| e.event == event)
            .map(|(id, e)| (id.clone(), e.owner.clone(), e.handler.clone()))
            .collect();

        let mut ok = 0;
        for (id, owner, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => {
                    warn!(category = "extensions", extension = %owner, hook = %id, event, error = %e, "Hook failed")
                }
                Err(_) => {
                    warn!(category = "extensions", extension = %owner, hook = %id, event, "Hook panicked")
                }
            }
        }
        ok
    }

    /// Call the endpoint mounted at `path` (`/<namespace>/<route>`).
    pub fn call_endpoint(&self, method: &str, path: &str, body: Value) -> Result<Value> {
        let key = endpoint_key(method, path);
        let handler = self
            .inner
            .read()
            .endpoints
            .get(&key)
            .map(|e| e.handler.clone())
            .ok_or_else(|| ExtensionError::NotFound(key.clone()))?;

        let request = EndpointRequest {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            body,
        };
        catch_unwind(AssertUnwindSafe(|| handler(&request)))
            .unwrap_or_else(|_| Err(ExtensionError::Registration(format!("endpoint {} panicked", key))))
    }

    /// Run the operation registered as `id`.
    pub fn run_operation(&self, id: &str, input: &Value) -> Result<Value> {
        let handler = self
            .inner
            .read()
            .operations
            .get(id)
            .map(|e| e.handler.clone())
            .ok_or_else(|| ExtensionError::NotFound(format!("operation {}", id)))?;

        catch_unwind(AssertUnwindSafe(|| handler(input)))
            .unwrap_or_else(|_| Err(ExtensionError::Registration(format!("operation {} panicked", id))))
    }

    pub fn hook_count(&self) -> usize {
        self.inner.read().hooks.len()
    }

    pub fn hooks_for(&self, event: &str) -> Vec<String> {
        self.inner
            .read()
            .hooks
            .iter()
            .filter(|(_, e)| e.event == event)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn endpoint_routes(&self) -> Vec<String> {
        self.inner.read().endpoints.keys().cloned().collect()
    }
}
