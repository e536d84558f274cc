//! Isolated registration scope for server extensions.
//!
//! An entry point never touches the [`HostRegistry`](super::host::HostRegistry)
//! directly. It receives [`Capabilities`]: three registrar handles that only
//! record what the extension asks for, namespaced to that extension. The
//! loader decides afterwards whether the recorded set is committed or thrown
//! away.

use std::cell::RefCell;
use std::collections::HashSet;

use super::host::{
    endpoint_key, EndpointHandler, HookHandler, OperationHandler, Registration, RegistrationKey,
};
use crate::error::{ExtensionError, Result};

/// Registrations recorded for one extension.
#[derive(Debug, Default)]
struct Staging {
    extension: String,
    registrations: Vec<Registration>,
    keys: HashSet<RegistrationKey>,
    hook_seq: usize,
}

impl Staging {
    fn push(&mut self, registration: Registration) -> Result<()> {
        let key = registration.key();
        if !self.keys.insert(key.clone()) {
            return Err(ExtensionError::AlreadyRegistered(key.to_string()));
        }
        self.registrations.push(registration);
        Ok(())
    }
}

/// Execution scope for one extension's entry point.
pub struct Sandbox {
    staging: RefCell<Staging>,
}

impl Sandbox {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            staging: RefCell::new(Staging {
                extension: extension.into(),
                ..Staging::default()
            }),
        }
    }

    pub fn extension(&self) -> String {
        self.staging.borrow().extension.clone()
    }

    /// The capability handles handed to the entry point.
    pub fn capabilities(&self) -> Capabilities<'_> {
        Capabilities {
            hooks: HookRegistrar { staging: &self.staging },
            endpoints: EndpointRegistrar { staging: &self.staging },
            operations: OperationRegistrar { staging: &self.staging },
        }
    }

    /// Number of registrations recorded so far.
    pub fn recorded(&self) -> usize {
        self.staging.borrow().registrations.len()
    }

    /// Consume the sandbox and return what was recorded.
    pub fn into_registrations(self) -> Vec<Registration> {
        self.staging.into_inner().registrations
    }
}

/// The three handles an entry point may use.
pub struct Capabilities<'a> {
    pub hooks: HookRegistrar<'a>,
    pub endpoints: EndpointRegistrar<'a>,
    pub operations: OperationRegistrar<'a>,
}

/// Subscribes handlers to lifecycle events.
pub struct HookRegistrar<'a> {
    staging: &'a RefCell<Staging>,
}

impl HookRegistrar<'_> {
    /// Subscribe `handler` to `event`. Returns the hook id.
    pub fn register(&self, event: &str, handler: HookHandler) -> Result<String> {
        if event.trim().is_empty() {
            return Err(ExtensionError::Registration("hook event name is empty".to_string()));
        }
        let mut staging = self.staging.borrow_mut();
        let id = format!("{}:{}:{}", staging.extension, event, staging.hook_seq);
        staging.hook_seq += 1;
        staging.push(Registration::Hook {
            id: id.clone(),
            event: event.to_string(),
            handler,
        })?;
        Ok(id)
    }
}

/// Mounts routes under `/<extension-name>`.
pub struct EndpointRegistrar<'a> {
    staging: &'a RefCell<Staging>,
}

impl EndpointRegistrar<'_> {
    /// Mount `handler` at `route` (relative, starting with `/`). Returns the
    /// full route key, e.g. `GET /my-ext/items`.
    pub fn register(&self, method: &str, route: &str, handler: EndpointHandler) -> Result<String> {
        let method = method.to_ascii_uppercase();
        if !matches!(method.as_str(), "GET" | "POST" | "PUT" | "PATCH" | "DELETE") {
            return Err(ExtensionError::Registration(format!(
                "unsupported method '{}'",
                method
            )));
        }
        if !route.starts_with('/') || route.contains("..") {
            return Err(ExtensionError::Registration(format!(
                "route '{}' must be an absolute path below the extension namespace",
                route
            )));
        }

        let mut staging = self.staging.borrow_mut();
        let route = route.trim_end_matches('/');
        let path = format!("/{}{}", staging.extension, route);
        let key = endpoint_key(&method, &path);
        staging.push(Registration::Endpoint {
            key: key.clone(),
            handler,
        })?;
        Ok(key)
    }
}

/// Registers named workflow steps.
pub struct OperationRegistrar<'a> {
    staging: &'a RefCell<Staging>,
}

impl OperationRegistrar<'_> {
    /// Register `handler` as operation `id`. Returns the id.
    pub fn register(&self, id: &str, handler: OperationHandler) -> Result<String> {
        if id.trim().is_empty() {
            return Err(ExtensionError::Registration("operation id is empty".to_string()));
        }
        self.staging.borrow_mut().push(Registration::Operation {
            id: id.to_string(),
            handler,
        })?;
        Ok(id.to_string())
    }
}
