//! Entry-point runtimes for server extensions.
//!
//! A runtime knows how to execute one kind of api entry and turn it into
//! registrations on the [`Capabilities`] it is handed. Two ship with the
//! crate: [`DeclarativeRuntime`] for JSON entry files and [`BuiltinRuntime`]
//! for registration functions compiled into the host.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::host::{endpoint_fn, hook_fn, operation_fn, EndpointHandler, HookHandler, OperationHandler};
use super::sandbox::Capabilities;
use super::scanner::BUILTIN_PREFIX;
use super::types::ExtensionDescriptor;
use crate::error::{ExtensionError, Result};

/// Executes an api entry point.
pub trait EntryRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this runtime can execute `entry`.
    fn supports(&self, entry: &Path) -> bool;

    /// Run the entry point of `unit`, registering through `caps`.
    fn register(&self, unit: &ExtensionDescriptor, entry: &Path, caps: &Capabilities<'_>) -> Result<()>;
}

/// Built-in behaviour a declarative registration is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Log the input at info level.
    Log,
    /// Return the input unchanged.
    Echo,
    /// Return a fixed JSON value.
    Respond(Value),
    /// Fail with the given message.
    Fail(String),
}

impl Action {
    fn run(&self, extension: &str, input: &Value) -> Result<Value> {
        match self {
            Action::Log => {
                info!(category = "extensions", extension, input = %input, "Extension action");
                Ok(input.clone())
            }
            Action::Echo => Ok(input.clone()),
            Action::Respond(value) => Ok(value.clone()),
            Action::Fail(message) => Err(ExtensionError::Registration(format!("{}: {}", extension, message))),
        }
    }

    fn hook(self, extension: String) -> HookHandler {
        hook_fn(move |payload| self.run(&extension, payload).map(|_| ()))
    }

    fn endpoint(self, extension: String) -> EndpointHandler {
        endpoint_fn(move |request| self.run(&extension, &request.body))
    }

    fn operation(self, extension: String) -> OperationHandler {
        operation_fn(move |input| self.run(&extension, input))
    }
}

#[derive(Debug, Deserialize)]
struct HookSpec {
    event: String,
    action: Action,
}

#[derive(Debug, Deserialize)]
struct EndpointSpec {
    #[serde(default = "default_method")]
    method: String,
    path: String,
    action: Action,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Deserialize)]
struct OperationSpec {
    id: String,
    action: Action,
}

/// Contents of a JSON api entry file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeclarativeEntry {
    #[serde(default)]
    hooks: Vec<HookSpec>,
    #[serde(default)]
    endpoints: Vec<EndpointSpec>,
    #[serde(default)]
    operations: Vec<OperationSpec>,
    /// Raised after the registrations above, as a failing entry point would.
    #[serde(default)]
    error: Option<String>,
}

/// Runs `.json` entry files.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarativeRuntime;

impl EntryRuntime for DeclarativeRuntime {
    fn name(&self) -> &str {
        "declarative"
    }

    fn supports(&self, entry: &Path) -> bool {
        entry.extension().is_some_and(|ext| ext == "json")
    }

    fn register(&self, unit: &ExtensionDescriptor, entry: &Path, caps: &Capabilities<'_>) -> Result<()> {
        let content = fs::read_to_string(entry)?;
        let spec: DeclarativeEntry = serde_json::from_str(&content)
            .map_err(|e| ExtensionError::Registration(format!("{}: {}", entry.display(), e)))?;

        for hook in spec.hooks {
            caps.hooks.register(&hook.event, hook.action.hook(unit.name.clone()))?;
        }
        for endpoint in spec.endpoints {
            caps.endpoints
                .register(&endpoint.method, &endpoint.path, endpoint.action.endpoint(unit.name.clone()))?;
        }
        for operation in spec.operations {
            caps.operations
                .register(&operation.id, operation.action.operation(unit.name.clone()))?;
        }

        match spec.error {
            Some(message) => Err(ExtensionError::Registration(message)),
            None => Ok(()),
        }
    }
}

type BuiltinEntry = Arc<dyn Fn(&ExtensionDescriptor, &Capabilities<'_>) -> Result<()> + Send + Sync>;

/// Runs `builtin:<name>` entries against registration functions known to the
/// host.
#[derive(Default, Clone)]
pub struct BuiltinRuntime {
    entries: HashMap<String, BuiltinEntry>,
}

impl BuiltinRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `f` available as `builtin:<name>`.
    pub fn with_entry<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ExtensionDescriptor, &Capabilities<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(f));
        self
    }

    pub fn entry_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn entry_name(entry: &Path) -> Option<&str> {
        entry.to_str()?.strip_prefix(BUILTIN_PREFIX)
    }
}

impl fmt::Debug for BuiltinRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinRuntime")
            .field("entries", &self.entry_names())
            .finish()
    }
}

impl EntryRuntime for BuiltinRuntime {
    fn name(&self) -> &str {
        "builtin"
    }

    fn supports(&self, entry: &Path) -> bool {
        Self::entry_name(entry).is_some()
    }

    fn register(&self, unit: &ExtensionDescriptor, entry: &Path, caps: &Capabilities<'_>) -> Result<()> {
        let name = Self::entry_name(entry).unwrap_or_default();
        let f = self
            .entries
            .get(name)
            .ok_or_else(|| ExtensionError::NotFound(format!("builtin entry '{}'", name)))?;
        f(unit, caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::sandbox::Sandbox;
    use crate::extension::types::TypeTag;
    use serde_json::json;
    use tempfile::TempDir;

    fn unit(name: &str) -> ExtensionDescriptor {
        ExtensionDescriptor::new(name, TypeTag::Endpoint, "/ext")
    }

    #[test]
    fn test_action_forms() {
        let actions: Vec<Action> =
            serde_json::from_value(json!(["log", "echo", { "respond": { "ok": true } }, { "fail": "nope" }])).unwrap();
        assert_eq!(actions[0], Action::Log);
        assert_eq!(actions[2].run("x", &json!(1)).unwrap(), json!({ "ok": true }));
        assert_eq!(actions[1].run("x", &json!(1)).unwrap(), json!(1));
        assert!(actions[3].run("x", &json!(1)).is_err());
    }

    #[test]
    fn test_declarative_registers_everything() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("index.json");
        fs::write(
            &entry,
            json!({
                "hooks": [{ "event": "items.create", "action": "log" }],
                "endpoints": [{ "path": "/ping", "action": { "respond": "pong" } }],
                "operations": [{ "id": "double-check", "action": "echo" }]
            })
            .to_string(),
        )
        .unwrap();

        let runtime = DeclarativeRuntime;
        assert!(runtime.supports(&entry));
        assert!(!runtime.supports(Path::new("builtin:x")));

        let sandbox = Sandbox::new("pinger");
        runtime.register(&unit("pinger"), &entry, &sandbox.capabilities()).unwrap();
        let keys: Vec<String> = sandbox.into_registrations().iter().map(|r| r.key().to_string()).collect();
        assert_eq!(
            keys,
            vec!["hook pinger:items.create:0", "endpoint GET /pinger/ping", "operation double-check"]
        );
    }

    #[test]
    fn test_declarative_error_after_partial_registration() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("index.json");
        fs::write(
            &entry,
            json!({ "operations": [{ "id": "half", "action": "echo" }], "error": "init failed" }).to_string(),
        )
        .unwrap();

        let sandbox = Sandbox::new("broken");
        let result = DeclarativeRuntime.register(&unit("broken"), &entry, &sandbox.capabilities());
        assert!(result.is_err());
        assert_eq!(sandbox.recorded(), 1);
    }

    #[test]
    fn test_declarative_rejects_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("index.json");
        fs::write(&entry, r#"{ "routes": [] }"#).unwrap();

        let sandbox = Sandbox::new("odd");
        assert!(DeclarativeRuntime.register(&unit("odd"), &entry, &sandbox.capabilities()).is_err());
    }

    #[test]
    fn test_builtin_dispatch() {
        let runtime = BuiltinRuntime::new().with_entry("audit", |unit, caps| {
            caps.hooks.register("items.update", Action::Log.hook(unit.name.clone()))?;
            Ok(())
        });
        assert!(runtime.supports(Path::new("builtin:audit")));
        assert!(!runtime.supports(Path::new("index.json")));

        let sandbox = Sandbox::new("audit");
        runtime
            .register(&unit("audit"), Path::new("builtin:audit"), &sandbox.capabilities())
            .unwrap();
        assert_eq!(sandbox.recorded(), 1);

        let missing = runtime.register(&unit("audit"), Path::new("builtin:ghost"), &Sandbox::new("g").capabilities());
        assert!(matches!(missing, Err(ExtensionError::NotFound(_))));
    }
}
