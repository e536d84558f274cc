//! Extension type definitions.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ExtensionError, ExtensionWarning};

// ============================================================================
// Type tags
// ============================================================================

/// Declared capability type of an extension package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Interface,
    Display,
    Layout,
    Module,
    Panel,
    Theme,
    Hook,
    Endpoint,
    Operation,
    Bundle,
}

impl TypeTag {
    /// Every tag, in declaration order.
    pub const ALL: [TypeTag; 10] = [
        TypeTag::Interface,
        TypeTag::Display,
        TypeTag::Layout,
        TypeTag::Module,
        TypeTag::Panel,
        TypeTag::Theme,
        TypeTag::Hook,
        TypeTag::Endpoint,
        TypeTag::Operation,
        TypeTag::Bundle,
    ];

    /// Tags that run in the client application and get a payload.
    pub const APP: [TypeTag; 6] = [
        TypeTag::Interface,
        TypeTag::Display,
        TypeTag::Layout,
        TypeTag::Module,
        TypeTag::Panel,
        TypeTag::Theme,
    ];

    /// Tags that run inside the server process.
    pub const API: [TypeTag; 3] = [TypeTag::Hook, TypeTag::Endpoint, TypeTag::Operation];

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Interface => "interface",
            TypeTag::Display => "display",
            TypeTag::Layout => "layout",
            TypeTag::Module => "module",
            TypeTag::Panel => "panel",
            TypeTag::Theme => "theme",
            TypeTag::Hook => "hook",
            TypeTag::Endpoint => "endpoint",
            TypeTag::Operation => "operation",
            TypeTag::Bundle => "bundle",
        }
    }

    /// Plural form used in URLs and local directory layouts.
    pub fn plural(&self) -> &'static str {
        match self {
            TypeTag::Interface => "interfaces",
            TypeTag::Display => "displays",
            TypeTag::Layout => "layouts",
            TypeTag::Module => "modules",
            TypeTag::Panel => "panels",
            TypeTag::Theme => "themes",
            TypeTag::Hook => "hooks",
            TypeTag::Endpoint => "endpoints",
            TypeTag::Operation => "operations",
            TypeTag::Bundle => "bundles",
        }
    }

    /// Resolve a plural form (`"displays"`) back to its tag.
    pub fn from_plural(plural: &str) -> Option<TypeTag> {
        Self::ALL.into_iter().find(|t| t.plural() == plural)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TypeTag {
    type Err = ExtensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ExtensionError::UnknownType(s.to_string()))
    }
}

/// Where an extension's code executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionClass {
    /// Client application only.
    App,
    /// Server process only.
    Api,
    /// Both sides.
    Hybrid,
}

impl ExecutionClass {
    pub fn includes_app(&self) -> bool {
        matches!(self, ExecutionClass::App | ExecutionClass::Hybrid)
    }

    pub fn includes_api(&self) -> bool {
        matches!(self, ExecutionClass::Api | ExecutionClass::Hybrid)
    }

    /// Smallest class covering both `self` and `other`.
    pub fn union(self, other: ExecutionClass) -> ExecutionClass {
        if self == other {
            self
        } else {
            ExecutionClass::Hybrid
        }
    }
}

impl fmt::Display for ExecutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionClass::App => "app",
            ExecutionClass::Api => "api",
            ExecutionClass::Hybrid => "hybrid",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Entry points of an extension, resolved to absolute paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<PathBuf>,
}

/// How an extension was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionSource {
    /// A package directory with an `extension.toml` manifest.
    Package,
    /// A `<root>/<type-plural>/<name>/` directory without manifest.
    Local,
}

/// Presentation metadata passed through to the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A discovered extension package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    /// Unique name across the active set.
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    pub execution_class: ExecutionClass,
    pub entry_paths: EntryPaths,
    pub enabled: bool,
    /// Sub-extensions of a bundle. Empty for every other type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExtensionDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<semver::Version>,
    /// Package directory.
    pub root: PathBuf,
    pub source: ExtensionSource,
    #[serde(default)]
    pub display: DisplayMeta,
}

impl ExtensionDescriptor {
    /// Create a descriptor. The execution class is filled in by the classifier.
    pub fn new(name: impl Into<String>, type_tag: TypeTag, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            type_tag,
            execution_class: super::classifier::class_of_tag(type_tag),
            entry_paths: EntryPaths::default(),
            enabled: true,
            children: Vec::new(),
            version: None,
            root: root.into(),
            source: ExtensionSource::Package,
            display: DisplayMeta::default(),
        }
    }

    pub fn with_app_entry(mut self, path: impl Into<PathBuf>) -> Self {
        self.entry_paths.app = Some(path.into());
        self
    }

    pub fn with_api_entry(mut self, path: impl Into<PathBuf>) -> Self {
        self.entry_paths.api = Some(path.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_children(mut self, children: Vec<ExtensionDescriptor>) -> Self {
        self.children = children;
        self.execution_class = super::classifier::classify(&self);
        self
    }

    pub fn is_bundle(&self) -> bool {
        self.type_tag == TypeTag::Bundle
    }

    /// Units (the descriptor itself, or a bundle's children) contributing
    /// client code of type `tag`. Disabled units are skipped.
    pub fn app_units(&self, tag: TypeTag) -> Vec<&ExtensionDescriptor> {
        if !self.enabled {
            return Vec::new();
        }
        if self.is_bundle() {
            self.children
                .iter()
                .filter(|c| c.enabled && c.type_tag == tag && c.execution_class.includes_app())
                .collect()
        } else if self.type_tag == tag && self.execution_class.includes_app() {
            vec![self]
        } else {
            Vec::new()
        }
    }

    /// Units contributing server code. Disabled units are skipped.
    pub fn api_units(&self) -> Vec<&ExtensionDescriptor> {
        if !self.enabled {
            return Vec::new();
        }
        if self.is_bundle() {
            self.children
                .iter()
                .filter(|c| c.enabled && c.execution_class.includes_api())
                .collect()
        } else if self.execution_class.includes_api() {
            vec![self]
        } else {
            Vec::new()
        }
    }

    /// Names of this descriptor and all of its children.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.children.iter().map(|c| c.name.as_str()))
    }
}

/// Listing entry returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Discovered through the local directory layout.
    pub local: bool,
    /// Owning bundle, for bundle children.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    #[serde(flatten)]
    pub display: DisplayMeta,
}

impl ExtensionMetadata {
    pub fn from_descriptor(descriptor: &ExtensionDescriptor, bundle: Option<&ExtensionDescriptor>) -> Self {
        let version = descriptor
            .version
            .as_ref()
            .or_else(|| bundle.and_then(|b| b.version.as_ref()))
            .map(|v| v.to_string());
        Self {
            name: descriptor.name.clone(),
            type_tag: descriptor.type_tag,
            version,
            local: descriptor.source == ExtensionSource::Local,
            bundle: bundle.map(|b| b.name.clone()),
            display: descriptor.display.clone(),
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Aggregate client module for one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltPayload {
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    /// ES module text.
    pub source: String,
    /// SHA-256 of `source`, hex encoded.
    pub fingerprint: String,
    pub built_at: chrono::DateTime<chrono::Utc>,
    /// Extension names in payload order.
    pub extensions: Vec<String>,
    /// Extensions left out of this payload and why.
    #[serde(default)]
    pub warnings: Vec<ExtensionWarning>,
}
