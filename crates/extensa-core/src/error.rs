//! Error and warning types for the extension manager.
//!
//! Two kinds of failure flow through the system:
//! - [`ExtensionError`] aborts the operation it is returned from. At the cycle
//!   level these are configuration problems, timeouts and swap failures.
//! - [`ExtensionWarning`] records a per-extension problem (bad manifest,
//!   compile failure, registration panic). The offending extension is left
//!   out and everything else proceeds.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Errors raised by the extension manager.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// An extension root directory is missing or unreadable.
    #[error("Extension directory unavailable: {path}: {reason}")]
    RootUnavailable { path: PathBuf, reason: String },

    /// Global configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A package manifest could not be parsed or validated.
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// A declared extension type is not part of the known set.
    #[error("Unknown extension type: {0}")]
    UnknownType(String),

    /// Compiling an app entry point failed.
    #[error("Compile failed: {0}")]
    Compile(String),

    /// Building an aggregate payload failed.
    #[error("Build failed for {type_tag}: {reason}")]
    Build { type_tag: String, reason: String },

    /// An api entry point failed while registering.
    #[error("Registration failed: {0}")]
    Registration(String),

    /// A capability id was registered twice.
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    /// Lookup of a hook, endpoint, operation or extension failed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A reload cycle exceeded its time budget.
    #[error("Reload cycle timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A reload cycle was cancelled before it finished.
    #[error("Reload cycle cancelled")]
    Cancelled,

    /// The reload coordinator is no longer running.
    #[error("Reload coordinator stopped")]
    CoordinatorStopped,

    /// Unexpected failure while publishing a generation.
    #[error("Swap failed: {0}")]
    Swap(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

/// Result type for extension manager operations.
pub type Result<T> = std::result::Result<T, ExtensionError>;

/// Pipeline stage a warning was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningStage {
    Manifest,
    Classify,
    Compile,
    Register,
    Build,
}

impl fmt::Display for WarningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarningStage::Manifest => "manifest",
            WarningStage::Classify => "classify",
            WarningStage::Compile => "compile",
            WarningStage::Register => "register",
            WarningStage::Build => "build",
        };
        f.write_str(s)
    }
}

/// A non-fatal, per-extension finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionWarning {
    /// Extension name, or the package path when no name could be read.
    pub extension: String,
    pub stage: WarningStage,
    pub message: String,
}

impl ExtensionWarning {
    pub fn new(extension: impl Into<String>, stage: WarningStage, message: impl fmt::Display) -> Self {
        Self {
            extension: extension.into(),
            stage,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ExtensionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.extension, self.message)
    }
}
