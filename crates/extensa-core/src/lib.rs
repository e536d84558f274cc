//! Core of the Extensa extension manager.
//!
//! Discovery, classification, bundling and server loading of extension
//! packages, plus the reload coordinator that keeps them consistent.

pub mod config;
pub mod error;
pub mod extension;

pub use config::{Config, DeliveryConfig, ManagerConfig, ServerConfig};
pub use error::{ExtensionError, ExtensionWarning, Result, WarningStage};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars, Config, DeliveryConfig, ManagerConfig, ServerConfig};
    pub use crate::error::{ExtensionError, ExtensionWarning, Result, WarningStage};
    pub use crate::extension::{
        BuiltPayload, CycleOutcome, ExtensionDescriptor, ExtensionManager, ExtensionMetadata,
        HostRegistry, TypeTag,
    };
}
