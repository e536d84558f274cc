//! Extension system.
//!
//! Extensions are packages on disk that plug into the host at two
//! boundaries: client code bundled into one JavaScript payload per app type,
//! and server code registering hooks, endpoints and operations in the host
//! process.
//!
//! # Architecture
//!
//! ```text
//!          triggers (watcher, reload())
//!                     │
//!                     ▼
//!            ┌─────────────────┐
//!            │ReloadCoordinator│  Scanning → Building → Swapping
//!            └─────────────────┘
//!          ┌──────────┼────────────┐
//!          ▼          ▼            ▼
//!   PackageScanner  Bundler    ServerLoader ──► HostRegistry
//!          │       BuildCache   (Sandbox)
//!          └──────────┴────────────┘
//!                     ▼
//!               ManagerState  ◄── delivery reads
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use extensa_core::config::ManagerConfig;
//! use extensa_core::extension::{ExtensionManager, TypeTag};
//!
//! let manager = ExtensionManager::builder(ManagerConfig::with_paths(["./extensions"])).build()?;
//! manager.start().await?;
//!
//! let panels = manager.extensions_list(TypeTag::Panel);
//! let bundle = manager.app_extension_source(TypeTag::Panel);
//! ```

pub mod bundler;
pub mod cache;
pub mod cancel;
pub mod classifier;
pub mod coordinator;
pub mod host;
pub mod loader;
pub mod manager;
pub mod runtime;
pub mod sandbox;
pub mod scanner;
pub mod state;
pub mod types;
pub mod watcher;

pub use bundler::{fingerprint, Bundler, Compiler, ModuleCompiler, SourceFile};
pub use cache::{BuildCache, BuildGuard, BuildStart};
pub use cancel::CancelToken;
pub use coordinator::{CoordinatorStatus, CycleOutcome, CycleState, ReloadCoordinator, ReloadPipeline, Trigger};
pub use host::{
    endpoint_fn, hook_fn, operation_fn, EndpointHandler, EndpointRequest, HookHandler, HostRegistry,
    OperationHandler, Registration, RegistrationKey,
};
pub use loader::{LoadReport, LoadedServerExtension, ServerLoader, StagedLoad};
pub use manager::{ExtensionManager, ExtensionManagerBuilder};
pub use runtime::{Action, BuiltinRuntime, DeclarativeRuntime, EntryRuntime};
pub use sandbox::{Capabilities, EndpointRegistrar, HookRegistrar, OperationRegistrar, Sandbox};
pub use scanner::{scan, PackageScanner, ScanReport};
pub use state::{Generation, ManagerState, ServerExtensionSummary};
pub use types::{
    BuiltPayload, DisplayMeta, EntryPaths, ExecutionClass, ExtensionDescriptor, ExtensionMetadata,
    ExtensionSource, TypeTag,
};
pub use watcher::ExtensionWatcher;
