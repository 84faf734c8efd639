//! # hearth-extensions
//!
//! Extension package discovery, isolation, and lifecycle runtime for the
//! Hearth host with manifest validation.
//!
//! This crate provides:
//! - **Manifest Validation** - Parse and validate `extension.toml` descriptors
//! - **Package Loading** - Load extension archives and project data directories
//! - **Isolation Contexts** - Exclusive per-package symbol namespaces
//! - **Lifecycle Management** - Load, enable, and disable extensions safely
//! - **Batch Orchestration** - Directory-wide passes that isolate failures
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hearth_extensions::{ExtensionManager, LoaderConfig, TypeRegistry};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! // Register the compiled-in extension types.
//! let types = Arc::new(TypeRegistry::new());
//! types.register_entry_point("MyExtension", "my_ext::MyExtension", my_ext::construct);
//!
//! // Load every package in the extensions directory.
//! let manager = ExtensionManager::new(LoaderConfig::new().with_types(types));
//! let report = manager.load_all(Path::new("extensions"))?;
//!
//! // Run the lifecycle phases in order.
//! manager.on_load_all();
//! manager.enable_all();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
mod extension;
mod isolation;
mod lifecycle;
mod loader;
mod manager;
mod manifest;
mod namespace;

pub use error::{IsolationError, LifecycleError, LoaderError, ManifestError};
pub use extension::{Extension, ExtensionHandle};
pub use isolation::IsolationContext;
pub use lifecycle::{ExtensionHooks, LifecycleState};
pub use loader::{ExtensionLoader, LoaderConfig, PACKAGE_EXTENSION};
pub use manager::{ExtensionManager, LoadFailure, LoadReport, PhaseFailure};
pub use manifest::{Manifest, HOST_NAMESPACE, MANIFEST_FILE};
pub use namespace::{Constructor, Namespace, Symbol, TypeRegistry};

/// Crate version for compatibility checks.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
