//! Extension package loading.

use std::fs::File;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{LifecycleError, LoaderError};
use crate::extension::ExtensionHandle;
use crate::isolation::{panic_message, IsolationContext};
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::namespace::TypeRegistry;

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// Default filename extension for extension packages.
pub const PACKAGE_EXTENSION: &str = "zip";

/// Configuration for the extension loader.
#[derive(Clone)]
pub struct LoaderConfig {
    /// Compiled-in extension types, shared namespace included.
    pub types: Arc<TypeRegistry>,
    /// Filename extension that identifies package archives.
    pub archive_extension: String,
    /// Internal archive path of the manifest.
    pub manifest_path: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            types: Arc::new(TypeRegistry::new()),
            archive_extension: PACKAGE_EXTENSION.to_string(),
            manifest_path: MANIFEST_FILE.to_string(),
        }
    }
}

impl LoaderConfig {
    /// Create a new loader configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the type registry.
    pub fn with_types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = types;
        self
    }

    /// Set the package archive filename extension.
    pub fn with_archive_extension(mut self, extension: impl Into<String>) -> Self {
        self.archive_extension = extension.into();
        self
    }

    /// Set the internal archive path of the manifest.
    pub fn with_manifest_path(mut self, path: impl Into<String>) -> Self {
        self.manifest_path = path.into();
        self
    }
}

impl std::fmt::Debug for LoaderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderConfig")
            .field("archive_extension", &self.archive_extension)
            .field("manifest_path", &self.manifest_path)
            .finish()
    }
}

/// Loads extension packages and tracks their isolation contexts by
/// canonical name.
pub struct ExtensionLoader {
    id: u64,
    config: LoaderConfig,
    contexts: DashMap<String, Arc<IsolationContext>>,
}

impl ExtensionLoader {
    /// Create a new loader.
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            id: NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            contexts: DashMap::new(),
        }
    }

    /// Get the loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Check whether a path looks like an extension package.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == self.config.archive_extension)
            .unwrap_or(false)
    }

    /// Read and validate the manifest from a package archive without
    /// loading it.
    pub fn read_manifest(&self, package: &Path) -> Result<Manifest, LoaderError> {
        let file = File::open(package)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let mut entry = match archive.by_name(&self.config.manifest_path) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(LoaderError::ManifestMissing(self.config.manifest_path.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        // Sized by read_to_end; the declared entry size is untrusted
        // archive metadata.
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;

        Ok(Manifest::from_slice(&bytes)?)
    }

    /// Load a single extension package.
    ///
    /// Reads and validates the manifest, projects the data directory
    /// next to the package, constructs the isolation context (which
    /// resolves and instantiates the entry point), and registers the
    /// context under the canonical name. A later package with the same
    /// name silently replaces the registration.
    pub fn load(&self, package: &Path) -> Result<ExtensionHandle, LoaderError> {
        if !package.exists() {
            return Err(LoaderError::PackageNotFound(package.display().to_string()));
        }

        let manifest = self.read_manifest(package)?;

        let data_dir = package
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(manifest.name());
        if data_dir.exists() && !data_dir.is_dir() {
            return Err(LoaderError::DataDirectoryConflict {
                path: data_dir.display().to_string(),
                extension: manifest.full_name(),
            });
        }

        let ctx = IsolationContext::new(
            self.config.types.shared(),
            self.config.types.package(manifest.name()),
            manifest,
            data_dir,
            package.to_path_buf(),
            self.id,
        )?;

        tracing::debug!(
            extension = %ctx.manifest().full_name(),
            package = %package.display(),
            "loaded extension package"
        );

        self.contexts
            .insert(ctx.manifest().name().to_string(), Arc::clone(&ctx));

        Ok(ctx.instance().clone())
    }

    /// Enable an extension produced by this loader.
    ///
    /// No-op if already enabled. Errors (and panics) raised from the
    /// extension's `on_enable` are caught here, logged with the display
    /// name, and never propagated; one extension's enable failure must
    /// not abort the caller.
    pub fn enable(&self, extension: &ExtensionHandle) -> Result<(), LifecycleError> {
        if extension.inner().loader_id() != Some(self.id) {
            return Err(LifecycleError::NotThisLoader(extension.display_name()));
        }

        if extension.is_enabled() {
            return Ok(());
        }

        tracing::info!("Enabling {}", extension.display_name());

        // Make sure the context is tracked even if the instance was
        // obtained out of band.
        if let (Some(name), Some(ctx)) = (extension.name(), extension.inner().context()) {
            self.contexts.entry(name).or_insert(ctx);
        }

        self.invoke_transition(extension, true);
        Ok(())
    }

    /// Disable an extension produced by this loader, mirroring
    /// [`enable`](Self::enable)'s failure isolation.
    pub fn disable(&self, extension: &ExtensionHandle) -> Result<(), LifecycleError> {
        if extension.inner().loader_id() != Some(self.id) {
            return Err(LifecycleError::NotThisLoader(extension.display_name()));
        }

        if !extension.is_enabled() {
            return Ok(());
        }

        tracing::info!("Disabling {}", extension.display_name());
        self.invoke_transition(extension, false);
        Ok(())
    }

    fn invoke_transition(&self, extension: &ExtensionHandle, enabled: bool) {
        let verb = if enabled { "enabling" } else { "disabling" };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            extension.inner().set_enabled(enabled)
        }));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(
                    "Error occurred while {} {}: {}",
                    verb,
                    extension.display_name(),
                    err
                );
            }
            Err(payload) => {
                tracing::error!(
                    "Panic while {} {}: {}",
                    verb,
                    extension.display_name(),
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Look up the isolation context registered under a canonical name.
    pub fn context(&self, name: &str) -> Option<Arc<IsolationContext>> {
        self.contexts.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Canonical names of every registered context.
    pub fn names(&self) -> Vec<String> {
        self.contexts.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for ExtensionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionLoader")
            .field("id", &self.id)
            .field("context_count", &self.contexts.len())
            .finish()
    }
}
