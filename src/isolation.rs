//! Per-package isolation contexts.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::IsolationError;
use crate::extension::{Extension, ExtensionHandle};
use crate::manifest::Manifest;
use crate::namespace::{Namespace, Symbol};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// An exclusive code-resolution namespace for one extension package.
///
/// Owns the package's private [`Namespace`], falls back to the shared
/// parent namespace for host-provided types, and exclusively owns the
/// single lifecycle instance constructed from the manifest's entry
/// point. One manifest, one context, one instance.
pub struct IsolationContext {
    id: u64,
    loader_id: u64,
    manifest: Manifest,
    data_dir: PathBuf,
    package_file: PathBuf,
    local: Arc<Namespace>,
    parent: Arc<Namespace>,
    resolved: DashMap<String, Symbol>,
    instance: ExtensionHandle,
}

impl IsolationContext {
    /// Construct the context for one package: resolve the manifest's
    /// entry point (private namespace first, shared parent on miss),
    /// instantiate it exactly once, and trigger the instance's
    /// self-registration.
    pub fn new(
        parent: Arc<Namespace>,
        local: Arc<Namespace>,
        manifest: Manifest,
        data_dir: PathBuf,
        package_file: PathBuf,
        loader_id: u64,
    ) -> Result<Arc<Self>, IsolationError> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let main = manifest.main().to_string();

        let symbol = local
            .resolve(&main)
            .or_else(|| parent.resolve(&main))
            .ok_or_else(|| IsolationError::EntryPointNotFound(main.clone()))?;

        let ctor = match symbol {
            Symbol::EntryPoint(ctor) => ctor,
            Symbol::Shared(_) => {
                return Err(IsolationError::EntryPointTypeError(main));
            }
        };

        let hooks = panic::catch_unwind(AssertUnwindSafe(ctor)).map_err(|payload| {
            IsolationError::InstantiationError(main.clone(), panic_message(payload.as_ref()))
        })?;

        let extension = ExtensionHandle::new(Extension::new(hooks, id));

        let resolved = DashMap::new();
        resolved.insert(main, Symbol::EntryPoint(ctor));

        let ctx = Arc::new(Self {
            id,
            loader_id,
            manifest,
            data_dir,
            package_file,
            local,
            parent,
            resolved,
            instance: extension.clone(),
        });

        extension.inner().initialize(&ctx)?;

        Ok(ctx)
    }

    /// Unique context id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Id of the loader that constructed this context.
    pub fn loader_id(&self) -> u64 {
        self.loader_id
    }

    /// The manifest of the package this context isolates.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The package's private data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// The package archive this context was built from.
    pub fn package_file(&self) -> &Path {
        &self.package_file
    }

    /// The single lifecycle instance owned by this context.
    pub fn instance(&self) -> &ExtensionHandle {
        &self.instance
    }

    /// Resolve a symbol: resolution cache, then the package's private
    /// namespace, then the shared parent. Hits are cached; the cache map
    /// tolerates concurrent readers and writers.
    pub fn resolve(&self, symbol: &str) -> Option<Symbol> {
        if let Some(hit) = self.resolved.get(symbol) {
            return Some(hit.value().clone());
        }

        let found = self
            .local
            .resolve(symbol)
            .or_else(|| self.parent.resolve(symbol))?;

        self.resolved.insert(symbol.to_string(), found.clone());
        Some(found)
    }

    /// Names of every symbol resolved through this context so far.
    pub fn resolved_symbols(&self) -> Vec<String> {
        self.resolved.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for IsolationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationContext")
            .field("id", &self.id)
            .field("extension", &self.manifest.full_name())
            .field("resolved_count", &self.resolved.len())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "constructor panicked".to_string()
    }
}
