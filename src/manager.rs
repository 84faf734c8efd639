//! Directory-wide batch orchestration.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{LifecycleError, LoaderError};
use crate::extension::ExtensionHandle;
use crate::isolation::{panic_message, IsolationContext};
use crate::loader::{ExtensionLoader, LoaderConfig};

/// One package that failed to load during a batch.
#[derive(Debug)]
pub struct LoadFailure {
    /// Package file name (or path) that failed.
    pub identifier: String,
    /// Why the load failed.
    pub error: LoaderError,
}

/// Result of a directory-wide load pass.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Instances loaded during this pass, in discovery order.
    pub loaded: Vec<ExtensionHandle>,
    /// Packages that failed, without stopping the pass.
    pub failures: Vec<LoadFailure>,
}

/// One extension whose lifecycle callback failed during a batch pass.
#[derive(Debug)]
pub struct PhaseFailure {
    /// Display name of the failing extension.
    pub extension: String,
    /// The callback error.
    pub error: LifecycleError,
}

/// Orchestrates discovery, loading, and the strictly-ordered
/// load→enable→disable passes over a batch of extension packages.
///
/// The intended startup sequence is [`load_all`](Self::load_all), then
/// [`on_load_all`](Self::on_load_all), then [`enable_all`](Self::enable_all);
/// [`disable_all`](Self::disable_all) runs at shutdown. Phases never
/// interleave: every package is loaded before any `on_load` runs, and
/// every `on_load` runs before any `on_enable`. Within a phase,
/// processing follows discovery order (package file name order). One
/// extension's failure never aborts its siblings.
pub struct ExtensionManager {
    loader: ExtensionLoader,
    extensions: RwLock<Vec<ExtensionHandle>>,
}

impl ExtensionManager {
    /// Create a manager with the given loader configuration.
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            loader: ExtensionLoader::new(config),
            extensions: RwLock::new(Vec::new()),
        }
    }

    /// Create a manager with default configuration.
    pub fn default_config() -> Self {
        Self::new(LoaderConfig::default())
    }

    /// The loader backing this manager.
    pub fn loader(&self) -> &ExtensionLoader {
        &self.loader
    }

    /// Load every extension package in `directory`.
    ///
    /// A missing directory is created and yields an empty report. Every
    /// file matching the archive filter is loaded in file-name order; a
    /// failing package is recorded and skipped without stopping the
    /// rest. Loaded instances are appended to the managed batch.
    pub fn load_all(&self, directory: &Path) -> Result<LoadReport, LoaderError> {
        if !directory.exists() {
            std::fs::create_dir_all(directory)?;
            return Ok(LoadReport::default());
        }

        let mut packages: Vec<_> = std::fs::read_dir(directory)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| self.loader.matches(path))
            .collect();
        // read_dir order is platform dependent; sort for a stable
        // discovery order.
        packages.sort();

        let mut report = LoadReport::default();
        for package in packages {
            match self.loader.load(&package) {
                Ok(extension) => report.loaded.push(extension),
                Err(error) => {
                    let identifier = package
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| package.display().to_string());
                    tracing::error!("Could not load {}: {}", identifier, error);
                    report.failures.push(LoadFailure { identifier, error });
                }
            }
        }

        self.extensions
            .write()
            .extend(report.loaded.iter().cloned());

        Ok(report)
    }

    /// Invoke `on_load` on every managed instance in discovery order.
    ///
    /// Each instance's hook runs at most once even across repeated
    /// calls; per-instance failures are recorded and do not abort the
    /// pass.
    pub fn on_load_all(&self) -> Vec<PhaseFailure> {
        let mut failures = Vec::new();
        for extension in self.extensions.read().iter() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| extension.inner().on_load()));
            if let Some(error) = flatten_callback(result) {
                tracing::error!("Could not load {}: {}", extension.display_name(), error);
                failures.push(PhaseFailure {
                    extension: extension.display_name(),
                    error,
                });
            }
        }
        failures
    }

    /// Enable every managed instance in discovery order. Hook failures
    /// are caught at the loader boundary and logged; only orchestration
    /// errors (e.g. a foreign instance) are reported here.
    pub fn enable_all(&self) -> Vec<PhaseFailure> {
        let mut failures = Vec::new();
        for extension in self.extensions.read().iter() {
            if let Err(error) = self.loader.enable(extension) {
                failures.push(PhaseFailure {
                    extension: extension.display_name(),
                    error,
                });
            }
        }
        failures
    }

    /// Disable every managed instance, continuing past failures.
    pub fn disable_all(&self) -> Vec<PhaseFailure> {
        let mut failures = Vec::new();
        for extension in self.extensions.read().iter() {
            if let Err(error) = self.loader.disable(extension) {
                failures.push(PhaseFailure {
                    extension: extension.display_name(),
                    error,
                });
            }
        }
        failures
    }

    /// All managed instances in discovery order.
    pub fn extensions(&self) -> Vec<ExtensionHandle> {
        self.extensions.read().clone()
    }

    /// Look up a managed instance by canonical name.
    pub fn get(&self, name: &str) -> Option<ExtensionHandle> {
        self.context(name).map(|ctx| ctx.instance().clone())
    }

    /// Look up an isolation context by canonical name.
    pub fn context(&self, name: &str) -> Option<Arc<IsolationContext>> {
        self.loader.context(name)
    }

    /// Whether a named extension is loaded and currently enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).map(|ext| ext.is_enabled()).unwrap_or(false)
    }

    /// Number of managed instances.
    pub fn len(&self) -> usize {
        self.extensions.read().len()
    }

    /// Whether the manager holds no instances.
    pub fn is_empty(&self) -> bool {
        self.extensions.read().is_empty()
    }
}

impl std::fmt::Debug for ExtensionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionManager")
            .field("extension_count", &self.len())
            .finish()
    }
}

fn flatten_callback(
    result: std::thread::Result<Result<(), LifecycleError>>,
) -> Option<LifecycleError> {
    match result {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(error),
        Err(payload) => Some(LifecycleError::hook(panic_message(payload.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ExtensionHooks;
    use crate::manifest::MANIFEST_FILE;
    use crate::namespace::TypeRegistry;
    use std::io::Write;

    struct Noop;
    impl ExtensionHooks for Noop {}

    fn noop_ctor() -> Box<dyn ExtensionHooks> {
        Box::new(Noop)
    }

    fn write_package(dir: &Path, file_name: &str, manifest: &str) {
        let file = std::fs::File::create(dir.join(file_name)).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file(MANIFEST_FILE, options).unwrap();
        writer.write_all(manifest.as_bytes()).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_load_all_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let extensions_dir = dir.path().join("extensions");

        let manager = ExtensionManager::default_config();
        let report = manager.load_all(&extensions_dir).unwrap();

        assert!(report.loaded.is_empty());
        assert!(report.failures.is_empty());
        assert!(extensions_dir.is_dir());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_mixed_batch_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let types = Arc::new(TypeRegistry::new());
        types.register_entry_point("Alpha", "alpha::Alpha", noop_ctor);
        types.register_entry_point("Gamma", "gamma::Gamma", noop_ctor);

        write_package(
            dir.path(),
            "alpha.zip",
            "name = \"Alpha\"\nversion = \"1.0\"\nmain = \"alpha::Alpha\"\n",
        );
        // Missing the required main field.
        write_package(dir.path(), "beta.zip", "name = \"Beta\"\nversion = \"1.0\"\n");
        write_package(
            dir.path(),
            "gamma.zip",
            "name = \"Gamma\"\nversion = \"1.0\"\nmain = \"gamma::Gamma\"\n",
        );

        let manager = ExtensionManager::new(LoaderConfig::new().with_types(types));
        let report = manager.load_all(dir.path()).unwrap();

        assert_eq!(report.loaded.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].identifier, "beta.zip");

        // Discovery order follows package file names.
        let names: Vec<_> = report
            .loaded
            .iter()
            .map(|ext| ext.name().unwrap())
            .collect();
        assert_eq!(names, vec!["Alpha", "Gamma"]);
    }

    #[test]
    fn test_on_load_all_runs_each_hook_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static LOADS: AtomicUsize = AtomicUsize::new(0);

        struct Counting;
        impl ExtensionHooks for Counting {
            fn on_load(&mut self) -> Result<(), LifecycleError> {
                LOADS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        fn counting_ctor() -> Box<dyn ExtensionHooks> {
            Box::new(Counting)
        }

        let dir = tempfile::tempdir().unwrap();
        let types = Arc::new(TypeRegistry::new());
        types.register_entry_point("Counter", "counter::Counter", counting_ctor);
        write_package(
            dir.path(),
            "counter.zip",
            "name = \"Counter\"\nversion = \"1.0\"\nmain = \"counter::Counter\"\n",
        );

        let manager = ExtensionManager::new(LoaderConfig::new().with_types(types));
        manager.load_all(dir.path()).unwrap();

        assert!(manager.on_load_all().is_empty());
        assert!(manager.on_load_all().is_empty());
        assert_eq!(LOADS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_load_all_reports_panics() {
        struct Panicking;
        impl ExtensionHooks for Panicking {
            fn on_load(&mut self) -> Result<(), LifecycleError> {
                panic!("load blew up")
            }
        }
        fn panicking_ctor() -> Box<dyn ExtensionHooks> {
            Box::new(Panicking)
        }

        let dir = tempfile::tempdir().unwrap();
        let types = Arc::new(TypeRegistry::new());
        types.register_entry_point("Volatile", "volatile::Volatile", panicking_ctor);
        write_package(
            dir.path(),
            "volatile.zip",
            "name = \"Volatile\"\nversion = \"1.0\"\nmain = \"volatile::Volatile\"\n",
        );

        let manager = ExtensionManager::new(LoaderConfig::new().with_types(types));
        manager.load_all(dir.path()).unwrap();

        let failures = manager.on_load_all();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].extension, "Volatile v1.0");
        assert!(matches!(failures[0].error, LifecycleError::Hook(_)));
    }

    #[test]
    fn test_lookup_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let types = Arc::new(TypeRegistry::new());
        types.register_entry_point("Solo", "solo::Solo", noop_ctor);

        write_package(
            dir.path(),
            "solo.zip",
            "name = \"Solo\"\nversion = \"1.0\"\nmain = \"solo::Solo\"\n",
        );

        let manager = ExtensionManager::new(LoaderConfig::new().with_types(types));
        manager.load_all(dir.path()).unwrap();

        assert_eq!(manager.len(), 1);
        assert!(manager.get("Solo").is_some());
        assert!(manager.get("Missing").is_none());
        assert!(!manager.is_enabled("Solo"));

        manager.enable_all();
        assert!(manager.is_enabled("Solo"));
    }
}
