//! Extension instance representation.

use std::fs::File;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::error::{IsolationError, LifecycleError};
use crate::isolation::IsolationContext;
use crate::lifecycle::{ExtensionHooks, LifecycleState};
use crate::manifest::Manifest;

static NEXT_EXTENSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity fields bound exactly once when an instance self-registers
/// with its isolation context.
#[derive(Debug)]
pub struct ExtensionIdentity {
    loader_id: u64,
    manifest: Manifest,
    data_dir: PathBuf,
    package_file: PathBuf,
    context: Weak<IsolationContext>,
}

/// A loaded extension instance.
///
/// Composes the entry point's hook object with an identity value bound
/// by [`initialize`](Self::initialize) and the mutable `enabled` and
/// `naggable` flags. State moves `Constructed → Disabled ⇄ Enabled`;
/// there is no unload path, instances live until process teardown.
pub struct Extension {
    id: u64,
    context_id: u64,
    // Taken out of the mutex for the duration of a callback, so a hook
    // may re-enter lifecycle operations on its own instance.
    hooks: Mutex<Option<Box<dyn ExtensionHooks>>>,
    identity: OnceCell<ExtensionIdentity>,
    // Claimed via compare_exchange; callbacks are delivered only by the
    // caller holding the hook object, so none can run twice.
    enabled: AtomicBool,
    naggable: AtomicBool,
    load_invoked: AtomicBool,
}

impl Extension {
    pub(crate) fn new(hooks: Box<dyn ExtensionHooks>, context_id: u64) -> Self {
        Self {
            id: NEXT_EXTENSION_ID.fetch_add(1, Ordering::Relaxed),
            context_id,
            hooks: Mutex::new(Some(hooks)),
            identity: OnceCell::new(),
            enabled: AtomicBool::new(false),
            naggable: AtomicBool::new(true),
            load_invoked: AtomicBool::new(false),
        }
    }

    /// Unique instance id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bind this instance's identity fields from its isolation context.
    ///
    /// Runs exactly once, during context construction. A second call
    /// fails with [`IsolationError::AlreadyInitialized`] and leaves the
    /// original binding untouched; the error carries the display name of
    /// that binding. Passing a context other than the one that
    /// constructed this instance fails with [`IsolationError::IllegalHost`].
    pub fn initialize(&self, ctx: &Arc<IsolationContext>) -> Result<(), IsolationError> {
        if ctx.id() != self.context_id {
            return Err(IsolationError::IllegalHost);
        }

        let identity = ExtensionIdentity {
            loader_id: ctx.loader_id(),
            manifest: ctx.manifest().clone(),
            data_dir: ctx.data_dir().to_path_buf(),
            package_file: ctx.package_file().to_path_buf(),
            context: Arc::downgrade(ctx),
        };

        self.identity.set(identity).map_err(|_| {
            IsolationError::AlreadyInitialized(self.display_name())
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        if self.identity.get().is_none() {
            LifecycleState::Constructed
        } else if self.enabled.load(Ordering::Acquire) {
            LifecycleState::Enabled
        } else {
            LifecycleState::Disabled
        }
    }

    /// Canonical extension name, once initialized.
    pub fn name(&self) -> Option<&str> {
        self.identity.get().map(|i| i.manifest.name())
    }

    /// The manifest this instance was loaded from, once initialized.
    pub fn manifest(&self) -> Option<&Manifest> {
        self.identity.get().map(|i| &i.manifest)
    }

    /// The extension's private data directory. May not exist yet; it is
    /// created lazily by whoever first writes to it, never by the core.
    pub fn data_dir(&self) -> Option<&Path> {
        self.identity.get().map(|i| i.data_dir.as_path())
    }

    /// The package archive this extension was loaded from.
    pub fn package_file(&self) -> Option<&Path> {
        self.identity.get().map(|i| i.package_file.as_path())
    }

    /// The isolation context that owns this instance.
    pub fn context(&self) -> Option<Arc<IsolationContext>> {
        self.identity.get().and_then(|i| i.context.upgrade())
    }

    /// Id of the loader that produced this instance.
    pub fn loader_id(&self) -> Option<u64> {
        self.identity.get().map(|i| i.loader_id)
    }

    /// Descriptive `name vversion` string, or a placeholder before
    /// initialization.
    pub fn display_name(&self) -> String {
        match self.identity.get() {
            Some(identity) => identity.manifest.full_name(),
            None => "<uninitialized extension>".to_string(),
        }
    }

    /// Whether the extension is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Transition the enabled state, invoking `on_enable`/`on_disable`
    /// on a real transition. A request for the state that already holds
    /// is a no-op and invokes nothing.
    ///
    /// The flag flips before the hook runs, so a failing hook leaves the
    /// requested state in place; its error propagates to the caller. The
    /// hook runs without holding the instance's lock, so an extension may
    /// call `set_enabled` on itself from inside its own callback (e.g.
    /// disable itself when `on_enable` cannot proceed); the outer call
    /// delivers the follow-up callback after the current one returns.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), LifecycleError> {
        if self.identity.get().is_none() {
            return Err(LifecycleError::NotInitialized);
        }

        if self
            .enabled
            .compare_exchange(!enabled, enabled, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let mut hooks = match self.hooks.lock().take() {
            Some(hooks) => hooks,
            // A callback further up this stack holds the hook object; it
            // observes the flag change when it returns and delivers the
            // follow-up callback itself.
            None => return Ok(()),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.deliver_transitions(hooks.as_mut(), !enabled)
        }));
        *self.hooks.lock() = Some(hooks);
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    // Invoke the transition callback for every flag change since
    // `delivered`, including changes a callback makes re-entrantly,
    // until the flag matches the last callback delivered. Returns the
    // first callback error.
    fn deliver_transitions(
        &self,
        hooks: &mut dyn ExtensionHooks,
        mut delivered: bool,
    ) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        loop {
            let target = self.enabled.load(Ordering::Acquire);
            if target == delivered {
                break;
            }
            delivered = target;
            let outcome = if target {
                hooks.on_enable()
            } else {
                hooks.on_disable()
            };
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    }

    /// Invoke the extension's `on_load` hook. Runs at most once per
    /// instance; repeat calls are no-ops. Like
    /// [`set_enabled`](Self::set_enabled), the hook may re-enter
    /// lifecycle operations on its own instance.
    pub fn on_load(&self) -> Result<(), LifecycleError> {
        if self.identity.get().is_none() {
            return Err(LifecycleError::NotInitialized);
        }
        if self.load_invoked.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut hooks = match self.hooks.lock().take() {
            Some(hooks) => hooks,
            None => return Ok(()),
        };

        let delivered = self.enabled.load(Ordering::Acquire);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut result = hooks.on_load();
            let followups = self.deliver_transitions(hooks.as_mut(), delivered);
            if result.is_ok() {
                result = followups;
            }
            result
        }));
        *self.hooks.lock() = Some(hooks);
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Whether the host may still nag this extension with warnings.
    pub fn is_naggable(&self) -> bool {
        self.naggable.load(Ordering::Acquire)
    }

    /// Best-effort "stop warning me" toggle. Does not gate functionality.
    pub fn set_naggable(&self, naggable: bool) {
        self.naggable.store(naggable, Ordering::Release);
    }

    /// Read a resource from the package archive into owned bytes.
    ///
    /// Returns `Ok(None)` when no matching entry exists or the archive
    /// cannot be read, and `InvalidArgument` for an empty name.
    pub fn package_resource(&self, name: &str) -> Result<Option<Vec<u8>>, LifecycleError> {
        if name.is_empty() {
            return Err(LifecycleError::invalid_argument(
                "resource name cannot be empty",
            ));
        }
        let identity = self.identity.get().ok_or(LifecycleError::NotInitialized)?;

        let file = match File::open(&identity.package_file) {
            Ok(file) => file,
            Err(_) => return Ok(None),
        };
        let mut archive = match zip::ZipArchive::new(file) {
            Ok(archive) => archive,
            Err(_) => return Ok(None),
        };
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(_) => return Ok(None),
        };

        // Sized by read_to_end; the declared entry size is untrusted
        // archive metadata.
        let mut bytes = Vec::new();
        match entry.read_to_end(&mut bytes) {
            Ok(_) => Ok(Some(bytes)),
            Err(_) => Ok(None),
        }
    }

    /// Read a package resource and decode it as UTF-8 text, propagating
    /// `None` from the byte lookup.
    pub fn package_text_resource(&self, name: &str) -> Result<Option<String>, LifecycleError> {
        Ok(self
            .package_resource(name)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

impl std::fmt::Debug for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl std::fmt::Display for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// Cloneable handle to a loaded extension instance.
#[derive(Clone)]
pub struct ExtensionHandle {
    extension: Arc<Extension>,
}

impl ExtensionHandle {
    pub(crate) fn new(extension: Extension) -> Self {
        Self {
            extension: Arc::new(extension),
        }
    }

    /// Unique instance id.
    pub fn id(&self) -> u64 {
        self.extension.id()
    }

    /// Canonical extension name, once initialized.
    pub fn name(&self) -> Option<String> {
        self.extension.name().map(str::to_string)
    }

    /// Descriptive `name vversion` string.
    pub fn display_name(&self) -> String {
        self.extension.display_name()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.extension.state()
    }

    /// Whether the extension is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.extension.is_enabled()
    }

    /// The underlying instance.
    pub fn inner(&self) -> &Extension {
        &self.extension
    }
}

impl std::fmt::Debug for ExtensionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}
