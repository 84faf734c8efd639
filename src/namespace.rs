//! Symbol namespaces backing per-package isolation.
//!
//! Extension code is linked into the host, so "loading" a package's code
//! means resolving its declared entry-point symbol against a
//! name→constructor registry. Each package gets an exclusive private
//! [`Namespace`]; symbols it does not provide fall back to the shared
//! host namespace, so packages can reach host-provided types without
//! ever seeing each other's private symbols.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

use crate::lifecycle::ExtensionHooks;

/// Zero-argument constructor for an extension entry point.
pub type Constructor = fn() -> Box<dyn ExtensionHooks>;

/// A resolvable symbol: either an extension entry point or an opaque
/// shared value exposed by the host.
#[derive(Clone)]
pub enum Symbol {
    /// A type satisfying the lifecycle contract, with its constructor.
    EntryPoint(Constructor),
    /// A host-provided shared value that is not an extension type.
    Shared(Arc<dyn Any + Send + Sync>),
}

impl Symbol {
    /// Check whether this symbol satisfies the lifecycle contract.
    pub fn is_entry_point(&self) -> bool {
        matches!(self, Self::EntryPoint(_))
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EntryPoint(_) => f.write_str("Symbol::EntryPoint"),
            Self::Shared(_) => f.write_str("Symbol::Shared"),
        }
    }
}

/// A concurrent mapping from symbol name to resolved symbol.
///
/// Reads and writes may race freely: an extension's own worker activity
/// can resolve symbols while other packages load on the orchestrating
/// thread.
#[derive(Default)]
pub struct Namespace {
    symbols: DashMap<String, Symbol>,
}

impl Namespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension entry point under `symbol`.
    pub fn register_entry_point(&self, symbol: impl Into<String>, ctor: Constructor) {
        self.symbols.insert(symbol.into(), Symbol::EntryPoint(ctor));
    }

    /// Register a shared host-provided value under `symbol`.
    pub fn register_shared(&self, symbol: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.symbols.insert(symbol.into(), Symbol::Shared(value));
    }

    /// Look up a symbol in this namespace only.
    pub fn resolve(&self, symbol: &str) -> Option<Symbol> {
        self.symbols.get(symbol).map(|entry| entry.value().clone())
    }

    /// Check whether a symbol is registered.
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains_key(symbol)
    }

    /// All registered symbol names.
    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Check whether the namespace is empty.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("symbol_count", &self.symbols.len())
            .finish()
    }
}

/// Registry of compiled-in extension types, keyed by package name.
///
/// The embedding host populates this before loading: shared types go into
/// the [`shared`](Self::shared) namespace, each package's private symbols
/// into [`package`](Self::package). A package whose namespace was never
/// populated simply fails entry-point resolution at load time.
#[derive(Default)]
pub struct TypeRegistry {
    shared: Arc<Namespace>,
    packages: DashMap<String, Arc<Namespace>>,
}

impl TypeRegistry {
    /// Create an empty type registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared host namespace every isolation context falls back to.
    pub fn shared(&self) -> Arc<Namespace> {
        Arc::clone(&self.shared)
    }

    /// The private namespace for `package` (canonical name), created
    /// empty on first access.
    pub fn package(&self, package: &str) -> Arc<Namespace> {
        self.packages
            .entry(package.to_string())
            .or_insert_with(|| Arc::new(Namespace::new()))
            .clone()
    }

    /// Register an entry point inside a package's private namespace.
    pub fn register_entry_point(
        &self,
        package: &str,
        symbol: impl Into<String>,
        ctor: Constructor,
    ) {
        self.package(package).register_entry_point(symbol, ctor);
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("shared_symbols", &self.shared.len())
            .field("package_count", &self.packages.len())
            .finish()
    }
}
