//! Error types for extension runtime operations.

use thiserror::Error;

/// Errors raised while decoding or validating an extension manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// A required field is absent (or present but empty).
    #[error("required manifest field is not defined: {0}")]
    MissingField(&'static str),

    /// A modeled field holds a value of the wrong type.
    #[error("manifest field {0} is of wrong type")]
    WrongType(&'static str),

    /// The extension name contains characters outside `[A-Za-z0-9 _.-]`.
    #[error("name '{0}' contains invalid characters")]
    InvalidName(String),

    /// The entry point falls under the reserved host namespace.
    #[error("entry point '{0}' may not be within the reserved host namespace")]
    ReservedNamespace(String),

    /// The manifest document could not be decoded at all.
    #[error("manifest is not properly structured: {0}")]
    MalformedSyntax(String),
}

/// Errors raised while constructing a package's isolation context.
#[derive(Error, Debug)]
pub enum IsolationError {
    /// The declared entry-point symbol is absent from both the package
    /// namespace and the shared parent namespace.
    #[error("cannot find entry point `{0}`")]
    EntryPointNotFound(String),

    /// The entry point resolved to a symbol that does not satisfy the
    /// lifecycle contract.
    #[error("entry point `{0}` is not an extension type")]
    EntryPointTypeError(String),

    /// The entry-point constructor panicked or produced no instance.
    #[error("failed to construct `{0}`: {1}")]
    InstantiationError(String, String),

    /// A second self-registration was attempted on an already-bound
    /// instance. Carries the display name of the original binding.
    #[error("extension already initialized: {0}")]
    AlreadyInitialized(String),

    /// An instance was initialized against a context other than the one
    /// that constructed it.
    #[error("cannot initialize extension outside of its isolation context")]
    IllegalHost,
}

/// Errors raised while loading a single extension package.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// The package file does not exist.
    #[error("package not found: {0}")]
    PackageNotFound(String),

    /// The package archive does not contain a manifest at the expected
    /// internal path.
    #[error("package does not contain {0}")]
    ManifestMissing(String),

    /// The manifest failed to decode or validate.
    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] ManifestError),

    /// The projected data directory exists and is not a directory.
    #[error("projected data directory `{path}` for {extension} exists and is not a directory")]
    DataDirectoryConflict {
        /// The conflicting path.
        path: String,
        /// Display name of the extension whose directory conflicts.
        extension: String,
    },

    /// Isolation-context construction failed.
    #[error("invalid extension: {0}")]
    InvalidExtension(#[from] IsolationError),

    /// The package archive could not be read.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by lifecycle operations on a loaded instance.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The instance was not produced by the loader asked to drive it.
    #[error("{0} is not associated with this loader")]
    NotThisLoader(String),

    /// A lifecycle operation was invoked with an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The instance has not completed its identity binding yet.
    #[error("extension is not initialized")]
    NotInitialized,

    /// An extension's own hook reported a failure.
    #[error("{0}")]
    Hook(String),
}

impl LifecycleError {
    /// Create a hook failure error from an extension-reported message.
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_error_display() {
        let err = ManifestError::MissingField("name");
        assert_eq!(err.to_string(), "required manifest field is not defined: name");

        let err = ManifestError::InvalidName("My Plugin!".into());
        assert!(err.to_string().contains("My Plugin!"));

        let err = ManifestError::ReservedNamespace("hearth::Core".into());
        assert!(err.to_string().contains("hearth::Core"));
    }

    #[test]
    fn test_loader_error_wraps_manifest_error() {
        let err = LoaderError::from(ManifestError::MissingField("version"));
        assert!(matches!(err, LoaderError::InvalidManifest(_)));
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_loader_error_wraps_isolation_error() {
        let err = LoaderError::from(IsolationError::EntryPointNotFound("missing::Type".into()));
        assert!(matches!(err, LoaderError::InvalidExtension(_)));
        assert!(err.to_string().contains("missing::Type"));
    }

    #[test]
    fn test_lifecycle_error_helpers() {
        let err = LifecycleError::hook("boom");
        assert_eq!(err.to_string(), "boom");

        let err = LifecycleError::invalid_argument("resource name cannot be empty");
        assert!(err.to_string().contains("resource name"));
    }
}
