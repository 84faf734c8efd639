//! Extension manifest schema and validation.

use toml::value::Table;
use toml::Value;

use crate::error::ManifestError;

/// Reserved namespace prefix for host-provided types. No extension may
/// declare an entry point under this prefix.
pub const HOST_NAMESPACE: &str = "hearth::";

/// Internal archive path at which every package carries its manifest.
pub const MANIFEST_FILE: &str = "extension.toml";

/// Declarative metadata for one extension package.
///
/// Validity of the required fields is established once at construction;
/// a `Manifest` is immutable afterwards. The canonical `name` has spaces
/// normalized to underscores while [`raw_name`](Self::raw_name) keeps the
/// name exactly as written for display.
///
/// Required manifest keys are `name`, `version`, and `main`; optional
/// keys are `description`, `website`, `prefix`, and the deprecated
/// `class-loader-of`. Unrecognized keys never fail parsing and are kept
/// as opaque passthrough.
#[derive(Debug, Clone)]
pub struct Manifest {
    raw_name: String,
    name: String,
    version: String,
    main: String,
    description: Option<String>,
    website: Option<String>,
    prefix: Option<String>,
    class_loader_of: Option<String>,
    extra: Table,
}

impl Manifest {
    /// Create a manifest directly from trusted values, bypassing the
    /// charset and reserved-namespace checks.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        main: impl Into<String>,
    ) -> Self {
        let raw_name = name.into();
        Self {
            name: raw_name.replace(' ', "_"),
            raw_name,
            version: version.into(),
            main: main.into(),
            description: None,
            website: None,
            prefix: None,
            class_loader_of: None,
            extra: Table::new(),
        }
    }

    /// Parse and validate a manifest from a TOML document.
    ///
    /// Validation short-circuits in a fixed order: name presence/type,
    /// name charset, version presence/type, entry-point presence/type,
    /// and finally the reserved-namespace check on the entry point.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let value: Value = content
            .parse()
            .map_err(|e: toml::de::Error| ManifestError::MalformedSyntax(e.to_string()))?;

        match value {
            Value::Table(table) => Self::from_table(table),
            other => Err(ManifestError::MalformedSyntax(format!(
                "expected a table, found {}",
                other.type_str()
            ))),
        }
    }

    /// Parse a manifest from raw bytes, e.g. an archive entry.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        let content = std::str::from_utf8(bytes)
            .map_err(|e| ManifestError::MalformedSyntax(e.to_string()))?;
        Self::parse(content)
    }

    fn from_table(mut table: Table) -> Result<Self, ManifestError> {
        // An empty name is present but fails the charset check, so it
        // reports InvalidName rather than MissingField.
        let raw_name = take_string(&mut table, "name")?;
        if !is_valid_name(&raw_name) {
            return Err(ManifestError::InvalidName(raw_name));
        }
        let name = raw_name.replace(' ', "_");

        let version = take_required(&mut table, "version")?;

        let main = take_required(&mut table, "main")?;
        if main.starts_with(HOST_NAMESPACE) {
            return Err(ManifestError::ReservedNamespace(main));
        }

        let description = take_optional(&mut table, "description")?;
        let website = take_optional(&mut table, "website")?;
        let prefix = take_optional(&mut table, "prefix")?;
        let class_loader_of = take_optional(&mut table, "class-loader-of")?;

        Ok(Self {
            raw_name,
            name,
            version,
            main,
            description,
            website,
            prefix,
            class_loader_of,
            extra: table,
        })
    }

    /// Serialize the modeled fields back to a TOML document.
    ///
    /// Round-trips `name`, `version`, and `main` plus any optional
    /// modeled fields that are set. Passthrough keys are not re-emitted.
    pub fn to_toml(&self) -> Result<String, ManifestError> {
        let mut table = Table::new();
        table.insert("name".into(), Value::String(self.name.clone()));
        table.insert("version".into(), Value::String(self.version.clone()));
        table.insert("main".into(), Value::String(self.main.clone()));

        if let Some(ref description) = self.description {
            table.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(ref website) = self.website {
            table.insert("website".into(), Value::String(website.clone()));
        }
        if let Some(ref prefix) = self.prefix {
            table.insert("prefix".into(), Value::String(prefix.clone()));
        }
        if let Some(ref class_loader_of) = self.class_loader_of {
            table.insert("class-loader-of".into(), Value::String(class_loader_of.clone()));
        }

        toml::to_string_pretty(&Value::Table(table))
            .map_err(|e| ManifestError::MalformedSyntax(e.to_string()))
    }

    /// The canonical extension name, with spaces replaced by underscores.
    /// Unique identifier within a registry, and the name of the
    /// extension's data directory.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name exactly as written in the manifest.
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// The extension version. An arbitrary revision string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The entry-point symbol naming the type that implements the
    /// lifecycle contract.
    pub fn main(&self) -> &str {
        &self.main
    }

    /// Human-readable summary of the extension, if declared.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The extension's website, if declared.
    pub fn website(&self) -> Option<&str> {
        self.website.as_deref()
    }

    /// The token to prefix this extension's log messages with. Falls back
    /// to the extension name when not declared.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Deprecated passthrough field, retained for older packages.
    #[deprecated(note = "unused")]
    pub fn class_loader_of(&self) -> Option<&str> {
        self.class_loader_of.as_deref()
    }

    /// Unmodeled manifest keys, kept verbatim.
    pub fn extra(&self) -> &Table {
        &self.extra
    }

    /// Descriptive name combining the canonical name and version,
    /// e.g. `Inferno v1.4.1`.
    pub fn full_name(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

impl std::fmt::Display for Manifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-'))
}

fn take_string(table: &mut Table, key: &'static str) -> Result<String, ManifestError> {
    match table.remove(key) {
        None => Err(ManifestError::MissingField(key)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ManifestError::WrongType(key)),
    }
}

fn take_required(table: &mut Table, key: &'static str) -> Result<String, ManifestError> {
    let value = take_string(table, key)?;
    if value.is_empty() {
        return Err(ManifestError::MissingField(key));
    }
    Ok(value)
}

fn take_optional(table: &mut Table, key: &'static str) -> Result<Option<String>, ManifestError> {
    match table.remove(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ManifestError::WrongType(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let manifest = Manifest::parse(
            r#"
name = "Inferno"
version = "1.4.1"
main = "inferno::Inferno"
"#,
        )
        .unwrap();

        assert_eq!(manifest.name(), "Inferno");
        assert_eq!(manifest.raw_name(), "Inferno");
        assert_eq!(manifest.version(), "1.4.1");
        assert_eq!(manifest.main(), "inferno::Inferno");
        assert_eq!(manifest.full_name(), "Inferno v1.4.1");
        assert!(manifest.description().is_none());
    }

    #[test]
    fn test_parse_optional_fields() {
        let manifest = Manifest::parse(
            r#"
name = "Inferno"
version = "1.4.1"
main = "inferno::Inferno"
description = "Set yourself on fire"
website = "https://example.com/inferno"
prefix = "ex-why-zee"
"class-loader-of" = "Other"
"#,
        )
        .unwrap();

        assert_eq!(manifest.description(), Some("Set yourself on fire"));
        assert_eq!(manifest.website(), Some("https://example.com/inferno"));
        assert_eq!(manifest.prefix(), Some("ex-why-zee"));
        #[allow(deprecated)]
        {
            assert_eq!(manifest.class_loader_of(), Some("Other"));
        }
    }

    #[test]
    fn test_name_spaces_normalized() {
        let manifest = Manifest::parse(
            r#"
name = "My Plugin"
version = "1.0"
main = "my_plugin::MyPlugin"
"#,
        )
        .unwrap();

        assert_eq!(manifest.name(), "My_Plugin");
        assert_eq!(manifest.raw_name(), "My Plugin");
    }

    #[test]
    fn test_invalid_name_rejected() {
        let err = Manifest::parse(
            r#"
name = "My Plugin!"
version = "1.0"
main = "my_plugin::MyPlugin"
"#,
        )
        .unwrap_err();

        assert!(matches!(err, ManifestError::InvalidName(_)));
    }

    #[test]
    fn test_reserved_namespace_rejected() {
        let err = Manifest::parse(
            r#"
name = "Sneaky"
version = "1.0"
main = "hearth::Core"
"#,
        )
        .unwrap_err();

        assert!(matches!(err, ManifestError::ReservedNamespace(_)));
    }

    #[test]
    fn test_validation_order_short_circuits() {
        // Missing name is reported even though version is missing too.
        let err = Manifest::parse(r#"main = "a::B""#).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("name")));

        // An invalid name masks the missing version.
        let err = Manifest::parse(r#"name = "bad!name""#).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName(_)));

        // A valid name surfaces the missing version next.
        let err = Manifest::parse(r#"name = "Good""#).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("version")));
    }

    #[test]
    fn test_wrong_type() {
        let err = Manifest::parse(
            r#"
name = 42
version = "1.0"
main = "a::B"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::WrongType("name")));

        let err = Manifest::parse(
            r#"
name = "Ok"
version = "1.0"
main = "a::B"
website = false
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::WrongType("website")));
    }

    #[test]
    fn test_malformed_syntax() {
        let err = Manifest::parse("name = [unterminated").unwrap_err();
        assert!(matches!(err, ManifestError::MalformedSyntax(_)));
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let manifest = Manifest::parse(
            r#"
name = "Inferno"
version = "1.4.1"
main = "inferno::Inferno"
authors = ["Cogito", "verrier"]

[commands.flagrate]
description = "Set yourself on fire."
"#,
        )
        .unwrap();

        assert!(manifest.extra().contains_key("authors"));
        assert!(manifest.extra().contains_key("commands"));
    }

    #[test]
    fn test_roundtrip() {
        let manifest = Manifest::parse(
            r#"
name = "Round Trip"
version = "2.0.0"
main = "round_trip::RoundTrip"
description = "serializes back out"
"#,
        )
        .unwrap();

        let serialized = manifest.to_toml().unwrap();
        let parsed = Manifest::parse(&serialized).unwrap();

        assert_eq!(parsed.name(), manifest.name());
        assert_eq!(parsed.version(), manifest.version());
        assert_eq!(parsed.main(), manifest.main());
        assert_eq!(parsed.description(), manifest.description());
    }

    #[test]
    fn test_trusted_builder_skips_checks() {
        // The programmatic path normalizes spaces but accepts characters
        // the parser would reject.
        let manifest = Manifest::new("Trusted Name!", "0.1", "trusted::Type");
        assert_eq!(manifest.name(), "Trusted_Name!");
        assert_eq!(manifest.raw_name(), "Trusted Name!");
    }

    #[test]
    fn test_empty_required_fields() {
        let err = Manifest::parse(
            r#"
name = "Ok"
version = ""
main = "a::B"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("version")));
    }

    #[test]
    fn test_empty_name_fails_charset_check() {
        let err = Manifest::parse(
            r#"
name = ""
version = "1.0"
main = "a::B"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName(name) if name.is_empty()));
    }
}
