//! Registry configuration
//!
//! Settings can be built in code with the `with_*` methods or loaded from
//! TOML. Function bindings are code-only.
//!
//! ```toml
//! extensions = ["tmpl", "html"]
//! debug = true
//! reload = true
//! duplicates = "reject"
//! escape = "off"
//! missing-key = "zero"
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::{Escape, FuncMap, MissingKey, Options};

/// Extensions a registry accepts when none are configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["tmpl", "html", "gohtml", "gotmpl", "tpl"];

/// Errors that can occur when loading or parsing configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read registry config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse registry config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// What happens when two files define the same name in the shared namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// The file compiled later (in walk order) wins
    #[default]
    LastWins,
    /// Fail the build
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RegistryConfig {
    /// Accepted file extensions without the dot; empty accepts every file
    pub extensions: Vec<String>,

    /// Functions callable from every template
    #[serde(skip)]
    pub funcs: FuncMap,

    /// Trace renders and report compile errors with source excerpts
    pub debug: bool,

    /// Rebuild everything before each lookup
    pub reload: bool,

    pub duplicates: DuplicatePolicy,

    pub escape: Escape,

    pub missing_key: MissingKey,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            funcs: FuncMap::default(),
            debug: false,
            reload: false,
            duplicates: DuplicatePolicy::default(),
            escape: Escape::default(),
            missing_key: MissingKey::default(),
        }
    }
}

impl RegistryConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_funcs(mut self, funcs: FuncMap) -> Self {
        self.funcs = funcs;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_reload(mut self, reload: bool) -> Self {
        self.reload = reload;
        self
    }

    pub fn with_duplicates(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn with_escape(mut self, escape: Escape) -> Self {
        self.escape = escape;
        self
    }

    pub fn with_missing_key(mut self, missing_key: MissingKey) -> Self {
        self.missing_key = missing_key;
        self
    }

    /// Engine options derived from this configuration
    pub fn options(&self) -> Options {
        Options {
            escape: self.escape,
            missing_key: self.missing_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.extensions, vec!["tmpl", "html", "gohtml", "gotmpl", "tpl"]);
        assert!(config.funcs.is_empty());
        assert!(!config.debug);
        assert!(!config.reload);
        assert_eq!(config.duplicates, DuplicatePolicy::LastWins);
        assert_eq!(config.options(), Options::default());
    }

    #[test]
    fn test_builder() {
        let config = RegistryConfig::new()
            .with_extensions(["txt"])
            .with_debug(true)
            .with_reload(true)
            .with_duplicates(DuplicatePolicy::Reject)
            .with_escape(Escape::Off)
            .with_missing_key(MissingKey::Zero);
        assert_eq!(config.extensions, vec!["txt"]);
        assert!(config.debug && config.reload);
        assert_eq!(config.duplicates, DuplicatePolicy::Reject);
        assert_eq!(config.options().escape, Escape::Off);
        assert_eq!(config.options().missing_key, MissingKey::Zero);
    }

    #[test]
    fn test_from_str_full() {
        let config = RegistryConfig::from_str(
            r#"
            extensions = ["html"]
            debug = true
            reload = true
            duplicates = "reject"
            escape = "off"
            missing-key = "zero"
            "#,
        )
        .unwrap();
        assert_eq!(config.extensions, vec!["html"]);
        assert!(config.debug);
        assert!(config.reload);
        assert_eq!(config.duplicates, DuplicatePolicy::Reject);
        assert_eq!(config.escape, Escape::Off);
        assert_eq!(config.missing_key, MissingKey::Zero);
    }

    #[test]
    fn test_from_str_partial_keeps_defaults() {
        let config = RegistryConfig::from_str("reload = true").unwrap();
        assert!(config.reload);
        assert_eq!(config.extensions.len(), DEFAULT_EXTENSIONS.len());
        assert_eq!(config.escape, Escape::Html);
    }

    #[test]
    fn test_from_str_rejects_unknown_policy() {
        let err = RegistryConfig::from_str(r#"duplicates = "first-wins""#).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_from_file_missing() {
        let err = RegistryConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
