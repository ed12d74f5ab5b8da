//! Template registry
//!
//! Discovers template files in a [`SourceTree`], compiles them into one
//! shared namespace, and composes one isolated unit per file from it. Units
//! are cached in a generation that is replaced as a whole on every rebuild.
//!
//! Lock order: [`Registry::load`] holds the write lock for the whole rebuild.
//! Readers hold the read lock only long enough to clone the current
//! generation handle, and never while rendering. With reload mode on, an
//! access runs `load` (write lock taken and released) before it reads.

mod error;
pub mod filter;
pub mod loader;

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

pub use error::RegistryError;
pub use filter::ExtensionFilter;
pub use loader::Generation;

use crate::config::{DuplicatePolicy, RegistryConfig};
use crate::engine::Template;
use crate::source::SourceTree;
use loader::Loader;

/// Compiled templates for one source tree
pub struct Registry {
    source: Box<dyn SourceTree>,
    filter: ExtensionFilter,
    /// Empty namespace carrying the function table and engine options
    base: Template,
    duplicates: DuplicatePolicy,
    debug: AtomicBool,
    reload: AtomicBool,
    current: RwLock<Arc<Generation>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("filter", &self.filter)
            .field("base", &self.base)
            .field("duplicates", &self.duplicates)
            .field("debug", &self.is_debug())
            .field("reload", &self.is_reload())
            .field("templates", &self.list_all())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Create a registry with the default configuration and load it
    pub fn new(source: impl SourceTree + 'static) -> Result<Self, RegistryError> {
        Self::with_config(source, RegistryConfig::default())
    }

    /// Create a registry and load it. Fails if the first build fails.
    pub fn with_config(
        source: impl SourceTree + 'static,
        config: RegistryConfig,
    ) -> Result<Self, RegistryError> {
        let base = Template::new("")
            .with_funcs(config.funcs.clone())
            .with_options(config.options());
        let registry = Self {
            source: Box::new(source),
            filter: ExtensionFilter::new(&config.extensions),
            current: RwLock::new(Arc::new(Generation::empty(&base))),
            base,
            duplicates: config.duplicates,
            debug: AtomicBool::new(config.debug),
            reload: AtomicBool::new(config.reload),
        };
        registry.load()?;
        Ok(registry)
    }

    /// Rebuild every template from the source tree.
    ///
    /// The new generation is installed only if the whole build succeeds;
    /// on failure the previous one stays in place and the error is returned.
    pub fn load(&self) -> Result<(), RegistryError> {
        let mut current = self.current.write();
        let loader = Loader {
            source: self.source.as_ref(),
            filter: &self.filter,
            base: &self.base,
            duplicates: self.duplicates,
            debug: self.is_debug(),
        };

        match loader.build() {
            Ok(generation) => {
                debug!(templates = generation.len(), "template cache rebuilt");
                *current = Arc::new(generation);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "template cache rebuild failed, keeping previous templates");
                Err(err)
            }
        }
    }

    /// Current generation, after a rebuild when reload mode is on
    fn snapshot(&self) -> Result<Arc<Generation>, RegistryError> {
        if self.is_reload() {
            self.load()?;
        }
        Ok(Arc::clone(&self.current.read()))
    }

    /// Look up a template by canonical path, falling back to a definition in
    /// the shared namespace. `Ok(None)` means neither exists.
    ///
    /// In reload mode this rebuilds everything first.
    pub fn get(&self, name: &str) -> Result<Option<Template>, RegistryError> {
        Ok(self.snapshot()?.resolve(name))
    }

    /// Whether [`Registry::get`] would find `name`; a failed rebuild counts as absent
    pub fn exists(&self, name: &str) -> bool {
        matches!(self.get(name), Ok(Some(_)))
    }

    /// Render `name` with `data` into `out`.
    ///
    /// `data` is converted to a JSON value first; a conversion failure is
    /// reported as [`RegistryError::Render`] wrapping [`RegistryError::Data`]. In reload mode this
    /// rebuilds everything before resolving `name`.
    pub fn render<W, T>(&self, out: &mut W, name: &str, data: &T) -> Result<(), RegistryError>
    where
        W: Write + ?Sized,
        T: Serialize + ?Sized,
    {
        let generation = self.snapshot().map_err(|err| RegistryError::Render {
            name: name.to_string(),
            source: Box::new(err),
        })?;
        let Some(unit) = generation.resolve(name) else {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
                known: generation.names(),
            });
        };
        let data = serde_json::to_value(data).map_err(|err| RegistryError::Render {
            name: name.to_string(),
            source: Box::new(RegistryError::Data(err)),
        })?;

        if self.is_debug() {
            info!(name, keys = ?unit.definition_names(), "Rendering template");
        }
        unit.execute(out, &data)
            .map_err(|source| RegistryError::Execute {
                name: name.to_string(),
                source,
            })
    }

    /// [`Registry::render`] into a string
    pub fn render_to_string<T>(&self, name: &str, data: &T) -> Result<String, RegistryError>
    where
        T: Serialize + ?Sized,
    {
        let mut buf = Vec::new();
        self.render(&mut buf, name, data)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Canonical paths of all cached templates, sorted. Never reloads.
    pub fn list_all(&self) -> Vec<String> {
        self.current.read().names()
    }

    pub fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }

    pub fn set_reload(&self, reload: bool) {
        self.reload.store(reload, Ordering::Relaxed);
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn is_reload(&self) -> bool {
        self.reload.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use serde_json::json;

    fn source() -> Arc<MemorySource> {
        Arc::new(
            MemorySource::new()
                .with_file("greeting.tmpl", "Hello, {{ .Name }}!")
                .with_file("parts.tmpl", r#"{{ define "sig" }}-- {{ . }}{{ end }}"#),
        )
    }

    #[test]
    fn test_render_cached_and_shared() {
        let registry = Registry::new(source()).unwrap();
        assert_eq!(registry.list_all(), vec!["greeting.tmpl", "parts.tmpl"]);
        assert_eq!(
            registry.render_to_string("greeting.tmpl", &json!({"Name": "Pen"})).unwrap(),
            "Hello, Pen!"
        );
        assert_eq!(registry.render_to_string("sig", "me").unwrap(), "-- me");
    }

    #[test]
    fn test_get_and_exists() {
        let registry = Registry::new(source()).unwrap();
        assert_eq!(registry.get("greeting.tmpl").unwrap().unwrap().name(), "greeting.tmpl");
        assert_eq!(registry.get("sig").unwrap().unwrap().name(), "sig");
        assert!(registry.get("nope.tmpl").unwrap().is_none());
        assert!(registry.exists("sig"));
        assert!(!registry.exists("nope.tmpl"));
    }

    #[test]
    fn test_not_found_lists_known_templates() {
        let registry = Registry::new(source()).unwrap();
        let err = registry.render_to_string("nope.tmpl", &()).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"could not render nope.tmpl: template is missing, known templates: ["greeting.tmpl", "parts.tmpl"]"#
        );
    }

    #[test]
    fn test_reload_flag() {
        let files = source();
        let registry = Registry::new(Arc::clone(&files)).unwrap();
        files.insert("greeting.tmpl", "Hi, {{ .Name }}.");

        let data = json!({"Name": "Pen"});
        assert_eq!(registry.render_to_string("greeting.tmpl", &data).unwrap(), "Hello, Pen!");

        registry.set_reload(true);
        assert!(registry.is_reload());
        assert_eq!(registry.render_to_string("greeting.tmpl", &data).unwrap(), "Hi, Pen.");
    }

    #[test]
    fn test_failed_load_keeps_previous_generation() {
        let files = source();
        let registry = Registry::new(Arc::clone(&files)).unwrap();
        files.insert("greeting.tmpl", "Hello, {{ .Name }");

        assert!(matches!(registry.load(), Err(RegistryError::Compile { .. })));
        assert_eq!(
            registry.render_to_string("greeting.tmpl", &json!({"Name": "Pen"})).unwrap(),
            "Hello, Pen!"
        );

        registry.set_reload(true);
        let err = registry.render_to_string("greeting.tmpl", &json!({})).unwrap_err();
        assert!(matches!(&err, RegistryError::Render { name, .. } if name == "greeting.tmpl"));
        assert!(!registry.exists("greeting.tmpl"));
    }

    #[test]
    fn test_construction_fails_on_bad_template() {
        let files = MemorySource::new().with_file("bad.tmpl", "{{ if }}");
        assert!(matches!(
            Registry::new(files),
            Err(RegistryError::Compile { path, .. }) if path == "bad.tmpl"
        ));
    }

    #[test]
    fn test_deeply_nested_file_is_a_compile_error() {
        let levels = crate::engine::MAX_NESTING * 30;
        let text = "{{ if 1 }}".repeat(levels) + "x" + &"{{ end }}".repeat(levels);
        let files = MemorySource::new().with_file("deep.tmpl", text);
        let err = Registry::new(files).unwrap_err();
        assert!(matches!(&err, RegistryError::Compile { path, .. } if path == "deep.tmpl"));
        assert!(err.to_string().contains("exceeded maximum nesting depth"), "{}", err);
    }

    struct Unrepresentable;

    impl Serialize for Unrepresentable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not representable"))
        }
    }

    #[test]
    fn test_data_conversion_error_names_template() {
        let registry = Registry::new(source()).unwrap();
        let err = registry
            .render_to_string("greeting.tmpl", &Unrepresentable)
            .unwrap_err();
        match &err {
            RegistryError::Render { name, source } => {
                assert_eq!(name, "greeting.tmpl");
                assert!(matches!(**source, RegistryError::Data(_)));
            }
            other => panic!("Expected render error, got {:?}", other),
        }
        assert_eq!(
            err.to_string(),
            "could not render greeting.tmpl: could not convert template data: not representable"
        );
    }

    #[test]
    fn test_registry_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Registry>();
    }
}
