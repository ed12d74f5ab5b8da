//! Building a generation: discovery, the shared namespace and per-file units

use std::collections::{BTreeMap, HashMap};
use std::io;

use tracing::error;

use super::error::RegistryError;
use super::filter::ExtensionFilter;
use crate::config::DuplicatePolicy;
use crate::engine::Template;
use crate::error::ParseError;
use crate::source::{walk_entries, EntryKind, SourceError, SourceTree};

/// One complete build: the shared namespace and the units composed from it.
/// Never mutated once built.
#[derive(Debug)]
pub struct Generation {
    shared: Template,
    cache: BTreeMap<String, Template>,
}

impl Generation {
    /// A generation with no templates, used until the first build succeeds
    pub fn empty(base: &Template) -> Self {
        Self {
            shared: base.clone(),
            cache: BTreeMap::new(),
        }
    }

    /// The file's composed unit, or a shared definition executed under `name`
    pub fn resolve(&self, name: &str) -> Option<Template> {
        match self.cache.get(name) {
            Some(unit) => Some(unit.clone()),
            None => self.shared.lookup(name),
        }
    }

    /// Canonical paths of every cached unit, sorted
    pub fn names(&self) -> Vec<String> {
        self.cache.keys().cloned().collect()
    }

    pub fn shared(&self) -> &Template {
        &self.shared
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Everything a build reads; borrowed from the registry for one rebuild
pub(crate) struct Loader<'a> {
    pub source: &'a dyn SourceTree,
    pub filter: &'a ExtensionFilter,
    pub base: &'a Template,
    pub duplicates: DuplicatePolicy,
    pub debug: bool,
}

/// A template file read during discovery
struct SourceFile {
    path: String,
    text: String,
}

impl Loader<'_> {
    /// Discover, compile and compose. Any failure aborts the whole build.
    pub fn build(&self) -> Result<Generation, RegistryError> {
        let files = self.read_sources()?;
        let shared = self.build_shared(&files)?;
        let cache = self.compose(&shared, &files)?;
        Ok(Generation { shared, cache })
    }

    /// Walk the tree and read every matching file once
    fn read_sources(&self) -> Result<Vec<SourceFile>, RegistryError> {
        let mut files = Vec::new();
        for (path, kind) in walk_entries(self.source)? {
            if kind == EntryKind::Dir || !self.filter.matches(&path) {
                continue;
            }
            let bytes = self.source.read(&path)?;
            let text = String::from_utf8(bytes).map_err(|e| {
                SourceError::new(path.clone(), io::Error::new(io::ErrorKind::InvalidData, e))
            })?;
            files.push(SourceFile { path, text });
        }
        Ok(files)
    }

    /// Compile every file into one namespace, each under its canonical path
    fn build_shared(&self, files: &[SourceFile]) -> Result<Template, RegistryError> {
        let mut shared = self.base.clone();
        let mut owners: HashMap<String, &str> = HashMap::new();

        for file in files {
            shared = shared.renamed(file.path.as_str());
            let names = shared
                .parse(&file.text)
                .map_err(|e| self.compile_error(file, e))?;

            if self.duplicates == DuplicatePolicy::Reject {
                for name in names {
                    match owners.get(&name) {
                        Some(first) if *first != file.path => {
                            return Err(RegistryError::Duplicate {
                                name,
                                first: first.to_string(),
                                second: file.path.clone(),
                            });
                        }
                        _ => {
                            owners.insert(name, &file.path);
                        }
                    }
                }
            }
        }
        Ok(shared.renamed(self.base.name()))
    }

    /// Clone the namespace per file and compile the file's own text into the clone
    fn compose(
        &self,
        shared: &Template,
        files: &[SourceFile],
    ) -> Result<BTreeMap<String, Template>, RegistryError> {
        let mut cache = BTreeMap::new();
        for file in files {
            let mut unit = shared.clone().renamed(file.path.as_str());
            unit.parse(&file.text)
                .map_err(|e| self.compile_error(file, e))?;
            cache.insert(file.path.clone(), unit);
        }
        Ok(cache)
    }

    fn compile_error(&self, file: &SourceFile, err: ParseError) -> RegistryError {
        if self.debug {
            error!(path = %file.path, "{}", err.format(&file.text, &file.path));
        }
        RegistryError::Compile {
            path: file.path.clone(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn build(source: &MemorySource, policy: DuplicatePolicy) -> Result<Generation, RegistryError> {
        let filter = ExtensionFilter::new(["tmpl"]);
        let base = Template::new("");
        Loader {
            source,
            filter: &filter,
            base: &base,
            duplicates: policy,
            debug: false,
        }
        .build()
    }

    fn layout_and_pages() -> MemorySource {
        MemorySource::new()
            .with_file(
                "layouts/base.tmpl",
                r#"{{ define "base" }}[{{ block "content" . }}none{{ end }}]{{ end }}"#,
            )
            .with_file(
                "pages/a.tmpl",
                r#"{{ template "base" . }}{{ define "content" }}A{{ end }}"#,
            )
            .with_file(
                "pages/b.tmpl",
                r#"{{ template "base" . }}{{ define "content" }}B{{ end }}"#,
            )
            .with_file("notes.txt", "{{ broken")
    }

    fn render(unit: &Template) -> String {
        let mut out = Vec::new();
        unit.execute(&mut out, &serde_json::Value::Null).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_units_are_isolated() {
        let generation = build(&layout_and_pages(), DuplicatePolicy::LastWins).unwrap();
        assert_eq!(
            generation.names(),
            vec!["layouts/base.tmpl", "pages/a.tmpl", "pages/b.tmpl"]
        );
        assert_eq!(render(&generation.resolve("pages/a.tmpl").unwrap()), "[A]");
        assert_eq!(render(&generation.resolve("pages/b.tmpl").unwrap()), "[B]");
        // last file in walk order won in the shared namespace
        assert_eq!(render(&generation.resolve("base").unwrap()), "[B]");
        assert!(generation.resolve("notes.txt").is_none());
    }

    #[test]
    fn test_shared_names_include_paths_and_definitions() {
        let generation = build(&layout_and_pages(), DuplicatePolicy::LastWins).unwrap();
        let names = generation.shared().definition_names();
        for expected in ["base", "content", "layouts/base.tmpl", "pages/a.tmpl", "pages/b.tmpl"] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
        assert_eq!(generation.shared().name(), "");
    }

    #[test]
    fn test_reject_policy_names_both_files() {
        let err = build(&layout_and_pages(), DuplicatePolicy::Reject).unwrap_err();
        match err {
            RegistryError::Duplicate {
                name,
                first,
                second,
            } => {
                assert_eq!(name, "content");
                assert_eq!(first, "layouts/base.tmpl");
                assert_eq!(second, "pages/a.tmpl");
            }
            other => panic!("Expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_compile_error_names_path() {
        let source = layout_and_pages().with_file("pages/c.tmpl", "ok\n{{ .Name }");
        let err = build(&source, DuplicatePolicy::LastWins).unwrap_err();
        assert!(matches!(&err, RegistryError::Compile { path, .. } if path == "pages/c.tmpl"));
        assert!(err.to_string().starts_with("could not parse pages/c.tmpl: line 2: "), "{}", err);
    }

    #[test]
    fn test_invalid_utf8_is_a_source_error() {
        let source = MemorySource::new().with_file("bad.tmpl", vec![0xffu8, 0xfe]);
        let err = build(&source, DuplicatePolicy::LastWins).unwrap_err();
        match err {
            RegistryError::Source(e) => {
                assert_eq!(e.path, "bad.tmpl");
                assert_eq!(e.source.kind(), io::ErrorKind::InvalidData);
            }
            other => panic!("Expected source error, got {:?}", other),
        }
    }
}
