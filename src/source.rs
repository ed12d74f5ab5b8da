//! Read-only file trees that templates are discovered in
//!
//! Paths are always "/"-separated and relative to the tree root, which is
//! addressed by the empty path.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// A source tree operation failed
#[derive(Error, Debug)]
#[error("could not read {}: {source}", display_path(.path))]
pub struct SourceError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "."
    } else {
        path
    }
}

impl SourceError {
    pub fn new(path: impl Into<String>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// A directory entry, named relative to its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
}

impl Entry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Dir,
        }
    }
}

/// A hierarchical, read-only file source
pub trait SourceTree: Send + Sync {
    /// Entries directly under `path`, in any order
    fn read_dir(&self, path: &str) -> Result<Vec<Entry>, SourceError>;

    /// Full contents of the file at `path`
    fn read(&self, path: &str) -> Result<Vec<u8>, SourceError>;

    /// Every path in the tree, directories included, in walk order
    fn list_all(&self) -> Result<Vec<String>, SourceError> {
        walk(self)
    }
}

/// Every path in the tree, directories included, in walk order.
///
/// See [`walk_entries`] for the order.
pub fn walk<T: SourceTree + ?Sized>(tree: &T) -> Result<Vec<String>, SourceError> {
    Ok(walk_entries(tree)?.into_iter().map(|(path, _)| path).collect())
}

/// Depth-first preorder walk from the root, siblings in lexical order.
///
/// Each directory appears before its contents. The root itself is not
/// listed. The first error aborts the walk.
pub fn walk_entries<T: SourceTree + ?Sized>(
    tree: &T,
) -> Result<Vec<(String, EntryKind)>, SourceError> {
    let mut found = Vec::new();
    let mut stack: Vec<(String, EntryKind)> = vec![(String::new(), EntryKind::Dir)];

    while let Some((path, kind)) = stack.pop() {
        if !path.is_empty() {
            found.push((path.clone(), kind));
        }
        if kind != EntryKind::Dir {
            continue;
        }

        let mut entries = tree.read_dir(&path)?;
        entries.sort_by(|a, b| b.name.cmp(&a.name));
        for entry in entries {
            let child = join(&path, &entry.name);
            stack.push((child, entry.kind));
        }
    }
    Ok(found)
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

impl<T: SourceTree + ?Sized> SourceTree for Arc<T> {
    fn read_dir(&self, path: &str) -> Result<Vec<Entry>, SourceError> {
        (**self).read_dir(path)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        (**self).read(path)
    }

    fn list_all(&self) -> Result<Vec<String>, SourceError> {
        (**self).list_all()
    }
}

/// A directory on the local filesystem
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SourceError> {
        let mut full = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
            if part == ".." {
                return Err(SourceError::new(
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "path escapes the source root"),
                ));
            }
            full.push(part);
        }
        Ok(full)
    }
}

impl SourceTree for DirSource {
    fn read_dir(&self, path: &str) -> Result<Vec<Entry>, SourceError> {
        let full = self.resolve(path)?;
        let err = |e| SourceError::new(path, e);

        let mut entries = Vec::new();
        for item in fs::read_dir(&full).map_err(err)? {
            let item = item.map_err(err)?;
            let name = item.file_name().to_string_lossy().into_owned();
            // follow symlinks so linked directories are walked
            let meta = fs::metadata(item.path()).map_err(|e| SourceError::new(join(path, &name), e))?;
            let kind = if meta.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            entries.push(Entry { name, kind });
        }
        Ok(entries)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        let full = self.resolve(path)?;
        fs::read(full).map_err(|e| SourceError::new(path, e))
    }
}

/// An in-memory tree; directories are implied by file paths
#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemorySource::insert`]
    pub fn with_file(self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Add or replace a file
    pub fn insert(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), contents.into());
    }

    pub fn remove(&self, path: &str) -> Option<Vec<u8>> {
        self.files.write().remove(path)
    }
}

impl<P: Into<String>, C: Into<Vec<u8>>> FromIterator<(P, C)> for MemorySource {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        let files = iter
            .into_iter()
            .map(|(p, c)| (p.into(), c.into()))
            .collect();
        Self {
            files: RwLock::new(files),
        }
    }
}

impl SourceTree for MemorySource {
    fn read_dir(&self, path: &str) -> Result<Vec<Entry>, SourceError> {
        let files = self.files.read();
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };

        let mut entries: BTreeMap<&str, EntryKind> = BTreeMap::new();
        for key in files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    entries.insert(dir, EntryKind::Dir);
                }
                None => {
                    entries.entry(rest).or_insert(EntryKind::File);
                }
            }
        }

        if entries.is_empty() && !path.is_empty() {
            return Err(SourceError::new(
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such directory"),
            ));
        }
        Ok(entries
            .into_iter()
            .map(|(name, kind)| Entry {
                name: name.to_string(),
                kind,
            })
            .collect())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        self.files.read().get(path).cloned().ok_or_else(|| {
            SourceError::new(path, io::Error::new(io::ErrorKind::NotFound, "no such file"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemorySource {
        MemorySource::from_iter([
            ("pages/b.tmpl", "b"),
            ("README.md", "readme"),
            ("layouts/base.tmpl", "base"),
            ("pages/a/deep.tmpl", "deep"),
        ])
    }

    #[test]
    fn test_walk_is_preorder_and_sorted() {
        assert_eq!(
            sample().list_all().unwrap(),
            vec![
                "README.md",
                "layouts",
                "layouts/base.tmpl",
                "pages",
                "pages/a",
                "pages/a/deep.tmpl",
                "pages/b.tmpl",
            ]
        );
    }

    #[test]
    fn test_walk_entries_reports_kinds() {
        let entries = walk_entries(&sample()).unwrap();
        assert_eq!(entries[0], ("README.md".to_string(), EntryKind::File));
        assert_eq!(entries[1], ("layouts".to_string(), EntryKind::Dir));
        assert_eq!(entries[4], ("pages/a".to_string(), EntryKind::Dir));
    }

    #[test]
    fn test_memory_read() {
        let source = sample();
        assert_eq!(source.read("pages/b.tmpl").unwrap(), b"b");
        let err = source.read("pages/missing.tmpl").unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().starts_with("could not read pages/missing.tmpl: "));
    }

    #[test]
    fn test_memory_insert_and_remove() {
        let source = MemorySource::new().with_file("a.tmpl", "a");
        source.insert("b/c.tmpl", "c");
        assert_eq!(source.list_all().unwrap(), vec!["a.tmpl", "b", "b/c.tmpl"]);
        assert_eq!(source.remove("a.tmpl"), Some(b"a".to_vec()));
        assert_eq!(source.list_all().unwrap(), vec!["b", "b/c.tmpl"]);
    }

    struct Broken;

    impl SourceTree for Broken {
        fn read_dir(&self, path: &str) -> Result<Vec<Entry>, SourceError> {
            match path {
                "" => Ok(vec![Entry::dir("locked"), Entry::file("z.tmpl")]),
                _ => Err(SourceError::new(
                    path,
                    io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
                )),
            }
        }

        fn read(&self, path: &str) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::new(path, io::Error::from(io::ErrorKind::NotFound)))
        }
    }

    #[test]
    fn test_walk_aborts_on_first_error() {
        let err = Broken.list_all().unwrap_err();
        assert_eq!(err.path, "locked");
        assert_eq!(err.source.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_root_error_displays_dot() {
        let err = DirSource::new("/definitely/not/a/dir").list_all().unwrap_err();
        assert!(err.to_string().starts_with("could not read .: "), "{}", err);
    }

    #[test]
    fn test_dir_source_rejects_parent_paths() {
        let source = DirSource::new(env!("CARGO_MANIFEST_DIR"));
        let err = source.read("../outside").unwrap_err();
        assert_eq!(err.source.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_dir_source_reads_fixtures() {
        let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/templates");
        let source = DirSource::new(root);
        let paths = source.list_all().unwrap();
        assert!(paths.contains(&"pages/catalog/product.tmpl".to_string()));
        assert!(source.read("partials/results.tmpl").is_ok());
    }
}
