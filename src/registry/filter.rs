//! Extension allow-list

use std::collections::HashSet;

/// Decides which paths are templates by their extension
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    allowed: HashSet<String>,
}

impl ExtensionFilter {
    /// Extensions are given without the leading dot. An empty list accepts
    /// every path.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_string())
                .collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        extension(path).is_some_and(|ext| self.allowed.contains(ext))
    }
}

/// Text after the last dot of the final path component
pub fn extension(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.').map(|(_, ext)| ext)
}
