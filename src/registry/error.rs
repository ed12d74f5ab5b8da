use thiserror::Error;

use crate::error::{ExecError, ParseError};
use crate::source::SourceError;

/// Errors that can occur while loading or rendering templates
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The source tree could not be listed or a file could not be read
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A template file failed to compile
    #[error("could not parse {path}: {source}")]
    Compile { path: String, source: ParseError },

    /// Two files defined the same name under the reject policy
    #[error("template {name:?} is defined in both {first} and {second}")]
    Duplicate {
        name: String,
        first: String,
        second: String,
    },

    /// Rebuilding or converting the data before a render failed
    #[error("could not render {name}: {source}")]
    Render {
        name: String,
        source: Box<RegistryError>,
    },

    #[error("could not render {name}: template is missing, known templates: {known:?}")]
    NotFound { name: String, known: Vec<String> },

    #[error("could not render {name}: {source}")]
    Execute { name: String, source: ExecError },

    /// Render data could not be turned into a template value
    #[error("could not convert template data: {0}")]
    Data(#[from] serde_json::Error),
}
