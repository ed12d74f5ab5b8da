//! Keystone - a registry of text templates discovered from a file tree
//!
//! Every template file is compiled into one shared namespace, so any file can
//! call definitions from any other. Each file then gets its own unit: a copy
//! of the namespace with the file compiled into it again, which lets a page
//! override a definition such as `content` without the override leaking into
//! other pages.
//!
//! # Example
//!
//! ```rust
//! use keystone::{MemorySource, Registry};
//! use serde_json::json;
//!
//! let source = MemorySource::new()
//!     .with_file(
//!         "layouts/base.tmpl",
//!         r#"{{ define "layouts/base.tmpl" }}<main>{{ block "content" . }}empty{{ end }}</main>{{ end }}"#,
//!     )
//!     .with_file(
//!         "pages/hello.tmpl",
//!         r#"{{ template "layouts/base.tmpl" . }}{{ define "content" }}Hello, {{ .Name }}!{{ end }}"#,
//!     );
//!
//! let registry = Registry::new(source).unwrap();
//! let html = registry
//!     .render_to_string("pages/hello.tmpl", &json!({ "Name": "Pen" }))
//!     .unwrap();
//! assert_eq!(html, "<main>Hello, Pen!</main>");
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod source;

pub use config::{ConfigError, DuplicatePolicy, RegistryConfig, DEFAULT_EXTENSIONS};
pub use engine::{Escape, FuncMap, MissingKey, Template};
pub use error::{ExecError, ParseError};
pub use registry::{Registry, RegistryError};
pub use source::{DirSource, MemorySource, SourceError, SourceTree};
