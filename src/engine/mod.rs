//! Text template engine
//!
//! A [`Template`] is a set of named definitions sharing one function table,
//! plus the name of the definition it executes by default. Cloning is cheap:
//! the definition table is copy-on-write, so a clone can be compiled further
//! without the original observing any change.

pub mod ast;
mod exec;
pub mod funcs;
pub mod grammar;
pub mod lexer;
pub mod value;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ExecError, ParseError};
use ast::{Body, Node};
pub use exec::MAX_DEPTH;
pub use funcs::{FuncMap, Function};
pub use grammar::MAX_NESTING;
use lexer::Span;

/// How printed values are escaped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Escape {
    /// Escape `& < > " '` for HTML output
    #[default]
    Html,
    Off,
}

/// What a field lookup does when the key is absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingKey {
    /// Fail execution
    #[default]
    Error,
    /// Yield null, which prints as nothing
    Zero,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    pub escape: Escape,
    pub missing_key: MissingKey,
}

/// Source a tree was compiled from, kept for error locations
#[derive(Debug)]
pub struct Origin {
    pub name: String,
    pub source: String,
}

/// A compiled definition
#[derive(Debug)]
pub struct Tree {
    pub name: String,
    pub origin: Arc<Origin>,
    pub root: Body,
}

#[derive(Clone)]
pub struct Template {
    name: String,
    defs: Arc<BTreeMap<String, Arc<Tree>>>,
    funcs: Arc<FuncMap>,
    options: Options,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("definitions", &self.defs.keys().collect::<Vec<_>>())
            .field("funcs", &self.funcs)
            .field("options", &self.options)
            .finish()
    }
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defs: Arc::new(BTreeMap::new()),
            funcs: Arc::new(FuncMap::default()),
            options: Options::default(),
        }
    }

    pub fn with_funcs(mut self, funcs: FuncMap) -> Self {
        self.funcs = Arc::new(funcs);
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> Options {
        self.options
    }

    /// Same definitions, executed under a different entry name
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The definition `name` as its own entry point, if it exists
    pub fn lookup(&self, name: &str) -> Option<Template> {
        if self.defs.contains_key(name) {
            Some(self.clone().renamed(name))
        } else {
            None
        }
    }

    pub fn has_definition(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Names of all definitions, sorted
    pub fn definition_names(&self) -> Vec<String> {
        self.defs.keys().cloned().collect()
    }

    /// Compile `source` under this template's name.
    ///
    /// The top-level body becomes the definition named after the template;
    /// every `define` and `block` becomes a definition of its own. Nothing is
    /// registered unless the whole source compiles. Returns the names that
    /// were registered, in registration order.
    pub fn parse(&mut self, source: &str) -> Result<Vec<String>, ParseError> {
        let body = grammar::parse(source)?;

        let mut root = Vec::new();
        let mut defined: Vec<(String, Body, Span)> = Vec::new();
        for node in body {
            match node.node {
                Node::Define { name, body } => {
                    hoist(&body, source, &mut defined)?;
                    defined.push((name, body, node.span));
                }
                _ => root.push(node),
            }
        }
        hoist(&root, source, &mut defined)?;

        self.check_calls(source, &root, &defined)?;

        // Within one source, a name may only be given a non-empty body once
        let mut seen: BTreeMap<&str, bool> = BTreeMap::new();
        let root_blank = is_blank(&root);
        seen.insert(&self.name, !root_blank);
        for (name, body, span) in &defined {
            let blank = is_blank(body);
            match seen.get_mut(name.as_str()) {
                Some(non_empty) if *non_empty && !blank => {
                    return Err(ParseError::syntax(
                        source,
                        span.clone(),
                        format!("template: multiple definition of template {:?}", name),
                    ));
                }
                Some(non_empty) => *non_empty |= !blank,
                None => {
                    seen.insert(name, !blank);
                }
            }
        }

        let origin = Arc::new(Origin {
            name: self.name.clone(),
            source: source.to_string(),
        });
        let mut registered = Vec::new();
        let defs = Arc::make_mut(&mut self.defs);
        let entries = std::iter::once((self.name.clone(), root))
            .chain(defined.into_iter().map(|(name, body, _)| (name, body)));
        for (name, body) in entries {
            let tree = Arc::new(Tree {
                name: name.clone(),
                origin: Arc::clone(&origin),
                root: body,
            });
            match defs.entry(name.clone()) {
                Entry::Occupied(_) if is_blank(&tree.root) => continue,
                Entry::Occupied(mut slot) => {
                    slot.insert(tree);
                }
                Entry::Vacant(slot) => {
                    slot.insert(tree);
                }
            }
            registered.push(name);
        }
        Ok(registered)
    }

    fn check_calls(
        &self,
        source: &str,
        root: &Body,
        defined: &[(String, Body, Span)],
    ) -> Result<(), ParseError> {
        let mut calls = Vec::new();
        ast::body_calls(root, &mut calls);
        for (_, body, _) in defined {
            ast::body_calls(body, &mut calls);
        }
        for (name, span) in calls {
            if !self.funcs.contains(name) && funcs::builtin(name).is_none() {
                return Err(ParseError::syntax(
                    source,
                    span,
                    format!("function {:?} not defined", name),
                ));
            }
        }
        Ok(())
    }

    /// Execute the entry definition with `data` as `.` and `$`
    pub fn execute<W: Write + ?Sized>(&self, out: &mut W, data: &Value) -> Result<(), ExecError> {
        self.execute_template(out, &self.name, data)
    }

    /// Execute the definition `name`
    pub fn execute_template<W: Write + ?Sized>(
        &self,
        out: &mut W,
        name: &str,
        data: &Value,
    ) -> Result<(), ExecError> {
        match self.defs.get(name) {
            Some(tree) => exec::execute(self, tree, out, data),
            None => Err(ExecError::Undefined {
                name: name.to_string(),
                owner: self.name.clone(),
            }),
        }
    }
}

/// Move `block` bodies out as definitions; `define` is only valid at top level
fn hoist(body: &Body, source: &str, out: &mut Vec<(String, Body, Span)>) -> Result<(), ParseError> {
    for node in body {
        match &node.node {
            Node::Define { name, .. } => {
                return Err(ParseError::syntax(
                    source,
                    node.span.clone(),
                    format!("unexpected define of {:?} inside an action", name),
                ));
            }
            Node::Block { name, body, .. } => {
                hoist(body, source, out)?;
                out.push((name.clone(), body.clone(), node.span.clone()));
            }
            Node::If {
                then: body,
                otherwise,
                ..
            }
            | Node::Range {
                body, otherwise, ..
            }
            | Node::With {
                body, otherwise, ..
            } => {
                hoist(body, source, out)?;
                if let Some(other) = otherwise {
                    hoist(other, source, out)?;
                }
            }
            Node::Text(_) | Node::Action(_) | Node::Template { .. } => {}
        }
    }
    Ok(())
}

/// A body containing nothing but whitespace text
fn is_blank(body: &Body) -> bool {
    body.iter()
        .all(|n| matches!(&n.node, Node::Text(t) if t.trim().is_empty()))
}
