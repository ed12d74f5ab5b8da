//! Syntax tree for compiled templates

use serde_json::Value;

use super::lexer::Span;

/// A node with its source location
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Sequence of nodes forming a template body
pub type Body = Vec<Spanned<Node>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text copied to the output
    Text(String),
    /// `{{ pipeline }}`: evaluate and print unless it declares variables
    Action(Pipeline),
    If {
        cond: Pipeline,
        then: Body,
        otherwise: Option<Body>,
    },
    Range {
        over: Pipeline,
        body: Body,
        otherwise: Option<Body>,
    },
    With {
        value: Pipeline,
        body: Body,
        otherwise: Option<Body>,
    },
    /// `{{ template "name" pipeline }}`
    Template {
        name: String,
        data: Option<Pipeline>,
    },
    /// `{{ block "name" pipeline }}body{{ end }}`: define and invoke in place
    Block {
        name: String,
        data: Pipeline,
        body: Body,
    },
    /// `{{ define "name" }}body{{ end }}`, hoisted out at compile time
    Define { name: String, body: Body },
}

/// Commands joined by `|`, optionally declaring variables
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub decl: Vec<String>,
    pub commands: Vec<Spanned<Command>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Function call with space-separated arguments
    Call { name: String, args: Vec<Operand> },
    Operand(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The cursor `.`
    Dot,
    /// `.A.B` relative to the cursor
    Field(Vec<String>),
    /// `$name.A.B`
    Variable { name: String, fields: Vec<String> },
    Literal(Value),
    /// `(pipeline).A.B`
    Nested {
        pipeline: Box<Pipeline>,
        fields: Vec<String>,
    },
}

impl Node {
    /// Collect every function name called below this node, with the call's span
    pub fn calls<'a>(&'a self, out: &mut Vec<(&'a str, Span)>) {
        match self {
            Node::Text(_) | Node::Define { .. } => {}
            Node::Action(p) => p.calls(out),
            Node::If {
                cond: p,
                then: body,
                otherwise,
            }
            | Node::Range {
                over: p,
                body,
                otherwise,
            }
            | Node::With {
                value: p,
                body,
                otherwise,
            } => {
                p.calls(out);
                body_calls(body, out);
                if let Some(other) = otherwise {
                    body_calls(other, out);
                }
            }
            Node::Template { data, .. } => {
                if let Some(p) = data {
                    p.calls(out);
                }
            }
            Node::Block { data, body, .. } => {
                data.calls(out);
                body_calls(body, out);
            }
        }
    }
}

pub(crate) fn body_calls<'a>(body: &'a Body, out: &mut Vec<(&'a str, Span)>) {
    for node in body {
        node.node.calls(out);
    }
}

impl Pipeline {
    fn calls<'a>(&'a self, out: &mut Vec<(&'a str, Span)>) {
        for cmd in &self.commands {
            match &cmd.node {
                Command::Call { name, args } => {
                    out.push((name.as_str(), cmd.span.clone()));
                    for arg in args {
                        arg.calls(out);
                    }
                }
                Command::Operand(op) => op.calls(out),
            }
        }
    }
}

impl Operand {
    fn calls<'a>(&'a self, out: &mut Vec<(&'a str, Span)>) {
        if let Operand::Nested { pipeline, .. } = self {
            pipeline.calls(out);
        }
    }
}
