//! Error types for compiling and executing templates

use std::fmt;

use ariadne::{Color, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::engine::lexer::Token;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Syntax {
        line: usize,
        span: Span,
        message: String,
        expected: Vec<String>,
    },
}

impl ParseError {
    /// Build a syntax error at `span`, computing the line from `source`
    pub(crate) fn syntax(source: &str, span: Span, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            line: line_of(source, span.start),
            span,
            message: message.into(),
            expected: Vec::new(),
        }
    }

    /// 1-based line the error points at
    pub fn line(&self) -> usize {
        match self {
            ParseError::Syntax { line, .. } => *line,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            ParseError::Syntax { span, .. } => span.clone(),
        }
    }

    /// Format the error with source context using ariadne
    pub fn format(&self, source: &str, filename: &str) -> String {
        let mut buf = Vec::new();
        match self {
            ParseError::Syntax {
                span,
                message,
                expected,
                ..
            } => {
                let expected_str = if expected.is_empty() {
                    String::new()
                } else {
                    format!("\nExpected: {}", expected.join(", "))
                };

                let written = Report::build(ReportKind::Error, filename, span.start)
                    .with_message(message)
                    .with_label(
                        Label::new((filename, span.clone()))
                            .with_message(format!("{}{}", message, expected_str))
                            .with_color(Color::Red),
                    )
                    .finish()
                    .write((filename, Source::from(source)), &mut buf);
                if written.is_err() {
                    return self.to_string();
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub(crate) fn from_rich(err: chumsky::error::Rich<'_, Token>, source: &str) -> Self {
        use chumsky::error::RichReason;

        let message = match err.reason() {
            RichReason::ExpectedFound { found, .. } => {
                let found_str = match found {
                    Some(tok) => format_token(tok),
                    None => "end of template".to_string(),
                };
                format!("unexpected {}", found_str)
            }
            RichReason::Custom(msg) => msg.to_string(),
        };

        let expected: Vec<String> = err
            .expected()
            .filter_map(|e| match e {
                chumsky::error::RichPattern::Token(tok) => Some(format_token(tok)),
                chumsky::error::RichPattern::Label(label) => Some(label.to_string()),
                chumsky::error::RichPattern::EndOfInput => Some("end of template".to_string()),
                chumsky::error::RichPattern::Identifier(s) => Some(format!("identifier '{}'", s)),
                chumsky::error::RichPattern::Any => Some("any token".to_string()),
                chumsky::error::RichPattern::SomethingElse => None,
            })
            .collect();

        let span = err.span().into_range();
        ParseError::Syntax {
            line: line_of(source, span.start),
            span,
            message,
            expected,
        }
    }
}

/// 1-based line number of a byte offset
pub(crate) fn line_of(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

/// Format a token for human-readable error messages
fn format_token(tok: &Token) -> String {
    match tok {
        Token::Text(_) => "text".to_string(),
        Token::Open => "'{{'".to_string(),
        Token::Close => "'}}'".to_string(),
        Token::Ident(s) => format!("identifier '{}'", s),
        Token::String(s) => format!("string {:?}", s),
        Token::Int(n) => format!("number {}", n),
        Token::Float(n) => format!("number {}", n),
        Token::Field(path) => format!("field '.{}'", path.join(".")),
        Token::Variable(name) => format!("variable '${}'", name),
        Token::Define => "keyword 'define'".to_string(),
        Token::Template => "keyword 'template'".to_string(),
        Token::Block => "keyword 'block'".to_string(),
        Token::If => "keyword 'if'".to_string(),
        Token::Else => "keyword 'else'".to_string(),
        Token::End => "keyword 'end'".to_string(),
        Token::Range => "keyword 'range'".to_string(),
        Token::With => "keyword 'with'".to_string(),
        Token::Declare => "':='".to_string(),
        Token::Pipe => "'|'".to_string(),
        Token::ParenOpen => "'('".to_string(),
        Token::ParenClose => "')'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Dot => "'.'".to_string(),
        _ => format!("{:?}", tok),
    }
}

/// Where an execution error happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Name the source was compiled under (the file's canonical path)
    pub origin: String,
    /// 1-based line inside that source
    pub line: usize,
    /// Definition being executed
    pub template: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "template: {}:{}: executing \"{}\"",
            self.origin, self.line, self.template
        )
    }
}

/// Errors raised while executing a compiled template
#[derive(Error, Debug)]
pub enum ExecError {
    /// Executing a definition the template does not have
    #[error("template: no template \"{name}\" associated with template \"{owner}\"")]
    Undefined { name: String, owner: String },

    /// `{{ template "x" }}` naming a definition that does not exist
    #[error("{at}: no such template \"{name}\"")]
    NoSuchTemplate { at: Location, name: String },

    /// Field lookup on an object without that key
    #[error("{at}: map has no entry for key \"{key}\"")]
    MissingKey { at: Location, key: String },

    /// Field lookup on a value that is not an object
    #[error("{at}: can't evaluate field {field} in type {kind}")]
    NoField {
        at: Location,
        field: String,
        kind: &'static str,
    },

    #[error("{at}: undefined variable: ${name}")]
    UndefinedVariable { at: Location, name: String },

    /// A bound or builtin function returned an error
    #[error("{at}: error calling {name}: {message}")]
    Function {
        at: Location,
        name: String,
        message: String,
    },

    /// A piped value fed into something that is not a function call
    #[error("{at}: can't give argument to non-function")]
    NotAFunction { at: Location },

    #[error("{at}: range can't iterate over {value}")]
    RangeOver { at: Location, value: String },

    #[error("{at}: exceeded maximum template depth ({limit})")]
    Depth { at: Location, limit: usize },

    #[error("error writing template output: {0}")]
    Io(#[from] std::io::Error),
}
