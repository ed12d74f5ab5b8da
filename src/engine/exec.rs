//! Tree-walking executor

use std::io::Write;

use serde_json::Value;

use super::ast::{Body, Command, Node, Operand, Pipeline, Spanned};
use super::funcs::builtin;
use super::lexer::Span;
use super::value::{format_value, html_escape, truthy, type_name};
use super::{Escape, MissingKey, Template, Tree};
use crate::error::{line_of, ExecError, Location};

/// Nesting limit for `template` and `block` calls
pub const MAX_DEPTH: usize = 256;

/// Execute `tree` as the entry point of `template`
pub(crate) fn execute<W: Write + ?Sized>(
    template: &Template,
    tree: &Tree,
    out: &mut W,
    data: &Value,
) -> Result<(), ExecError> {
    let mut state = State {
        template,
        out,
        vars: vec![(String::new(), data.clone())],
        depth: 0,
    };
    state.walk(tree, &tree.root, data)
}

struct State<'t, 'w, W: Write + ?Sized> {
    template: &'t Template,
    out: &'w mut W,
    /// Variable stack; `$` is the entry with an empty name
    vars: Vec<(String, Value)>,
    depth: usize,
}

impl<W: Write + ?Sized> State<'_, '_, W> {
    fn at(&self, tree: &Tree, span: &Span) -> Location {
        Location {
            origin: tree.origin.name.clone(),
            line: line_of(&tree.origin.source, span.start),
            template: tree.name.clone(),
        }
    }

    fn walk(&mut self, tree: &Tree, body: &Body, dot: &Value) -> Result<(), ExecError> {
        for node in body {
            self.node(tree, node, dot)?;
        }
        Ok(())
    }

    fn node(&mut self, tree: &Tree, node: &Spanned<Node>, dot: &Value) -> Result<(), ExecError> {
        match &node.node {
            Node::Text(text) => self.out.write_all(text.as_bytes())?,
            Node::Define { .. } => {}
            Node::Action(pipeline) => {
                let value = self.pipeline(tree, pipeline, dot)?;
                if pipeline.decl.is_empty() {
                    let escaped = self.ends_in_html(pipeline);
                    self.print(&value, escaped)?;
                }
            }
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                let mark = self.vars.len();
                let value = self.pipeline(tree, cond, dot)?;
                if truthy(&value) {
                    self.walk(tree, then, dot)?;
                } else if let Some(otherwise) = otherwise {
                    self.walk(tree, otherwise, dot)?;
                }
                self.vars.truncate(mark);
            }
            Node::With {
                value,
                body,
                otherwise,
            } => {
                let mark = self.vars.len();
                let value = self.pipeline(tree, value, dot)?;
                if truthy(&value) {
                    self.walk(tree, body, &value)?;
                } else if let Some(otherwise) = otherwise {
                    self.walk(tree, otherwise, dot)?;
                }
                self.vars.truncate(mark);
            }
            Node::Range {
                over,
                body,
                otherwise,
            } => self.range(tree, &node.span, over, body, otherwise.as_ref(), dot)?,
            Node::Template { name, data } => {
                let value = match data {
                    Some(p) => self.pipeline(tree, p, dot)?,
                    None => Value::Null,
                };
                self.call(tree, &node.span, name, value)?;
            }
            Node::Block { name, data, .. } => {
                let value = self.pipeline(tree, data, dot)?;
                self.call(tree, &node.span, name, value)?;
            }
        }
        Ok(())
    }

    fn range(
        &mut self,
        tree: &Tree,
        span: &Span,
        over: &Pipeline,
        body: &Body,
        otherwise: Option<&Body>,
        dot: &Value,
    ) -> Result<(), ExecError> {
        let mark = self.vars.len();
        let value = self.commands(tree, over, dot)?;
        let items: Box<dyn Iterator<Item = (Value, Value)>> = match value {
            Value::Array(items) => Box::new(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, e)| (Value::from(i), e)),
            ),
            Value::Object(map) => Box::new(map.into_iter().map(|(k, v)| (Value::String(k), v))),
            Value::Number(n) if n.as_u64().is_some() => {
                let count = n.as_u64().unwrap_or_default();
                Box::new((0..count).map(|i| (Value::from(i), Value::from(i))))
            }
            Value::Null => Box::new(std::iter::empty()),
            other => {
                return Err(ExecError::RangeOver {
                    at: self.at(tree, span),
                    value: format_value(&other),
                })
            }
        };

        let mut items = items.peekable();
        if items.peek().is_none() {
            if let Some(otherwise) = otherwise {
                self.walk(tree, otherwise, dot)?;
            }
            return Ok(());
        }

        for (key, elem) in items {
            match over.decl.as_slice() {
                [] => {}
                [e] => self.vars.push((e.clone(), elem.clone())),
                [k, e, ..] => {
                    self.vars.push((k.clone(), key));
                    self.vars.push((e.clone(), elem.clone()));
                }
            }
            self.walk(tree, body, &elem)?;
            self.vars.truncate(mark);
        }
        Ok(())
    }

    /// Execute the definition `name` with `data` as both `.` and `$`
    fn call(&mut self, tree: &Tree, span: &Span, name: &str, data: Value) -> Result<(), ExecError> {
        let Some(target) = self.template.defs.get(name).cloned() else {
            return Err(ExecError::NoSuchTemplate {
                at: self.at(tree, span),
                name: name.to_string(),
            });
        };
        if self.depth >= MAX_DEPTH {
            return Err(ExecError::Depth {
                at: self.at(tree, span),
                limit: MAX_DEPTH,
            });
        }

        let saved = std::mem::replace(&mut self.vars, vec![(String::new(), data.clone())]);
        self.depth += 1;
        let result = self.walk(&target, &target.root, &data);
        self.depth -= 1;
        self.vars = saved;
        result
    }

    /// Evaluate a pipeline and bind its declared variable
    fn pipeline(&mut self, tree: &Tree, pipeline: &Pipeline, dot: &Value) -> Result<Value, ExecError> {
        let value = self.commands(tree, pipeline, dot)?;
        for name in &pipeline.decl {
            self.vars.push((name.clone(), value.clone()));
        }
        Ok(value)
    }

    fn commands(&mut self, tree: &Tree, pipeline: &Pipeline, dot: &Value) -> Result<Value, ExecError> {
        let mut piped: Option<Value> = None;
        for cmd in &pipeline.commands {
            piped = Some(self.command(tree, cmd, dot, piped)?);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    fn command(
        &mut self,
        tree: &Tree,
        cmd: &Spanned<Command>,
        dot: &Value,
        piped: Option<Value>,
    ) -> Result<Value, ExecError> {
        match &cmd.node {
            Command::Operand(op) => {
                if piped.is_some() {
                    return Err(ExecError::NotAFunction {
                        at: self.at(tree, &cmd.span),
                    });
                }
                self.operand(tree, &cmd.span, op, dot)
            }
            Command::Call { name, args } => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                for arg in args {
                    argv.push(self.operand(tree, &cmd.span, arg, dot)?);
                }
                argv.extend(piped);

                let result = if let Some(func) = self.template.funcs.get(name) {
                    func(&argv)
                } else if let Some(func) = builtin(name) {
                    func(&argv)
                } else {
                    Err("function not defined".to_string())
                };
                result.map_err(|message| ExecError::Function {
                    at: self.at(tree, &cmd.span),
                    name: name.clone(),
                    message,
                })
            }
        }
    }

    fn operand(&mut self, tree: &Tree, span: &Span, op: &Operand, dot: &Value) -> Result<Value, ExecError> {
        match op {
            Operand::Dot => Ok(dot.clone()),
            Operand::Literal(v) => Ok(v.clone()),
            Operand::Field(path) => self.fields(tree, span, dot.clone(), path),
            Operand::Variable { name, fields } => {
                let value = match self.vars.iter().rev().find(|(n, _)| n == name) {
                    Some((_, v)) => v.clone(),
                    None => {
                        return Err(ExecError::UndefinedVariable {
                            at: self.at(tree, span),
                            name: name.clone(),
                        })
                    }
                };
                self.fields(tree, span, value, fields)
            }
            Operand::Nested { pipeline, fields } => {
                let value = self.pipeline(tree, pipeline, dot)?;
                self.fields(tree, span, value, fields)
            }
        }
    }

    fn fields(&self, tree: &Tree, span: &Span, value: Value, path: &[String]) -> Result<Value, ExecError> {
        let mut current = value;
        for field in path {
            current = match current {
                Value::Object(mut map) => match map.remove(field) {
                    Some(v) => v,
                    None => match self.template.options.missing_key {
                        MissingKey::Zero => Value::Null,
                        MissingKey::Error => {
                            return Err(ExecError::MissingKey {
                                at: self.at(tree, span),
                                key: field.clone(),
                            })
                        }
                    },
                },
                Value::Null if self.template.options.missing_key == MissingKey::Zero => Value::Null,
                other => {
                    return Err(ExecError::NoField {
                        at: self.at(tree, span),
                        field: field.clone(),
                        kind: type_name(&other),
                    })
                }
            };
        }
        Ok(current)
    }

    /// Whether the pipeline's last command is the builtin `html`, whose
    /// output is already escaped
    fn ends_in_html(&self, pipeline: &Pipeline) -> bool {
        matches!(
            pipeline.commands.last().map(|c| &c.node),
            Some(Command::Call { name, .. }) if name == "html" && !self.template.funcs.contains(name)
        )
    }

    fn print(&mut self, value: &Value, escaped: bool) -> Result<(), ExecError> {
        let text = format_value(value);
        match self.template.options.escape {
            Escape::Html if !escaped => self.out.write_all(html_escape(&text).as_bytes())?,
            _ => self.out.write_all(text.as_bytes())?,
        }
        Ok(())
    }
}
