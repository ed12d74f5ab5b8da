//! Parser implementation using chumsky

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use serde_json::Value;

use super::ast::*;
use super::lexer::{lex, Span, Token};
use crate::error::ParseError;

/// Deepest allowed nesting of blocks, `else if` arms and parentheses
pub const MAX_NESTING: usize = 100;

/// Parse template source into a body of nodes
pub fn parse(input: &str) -> Result<Body, ParseError> {
    let len = input.len();
    let tokens = lex(input)?;
    check_nesting(input, &tokens)?;

    let token_iter = tokens
        .into_iter()
        .map(|(tok, span)| (tok, SimpleSpan::from(span)));

    let token_stream =
        Stream::from_iter(token_iter).map((len..len).into(), |(t, s): (_, _)| (t, s));

    body_parser()
        .then_ignore(end())
        .parse(token_stream)
        .into_result()
        .map_err(|errs| match errs.into_iter().next() {
            Some(err) => ParseError::from_rich(err, input),
            None => ParseError::syntax(input, 0..0, "invalid template"),
        })
}

/// Reject sources nested deeper than [`MAX_NESTING`] before the recursive
/// grammar sees them. Each `else if` arm nests one level further in the tree.
fn check_nesting(input: &str, tokens: &[(Token, Span)]) -> Result<(), ParseError> {
    // levels opened by each enclosing block, counting its `else if` arms
    let mut blocks: Vec<usize> = Vec::new();
    let mut depth: usize = 0;
    let mut parens: usize = 0;

    for (i, (tok, span)) in tokens.iter().enumerate() {
        let prev = |back: usize| i.checked_sub(back).map(|j| &tokens[j].0);
        let after_open = prev(1) == Some(&Token::Open);
        match tok {
            Token::If | Token::Range | Token::With | Token::Define | Token::Block
                if after_open =>
            {
                blocks.push(1);
                depth += 1;
            }
            Token::If if prev(1) == Some(&Token::Else) && prev(2) == Some(&Token::Open) => {
                if let Some(levels) = blocks.last_mut() {
                    *levels += 1;
                    depth += 1;
                }
            }
            Token::End if after_open => {
                if let Some(levels) = blocks.pop() {
                    depth -= levels;
                }
            }
            Token::ParenOpen => parens += 1,
            Token::ParenClose => parens = parens.saturating_sub(1),
            Token::Close => parens = 0,
            _ => {}
        }
        if depth + parens > MAX_NESTING {
            return Err(ParseError::syntax(
                input,
                span.clone(),
                "exceeded maximum nesting depth",
            ));
        }
    }
    Ok(())
}

/// Helper to extract span range from chumsky's MapExtra
fn span_range(e: &impl chumsky::span::Span<Offset = usize>) -> std::ops::Range<usize> {
    e.start()..e.end()
}

/// Fold `{{ else if }}` arms into nested `If` nodes, innermost last
fn build_if(
    cond: Pipeline,
    then: Body,
    arms: Vec<(Pipeline, Body, std::ops::Range<usize>)>,
    otherwise: Option<Body>,
) -> Node {
    let otherwise = arms
        .into_iter()
        .rev()
        .fold(otherwise, |acc, (cond, then, span)| {
            Some(vec![Spanned::new(
                Node::If {
                    cond,
                    then,
                    otherwise: acc,
                },
                span,
            )])
        });
    Node::If {
        cond,
        then,
        otherwise,
    }
}

fn pipeline_parser<'a, I>() -> impl Parser<'a, I, Pipeline, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|pipeline| {
        let fields = select! { Token::Field(f) => f }
            .or_not()
            .map(Option::unwrap_or_default);

        let literal = select! {
            Token::String(s) => Value::String(s),
            Token::Int(n) => Value::from(n),
            Token::Float(n) => Value::from(n),
            Token::True => Value::Bool(true),
            Token::False => Value::Bool(false),
            Token::Nil => Value::Null,
        };

        let operand = choice((
            just(Token::Dot).to(Operand::Dot),
            select! { Token::Field(f) => Operand::Field(f) },
            select! { Token::Variable(name) => name }
                .then(fields.clone())
                .map(|(name, fields)| Operand::Variable { name, fields }),
            literal.map(Operand::Literal),
            pipeline
                .delimited_by(just(Token::ParenOpen), just(Token::ParenClose))
                .then(fields)
                .map(|(p, fields)| Operand::Nested {
                    pipeline: Box::new(p),
                    fields,
                }),
        ));

        let call = select! { Token::Ident(name) => name }
            .then(operand.clone().repeated().collect::<Vec<_>>())
            .map(|(name, args)| Command::Call { name, args });

        let command = choice((call, operand.map(Command::Operand)))
            .map_with(|c, e| Spanned::new(c, span_range(&e.span())));

        // `$x :=` or `$i, $e :=`
        let decl = select! { Token::Variable(name) => name }
            .separated_by(just(Token::Comma))
            .at_least(1)
            .at_most(2)
            .collect::<Vec<_>>()
            .then_ignore(just(Token::Declare))
            .or_not()
            .map(Option::unwrap_or_default);

        decl.then(
            command
                .separated_by(just(Token::Pipe))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(|(decl, commands)| Pipeline { decl, commands })
        .boxed()
    })
}

fn body_parser<'a, I>() -> impl Parser<'a, I, Body, extra::Err<Rich<'a, Token>>> + Clone
where
    I: ValueInput<'a, Token = Token, Span = SimpleSpan>,
{
    recursive(|body| {
        let pipeline = pipeline_parser();
        let name = select! { Token::String(s) => s };

        let open = || just(Token::Open);
        let close = || just(Token::Close);
        let end_action = open().then(just(Token::End)).then(close()).ignored();
        let else_action = open().then(just(Token::Else)).then(close()).ignored();
        let else_body = else_action.ignore_then(body.clone()).or_not();

        let text = select! { Token::Text(s) => Node::Text(s) };

        let else_if = open()
            .then(just(Token::Else))
            .then(just(Token::If))
            .ignore_then(pipeline.clone())
            .then_ignore(close())
            .then(body.clone())
            .map_with(|(cond, then), e| (cond, then, span_range(&e.span())));

        let if_node = open()
            .then(just(Token::If))
            .ignore_then(pipeline.clone())
            .then_ignore(close())
            .then(body.clone())
            .then(else_if.repeated().collect::<Vec<_>>())
            .then(else_body.clone())
            .then_ignore(end_action.clone())
            .map(|(((cond, then), arms), otherwise)| build_if(cond, then, arms, otherwise));

        let range_node = open()
            .then(just(Token::Range))
            .ignore_then(pipeline.clone())
            .then_ignore(close())
            .then(body.clone())
            .then(else_body.clone())
            .then_ignore(end_action.clone())
            .map(|((over, body), otherwise)| Node::Range {
                over,
                body,
                otherwise,
            });

        let with_node = open()
            .then(just(Token::With))
            .ignore_then(pipeline.clone())
            .then_ignore(close())
            .then(body.clone())
            .then(else_body)
            .then_ignore(end_action.clone())
            .map(|((value, body), otherwise)| Node::With {
                value,
                body,
                otherwise,
            });

        let define_node = open()
            .then(just(Token::Define))
            .ignore_then(name.clone())
            .then_ignore(close())
            .then(body.clone())
            .then_ignore(end_action.clone())
            .map(|(name, body)| Node::Define { name, body });

        let block_node = open()
            .then(just(Token::Block))
            .ignore_then(name.clone())
            .then(pipeline.clone())
            .then_ignore(close())
            .then(body.clone())
            .then_ignore(end_action)
            .map(|((name, data), body)| Node::Block { name, data, body });

        let template_node = open()
            .then(just(Token::Template))
            .ignore_then(name)
            .then(pipeline.clone().or_not())
            .then_ignore(close())
            .map(|(name, data)| Node::Template { name, data });

        let action = pipeline.delimited_by(open(), close()).map(Node::Action);

        choice((
            text,
            if_node,
            range_node,
            with_node,
            define_node,
            block_node,
            template_node,
            action,
        ))
        .map_with(|n, e| Spanned::new(n, span_range(&e.span())))
        .repeated()
        .collect::<Vec<_>>()
        .boxed()
    })
}
