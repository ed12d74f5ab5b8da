//! Lexer for template sources
//!
//! The source is split into literal text and `{{ ... }}` actions by a small
//! scanner that also applies trim markers and drops comments. The inside of
//! each action is tokenized with logos.

use logos::Logos;

use crate::error::ParseError;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
pub enum Token {
    /// Literal text between actions, produced by the scanner
    Text(String),

    // Delimiters. Stray ones inside an action lex as tokens so the
    // grammar can report them.
    #[token("{{")]
    Open,
    #[token("}}")]
    Close,

    // Keywords
    #[token("define")]
    Define,
    #[token("template")]
    Template,
    #[token("block")]
    Block,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("end")]
    End,
    #[token("range")]
    Range,
    #[token("with")]
    With,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    Nil,

    // Operators and punctuation
    #[token(":=")]
    Declare,
    #[token("|")]
    Pipe,
    #[token("(")]
    ParenOpen,
    #[token(")")]
    ParenClose,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    /// `.Name.Sub` field chain, without the leading dots
    #[regex(r"(\.[a-zA-Z_][a-zA-Z0-9_]*)+", |lex| field_chain(lex.slice()))]
    Field(Vec<String>),

    /// `$name`; the bare `$` has an empty name
    #[regex(r"\$[a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Variable(String),

    // Literals - identifiers must come after keywords
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string(), priority = 1)]
    Ident(String),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unquote(lex.slice()))]
    #[regex(r"`[^`]*`", |lex| {
        let s = lex.slice();
        s[1..s.len()-1].to_string()
    })]
    String(String),

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"-?[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),
}

fn field_chain(slice: &str) -> Vec<String> {
    slice
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unquote(slice: &str) -> String {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Lex a template source into text, delimiter and action tokens with spans
pub fn lex(input: &str) -> Result<Vec<(Token, Span)>, ParseError> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut trim_next = false;

    while pos < input.len() {
        let Some(offset) = input[pos..].find("{{") else {
            push_text(&mut tokens, input, pos..input.len(), trim_next, false);
            break;
        };
        let open = pos + offset;

        let after_open = &input[open + 2..];
        let trim_left = after_open.starts_with('-') && after_open[1..].starts_with(is_space);
        push_text(&mut tokens, input, pos..open, trim_next, trim_left);

        let body_start = open + 2 + usize::from(trim_left);
        let close = find_close(input, open, body_start)?;
        let trim_right = close >= body_start + 2
            && input[..close].ends_with('-')
            && input[..close - 1].ends_with(is_space);
        let body_end = if trim_right { close - 1 } else { close };

        let body = &input[body_start..body_end];
        if !is_comment(body) {
            tokens.push((Token::Open, open..body_start));
            for (tok, span) in Token::lexer(body).spanned() {
                let span = span.start + body_start..span.end + body_start;
                match tok {
                    Ok(tok) => tokens.push((tok, span)),
                    Err(()) => {
                        let found = &input[span.clone()];
                        return Err(ParseError::syntax(
                            input,
                            span,
                            format!("unexpected {:?} in action", found),
                        ));
                    }
                }
            }
            tokens.push((Token::Close, close..close + 2));
        }

        pos = close + 2;
        trim_next = trim_right;
    }

    Ok(tokens)
}

fn is_comment(body: &str) -> bool {
    let trimmed = body.trim_matches(is_space);
    trimmed.starts_with("/*") && trimmed.ends_with("*/") && trimmed.len() >= 4
}

/// Find the `}}` closing the action opened at `open`, skipping quoted strings
fn find_close(input: &str, open: usize, body_start: usize) -> Result<usize, ParseError> {
    let bytes = input.as_bytes();
    let body = input[body_start..].trim_start_matches(is_space);
    if body.starts_with("/*") {
        let comment_start = input.len() - body.len();
        return match input[comment_start..].find("*/") {
            Some(end) => {
                let after = comment_start + end + 2;
                let rest = &input[after..];
                if rest.starts_with("}}") {
                    Ok(after)
                } else if rest.starts_with(" -}}") {
                    Ok(after + 2)
                } else {
                    Err(ParseError::syntax(
                        input,
                        comment_start..after,
                        "comment ends before closing delimiter",
                    ))
                }
            }
            None => Err(ParseError::syntax(
                input,
                comment_start..input.len(),
                "unclosed comment",
            )),
        };
    }

    let mut quote: Option<u8> = None;
    let mut i = body_start;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Ok(i),
            None => {}
        }
        i += 1;
    }
    Err(ParseError::syntax(input, open..open + 2, "unclosed action"))
}

fn push_text(
    tokens: &mut Vec<(Token, Span)>,
    input: &str,
    range: Span,
    trim_start: bool,
    trim_end: bool,
) {
    let mut text = &input[range.clone()];
    let mut start = range.start;
    if trim_start {
        let trimmed = text.trim_start_matches(is_space);
        start += text.len() - trimmed.len();
        text = trimmed;
    }
    if trim_end {
        text = text.trim_end_matches(is_space);
    }
    if !text.is_empty() {
        tokens.push((Token::Text(text.to_string()), start..start + text.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        lex(input).expect("should lex").into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(kinds("<p>hello</p>"), vec![Token::Text("<p>hello</p>".to_string())]);
    }

    #[test]
    fn test_field_action() {
        assert_eq!(
            kinds("<h1>{{ .Name }}</h1>"),
            vec![
                Token::Text("<h1>".to_string()),
                Token::Open,
                Token::Field(vec!["Name".to_string()]),
                Token::Close,
                Token::Text("</h1>".to_string()),
            ]
        );
    }

    #[test]
    fn test_keywords_and_literals() {
        assert_eq!(
            kinds(r#"{{ template "layouts/default.tmpl" . }}"#),
            vec![
                Token::Open,
                Token::Template,
                Token::String("layouts/default.tmpl".to_string()),
                Token::Dot,
                Token::Close,
            ]
        );
        assert_eq!(
            kinds("{{ if eq .Stock 7 -3 1.5 true nil }}"),
            vec![
                Token::Open,
                Token::If,
                Token::Ident("eq".to_string()),
                Token::Field(vec!["Stock".to_string()]),
                Token::Int(7),
                Token::Int(-3),
                Token::Float(1.5),
                Token::True,
                Token::Nil,
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_variables_and_chains() {
        assert_eq!(
            kinds("{{ range $i, $e := .Items.All }}{{ $.Title }}"),
            vec![
                Token::Open,
                Token::Range,
                Token::Variable("i".to_string()),
                Token::Comma,
                Token::Variable("e".to_string()),
                Token::Declare,
                Token::Field(vec!["Items".to_string(), "All".to_string()]),
                Token::Close,
                Token::Open,
                Token::Variable(String::new()),
                Token::Field(vec!["Title".to_string()]),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_trim_markers() {
        assert_eq!(
            kinds("a  \n{{- .X -}}\n  b"),
            vec![
                Token::Text("a".to_string()),
                Token::Open,
                Token::Field(vec!["X".to_string()]),
                Token::Close,
                Token::Text("b".to_string()),
            ]
        );
    }

    #[test]
    fn test_minus_without_space_is_a_number() {
        assert_eq!(
            kinds("{{-3}}"),
            vec![Token::Open, Token::Int(-3), Token::Close]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("a{{/* note */}}b{{- /* trimmed */ -}} c"),
            vec![
                Token::Text("a".to_string()),
                Token::Text("b".to_string()),
                Token::Text("c".to_string()),
            ]
        );
    }

    #[test]
    fn test_close_inside_string_is_not_a_delimiter() {
        assert_eq!(
            kinds(r#"{{ print "}}" }}"#),
            vec![
                Token::Open,
                Token::Ident("print".to_string()),
                Token::String("}}".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"{{ "a\"b\n" `raw\n` }}"#),
            vec![
                Token::Open,
                Token::String("a\"b\n".to_string()),
                Token::String("raw\\n".to_string()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_unexpected_character_reports_line() {
        let err = lex("<div>\n  <h2>{{ .Name }</h2>\n  {{ .Description }}").unwrap_err();
        assert_eq!(err.line(), 2);
        assert!(err.to_string().contains(r#"unexpected "}" in action"#), "{}", err);
    }

    #[test]
    fn test_unclosed_action() {
        let err = lex("ok\n{{ .Name").unwrap_err();
        assert_eq!(err.line(), 2);
        assert!(err.to_string().contains("unclosed action"));
    }

    #[test]
    fn test_spans_are_absolute() {
        let tokens = lex("ab{{ .X }}").unwrap();
        assert_eq!(tokens[0].1, 0..2);
        assert_eq!(tokens[1].1, 2..4);
        assert_eq!(tokens[2].1, 5..7);
        assert_eq!(tokens[3].1, 8..10);
    }
}
