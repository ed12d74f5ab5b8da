//! Functions callable from template pipelines

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::value::{compare, equal, format_value, html_escape, truthy};

/// A function bound into templates. Receives evaluated arguments; a piped
/// value arrives as the last argument.
pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Named functions made available to every template of a registry
#[derive(Clone, Default)]
pub struct FuncMap {
    funcs: BTreeMap<String, Function>,
}

impl FuncMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a function
    pub fn insert<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Arc::new(func));
    }

    /// Builder form of [`FuncMap::insert`]
    pub fn with<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.insert(name, func);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.funcs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl fmt::Debug for FuncMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.funcs.keys()).finish()
    }
}

type Builtin = fn(&[Value]) -> Result<Value, String>;

/// Functions every template can call without registering them
pub(crate) fn builtin(name: &str) -> Option<Builtin> {
    let func: Builtin = match name {
        "and" => and,
        "or" => or,
        "not" => not,
        "len" => len,
        "index" => index,
        "eq" => eq,
        "ne" => ne,
        "lt" => |args| ordered(args, |o| o.is_lt()),
        "le" => |args| ordered(args, |o| o.is_le()),
        "gt" => |args| ordered(args, |o| o.is_gt()),
        "ge" => |args| ordered(args, |o| o.is_ge()),
        "print" => print,
        "printf" => printf,
        "html" => html,
        _ => return None,
    };
    Some(func)
}

fn arity(args: &[Value], n: usize) -> Result<(), String> {
    if args.len() == n {
        Ok(())
    } else {
        Err(format!("wrong number of args: want {} got {}", n, args.len()))
    }
}

/// First falsy argument, or the last one
fn and(args: &[Value]) -> Result<Value, String> {
    match args.iter().find(|v| !truthy(v)).or(args.last()) {
        Some(v) => Ok(v.clone()),
        None => Err("wrong number of args: want at least 1 got 0".to_string()),
    }
}

/// First truthy argument, or the last one
fn or(args: &[Value]) -> Result<Value, String> {
    match args.iter().find(|v| truthy(v)).or(args.last()) {
        Some(v) => Ok(v.clone()),
        None => Err("wrong number of args: want at least 1 got 0".to_string()),
    }
}

fn not(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(Value::Bool(!truthy(&args[0])))
}

fn len(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    match &args[0] {
        Value::String(s) => Ok(Value::from(s.len())),
        Value::Array(a) => Ok(Value::from(a.len())),
        Value::Object(o) => Ok(Value::from(o.len())),
        other => Err(format!("len of type {}", super::value::type_name(other))),
    }
}

/// `index x 1 "key"` walks arrays by position and objects by key
fn index(args: &[Value]) -> Result<Value, String> {
    let Some((first, keys)) = args.split_first() else {
        return Err("wrong number of args: want at least 1 got 0".to_string());
    };
    let mut current = first.clone();
    for key in keys {
        current = match (&current, key) {
            (Value::Array(items), Value::Number(n)) => {
                let i = n
                    .as_u64()
                    .ok_or_else(|| format!("index out of range: {}", n))?;
                items
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| format!("index out of range: {}", i))?
            }
            (Value::Object(map), Value::String(k)) => map.get(k).cloned().unwrap_or(Value::Null),
            (Value::Null, _) => return Err("index of untyped nil".to_string()),
            (other, _) => {
                return Err(format!(
                    "can't index item of type {}",
                    super::value::type_name(other)
                ))
            }
        };
    }
    Ok(current)
}

/// `eq a b c` is true when `a` equals any of the rest
fn eq(args: &[Value]) -> Result<Value, String> {
    let Some((first, rest)) = args.split_first() else {
        return Err("missing argument for comparison".to_string());
    };
    if rest.is_empty() {
        return Err("missing argument for comparison".to_string());
    }
    Ok(Value::Bool(rest.iter().any(|v| equal(first, v))))
}

fn ne(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(Value::Bool(!equal(&args[0], &args[1])))
}

fn ordered(args: &[Value], test: fn(std::cmp::Ordering) -> bool) -> Result<Value, String> {
    arity(args, 2)?;
    compare(&args[0], &args[1]).map(|o| Value::Bool(test(o)))
}

/// Arguments concatenated, with spaces between operands when neither is a string
fn print(args: &[Value]) -> Result<Value, String> {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !args[i - 1].is_string() && !arg.is_string() {
            out.push(' ');
        }
        out.push_str(&format_value(arg));
    }
    Ok(Value::String(out))
}

/// Minimal formatting: `%s`, `%v`, `%d`, `%q` and `%%`
fn printf(args: &[Value]) -> Result<Value, String> {
    let Some((Value::String(format), rest)) = args.split_first() else {
        return Err("printf needs a format string".to_string());
    };
    let mut rest = rest.iter();
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('s' | 'v' | 'd' | 'q')) => match rest.next() {
                Some(arg) if verb == 'q' => out.push_str(&format!("{:?}", format_value(arg))),
                Some(arg) => out.push_str(&format_value(arg)),
                None => out.push_str(&format!("%!{}(MISSING)", verb)),
            },
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    Ok(Value::String(out))
}

fn html(args: &[Value]) -> Result<Value, String> {
    let text = match print(args)? {
        Value::String(s) => s,
        other => format_value(&other),
    };
    Ok(Value::String(html_escape(&text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Result<Value, String> {
        builtin(name).expect("builtin exists")(args)
    }

    #[test]
    fn test_func_map() {
        let funcs = FuncMap::new()
            .with("upper", |args: &[Value]| {
                Ok(Value::String(format_value(&args[0]).to_uppercase()))
            })
            .with("one", |_: &[Value]| Ok(json!(1)));
        assert_eq!(funcs.len(), 2);
        assert!(funcs.contains("upper"));
        assert_eq!(funcs.names().collect::<Vec<_>>(), vec!["one", "upper"]);
        let upper = funcs.get("upper").unwrap();
        assert_eq!(upper(&[json!("pen")]), Ok(json!("PEN")));
        assert_eq!(format!("{:?}", funcs), r#"{"one", "upper"}"#);
    }

    #[test]
    fn test_logic() {
        assert_eq!(call("and", &[json!(1), json!(0), json!(2)]), Ok(json!(0)));
        assert_eq!(call("and", &[json!(1), json!("x")]), Ok(json!("x")));
        assert_eq!(call("or", &[json!(""), json!("b")]), Ok(json!("b")));
        assert_eq!(call("or", &[json!(""), json!(0)]), Ok(json!(0)));
        assert_eq!(call("not", &[json!([])]), Ok(json!(true)));
        assert!(call("not", &[]).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(call("eq", &[json!(2), json!(1), json!(2.0)]), Ok(json!(true)));
        assert_eq!(call("ne", &[json!("a"), json!("a")]), Ok(json!(false)));
        assert_eq!(call("lt", &[json!(1), json!(2)]), Ok(json!(true)));
        assert_eq!(call("ge", &[json!("a"), json!("b")]), Ok(json!(false)));
        assert!(call("lt", &[json!(1), json!(null)]).is_err());
    }

    #[test]
    fn test_len_and_index() {
        assert_eq!(call("len", &[json!("pen")]), Ok(json!(3)));
        assert_eq!(call("len", &[json!([1, 2])]), Ok(json!(2)));
        let data = json!({"items": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(
            call("index", &[data, json!("items"), json!(1), json!("name")]),
            Ok(json!("b"))
        );
        assert!(call("index", &[json!([1]), json!(5)]).is_err());
    }

    #[test]
    fn test_print_family() {
        assert_eq!(call("print", &[json!("a"), json!(1), json!(2)]), Ok(json!("a1 2")));
        assert_eq!(
            call("printf", &[json!("%s costs %d%%"), json!("pen"), json!(12)]),
            Ok(json!("pen costs 12%"))
        );
        assert_eq!(call("printf", &[json!("%q"), json!("x")]), Ok(json!("\"x\"")));
        assert_eq!(call("html", &[json!("<b>")]), Ok(json!("&lt;b&gt;")));
    }
}
