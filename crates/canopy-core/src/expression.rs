//! Binding expressions embedded in node properties as `@{...}` markers.
//!
//! Inside a marker:
//!
//! ```text
//! expr    := literal | call | path
//! call    := name '(' [expr (',' expr)*] ')'
//! path    := ident ('.' ident | '[' digits ']')*
//! literal := number | 'text' | true | false | null
//! ```
//!
//! The first path segment names a context id, looked up nearest first in the
//! hierarchy; the rest walks into that context's value. A string that is
//! exactly one marker resolves to the typed value; markers mixed with text are
//! interpolated into a string. `\@{` is a literal `@{`.

use crate::context::{DataContext, find};
use crate::error::ExpressionError;
use crate::operations::{Operations, number};
use crate::path::{self, PathSegment, parse_path};
use serde_json::{Map, Value};
use std::iter::Peekable;
use std::str::Chars;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path {
        context: String,
        rest: Vec<PathSegment>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

/// Parse the body of a marker (the text between `@{` and `}`).
pub fn parse(src: &str) -> Result<Expr, ExpressionError> {
    let mut parser = Parser {
        src,
        chars: src.chars().peekable(),
    };
    let expr = parser.expr()?;
    parser.skip_ws();
    match parser.chars.next() {
        None => Ok(expr),
        Some(found) => Err(ExpressionError::UnexpectedChar {
            expr: src.to_string(),
            found,
        }),
    }
}

struct Parser<'a> {
    src: &'a str,
    chars: Peekable<Chars<'a>>,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | '[' | ']')
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn unexpected(&self, found: char) -> ExpressionError {
        ExpressionError::UnexpectedChar {
            expr: self.src.to_string(),
            found,
        }
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        self.skip_ws();
        let Some(&c) = self.chars.peek() else {
            return Err(ExpressionError::UnexpectedEnd(self.src.to_string()));
        };
        match c {
            '\'' | '"' => {
                self.chars.next();
                self.string(c)
            }
            _ if c.is_ascii_digit() || c == '-' => self.number(),
            _ if is_word_char(c) => {
                let word = self.word();
                self.skip_ws();
                if self.chars.next_if_eq(&'(').is_some() {
                    let args = self.args()?;
                    return Ok(Expr::Call { name: word, args });
                }
                match word.as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" => Ok(Expr::Literal(Value::Null)),
                    _ => path_expr(&word),
                }
            }
            other => Err(self.unexpected(other)),
        }
    }

    fn word(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.chars.next_if(|c| is_word_char(*c)) {
            out.push(c);
        }
        out
    }

    fn string(&mut self, quote: char) -> Result<Expr, ExpressionError> {
        let mut s = String::new();
        let mut escaped = false;
        for c in self.chars.by_ref() {
            if escaped {
                s.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                return Ok(Expr::Literal(Value::String(s)));
            } else {
                s.push(c);
            }
        }
        Err(ExpressionError::UnterminatedString(self.src.to_string()))
    }

    fn number(&mut self) -> Result<Expr, ExpressionError> {
        let mut s = String::new();
        if let Some(minus) = self.chars.next_if_eq(&'-') {
            s.push(minus);
        }
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
            s.push(c);
        }
        let n = s
            .parse::<f64>()
            .map_err(|_| ExpressionError::InvalidNumber(s.clone()))?;
        Ok(Expr::Literal(number(n)))
    }

    fn args(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.chars.next_if_eq(&')').is_some() {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some(')') => return Ok(args),
                Some(other) => return Err(self.unexpected(other)),
                None => return Err(ExpressionError::UnexpectedEnd(self.src.to_string())),
            }
        }
    }
}

fn path_expr(word: &str) -> Result<Expr, ExpressionError> {
    let mut segments = parse_path(word)?.into_iter();
    match segments.next() {
        Some(PathSegment::Key(context)) => Ok(Expr::Path {
            context,
            rest: segments.collect(),
        }),
        _ => Err(ExpressionError::MissingContextId(word.to_string())),
    }
}

/// Evaluate a parsed expression. Missing contexts and paths give `null`.
pub fn eval(
    expr: &Expr,
    hierarchy: &[DataContext],
    operations: &Operations,
) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path { context, rest } => Ok(find(hierarchy, Some(context))
            .and_then(|ctx| path::get(&ctx.value, rest))
            .cloned()
            .unwrap_or(Value::Null)),
        Expr::Call { name, args } => {
            let op = operations
                .get(name)
                .ok_or_else(|| ExpressionError::UnknownOperation(name.clone()))?;
            let values = args
                .iter()
                .map(|arg| eval(arg, hierarchy, operations))
                .collect::<Result<Vec<_>, _>>()?;
            op(&values).map_err(|err| ExpressionError::Operation {
                name: name.clone(),
                message: err.message,
            })
        }
    }
}

/// Parse and evaluate a marker body.
pub fn evaluate(
    src: &str,
    hierarchy: &[DataContext],
    operations: &Operations,
) -> Result<Value, ExpressionError> {
    eval(&parse(src)?, hierarchy, operations)
}

#[derive(Debug, PartialEq)]
enum Piece {
    Text(String),
    Marker(String),
}

/// Byte length of a marker body: up to the first `}` outside quotes.
fn marker_len(body: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '}' => return Some(i),
            None => {}
        }
    }
    None
}

fn scan(s: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("@{") {
        let before = &rest[..start];
        if let Some(kept) = before.strip_suffix('\\') {
            text.push_str(kept);
            text.push_str("@{");
            rest = &rest[start + 2..];
            continue;
        }
        text.push_str(before);
        let body = &rest[start + 2..];
        let Some(len) = marker_len(body) else {
            // unterminated, kept verbatim
            text.push_str(&rest[start..]);
            rest = "";
            break;
        };
        if !text.is_empty() {
            pieces.push(Piece::Text(std::mem::take(&mut text)));
        }
        pieces.push(Piece::Marker(body[..len].to_string()));
        rest = &body[len + 1..];
    }
    text.push_str(rest);
    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    pieces
}

/// True when `s` holds at least one unescaped, terminated marker.
pub fn has_marker(s: &str) -> bool {
    scan(s).iter().any(|p| matches!(p, Piece::Marker(_)))
}

/// Whether any string inside `value` still carries a marker.
pub fn contains_markers(value: &Value) -> bool {
    match value {
        Value::String(s) => has_marker(s),
        Value::Array(items) => items.iter().any(contains_markers),
        Value::Object(map) => map.values().any(contains_markers),
        _ => false,
    }
}

fn evaluate_or_null(src: &str, hierarchy: &[DataContext], operations: &Operations) -> Value {
    match evaluate(src, hierarchy, operations) {
        Ok(v) => v,
        Err(err) => {
            warn!(expression = src, error = %err, "binding expression failed");
            Value::Null
        }
    }
}

fn interpolated(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve every marker in a string.
pub fn resolve_str(s: &str, hierarchy: &[DataContext], operations: &Operations) -> Value {
    let pieces = scan(s);
    if let [Piece::Marker(src)] = pieces.as_slice() {
        return evaluate_or_null(src, hierarchy, operations);
    }
    let mut out = String::new();
    for piece in pieces {
        match piece {
            Piece::Text(t) => out.push_str(&t),
            Piece::Marker(src) => {
                out.push_str(&interpolated(&evaluate_or_null(&src, hierarchy, operations)))
            }
        }
    }
    Value::String(out)
}

/// Resolve markers in a value, recursing into arrays and objects.
pub fn resolve_value(value: &Value, hierarchy: &[DataContext], operations: &Operations) -> Value {
    resolve_value_except(value, hierarchy, operations, &|_| false)
}

/// [`resolve_value`], except that any value (at any depth) for which `keep`
/// holds is copied with its markers intact.
pub fn resolve_value_except(
    value: &Value,
    hierarchy: &[DataContext],
    operations: &Operations,
    keep: &dyn Fn(&Value) -> bool,
) -> Value {
    if keep(value) {
        return value.clone();
    }
    match value {
        Value::String(s) => resolve_str(s, hierarchy, operations),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value_except(v, hierarchy, operations, keep))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value_except(v, hierarchy, operations, keep));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hierarchy() -> Vec<DataContext> {
        vec![
            DataContext::new("item", json!({"name": "Ana", "tags": ["a", "b"], "age": 30})),
            DataContext::new("user", json!({"name": "shadowed"})),
            DataContext::new("item", json!({"name": "outer"})),
            DataContext::new("global", json!({"currency": "EUR"})),
        ]
    }

    fn resolve(s: &str) -> Value {
        resolve_str(s, &hierarchy(), &Operations::new())
    }

    #[test]
    fn single_marker_keeps_type() {
        assert_eq!(resolve("@{item.age}"), json!(30));
        assert_eq!(resolve("@{item.tags}"), json!(["a", "b"]));
        assert_eq!(resolve("@{item.tags[1]}"), json!("b"));
        assert_eq!(resolve("@{item}"), json!({"name": "Ana", "tags": ["a", "b"], "age": 30}));
    }

    #[test]
    fn nearest_context_wins() {
        assert_eq!(resolve("@{item.name}"), json!("Ana"));
        assert_eq!(resolve("@{global.currency}"), json!("EUR"));
    }

    #[test]
    fn interpolation_builds_strings() {
        assert_eq!(resolve("Hi @{item.name}, @{item.age}!"), json!("Hi Ana, 30!"));
        assert_eq!(resolve("[@{item.missing}]"), json!("[]"));
        assert_eq!(resolve("@{item.name}@{item.age}"), json!("Ana30"));
        assert_eq!(resolve("plain"), json!("plain"));
    }

    #[test]
    fn missing_paths_are_null() {
        assert_eq!(resolve("@{nope.x}"), Value::Null);
        assert_eq!(resolve("@{item.tags[9]}"), Value::Null);
    }

    #[test]
    fn escaped_markers_stay_literal() {
        assert_eq!(resolve(r"\@{item.name}"), json!("@{item.name}"));
        assert_eq!(resolve(r"a \@{x} @{item.age}"), json!("a @{x} 30"));
        assert!(!has_marker(r"\@{item.name}"));
    }

    #[test]
    fn calls_and_literals() {
        assert_eq!(resolve("@{sum(item.age, 12)}"), json!(42));
        assert_eq!(resolve("@{condition(gt(item.age, 18), 'adult', 'minor')}"), json!("adult"));
        assert_eq!(resolve("@{concat('}', item.name)}"), json!("}Ana"));
        assert_eq!(resolve("@{length(item.tags)}"), json!(2));
        assert_eq!(resolve("@{-1.5}"), json!(-1.5));
        assert_eq!(resolve("@{null}"), Value::Null);
    }

    #[test]
    fn failures_resolve_to_null() {
        assert_eq!(resolve("@{nothing(1)}"), Value::Null);
        assert_eq!(resolve("@{divide(1, 0)}"), Value::Null);
        assert_eq!(resolve("@{sum(1,}"), Value::Null);
        assert_eq!(resolve("x @{'open}"), json!("x @{'open}"));
    }

    #[test]
    fn parse_errors_are_typed() {
        assert!(matches!(parse("sum(1"), Err(ExpressionError::UnexpectedEnd(_))));
        assert!(matches!(parse("'abc"), Err(ExpressionError::UnterminatedString(_))));
        assert!(matches!(parse("a b"), Err(ExpressionError::UnexpectedChar { found: 'b', .. })));
        assert!(matches!(parse("[0].x"), Err(ExpressionError::MissingContextId(_))));
        assert_eq!(
            parse("f( a.b , 'x')").unwrap(),
            Expr::Call {
                name: "f".into(),
                args: vec![
                    Expr::Path {
                        context: "a".into(),
                        rest: vec![PathSegment::Key("b".into())]
                    },
                    Expr::Literal(json!("x")),
                ],
            }
        );
    }

    #[test]
    fn resolves_nested_values() {
        let value = json!({"label": "@{item.name}", "list": ["@{item.age}", 1], "n": null});
        let resolved = resolve_value(&value, &hierarchy(), &Operations::new());
        assert_eq!(resolved, json!({"label": "Ana", "list": [30, 1], "n": null}));
        assert!(contains_markers(&value));
        assert!(!contains_markers(&resolved));
    }

    #[test]
    fn kept_values_stay_raw_while_siblings_resolve() {
        let value = json!([
            {"label": "@{item.name}", "on": {"raw": "@{item.age}"}},
            "@{global.currency}"
        ]);
        let keep = |v: &Value| v.get("raw").is_some();
        let resolved = resolve_value_except(&value, &hierarchy(), &Operations::new(), &keep);
        assert_eq!(
            resolved,
            json!([{"label": "Ana", "on": {"raw": "@{item.age}"}}, "EUR"])
        );
    }
}
