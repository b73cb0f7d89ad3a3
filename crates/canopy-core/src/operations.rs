//! Named operations callable from binding expressions, e.g. `@{sum(cart.total, 10)}`.
//!
//! Arguments reach an operation already evaluated. The table is instance-local:
//! hosts start from [`Operations::new`] (stock set preloaded) and register or
//! replace entries.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

pub type EvalResult = Result<Value, EvalError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub type Operation = fn(args: &[Value]) -> EvalResult;

#[derive(Debug, Clone)]
pub struct Operations {
    ops: HashMap<String, Operation>,
}

impl Operations {
    pub fn new() -> Self {
        let mut ops: HashMap<String, Operation> = HashMap::new();
        ops.insert("sum".into(), op_sum as Operation);
        ops.insert("subtract".into(), op_subtract as Operation);
        ops.insert("multiply".into(), op_multiply as Operation);
        ops.insert("divide".into(), op_divide as Operation);
        ops.insert("condition".into(), op_condition as Operation);
        ops.insert("not".into(), op_not as Operation);
        ops.insert("and".into(), op_and as Operation);
        ops.insert("or".into(), op_or as Operation);
        ops.insert("eq".into(), op_eq as Operation);
        ops.insert("gt".into(), op_gt as Operation);
        ops.insert("gte".into(), op_gte as Operation);
        ops.insert("lt".into(), op_lt as Operation);
        ops.insert("lte".into(), op_lte as Operation);
        ops.insert("isNull".into(), op_is_null as Operation);
        ops.insert("isEmpty".into(), op_is_empty as Operation);
        ops.insert("length".into(), op_length as Operation);
        ops.insert("contains".into(), op_contains as Operation);
        ops.insert("insert".into(), op_insert as Operation);
        ops.insert("remove".into(), op_remove as Operation);
        ops.insert("removeIndex".into(), op_remove_index as Operation);
        ops.insert("union".into(), op_union as Operation);
        ops.insert("concat".into(), op_concat as Operation);
        ops.insert("capitalize".into(), op_capitalize as Operation);
        ops.insert("lowercase".into(), op_lowercase as Operation);
        ops.insert("uppercase".into(), op_uppercase as Operation);
        ops.insert("substr".into(), op_substr as Operation);
        Self { ops }
    }

    /// A table with nothing registered.
    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Operation> {
        self.ops.get(name).copied()
    }

    pub fn register(&mut self, name: impl Into<String>, operation: Operation) -> Option<Operation> {
        self.ops.insert(name.into(), operation)
    }

    pub fn unregister(&mut self, name: &str) -> Option<Operation> {
        self.ops.remove(name)
    }
}

impl Default for Operations {
    fn default() -> Self {
        Self::new()
    }
}

fn require_arg<'a>(args: &'a [Value], index: usize, op: &str) -> Result<&'a Value, EvalError> {
    args.get(index)
        .ok_or_else(|| EvalError::new(format!("{op} requires argument {index}")))
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_index(value: &Value) -> Option<usize> {
    as_f64(value).filter(|f| *f >= 0.0).map(|f| f as usize)
}

/// JavaScript-like truthiness used by `and`, `or`, `not`, `condition` and
/// template cases.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Keep integers integral so `sum(1, 2)` renders as `3`, not `3.0`.
pub(crate) fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15 {
        json!(f as i64)
    } else {
        json!(f)
    }
}

fn cmp_numbers_or_strings(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn string_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn fold_numbers(args: &[Value], op: &str, f: impl Fn(f64, f64) -> f64) -> EvalResult {
    let first = require_arg(args, 0, op)?;
    let mut acc = as_f64(first).ok_or_else(|| EvalError::new(format!("{op}: {first} is not a number")))?;
    for arg in &args[1..] {
        let n = as_f64(arg).ok_or_else(|| EvalError::new(format!("{op}: {arg} is not a number")))?;
        acc = f(acc, n);
    }
    Ok(number(acc))
}

fn op_sum(args: &[Value]) -> EvalResult {
    fold_numbers(args, "sum", |a, b| a + b)
}

fn op_subtract(args: &[Value]) -> EvalResult {
    fold_numbers(args, "subtract", |a, b| a - b)
}

fn op_multiply(args: &[Value]) -> EvalResult {
    fold_numbers(args, "multiply", |a, b| a * b)
}

fn op_divide(args: &[Value]) -> EvalResult {
    let a = as_f64(require_arg(args, 0, "divide")?).unwrap_or(0.0);
    let b = as_f64(require_arg(args, 1, "divide")?).unwrap_or(0.0);
    if b == 0.0 {
        return Err(EvalError::new("div by zero"));
    }
    Ok(number(a / b))
}

fn op_condition(args: &[Value]) -> EvalResult {
    let cond = require_arg(args, 0, "condition")?;
    let picked = if truthy(cond) { args.get(1) } else { args.get(2) };
    Ok(picked.cloned().unwrap_or(Value::Null))
}

fn op_not(args: &[Value]) -> EvalResult {
    Ok(Value::Bool(!truthy(require_arg(args, 0, "not")?)))
}

fn op_and(args: &[Value]) -> EvalResult {
    Ok(Value::Bool(args.iter().all(truthy)))
}

fn op_or(args: &[Value]) -> EvalResult {
    Ok(Value::Bool(args.iter().any(truthy)))
}

fn op_eq(args: &[Value]) -> EvalResult {
    let a = require_arg(args, 0, "eq")?;
    let b = require_arg(args, 1, "eq")?;
    let same = match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    };
    Ok(Value::Bool(same))
}

fn op_gt(args: &[Value]) -> EvalResult {
    let a = require_arg(args, 0, "gt")?;
    let b = require_arg(args, 1, "gt")?;
    Ok(Value::Bool(cmp_numbers_or_strings(a, b).is_some_and(|o| o.is_gt())))
}

fn op_gte(args: &[Value]) -> EvalResult {
    let a = require_arg(args, 0, "gte")?;
    let b = require_arg(args, 1, "gte")?;
    Ok(Value::Bool(cmp_numbers_or_strings(a, b).is_some_and(|o| !o.is_lt())))
}

fn op_lt(args: &[Value]) -> EvalResult {
    let a = require_arg(args, 0, "lt")?;
    let b = require_arg(args, 1, "lt")?;
    Ok(Value::Bool(cmp_numbers_or_strings(a, b).is_some_and(|o| o.is_lt())))
}

fn op_lte(args: &[Value]) -> EvalResult {
    let a = require_arg(args, 0, "lte")?;
    let b = require_arg(args, 1, "lte")?;
    Ok(Value::Bool(cmp_numbers_or_strings(a, b).is_some_and(|o| !o.is_gt())))
}

fn op_is_null(args: &[Value]) -> EvalResult {
    Ok(Value::Bool(args.first().is_none_or(Value::is_null)))
}

fn op_is_empty(args: &[Value]) -> EvalResult {
    let empty = match args.first() {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    };
    Ok(Value::Bool(empty))
}

fn op_length(args: &[Value]) -> EvalResult {
    let n = match require_arg(args, 0, "length")? {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        _ => 0,
    };
    Ok(json!(n))
}

fn op_contains(args: &[Value]) -> EvalResult {
    let hay = require_arg(args, 0, "contains")?;
    let needle = require_arg(args, 1, "contains")?;
    let result = match hay {
        Value::String(s) => s.contains(&string_of(needle)),
        Value::Array(arr) => arr.contains(needle),
        Value::Object(obj) => needle.as_str().is_some_and(|k| obj.contains_key(k)),
        _ => false,
    };
    Ok(Value::Bool(result))
}

fn array_arg(args: &[Value], op: &str) -> Result<Vec<Value>, EvalError> {
    match require_arg(args, 0, op)? {
        Value::Array(a) => Ok(a.clone()),
        Value::Null => Ok(Vec::new()),
        other => Err(EvalError::new(format!("{op}: {other} is not an array"))),
    }
}

/// `insert(array, element, index?)`; appends without an index.
fn op_insert(args: &[Value]) -> EvalResult {
    let mut arr = array_arg(args, "insert")?;
    let item = require_arg(args, 1, "insert")?.clone();
    match args.get(2).and_then(as_index) {
        Some(i) if i <= arr.len() => arr.insert(i, item),
        _ => arr.push(item),
    }
    Ok(Value::Array(arr))
}

/// `remove(array, element)`; drops every equal element.
fn op_remove(args: &[Value]) -> EvalResult {
    let mut arr = array_arg(args, "remove")?;
    let item = require_arg(args, 1, "remove")?;
    arr.retain(|v| v != item);
    Ok(Value::Array(arr))
}

/// `removeIndex(array, index?)`; drops the last element without an index.
fn op_remove_index(args: &[Value]) -> EvalResult {
    let mut arr = array_arg(args, "removeIndex")?;
    match args.get(1).and_then(as_index) {
        Some(i) if i < arr.len() => {
            arr.remove(i);
        }
        Some(_) => {}
        None => {
            arr.pop();
        }
    }
    Ok(Value::Array(arr))
}

fn op_union(args: &[Value]) -> EvalResult {
    let mut out = Vec::new();
    for arg in args {
        if let Value::Array(a) = arg {
            out.extend(a.iter().cloned());
        }
    }
    Ok(Value::Array(out))
}

fn op_concat(args: &[Value]) -> EvalResult {
    let mut out = String::new();
    for arg in args {
        out.push_str(&string_of(arg));
    }
    Ok(Value::String(out))
}

fn op_capitalize(args: &[Value]) -> EvalResult {
    let s = string_of(require_arg(args, 0, "capitalize")?);
    let mut chars = s.chars();
    let out = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    Ok(Value::String(out))
}

fn op_lowercase(args: &[Value]) -> EvalResult {
    Ok(Value::String(string_of(require_arg(args, 0, "lowercase")?).to_lowercase()))
}

fn op_uppercase(args: &[Value]) -> EvalResult {
    Ok(Value::String(string_of(require_arg(args, 0, "uppercase")?).to_uppercase()))
}

/// `substr(text, start, length?)`, counted in characters.
fn op_substr(args: &[Value]) -> EvalResult {
    let s = string_of(require_arg(args, 0, "substr")?);
    let start = args.get(1).and_then(as_index).unwrap_or(0);
    let chars = s.chars().skip(start);
    let out: String = match args.get(2).and_then(as_index) {
        Some(len) => chars.take(len).collect(),
        None => chars.collect(),
    };
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Value) -> EvalResult {
        let ops = Operations::new();
        let op = ops.get(name).expect("operation registered");
        op(args.as_array().expect("args array"))
    }

    #[test]
    fn arithmetic_keeps_integers_integral() {
        assert_eq!(call("sum", json!([1, 2, 3])).unwrap(), json!(6));
        assert_eq!(call("subtract", json!([10, 4])).unwrap(), json!(6));
        assert_eq!(call("multiply", json!([2, 2.5])).unwrap(), json!(5));
        assert_eq!(call("divide", json!([1, 4])).unwrap(), json!(0.25));
        assert!(call("divide", json!([1, 0])).is_err());
        assert!(call("sum", json!(["x", 1])).is_err());
    }

    #[test]
    fn logic_and_comparison() {
        assert_eq!(call("condition", json!([true, "a", "b"])).unwrap(), json!("a"));
        assert_eq!(call("condition", json!([0, "a", "b"])).unwrap(), json!("b"));
        assert_eq!(call("and", json!([true, 1, "x"])).unwrap(), json!(true));
        assert_eq!(call("or", json!([false, null])).unwrap(), json!(false));
        assert_eq!(call("not", json!([""])).unwrap(), json!(true));
        assert_eq!(call("eq", json!([1, 1.0])).unwrap(), json!(true));
        assert_eq!(call("eq", json!(["1", 1])).unwrap(), json!(false));
        assert_eq!(call("gt", json!([3, "2"])).unwrap(), json!(true));
        assert_eq!(call("lte", json!(["a", "b"])).unwrap(), json!(true));
        assert_eq!(call("gte", json!([null, 1])).unwrap(), json!(false));
    }

    #[test]
    fn collections() {
        assert_eq!(call("isNull", json!([null])).unwrap(), json!(true));
        assert_eq!(call("isEmpty", json!([[]])).unwrap(), json!(true));
        assert_eq!(call("length", json!(["héllo"])).unwrap(), json!(5));
        assert_eq!(call("contains", json!([[1, 2], 2])).unwrap(), json!(true));
        assert_eq!(call("insert", json!([[1, 3], 2, 1])).unwrap(), json!([1, 2, 3]));
        assert_eq!(call("insert", json!([null, 1])).unwrap(), json!([1]));
        assert_eq!(call("remove", json!([[1, 2, 1], 1])).unwrap(), json!([2]));
        assert_eq!(call("removeIndex", json!([[1, 2, 3], 0])).unwrap(), json!([2, 3]));
        assert_eq!(call("removeIndex", json!([[1, 2, 3]])).unwrap(), json!([1, 2]));
        assert_eq!(call("union", json!([[1], [2, 3]])).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn strings() {
        assert_eq!(call("concat", json!(["a", 1, null, true])).unwrap(), json!("a1true"));
        assert_eq!(call("capitalize", json!(["hello"])).unwrap(), json!("Hello"));
        assert_eq!(call("uppercase", json!(["abc"])).unwrap(), json!("ABC"));
        assert_eq!(call("lowercase", json!(["ABC"])).unwrap(), json!("abc"));
        assert_eq!(call("substr", json!(["canopy", 1, 3])).unwrap(), json!("ano"));
        assert_eq!(call("substr", json!(["canopy", 2])).unwrap(), json!("nopy"));
    }

    #[test]
    fn registry_is_instance_local() {
        fn op_answer(_args: &[Value]) -> EvalResult {
            Ok(json!(42))
        }
        let mut ops = Operations::new();
        assert!(ops.register("answer", op_answer as Operation).is_none());
        assert!(ops.get("answer").is_some());
        assert!(Operations::new().get("answer").is_none());
        assert!(ops.unregister("sum").is_some());
        assert!(Operations::empty().get("sum").is_none());
    }
}
