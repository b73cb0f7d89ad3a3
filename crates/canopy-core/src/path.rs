//! Dotted/bracketed paths into JSON values (`user.addresses[0].street`).

use crate::error::PathError;
use serde_json::{Map, Value};

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse `a.b[2].c` into segments.
///
/// An empty string is the empty path (the value itself).
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, PathError> {
    let mut out = Vec::new();
    let mut key = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if key.is_empty() && !matches!(out.last(), Some(PathSegment::Index(_))) {
                    return Err(PathError::EmptySegment(path.to_string()));
                }
                if !key.is_empty() {
                    out.push(PathSegment::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    out.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(other) => {
                            return Err(PathError::InvalidIndex {
                                path: path.to_string(),
                                found: other.to_string(),
                            });
                        }
                        None => return Err(PathError::UnclosedBracket(path.to_string())),
                    }
                }
                let index = digits.parse::<usize>().map_err(|_| PathError::InvalidIndex {
                    path: path.to_string(),
                    found: digits.clone(),
                })?;
                out.push(PathSegment::Index(index));
                if let Some(next) = chars.peek()
                    && *next != '.'
                    && *next != '['
                {
                    return Err(PathError::InvalidIndex {
                        path: path.to_string(),
                        found: next.to_string(),
                    });
                }
            }
            ']' => return Err(PathError::UnclosedBracket(path.to_string())),
            _ => key.push(c),
        }
    }

    if !key.is_empty() {
        out.push(PathSegment::Key(key));
    } else if path.ends_with('.') {
        return Err(PathError::EmptySegment(path.to_string()));
    }
    Ok(out)
}

/// Borrow the value at `path`, if every step exists.
pub fn get<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Key(k), Value::Object(obj)) => obj.get(k)?,
            (PathSegment::Index(i), Value::Array(arr)) => arr.get(*i)?,
            // `items.0` addresses arrays too
            (PathSegment::Key(k), Value::Array(arr)) => arr.get(k.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Every index must land inside the array it addresses or one past its end;
/// a missing or replaced array counts as empty.
fn check_indexes(value: &Value, path: &[PathSegment]) -> Result<(), PathError> {
    let mut cur = Some(value);
    for segment in path {
        cur = match segment {
            PathSegment::Key(k) => cur.and_then(Value::as_object).and_then(|obj| obj.get(k)),
            PathSegment::Index(i) => {
                let arr = cur.and_then(Value::as_array);
                let len = arr.map_or(0, Vec::len);
                if *i > len {
                    return Err(PathError::IndexOutOfRange { index: *i, len });
                }
                arr.and_then(|a| a.get(*i))
            }
        };
    }
    Ok(())
}

/// Write `new_value` at `path`, creating intermediate objects and arrays.
///
/// Scalars standing in the way are replaced. An index may append to an
/// array but never skip past its end; such paths are rejected before
/// anything is written.
pub fn set(value: &mut Value, path: &[PathSegment], new_value: Value) -> Result<(), PathError> {
    check_indexes(value, path)?;
    let Some((last, parents)) = path.split_last() else {
        *value = new_value;
        return Ok(());
    };

    let mut cur = value;
    for (i, segment) in parents.iter().enumerate() {
        let next_is_index = matches!(path[i + 1], PathSegment::Index(_));
        cur = descend(cur, segment, next_is_index);
    }

    match last {
        PathSegment::Key(k) => {
            if !cur.is_object() {
                *cur = Value::Object(Map::new());
            }
            if let Value::Object(obj) = cur {
                obj.insert(k.clone(), new_value);
            }
        }
        PathSegment::Index(i) => {
            if !cur.is_array() {
                *cur = Value::Array(Vec::new());
            }
            if let Value::Array(arr) = cur {
                if *i == arr.len() {
                    arr.push(new_value);
                } else {
                    arr[*i] = new_value;
                }
            }
        }
    }
    Ok(())
}

/// Remove and return the value at `path`. Array elements shift down.
pub fn remove(value: &mut Value, path: &[PathSegment]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut cur = value;
    for segment in parents {
        cur = match (segment, cur) {
            (PathSegment::Key(k), Value::Object(obj)) => obj.get_mut(k)?,
            (PathSegment::Index(i), Value::Array(arr)) => arr.get_mut(*i)?,
            _ => return None,
        };
    }
    match (last, cur) {
        (PathSegment::Key(k), Value::Object(obj)) => obj.remove(k),
        (PathSegment::Index(i), Value::Array(arr)) if *i < arr.len() => Some(arr.remove(*i)),
        _ => None,
    }
}

fn descend<'a>(cur: &'a mut Value, segment: &PathSegment, next_is_index: bool) -> &'a mut Value {
    let empty = || {
        if next_is_index {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    };
    match segment {
        PathSegment::Key(k) => {
            if !cur.is_object() {
                *cur = Value::Object(Map::new());
            }
            let Value::Object(obj) = cur else {
                unreachable!("object ensured before descending")
            };
            let entry = obj.entry(k.clone()).or_insert_with(empty);
            if entry.is_null() || (!entry.is_object() && !entry.is_array()) {
                *entry = empty();
            }
            entry
        }
        PathSegment::Index(i) => {
            if !cur.is_array() {
                *cur = Value::Array(Vec::new());
            }
            let Value::Array(arr) = cur else {
                unreachable!("array ensured before descending")
            };
            if *i == arr.len() {
                arr.push(Value::Null);
            }
            let entry = &mut arr[*i];
            if !entry.is_object() && !entry.is_array() {
                *entry = empty();
            }
            entry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_keys_and_indexes() {
        let path = parse_path("user.addresses[1].street").unwrap();
        assert_eq!(
            path,
            vec![
                PathSegment::Key("user".into()),
                PathSegment::Key("addresses".into()),
                PathSegment::Index(1),
                PathSegment::Key("street".into()),
            ]
        );
        assert!(parse_path("").unwrap().is_empty());
        assert_eq!(parse_path("a[0][2]").unwrap().len(), 3);
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(matches!(parse_path("a..b"), Err(PathError::EmptySegment(_))));
        assert!(matches!(parse_path("a[1"), Err(PathError::UnclosedBracket(_))));
        assert!(matches!(parse_path("a[x]"), Err(PathError::InvalidIndex { .. })));
    }

    #[test]
    fn get_walks_objects_and_arrays() {
        let value = json!({"list": [{"name": "a"}, {"name": "b"}]});
        let path = parse_path("list[1].name").unwrap();
        assert_eq!(get(&value, &path), Some(&json!("b")));
        assert_eq!(get(&value, &parse_path("list.0.name").unwrap()), Some(&json!("a")));
        assert_eq!(get(&value, &parse_path("list[5].name").unwrap()), None);
        assert_eq!(get(&value, &parse_path("missing.deep").unwrap()), None);
    }

    #[test]
    fn set_creates_missing_structure() {
        let mut value = Value::Null;
        set(&mut value, &parse_path("form.tags[0]").unwrap(), json!("x")).unwrap();
        set(&mut value, &parse_path("form.tags[1].label").unwrap(), json!("y")).unwrap();
        assert_eq!(value, json!({"form": {"tags": ["x", {"label": "y"}]}}));

        set(&mut value, &parse_path("form.tags[0]").unwrap(), json!("z")).unwrap();
        set(&mut value, &parse_path("form.name").unwrap(), json!("n")).unwrap();
        assert_eq!(value["form"]["tags"][0], json!("z"));
        assert_eq!(value["form"]["name"], json!("n"));

        set(&mut value, &[], json!(1)).unwrap();
        assert_eq!(value, json!(1));
    }

    #[test]
    fn set_rejects_indexes_past_the_end_untouched() {
        let mut value = json!({"list": [1]});
        for path in ["list[18446744073709551615]", "list[4000000000]", "list[2]", "fresh[1]", "a.b[0][3]"] {
            let err = set(&mut value, &parse_path(path).unwrap(), json!(0)).unwrap_err();
            assert!(matches!(err, PathError::IndexOutOfRange { .. }), "{path}: {err}");
        }
        assert_eq!(value, json!({"list": [1]}));
        assert_eq!(
            set(&mut value, &parse_path("list[5]").unwrap(), json!(0)),
            Err(PathError::IndexOutOfRange { index: 5, len: 1 })
        );
    }

    #[test]
    fn remove_drops_keys_and_shifts_arrays() {
        let mut value = json!({"a": {"b": 1, "c": 2}, "list": [1, 2, 3]});
        assert_eq!(remove(&mut value, &parse_path("a.b").unwrap()), Some(json!(1)));
        assert_eq!(remove(&mut value, &parse_path("list[0]").unwrap()), Some(json!(1)));
        assert_eq!(value, json!({"a": {"c": 2}, "list": [2, 3]}));
        assert_eq!(remove(&mut value, &parse_path("x.y").unwrap()), None);
    }

    #[test]
    fn set_replaces_scalars_in_the_way() {
        let mut value = json!({"a": 5});
        set(&mut value, &parse_path("a.b").unwrap(), json!(true)).unwrap();
        assert_eq!(value, json!({"a": {"b": true}}));
    }
}
