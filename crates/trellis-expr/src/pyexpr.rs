//! The `py:` computation sublanguage.
//!
//! A closed allowlist of pure functions usable inside `$expr{py:...}`.
//! Anything outside the allowlist fails at parse time, not at evaluation
//! time, so a definition that tries to call into the host is rejected
//! before the run starts.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::{ExprError, Result};

/// Allowlisted pure functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyFn {
    Len,
    Sum,
    Min,
    Max,
    All,
    Any,
    Sorted,
    Reversed,
    Unique,
    First,
    Last,
    Contains,
    Join,
    Split,
    Upper,
    Lower,
    Trim,
    Str,
    Int,
    Float,
    Bool,
    IsString,
    IsNumber,
    IsList,
    IsMap,
    IsNull,
    MapGet,
    Filter,
    Pluck,
}

impl PyFn {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "len" => Self::Len,
            "sum" => Self::Sum,
            "min" => Self::Min,
            "max" => Self::Max,
            "all" => Self::All,
            "any" => Self::Any,
            "sorted" => Self::Sorted,
            "reversed" => Self::Reversed,
            "unique" => Self::Unique,
            "first" => Self::First,
            "last" => Self::Last,
            "contains" => Self::Contains,
            "join" => Self::Join,
            "split" => Self::Split,
            "upper" => Self::Upper,
            "lower" => Self::Lower,
            "trim" => Self::Trim,
            "str" => Self::Str,
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "is_string" => Self::IsString,
            "is_number" => Self::IsNumber,
            "is_list" => Self::IsList,
            "is_map" => Self::IsMap,
            "is_null" => Self::IsNull,
            "map_get" => Self::MapGet,
            "filter" => Self::Filter,
            "pluck" => Self::Pluck,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Len => "len",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::All => "all",
            Self::Any => "any",
            Self::Sorted => "sorted",
            Self::Reversed => "reversed",
            Self::Unique => "unique",
            Self::First => "first",
            Self::Last => "last",
            Self::Contains => "contains",
            Self::Join => "join",
            Self::Split => "split",
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Trim => "trim",
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::IsString => "is_string",
            Self::IsNumber => "is_number",
            Self::IsList => "is_list",
            Self::IsMap => "is_map",
            Self::IsNull => "is_null",
            Self::MapGet => "map_get",
            Self::Filter => "filter",
            Self::Pluck => "pluck",
        }
    }
}

/// Apply a function to already-evaluated arguments.
pub fn eval_call(func: PyFn, args: Vec<Value>) -> Result<Value> {
    match func {
        PyFn::Len => {
            let v = one(func, args)?;
            let n = match &v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => return Err(type_err(func, "a string, list, or map", other)),
            };
            Ok(Value::from(n))
        }
        PyFn::Sum => {
            let items = list_arg(func, one(func, args)?)?;
            let mut int_total: i64 = 0;
            let mut float_total = 0.0;
            let mut any_float = false;
            for item in &items {
                match item {
                    Value::Number(n) if n.is_i64() && !any_float => {
                        let i = n.as_i64().unwrap();
                        match int_total.checked_add(i) {
                            Some(total) => int_total = total,
                            // Integer overflow: continue in floats.
                            None => {
                                float_total = int_total as f64 + i as f64;
                                any_float = true;
                            }
                        }
                    }
                    Value::Number(n) => {
                        if !any_float {
                            float_total = int_total as f64;
                            any_float = true;
                        }
                        float_total += n.as_f64().unwrap_or(0.0);
                    }
                    other => return Err(type_err(func, "a list of numbers", other)),
                }
            }
            if any_float {
                Ok(Value::from(float_total))
            } else {
                Ok(Value::from(int_total))
            }
        }
        PyFn::Min | PyFn::Max => {
            let items = list_arg(func, one(func, args)?)?;
            if items.is_empty() {
                return Err(ExprError::Type(format!("{}() of an empty list", func.name())));
            }
            let mut best = items[0].clone();
            for item in &items[1..] {
                let ord = compare(item, &best)?;
                let take = match func {
                    PyFn::Min => ord == Ordering::Less,
                    _ => ord == Ordering::Greater,
                };
                if take {
                    best = item.clone();
                }
            }
            Ok(best)
        }
        PyFn::All => {
            let items = list_arg(func, one(func, args)?)?;
            Ok(Value::Bool(items.iter().all(crate::eval::truthy)))
        }
        PyFn::Any => {
            let items = list_arg(func, one(func, args)?)?;
            Ok(Value::Bool(items.iter().any(crate::eval::truthy)))
        }
        PyFn::Sorted => {
            let mut items = list_arg(func, one(func, args)?)?;
            let mut err = None;
            items.sort_by(|a, b| match compare(a, b) {
                Ok(ord) => ord,
                Err(e) => {
                    err.get_or_insert(e);
                    Ordering::Equal
                }
            });
            match err {
                Some(e) => Err(e),
                None => Ok(Value::Array(items)),
            }
        }
        PyFn::Reversed => {
            let mut items = list_arg(func, one(func, args)?)?;
            items.reverse();
            Ok(Value::Array(items))
        }
        PyFn::Unique => {
            let items = list_arg(func, one(func, args)?)?;
            let mut seen: Vec<Value> = Vec::new();
            for item in items {
                if !seen.contains(&item) {
                    seen.push(item);
                }
            }
            Ok(Value::Array(seen))
        }
        PyFn::First | PyFn::Last => {
            let items = list_arg(func, one(func, args)?)?;
            let picked = if func == PyFn::First {
                items.first()
            } else {
                items.last()
            };
            picked
                .cloned()
                .ok_or_else(|| ExprError::Index(format!("{}() of an empty list", func.name())))
        }
        PyFn::Contains => {
            let (coll, needle) = two(func, args)?;
            let found = match &coll {
                Value::String(s) => match &needle {
                    Value::String(sub) => s.contains(sub.as_str()),
                    other => return Err(type_err(func, "a string needle", other)),
                },
                Value::Array(items) => items.contains(&needle),
                Value::Object(map) => match &needle {
                    Value::String(key) => map.contains_key(key),
                    other => return Err(type_err(func, "a string key", other)),
                },
                other => return Err(type_err(func, "a string, list, or map", other)),
            };
            Ok(Value::Bool(found))
        }
        PyFn::Join => {
            let (list, sep) = two(func, args)?;
            let items = list_arg(func, list)?;
            let sep = str_arg(func, &sep)?;
            let parts: Vec<String> = items.iter().map(display_string).collect();
            Ok(Value::String(parts.join(&sep)))
        }
        PyFn::Split => {
            let (s, sep) = two(func, args)?;
            let s = str_arg(func, &s)?;
            let sep = str_arg(func, &sep)?;
            Ok(Value::Array(
                s.split(&sep)
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            ))
        }
        PyFn::Upper => Ok(Value::String(str_arg(func, &one(func, args)?)?.to_uppercase())),
        PyFn::Lower => Ok(Value::String(str_arg(func, &one(func, args)?)?.to_lowercase())),
        PyFn::Trim => Ok(Value::String(str_arg(func, &one(func, args)?)?.trim().to_string())),
        PyFn::Str => Ok(Value::String(display_string(&one(func, args)?))),
        PyFn::Int => {
            let v = one(func, args)?;
            match &v {
                Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0) as i64)),
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| ExprError::Type(format!("int('{}') is not an integer", s))),
                other => Err(type_err(func, "a number, bool, or numeric string", other)),
            }
        }
        PyFn::Float => {
            let v = one(func, args)?;
            match &v {
                Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0))),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::from)
                    .map_err(|_| ExprError::Type(format!("float('{}') is not a number", s))),
                other => Err(type_err(func, "a number or numeric string", other)),
            }
        }
        PyFn::Bool => Ok(Value::Bool(crate::eval::truthy(&one(func, args)?))),
        PyFn::IsString => Ok(Value::Bool(one(func, args)?.is_string())),
        PyFn::IsNumber => Ok(Value::Bool(one(func, args)?.is_number())),
        PyFn::IsList => Ok(Value::Bool(one(func, args)?.is_array())),
        PyFn::IsMap => Ok(Value::Bool(one(func, args)?.is_object())),
        PyFn::IsNull => Ok(Value::Bool(one(func, args)?.is_null())),
        PyFn::MapGet => {
            if args.len() != 2 && args.len() != 3 {
                return Err(arity_err(func, "2 or 3"));
            }
            let mut args = args;
            let default = if args.len() == 3 { args.pop().unwrap() } else { Value::Null };
            let key = args.pop().unwrap();
            let map = args.pop().unwrap();
            let key = str_arg(func, &key)?;
            match map {
                Value::Object(m) => Ok(m.get(&key).cloned().unwrap_or(default)),
                other => Err(type_err(func, "a map", &other)),
            }
        }
        PyFn::Filter => {
            // filter(list_of_maps, key, value): keep items whose `key` equals `value`.
            if args.len() != 3 {
                return Err(arity_err(func, "3"));
            }
            let mut args = args;
            let value = args.pop().unwrap();
            let key = str_arg(func, &args.pop().unwrap())?;
            let items = list_arg(func, args.pop().unwrap())?;
            let kept = items
                .into_iter()
                .filter(|item| item.get(&key) == Some(&value))
                .collect();
            Ok(Value::Array(kept))
        }
        PyFn::Pluck => {
            // pluck(list_of_maps, key): project one field from each item.
            let (list, key) = two(func, args)?;
            let items = list_arg(func, list)?;
            let key = str_arg(func, &key)?;
            let projected = items
                .into_iter()
                .map(|item| item.get(&key).cloned().unwrap_or(Value::Null))
                .collect();
            Ok(Value::Array(projected))
        }
    }
}

fn one(func: PyFn, mut args: Vec<Value>) -> Result<Value> {
    if args.len() != 1 {
        return Err(arity_err(func, "1"));
    }
    Ok(args.pop().unwrap())
}

fn two(func: PyFn, mut args: Vec<Value>) -> Result<(Value, Value)> {
    if args.len() != 2 {
        return Err(arity_err(func, "2"));
    }
    let b = args.pop().unwrap();
    let a = args.pop().unwrap();
    Ok((a, b))
}

fn arity_err(func: PyFn, want: &str) -> ExprError {
    ExprError::Type(format!("{}() expects {} argument(s)", func.name(), want))
}

fn type_err(func: PyFn, want: &str, got: &Value) -> ExprError {
    ExprError::Type(format!(
        "{}() expects {}, got {}",
        func.name(),
        want,
        value_kind(got)
    ))
}

fn list_arg(func: PyFn, v: Value) -> Result<Vec<Value>> {
    match v {
        Value::Array(items) => Ok(items),
        other => Err(type_err(func, "a list", &other)),
    }
}

fn str_arg(func: PyFn, v: &Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        other => Err(type_err(func, "a string", other)),
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn display_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Order two values: numbers by magnitude, strings lexicographically.
pub(crate) fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ExprError::Type(format!(
            "cannot order {} and {}",
            value_kind(a),
            value_kind(b)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn len_on_collections() {
        assert_eq!(eval_call(PyFn::Len, vec![json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(eval_call(PyFn::Len, vec![json!("abc")]).unwrap(), json!(3));
        assert!(eval_call(PyFn::Len, vec![json!(5)]).is_err());
    }

    #[test]
    fn sum_preserves_integers() {
        assert_eq!(eval_call(PyFn::Sum, vec![json!([1, 2, 3])]).unwrap(), json!(6));
        assert_eq!(
            eval_call(PyFn::Sum, vec![json!([1, 2.5])]).unwrap(),
            json!(3.5)
        );
    }

    #[test]
    fn sum_overflow_continues_in_floats() {
        let total = eval_call(PyFn::Sum, vec![json!([i64::MAX, 1])]).unwrap();
        let total = total.as_f64().unwrap();
        assert!(total >= i64::MAX as f64);
    }

    #[test]
    fn min_max_over_strings_and_numbers() {
        assert_eq!(
            eval_call(PyFn::Min, vec![json!([3, 1, 2])]).unwrap(),
            json!(1)
        );
        assert_eq!(
            eval_call(PyFn::Max, vec![json!(["a", "c", "b"])]).unwrap(),
            json!("c")
        );
        assert!(eval_call(PyFn::Min, vec![json!([1, "a"])]).is_err());
    }

    #[test]
    fn sorted_and_unique() {
        assert_eq!(
            eval_call(PyFn::Sorted, vec![json!([3, 1, 2])]).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            eval_call(PyFn::Unique, vec![json!([1, 2, 1, 3, 2])]).unwrap(),
            json!([1, 2, 3])
        );
    }

    #[test]
    fn filter_and_pluck_over_maps() {
        let rows = json!([
            {"name": "a", "ok": true},
            {"name": "b", "ok": false},
            {"name": "c", "ok": true},
        ]);
        let kept = eval_call(
            PyFn::Filter,
            vec![rows.clone(), json!("ok"), json!(true)],
        )
        .unwrap();
        assert_eq!(kept.as_array().unwrap().len(), 2);
        assert_eq!(
            eval_call(PyFn::Pluck, vec![rows, json!("name")]).unwrap(),
            json!(["a", "b", "c"])
        );
    }

    #[test]
    fn map_get_with_default() {
        let m = json!({"a": 1});
        assert_eq!(
            eval_call(PyFn::MapGet, vec![m.clone(), json!("a")]).unwrap(),
            json!(1)
        );
        assert_eq!(
            eval_call(PyFn::MapGet, vec![m, json!("b"), json!(0)]).unwrap(),
            json!(0)
        );
    }

    #[test]
    fn arity_is_checked() {
        assert!(eval_call(PyFn::Len, vec![]).is_err());
        assert!(eval_call(PyFn::Join, vec![json!([1])]).is_err());
    }
}
