use std::collections::HashMap;

use serde_json::Value;

use crate::error::{ExprError, Result};
use crate::parser::{path_to_string, BinOp, Expr, PathSeg};
use crate::pyexpr;

/// Variable scope for one evaluation: a flattened view of a context's
/// effective variables (child shadows parent).
pub type Scope = HashMap<String, Value>;

/// Callback that resolves a dotted path into another component's
/// recorded result. Implemented by the execution engine's context tree;
/// the expression crate has no dependency on the engine.
///
/// Implementations must return [`ExprError::NotReady`] for components
/// that exist but have not reached a terminal status, and
/// [`ExprError::UnknownPath`] for paths that resolve to nothing.
pub trait HierarchyLookup {
    fn resolve(&self, segments: &[PathSeg]) -> Result<Value>;
}

/// Lookup that resolves nothing; used for standalone template rendering.
pub struct NoLookup;

impl HierarchyLookup for NoLookup {
    fn resolve(&self, segments: &[PathSeg]) -> Result<Value> {
        Err(ExprError::UnknownPath(path_to_string(segments)))
    }
}

/// Truthiness rules shared by `&&`, `||`, ternary conditions, and guards:
/// `null`, `false`, `0`, `0.0`, and `""` are falsy; lists and maps are
/// always truthy.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub struct Evaluator<'a> {
    scope: &'a Scope,
    lookup: &'a dyn HierarchyLookup,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: &'a Scope, lookup: &'a dyn HierarchyLookup) -> Self {
        Self { scope, lookup }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Path(segs) => self.eval_path(segs),
            Expr::Member { base, seg } => {
                let base = self.eval(base)?;
                access(&base, seg, &seg.to_string())
            }
            Expr::DynIndex { base, index } => {
                let base_val = self.eval(base)?;
                let index_val = self.eval(index)?;
                let seg = match index_val {
                    Value::Number(n) if n.is_i64() => PathSeg::Index(n.as_i64().unwrap()),
                    Value::String(key) => PathSeg::Key(key),
                    other => {
                        return Err(ExprError::Type(format!(
                            "index must be an integer or string, got {}",
                            other
                        )))
                    }
                };
                access(&base_val, &seg, &seg.to_string())
            }
            Expr::Neg(inner) => {
                let v = self.eval(inner)?;
                match v {
                    Value::Number(n) if n.is_i64() => Ok(Value::from(-n.as_i64().unwrap())),
                    Value::Number(n) => Ok(Value::from(-n.as_f64().unwrap_or(0.0))),
                    other => Err(ExprError::Type(format!("cannot negate {}", other))),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if truthy(&self.eval(cond)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { func, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>>>()?;
                pyexpr::eval_call(*func, values)
            }
            Expr::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|i| self.eval(i))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }

    /// Resolve a dotted path: scope first, then the hierarchical lookup.
    fn eval_path(&self, segs: &[PathSeg]) -> Result<Value> {
        let head = match &segs[0] {
            PathSeg::Ident(name) => name,
            other => return Err(ExprError::Type(format!("path cannot start with {}", other))),
        };

        if let Some(root) = self.scope.get(head) {
            let mut current = root.clone();
            let mut walked = head.clone();
            for seg in &segs[1..] {
                current = access(&current, seg, &walked)?;
                if matches!(seg, PathSeg::Ident(_)) {
                    walked.push('.');
                }
                walked.push_str(&seg.to_string());
            }
            return Ok(current);
        }

        self.lookup.resolve(segs)
    }

    fn eval_binary(&self, op: BinOp, left: &Expr, right: &Expr) -> Result<Value> {
        match op {
            // `||` doubles as a fallback operator: a left operand that is
            // missing (unknown variable/path) falls through to the right.
            BinOp::Or => match self.eval(left) {
                Ok(v) if truthy(&v) => Ok(v),
                Ok(_) => self.eval(right),
                Err(e) if e.is_missing_value() => self.eval(right),
                Err(e) => Err(e),
            },
            BinOp::And => {
                let l = self.eval(left)?;
                if truthy(&l) {
                    self.eval(right)
                } else {
                    Ok(l)
                }
            }
            BinOp::Eq => Ok(Value::Bool(values_equal(&self.eval(left)?, &self.eval(right)?))),
            BinOp::Ne => Ok(Value::Bool(!values_equal(
                &self.eval(left)?,
                &self.eval(right)?,
            ))),
            BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
                let ord = pyexpr::compare(&self.eval(left)?, &self.eval(right)?)?;
                Ok(Value::Bool(match op {
                    BinOp::Gt => ord == std::cmp::Ordering::Greater,
                    BinOp::Lt => ord == std::cmp::Ordering::Less,
                    BinOp::Ge => ord != std::cmp::Ordering::Less,
                    BinOp::Le => ord != std::cmp::Ordering::Greater,
                    _ => unreachable!(),
                }))
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                arithmetic(op, &self.eval(left)?, &self.eval(right)?)
            }
        }
    }
}

/// Equality with int/float unification: `1 == 1.0` holds.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().unwrap_or(f64::NAN) == y.as_f64().unwrap_or(f64::NAN)
        }
        _ => a == b,
    }
}

fn arithmetic(op: BinOp, a: &Value, b: &Value) -> Result<Value> {
    // String and list concatenation via `+`.
    if op == BinOp::Add {
        if let (Value::String(x), Value::String(y)) = (a, b) {
            return Ok(Value::String(format!("{}{}", x, y)));
        }
        if let (Value::Array(x), Value::Array(y)) = (a, b) {
            let mut out = x.clone();
            out.extend(y.iter().cloned());
            return Ok(Value::Array(out));
        }
    }

    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        return Err(ExprError::Type(format!(
            "cannot apply arithmetic to {} and {}",
            a, b
        )));
    };

    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        return match op {
            BinOp::Add => Ok(Value::from(x.wrapping_add(y))),
            BinOp::Sub => Ok(Value::from(x.wrapping_sub(y))),
            BinOp::Mul => Ok(Value::from(x.wrapping_mul(y))),
            BinOp::Div => {
                if y == 0 {
                    Err(ExprError::DivisionByZero)
                } else if x % y == 0 {
                    Ok(Value::from(x / y))
                } else {
                    Ok(Value::from(x as f64 / y as f64))
                }
            }
            BinOp::Mod => {
                if y == 0 {
                    Err(ExprError::DivisionByZero)
                } else {
                    Ok(Value::from(x % y))
                }
            }
            _ => unreachable!(),
        };
    }

    let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
    match op {
        BinOp::Add => Ok(Value::from(x + y)),
        BinOp::Sub => Ok(Value::from(x - y)),
        BinOp::Mul => Ok(Value::from(x * y)),
        BinOp::Div => {
            if y == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(Value::from(x / y))
            }
        }
        BinOp::Mod => {
            if y == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(Value::from(x % y))
            }
        }
        _ => unreachable!(),
    }
}

/// Apply a sequence of path segments to a value. `walked` is the
/// already-resolved prefix, used only for error messages. Lookup
/// implementations use this to descend into recorded results.
pub fn access_path(value: &Value, segs: &[PathSeg], walked: &str) -> Result<Value> {
    let mut current = value.clone();
    let mut walked = walked.to_string();
    for seg in segs {
        current = access(&current, seg, &walked)?;
        if matches!(seg, PathSeg::Ident(_)) {
            walked.push('.');
        }
        walked.push_str(&seg.to_string());
    }
    Ok(current)
}

/// Apply one path segment to a value. `walked` is the already-resolved
/// prefix, used only for error messages.
pub(crate) fn access(value: &Value, seg: &PathSeg, walked: &str) -> Result<Value> {
    match seg {
        PathSeg::Ident(name) | PathSeg::Key(name) => match value {
            Value::Object(map) => map.get(name).cloned().ok_or_else(|| {
                ExprError::UnknownPath(format!("{}.{}", walked, name))
            }),
            _ => Err(ExprError::Type(format!(
                "'{}' is not a map, cannot access '{}'",
                walked, name
            ))),
        },
        PathSeg::Index(idx) => match value {
            Value::Array(items) => {
                let len = items.len() as i64;
                let effective = if *idx < 0 { len + *idx } else { *idx };
                if effective < 0 || effective >= len {
                    return Err(ExprError::Index(format!(
                        "index {} out of bounds for '{}' (len {})",
                        idx, walked, len
                    )));
                }
                Ok(items[effective as usize].clone())
            }
            _ => Err(ExprError::Type(format!(
                "'{}' is not a list, cannot index with {}",
                walked, idx
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, ParseMode};
    use serde_json::json;

    fn eval_str(src: &str, scope: &Scope) -> Result<Value> {
        let mode = if let Some(body) = src.strip_prefix("py:") {
            return Evaluator::new(scope, &NoLookup).eval(&parse(body, ParseMode::Compute)?);
        } else {
            ParseMode::Template
        };
        Evaluator::new(scope, &NoLookup).eval(&parse(src, mode)?)
    }

    fn scope(v: Value) -> Scope {
        match v {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("scope must be a map"),
        }
    }

    #[test]
    fn property_access_and_indexing() {
        let s = scope(json!({"node1": {"data": {"items": [{"name": "Item 1"}], "count": 2}}}));
        assert_eq!(eval_str("node1.data.count", &s).unwrap(), json!(2));
        assert_eq!(
            eval_str("node1.data.items[0].name", &s).unwrap(),
            json!("Item 1")
        );
    }

    #[test]
    fn negative_index_counts_from_end() {
        let s = scope(json!({"xs": [1, 2, 3]}));
        assert_eq!(eval_str("xs[-1]", &s).unwrap(), json!(3));
    }

    #[test]
    fn missing_property_is_an_error_not_null() {
        let s = scope(json!({"a": {"b": 1}}));
        let err = eval_str("a.missing", &s).unwrap_err();
        assert_eq!(err, ExprError::UnknownPath("a.missing".into()));
    }

    #[test]
    fn fallback_returns_left_when_truthy() {
        let s = scope(json!({"user": {"name": "John", "nickname": null}}));
        assert_eq!(
            eval_str("user.nickname || user.name", &s).unwrap(),
            json!("John")
        );
        assert_eq!(
            eval_str("user.name || user.nickname", &s).unwrap(),
            json!("John")
        );
    }

    #[test]
    fn fallback_swallows_missing_paths() {
        let s = scope(json!({"node1": {"count": 2}}));
        assert_eq!(eval_str("node1.missing || node1.count", &s).unwrap(), json!(2));
    }

    #[test]
    fn and_short_circuits() {
        let s = scope(json!({"a": false}));
        // Right side would error, but `a` is falsy so it is never evaluated.
        assert_eq!(eval_str("a && nope.nope", &s).unwrap(), json!(false));
    }

    #[test]
    fn comparisons_unify_int_and_float() {
        let s = scope(json!({"x": 1, "y": 1.0}));
        assert_eq!(eval_str("x == y", &s).unwrap(), json!(true));
        assert_eq!(eval_str("x >= 2", &s).unwrap(), json!(false));
    }

    #[test]
    fn ternary_selects_branch() {
        let s = scope(json!({"user": {"active": true}}));
        assert_eq!(
            eval_str("user.active ? 'Online' : 'Offline'", &s).unwrap(),
            json!("Online")
        );
    }

    #[test]
    fn dynamic_index_with_variable() {
        let s = scope(json!({"items": ["a", "b", "c"], "index": 1}));
        assert_eq!(eval_str("items[index]", &s).unwrap(), json!("b"));
    }

    #[test]
    fn compute_mode_arithmetic_and_calls() {
        let s = scope(json!({"xs": [1, 2, 3], "n": 2}));
        assert_eq!(eval_str("py:sum(xs) + n", &s).unwrap(), json!(8));
        assert_eq!(eval_str("py:len(xs) * 10", &s).unwrap(), json!(30));
        assert_eq!(eval_str("py:10 / 4", &s).unwrap(), json!(2.5));
        assert_eq!(eval_str("py:10 / 0", &s), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn string_concat_in_compute_mode() {
        let s = scope(json!({"a": "foo"}));
        assert_eq!(eval_str("py:a + 'bar'", &s).unwrap(), json!("foobar"));
    }
}
