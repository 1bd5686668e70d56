//! Template rendering on top of the expression grammar.
//!
//! Three placeholder forms are recognized inside a literal string:
//!
//! - `$var{name}` — plain variable reference, with an optional coercion
//!   suffix and default: `$var{count:int|0}`.
//! - `$expr{...}` — general expression (or `$expr{py:...}` for the
//!   computation sublanguage).
//! - `$hier{flow.node.outcome.text}` — explicit hierarchical
//!   cross-reference into another component's recorded result.
//!
//! A doubled dollar escapes the placeholder: `$$var{name}` renders as
//! the literal text `$var{name}`.

use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use crate::error::{ExprError, Result};
use crate::eval::{Evaluator, HierarchyLookup, Scope};
use crate::parser::{parse, Expr, ParseMode};
use crate::token::{tokenize, Token};

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Truncate the final rendered string after this many words.
    /// Applies after substitution, never to individual pieces.
    pub max_words: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaceholderKind {
    Var,
    Expr,
    Hier,
}

impl PlaceholderKind {
    fn tag(&self) -> &'static str {
        match self {
            Self::Var => "var",
            Self::Expr => "expr",
            Self::Hier => "hier",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Chunk {
    Literal(String),
    Placeholder { kind: PlaceholderKind, body: String },
}

/// Render a template, embedding an error marker at the position of any
/// placeholder that fails to evaluate.
pub fn render(template: &str, scope: &Scope, lookup: &dyn HierarchyLookup) -> String {
    render_with(template, scope, lookup, &RenderOptions::default())
}

pub fn render_with(
    template: &str,
    scope: &Scope,
    lookup: &dyn HierarchyLookup,
    opts: &RenderOptions,
) -> String {
    let mut out = String::with_capacity(template.len());
    for chunk in scan(template) {
        match chunk {
            Chunk::Literal(text) => out.push_str(&text),
            Chunk::Placeholder { kind, body } => {
                match eval_placeholder(kind, &body, scope, lookup) {
                    Ok(v) => out.push_str(&stringify(&v)),
                    Err(e) => {
                        warn!(placeholder = %body, error = %e, "template placeholder failed");
                        out.push_str(&format!("[template error: {}]", e));
                    }
                }
            }
        }
    }
    match opts.max_words {
        Some(max) => apply_word_limit(&out, max),
        None => out,
    }
}

/// Like [`render`] but any placeholder failure aborts the whole render.
/// Used for strict settings fields and anywhere an inline error marker
/// would silently corrupt downstream behavior.
pub fn render_strict(template: &str, scope: &Scope, lookup: &dyn HierarchyLookup) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    for chunk in scan(template) {
        match chunk {
            Chunk::Literal(text) => out.push_str(&text),
            Chunk::Placeholder { kind, body } => {
                out.push_str(&stringify(&eval_placeholder(kind, &body, scope, lookup)?));
            }
        }
    }
    Ok(out)
}

/// Evaluate a template to a typed value.
///
/// If the template contains a placeholder, the first one is evaluated and
/// its raw value returned (surrounding literal text is ignored, matching
/// how guards and loop iterables are written). A template with no
/// placeholder is parsed as a bare expression, so `count > 3` and
/// `$expr{count > 3}` are equivalent for strict callers.
pub fn evaluate(template: &str, scope: &Scope, lookup: &dyn HierarchyLookup) -> Result<Value> {
    let chunks = scan(template);
    for chunk in &chunks {
        if let Chunk::Placeholder { kind, body } = chunk {
            return eval_placeholder(*kind, body, scope, lookup);
        }
    }
    // No placeholder; if the text came from an escape, hand it back as a
    // literal string, otherwise treat the whole template as an expression.
    if template.contains("$$") {
        let mut out = String::new();
        for chunk in chunks {
            if let Chunk::Literal(text) = chunk {
                out.push_str(&text);
            }
        }
        return Ok(Value::String(out));
    }
    let expr = parse_body(template.trim())?;
    Evaluator::new(scope, lookup).eval(&expr)
}

/// Whether a string is exactly one placeholder with no surrounding text.
/// The engine uses this to substitute typed values into settings fields.
pub fn is_single_placeholder(template: &str) -> bool {
    let chunks = scan(template.trim());
    matches!(chunks.as_slice(), [Chunk::Placeholder { .. }])
}

/// Collect the root identifiers a template might dereference. This is an
/// over-approximation (every identifier in every placeholder counts); the
/// engine uses it to decide which deferred values must be awaited before
/// rendering.
pub fn referenced_roots(template: &str) -> HashSet<String> {
    let mut roots = HashSet::new();
    for chunk in scan(template) {
        let Chunk::Placeholder { kind, body } = chunk else {
            continue;
        };
        match kind {
            PlaceholderKind::Var => {
                let (name, _, _) = split_var_body(&body);
                roots.insert(name.to_string());
            }
            PlaceholderKind::Expr | PlaceholderKind::Hier => {
                let body = body.strip_prefix("py:").unwrap_or(&body);
                if let Ok(tokens) = tokenize(body) {
                    for (_, tok) in tokens {
                        if let Token::Ident(name) = tok {
                            roots.insert(name);
                        }
                    }
                }
            }
        }
    }
    roots
}

fn eval_placeholder(
    kind: PlaceholderKind,
    body: &str,
    scope: &Scope,
    lookup: &dyn HierarchyLookup,
) -> Result<Value> {
    match kind {
        PlaceholderKind::Var => eval_var(body, scope),
        PlaceholderKind::Expr => {
            let expr = parse_body(body.trim())?;
            Evaluator::new(scope, lookup).eval(&expr)
        }
        PlaceholderKind::Hier => {
            let expr = parse(body.trim(), ParseMode::Template)?;
            match expr {
                Expr::Path(segs) => lookup.resolve(&segs),
                _ => Err(ExprError::Parse {
                    offset: 0,
                    message: "hierarchical reference must be a dotted path".to_string(),
                }),
            }
        }
    }
}

fn parse_body(body: &str) -> Result<Expr> {
    match body.strip_prefix("py:") {
        Some(rest) => parse(rest, ParseMode::Compute),
        None => parse(body, ParseMode::Template),
    }
}

/// Split a `$var{}` body into `(name, coercion, default)`.
/// Syntax: `name[:type][|default]`.
fn split_var_body(body: &str) -> (&str, Option<&str>, Option<&str>) {
    let (head, default) = match body.split_once('|') {
        Some((h, d)) => (h, Some(d)),
        None => (body, None),
    };
    let (name, ty) = match head.split_once(':') {
        Some((n, t)) => (n, Some(t.trim())),
        None => (head, None),
    };
    (name.trim(), ty, default)
}

fn eval_var(body: &str, scope: &Scope) -> Result<Value> {
    let (name, ty, default) = split_var_body(body);
    let value = match scope.get(name) {
        Some(v) if !v.is_null() => v.clone(),
        Some(_) | None => match default {
            Some(d) => parse_default(d),
            None if scope.contains_key(name) => Value::Null,
            None => return Err(ExprError::UnknownVariable(name.to_string())),
        },
    };
    match ty {
        Some(t) => coerce(value, t),
        None => Ok(value),
    }
}

/// Defaults are written inline: try JSON first so `0`, `true`, and
/// `["a"]` keep their types; fall back to a bare string.
fn parse_default(raw: &str) -> Value {
    serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn coerce(value: Value, ty: &str) -> Result<Value> {
    match ty {
        "str" => Ok(Value::String(stringify(&value))),
        "int" => match &value {
            Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0) as i64)),
            Value::Bool(b) => Ok(Value::from(*b as i64)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| ExprError::Type(format!("cannot coerce '{}' to int", s))),
            other => Err(ExprError::Type(format!("cannot coerce {} to int", other))),
        },
        "float" => match &value {
            Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0))),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| ExprError::Type(format!("cannot coerce '{}' to float", s))),
            other => Err(ExprError::Type(format!("cannot coerce {} to float", other))),
        },
        "bool" => Ok(Value::Bool(crate::eval::truthy(&value))),
        "json" => match value {
            Value::String(s) => serde_json::from_str(&s)
                .map_err(|e| ExprError::Type(format!("cannot coerce to json: {}", e))),
            other => Ok(other),
        },
        other => Err(ExprError::Type(format!("unknown coercion '{}'", other))),
    }
}

/// Stringify a value for embedding into rendered text. Nulls disappear,
/// strings are unquoted, everything else is compact JSON.
pub fn stringify(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truncate after `max_words` words, cutting at the original byte
/// boundary so internal whitespace survives.
fn apply_word_limit(text: &str, max_words: usize) -> String {
    if max_words == 0 {
        return String::new();
    }
    let mut count = 0;
    let mut in_word = false;
    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word {
                count += 1;
                in_word = false;
                if count == max_words {
                    return text[..i].to_string();
                }
            }
        } else {
            in_word = true;
        }
    }
    text.to_string()
}

/// Split a template into literal runs and placeholders, honoring `$$`
/// escapes. Unterminated placeholders are left as literal text.
fn scan(template: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut literal = String::new();
    let bytes = template.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            let ch = template[i..].chars().next().unwrap();
            literal.push(ch);
            i += ch.len_utf8();
            continue;
        }

        let escaped = bytes.get(i + 1) == Some(&b'$');
        let tag_start = if escaped { i + 2 } else { i + 1 };
        let kind = [
            (PlaceholderKind::Var, "var{"),
            (PlaceholderKind::Expr, "expr{"),
            (PlaceholderKind::Hier, "hier{"),
        ]
        .into_iter()
        .find(|(_, prefix)| template[tag_start.min(template.len())..].starts_with(prefix));

        let Some((kind, prefix)) = kind else {
            literal.push('$');
            i += 1;
            continue;
        };

        let body_start = tag_start + prefix.len();
        let Some(body_end) = find_close(template, body_start) else {
            // No closing brace; keep the text as-is.
            literal.push('$');
            i += 1;
            continue;
        };
        let body = &template[body_start..body_end];

        if escaped {
            literal.push_str(&format!("${}{{{}}}", kind.tag(), body));
        } else {
            if !literal.is_empty() {
                chunks.push(Chunk::Literal(std::mem::take(&mut literal)));
            }
            chunks.push(Chunk::Placeholder {
                kind,
                body: body.to_string(),
            });
        }
        i = body_end + 1;
    }

    if !literal.is_empty() {
        chunks.push(Chunk::Literal(literal));
    }
    chunks
}

/// Find the closing `}` of a placeholder body, skipping braces inside
/// quoted strings.
fn find_close(template: &str, from: usize) -> Option<usize> {
    let bytes = template.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'}' => return Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    None
}
