//! Expression and template engine for trellis workflows.
//!
//! Templates mix literal text with `$var{}`, `$expr{}`, and `$hier{}`
//! placeholders. Expression bodies are parsed against a closed grammar:
//! dotted paths, comparisons, `&&`/`||`, the ternary operator, and (in
//! the `py:` computation mode) arithmetic and a fixed set of builtin
//! functions. Nothing outside that grammar ever executes.

pub mod error;
pub mod eval;
pub mod parser;
pub mod pyexpr;
pub mod template;
pub mod token;

pub use error::{ExprError, Result};
pub use eval::{access_path, truthy, Evaluator, HierarchyLookup, NoLookup, Scope};
pub use parser::{parse, path_to_string, BinOp, Expr, ParseMode, PathSeg};
pub use pyexpr::PyFn;
pub use template::{
    evaluate, is_single_placeholder, referenced_roots, render, render_strict, render_with,
    stringify, RenderOptions,
};
