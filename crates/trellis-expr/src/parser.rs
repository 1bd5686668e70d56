use serde_json::Value;

use crate::error::{ExprError, Result};
use crate::pyexpr::PyFn;
use crate::token::{tokenize, Token};

/// One segment of a dotted path: `node.items[0].name` is
/// `[Ident("node"), Ident("items"), Index(0), Ident("name")]`.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSeg {
    Ident(String),
    Index(i64),
    Key(String),
}

impl std::fmt::Display for PathSeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSeg::Ident(s) => write!(f, "{}", s),
            PathSeg::Index(i) => write!(f, "[{}]", i),
            PathSeg::Key(k) => write!(f, "['{}']", k),
        }
    }
}

/// Join path segments back into a human-readable path string.
pub fn path_to_string(segs: &[PathSeg]) -> String {
    let mut out = String::new();
    for (i, seg) in segs.iter().enumerate() {
        if i > 0 && matches!(seg, PathSeg::Ident(_)) {
            out.push('.');
        }
        out.push_str(&seg.to_string());
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted/indexed path rooted at an identifier.
    Path(Vec<PathSeg>),
    /// Static member access on a non-path base, e.g. `(a || b).name`.
    Member { base: Box<Expr>, seg: PathSeg },
    /// Index whose value is only known at evaluation time, e.g. `items[index]`.
    DynIndex { base: Box<Expr>, index: Box<Expr> },
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Allowlisted function call; only reachable in `py:` mode.
    Call { func: PyFn, args: Vec<Expr> },
    /// List literal; only reachable in `py:` mode.
    List(Vec<Expr>),
}

/// Which grammar subset is active.
///
/// `Template` is the placeholder grammar from `$expr{...}`; `Compute` is
/// the opt-in `py:` sublanguage which additionally permits arithmetic,
/// list literals, and calls to allowlisted pure functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Template,
    Compute,
}

/// Parse an expression body (without the surrounding `$expr{}`).
pub fn parse(src: &str, mode: ParseMode) -> Result<Expr> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        mode,
        src_len: src.len(),
    };
    let expr = parser.parse_expr()?;
    if let Some((off, _)) = parser.peek_raw() {
        return Err(ExprError::parse(*off, "unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    mode: ParseMode,
    src_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_raw(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.pos)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.src_len)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &Token, what: &str) -> Result<()> {
        let off = self.offset();
        match self.bump() {
            Some(ref t) if t == want => Ok(()),
            _ => Err(ExprError::parse(off, format!("expected {}", what))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if self.peek() == Some(&Token::Question) {
            self.bump();
            let then = self.parse_expr()?;
            self.expect(&Token::Colon, "':' in ternary expression")?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.bump();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_cmp()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.bump();
            let right = self.parse_cmp()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let mut left = self.parse_add()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinOp::Eq,
                Some(Token::NotEq) => BinOp::Ne,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Ge) => BinOp::Ge,
                Some(Token::Le) => BinOp::Le,
                _ => break,
            };
            self.bump();
            let right = self.parse_add()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            let off = self.offset();
            self.require_compute(off, "arithmetic")?;
            self.bump();
            let right = self.parse_mul()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            let off = self.offset();
            self.require_compute(off, "arithmetic")?;
            self.bump();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.bump();
            let inner = self.parse_unary()?;
            // Fold negative literals so template mode can use them freely.
            return Ok(match inner {
                Expr::Literal(Value::Number(n)) => {
                    if let Some(i) = n.as_i64() {
                        Expr::Literal(Value::from(-i))
                    } else {
                        Expr::Literal(Value::from(-n.as_f64().unwrap_or(0.0)))
                    }
                }
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    let off = self.offset();
                    let name = match self.bump() {
                        Some(Token::Ident(name)) => name,
                        _ => return Err(ExprError::parse(off, "expected property name after '.'")),
                    };
                    expr = attach_segment(expr, PathSeg::Ident(name));
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket, "']' after index")?;
                    expr = match index {
                        Expr::Literal(Value::Number(n)) if n.is_i64() => {
                            attach_segment(expr, PathSeg::Index(n.as_i64().unwrap()))
                        }
                        Expr::Literal(Value::String(key)) => {
                            attach_segment(expr, PathSeg::Key(key))
                        }
                        dynamic => Expr::DynIndex {
                            base: Box::new(expr),
                            index: Box::new(dynamic),
                        },
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let off = self.offset();
        match self.bump() {
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::from(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::from(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.require_compute(off, "function calls")?;
                    // Allowlist check happens here, at parse time.
                    let func = PyFn::from_name(&name)
                        .ok_or_else(|| ExprError::DisallowedCall(name.clone()))?;
                    self.bump();
                    let args = self.parse_args()?;
                    return Ok(Expr::Call { func, args });
                }
                Ok(Expr::Path(vec![PathSeg::Ident(name)]))
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                self.require_compute(off, "list literals")?;
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.bump();
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_expr()?);
                    match self.bump() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        _ => return Err(ExprError::parse(self.offset(), "expected ',' or ']'")),
                    }
                }
                Ok(Expr::List(items))
            }
            _ => Err(ExprError::parse(off, "expected expression")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.bump();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.bump() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return Err(ExprError::parse(self.offset(), "expected ',' or ')'")),
            }
        }
        Ok(args)
    }

    fn require_compute(&self, offset: usize, what: &str) -> Result<()> {
        if self.mode == ParseMode::Compute {
            Ok(())
        } else {
            Err(ExprError::parse(
                offset,
                format!("{} are only available in py: expressions", what),
            ))
        }
    }
}

/// Extend a path when the base is a path; otherwise wrap in `Member`.
fn attach_segment(base: Expr, seg: PathSeg) -> Expr {
    match base {
        Expr::Path(mut segs) => {
            segs.push(seg);
            Expr::Path(segs)
        }
        other => Expr::Member {
            base: Box::new(other),
            seg,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_path_with_index() {
        let expr = parse("node1.data.items[0].name", ParseMode::Template).unwrap();
        assert_eq!(
            expr,
            Expr::Path(vec![
                PathSeg::Ident("node1".into()),
                PathSeg::Ident("data".into()),
                PathSeg::Ident("items".into()),
                PathSeg::Index(0),
                PathSeg::Ident("name".into()),
            ])
        );
    }

    #[test]
    fn parses_string_key_index() {
        let expr = parse("row['first name']", ParseMode::Template).unwrap();
        assert_eq!(
            expr,
            Expr::Path(vec![
                PathSeg::Ident("row".into()),
                PathSeg::Key("first name".into()),
            ])
        );
    }

    #[test]
    fn ternary_binds_looser_than_or() {
        let expr = parse("a || b ? 'x' : 'y'", ParseMode::Template).unwrap();
        match expr {
            Expr::Ternary { cond, .. } => {
                assert!(matches!(*cond, Expr::Binary { op: BinOp::Or, .. }))
            }
            other => panic!("expected ternary, got {:?}", other),
        }
    }

    #[test]
    fn comparison_binds_tighter_than_and() {
        let expr = parse("a > 1 && b < 2", ParseMode::Template).unwrap();
        match expr {
            Expr::Binary { op, left, right } => {
                assert_eq!(op, BinOp::And);
                assert!(matches!(*left, Expr::Binary { op: BinOp::Gt, .. }));
                assert!(matches!(*right, Expr::Binary { op: BinOp::Lt, .. }));
            }
            other => panic!("expected &&, got {:?}", other),
        }
    }

    #[test]
    fn arithmetic_is_rejected_outside_compute_mode() {
        let err = parse("a + 1", ParseMode::Template).unwrap_err();
        assert!(matches!(err, ExprError::Parse { .. }));
        assert!(parse("a + 1", ParseMode::Compute).is_ok());
    }

    #[test]
    fn calls_are_rejected_outside_compute_mode() {
        assert!(parse("len(items)", ParseMode::Template).is_err());
        assert!(parse("len(items)", ParseMode::Compute).is_ok());
    }

    #[test]
    fn unknown_function_is_rejected_at_parse_time() {
        let err = parse("open('/etc/passwd')", ParseMode::Compute).unwrap_err();
        assert_eq!(err, ExprError::DisallowedCall("open".into()));
    }

    #[test]
    fn dynamic_index_parses() {
        let expr = parse("items[index]", ParseMode::Template).unwrap();
        assert!(matches!(expr, Expr::DynIndex { .. }));
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        assert!(parse("a b", ParseMode::Template).is_err());
    }

    #[test]
    fn negative_literal_folds() {
        let expr = parse("-3", ParseMode::Template).unwrap();
        assert_eq!(expr, Expr::Literal(Value::from(-3)));
    }
}
