use thiserror::Error;

/// Errors produced while parsing or evaluating template expressions.
///
/// `render` degrades these to inline markers; `evaluate` propagates them
/// so strict callers (guards, settings resolution) can fail fast.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at byte {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("unresolvable path '{0}'")]
    UnknownPath(String),

    #[error("component '{0}' has not finished executing")]
    NotReady(String),

    #[error("function '{0}' is not allowed in expressions")]
    DisallowedCall(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("division by zero")]
    DivisionByZero,
}

impl ExprError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Whether this error means "the value simply is not there".
    ///
    /// The `||` operator treats these as falsy so it can double as a
    /// fallback operator; everything else propagates.
    pub fn is_missing_value(&self) -> bool {
        matches!(
            self,
            Self::UnknownVariable(_) | Self::UnknownPath(_) | Self::NotReady(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExprError>;
