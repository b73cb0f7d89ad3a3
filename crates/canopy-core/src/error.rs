use thiserror::Error;

/// Malformed context path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty segment in path '{0}'")]
    EmptySegment(String),
    #[error("unclosed or stray bracket in path '{0}'")]
    UnclosedBracket(String),
    #[error("invalid index '{found}' in path '{path}'")]
    InvalidIndex { path: String, found: String },
    #[error("index {index} is past the end of an array of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Structural tree operation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("anchor '{0}' not found in tree")]
    AnchorNotFound(String),
}

/// Malformed or failing binding expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("unexpected end of expression '{0}'")]
    UnexpectedEnd(String),
    #[error("unexpected '{found}' in expression '{expr}'")]
    UnexpectedChar { expr: String, found: char },
    #[error("unterminated string in expression '{0}'")]
    UnterminatedString(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("path '{0}' must start with a context id")]
    MissingContextId(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    #[error("operation '{name}' failed: {message}")]
    Operation { name: String, message: String },
}
