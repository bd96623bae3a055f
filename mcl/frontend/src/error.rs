//! Front-end error type.

use thiserror::Error;

/// A lexical or syntactic error, with its source position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {message}")]
pub struct SyntaxError {
    /// 1-based source line.
    pub line: usize,
    /// 1-based source column.
    pub column: usize,
    /// What went wrong.
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}
