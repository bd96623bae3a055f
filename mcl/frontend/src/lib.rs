//! MCL front end: preprocessor, lexer, parser, and the AST consumed by the
//! code generator.
//!
//! MCL is a small C-like imperative language:
//!
//! ```text
//! function fact(n: int) -> int {
//!     if (n <= 1) { return 1; }
//!     return n * fact(n - 1);
//! }
//!
//! function main() {
//!     return fact(5);
//! }
//! ```
//!
//! The AST is a family of tagged enums matched exhaustively downstream;
//! there is no visitor machinery.

#![deny(missing_docs)]

mod ast;
mod error;
mod lexer;
mod parser;
mod preprocess;
mod token;

pub use crate::ast::{
    BinOp, Expr, FunctionDecl, GpuBuiltin, Item, MemBuiltin, Param, Program, Stmt, SwitchCase,
    Type, UnOp, VarDecl,
};
pub use crate::error::SyntaxError;
pub use crate::lexer::tokenize;
pub use crate::parser::parse;
pub use crate::preprocess::{preprocess, preprocess_with, PreprocessError};
pub use crate::token::{Token, TokenKind};

/// Convenience: tokenize and parse in one step.
pub fn parse_source(source: &str) -> Result<Program, SyntaxError> {
    parse(tokenize(source)?)
}
