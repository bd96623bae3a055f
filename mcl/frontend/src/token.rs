//! Token definitions.

use core::fmt::{self, Display, Formatter};

/// The kind of a lexed token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Integer literal, decimal or `0x…`.
    Integer,
    /// Character literal, `'A'`.
    Char,
    /// String literal, `"…"`; only meaningful as an `asm` template.
    Str,
    /// Identifier.
    Identifier,

    // Keywords.
    /// `var`
    Var,
    /// `if`
    If,
    /// `else`
    Else,
    /// `while`
    While,
    /// `for`
    For,
    /// `switch`
    Switch,
    /// `case`
    Case,
    /// `default`
    Default,
    /// `function`
    Function,
    /// `return`
    Return,
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `and` (bitwise AND keyword form)
    KwAnd,
    /// `or` (bitwise OR keyword form)
    KwOr,
    /// `xor` (bitwise XOR keyword form)
    KwXor,
    /// `not` (bitwise NOT keyword form)
    KwNot,
    /// `asm`
    Asm,

    // Built-in functions.
    /// `drawLine`
    DrawLine,
    /// `fillGrid`
    FillGrid,
    /// `clearGrid`
    ClearGrid,
    /// `loadSprite`
    LoadSprite,
    /// `drawSprite`
    DrawSprite,
    /// `loadText`
    LoadText,
    /// `drawText`
    DrawText,
    /// `scrollBuffer`
    ScrollBuffer,
    /// `setGPUBuffer`
    SetGpuBuffer,
    /// `getGPUBuffer`
    GetGpuBuffer,
    /// `malloc`
    Malloc,
    /// `free`
    Free,

    // Operators.
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*` (multiplication or dereference)
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `=`
    Assign,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// `!`
    Bang,
    /// `&`
    Amp,
    /// `|`
    Pipe,
    /// `^`
    Caret,
    /// `~`
    Tilde,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `@` (address-of)
    At,
    /// `->`
    Arrow,

    // Delimiters.
    /// `;`
    Semicolon,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,

    /// End of input.
    Eof,
}

impl TokenKind {
    /// Keyword lookup for an identifier-shaped lexeme.
    pub fn keyword(text: &str) -> Option<Self> {
        let kind = match text {
            "var" => Self::Var,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "for" => Self::For,
            "switch" => Self::Switch,
            "case" => Self::Case,
            "default" => Self::Default,
            "function" => Self::Function,
            "return" => Self::Return,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "and" => Self::KwAnd,
            "or" => Self::KwOr,
            "xor" => Self::KwXor,
            "not" => Self::KwNot,
            "asm" => Self::Asm,
            "drawLine" => Self::DrawLine,
            "fillGrid" => Self::FillGrid,
            "clearGrid" => Self::ClearGrid,
            "loadSprite" => Self::LoadSprite,
            "drawSprite" => Self::DrawSprite,
            "loadText" => Self::LoadText,
            "drawText" => Self::DrawText,
            "scrollBuffer" => Self::ScrollBuffer,
            "setGPUBuffer" => Self::SetGpuBuffer,
            "getGPUBuffer" => Self::GetGpuBuffer,
            "malloc" => Self::Malloc,
            "free" => Self::Free,
            _ => return None,
        };
        Some(kind)
    }
}

/// A lexed token with its source position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    /// What kind of token this is.
    pub kind: TokenKind,
    /// The lexeme text. For `Char` and `Str` the quotes are stripped and
    /// escapes resolved.
    pub text: String,
    /// 1-based source line.
    pub line: usize,
    /// 1-based source column.
    pub column: usize,
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}('{}') at {}:{}", self.kind, self.text, self.line, self.column)
    }
}
