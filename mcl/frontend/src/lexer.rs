//! The MCL tokenizer.

use crate::error::SyntaxError;
use crate::token::{Token, TokenKind};

/// Tokenize MCL source text. The final token is always `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, SyntaxError> {
        Err(SyntaxError::new(self.line, self.column, message))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, text: impl Into<String>, line: usize, column: usize) {
        self.tokens.push(Token {
            kind,
            text: text.into(),
            line,
            column,
        });
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '0'..='9' => self.number()?,
                'a'..='z' | 'A'..='Z' | '_' => self.identifier(),
                '\'' => self.char_literal()?,
                '"' => self.string_literal()?,
                _ => {
                    self.operator_or_delimiter()?;
                }
            }
        }
        let (line, column) = (self.line, self.column);
        self.push(TokenKind::Eof, "", line, column);
        Ok(self.tokens)
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            text.push(self.advance().expect("digit"));
            text.push(self.advance().expect("x"));
            if !matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                return self.error("invalid hexadecimal number");
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
                text.push(self.advance().expect("hex digit"));
            }
        } else {
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                text.push(self.advance().expect("digit"));
            }
        }

        self.push(TokenKind::Integer, text, line, column);
        Ok(())
    }

    fn identifier(&mut self) {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            text.push(self.advance().expect("identifier char"));
        }
        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Identifier);
        self.push(kind, text, line, column);
    }

    fn char_literal(&mut self) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        self.advance(); // opening quote
        let Some(c) = self.advance() else {
            return self.error("unterminated character literal");
        };
        let c = if c == '\\' {
            match self.advance() {
                Some('n') => '\n',
                Some('t') => '\t',
                Some('\\') => '\\',
                Some('\'') => '\'',
                Some('0') => '\0',
                _ => return self.error("unknown escape in character literal"),
            }
        } else {
            c
        };
        if self.advance() != Some('\'') {
            return self.error("unterminated character literal");
        }
        self.push(TokenKind::Char, c.to_string(), line, column);
        Ok(())
    }

    fn string_literal(&mut self) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        self.advance(); // opening quote
        let mut text = String::new();
        loop {
            match self.advance() {
                None => return self.error("unterminated string literal"),
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    _ => return self.error("unknown escape in string literal"),
                },
                Some(c) => text.push(c),
            }
        }
        self.push(TokenKind::Str, text, line, column);
        Ok(())
    }

    fn operator_or_delimiter(&mut self) -> Result<(), SyntaxError> {
        let (line, column) = (self.line, self.column);
        let c = self.advance().expect("caller peeked a char");
        let two = |lexer: &mut Self, second: char| -> bool {
            if lexer.peek() == Some(second) {
                lexer.advance();
                true
            } else {
                false
            }
        };

        let (kind, text): (TokenKind, &str) = match c {
            '+' => (TokenKind::Plus, "+"),
            '-' => {
                if two(self, '>') {
                    (TokenKind::Arrow, "->")
                } else {
                    (TokenKind::Minus, "-")
                }
            }
            '*' => (TokenKind::Star, "*"),
            '/' => (TokenKind::Slash, "/"),
            '%' => (TokenKind::Percent, "%"),
            '=' => {
                if two(self, '=') {
                    (TokenKind::Eq, "==")
                } else {
                    (TokenKind::Assign, "=")
                }
            }
            '!' => {
                if two(self, '=') {
                    (TokenKind::Ne, "!=")
                } else {
                    (TokenKind::Bang, "!")
                }
            }
            '<' => {
                if two(self, '=') {
                    (TokenKind::Le, "<=")
                } else if two(self, '<') {
                    (TokenKind::Shl, "<<")
                } else {
                    (TokenKind::Lt, "<")
                }
            }
            '>' => {
                if two(self, '=') {
                    (TokenKind::Ge, ">=")
                } else if two(self, '>') {
                    (TokenKind::Shr, ">>")
                } else {
                    (TokenKind::Gt, ">")
                }
            }
            '&' => {
                if two(self, '&') {
                    (TokenKind::AndAnd, "&&")
                } else {
                    (TokenKind::Amp, "&")
                }
            }
            '|' => {
                if two(self, '|') {
                    (TokenKind::OrOr, "||")
                } else {
                    (TokenKind::Pipe, "|")
                }
            }
            '^' => (TokenKind::Caret, "^"),
            '~' => (TokenKind::Tilde, "~"),
            '@' => (TokenKind::At, "@"),
            ';' => (TokenKind::Semicolon, ";"),
            ',' => (TokenKind::Comma, ","),
            ':' => (TokenKind::Colon, ":"),
            '(' => (TokenKind::LParen, "("),
            ')' => (TokenKind::RParen, ")"),
            '{' => (TokenKind::LBrace, "{"),
            '}' => (TokenKind::RBrace, "}"),
            '[' => (TokenKind::LBracket, "["),
            ']' => (TokenKind::RBracket, "]"),
            other => {
                return Err(SyntaxError::new(
                    line,
                    column,
                    format!("unexpected character '{other}'"),
                ))
            }
        };
        self.push(kind, text, line, column);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(
            kinds("function main() { var x: int = 42; return x; }"),
            vec![
                Function, Identifier, LParen, RParen, LBrace, Var, Identifier, Colon, Identifier,
                Assign, Integer, Semicolon, Return, Identifier, Semicolon, RBrace, Eof,
            ]
        );
    }

    #[test]
    fn hex_and_decimal() {
        let tokens = tokenize("0x1F 255").unwrap();
        assert_eq!(tokens[0].text, "0x1F");
        assert_eq!(tokens[1].text, "255");
    }

    #[test]
    fn two_char_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds("== != <= >= << >> && || ->"),
            vec![Eq, Ne, Le, Ge, Shl, Shr, AndAnd, OrOr, Arrow, Eof]
        );
    }

    #[test]
    fn comments_are_skipped() {
        use TokenKind::*;
        assert_eq!(kinds("x // rest of line\ny"), vec![Identifier, Identifier, Eof]);
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#""MVR %0, 6\nHALT""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text, "MVR %0, 6\nHALT");
    }

    #[test]
    fn positions_are_tracked() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn bad_character_is_an_error() {
        let err = tokenize("var x = $bad;").unwrap_err();
        assert!(err.message.contains("unexpected character"));
    }
}
