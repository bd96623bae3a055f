//! Recursive-descent parser for MCL.

use crate::ast::*;
use crate::error::SyntaxError;
use crate::token::{Token, TokenKind};

/// Parse a token stream into a program.
pub fn parse(tokens: Vec<Token>) -> Result<Program, SyntaxError> {
    Parser { tokens, pos: 0 }.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos - 1]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        self.previous()
    }

    fn matches(&mut self, kinds: &[TokenKind]) -> bool {
        if kinds.iter().any(|&k| self.check(k)) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, SyntaxError> {
        if self.check(kind) {
            Ok(self.advance().clone())
        } else {
            Err(self.error_here(message))
        }
    }

    fn error_here(&self, message: &str) -> SyntaxError {
        let token = self.peek();
        SyntaxError::new(
            token.line,
            token.column,
            format!("{message} (found {token})"),
        )
    }

    // ----- declarations -------------------------------------------------

    fn program(&mut self) -> Result<Program, SyntaxError> {
        let mut items = Vec::new();
        while !self.check(TokenKind::Eof) {
            if self.check(TokenKind::Function) {
                items.push(Item::Function(self.function_declaration()?));
            } else if self.matches(&[TokenKind::Var]) {
                items.push(Item::Global(self.var_declaration()?));
            } else if self.is_c_style_declaration() {
                items.push(Item::Global(self.c_style_declaration()?));
            } else {
                return Err(self.error_here("expected a function or variable declaration"));
            }
        }
        Ok(Program { items })
    }

    fn function_declaration(&mut self) -> Result<FunctionDecl, SyntaxError> {
        self.consume(TokenKind::Function, "expected 'function'")?;
        let name = self
            .consume(TokenKind::Identifier, "expected function name")?
            .text;

        self.consume(TokenKind::LParen, "expected '(' after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                params.push(self.parameter()?);
                if !self.matches(&[TokenKind::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after parameters")?;

        let ret = if self.matches(&[TokenKind::Arrow]) {
            self.type_annotation()?
        } else {
            Type::Int
        };

        self.consume(TokenKind::LBrace, "expected '{' before function body")?;
        let body = self.block_body()?;
        Ok(FunctionDecl {
            name,
            params,
            ret,
            body,
        })
    }

    fn parameter(&mut self) -> Result<Param, SyntaxError> {
        let name = self
            .consume(TokenKind::Identifier, "expected parameter name")?
            .text;
        let ty = if self.matches(&[TokenKind::Colon]) {
            self.type_annotation()?
        } else {
            Type::Int
        };
        Ok(Param { name, ty })
    }

    fn type_annotation(&mut self) -> Result<Type, SyntaxError> {
        let token = self.consume(TokenKind::Identifier, "expected a type name")?;
        let mut ty = match token.text.as_str() {
            "int" => Type::Int,
            "void" => Type::Void,
            other => {
                return Err(SyntaxError::new(
                    token.line,
                    token.column,
                    format!("unknown type '{other}'"),
                ))
            }
        };
        loop {
            if self.matches(&[TokenKind::Star]) {
                ty = Type::Pointer(Box::new(ty));
            } else if self.matches(&[TokenKind::LBracket]) {
                let size = if self.check(TokenKind::Integer) {
                    Some(self.integer_literal()? as usize)
                } else {
                    None
                };
                self.consume(TokenKind::RBracket, "expected ']' in array type")?;
                ty = Type::Array(Box::new(ty), size);
            } else {
                break;
            }
        }
        Ok(ty)
    }

    /// `var name[: type] [= init];`
    fn var_declaration(&mut self) -> Result<VarDecl, SyntaxError> {
        let name = self
            .consume(TokenKind::Identifier, "expected variable name")?
            .text;
        let ty = if self.matches(&[TokenKind::Colon]) {
            self.type_annotation()?
        } else {
            Type::Int
        };
        let init = if self.matches(&[TokenKind::Assign]) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "expected ';' after variable declaration")?;
        Ok(VarDecl { name, ty, init })
    }

    /// Lookahead for `int x …` / `int* x …` declarations.
    fn is_c_style_declaration(&self) -> bool {
        if self.peek().kind != TokenKind::Identifier {
            return false;
        }
        if !matches!(self.peek().text.as_str(), "int" | "void") {
            return false;
        }
        match self.peek_at(1).kind {
            TokenKind::Identifier => true,
            TokenKind::Star => self.peek_at(2).kind == TokenKind::Identifier,
            _ => false,
        }
    }

    /// `type [*] name [= init];`
    fn c_style_declaration(&mut self) -> Result<VarDecl, SyntaxError> {
        let ty = self.type_annotation()?;
        let name = self
            .consume(TokenKind::Identifier, "expected variable name")?
            .text;
        let init = if self.matches(&[TokenKind::Assign]) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "expected ';' after variable declaration")?;
        Ok(VarDecl { name, ty, init })
    }

    // ----- statements ---------------------------------------------------

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        if self.matches(&[TokenKind::Var]) {
            return Ok(Stmt::Var(self.var_declaration()?));
        }
        if self.is_c_style_declaration() {
            return Ok(Stmt::Var(self.c_style_declaration()?));
        }
        if self.matches(&[TokenKind::If]) {
            return self.if_statement();
        }
        if self.matches(&[TokenKind::While]) {
            return self.while_statement();
        }
        if self.matches(&[TokenKind::For]) {
            return self.for_statement();
        }
        if self.matches(&[TokenKind::Switch]) {
            return self.switch_statement();
        }
        if self.matches(&[TokenKind::Return]) {
            let value = if self.check(TokenKind::Semicolon) {
                None
            } else {
                Some(self.expression()?)
            };
            self.consume(TokenKind::Semicolon, "expected ';' after return")?;
            return Ok(Stmt::Return(value));
        }
        if self.matches(&[TokenKind::Break]) {
            self.consume(TokenKind::Semicolon, "expected ';' after break")?;
            return Ok(Stmt::Break);
        }
        if self.matches(&[TokenKind::Continue]) {
            self.consume(TokenKind::Semicolon, "expected ';' after continue")?;
            return Ok(Stmt::Continue);
        }
        if self.matches(&[TokenKind::LBrace]) {
            return Ok(Stmt::Block(self.block_body()?));
        }

        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "expected ';' after expression")?;
        Ok(Stmt::Expr(expr))
    }

    /// Statements up to and including the closing `}`.
    fn block_body(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            statements.push(self.statement()?);
        }
        self.consume(TokenKind::RBrace, "expected '}'")?;
        Ok(statements)
    }

    fn if_statement(&mut self) -> Result<Stmt, SyntaxError> {
        self.consume(TokenKind::LParen, "expected '(' after 'if'")?;
        let cond = self.expression()?;
        self.consume(TokenKind::RParen, "expected ')' after condition")?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.matches(&[TokenKind::Else]) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, SyntaxError> {
        self.consume(TokenKind::LParen, "expected '(' after 'while'")?;
        let cond = self.expression()?;
        self.consume(TokenKind::RParen, "expected ')' after condition")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { cond, body })
    }

    fn for_statement(&mut self) -> Result<Stmt, SyntaxError> {
        self.consume(TokenKind::LParen, "expected '(' after 'for'")?;

        let init = if self.matches(&[TokenKind::Semicolon]) {
            None
        } else if self.matches(&[TokenKind::Var]) {
            Some(Box::new(Stmt::Var(self.var_declaration()?)))
        } else if self.is_c_style_declaration() {
            Some(Box::new(Stmt::Var(self.c_style_declaration()?)))
        } else {
            let expr = self.expression()?;
            self.consume(TokenKind::Semicolon, "expected ';' after for initializer")?;
            Some(Box::new(Stmt::Expr(expr)))
        };

        let cond = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::Semicolon, "expected ';' after for condition")?;

        let step = if self.check(TokenKind::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::RParen, "expected ')' after for clauses")?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn switch_statement(&mut self) -> Result<Stmt, SyntaxError> {
        self.consume(TokenKind::LParen, "expected '(' after 'switch'")?;
        let scrutinee = self.expression()?;
        self.consume(TokenKind::RParen, "expected ')' after switch expression")?;
        self.consume(TokenKind::LBrace, "expected '{' after switch")?;

        let mut cases = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let value = if self.matches(&[TokenKind::Case]) {
                let value = self.expression()?;
                self.consume(TokenKind::Colon, "expected ':' after case value")?;
                Some(value)
            } else if self.matches(&[TokenKind::Default]) {
                self.consume(TokenKind::Colon, "expected ':' after 'default'")?;
                None
            } else {
                return Err(self.error_here("expected 'case' or 'default'"));
            };

            let mut body = Vec::new();
            while !self.check(TokenKind::Case)
                && !self.check(TokenKind::Default)
                && !self.check(TokenKind::RBrace)
                && !self.check(TokenKind::Eof)
            {
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { value, body });
        }
        self.consume(TokenKind::RBrace, "expected '}' after switch cases")?;
        Ok(Stmt::Switch { scrutinee, cases })
    }

    // ----- expressions --------------------------------------------------

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.logical_or()?;
        if self.matches(&[TokenKind::Assign]) {
            let value = self.assignment()?;
            return Ok(Expr::Assign {
                target: Box::new(expr),
                value: Box::new(value),
            });
        }
        Ok(expr)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, SyntaxError>,
        table: &[(TokenKind, BinOp)],
    ) -> Result<Expr, SyntaxError> {
        let mut expr = next(self)?;
        'outer: loop {
            for &(kind, op) in table {
                if self.check(kind) {
                    self.advance();
                    let rhs = next(self)?;
                    expr = Expr::Binary {
                        op,
                        lhs: Box::new(expr),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            return Ok(expr);
        }
    }

    fn logical_or(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(Self::logical_and, &[(TokenKind::OrOr, BinOp::LogicalOr)])
    }

    fn logical_and(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(Self::bitwise_or, &[(TokenKind::AndAnd, BinOp::LogicalAnd)])
    }

    fn bitwise_or(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::bitwise_xor,
            &[(TokenKind::Pipe, BinOp::BitOr), (TokenKind::KwOr, BinOp::BitOr)],
        )
    }

    fn bitwise_xor(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::bitwise_and,
            &[
                (TokenKind::Caret, BinOp::BitXor),
                (TokenKind::KwXor, BinOp::BitXor),
            ],
        )
    }

    fn bitwise_and(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::equality,
            &[(TokenKind::Amp, BinOp::BitAnd), (TokenKind::KwAnd, BinOp::BitAnd)],
        )
    }

    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::comparison,
            &[(TokenKind::Eq, BinOp::Eq), (TokenKind::Ne, BinOp::Ne)],
        )
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::shift,
            &[
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::Gt, BinOp::Gt),
                (TokenKind::Le, BinOp::Le),
                (TokenKind::Ge, BinOp::Ge),
            ],
        )
    }

    fn shift(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::term,
            &[(TokenKind::Shl, BinOp::Shl), (TokenKind::Shr, BinOp::Shr)],
        )
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::factor,
            &[(TokenKind::Plus, BinOp::Add), (TokenKind::Minus, BinOp::Sub)],
        )
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            Self::unary,
            &[
                (TokenKind::Star, BinOp::Mul),
                (TokenKind::Slash, BinOp::Div),
                (TokenKind::Percent, BinOp::Mod),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = if self.matches(&[TokenKind::Minus]) {
            Some(UnOp::Neg)
        } else if self.matches(&[TokenKind::Bang]) {
            Some(UnOp::LogicalNot)
        } else if self.matches(&[TokenKind::Tilde]) || self.matches(&[TokenKind::KwNot]) {
            Some(UnOp::BitNot)
        } else if self.matches(&[TokenKind::At]) {
            Some(UnOp::AddressOf)
        } else if self.matches(&[TokenKind::Star]) {
            Some(UnOp::Deref)
        } else {
            None
        };
        if let Some(op) = op {
            let operand = Box::new(self.unary()?);
            return Ok(Expr::Unary { op, operand });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;
        loop {
            if self.matches(&[TokenKind::LParen]) {
                let args = self.argument_list()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.matches(&[TokenKind::LBracket]) {
                let index = self.expression()?;
                self.consume(TokenKind::RBracket, "expected ']' after array index")?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    /// Arguments up to and including the closing `)`.
    fn argument_list(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.matches(&[TokenKind::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after arguments")?;
        Ok(args)
    }

    fn integer_literal(&mut self) -> Result<i64, SyntaxError> {
        let token = self.consume(TokenKind::Integer, "expected an integer")?;
        let parsed = if let Some(hex) = token
            .text
            .strip_prefix("0x")
            .or_else(|| token.text.strip_prefix("0X"))
        {
            i64::from_str_radix(hex, 16)
        } else {
            token.text.parse()
        };
        parsed.map_err(|_| {
            SyntaxError::new(
                token.line,
                token.column,
                format!("integer '{}' out of range", token.text),
            )
        })
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(TokenKind::Integer) {
            return Ok(Expr::Int(self.integer_literal()?));
        }
        if self.matches(&[TokenKind::Char]) {
            let c = self.previous().text.chars().next().unwrap_or('\0');
            return Ok(Expr::Char(c));
        }

        if self.matches(&[TokenKind::Malloc, TokenKind::Free]) {
            let builtin = match self.previous().kind {
                TokenKind::Malloc => MemBuiltin::Malloc,
                _ => MemBuiltin::Free,
            };
            self.consume(TokenKind::LParen, "expected '(' after built-in")?;
            let args = self.argument_list()?;
            return Ok(Expr::MemCall { builtin, args });
        }

        if let Some(builtin) = self.gpu_builtin() {
            self.advance();
            self.consume(TokenKind::LParen, "expected '(' after built-in")?;
            let args = self.argument_list()?;
            return Ok(Expr::GpuCall { builtin, args });
        }

        if self.matches(&[TokenKind::Asm]) {
            self.consume(TokenKind::LParen, "expected '(' after 'asm'")?;
            let template = self
                .consume(TokenKind::Str, "expected assembly template string")?
                .text;
            let mut args = Vec::new();
            while self.matches(&[TokenKind::Comma]) {
                args.push(self.expression()?);
            }
            self.consume(TokenKind::RParen, "expected ')' after asm arguments")?;
            return Ok(Expr::AsmBlock { template, args });
        }

        if self.matches(&[TokenKind::Identifier]) {
            return Ok(Expr::Ident(self.previous().text.clone()));
        }

        if self.matches(&[TokenKind::LParen]) {
            let expr = self.expression()?;
            self.consume(TokenKind::RParen, "expected ')' after expression")?;
            return Ok(expr);
        }

        if self.matches(&[TokenKind::LBrace]) {
            let mut elements = Vec::new();
            if !self.check(TokenKind::RBrace) {
                loop {
                    elements.push(self.expression()?);
                    if !self.matches(&[TokenKind::Comma]) {
                        break;
                    }
                }
            }
            self.consume(TokenKind::RBrace, "expected '}' after array literal")?;
            return Ok(Expr::ArrayLit(elements));
        }

        Err(self.error_here("expected expression"))
    }

    fn gpu_builtin(&self) -> Option<GpuBuiltin> {
        let builtin = match self.peek().kind {
            TokenKind::DrawLine => GpuBuiltin::DrawLine,
            TokenKind::FillGrid => GpuBuiltin::FillGrid,
            TokenKind::ClearGrid => GpuBuiltin::ClearGrid,
            TokenKind::LoadSprite => GpuBuiltin::LoadSprite,
            TokenKind::DrawSprite => GpuBuiltin::DrawSprite,
            TokenKind::LoadText => GpuBuiltin::LoadText,
            TokenKind::DrawText => GpuBuiltin::DrawText,
            TokenKind::ScrollBuffer => GpuBuiltin::ScrollBuffer,
            TokenKind::SetGpuBuffer => GpuBuiltin::SetGpuBuffer,
            TokenKind::GetGpuBuffer => GpuBuiltin::GetGpuBuffer,
            _ => return None,
        };
        Some(builtin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_str(source: &str) -> Program {
        parse(tokenize(source).unwrap()).unwrap()
    }

    #[test]
    fn simple_function() {
        let program = parse_str("function main() { var x: int = 42; return x; }");
        assert_eq!(program.items.len(), 1);
        let Item::Function(f) = &program.items[0] else {
            panic!("expected a function");
        };
        assert_eq!(f.name, "main");
        assert_eq!(f.ret, Type::Int);
        assert_eq!(f.body.len(), 2);
        assert_eq!(
            f.body[0],
            Stmt::Var(VarDecl {
                name: "x".to_string(),
                ty: Type::Int,
                init: Some(Expr::Int(42)),
            })
        );
    }

    #[test]
    fn parameters_and_return_type() {
        let program = parse_str("function add(a: int, b: int) -> int { return a + b; }");
        let Item::Function(f) = &program.items[0] else {
            panic!("expected a function");
        };
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1].name, "b");
    }

    #[test]
    fn precedence() {
        let program = parse_str("function main() { return 1 + 2 * 3; }");
        let Item::Function(f) = &program.items[0] else {
            panic!();
        };
        let Stmt::Return(Some(Expr::Binary { op, rhs, .. })) = &f.body[0] else {
            panic!("expected return of a binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn keyword_bitwise_operators() {
        let program = parse_str("function main() { return 6 and 3 or 8 xor 1; }");
        let Item::Function(f) = &program.items[0] else {
            panic!();
        };
        // `or` binds loosest of the three.
        let Stmt::Return(Some(Expr::Binary { op, .. })) = &f.body[0] else {
            panic!();
        };
        assert_eq!(*op, BinOp::BitOr);
    }

    #[test]
    fn control_flow_statements() {
        let program = parse_str(
            "function main() {
                 for (var i = 0; i < 10; i = i + 1) {
                     if (i == 5) { break; } else { continue; }
                 }
                 while (1) { break; }
                 switch (2) { case 1: return 1; default: return 2; }
             }",
        );
        let Item::Function(f) = &program.items[0] else {
            panic!();
        };
        assert_eq!(f.body.len(), 3);
        assert!(matches!(f.body[0], Stmt::For { .. }));
        assert!(matches!(f.body[1], Stmt::While { .. }));
        let Stmt::Switch { cases, .. } = &f.body[2] else {
            panic!();
        };
        assert_eq!(cases.len(), 2);
        assert!(cases[1].value.is_none());
    }

    #[test]
    fn pointers_and_address_of() {
        let program = parse_str(
            "function main() { var p: int* = @x; *p = 3; return p[1]; }",
        );
        let Item::Function(f) = &program.items[0] else {
            panic!();
        };
        let Stmt::Var(decl) = &f.body[0] else {
            panic!();
        };
        assert_eq!(decl.ty, Type::Pointer(Box::new(Type::Int)));
        assert!(matches!(
            decl.init,
            Some(Expr::Unary {
                op: UnOp::AddressOf,
                ..
            })
        ));
        assert!(matches!(f.body[1], Stmt::Expr(Expr::Assign { .. })));
    }

    #[test]
    fn array_declaration_with_literal() {
        let program = parse_str("function main() { var a: int[3] = {1, 2, 3}; return a[0]; }");
        let Item::Function(f) = &program.items[0] else {
            panic!();
        };
        let Stmt::Var(decl) = &f.body[0] else {
            panic!();
        };
        assert_eq!(decl.ty, Type::Array(Box::new(Type::Int), Some(3)));
        assert!(matches!(&decl.init, Some(Expr::ArrayLit(v)) if v.len() == 3));
    }

    #[test]
    fn builtins() {
        let program = parse_str(
            "function main() {
                 fillGrid(0, 0, 32, 1);
                 setGPUBuffer(0, 1);
                 var p: int* = malloc(8);
                 free(p);
             }",
        );
        let Item::Function(f) = &program.items[0] else {
            panic!();
        };
        assert!(matches!(
            f.body[0],
            Stmt::Expr(Expr::GpuCall {
                builtin: GpuBuiltin::FillGrid,
                ..
            })
        ));
    }

    #[test]
    fn inline_asm() {
        let program = parse_str(r#"function main() { return asm("ADD %0, %1", 1, 2); }"#);
        let Item::Function(f) = &program.items[0] else {
            panic!();
        };
        let Stmt::Return(Some(Expr::AsmBlock { template, args })) = &f.body[0] else {
            panic!();
        };
        assert_eq!(template, "ADD %0, %1");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn c_style_declarations() {
        let program = parse_str("int g = 7; function main() { int x = g; return x; }");
        assert!(matches!(&program.items[0], Item::Global(d) if d.name == "g"));
    }

    #[test]
    fn missing_semicolon_is_an_error() {
        let tokens = tokenize("function main() { var x = 1 }").unwrap();
        assert!(parse(tokens).is_err());
    }
}
