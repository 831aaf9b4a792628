//! Recursive-descent parser for the indicator script syntax.
//!
//! A script is exactly one root function (arrow or classic) taking the execution context.

pub mod lexer;

use std::rc::Rc;

use crate::ast::*;
use crate::error::CompileError;
use lexer::{tokenize, Token, TokenKind};

/// Words that can never name a binding.
const RESERVED: &[&str] = &[
    "const", "let", "var", "if", "else", "for", "while", "do", "return", "break", "continue",
    "function", "true", "false", "null", "undefined", "this", "new", "typeof", "delete", "in",
    "of", "class", "switch", "case", "default", "try", "catch", "finally", "throw", "void",
    "instanceof", "yield", "await", "async", "with",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}

pub fn parse(source: &str) -> Result<Program, CompileError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type PResult<T> = Result<T, CompileError>;

impl Parser {
    // ---------- token plumbing ----------

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_punct(&self, p: &str) -> bool {
        self.peek().is_punct(p)
    }

    fn at_word(&self, w: &str) -> bool {
        self.peek().is_word(w)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<Token> {
        if self.at_punct(p) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("`{p}`")))
        }
    }

    fn expect_word(&mut self, w: &str) -> PResult<Token> {
        if self.at_word(w) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("`{w}`")))
        }
    }

    fn unexpected(&self, wanted: &str) -> CompileError {
        let tok = self.peek();
        CompileError::parse(format!("expected {wanted}, found {}", tok.describe()), tok.span)
    }

    /// Statement terminator with automatic insertion at line breaks, `}` and end of input.
    fn semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(";") {
            return Ok(());
        }
        let tok = self.peek();
        if tok.newline_before || tok.is_punct("}") || tok.kind == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.unexpected("`;`"))
        }
    }

    fn binding_ident(&mut self) -> PResult<Ident> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Word(ref w) if !is_reserved(w) => {
                self.advance();
                Ok(Ident::new(w.clone(), tok.span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    // ---------- program ----------

    fn program(&mut self) -> PResult<Program> {
        let start = self.peek().span;
        let root = if self.at_word("function") {
            self.function_expr()?
        } else if self.arrow_ahead() {
            self.arrow_function()?
        } else {
            return Err(CompileError::parse(
                "script must be a single root function taking the context",
                start,
            ));
        };
        self.eat_punct(";");
        if self.peek().kind != TokenKind::Eof {
            return Err(self.unexpected("end of input after the root function"));
        }
        if root.params.len() != 1 {
            return Err(CompileError::parse(
                format!(
                    "root function must take exactly one context parameter, found {}",
                    root.params.len()
                ),
                root.span,
            ));
        }
        Ok(Program {
            root: Rc::new(root),
        })
    }

    // ---------- statements ----------

    fn statement(&mut self) -> PResult<Stmt> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Punct("{") => Ok(Stmt::Block(self.block()?)),
            TokenKind::Punct(";") => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Word(w) => match w.as_str() {
                "const" | "let" | "var" => {
                    let decl = self.var_decl()?;
                    self.semicolon()?;
                    Ok(Stmt::Decl(decl))
                }
                "if" => self.if_stmt(),
                "for" => self.for_stmt(),
                "while" => {
                    self.advance();
                    self.expect_punct("(")?;
                    let test = self.expression()?;
                    self.expect_punct(")")?;
                    let body = Box::new(self.statement()?);
                    Ok(Stmt::While { test, body })
                }
                "return" => {
                    self.advance();
                    let next = self.peek();
                    let arg = if next.is_punct(";")
                        || next.is_punct("}")
                        || next.newline_before
                        || next.kind == TokenKind::Eof
                    {
                        None
                    } else {
                        Some(self.expression()?)
                    };
                    self.semicolon()?;
                    Ok(Stmt::Return(arg))
                }
                "break" => {
                    self.advance();
                    self.semicolon()?;
                    Ok(Stmt::Break)
                }
                "continue" => {
                    self.advance();
                    self.semicolon()?;
                    Ok(Stmt::Continue)
                }
                "function" if matches!(self.peek_at(1).kind, TokenKind::Word(_)) => {
                    let f = self.function_expr()?;
                    Ok(Stmt::Function(Rc::new(f)))
                }
                w if is_reserved(w)
                    && !matches!(w, "true" | "false" | "null" | "undefined" | "this" | "function") =>
                {
                    Err(CompileError::parse(format!("unsupported keyword `{w}`"), tok.span))
                }
                _ => self.expression_statement(),
            },
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.expression()?;
        self.semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.at_punct("}") {
            if self.peek().kind == TokenKind::Eof {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.statement()?);
        }
        self.advance();
        Ok(stmts)
    }

    fn var_decl(&mut self) -> PResult<VarDecl> {
        let kind = match &self.advance().kind {
            TokenKind::Word(w) if w == "const" => DeclKind::Const,
            TokenKind::Word(w) if w == "let" => DeclKind::Let,
            _ => DeclKind::Var,
        };
        let mut declarators = Vec::new();
        loop {
            let span = self.peek().span;
            let target = self.pattern()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            if init.is_none() && !matches!(target, Pattern::Ident(_)) {
                return Err(CompileError::parse("destructuring declaration needs an initializer", span));
            }
            declarators.push(Declarator { target, init, span });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(VarDecl { kind, declarators })
    }

    fn pattern(&mut self) -> PResult<Pattern> {
        if self.eat_punct("{") {
            let mut props = Vec::new();
            while !self.at_punct("}") {
                let key_tok = self.advance();
                let key = match key_tok.kind {
                    TokenKind::Word(w) => w,
                    TokenKind::Str(s) => s,
                    _ => {
                        return Err(CompileError::parse(
                            format!("expected property name, found {}", key_tok.describe()),
                            key_tok.span,
                        ))
                    }
                };
                let value = if self.eat_punct(":") {
                    self.binding_ident()?
                } else if is_reserved(&key) {
                    return Err(CompileError::parse(
                        format!("`{key}` cannot be used as a binding"),
                        key_tok.span,
                    ));
                } else {
                    Ident::new(key.clone(), key_tok.span)
                };
                props.push((key, value));
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("}")?;
            Ok(Pattern::Object(props))
        } else if self.eat_punct("[") {
            let mut items = Vec::new();
            while !self.at_punct("]") {
                if self.eat_punct(",") {
                    items.push(None);
                    continue;
                }
                items.push(Some(self.binding_ident()?));
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("]")?;
            Ok(Pattern::Array(items))
        } else {
            Ok(Pattern::Ident(self.binding_ident()?))
        }
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        self.expect_word("if")?;
        self.expect_punct("(")?;
        let test = self.expression()?;
        self.expect_punct(")")?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.at_word("else") {
            self.advance();
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
        })
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        self.expect_word("for")?;
        self.expect_punct("(")?;
        let init = if self.at_punct(";") {
            None
        } else if self.at_word("const") || self.at_word("let") || self.at_word("var") {
            Some(ForInit::Decl(self.var_decl()?))
        } else {
            Some(ForInit::Expr(self.expression()?))
        };
        if self.at_word("of") || self.at_word("in") {
            return Err(CompileError::parse(
                "only classic `for (init; test; update)` loops are supported",
                self.peek().span,
            ));
        }
        self.expect_punct(";")?;
        let test = if self.at_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.at_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    // ---------- functions ----------

    fn params(&mut self) -> PResult<Vec<Ident>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            params.push(self.binding_ident()?);
            if self.at_punct("=") {
                return Err(CompileError::parse(
                    "default parameter values are not supported",
                    self.peek().span,
                ));
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn function_expr(&mut self) -> PResult<Function> {
        let span = self.expect_word("function")?.span;
        let name = if matches!(self.peek().kind, TokenKind::Word(_)) {
            Some(self.binding_ident()?)
        } else {
            None
        };
        let params = self.params()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Function {
            name,
            params,
            body,
            style: FunctionStyle::Classic,
            span,
        })
    }

    /// `x =>` or `( ... ) =>` starts at the current token.
    fn arrow_ahead(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Word(w) if !is_reserved(w) => self.peek_at(1).is_punct("=>"),
            TokenKind::Punct("(") => {
                let mut depth = 0usize;
                let mut i = 0usize;
                loop {
                    let tok = self.peek_at(i);
                    match &tok.kind {
                        TokenKind::Punct("(") => depth += 1,
                        TokenKind::Punct(")") => {
                            depth -= 1;
                            if depth == 0 {
                                let next = self.peek_at(i + 1);
                                return next.is_punct("=>") && !next.newline_before;
                            }
                        }
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                    i += 1;
                }
            }
            _ => false,
        }
    }

    fn arrow_function(&mut self) -> PResult<Function> {
        let span = self.peek().span;
        let params = if self.at_punct("(") {
            self.params()?
        } else {
            vec![self.binding_ident()?]
        };
        self.expect_punct("=>")?;
        let body = if self.at_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(Box::new(self.assignment()?))
        };
        Ok(Function {
            name: None,
            params,
            body,
            style: FunctionStyle::Arrow,
            span,
        })
    }

    // ---------- expressions ----------

    fn expression(&mut self) -> PResult<Expr> {
        let expr = self.assignment()?;
        if self.at_punct(",") {
            return Err(CompileError::parse(
                "comma expressions are not supported",
                self.peek().span,
            ));
        }
        Ok(expr)
    }

    fn assignment(&mut self) -> PResult<Expr> {
        if self.arrow_ahead() {
            return Ok(Expr::Function(Rc::new(self.arrow_function()?)));
        }
        let start = self.peek().span;
        let target = self.conditional()?;
        let op = match &self.peek().kind {
            TokenKind::Punct(p) => AssignOp::from_symbol(p),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(target);
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
            return Err(CompileError::parse("invalid assignment target", start));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let test = self.binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn infix_op(&self) -> Option<(u8, Result<LogicalOp, BinaryOp>)> {
        let TokenKind::Punct(p) = &self.peek().kind else {
            return None;
        };
        let op = match *p {
            "&&" => Ok(LogicalOp::And),
            "||" => Ok(LogicalOp::Or),
            "??" => Ok(LogicalOp::Nullish),
            other => Err(BinaryOp::from_symbol(other)?),
        };
        let prec = match op {
            Ok(l) => l.precedence(),
            Err(b) => b.precedence(),
        };
        Some((prec, op))
    }

    /// Precedence climbing over logical and binary operators; `**` is right-associative.
    fn binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut left = self.unary()?;
        while let Some((prec, op)) = self.infix_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            let next_min = if op == Err(BinaryOp::Pow) { prec } else { prec + 1 };
            let right = self.binary(next_min)?;
            left = match op {
                Ok(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Err(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match &self.peek().kind {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let arg = self.unary()?;
            return Ok(Expr::Unary {
                op,
                arg: Box::new(arg),
            });
        }
        let update = match &self.peek().kind {
            TokenKind::Punct("++") => Some(UpdateOp::Increment),
            TokenKind::Punct("--") => Some(UpdateOp::Decrement),
            _ => None,
        };
        if let Some(op) = update {
            let span = self.advance().span;
            let target = self.unary()?;
            if !matches!(target, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
                return Err(CompileError::parse("invalid update target", span));
            }
            return Ok(Expr::Update {
                op,
                prefix: true,
                target: Box::new(target),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let span = self.peek().span;
        let expr = self.call_member()?;
        let tok = self.peek();
        if tok.newline_before {
            return Ok(expr);
        }
        let op = match &tok.kind {
            TokenKind::Punct("++") => UpdateOp::Increment,
            TokenKind::Punct("--") => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        if !matches!(expr, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
            return Err(CompileError::parse("invalid update target", span));
        }
        self.advance();
        Ok(Expr::Update {
            op,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_member(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let tok = self.advance();
                let TokenKind::Word(property) = tok.kind else {
                    return Err(CompileError::parse(
                        format!("expected property name, found {}", tok.describe()),
                        tok.span,
                    ));
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.at_punct("[") {
                self.advance();
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.at_punct("(") {
                self.advance();
                let mut args = Vec::new();
                while !self.at_punct(")") {
                    args.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            TokenKind::Punct("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.at_punct("]") {
                    if self.at_punct(",") {
                        return Err(CompileError::parse(
                            "array literal holes are not supported",
                            self.peek().span,
                        ));
                    }
                    items.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            TokenKind::Punct("{") => self.object_literal(),
            TokenKind::Word(w) => match w.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Undefined)
                }
                "this" => {
                    self.advance();
                    Ok(Expr::This)
                }
                "function" => Ok(Expr::Function(Rc::new(self.function_expr()?))),
                w if is_reserved(w) => Err(CompileError::parse(
                    format!("unsupported keyword `{w}`"),
                    tok.span,
                )),
                _ => {
                    self.advance();
                    Ok(Expr::Ident(Ident::new(w, tok.span)))
                }
            },
            _ => Err(self.unexpected("expression")),
        }
    }

    fn object_literal(&mut self) -> PResult<Expr> {
        self.expect_punct("{")?;
        let mut props = Vec::new();
        while !self.at_punct("}") {
            let key_tok = self.advance();
            let key = match key_tok.kind {
                TokenKind::Word(w) => w,
                TokenKind::Str(s) => s,
                TokenKind::Number(n) => crate::codegen::format_number(n),
                _ => {
                    return Err(CompileError::parse(
                        format!("expected property name, found {}", key_tok.describe()),
                        key_tok.span,
                    ))
                }
            };
            let value = if self.eat_punct(":") {
                self.assignment()?
            } else if is_reserved(&key) {
                return Err(CompileError::parse(
                    format!("`{key}` cannot be used as a shorthand property"),
                    key_tok.span,
                ));
            } else {
                Expr::Ident(Ident::new(key.clone(), key_tok.span))
            };
            props.push((key, value));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Object(props))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(src: &str) -> Vec<Stmt> {
        let program = parse(src).unwrap();
        match &program.root.body {
            FunctionBody::Block(stmts) => stmts.clone(),
            FunctionBody::Expr(_) => panic!("expected block body"),
        }
    }

    fn expr_of(src: &str) -> Expr {
        match body(&format!("(ctx) => {{ {src}; }}")).remove(0) {
            Stmt::Expr(e) => e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn accepts_every_root_form() {
        for src in [
            "(context) => { }",
            "context => { }",
            "function (context) { }",
            "function indicator(context) { };",
        ] {
            let program = parse(src).unwrap();
            assert_eq!(program.root_param(), "context", "{src}");
        }
    }

    #[test]
    fn rejects_anything_but_one_root_function() {
        assert!(matches!(parse("const x = 1"), Err(CompileError::Parse { .. })));
        assert!(matches!(parse("(a, b) => {}"), Err(CompileError::Parse { .. })));
        assert!(matches!(parse("(c) => {} 1"), Err(CompileError::Parse { .. })));
    }

    #[test]
    fn binary_precedence_and_associativity() {
        let e = expr_of("a - b - c * d ** e ** f");
        let Expr::Binary { op: BinaryOp::Sub, left, right } = e else {
            panic!("top should be subtraction");
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Sub, .. }));
        let Expr::Binary { op: BinaryOp::Mul, right: pow, .. } = *right else {
            panic!("expected multiplication");
        };
        let Expr::Binary { op: BinaryOp::Pow, right: inner, .. } = *pow else {
            panic!("expected power");
        };
        assert!(matches!(*inner, Expr::Binary { op: BinaryOp::Pow, .. }));
    }

    #[test]
    fn logical_binds_looser_than_comparison() {
        let e = expr_of("a > b && c || d");
        let Expr::Logical { op: LogicalOp::Or, left, .. } = e else {
            panic!("expected ||");
        };
        assert!(matches!(*left, Expr::Logical { op: LogicalOp::And, .. }));
    }

    #[test]
    fn keywords_are_valid_member_names() {
        let e = expr_of("context.const.x = context.init(context.const.x, 1)");
        let Expr::Assign { target, .. } = e else {
            panic!("expected assignment");
        };
        let Expr::Member { object, property } = *target else {
            panic!("expected member target");
        };
        assert_eq!(property, "x");
        assert!(matches!(*object, Expr::Member { ref property, .. } if property == "const"));
    }

    #[test]
    fn automatic_semicolons_at_line_breaks() {
        let stmts = body("(c) => {\n let a = 1\n let b = a\n return { a, b }\n}");
        assert_eq!(stmts.len(), 3);
        assert!(matches!(&stmts[2], Stmt::Return(Some(Expr::Object(p))) if p.len() == 2));
    }

    #[test]
    fn missing_semicolon_on_one_line_is_an_error() {
        let err = parse("(c) => { let a = 1 let b = 2 }").unwrap_err();
        assert_eq!(err.span().line, 1);
    }

    #[test]
    fn destructuring_patterns() {
        let stmts = body("(c) => { const { close, open: o } = c.data; const [m, , h] = ta.macd(close) }");
        let Stmt::Decl(d) = &stmts[0] else { panic!() };
        assert_eq!(
            d.declarators[0].target,
            Pattern::Object(vec![
                ("close".into(), Ident::new("close", Span::new(1, 18))),
                ("open".into(), Ident::new("o", Span::new(1, 31))),
            ])
        );
        let Stmt::Decl(d) = &stmts[1] else { panic!() };
        let Pattern::Array(items) = &d.declarators[0].target else { panic!() };
        assert_eq!(items.len(), 3);
        assert!(items[1].is_none());
    }

    #[test]
    fn arrow_functions_in_expressions() {
        let stmts = body("(c) => { const f = (a, b) => a + b; const g = x => { return x } }");
        let Stmt::Decl(d) = &stmts[0] else { panic!() };
        let Some(Expr::Function(f)) = &d.declarators[0].init else { panic!() };
        assert_eq!(f.params.len(), 2);
        assert!(matches!(f.body, FunctionBody::Expr(_)));
    }

    #[test]
    fn for_and_update_expressions() {
        let stmts = body("(c) => { for (let i = 0; i < 10; i++) { s += i } }");
        let Stmt::For { init, test, update, .. } = &stmts[0] else { panic!() };
        assert!(matches!(init, Some(ForInit::Decl(_))));
        assert!(test.is_some());
        assert!(matches!(update, Some(Expr::Update { prefix: false, .. })));
    }

    #[test]
    fn parse_errors_carry_position() {
        let err = parse("(c) => {\n  let x = ;\n}").unwrap_err();
        assert_eq!(err.span(), Span::new(2, 11));
    }
}
