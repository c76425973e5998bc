//! Recursive-descent parser over the token stream.

use std::collections::HashSet;

use prism_lexer::{Spanned, Token};

use crate::ast::*;
use crate::ParseError;

pub(crate) struct Parser<'src> {
    source: &'src str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

type PResult<T> = Result<T, ParseError>;

/// Deepest nesting of blocks and sub-expressions a script may use.
pub(crate) const MAX_NESTING: usize = 256;

impl<'src> Parser<'src> {
    pub(crate) fn new(source: &'src str, tokens: Vec<Spanned>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// An error pointing at the current token.
    fn error(&self, message: impl Into<String>) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(spanned) => ParseError::new(
                spanned.line,
                &self.source[spanned.span.clone()],
                message,
            ),
            None => {
                let line = self.tokens.last().map(|t| t.line).unwrap_or(1);
                ParseError::new(line, "<eof>", message)
            }
        }
    }

    /// An error pointing at the previously consumed token.
    fn error_before(&self, message: impl Into<String>) -> ParseError {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(spanned) => ParseError::new(
                spanned.line,
                &self.source[spanned.span.clone()],
                message,
            ),
            None => self.error(message),
        }
    }

    fn expect(&mut self, expected: Token) -> PResult<()> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", expected)))
        }
    }

    /// Run `parse` one nesting level deeper, growing the stack as needed.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("nesting exceeds {} levels", MAX_NESTING)));
        }
        self.depth += 1;
        let result = stacker::maybe_grow(64 * 1024, 1024 * 1024, || parse(self));
        self.depth -= 1;
        result
    }

    fn expect_ident(&mut self, what: &str) -> PResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    // ---- Top level ----

    pub(crate) fn parse_script(&mut self) -> PResult<Script> {
        let mut script = Script::default();

        while self.peek().is_some() {
            let name = self.expect_ident("a node or function name")?;
            match self.peek() {
                Some(Token::LBrace) => {
                    let body = self.parse_block()?;
                    if script.nodes.contains_key(&name) {
                        return Err(self.error_before(format!("node '{}' is already defined", name)));
                    }
                    script.nodes.insert(name, body);
                }
                Some(Token::LParen) => {
                    let params = self.parse_params()?;
                    let key = FunctionKey { name, params };
                    let body = self.parse_block()?;
                    if script.functions.contains_key(&key) {
                        return Err(self.error_before(format!("function '{}' is already defined", key)));
                    }
                    script.functions.insert(key, body);
                }
                _ => return Err(self.error("expected '{' or '(' after a definition name")),
            }
        }

        Ok(script)
    }

    fn parse_params(&mut self) -> PResult<std::collections::BTreeSet<String>> {
        self.expect(Token::LParen)?;
        let mut params = std::collections::BTreeSet::new();
        if !self.eat(&Token::RParen) {
            loop {
                let param = self.expect_ident("a parameter name")?;
                if !params.insert(param.clone()) {
                    return Err(self.error_before(format!("duplicate parameter '{}'", param)));
                }
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma)?;
            }
        }
        Ok(params)
    }

    fn parse_block(&mut self) -> PResult<Block> {
        self.nested(Self::parse_block_body)
    }

    fn parse_block_body(&mut self) -> PResult<Block> {
        self.expect(Token::LBrace)?;
        let mut statements = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.error("unterminated block"));
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    // ---- Statements ----

    fn parse_statement(&mut self) -> PResult<Statement> {
        match self.peek() {
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => {
                self.advance();
                self.expect(Token::LParen)?;
                let condition = self.parse_expr()?;
                self.expect(Token::RParen)?;
                let body = self.parse_block()?;
                Ok(Statement::While { condition, body })
            }
            Some(Token::For) => self.parse_for(),
            Some(Token::Goto) => {
                self.advance();
                let node = self.expect_ident("a node name after 'goto'")?;
                self.expect(Token::Semicolon)?;
                Ok(Statement::Goto(node))
            }
            Some(Token::Return) => {
                self.advance();
                let value = self.parse_optional_expr()?;
                Ok(Statement::Return(value))
            }
            Some(Token::Exit) => {
                self.advance();
                let value = self.parse_optional_expr()?;
                Ok(Statement::Exit(value))
            }
            Some(Token::Break) => {
                self.advance();
                self.expect(Token::Semicolon)?;
                Ok(Statement::Break)
            }
            Some(Token::Continue) => {
                self.advance();
                self.expect(Token::Semicolon)?;
                Ok(Statement::Continue)
            }
            _ => self.parse_simple_statement(),
        }
    }

    fn parse_optional_expr(&mut self) -> PResult<Option<Expr>> {
        if self.eat(&Token::Semicolon) {
            return Ok(None);
        }
        let value = self.parse_expr()?;
        self.expect(Token::Semicolon)?;
        Ok(Some(value))
    }

    fn parse_if(&mut self) -> PResult<Statement> {
        self.expect(Token::If)?;
        let mut branches = Vec::new();
        self.expect(Token::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(Token::RParen)?;
        branches.push((condition, self.parse_block()?));

        while self.eat(&Token::Elif) {
            self.expect(Token::LParen)?;
            let condition = self.parse_expr()?;
            self.expect(Token::RParen)?;
            branches.push((condition, self.parse_block()?));
        }

        let otherwise = if self.eat(&Token::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Statement::If { branches, otherwise })
    }

    fn parse_for(&mut self) -> PResult<Statement> {
        self.expect(Token::For)?;
        self.expect(Token::LParen)?;
        let binding = if self.check(&Token::LBracket) {
            let pattern = self.parse_expr_primary()?;
            Binding::Pattern(self.pattern_from(pattern)?)
        } else {
            Binding::Single(self.parse_target()?)
        };
        self.expect(Token::In)?;
        let iterable = self.parse_expr()?;
        self.expect(Token::RParen)?;
        let body = self.parse_block()?;
        Ok(Statement::For {
            binding,
            iterable,
            body,
        })
    }

    fn parse_target(&mut self) -> PResult<Target> {
        let qualifier = self.parse_qualifier();
        let name = self.expect_ident("a variable name")?;
        Ok(Target { qualifier, name })
    }

    fn parse_qualifier(&mut self) -> Qualifier {
        if self.eat(&Token::Local) {
            Qualifier::Local
        } else if self.eat(&Token::Global) {
            Qualifier::Global
        } else {
            Qualifier::Auto
        }
    }

    /// Assignments, destructuring and bare expressions all start with an
    /// expression; the token after it decides which one this is.
    fn parse_simple_statement(&mut self) -> PResult<Statement> {
        let expr = self.parse_expr()?;

        let aug_op = match self.peek() {
            Some(Token::PlusAssign) => Some(BinOp::Add),
            Some(Token::MinusAssign) => Some(BinOp::Sub),
            Some(Token::StarAssign) => Some(BinOp::Mul),
            Some(Token::SlashAssign) => Some(BinOp::Div),
            Some(Token::BackslashAssign) => Some(BinOp::IntDiv),
            Some(Token::PercentAssign) => Some(BinOp::Mod),
            Some(Token::CaretAssign) => Some(BinOp::Pow),
            _ => None,
        };

        let statement = if self.check(&Token::Assign) {
            self.advance();
            match expr {
                Expr::Ident(target) => {
                    let value = self.parse_expr()?;
                    Statement::Assign { target, value }
                }
                Expr::Sequence(_) => {
                    let targets = self.pattern_from(expr)?;
                    let value = self.parse_expr()?;
                    Statement::Destructure { targets, value }
                }
                _ => return Err(self.error_before("invalid assignment target")),
            }
        } else if let Some(op) = aug_op {
            self.advance();
            match expr {
                Expr::Ident(target) => {
                    let value = self.parse_expr()?;
                    Statement::AugAssign { target, op, value }
                }
                _ => return Err(self.error_before("invalid assignment target")),
            }
        } else {
            Statement::Expr(expr)
        };

        self.expect(Token::Semicolon)?;
        Ok(statement)
    }

    /// Reinterpret a sequence literal as a destructuring pattern.
    fn pattern_from(&self, expr: Expr) -> PResult<Vec<Option<Target>>> {
        let Expr::Sequence(items) = expr else {
            return Err(self.error_before("expected a destructuring pattern"));
        };
        items
            .into_iter()
            .map(|item| match item {
                Expr::Ident(target) => Ok(Some(target)),
                Expr::None => Ok(None),
                _ => Err(self.error_before(
                    "destructuring patterns may only contain names and None",
                )),
            })
            .collect()
    }

    // ---- Expressions, loosest binding first ----

    pub(crate) fn parse_expr(&mut self) -> PResult<Expr> {
        self.nested(Self::parse_or)
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_comparison()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_comparison()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut left = self.parse_bitwise()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::NotEq) => BinOp::NotEq,
                Some(Token::Ge) => BinOp::Ge,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Lt) => BinOp::Lt,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_bitwise()?;
            left = binary(op, left, right);
        }
    }

    fn parse_bitwise(&mut self) -> PResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::BitAnd) => BinOp::BitAnd,
                Some(Token::BitOr) => BinOp::BitOr,
                Some(Token::BitXor) => BinOp::BitXor,
                Some(Token::BitNand) => BinOp::BitNand,
                Some(Token::BitNor) => BinOp::BitNor,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Backslash) => BinOp::IntDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Some(Token::Bang) => UnOp::Not,
            Some(Token::Minus) => UnOp::Neg,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::Caret) {
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_expr_primary()?;
        while let Some(Token::Suffix(path)) = self.peek() {
            let path: Vec<String> = path.split('.').map(str::to_string).collect();
            self.advance();
            expr = if self.check(&Token::LParen) {
                let args = self.parse_args()?;
                Expr::SuffixCall {
                    base: Box::new(expr),
                    path,
                    args,
                }
            } else {
                Expr::Suffix {
                    base: Box::new(expr),
                    path,
                }
            };
        }
        Ok(expr)
    }

    fn parse_expr_primary(&mut self) -> PResult<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("expected an expression"));
        };

        match token {
            Token::None => {
                self.advance();
                Ok(Expr::None)
            }
            Token::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::Int(n) => {
                self.advance();
                Ok(Expr::Int(n))
            }
            Token::Float(n) => {
                self.advance();
                Ok(Expr::Float(n))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Token::Local | Token::Global => Ok(Expr::Ident(self.parse_target()?)),
            Token::Ident(name) => {
                if self.peek_at(1) == Some(&Token::LParen) {
                    self.advance();
                    let args = self.parse_args()?;
                    Ok(Expr::Call {
                        target: CallTarget::Local(name),
                        args,
                    })
                } else {
                    self.advance();
                    Ok(Expr::Ident(Target::auto(name)))
                }
            }
            Token::Scoped(name) => {
                self.advance();
                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::Call {
                        target: CallTarget::Scoped(name),
                        args,
                    })
                } else {
                    Ok(Expr::Scoped(name))
                }
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(Token::Comma)?;
                    }
                }
                Ok(Expr::Sequence(items))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_args(&mut self) -> PResult<Vec<Argument>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        let mut seen = HashSet::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            let name = self.expect_ident("a named argument")?;
            if !seen.insert(name.clone()) {
                return Err(self.error_before(format!("duplicate argument '{}'", name)));
            }
            self.expect(Token::Assign)?;
            let value = self.parse_expr()?;
            args.push(Argument { name, value });
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(Token::Comma)?;
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
