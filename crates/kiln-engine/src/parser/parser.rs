//! Recursive-descent parser for kiln source.

use super::ast::*;
use super::lexer::Lexer;
use super::token::{Span, Token};

/// Maximum nesting depth before rejecting parse
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum binary and index operators open along one expression spine
pub const MAX_OPERATOR_CHAIN: usize = 512;

/// Lexical and syntax errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// Character that starts no token
    #[error("{line}:{column}: unexpected character {ch:?}")]
    UnexpectedCharacter {
        /// Offending character
        ch: char,
        /// Line number
        line: u32,
        /// Column number
        column: u32,
    },

    /// Integer literal out of range or malformed number
    #[error("{line}:{column}: invalid number literal '{text}'")]
    InvalidNumber {
        /// Literal text
        text: String,
        /// Line number
        line: u32,
        /// Column number
        column: u32,
    },

    /// Unterminated string or bad escape
    #[error("{line}:{column}: invalid string literal")]
    InvalidString {
        /// Line number
        line: u32,
        /// Column number
        column: u32,
    },

    /// Token doesn't fit the grammar
    #[error("{line}:{column}: expected {expected}, found {found}")]
    UnexpectedToken {
        /// What the parser wanted
        expected: String,
        /// What it got
        found: String,
        /// Line number
        line: u32,
        /// Column number
        column: u32,
    },

    /// Structurally invalid construct
    #[error("{line}:{column}: {message}")]
    InvalidSyntax {
        /// Description
        message: String,
        /// Line number
        line: u32,
        /// Column number
        column: u32,
    },
}

impl ParseError {
    fn invalid_syntax(message: impl Into<String>, span: Span) -> Self {
        ParseError::InvalidSyntax {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }

    /// Line the error was reported at
    pub fn line(&self) -> u32 {
        match self {
            ParseError::UnexpectedCharacter { line, .. }
            | ParseError::InvalidNumber { line, .. }
            | ParseError::InvalidString { line, .. }
            | ParseError::UnexpectedToken { line, .. }
            | ParseError::InvalidSyntax { line, .. } => *line,
        }
    }
}

/// Parse a complete source file
pub fn parse(source: &str) -> Result<SourceFile, ParseError> {
    Parser::new(source)?.parse_file()
}

/// Parser over a token stream
pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    depth: usize,
    chain: usize,
}

impl Parser {
    /// Tokenize `source` and create a parser
    pub fn new(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: Lexer::new(source).tokenize()?,
            pos: 0,
            depth: 0,
            chain: 0,
        })
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn current(&self) -> &Token {
        // tokenize() always ends with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> (Token, Span) {
        let entry = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        entry
    }

    fn check(&self, token: &Token) -> bool {
        self.current() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: impl Into<String>) -> ParseError {
        let span = self.current_span();
        ParseError::UnexpectedToken {
            expected: expected.into(),
            found: self.current().to_string(),
            line: span.line,
            column: span.column,
        }
    }

    fn expect(&mut self, token: Token) -> Result<Span, ParseError> {
        if self.check(&token) {
            Ok(self.advance().1)
        } else {
            Err(self.unexpected(token.to_string()))
        }
    }

    fn expect_identifier(&mut self) -> Result<(String, Span), ParseError> {
        match self.current().clone() {
            Token::Identifier(name) => {
                let span = self.advance().1;
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            return Err(ParseError::invalid_syntax(
                format!("maximum nesting depth ({MAX_PARSE_DEPTH}) exceeded"),
                self.current_span(),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Count one more operator on the current spine
    ///
    /// Left-associative loops build trees as deep as their operator count,
    /// and every later pass walks those trees recursively.
    fn extend_chain(&mut self, links: &mut usize) -> Result<(), ParseError> {
        *links += 1;
        self.chain += 1;
        if self.chain > MAX_OPERATOR_CHAIN {
            return Err(ParseError::invalid_syntax(
                format!("expression too deep ({MAX_OPERATOR_CHAIN} chained operators)"),
                self.current_span(),
            ));
        }
        Ok(())
    }

    fn close_chain(&mut self, links: usize) {
        self.chain -= links;
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Parse all class blocks until end of input
    pub fn parse_file(&mut self) -> Result<SourceFile, ParseError> {
        let mut classes = Vec::new();
        while !self.check(&Token::Eof) {
            classes.push(self.parse_class()?);
        }
        Ok(SourceFile { classes })
    }

    fn parse_class(&mut self) -> Result<ClassDecl, ParseError> {
        let start = self.expect(Token::Class)?;
        let (name, _) = self.expect_identifier()?;
        self.expect(Token::LeftBrace)?;

        let mut attributes = Vec::new();
        let mut methods = Vec::new();
        loop {
            match self.current() {
                Token::Attr => {
                    let span = self.advance().1;
                    let (name, _) = self.expect_identifier()?;
                    self.expect(Token::Semicolon)?;
                    attributes.push(AttrDecl { name, span });
                }
                Token::Def => methods.push(self.parse_method()?),
                Token::RightBrace => break,
                _ => return Err(self.unexpected("'attr', 'def' or '}'")),
            }
        }
        let end = self.expect(Token::RightBrace)?;

        Ok(ClassDecl {
            name,
            attributes,
            methods,
            span: start.merge(&end),
        })
    }

    fn parse_method(&mut self) -> Result<MethodDecl, ParseError> {
        let start = self.expect(Token::Def)?;
        let (name, _) = self.expect_identifier()?;
        self.expect(Token::LeftParen)?;
        self.expect(Token::SelfKw)?;

        let mut params = Vec::new();
        while self.eat(&Token::Comma) {
            let (param, _) = self.expect_identifier()?;
            params.push(param);
        }
        self.expect(Token::RightParen)?;
        let body = self.parse_block()?;

        Ok(MethodDecl {
            name,
            params,
            body,
            span: start,
        })
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_block(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.expect(Token::LeftBrace)?;
        let mut statements = Vec::new();
        while !self.check(&Token::RightBrace) {
            if self.check(&Token::Eof) {
                return Err(self.unexpected("'}'"));
            }
            statements.push(self.parse_statement()?);
        }
        self.expect(Token::RightBrace)?;
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        self.enter()?;
        let result = self.parse_statement_inner();
        self.leave();
        result
    }

    fn parse_statement_inner(&mut self) -> Result<Statement, ParseError> {
        let span = self.current_span();
        let kind = match self.current() {
            Token::Let => {
                self.advance();
                let (name, _) = self.expect_identifier()?;
                self.expect(Token::Equal)?;
                let value = self.parse_expression()?;
                self.expect(Token::Semicolon)?;
                StatementKind::Let { name, value }
            }
            Token::If => return self.parse_if(),
            Token::While => {
                self.advance();
                let condition = self.parse_expression()?;
                let body = self.parse_block()?;
                StatementKind::While { condition, body }
            }
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(Token::Semicolon)?;
                StatementKind::Return(value)
            }
            _ => {
                let expression = self.parse_expression()?;
                if self.eat(&Token::Equal) {
                    let target = match expression.kind {
                        ExpressionKind::Name(name) => AssignTarget::Local(name),
                        ExpressionKind::Attribute(name) => AssignTarget::Attribute(name),
                        _ => {
                            return Err(ParseError::invalid_syntax(
                                "invalid assignment target",
                                expression.span,
                            ))
                        }
                    };
                    let value = self.parse_expression()?;
                    self.expect(Token::Semicolon)?;
                    StatementKind::Assign { target, value }
                } else {
                    self.expect(Token::Semicolon)?;
                    StatementKind::Expression(expression)
                }
            }
        };
        Ok(Statement { kind, span })
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        let span = self.expect(Token::If)?;
        let condition = self.parse_expression()?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                vec![self.parse_statement()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Statement {
            kind: StatementKind::If {
                condition,
                then_body,
                else_body,
            },
            span,
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Parse an expression
    pub fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        self.enter()?;
        let result = self.parse_or();
        self.leave();
        result
    }

    fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        let span = left.span.merge(&right.span);
        Expression {
            kind: ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.eat(&Token::Or) {
            self.extend_chain(&mut links)?;
            let right = self.parse_and()?;
            left = Self::binary(BinaryOp::Or, left, right);
        }
        self.close_chain(links);
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_not()?;
        let mut links = 0;
        while self.eat(&Token::And) {
            self.extend_chain(&mut links)?;
            let right = self.parse_not()?;
            left = Self::binary(BinaryOp::And, left, right);
        }
        self.close_chain(links);
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, ParseError> {
        if self.check(&Token::Not) {
            let span = self.advance().1;
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            return Ok(Expression {
                kind: ExpressionKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand?),
                },
                span,
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(&self) -> Option<BinaryOp> {
        Some(match self.current() {
            Token::EqualEqual => BinaryOp::Eq,
            Token::BangEqual => BinaryOp::Ne,
            Token::Less => BinaryOp::Lt,
            Token::LessEqual => BinaryOp::Le,
            Token::Greater => BinaryOp::Gt,
            Token::GreaterEqual => BinaryOp::Ge,
            _ => return None,
        })
    }

    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        let left = self.parse_additive()?;
        let Some(op) = self.comparison_op() else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_additive()?;
        if self.comparison_op().is_some() {
            return Err(ParseError::invalid_syntax(
                "comparisons cannot be chained",
                self.current_span(),
            ));
        }
        Ok(Self::binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_term()?;
        let mut links = 0;
        loop {
            let op = match self.current() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.extend_chain(&mut links)?;
            let right = self.parse_term()?;
            left = Self::binary(op, left, right);
        }
        self.close_chain(links);
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = match self.current() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            self.extend_chain(&mut links)?;
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
        self.close_chain(links);
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if self.check(&Token::Minus) {
            let span = self.advance().1;
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return Ok(Expression {
                kind: ExpressionKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand?),
                },
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expression = self.parse_primary()?;
        let mut links = 0;
        while self.eat(&Token::LeftBracket) {
            self.extend_chain(&mut links)?;
            let index = match self.current() {
                Token::IntLiteral(n) => u16::try_from(*n).map_err(|_| {
                    ParseError::invalid_syntax("tuple index out of range", self.current_span())
                })?,
                _ => return Err(self.unexpected("integer index")),
            };
            self.advance();
            let end = self.expect(Token::RightBracket)?;
            let span = expression.span.merge(&end);
            expression = Expression {
                kind: ExpressionKind::Index {
                    base: Box::new(expression),
                    index,
                },
                span,
            };
        }
        self.close_chain(links);
        Ok(expression)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expression>, ParseError> {
        self.expect(Token::LeftParen)?;
        let mut args = Vec::new();
        if !self.check(&Token::RightParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RightParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let span = self.current_span();
        let kind = match self.current().clone() {
            Token::IntLiteral(n) => {
                self.advance();
                ExpressionKind::Int(n)
            }
            Token::FloatLiteral(x) => {
                self.advance();
                ExpressionKind::Float(x)
            }
            Token::StringLiteral(s) => {
                self.advance();
                ExpressionKind::Str(s)
            }
            Token::True => {
                self.advance();
                ExpressionKind::Bool(true)
            }
            Token::False => {
                self.advance();
                ExpressionKind::Bool(false)
            }
            Token::None => {
                self.advance();
                ExpressionKind::None
            }
            Token::Identifier(name) => {
                self.advance();
                ExpressionKind::Name(name)
            }
            Token::Constants => {
                self.advance();
                self.expect(Token::Dot)?;
                let (name, name_span) = self.expect_identifier()?;
                let index = name
                    .strip_prefix('c')
                    .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
                    .and_then(|digits| digits.parse::<u32>().ok())
                    .ok_or_else(|| {
                        ParseError::invalid_syntax(
                            format!("invalid constant reference 'CONSTANTS.{name}'"),
                            name_span,
                        )
                    })?;
                ExpressionKind::Constant(index)
            }
            Token::SelfKw => {
                self.advance();
                self.expect(Token::Dot)?;
                let (name, _) = self.expect_identifier()?;
                if self.check(&Token::LeftParen) {
                    let args = self.parse_arguments()?;
                    ExpressionKind::MethodCall { method: name, args }
                } else {
                    ExpressionKind::Attribute(name)
                }
            }
            Token::Ops => {
                self.advance();
                self.expect(Token::Dot)?;
                let (operator, _) = self.expect_identifier()?;
                let args = self.parse_arguments()?;
                ExpressionKind::OperatorCall { operator, args }
            }
            Token::LeftParen => {
                self.advance();
                if self.eat(&Token::RightParen) {
                    ExpressionKind::Tuple(Vec::new())
                } else {
                    let first = self.parse_expression()?;
                    if self.eat(&Token::RightParen) {
                        // Parenthesized expression keeps its own span
                        return Ok(first);
                    }
                    let mut items = vec![first];
                    while self.eat(&Token::Comma) {
                        if self.check(&Token::RightParen) {
                            break;
                        }
                        items.push(self.parse_expression()?);
                    }
                    self.expect(Token::RightParen)?;
                    ExpressionKind::Tuple(items)
                }
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expression { kind, span })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> ExpressionKind {
        let mut parser = Parser::new(source).unwrap();
        parser.parse_expression().unwrap().kind
    }

    #[test]
    fn test_parse_class() {
        let file = parse(
            "class Net {
                attr weight;
                def forward(self, x) { return x + CONSTANTS.c0; }
                def reset(self) { self.weight = None; }
            }",
        )
        .unwrap();
        assert_eq!(file.classes.len(), 1);
        let class = &file.classes[0];
        assert_eq!(class.name, "Net");
        assert_eq!(class.attributes[0].name, "weight");
        assert_eq!(class.methods[0].params, vec!["x".to_string()]);
        assert!(matches!(
            class.methods[1].body[0].kind,
            StatementKind::Assign {
                target: AssignTarget::Attribute(_),
                ..
            }
        ));
    }

    #[test]
    fn test_precedence() {
        match expr("1 + 2 * 3") {
            ExpressionKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(
                right.kind,
                ExpressionKind::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            other => panic!("unexpected {other:?}"),
        }

        // not binds looser than comparison
        assert!(matches!(
            expr("not a == b"),
            ExpressionKind::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
        // left associative
        match expr("a - b - c") {
            ExpressionKind::Binary { left, .. } => assert!(matches!(
                left.kind,
                ExpressionKind::Binary {
                    op: BinaryOp::Sub,
                    ..
                }
            )),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tuples_and_indexing() {
        assert_eq!(expr("()"), ExpressionKind::Tuple(Vec::new()));
        assert!(matches!(expr("(1,)"), ExpressionKind::Tuple(items) if items.len() == 1));
        assert!(matches!(expr("(1)"), ExpressionKind::Int(1)));
        assert!(matches!(
            expr("(a, b)[1]"),
            ExpressionKind::Index { index: 1, .. }
        ));
    }

    #[test]
    fn test_constant_references() {
        assert_eq!(expr("CONSTANTS.c12"), ExpressionKind::Constant(12));
        let mut parser = Parser::new("CONSTANTS.x1").unwrap();
        assert!(parser.parse_expression().is_err());
    }

    #[test]
    fn test_errors() {
        assert!(parse("class A { def f(x) { } }").is_err());
        assert!(parse("class A { def f(self) { 1 + ; } }").is_err());
        assert!(parse("class A { def f(self) { a < b < c; } }").is_err());
        assert!(parse("class A { def f(self) { 1 = 2; } }").is_err());
        assert!(parse("class A { def f(self) { return 1; }").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        let mut parser = Parser::new(&source).unwrap();
        assert!(matches!(
            parser.parse_expression(),
            Err(ParseError::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn test_long_operator_chain_rejected() {
        let terms = vec!["x"; MAX_OPERATOR_CHAIN + 2].join(" + ");
        let mut parser = Parser::new(&terms).unwrap();
        assert!(matches!(
            parser.parse_expression(),
            Err(ParseError::InvalidSyntax { .. })
        ));

        let indexed = format!("t{}", "[0]".repeat(MAX_OPERATOR_CHAIN + 1));
        assert!(Parser::new(&indexed).unwrap().parse_expression().is_err());
    }

    #[test]
    fn test_chain_budget_spans_nested_operands() {
        // A parenthesized operand inherits the open chain of its parent
        let outer = vec!["x"; 301].join(" + ");
        let inner = vec!["x"; 301].join(" * ");
        let source = format!("{outer} + ({inner})");
        assert!(Parser::new(&source).unwrap().parse_expression().is_err());
        assert!(Parser::new(&outer).unwrap().parse_expression().is_ok());

        // Sibling chains don't accumulate
        let short = vec!["x"; MAX_OPERATOR_CHAIN / 2].join(" * ");
        let source = format!("ops.f({short}, {short}) + ({short})");
        assert!(Parser::new(&source).unwrap().parse_expression().is_ok());
    }

    #[test]
    fn test_chain_within_limit() {
        let terms = vec!["x"; MAX_OPERATOR_CHAIN].join(" - ");
        let parsed = Parser::new(&terms).unwrap().parse_expression().unwrap();
        assert!(matches!(
            parsed.kind,
            ExpressionKind::Binary { op: BinaryOp::Sub, .. }
        ));
    }
}
