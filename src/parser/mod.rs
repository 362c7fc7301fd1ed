use crate::ast::*;
use crate::lexer::{self, LexError, Token};
use std::ops::Range;

pub struct Parser {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

/// Everything that can stop source text from becoming a [`Program`].
#[derive(Debug, thiserror::Error)]
pub enum SyntaxError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{}", join_errors(.0))]
    Parse(Vec<ParseError>),
}

fn join_errors(errors: &[ParseError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
}

type Result<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

fn precedence_of(token: &Token) -> Precedence {
    match token {
        Token::Eq | Token::NotEq => Precedence::Equals,
        Token::Lt | Token::Gt => Precedence::LessGreater,
        Token::Plus | Token::Minus => Precedence::Sum,
        Token::Asterisk | Token::Slash => Precedence::Product,
        Token::LParen => Precedence::Call,
        Token::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

impl Parser {
    pub fn new(tokens: Vec<(Token, Range<usize>)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Byte offset of the current token, or of the end of input.
    fn position(&self) -> usize {
        match self.tokens.get(self.pos) {
            Some((_, span)) => span.start,
            None => self.tokens.last().map(|(_, s)| s.end).unwrap_or(0),
        }
    }

    fn error(&self, message: String) -> ParseError {
        ParseError { position: self.position(), message }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.peek() {
            Some(tok) if tok == expected => {
                self.advance();
                Ok(())
            }
            Some(tok) => Err(self.error(format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error(format!("expected {:?}, got end of input", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error(format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("expected identifier, got end of input".into())),
        }
    }

    fn skip_semicolon(&mut self) {
        if self.peek() == Some(&Token::Semicolon) {
            self.advance();
        }
    }

    // ---- Top-level parsing ----

    pub fn parse_program(&mut self) -> (Program, Vec<ParseError>) {
        let mut statements = Vec::new();
        let mut errors: Vec<ParseError> = Vec::new();
        const MAX_ERRORS: usize = 20;

        while !self.at_end() {
            if errors.len() >= MAX_ERRORS {
                break;
            }
            match self.parse_stmt() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    errors.push(e);
                    self.sync_to_statement_boundary();
                }
            }
        }

        (Program { statements }, errors)
    }

    /// Skip past the next `;` that is not nested inside braces, or to the end.
    fn sync_to_statement_boundary(&mut self) {
        let mut depth: usize = 0;
        while let Some(tok) = self.advance() {
            match tok {
                Token::Semicolon if depth == 0 => break,
                Token::LBrace => depth += 1,
                Token::RBrace => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }

    // ---- Statements ----

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Let) => self.parse_let(),
            Some(Token::Return) => {
                self.advance();
                let value = self.parse_expr(Precedence::Lowest)?;
                self.skip_semicolon();
                Ok(Stmt::Return(value))
            }
            _ => {
                let expr = self.parse_expr(Precedence::Lowest)?;
                self.skip_semicolon();
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_let(&mut self) -> Result<Stmt> {
        self.expect(&Token::Let)?;
        let name = self.expect_ident()?;
        self.expect(&Token::Assign)?;
        let mut value = self.parse_expr(Precedence::Lowest)?;
        if let Expr::Function(lit) = &mut value {
            lit.name = Some(name.clone());
        }
        self.skip_semicolon();
        Ok(Stmt::Let { name, value })
    }

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(&Token::LBrace)?;
        let mut statements = Vec::new();
        while !matches!(self.peek(), None | Some(Token::RBrace)) {
            statements.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(Block { statements })
    }

    // ---- Expressions ----

    fn parse_expr(&mut self, precedence: Precedence) -> Result<Expr> {
        let mut left = self.parse_prefix()?;
        loop {
            let next = match self.peek() {
                None | Some(Token::Semicolon) => break,
                Some(tok) => precedence_of(tok),
            };
            if precedence >= next {
                break;
            }
            left = self.parse_infix(left)?;
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expr> {
        let position = self.position();
        let Some(tok) = self.advance() else {
            return Err(self.error("expected expression, got end of input".into()));
        };
        match tok {
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Str(value) => Ok(Expr::Str(value)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Bang | Token::Minus => {
                let op = tok.operator().unwrap_or_default().to_string();
                let right = self.parse_expr(Precedence::Prefix)?;
                Ok(Expr::Prefix { op, right: Box::new(right) })
            }
            Token::LParen => {
                let expr = self.parse_expr(Precedence::Lowest)?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::If => self.parse_if(),
            Token::Function => self.parse_function_literal(),
            Token::LBracket => Ok(Expr::Array(self.parse_expr_list(&Token::RBracket)?)),
            Token::LBrace => self.parse_hash(),
            other => Err(ParseError {
                position,
                message: format!("no prefix parse function for {:?}", other),
            }),
        }
    }

    fn parse_infix(&mut self, left: Expr) -> Result<Expr> {
        let position = self.position();
        let Some(tok) = self.advance() else {
            return Err(self.error("expected operator, got end of input".into()));
        };
        match tok {
            Token::LParen => {
                let arguments = self.parse_expr_list(&Token::RParen)?;
                Ok(Expr::Call { function: Box::new(left), arguments })
            }
            Token::LBracket => {
                let index = self.parse_expr(Precedence::Lowest)?;
                self.expect(&Token::RBracket)?;
                Ok(Expr::Index { left: Box::new(left), index: Box::new(index) })
            }
            other => match other.operator() {
                Some(op) => {
                    let right = self.parse_expr(precedence_of(&other))?;
                    Ok(Expr::Infix {
                        op: op.to_string(),
                        left: Box::new(left),
                        right: Box::new(right),
                    })
                }
                None => Err(ParseError {
                    position,
                    message: format!("no infix parse function for {:?}", other),
                }),
            },
        }
    }

    /// `if (cond) { ... } else { ... }`, the `if` already consumed
    fn parse_if(&mut self) -> Result<Expr> {
        self.expect(&Token::LParen)?;
        let condition = self.parse_expr(Precedence::Lowest)?;
        self.expect(&Token::RParen)?;
        let consequence = self.parse_block()?;
        let alternative = if self.peek() == Some(&Token::Else) {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Expr::If { condition: Box::new(condition), consequence, alternative })
    }

    /// `fn(a, b) { ... }`, the `fn` already consumed
    fn parse_function_literal(&mut self) -> Result<Expr> {
        self.expect(&Token::LParen)?;
        let mut parameters = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            parameters.push(self.expect_ident()?);
            while self.peek() == Some(&Token::Comma) {
                self.advance();
                parameters.push(self.expect_ident()?);
            }
        }
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        Ok(Expr::Function(FunctionLiteral { parameters, body, name: None }))
    }

    /// Comma-separated expressions up to `end`, the opening token already consumed
    fn parse_expr_list(&mut self, end: &Token) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.peek() == Some(end) {
            self.advance();
            return Ok(items);
        }
        items.push(self.parse_expr(Precedence::Lowest)?);
        while self.peek() == Some(&Token::Comma) {
            self.advance();
            items.push(self.parse_expr(Precedence::Lowest)?);
        }
        self.expect(end)?;
        Ok(items)
    }

    /// `{k: v, ...}`, the `{` already consumed
    fn parse_hash(&mut self) -> Result<Expr> {
        let mut pairs = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            let key = self.parse_expr(Precedence::Lowest)?;
            self.expect(&Token::Colon)?;
            let value = self.parse_expr(Precedence::Lowest)?;
            pairs.push((key, value));
            if self.peek() != Some(&Token::RBrace) {
                self.expect(&Token::Comma)?;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr::Hash(pairs))
    }
}

/// Parse a token stream, failing with every collected error.
pub fn parse(tokens: Vec<(Token, Range<usize>)>) -> std::result::Result<Program, Vec<ParseError>> {
    let (program, errors) = Parser::new(tokens).parse_program();
    if errors.is_empty() { Ok(program) } else { Err(errors) }
}

/// Lex and parse source text in one step.
pub fn parse_source(source: &str) -> std::result::Result<Program, SyntaxError> {
    let tokens = lexer::lex(source)?;
    parse(tokens).map_err(SyntaxError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse_source(source).unwrap()
    }

    fn single_expr(source: &str) -> Expr {
        let prog = parse_ok(source);
        assert_eq!(prog.statements.len(), 1, "expected one statement in {source}");
        match prog.statements.into_iter().next() {
            Some(Stmt::Expr(e)) => e,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    fn infix(op: &str, left: Expr, right: Expr) -> Expr {
        Expr::Infix { op: op.to_string(), left: Box::new(left), right: Box::new(right) }
    }

    /// Renders an expression fully parenthesised, to check grouping.
    fn grouped(expr: &Expr) -> String {
        match expr {
            Expr::Ident(n) => n.clone(),
            Expr::Int(v) => v.to_string(),
            Expr::Str(s) => format!("{s:?}"),
            Expr::Bool(b) => b.to_string(),
            Expr::Prefix { op, right } => format!("({}{})", op, grouped(right)),
            Expr::Infix { op, left, right } => {
                format!("({} {} {})", grouped(left), op, grouped(right))
            }
            Expr::Call { function, arguments } => {
                let args: Vec<String> = arguments.iter().map(grouped).collect();
                format!("{}({})", grouped(function), args.join(", "))
            }
            Expr::Index { left, index } => format!("({}[{}])", grouped(left), grouped(index)),
            Expr::Array(items) => {
                let items: Vec<String> = items.iter().map(grouped).collect();
                format!("[{}]", items.join(", "))
            }
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn parse_let_statements() {
        let prog = parse_ok("let x = 5; let y = true; let foobar = y;");
        assert_eq!(
            prog.statements,
            vec![
                Stmt::Let { name: "x".into(), value: Expr::Int(5) },
                Stmt::Let { name: "y".into(), value: Expr::Bool(true) },
                Stmt::Let { name: "foobar".into(), value: Expr::Ident("y".into()) },
            ]
        );
    }

    #[test]
    fn parse_return_statement() {
        let prog = parse_ok("return 5; return x + 1");
        assert_eq!(prog.statements[0], Stmt::Return(Expr::Int(5)));
        assert_eq!(
            prog.statements[1],
            Stmt::Return(infix("+", Expr::Ident("x".into()), Expr::Int(1)))
        );
    }

    #[test]
    fn parse_operator_precedence() {
        let cases = [
            ("-a * b", "((-a) * b)"),
            ("!-a", "(!(-a))"),
            ("a + b - c", "((a + b) - c)"),
            ("a + b * c + d / e - f", "(((a + (b * c)) + (d / e)) - f)"),
            ("5 > 4 == 3 < 4", "((5 > 4) == (3 < 4))"),
            ("3 + 4 * 5 == 3 * 1 + 4 * 5", "((3 + (4 * 5)) == ((3 * 1) + (4 * 5)))"),
            ("1 + (2 + 3) + 4", "((1 + (2 + 3)) + 4)"),
            ("-(5 + 5)", "(-(5 + 5))"),
            ("a + add(b * c) + d", "((a + add((b * c))) + d)"),
            ("add(a, b, 1, 2 * 3, add(6, 7 * 8))", "add(a, b, 1, (2 * 3), add(6, (7 * 8)))"),
            ("a * [1, 2, 3, 4][b * c] * d", "((a * ([1, 2, 3, 4][(b * c)])) * d)"),
        ];
        for (source, expected) in cases {
            assert_eq!(grouped(&single_expr(source)), expected, "source: {source}");
        }
    }

    #[test]
    fn parse_if_else() {
        let expr = single_expr("if (x < y) { x } else { y }");
        assert_eq!(
            expr,
            Expr::If {
                condition: Box::new(infix("<", Expr::Ident("x".into()), Expr::Ident("y".into()))),
                consequence: Block::new(vec![Stmt::Expr(Expr::Ident("x".into()))]),
                alternative: Some(Block::new(vec![Stmt::Expr(Expr::Ident("y".into()))])),
            }
        );
    }

    #[test]
    fn parse_function_literal_and_call() {
        let expr = single_expr("fn(x, y) { x + y; }(1, 2)");
        let Expr::Call { function, arguments } = expr else {
            panic!("expected call");
        };
        assert_eq!(arguments, vec![Expr::Int(1), Expr::Int(2)]);
        let Expr::Function(lit) = *function else {
            panic!("expected function literal");
        };
        assert_eq!(lit.parameters, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(lit.name, None);
        assert_eq!(
            lit.body.statements,
            vec![Stmt::Expr(Expr::Infix { op: "+".into(), left: ident("x"), right: ident("y") })]
        );
    }

    #[test]
    fn parse_let_names_function_literal() {
        let prog = parse_ok("let myFunction = fn() { };");
        let Stmt::Let { value: Expr::Function(lit), .. } = &prog.statements[0] else {
            panic!("expected let with function literal");
        };
        assert_eq!(lit.name.as_deref(), Some("myFunction"));
    }

    #[test]
    fn parse_hash_literals() {
        assert_eq!(single_expr("{}"), Expr::Hash(vec![]));
        assert_eq!(
            single_expr(r#"{"one": 1, "two": 2}"#),
            Expr::Hash(vec![
                (Expr::Str("one".into()), Expr::Int(1)),
                (Expr::Str("two".into()), Expr::Int(2)),
            ])
        );
    }

    #[test]
    fn parse_empty_array_and_index() {
        assert_eq!(single_expr("[]"), Expr::Array(vec![]));
        assert_eq!(grouped(&single_expr("myArray[1 + 1]")), "(myArray[(1 + 1)])");
    }

    #[test]
    fn parse_errors_are_collected() {
        let tokens = lexer::lex("let = 5; let x 5; let y = 1;").unwrap();
        let (program, errors) = Parser::new(tokens).parse_program();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("expected identifier"));
        assert_eq!(program.statements, vec![Stmt::Let { name: "y".into(), value: Expr::Int(1) }]);
    }

    #[test]
    fn parse_error_at_end_of_input() {
        let err = parse_source("1 +").unwrap_err();
        match err {
            SyntaxError::Parse(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].position, 3);
            }
            other => panic!("expected parse error, got {other}"),
        }
    }

    #[test]
    fn parse_source_surfaces_lex_errors() {
        assert!(matches!(parse_source("let a = #;"), Err(SyntaxError::Lex(_))));
    }
}
