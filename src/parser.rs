//! Parser to generate a [`Program`] from source text

use tracing::debug;

use crate::{
    ast::{
        Assignment, BinaryOp, Condition, Expr, Item, Operand, Program, Relation, Statement,
        StatementKind, Variable,
    },
    error::CompileError,
    isa::PORT_COUNT,
    lexer::Lexer,
    token::{Keyword, Spanned, Token},
};

type ParseRes<T> = Result<T, CompileError>;

/// Parse `source` into a program.
pub fn parse(source: &str) -> ParseRes<Program> {
    Parser::new(source).parse()
}

/// Recursive descent parser over the token stream of one source file.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<Spanned<'a>>,
    program: Program,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Parser {
            lexer: Lexer::new(source),
            peeked: None,
            program: Program::default(),
        }
    }

    /// Parse the whole source and return the program.
    pub fn parse(mut self) -> ParseRes<Program> {
        let mut at_start = true;

        while let Some(Spanned { token, line }) = self.next_raw()? {
            match token {
                Token::Comment(text) => {
                    if let Some(offset) = parse_marker(text, line)? {
                        self.program.items.push(Item::Marker { offset, line });
                    } else if at_start {
                        // Leading free text comment names the target device
                        let device = text.trim_end_matches(';').trim();
                        if !device.is_empty() {
                            self.program.device = Some(device.to_string());
                        }
                    }
                }
                Token::Keyword(Keyword::Const) => self.parse_const(line)?,
                Token::Keyword(Keyword::Uint8) | Token::Keyword(Keyword::Let) => {
                    let kind = self.parse_declaration(line)?;
                    self.push_statement(kind, line);
                }
                Token::Keyword(Keyword::If) => {
                    let kind = self.parse_if()?;
                    self.push_statement(kind, line);
                }
                Token::Keyword(Keyword::WritePort) => {
                    let kind = self.parse_write_port(line)?;
                    self.push_statement(kind, line);
                }
                Token::Keyword(Keyword::Goto) => {
                    self.expect(Token::LParen)?;
                    let target = self.parse_value()? as usize;
                    self.expect(Token::RParen)?;
                    self.expect(Token::Semicolon)?;
                    self.push_statement(StatementKind::Goto { target }, line);
                }
                Token::Name(name) => {
                    let assignment = self.parse_assignment(name, line)?;
                    self.expect(Token::Semicolon)?;
                    self.push_statement(StatementKind::Assign(assignment), line);
                }
                token => {
                    return Err(CompileError::syntax(
                        line,
                        format!("expected statement, got {token:?}"),
                    ))
                }
            }
            at_start = false;
        }

        debug!(
            statements = self.program.statements().count(),
            variables = self.program.variables.len(),
            constants = self.program.constants.len(),
            "parsed program"
        );

        Ok(self.program)
    }

    fn push_statement(&mut self, kind: StatementKind, line: usize) {
        self.program
            .items
            .push(Item::Statement(Statement { kind, line }));
    }

    /// `const NAME = value;`
    fn parse_const(&mut self, line: usize) -> ParseRes<()> {
        let name = self.expect_name()?;
        self.check_free(name, line)?;
        self.expect(Token::Assign)?;
        let value = self.parse_value()?;
        let value = to_u8(value, line)?;
        self.expect(Token::Semicolon)?;
        self.program.constants.insert(name.to_string(), value);
        Ok(())
    }

    /// `uint8 NAME = expr;` / `let NAME = expr;`
    fn parse_declaration(&mut self, line: usize) -> ParseRes<StatementKind> {
        let name = self.expect_name()?;
        self.check_free(name, line)?;
        self.expect(Token::Assign)?;
        let value = self.parse_expr()?;
        self.expect(Token::Semicolon)?;

        if self.program.variables.len() == 256 {
            return Err(CompileError::syntax(line, "more than 256 variables declared"));
        }

        let initial = match value {
            Expr::Operand(Operand::Literal(value)) => value,
            _ => 0,
        };
        self.program.variables.push(Variable {
            name: name.to_string(),
            initial,
        });

        Ok(StatementKind::Declare {
            name: name.to_string(),
            value,
        })
    }

    /// `if (cond) { a = expr, b = expr };`
    fn parse_if(&mut self) -> ParseRes<StatementKind> {
        self.expect(Token::LParen)?;
        let condition = self.parse_condition()?;
        self.expect(Token::RParen)?;
        self.expect(Token::LBrace)?;

        let mut body = Vec::new();
        loop {
            let Spanned { token, line } = self.next()?;
            match token {
                Token::RBrace => break,
                Token::Name(name) => {
                    let assignment = self.parse_assignment(name, line)?;
                    // Only stores are guarded, a read here would reach the device every pass
                    if assignment.value.reads_port() {
                        return Err(CompileError::syntax(
                            line,
                            "read_port is not allowed inside if block, read into a variable before the if",
                        ));
                    }
                    body.push(assignment);
                }
                token => {
                    return Err(CompileError::syntax(
                        line,
                        format!("expected assignment inside if block, got {token:?}"),
                    ))
                }
            }

            let Spanned { token, line } = self.next()?;
            match token {
                Token::Comma => {}
                Token::RBrace => break,
                token => {
                    return Err(CompileError::syntax(
                        line,
                        format!("expected ',' or '}}' after assignment, got {token:?}"),
                    ))
                }
            }
        }

        // The closing ';' after a block is optional
        if matches!(self.peek()?, Some(Token::Semicolon)) {
            self.next()?;
        }

        Ok(StatementKind::If { condition, body })
    }

    /// `write_port(port, expr);`
    fn parse_write_port(&mut self, line: usize) -> ParseRes<StatementKind> {
        self.expect(Token::LParen)?;
        let port = self.parse_port(line)?;
        self.expect(Token::Comma)?;
        let value = self.parse_expr()?;
        self.expect(Token::RParen)?;
        self.expect(Token::Semicolon)?;
        Ok(StatementKind::WritePort { port, value })
    }

    /// `NAME = expr`, the name is already consumed
    fn parse_assignment(&mut self, name: &str, line: usize) -> ParseRes<Assignment> {
        if self.program.constants.contains_key(name) {
            return Err(CompileError::syntax(
                line,
                format!("cannot assign to constant '{name}'"),
            ));
        }
        if self.program.slot_of(name).is_none() {
            return Err(CompileError::syntax(
                line,
                format!("assignment to undeclared variable '{name}'"),
            ));
        }

        self.expect(Token::Assign)?;
        let value = self.parse_expr()?;
        Ok(Assignment {
            name: name.to_string(),
            value,
        })
    }

    /// `operand [(+|-) operand]`
    fn parse_expr(&mut self) -> ParseRes<Expr> {
        let lhs = self.parse_operand()?;
        let op = match self.peek()? {
            Some(Token::Plus) => BinaryOp::Add,
            Some(Token::Minus) => BinaryOp::Sub,
            _ => return Ok(Expr::Operand(lhs)),
        };
        self.next()?;
        let rhs = self.parse_operand()?;

        let chained = matches!(self.peek()?, Some(Token::Plus | Token::Minus));
        if chained {
            return Err(CompileError::syntax(
                self.lexer.line(),
                "expressions take at most two operands",
            ));
        }

        Ok(Expr::Binary { op, lhs, rhs })
    }

    /// `operand (==|>|<) operand`
    fn parse_condition(&mut self) -> ParseRes<Condition> {
        let lhs = self.parse_operand()?;
        let Spanned { token, line } = self.next()?;
        let relation = match token {
            Token::EqEq => Relation::Eq,
            Token::Greater => Relation::Greater,
            Token::Less => Relation::Less,
            token => {
                return Err(CompileError::syntax(
                    line,
                    format!("expected '==', '>' or '<', got {token:?}"),
                ))
            }
        };
        let rhs = self.parse_operand()?;
        Ok(Condition { relation, lhs, rhs })
    }

    fn parse_operand(&mut self) -> ParseRes<Operand> {
        let Spanned { token, line } = self.next()?;
        match token {
            Token::Number(value) => Ok(Operand::Literal(to_u8(value, line)?)),
            Token::Name(name) => {
                if let Some(&value) = self.program.constants.get(name) {
                    Ok(Operand::Literal(value))
                } else if self.program.slot_of(name).is_some() {
                    Ok(Operand::Var(name.to_string()))
                } else {
                    Err(CompileError::syntax(
                        line,
                        format!("use of undeclared name '{name}'"),
                    ))
                }
            }
            Token::Keyword(Keyword::ReadPort) => {
                self.expect(Token::LParen)?;
                let port = self.parse_port(line)?;
                self.expect(Token::RParen)?;
                Ok(Operand::ReadPort(port))
            }
            token => Err(CompileError::syntax(
                line,
                format!("expected operand, got {token:?}"),
            )),
        }
    }

    fn parse_port(&mut self, line: usize) -> ParseRes<u8> {
        let port = self.parse_value()?;
        if port >= u32::from(PORT_COUNT) {
            return Err(CompileError::syntax(
                line,
                format!("port {port} out of range 0..{}", PORT_COUNT - 1),
            ));
        }
        Ok(port as u8)
    }

    /// A number literal or the name of a constant
    fn parse_value(&mut self) -> ParseRes<u32> {
        let Spanned { token, line } = self.next()?;
        match token {
            Token::Number(value) => Ok(value),
            Token::Name(name) => match self.program.constants.get(name) {
                Some(&value) => Ok(u32::from(value)),
                None => Err(CompileError::syntax(
                    line,
                    format!("'{name}' is not a constant"),
                )),
            },
            token => Err(CompileError::syntax(
                line,
                format!("expected number or constant, got {token:?}"),
            )),
        }
    }

    fn check_free(&self, name: &str, line: usize) -> ParseRes<()> {
        if self.program.constants.contains_key(name) || self.program.slot_of(name).is_some() {
            return Err(CompileError::syntax(
                line,
                format!("'{name}' is already declared"),
            ));
        }
        Ok(())
    }

    fn expect_name(&mut self) -> ParseRes<&'a str> {
        match self.next()? {
            Spanned {
                token: Token::Name(name),
                ..
            } => Ok(name),
            Spanned { token, line } => Err(CompileError::syntax(
                line,
                format!("expected name, got {token:?}"),
            )),
        }
    }

    fn expect(&mut self, expected: Token<'a>) -> ParseRes<()> {
        let Spanned { token, line } = self.next()?;
        if token != expected {
            return Err(CompileError::syntax(
                line,
                format!("expected {expected:?}, got {token:?}"),
            ));
        }
        Ok(())
    }

    /// Next token inside a statement. Comments are skipped and the end of
    /// input is an error.
    fn next(&mut self) -> ParseRes<Spanned<'a>> {
        loop {
            match self.next_raw()? {
                Some(Spanned {
                    token: Token::Comment(_),
                    ..
                }) => continue,
                Some(spanned) => return Ok(spanned),
                None => {
                    return Err(CompileError::syntax(
                        self.lexer.line(),
                        "unexpected end of input",
                    ))
                }
            }
        }
    }

    fn next_raw(&mut self) -> ParseRes<Option<Spanned<'a>>> {
        match self.peeked.take() {
            Some(spanned) => Ok(Some(spanned)),
            None => self.lexer.next_token(),
        }
    }

    fn peek(&mut self) -> ParseRes<Option<&Token<'a>>> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token()?;
        }
        Ok(self.peeked.as_ref().map(|spanned| &spanned.token))
    }
}

/// Recognize `BYTE n;` in a comment body.
fn parse_marker(text: &str, line: usize) -> ParseRes<Option<usize>> {
    let mut words = text.trim_end_matches(';').split_whitespace();
    if words.next() != Some("BYTE") {
        return Ok(None);
    }

    match (words.next().map(str::parse::<usize>), words.next()) {
        (Some(Ok(offset)), None) => Ok(Some(offset)),
        _ => Err(CompileError::syntax(
            line,
            format!("malformed BYTE marker '{text}'"),
        )),
    }
}

fn to_u8(value: u32, line: usize) -> ParseRes<u8> {
    u8::try_from(value).map_err(|_| {
        CompileError::syntax(line, format!("literal {value} does not fit in uint8"))
    })
}
