use super::token::{Spanned, Token};
use crate::error::CompileError;
use std::str;

pub struct Lexer<'a> {
    program: &'a str,
    cursor: usize,
    line: usize,
}

type LResult<'a> = Result<Option<Spanned<'a>>, CompileError>;

impl<'a> Lexer<'a> {
    pub fn new(program: &'a str) -> Self {
        Lexer {
            program,
            cursor: 0,
            line: 1,
        }
    }

    /// Current line of the cursor (1-indexed).
    pub fn line(&self) -> usize {
        self.line
    }

    /// Get the next token. This consumes the tokens.
    pub fn next_token(&mut self) -> LResult<'a> {
        self.trim();

        let line = self.line;
        let token = match self.next_char(false) {
            Some(b'/') => {
                if self.next_char(false) != Some(b'/') {
                    return Err(CompileError::syntax(line, "unexpected '/'"));
                }
                self.read_comment()
            }
            Some(b'(') => Token::LParen,
            Some(b')') => Token::RParen,
            Some(b'{') => Token::LBrace,
            Some(b'}') => Token::RBrace,
            Some(b',') => Token::Comma,
            Some(b';') => Token::Semicolon,
            Some(b'+') => Token::Plus,
            Some(b'-') => Token::Minus,
            Some(b'>') => Token::Greater,
            Some(b'<') => Token::Less,
            Some(b'=') => {
                if self.next_char(true) == Some(b'=') {
                    self.cursor += 1;
                    Token::EqEq
                } else {
                    Token::Assign
                }
            }
            Some(ch) if ch.is_ascii_digit() => self.read_number(line)?,
            Some(ch) if ch.is_ascii_alphabetic() || ch == b'_' => self.read_token(),
            Some(ch) => {
                return Err(CompileError::syntax(
                    line,
                    format!("unexpected character '{}'", ch as char),
                ))
            }
            None => return Ok(None),
        };

        Ok(Some(Spanned { token, line }))
    }

    /// Trim whitespaces, tabs, carriage returns, newlines
    fn trim(&mut self) {
        while let Some(ch) = self.next_char(true) {
            if !ch.is_ascii_whitespace() {
                break;
            }
            if ch == b'\n' {
                self.line += 1;
            }
            self.cursor += 1;
        }
    }

    /// Read a decimal number or a `0b` binary literal
    fn read_number(&mut self, line: usize) -> Result<Token<'a>, CompileError> {
        let start_pos = self.cursor - 1;
        let binary = self.program.as_bytes()[start_pos] == b'0' && self.next_char(true) == Some(b'b');
        if binary {
            self.cursor += 1;
        }

        while let Some(ch) = self.next_char(true) {
            if !ch.is_ascii_alphanumeric() && ch != b'_' {
                break;
            }
            self.cursor += 1;
        }

        let text = &self.program[start_pos..self.cursor];
        let parsed = if binary {
            u32::from_str_radix(&text[2..], 2)
        } else {
            text.parse::<u32>()
        };

        parsed
            .map(Token::Number)
            .map_err(|_| CompileError::syntax(line, format!("invalid number literal '{text}'")))
    }

    /// Read the rest of a `//` comment up to the end of the line
    fn read_comment(&mut self) -> Token<'a> {
        let start_pos = self.cursor;
        while let Some(ch) = self.next_char(true) {
            if ch == b'\n' {
                break;
            }
            self.cursor += 1;
        }

        Token::Comment(self.program[start_pos..self.cursor].trim())
    }

    /// Read a keyword or a name
    fn read_token(&mut self) -> Token<'a> {
        let start_pos = self.cursor - 1;
        while let Some(ch) = self.next_char(true) {
            // Only alphanumberic characters and '_'
            if !ch.is_ascii_alphanumeric() && ch != b'_' {
                break;
            }
            self.cursor += 1;
        }

        Token::new(&self.program[start_pos..self.cursor])
    }

    /// Get the next char and increase the cursor if `peek` is false
    fn next_char(&mut self, peek: bool) -> Option<u8> {
        if let Some(ch) = self.program.as_bytes().get(self.cursor) {
            if !peek {
                self.cursor += 1;
            }
            Some(*ch)
        } else {
            None
        }
    }
}
