/// Reserved keywords of the language
/// ***Note that the port intrinsics are keywords too, they can not be used as names***
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Keyword {
    Const,
    Uint8,
    Let,
    If,
    Goto,
    ReadPort,
    WritePort,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Token<'a> {
    Keyword(Keyword),

    /// Text of a `//` comment, without the slashes and surrounding spaces
    Comment(&'a str),

    Name(&'a str),
    Number(u32),

    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semicolon,

    Assign,
    Plus,
    Minus,
    EqEq,
    Greater,
    Less,
}

impl<'a> Token<'a> {
    pub fn new(token_str: &'a str) -> Self {
        match token_str {
            "const" => Token::Keyword(Keyword::Const),
            "uint8" => Token::Keyword(Keyword::Uint8),
            "let" => Token::Keyword(Keyword::Let),
            "if" => Token::Keyword(Keyword::If),
            "goto" => Token::Keyword(Keyword::Goto),
            "read_port" => Token::Keyword(Keyword::ReadPort),
            "write_port" => Token::Keyword(Keyword::WritePort),
            _ => Token::Name(token_str),
        }
    }
}

/// A token together with the line it starts on (1-indexed).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Spanned<'a> {
    pub token: Token<'a>,
    pub line: usize,
}
