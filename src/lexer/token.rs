use std::fmt;

use crate::misc::{replace_escapes, Interval};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum TokenType {
    Eof,

    // Outside expressions
    Text,
    Newline,
    Indent,
    Comment,
    Ldelim,
    Rdelim,

    // Identifiers + literals
    Id,
    String,

    // Delimiters
    Lparen,
    Rparen,
    LBrack,
    RBrack,
    LCurly,
    RCurly,
    Comma,
    Dot,
    Colon,
    Semi,
    Equals,
    Ellipsis,
    Pipe,
    At,
    RegionEnd,

    // Operators
    Bang,
    And,
    Or,

    // Keywords
    If,
    ElseIf,
    Else,
    EndIf,
    True,
    False,
    Super,
}

impl TokenType {
    pub fn name(self) -> &'static str {
        match self {
            TokenType::Eof => "EOF",
            TokenType::Text => "TEXT",
            TokenType::Newline => "NEWLINE",
            TokenType::Indent => "INDENT",
            TokenType::Comment => "COMMENT",
            TokenType::Ldelim => "LDELIM",
            TokenType::Rdelim => "RDELIM",
            TokenType::Id => "ID",
            TokenType::String => "STRING",
            TokenType::Lparen => "LPAREN",
            TokenType::Rparen => "RPAREN",
            TokenType::LBrack => "LBRACK",
            TokenType::RBrack => "RBRACK",
            TokenType::LCurly => "LCURLY",
            TokenType::RCurly => "RCURLY",
            TokenType::Comma => "COMMA",
            TokenType::Dot => "DOT",
            TokenType::Colon => "COLON",
            TokenType::Semi => "SEMI",
            TokenType::Equals => "EQUALS",
            TokenType::Ellipsis => "ELLIPSIS",
            TokenType::Pipe => "PIPE",
            TokenType::At => "AT",
            TokenType::RegionEnd => "END",
            TokenType::Bang => "BANG",
            TokenType::And => "AND",
            TokenType::Or => "OR",
            TokenType::If => "IF",
            TokenType::ElseIf => "ELSEIF",
            TokenType::Else => "ELSE",
            TokenType::EndIf => "ENDIF",
            TokenType::True => "TRUE",
            TokenType::False => "FALSE",
            TokenType::Super => "SUPER",
        }
    }
}

pub fn lookup_ident(ident: &str) -> TokenType {
    match ident {
        "if" => TokenType::If,
        "elseif" => TokenType::ElseIf,
        "else" => TokenType::Else,
        "endif" => TokenType::EndIf,
        "true" => TokenType::True,
        "false" => TokenType::False,
        "super" => TokenType::Super,
        _ => TokenType::Id,
    }
}

/// A lexed token. `start..stop` are char indexes into the template text;
/// `line` counts from 1 and `char_position` from 0.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct Token {
    pub token_type: TokenType,
    pub text: String,
    pub start: usize,
    pub stop: usize,
    pub line: usize,
    pub char_position: usize,
}

impl Token {
    pub fn new(token_type: TokenType, text: String, start: usize, stop: usize, line: usize, char_position: usize) -> Self {
        Self {
            token_type,
            text,
            start,
            stop,
            line,
            char_position,
        }
    }

    pub fn new_empty() -> Self {
        Self::new(TokenType::Eof, String::new(), 0, 0, 1, 0)
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.start, self.stop)
    }

    pub fn is(&self, token_type: TokenType) -> bool {
        self.token_type == token_type
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}='{}',<{}>,{}:{}]",
            self.start,
            self.stop.saturating_sub(1),
            replace_escapes(&self.text),
            self.token_type.name(),
            self.line,
            self.char_position
        )
    }
}
