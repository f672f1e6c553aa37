pub mod token;

use std::collections::VecDeque;

use crate::compiler::TemplateOrigin;
use crate::error::ErrorManager;

use self::token::{lookup_ident, Token, TokenType};

/// Template lexer. Flips between text mode and expression mode at the
/// delimiters; `{args |` headers of subtemplates are recognized by lookahead.
pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    start: usize,
    start_line: usize,
    start_col: usize,
    delimiter_start: char,
    delimiter_stop: char,
    inside_expr: bool,
    subtemplate_depth: usize,
    pending: VecDeque<Token>,
    errors: &'a ErrorManager,
    origin: &'a TemplateOrigin,
}

impl<'a> Lexer<'a> {
    pub fn new(
        input: &str,
        delimiters: (char, char),
        errors: &'a ErrorManager,
        origin: &'a TemplateOrigin,
    ) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 0,
            start: 0,
            start_line: 1,
            start_col: 0,
            delimiter_start: delimiters.0,
            delimiter_stop: delimiters.1,
            inside_expr: false,
            subtemplate_depth: 0,
            pending: VecDeque::new(),
            errors,
            origin,
        }
    }

    /// Lexes the whole input; the last token is always EOF.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token();
            let done = t.is(TokenType::Eof);
            tokens.push(t);
            if done {
                return tokens;
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        loop {
            let t = match self.pending.pop_front() {
                Some(t) => t,
                None => match self.next_raw() {
                    Some(t) => t,
                    None => continue,
                },
            };
            // <%...%> bodies and embedded regions drop their own layout
            if self.origin.no_newlines && matches!(t.token_type, TokenType::Newline | TokenType::Indent) {
                continue;
            }
            return t;
        }
    }

    fn c(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn la(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n - 1).copied()
    }

    fn consume(&mut self) {
        if let Some(c) = self.c() {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }
    }

    fn mark_start(&mut self) {
        self.start = self.pos;
        self.start_line = self.line;
        self.start_col = self.col;
    }

    fn new_token(&self, token_type: TokenType) -> Token {
        let text: String = self.chars[self.start..self.pos].iter().collect();
        self.new_token_with_text(token_type, text)
    }

    fn new_token_with_text(&self, token_type: TokenType, text: String) -> Token {
        Token::new(token_type, text, self.start, self.pos, self.start_line, self.start_col)
    }

    fn error(&self, msg: String) {
        let at = self.origin.locate(self.line, self.col);
        self.errors.lexer_error(self.origin.source_name.as_deref(), msg, at);
    }

    fn matches(&mut self, expected: char) {
        match self.c() {
            Some(c) if c == expected => self.consume(),
            Some(c) => {
                self.error(format!("invalid character '{}'", c));
                self.consume();
            }
            None => self.error(format!("expecting '{}', found '<EOF>'", expected)),
        }
    }

    /// One token, or `None` for input that produces nothing (whitespace inside
    /// expressions, escapes that expand to nothing, bad characters).
    fn next_raw(&mut self) -> Option<Token> {
        self.mark_start();
        let c = match self.c() {
            Some(c) => c,
            None => return Some(self.new_token_with_text(TokenType::Eof, String::new())),
        };
        if self.inside_expr {
            self.inside(c)
        } else {
            self.outside(c)
        }
    }

    fn outside(&mut self, c: char) -> Option<Token> {
        if self.col == 0 && (c == ' ' || c == '\t') {
            while matches!(self.c(), Some(' ') | Some('\t')) {
                self.consume();
            }
            if self.c().is_some() {
                return Some(self.new_token(TokenType::Indent));
            }
            return Some(self.new_token(TokenType::Text));
        }
        if c == self.delimiter_start {
            self.consume();
            match self.c() {
                Some('!') => return Some(self.comment()),
                Some('\\') => return self.escape(),
                _ => {}
            }
            self.inside_expr = true;
            return Some(self.new_token(TokenType::Ldelim));
        }
        match c {
            '\r' | '\n' => {
                if c == '\r' && self.la(2) == Some('\n') {
                    self.consume();
                }
                self.consume();
                Some(self.new_token_with_text(TokenType::Newline, "\n".to_string()))
            }
            '}' if self.subtemplate_depth > 0 => {
                self.inside_expr = true;
                self.subtemplate_depth -= 1;
                self.consume();
                Some(self.new_token(TokenType::RCurly))
            }
            _ => Some(self.text()),
        }
    }

    fn inside(&mut self, c: char) -> Option<Token> {
        let token_type = match c {
            ' ' | '\t' | '\n' | '\r' => {
                self.consume();
                return None;
            }
            '.' => {
                self.consume();
                if self.c() == Some('.') && self.la(2) == Some('.') {
                    self.consume();
                    self.consume();
                    return Some(self.new_token(TokenType::Ellipsis));
                }
                return Some(self.new_token(TokenType::Dot));
            }
            ',' => TokenType::Comma,
            ':' => TokenType::Colon,
            ';' => TokenType::Semi,
            '(' => TokenType::Lparen,
            ')' => TokenType::Rparen,
            '[' => TokenType::LBrack,
            ']' => TokenType::RBrack,
            '=' => TokenType::Equals,
            '!' => TokenType::Bang,
            '@' => {
                self.consume();
                if self.c() == Some('e') && self.la(2) == Some('n') && self.la(3) == Some('d') {
                    self.consume();
                    self.consume();
                    self.consume();
                    return Some(self.new_token(TokenType::RegionEnd));
                }
                return Some(self.new_token(TokenType::At));
            }
            '"' => return Some(self.string()),
            '&' => {
                self.consume();
                self.matches('&');
                return Some(self.new_token(TokenType::And));
            }
            '|' => {
                self.consume();
                self.matches('|');
                return Some(self.new_token(TokenType::Or));
            }
            '{' => return Some(self.subtemplate()),
            _ if c == self.delimiter_stop => {
                self.consume();
                self.inside_expr = false;
                return Some(self.new_token(TokenType::Rdelim));
            }
            _ if is_id_letter(c) => {
                let id = self.id();
                let token_type = lookup_ident(&id.text);
                return Some(Token { token_type, ..id });
            }
            _ => {
                self.error(format!("invalid character '{}'", c));
                self.consume();
                return None;
            }
        };
        self.consume();
        Some(self.new_token(token_type))
    }

    fn id(&mut self) -> Token {
        self.mark_start();
        self.consume();
        while self.c().map_or(false, is_id_letter) {
            self.consume();
        }
        self.new_token(TokenType::Id)
    }

    fn skip_ws(&mut self) {
        while matches!(self.c(), Some(' ') | Some('\t') | Some('\n') | Some('\r')) {
            self.consume();
        }
    }

    /// `{` starting a subtemplate. If it is followed by `ID (, ID)* |` the
    /// argument tokens are queued behind the LCURLY; otherwise the lexer
    /// rewinds to just after the curly.
    fn subtemplate(&mut self) -> Token {
        self.subtemplate_depth += 1;
        let (pos, line, col) = (self.pos, self.line, self.col);
        self.consume();
        let curly = self.new_token(TokenType::LCurly);

        let mut args = Vec::new();
        self.skip_ws();
        while self.c().map_or(false, is_id_letter) {
            args.push(self.id());
            self.skip_ws();
            if self.c() != Some(',') {
                break;
            }
            self.mark_start();
            self.consume();
            args.push(self.new_token(TokenType::Comma));
            self.skip_ws();
        }
        let well_formed = args.last().map_or(false, |t| t.is(TokenType::Id));
        if well_formed && self.c() == Some('|') {
            self.mark_start();
            self.consume();
            args.push(self.new_token(TokenType::Pipe));
            if matches!(self.c(), Some(' ') | Some('\t') | Some('\n') | Some('\r')) {
                self.consume();
            }
            self.pending.extend(args);
            self.inside_expr = false;
            return curly;
        }

        self.pos = pos;
        self.line = line;
        self.col = col;
        self.consume();
        self.inside_expr = false;
        curly
    }

    fn text(&mut self) -> Token {
        let mut buf = String::new();
        while let Some(c) = self.c() {
            if c == self.delimiter_start || c == '\r' || c == '\n' {
                break;
            }
            if c == '}' && self.subtemplate_depth > 0 {
                break;
            }
            if c == '\\' {
                match self.la(2) {
                    Some('\\') => {
                        self.consume();
                        self.consume();
                        buf.push('\\');
                    }
                    Some(next) if next == self.delimiter_start || next == '}' => {
                        self.consume();
                        buf.push(next);
                        self.consume();
                    }
                    _ => {
                        buf.push(c);
                        self.consume();
                    }
                }
                continue;
            }
            buf.push(c);
            self.consume();
        }
        self.new_token_with_text(TokenType::Text, buf)
    }

    /// String literal; the token text keeps its quotes, escapes are decoded.
    fn string(&mut self) -> Token {
        let mut buf = String::from('"');
        self.consume();
        loop {
            match self.c() {
                None => {
                    self.error("EOF in string".to_string());
                    break;
                }
                Some('"') => {
                    buf.push('"');
                    self.consume();
                    break;
                }
                Some('\\') => {
                    self.consume();
                    match self.c() {
                        Some('n') => buf.push('\n'),
                        Some('r') => buf.push('\r'),
                        Some('t') => buf.push('\t'),
                        Some(other) => buf.push(other),
                        None => continue,
                    }
                    self.consume();
                }
                Some('\n') => {
                    self.error("\\n in string".to_string());
                    buf.push('\n');
                    self.consume();
                }
                Some(c) => {
                    buf.push(c);
                    self.consume();
                }
            }
        }
        self.new_token_with_text(TokenType::String, buf)
    }

    fn comment(&mut self) -> Token {
        let (line, col) = (self.start_line, self.start_col);
        self.consume();
        loop {
            if self.c() == Some('!') && self.la(2) == Some(self.delimiter_stop) {
                self.consume();
                self.consume();
                break;
            }
            if self.c().is_none() {
                self.error(format!(
                    "Nonterminated comment starting at {}:{}: '!{}' missing",
                    line, col, self.delimiter_stop
                ));
                break;
            }
            self.consume();
        }
        self.new_token(TokenType::Comment)
    }

    /// `<\n>`, `<\t>`, `<\ >`, `<\uXXXX>` and the `<\\>` line continuation.
    fn escape(&mut self) -> Option<Token> {
        self.consume();
        let text = match self.c() {
            Some('u') => return self.unicode(),
            Some('\\') => {
                self.line_break();
                return None;
            }
            Some('n') => "\n",
            Some('t') => "\t",
            Some(' ') => " ",
            other => {
                let shown = other.map_or_else(|| "<EOF>".to_string(), |c| c.to_string());
                self.error(format!("invalid escaped char: '{}'", shown));
                self.consume();
                self.matches(self.delimiter_stop);
                return None;
            }
        };
        self.consume();
        let t = self.new_token_with_text(TokenType::Text, text.to_string());
        self.matches(self.delimiter_stop);
        Some(t)
    }

    fn unicode(&mut self) -> Option<Token> {
        self.consume();
        let mut hex = String::new();
        for _ in 0..4 {
            match self.c() {
                Some(c) if c.is_ascii_hexdigit() => {
                    hex.push(c);
                    self.consume();
                }
                other => {
                    let shown = other.map_or_else(|| "<EOF>".to_string(), |c| c.to_string());
                    self.error(format!("invalid unicode char: '{}'", shown));
                    self.skip_past_stop();
                    return None;
                }
            }
        }
        let decoded = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32);
        let t = match decoded {
            Some(ch) => Some(self.new_token_with_text(TokenType::Text, ch.to_string())),
            None => {
                self.error(format!("invalid unicode char: '{}'", hex));
                None
            }
        };
        self.matches(self.delimiter_stop);
        t
    }

    /// Drops the rest of a bad escape up to and including the closing
    /// delimiter. Stops short of a newline.
    fn skip_past_stop(&mut self) {
        while let Some(c) = self.c() {
            if c == '\n' || c == '\r' {
                break;
            }
            self.consume();
            if c == self.delimiter_stop {
                break;
            }
        }
    }

    /// Skips `\>`, the rest of the line, the newline, and the next line's indentation.
    fn line_break(&mut self) {
        self.consume();
        self.matches(self.delimiter_stop);
        while matches!(self.c(), Some(' ') | Some('\t')) {
            self.consume();
        }
        if self.c().is_none() {
            self.error("Missing newline after newline escape <\\\\>".to_string());
            return;
        }
        if self.c() == Some('\r') {
            self.consume();
        }
        self.matches('\n');
        while matches!(self.c(), Some(' ') | Some('\t')) {
            self.consume();
        }
    }
}

pub fn is_id_letter(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '/'
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::error::ErrorBuffer;

    fn lex(input: &str) -> String {
        lex_with(input, ('<', '>'))
    }

    fn lex_with(input: &str, delimiters: (char, char)) -> String {
        let errors = ErrorManager::new(Arc::new(ErrorBuffer::new()));
        let origin = TemplateOrigin::default();
        let tokens = Lexer::new(input, delimiters, &errors, &origin).tokenize();
        tokens
            .iter()
            .filter(|t| !t.is(TokenType::Eof))
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[test]
    fn test_one_expr() {
        assert_eq!(lex("<name>"), "[0:0='<',<LDELIM>,1:0], [1:4='name',<ID>,1:1], [5:5='>',<RDELIM>,1:5]");
    }

    #[test]
    fn test_text_and_escapes() {
        assert_eq!(lex("hi \\<name>"), "[0:9='hi <name>',<TEXT>,1:0]");
        assert_eq!(lex("hi \\\\ foo"), "[0:8='hi \\ foo',<TEXT>,1:0]");
        assert_eq!(lex("hi \\x"), "[0:4='hi \\x',<TEXT>,1:0]");
    }

    #[test]
    fn test_string_keeps_quotes() {
        assert_eq!(
            lex("hi <foo(a=\">\\\"\")>"),
            "[0:2='hi ',<TEXT>,1:0], [3:3='<',<LDELIM>,1:3], [4:6='foo',<ID>,1:4], \
             [7:7='(',<LPAREN>,1:7], [8:8='a',<ID>,1:8], [9:9='=',<EQUALS>,1:9], \
             [10:14='\">\"\"',<STRING>,1:10], [15:15=')',<RPAREN>,1:15], [16:16='>',<RDELIM>,1:16]"
        );
    }

    #[test]
    fn test_subtemplate_args() {
        assert_eq!(
            lex("hi <names:{n | <n>}>"),
            "[0:2='hi ',<TEXT>,1:0], [3:3='<',<LDELIM>,1:3], [4:8='names',<ID>,1:4], \
             [9:9=':',<COLON>,1:9], [10:10='{',<LCURLY>,1:10], [11:11='n',<ID>,1:11], \
             [13:13='|',<PIPE>,1:13], [15:15='<',<LDELIM>,1:15], [16:16='n',<ID>,1:16], \
             [17:17='>',<RDELIM>,1:17], [18:18='}',<RCURLY>,1:18], [19:19='>',<RDELIM>,1:19]"
        );
    }

    #[test]
    fn test_subtemplate_without_args() {
        assert_eq!(
            lex("<{hi}>"),
            "[0:0='<',<LDELIM>,1:0], [1:1='{',<LCURLY>,1:1], [2:3='hi',<TEXT>,1:2], \
             [4:4='}',<RCURLY>,1:4], [5:5='>',<RDELIM>,1:5]"
        );
    }

    #[test]
    fn test_keywords_and_regions() {
        assert_eq!(
            lex("<if(!name)>works<endif>"),
            "[0:0='<',<LDELIM>,1:0], [1:2='if',<IF>,1:1], [3:3='(',<LPAREN>,1:3], \
             [4:4='!',<BANG>,1:4], [5:8='name',<ID>,1:5], [9:9=')',<RPAREN>,1:9], \
             [10:10='>',<RDELIM>,1:10], [11:15='works',<TEXT>,1:11], [16:16='<',<LDELIM>,1:16], \
             [17:21='endif',<ENDIF>,1:17], [22:22='>',<RDELIM>,1:22]"
        );
        assert_eq!(
            lex("<@r>foo<@end>"),
            "[0:0='<',<LDELIM>,1:0], [1:1='@',<AT>,1:1], [2:2='r',<ID>,1:2], \
             [3:3='>',<RDELIM>,1:3], [4:6='foo',<TEXT>,1:4], [7:7='<',<LDELIM>,1:7], \
             [8:11='@end',<END>,1:8], [12:12='>',<RDELIM>,1:12]"
        );
    }

    #[test]
    fn test_indent_and_newlines() {
        assert_eq!(
            lex("a\r\n  <x>\n"),
            "[0:0='a',<TEXT>,1:0], [1:2='\\n',<NEWLINE>,1:1], [3:4='  ',<INDENT>,2:0], \
             [5:5='<',<LDELIM>,2:2], [6:6='x',<ID>,2:3], [7:7='>',<RDELIM>,2:4], \
             [8:8='\\n',<NEWLINE>,2:5]"
        );
    }

    #[test]
    fn test_expression_escapes() {
        assert_eq!(lex("<\\n>"), "[0:2='\\n',<TEXT>,1:0]");
        assert_eq!(lex("<\\u0041>"), "[0:6='A',<TEXT>,1:0]");
        assert_eq!(lex("a<\\\\>\n   b"), "[0:0='a',<TEXT>,1:0], [9:9='b',<TEXT>,2:3]");
    }

    #[test]
    fn test_dollar_delimiters() {
        assert_eq!(
            lex_with("hi $name$", ('$', '$')),
            "[0:2='hi ',<TEXT>,1:0], [3:3='$',<LDELIM>,1:3], [4:7='name',<ID>,1:4], [8:8='$',<RDELIM>,1:8]"
        );
    }

    #[test]
    fn test_invalid_character_reported() {
        let buffer = Arc::new(ErrorBuffer::new());
        let errors = ErrorManager::new(buffer.clone());
        let origin = TemplateOrigin::default();
        Lexer::new("<a;&b>", ('<', '>'), &errors, &origin).tokenize();
        assert_eq!(buffer.to_string(), "1:4: invalid character 'b'\n");
    }

    #[test]
    fn test_bad_unicode_escape_skips_to_delimiter() {
        let buffer = Arc::new(ErrorBuffer::new());
        let errors = ErrorManager::new(buffer.clone());
        let origin = TemplateOrigin::default();
        let tokens = Lexer::new("<\\u00zz>x", ('<', '>'), &errors, &origin).tokenize();
        assert_eq!(buffer.to_string(), "1:5: invalid unicode char: 'z'\n");
        let texts: Vec<&str> = tokens
            .iter()
            .filter(|t| t.is(TokenType::Text))
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(texts, vec!["x"]);
    }
}
