//! Group-file syntax: a header with optional `delimiters` and `import` lines
//! followed by template, alias, region and dictionary definitions.
//!
//! Errors never stop the load. Each one is reported to the group's listener
//! as a group compile-time message and parsing resumes at the next
//! definition.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::TemplateGroup;
use crate::compiler::{DefaultValue, FormalArgument, TemplateCompiler, TemplateOrigin, ANONYMOUS_NAME};
use crate::error::{ErrorManager, ErrorType};
use crate::misc::{trim_one_starting_newline, trim_one_trailing_newline, Coordinate};
use crate::value::{DictEntry, Dictionary, MapKey, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Id,
    /// `"..."`; `value` holds the body with `\"` resolved.
    Str,
    /// `<<...>>`
    BigString,
    /// `<%...%>`
    BigStringNoNl,
    /// `{...}`, braces included in `value`.
    Anon,
    LParen,
    RParen,
    Comma,
    Dot,
    Colon,
    Define,
    Assign,
    LBrack,
    RBrack,
    At,
    /// Unclosed construct; `text` is its opening delimiter.
    Error,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: Kind,
    /// Source text as it appears in error messages.
    text: String,
    value: String,
    line: usize,
    col: usize,
}

impl Token {
    fn at(&self) -> Coordinate {
        Coordinate::new(self.line, self.col)
    }

    fn is_id(&self, name: &str) -> bool {
        self.kind == Kind::Id && self.text == name
    }
}

struct GroupLexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    errors: &'a ErrorManager,
    source_name: &'a str,
}

impl<'a> GroupLexer<'a> {
    fn new(source: &str, errors: &'a ErrorManager, source_name: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 0,
            errors,
            source_name,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, col: usize, msg: String) {
        self.errors.group_syntax_error(
            ErrorType::SyntaxError,
            Some(self.source_name),
            Some(Coordinate::new(line, col)),
            vec![msg],
        );
    }

    fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let (start, line, col) = (self.pos, self.line, self.col);
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: Kind::Eof,
                    text: "<EOF>".to_string(),
                    value: String::new(),
                    line,
                    col,
                });
                return tokens;
            };
            let scanned = match c {
                '"' => self.string(),
                '<' if self.peek_at(1) == Some('<') => self.delimited(Kind::BigString, "<<", '>', "<<...>>"),
                '<' if self.peek_at(1) == Some('%') => self.delimited(Kind::BigStringNoNl, "<%", '%', "<%...%>"),
                '{' => self.anonymous(),
                c if c.is_ascii_alphabetic() || c == '_' => {
                    while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                        self.bump();
                    }
                    Some((Kind::Id, String::new()))
                }
                ':' if self.peek_at(1) == Some(':') && self.peek_at(2) == Some('=') => {
                    self.bump();
                    self.bump();
                    self.bump();
                    Some((Kind::Define, String::new()))
                }
                _ => {
                    self.bump();
                    let kind = match c {
                        '(' => Some(Kind::LParen),
                        ')' => Some(Kind::RParen),
                        ',' => Some(Kind::Comma),
                        '.' => Some(Kind::Dot),
                        ':' => Some(Kind::Colon),
                        '=' => Some(Kind::Assign),
                        '[' => Some(Kind::LBrack),
                        ']' => Some(Kind::RBrack),
                        '@' => Some(Kind::At),
                        _ => None,
                    };
                    if kind.is_none() {
                        self.error(line, col, format!("invalid character '{}'", c));
                    }
                    kind.map(|k| (k, String::new()))
                }
            };
            if let Some((kind, value)) = scanned {
                let text: String = if kind == Kind::Error {
                    value.clone()
                } else {
                    self.chars[start..self.pos].iter().collect()
                };
                tokens.push(Token {
                    kind,
                    text,
                    value,
                    line,
                    col,
                });
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    while self.peek().is_some() && !(self.peek() == Some('*') && self.peek_at(1) == Some('/')) {
                        self.bump();
                    }
                    self.bump();
                    self.bump();
                }
                _ => return,
            }
        }
    }

    /// `"..."`: `\"` is unescaped, every other escape pair is kept for the
    /// template lexer.
    fn string(&mut self) -> Option<(Kind, String)> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek() {
                None => {
                    self.error(self.line, self.col, "unterminated string".to_string());
                    return None;
                }
                Some('"') => {
                    self.bump();
                    return Some((Kind::Str, value));
                }
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some('"') => value.push('"'),
                        Some(c) => {
                            value.push('\\');
                            value.push(c);
                        }
                        None => value.push('\\'),
                    }
                }
                Some('\n') => {
                    self.error(self.line, self.col, "\\n in string".to_string());
                    value.push('\n');
                    self.bump();
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
    }

    /// `<<...>>` or `<%...%>`. The body ends at the first closing pair; an
    /// escaped close char (`\>`) is unescaped.
    fn delimited(&mut self, kind: Kind, open: &str, close: char, shape: &str) -> Option<(Kind, String)> {
        self.bump();
        self.bump();
        let mut value = String::new();
        loop {
            match (self.peek(), self.peek_at(1)) {
                (None, _) => {
                    self.error(self.line, self.col, format!("missing final '{}>' in {} template", close, shape));
                    return Some((Kind::Error, open.to_string()));
                }
                (Some(c), Some('>')) if c == close => {
                    self.bump();
                    self.bump();
                    return Some((kind, value));
                }
                (Some('\\'), Some(c)) if c == close => {
                    self.bump();
                    self.bump();
                    value.push(c);
                }
                (Some(c), _) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
    }

    /// `{...}` with nested braces; escaped braces don't count.
    fn anonymous(&mut self) -> Option<(Kind, String)> {
        let mut value = String::new();
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None => {
                    self.error(
                        self.line,
                        self.col,
                        "missing final '}' in {...} anonymous template".to_string(),
                    );
                    return Some((Kind::Error, "{".to_string()));
                }
                Some('\\') => {
                    value.push('\\');
                    self.bump();
                    if let Some(c) = self.bump() {
                        value.push(c);
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                return Some((Kind::Anon, value));
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Resolves `\n`, `\r`, `\t`, `\\` and `\"` in string values; other escape
/// pairs are kept as written.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

pub(crate) struct GroupParser<'g> {
    group: &'g TemplateGroup,
    source_name: String,
    tokens: Vec<Token>,
    pos: usize,
    errors: ErrorManager,
    import_dir: Option<PathBuf>,
}

impl<'g> GroupParser<'g> {
    pub(crate) fn new(group: &'g TemplateGroup, source_name: &str, source: &str) -> Self {
        let errors = group.error_manager();
        let tokens = GroupLexer::new(source, &errors, source_name).tokenize();
        Self {
            group,
            source_name: source_name.to_string(),
            tokens,
            pos: 0,
            errors,
            import_dir: None,
        }
    }

    /// Loads each `import` from `dir` as soon as it is parsed, so later
    /// definitions can override the imported regions.
    pub(crate) fn resolving_imports_from(mut self, dir: &Path) -> Self {
        self.import_dir = Some(dir.to_path_buf());
        self
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != Kind::Eof {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, kind: Kind) -> bool {
        if self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_at(&self, at: Coordinate, msg: String) {
        self.errors.group_syntax_error(
            ErrorType::SyntaxError,
            Some(self.source_name.as_str()),
            Some(at),
            vec![msg],
        );
    }

    fn no_viable(&self) {
        let token = self.peek();
        self.error_at(token.at(), format!("no viable alternative at input '{}'", token.text));
    }

    fn mismatched(&self, expecting: &str) {
        let token = self.peek();
        self.error_at(token.at(), format!("mismatched input '{}' expecting {}", token.text, expecting));
    }

    fn is_body(kind: Kind) -> bool {
        matches!(kind, Kind::Str | Kind::BigString | Kind::BigStringNoNl | Kind::Anon)
    }

    /// Drops tokens up to and including the next template body.
    fn skip_definition(&mut self) {
        while self.peek().kind != Kind::Eof {
            if Self::is_body(self.advance().kind) {
                return;
            }
        }
    }

    fn skip_line(&mut self, line: usize) {
        while self.peek().kind != Kind::Eof && self.peek().line == line {
            self.advance();
        }
    }

    pub(crate) fn parse(mut self) {
        if self.peek().is_id("delimiters") && self.peek_at(1).kind == Kind::Str {
            self.delimiters();
        }
        while self.peek().is_id("import") {
            self.advance();
            if self.peek().kind == Kind::Str {
                let token = self.advance();
                let import = unescape(&token.value);
                self.group.record_import(&import);
                if let Some(dir) = &self.import_dir {
                    self.group
                        .import_file(dir, &import, &self.source_name, Some(token.at()));
                }
            } else {
                self.mismatched("STRING");
                let line = self.advance().line;
                self.skip_line(line);
            }
        }
        loop {
            match self.peek().kind {
                Kind::Eof => return,
                Kind::At => self.region_definition(),
                Kind::Id => self.definition(),
                _ => {
                    let token = self.peek();
                    self.error_at(token.at(), format!("missing EndOfFile at '{}'", token.text));
                    return;
                }
            }
        }
    }

    fn delimiters(&mut self) {
        self.advance();
        let start = self.advance();
        if !self.accept(Kind::Comma) {
            self.mismatched("','");
        }
        if self.peek().kind != Kind::Str {
            self.mismatched("STRING");
            return;
        }
        let stop = self.advance();
        let single = |t: &Token| {
            let value = unescape(&t.value);
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => {
                    self.errors.group_syntax_error(
                        ErrorType::InvalidDelimiter,
                        Some(self.source_name.as_str()),
                        Some(t.at()),
                        vec![value.clone()],
                    );
                    None
                }
            }
        };
        if let (Some(start), Some(stop)) = (single(&start), single(&stop)) {
            self.group.set_delimiters(start, stop);
        }
    }

    fn definition(&mut self) {
        let name = self.peek().clone();
        match (self.peek_at(1).kind, self.peek_at(2).kind) {
            (Kind::LParen, _) => self.template_definition(),
            (Kind::Define, Kind::LBrack) => self.dictionary_definition(),
            (Kind::Define, Kind::Id) => {
                self.advance();
                self.advance();
                let target = self.advance();
                self.group
                    .define_alias(&name.text, &target.text, Some(self.source_name.as_str()), Some(name.at()));
            }
            _ => {
                self.error_at(name.at(), format!("garbled template definition starting at '{}'", name.text));
                self.skip_definition();
            }
        }
    }

    fn template_definition(&mut self) {
        let name = self.advance();
        self.advance();
        let (args, recovered) = self.formal_arguments();
        if !self.accept(Kind::RParen) && !recovered {
            self.mismatched("')'");
        }
        if !self.accept(Kind::Define) {
            self.mismatched("'::='");
            self.skip_definition();
            return;
        }
        if let Some((body, origin)) = self.template_body(true) {
            self.group
                .define(&name.text, Some(args), &body, origin, Some(name.at()));
        }
    }

    fn region_definition(&mut self) {
        let at = self.advance();
        let ids = (self.advance(), self.advance(), self.advance());
        let (enclosing, region) = match ids {
            (enclosing, dot, region) if enclosing.kind == Kind::Id && dot.kind == Kind::Dot && region.kind == Kind::Id => {
                (enclosing, region)
            }
            _ => {
                self.error_at(at.at(), "garbled region definition starting at '@'".to_string());
                self.skip_definition();
                return;
            }
        };
        if !(self.accept(Kind::LParen) && self.accept(Kind::RParen) && self.accept(Kind::Define)) {
            self.mismatched("'::='");
            self.skip_definition();
            return;
        }
        if let Some((body, origin)) = self.template_body(false) {
            self.group
                .define_region(&enclosing.text, &region.text, &body, origin, Some(at.at()));
        }
    }

    /// Parses `(a, b="x", c={...})` up to, not including, the `)`. The flag
    /// is set when an error already explained a missing `)`.
    fn formal_arguments(&mut self) -> (Vec<FormalArgument>, bool) {
        let mut args = Vec::new();
        if self.peek().kind == Kind::RParen {
            return (args, false);
        }
        if self.peek().kind != Kind::Id {
            self.no_viable();
            return (args, true);
        }
        let mut seen_optional = false;
        loop {
            if self.peek().kind == Kind::Id {
                let name = self.advance();
                if self.accept(Kind::Assign) {
                    seen_optional = true;
                    match self.default_value() {
                        Some(default) => args.push(FormalArgument::with_default(name.text, default)),
                        None => return (args, true),
                    }
                } else {
                    if seen_optional {
                        self.errors.group_syntax_error(
                            ErrorType::RequiredParameterAfterOptional,
                            Some(self.source_name.as_str()),
                            Some(self.peek().at()),
                            vec![],
                        );
                    }
                    args.push(FormalArgument::new(name.text));
                }
            } else {
                let token = self.peek();
                self.error_at(token.at(), format!("missing ID at '{}'", token.text));
            }
            match self.peek().kind {
                Kind::Comma => {
                    self.advance();
                }
                Kind::RParen => return (args, false),
                Kind::Id => {
                    self.no_viable();
                    while !matches!(self.peek().kind, Kind::RParen | Kind::Eof) {
                        self.advance();
                    }
                    return (args, false);
                }
                _ => {
                    self.no_viable();
                    return (args, true);
                }
            }
        }
    }

    fn default_value(&mut self) -> Option<DefaultValue> {
        let token = self.peek().clone();
        let value = match token.kind {
            Kind::Str => DefaultValue::Str(unescape(&token.value)),
            Kind::Anon => DefaultValue::template(token.value.clone()),
            Kind::Id if token.text == "true" => DefaultValue::Bool(true),
            Kind::Id if token.text == "false" => DefaultValue::Bool(false),
            Kind::LBrack if self.peek_at(1).kind == Kind::RBrack => {
                self.advance();
                DefaultValue::EmptyList
            }
            _ => {
                self.no_viable();
                return None;
            }
        };
        self.advance();
        Some(value)
    }

    /// Consumes a template body and returns its text and where it sits in
    /// the group source. `<<...>>` bodies lose one newline at each end when
    /// `trim` is set.
    fn template_body(&mut self, trim: bool) -> Option<(String, TemplateOrigin)> {
        let token = self.peek().clone();
        let mut origin = TemplateOrigin::named(self.source_name.clone());
        let body = match token.kind {
            Kind::Str | Kind::Anon => {
                origin.anchor = Some((token.at(), 1));
                if token.kind == Kind::Anon {
                    token.value[1..token.value.len() - 1].to_string()
                } else {
                    token.value.clone()
                }
            }
            Kind::BigString => {
                let mut body = token.value.as_str();
                origin.anchor = Some((token.at(), 2));
                if trim {
                    let trimmed = trim_one_starting_newline(body);
                    if trimmed.len() != body.len() {
                        origin.anchor = Some((Coordinate::new(token.line + 1, 0), 0));
                    }
                    body = trim_one_trailing_newline(trimmed);
                }
                body.to_string()
            }
            Kind::BigStringNoNl => {
                origin.anchor = Some((token.at(), 2));
                origin.no_newlines = true;
                token.value.clone()
            }
            Kind::Error => {
                self.no_viable();
                self.advance();
                return None;
            }
            _ => {
                self.error_at(token.at(), format!("missing template at '{}'", token.text));
                return None;
            }
        };
        self.advance();
        Some((body, origin))
    }

    fn dictionary_definition(&mut self) {
        let name = self.advance();
        self.advance();
        self.advance();
        let mut dict = Dictionary::new();
        while self.peek().kind != Kind::RBrack {
            let key = self.peek().clone();
            let is_default = key.is_id("default") && self.peek_at(1).kind == Kind::Colon;
            if key.kind != Kind::Str && !is_default {
                self.mismatched("STRING");
                break;
            }
            self.advance();
            if !self.accept(Kind::Colon) {
                self.mismatched("':'");
                break;
            }
            let entry = self.dictionary_value();
            if let Some(entry) = entry {
                if is_default {
                    dict.set_default(entry);
                } else {
                    dict.insert_entry(MapKey::Str(unescape(&key.value)), entry);
                }
            }
            if is_default || !self.accept(Kind::Comma) {
                break;
            }
        }
        if !self.accept(Kind::RBrack) {
            self.mismatched("']'");
            while !matches!(self.peek().kind, Kind::RBrack | Kind::Eof) {
                self.advance();
            }
            self.accept(Kind::RBrack);
        }
        self.group
            .define_dictionary_at(&name.text, dict, Some(self.source_name.as_str()), Some(name.at()));
    }

    fn dictionary_value(&mut self) -> Option<DictEntry> {
        let token = self.peek().clone();
        let entry = match token.kind {
            Kind::Comma => return Some(DictEntry::Value(Value::Null)),
            Kind::RBrack => {
                self.error_at(token.at(), format!("missing value for key at '{}'", token.text));
                return None;
            }
            Kind::Str => DictEntry::Value(Value::Str(unescape(&token.value))),
            Kind::Id if token.text == "true" => DictEntry::Value(Value::Bool(true)),
            Kind::Id if token.text == "false" => DictEntry::Value(Value::Bool(false)),
            Kind::Id if token.text == "key" => DictEntry::Key,
            Kind::LBrack if self.peek_at(1).kind == Kind::RBrack => {
                self.advance();
                DictEntry::Value(Value::List(Vec::new()))
            }
            Kind::BigString | Kind::BigStringNoNl | Kind::Anon => {
                let (body, origin) = self.template_body(true)?;
                let code = TemplateCompiler::new(self.group).compile(ANONYMOUS_NAME, None, &body, origin);
                self.group.define_implicit_templates(&code);
                return Some(DictEntry::Template(Arc::new(code)));
            }
            _ => {
                self.no_viable();
                self.advance();
                return None;
            }
        };
        self.advance();
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorBuffer;

    fn load(source: &str) -> (TemplateGroup, Arc<ErrorBuffer>) {
        let group = TemplateGroup::new();
        let errors = Arc::new(ErrorBuffer::new());
        group.set_listener(errors.clone());
        group.load_group_string("t.stg", source);
        (group, errors)
    }

    fn messages(errors: &ErrorBuffer) -> Vec<String> {
        errors.errors().iter().map(ToString::to_string).collect()
    }

    fn render(group: &TemplateGroup, name: &str) -> String {
        group.get_instance_of(name).unwrap().render()
    }

    #[test]
    fn test_string_and_bigstring_bodies() {
        let (group, errors) = load(
            "a() ::= \"x \\\"q\\\" y\"\n\
             b() ::= <<\nline1\nline2\n>>\n\
             c() ::= <%\n  one\n  two\n%>\n",
        );
        assert!(errors.is_empty(), "{}", errors);
        assert_eq!(render(&group, "a"), "x \"q\" y");
        assert_eq!(render(&group, "b"), "line1\nline2");
        assert_eq!(render(&group, "c"), "onetwo");
    }

    #[test]
    fn test_comments_are_skipped() {
        let (group, errors) = load("// leading\n/* block\n comment */ a() ::= \"x\" // trailing\n");
        assert!(errors.is_empty(), "{}", errors);
        assert_eq!(render(&group, "a"), "x");
    }

    #[test]
    fn test_delimiters_header() {
        let (group, errors) = load("delimiters \"$\", \"$\"\nt(x) ::= \"<$x$>\"\n");
        assert!(errors.is_empty(), "{}", errors);
        let mut t = group.get_instance_of("t").unwrap();
        t.add("x", "hi").unwrap();
        assert_eq!(t.render(), "<hi>");
    }

    #[test]
    fn test_imports_are_recorded() {
        let (group, errors) = load("import \"base.stg\"\nimport \"lib/x.stg\"\na() ::= \"\"\n");
        assert!(errors.is_empty(), "{}", errors);
        assert_eq!(group.import_names(), vec!["base.stg", "lib/x.stg"]);
    }

    #[test]
    fn test_default_arguments() {
        let (group, errors) = load(
            "t(a, b=\"x\\ty\", c={<a>!}, d=true, e=[]) ::= \"<a>|<b>|<c>|<if(d)>yes<endif>|<e>\"\n",
        );
        assert!(errors.is_empty(), "{}", errors);
        let mut t = group.get_instance_of("t").unwrap();
        t.add("a", "A").unwrap();
        assert_eq!(t.render(), "A|x\ty|A!|yes|");
    }

    #[test]
    fn test_alias() {
        let (group, errors) = load("a() ::= \"hi\"\nb ::= a\nc ::= missing\n");
        assert_eq!(render(&group, "b"), "hi");
        assert_eq!(messages(&errors), vec!["t.stg 3:0: cannot alias c to undefined template: missing"]);
    }

    #[test]
    fn test_dictionary_values() {
        let (group, errors) = load(
            "d ::= [\n\
               \"s\":\"a\\nb\",\n\
               \"t\":true,\n\
               \"e\":,\n\
               \"l\":[],\n\
               \"k\":key,\n\
               \"tpl\":<<[<x>]>>,\n\
               default:\"dflt\"\n\
             ]\n\
             t(x) ::= \"<d.s>|<d.t>|<d.e>|<d.l>|<d.k>|<d.tpl>|<d.other>\"\n",
        );
        assert!(errors.is_empty(), "{}", errors);
        let mut t = group.get_instance_of("t").unwrap();
        t.add("x", "X").unwrap();
        assert_eq!(t.render(), "a\nb|true|||k|[X]|dflt");
    }

    #[test]
    fn test_region_definition() {
        let (group, errors) = load(
            "a() ::= \"[<@r()>]\"\n\
             @a.r() ::= <<\nfoo\n>>\n\
             @b.r() ::= \"x\"\n",
        );
        assert_eq!(render(&group, "a"), "[foo]");
        assert_eq!(messages(&errors), vec!["t.stg 3:0: template /b doesn't have a region called r"]);
    }

    #[test]
    fn test_missing_template() {
        let (_, errors) = load("foo() ::= \n");
        assert_eq!(errors.to_string(), "t.stg 2:0: missing template at '<EOF>'\n");
    }

    #[test]
    fn test_unclosed_template() {
        let (_, errors) = load("foo() ::= {");
        assert_eq!(
            messages(&errors),
            vec![
                "t.stg 1:11: missing final '}' in {...} anonymous template",
                "t.stg 1:10: no viable alternative at input '{'",
            ]
        );
    }

    #[test]
    fn test_missing_close_paren() {
        let (_, errors) = load("foo( ::= << >>\n");
        assert_eq!(errors.to_string(), "t.stg 1:5: no viable alternative at input '::='\n");
    }

    #[test]
    fn test_newline_in_string() {
        let (_, errors) = load("foo() ::= \"\nfoo\"\n");
        assert_eq!(errors.to_string(), "t.stg 1:11: \\n in string\n");
    }

    #[test]
    fn test_garbled_definition_recovers() {
        let (group, errors) = load("foo) ::= << >>\nbar() ::= <<bar>>\n");
        assert_eq!(errors.to_string(), "t.stg 1:0: garbled template definition starting at 'foo'\n");
        assert_eq!(render(&group, "bar"), "bar");
    }

    #[test]
    fn test_bad_argument_lists() {
        let (_, errors) = load("foo(a,) ::= << >>\n");
        assert_eq!(messages(&errors), vec!["t.stg 1:6: missing ID at ')'"]);

        let (_, errors) = load("foo(a,,) ::= << >>\n");
        assert_eq!(
            messages(&errors),
            vec!["t.stg 1:6: missing ID at ','", "t.stg 1:7: missing ID at ')'"]
        );

        let (_, errors) = load("foo(a b) ::= << >>\n");
        assert_eq!(messages(&errors), vec!["t.stg 1:6: no viable alternative at input 'b'"]);
    }

    #[test]
    fn test_required_after_optional() {
        let (_, errors) = load("foo(a={hi}, b) ::= << >>\n");
        assert_eq!(
            messages(&errors),
            vec!["t.stg 1:13: Optional parameters must appear after all required parameters"]
        );
    }

    #[test]
    fn test_error_inside_template_is_positioned_in_group() {
        let (_, errors) = load("foo(a) ::= \"<a b>\"\n");
        assert_eq!(messages(&errors), vec!["t.stg 1:15: 'b' came as a complete surprise to me"]);
    }

    #[test]
    fn test_dictionary_errors() {
        let (_, errors) = load("d ::= [\"k\":]\n");
        assert_eq!(messages(&errors), vec!["t.stg 1:11: missing value for key at ']'"]);

        let (_, errors) = load("d ::= [\"k\":{dfkj}}]\n");
        assert_eq!(messages(&errors), vec!["t.stg 1:17: invalid character '}'"]);
    }

    #[test]
    fn test_unterminated_string() {
        let (_, errors) = load("f() ::= \"");
        assert_eq!(
            messages(&errors),
            vec!["t.stg 1:9: unterminated string", "t.stg 1:9: missing template at '<EOF>'"]
        );
    }

    #[test]
    fn test_import_not_string() {
        let (group, errors) = load("import Super.stg\nfoo() ::= <<>>\n");
        assert_eq!(errors.to_string(), "t.stg 1:7: mismatched input 'Super' expecting STRING\n");
        assert!(group.is_defined("foo"));
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a\\nb\\t\\\\\\q"), "a\nb\t\\\\q");
    }
}
