use crate::ast::{
    Args, Branch, Chunk, Element, Expr, ExprKind, ExprTag, IfStat, OptionAssign, Region, Subtemplate, TemplateRef,
};
use crate::compiler::bytecode::{RenderOption, FUNCS};
use crate::compiler::TemplateOrigin;
use crate::error::{ErrorManager, ErrorType};
use crate::lexer::token::{Token, TokenType};
use crate::misc::{replace_escapes, Interval};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyntaxError {
    Mismatched { at: usize, expected: TokenType },
    NoViableAlt { at: usize },
    /// `<` not followed by anything that starts an expression.
    BadExpression { at: usize },
}

type ParseResult<T> = Result<T, SyntaxError>;

/// Recursive-descent parser over a lexed template. Parsing stops at the first
/// syntax error, which is reported once; the caller then compiles an empty body.
pub struct Parser<'a> {
    tokens: Vec<Token>,
    p: usize,
    source: &'a str,
    errors: &'a ErrorManager,
    origin: &'a TemplateOrigin,
    conditional_depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, source: &'a str, errors: &'a ErrorManager, origin: &'a TemplateOrigin) -> Self {
        let mut tokens = tokens;
        if tokens.last().map_or(true, |t| !t.is(TokenType::Eof)) {
            let end = source.chars().count();
            tokens.push(Token::new(TokenType::Eof, String::new(), end, end, 1, 0));
        }
        Parser {
            tokens,
            p: 0,
            source,
            errors,
            origin,
            conditional_depth: 0,
        }
    }

    pub fn parse(mut self) -> Option<Chunk> {
        match self.template_and_eof() {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                self.report(e);
                None
            }
        }
    }

    fn report(&self, e: SyntaxError) {
        let (at, msg) = match e {
            SyntaxError::BadExpression { at: 0 } => (
                0,
                format!("this doesn't look like a template: \"{}\"", replace_escapes(self.source)),
            ),
            SyntaxError::BadExpression { at } => (at, "doesn't look like an expression".to_string()),
            SyntaxError::NoViableAlt { at } | SyntaxError::Mismatched { at, .. } if self.token(at).is(TokenType::Eof) => {
                (at, "premature EOF".to_string())
            }
            SyntaxError::NoViableAlt { at } => {
                (at, format!("'{}' came as a complete surprise to me", self.token(at).text))
            }
            SyntaxError::Mismatched { at, expected } => (
                at,
                format!("mismatched input '{}' expecting {}", self.token(at).text, expected.name()),
            ),
        };
        let t = self.token(at);
        let location = self.origin.locate(t.line, t.char_position);
        self.errors.compile_time_error(
            ErrorType::SyntaxError,
            self.origin.source_name.as_deref(),
            Some(location),
            vec![msg],
        );
    }

    fn token(&self, i: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[i.min(last)]
    }

    fn lt(&self, k: usize) -> &Token {
        self.token(self.p + k - 1)
    }

    fn la(&self, k: usize) -> TokenType {
        self.lt(k).token_type
    }

    fn consume(&mut self) -> Token {
        let t = self.lt(1).clone();
        if !t.is(TokenType::Eof) {
            self.p += 1;
        }
        t
    }

    fn expect(&mut self, expected: TokenType) -> ParseResult<Token> {
        if self.la(1) == expected {
            Ok(self.consume())
        } else {
            Err(SyntaxError::Mismatched { at: self.p, expected })
        }
    }

    fn no_viable_alt<T>(&self) -> ParseResult<T> {
        Err(SyntaxError::NoViableAlt { at: self.p })
    }

    /// Interval from char index `start` to the end of the last consumed token.
    fn span_from(&self, start: usize) -> Interval {
        let stop = if self.p == 0 { start } else { self.token(self.p - 1).stop };
        Interval::new(start, stop)
    }

    fn template_and_eof(&mut self) -> ParseResult<Chunk> {
        let chunk = self.template()?;
        self.expect(TokenType::Eof)?;
        Ok(chunk)
    }

    fn at_template_end(&self) -> bool {
        let k = if self.la(1) == TokenType::Indent { 2 } else { 1 };
        match self.la(k) {
            TokenType::Eof | TokenType::RCurly => true,
            TokenType::Ldelim => matches!(
                self.la(k + 1),
                TokenType::ElseIf | TokenType::Else | TokenType::EndIf | TokenType::RegionEnd
            ),
            _ => false,
        }
    }

    fn template(&mut self) -> ParseResult<Chunk> {
        let mut chunk = Vec::new();
        while !self.at_template_end() {
            if let Some(e) = self.element()? {
                chunk.push(e);
            }
        }
        Ok(chunk)
    }

    fn starts_region(&self, k: usize) -> bool {
        self.la(k) == TokenType::Ldelim
            && self.la(k + 1) == TokenType::At
            && self.la(k + 2) == TokenType::Id
            && self.la(k + 3) == TokenType::Rdelim
    }

    fn element(&mut self) -> ParseResult<Option<Element>> {
        let start_index = self.p;

        // a comment alone on its line disappears with its newline
        if self.lt(1).char_position == 0 {
            let k = if self.la(1) == TokenType::Indent { 2 } else { 1 };
            if self.la(k) == TokenType::Comment && self.la(k + 1) == TokenType::Newline {
                for _ in 0..=k {
                    self.consume();
                }
                return Ok(None);
            }
        }

        if self.la(1) == TokenType::Indent {
            let indent = self.lt(1).clone();
            if self.la(2) == TokenType::Ldelim && self.la(3) == TokenType::If {
                self.consume();
                return self.ifstat(Some(indent)).map(Some);
            }
            if self.starts_region(2) {
                self.consume();
                return self.region(Some(indent)).map(Some);
            }
            self.consume();
            return match self.single_element(start_index)? {
                Some(e) => Ok(Some(Element::Indented {
                    indent: indent.text.clone(),
                    interval: indent.interval(),
                    element: Box::new(e),
                })),
                None => Ok(Some(Element::Text {
                    text: indent.text.clone(),
                    interval: indent.interval(),
                })),
            };
        }
        if self.la(1) == TokenType::Ldelim && self.la(2) == TokenType::If {
            return self.ifstat(None).map(Some);
        }
        if self.starts_region(1) {
            return self.region(None).map(Some);
        }
        self.single_element(start_index)
    }

    fn single_element(&mut self, element_start: usize) -> ParseResult<Option<Element>> {
        match self.la(1) {
            TokenType::Ldelim => self.expr_tag(element_start).map(Some),
            TokenType::Text => {
                let t = self.consume();
                Ok(Some(Element::Text {
                    interval: t.interval(),
                    text: t.text,
                }))
            }
            TokenType::Newline => {
                let t = self.consume();
                Ok(Some(Element::Newline { interval: t.interval() }))
            }
            TokenType::Comment => {
                self.consume();
                Ok(None)
            }
            _ => self.no_viable_alt(),
        }
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.la(1),
            TokenType::Id
                | TokenType::String
                | TokenType::True
                | TokenType::False
                | TokenType::LCurly
                | TokenType::LBrack
                | TokenType::Lparen
                | TokenType::Super
                | TokenType::At
        )
    }

    fn expr_tag(&mut self, element_start: usize) -> ParseResult<Element> {
        let ldelim = self.expect(TokenType::Ldelim)?;
        if !self.starts_expression() {
            return Err(SyntaxError::BadExpression { at: element_start });
        }
        let expr = self.expr()?;
        let options = if self.la(1) == TokenType::Semi {
            self.consume();
            Some(self.expr_options()?)
        } else {
            None
        };
        self.expect(TokenType::Rdelim)?;
        Ok(Element::Expr(ExprTag {
            interval: self.span_from(ldelim.start),
            expr,
            options,
        }))
    }

    fn expr_options(&mut self) -> ParseResult<Vec<OptionAssign>> {
        let mut options = Vec::new();
        loop {
            if let Some(o) = self.option()? {
                options.push(o);
            }
            if self.la(1) != TokenType::Comma {
                return Ok(options);
            }
            self.consume();
        }
    }

    fn option(&mut self) -> ParseResult<Option<OptionAssign>> {
        let id = self.expect(TokenType::Id)?;
        let option = RenderOption::from_name(&id.text);
        let location = Some(self.origin.locate(id.line, id.char_position));
        let source_name = self.origin.source_name.as_deref();
        if option.is_none() {
            self.errors
                .compile_time_error(ErrorType::NoSuchOption, source_name, location, vec![id.text.clone()]);
        }
        if self.la(1) == TokenType::Equals {
            self.consume();
            let value = self.expr_no_comma()?;
            return Ok(Some(OptionAssign {
                option,
                value,
                interval: self.span_from(id.start),
            }));
        }
        match option {
            Some(o) => match o.default_value() {
                Some(default) => Ok(Some(OptionAssign {
                    option,
                    value: Expr::new(ExprKind::Str(default.to_string()), id.interval()),
                    interval: id.interval(),
                })),
                None => {
                    self.errors
                        .compile_time_error(ErrorType::NoDefaultValue, source_name, location, vec![id.text.clone()]);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn ifstat(&mut self, indent: Option<Token>) -> ParseResult<Element> {
        let first = indent.clone().unwrap_or_else(|| self.lt(1).clone());
        self.expect(TokenType::Ldelim)?;
        let keyword = self.expect(TokenType::If)?;
        let condition = self.paren_conditional()?;
        self.expect(TokenType::Rdelim)?;
        let indented = indent.is_some() && self.la(1) != TokenType::Newline;

        let body = self.template()?;
        let mut branches = vec![Branch {
            condition,
            body,
            keyword: keyword.interval(),
        }];
        let mut else_branch = None;
        let mut else_interval = None;
        loop {
            let k = if self.la(1) == TokenType::Indent { 2 } else { 1 };
            if self.la(k) != TokenType::Ldelim {
                break;
            }
            match self.la(k + 1) {
                TokenType::ElseIf if else_branch.is_none() => {
                    if k == 2 {
                        self.consume();
                    }
                    self.consume();
                    let keyword = self.consume();
                    let condition = self.paren_conditional()?;
                    self.expect(TokenType::Rdelim)?;
                    let body = self.template()?;
                    branches.push(Branch {
                        condition,
                        body,
                        keyword: keyword.interval(),
                    });
                }
                TokenType::Else if else_branch.is_none() => {
                    if k == 2 {
                        self.consume();
                    }
                    self.consume();
                    let keyword = self.consume();
                    self.expect(TokenType::Rdelim)?;
                    else_interval = Some(keyword.interval());
                    else_branch = Some(self.template()?);
                }
                _ => break,
            }
        }
        if self.la(1) == TokenType::Indent {
            self.consume();
        }
        self.expect(TokenType::Ldelim)?;
        self.expect(TokenType::EndIf)?;
        self.expect(TokenType::Rdelim)?;
        let interval = self.span_from(first.start);
        // a multi-line if owns the newline after its <endif>
        if self.la(1) == TokenType::Newline && self.lt(1).line != first.line {
            self.consume();
        }

        let stat = Element::If(IfStat {
            branches,
            else_branch,
            else_interval,
            interval,
        });
        Ok(wrap_indent(indent, indented, stat))
    }

    fn paren_conditional(&mut self) -> ParseResult<Expr> {
        self.expect(TokenType::Lparen)?;
        self.conditional_depth += 1;
        let c = self.conditional();
        self.conditional_depth -= 1;
        let c = c?;
        self.expect(TokenType::Rparen)?;
        Ok(c)
    }

    fn region(&mut self, indent: Option<Token>) -> ParseResult<Element> {
        let first = indent.clone().unwrap_or_else(|| self.lt(1).clone());
        self.expect(TokenType::Ldelim)?;
        self.expect(TokenType::At)?;
        let name = self.expect(TokenType::Id)?;
        self.expect(TokenType::Rdelim)?;
        let indented = indent.is_some() && self.la(1) != TokenType::Newline;

        let body = self.template()?;
        if self.la(1) == TokenType::Indent {
            self.consume();
        }
        self.expect(TokenType::Ldelim)?;
        self.expect(TokenType::RegionEnd)?;
        self.expect(TokenType::Rdelim)?;
        let interval = self.span_from(first.start);
        if self.la(1) == TokenType::Newline && self.lt(1).line != first.line {
            self.consume();
        }

        let region = Element::Region(Region {
            name: name.text,
            name_line: name.line,
            name_char_position: name.char_position,
            body,
            interval,
        });
        Ok(wrap_indent(indent, indented, region))
    }

    fn subtemplate(&mut self) -> ParseResult<Subtemplate> {
        let lc = self.expect(TokenType::LCurly)?;
        let mut args = Vec::new();
        if self.la(1) == TokenType::Id {
            loop {
                args.push(self.expect(TokenType::Id)?.text);
                if self.la(1) != TokenType::Comma {
                    break;
                }
                self.consume();
            }
            self.expect(TokenType::Pipe)?;
        }
        let saved = std::mem::replace(&mut self.conditional_depth, 0);
        let body = self.template();
        self.conditional_depth = saved;
        let body = body?;
        if self.la(1) == TokenType::Indent {
            self.consume();
        }
        self.expect(TokenType::RCurly)?;
        Ok(Subtemplate {
            args,
            body,
            interval: self.span_from(lc.start),
        })
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let start = self.lt(1).start;
        let mut left = self.and_conditional()?;
        while self.la(1) == TokenType::Or {
            self.consume();
            let right = self.and_conditional()?;
            left = Expr::new(ExprKind::Or(Box::new(left), Box::new(right)), self.span_from(start));
        }
        Ok(left)
    }

    fn and_conditional(&mut self) -> ParseResult<Expr> {
        let start = self.lt(1).start;
        let mut left = self.not_conditional()?;
        while self.la(1) == TokenType::And {
            self.consume();
            let right = self.not_conditional()?;
            left = Expr::new(ExprKind::And(Box::new(left), Box::new(right)), self.span_from(start));
        }
        Ok(left)
    }

    fn not_conditional(&mut self) -> ParseResult<Expr> {
        if self.la(1) == TokenType::Bang {
            let bang = self.consume();
            let operand = self.not_conditional()?;
            return Ok(Expr::new(ExprKind::Not(Box::new(operand)), self.span_from(bang.start)));
        }
        self.member_expr()
    }

    fn expr(&mut self) -> ParseResult<Expr> {
        self.map_expr()
    }

    fn map_expr(&mut self) -> ParseResult<Expr> {
        let start = self.lt(1).start;
        let first = self.member_expr()?;
        let mut zipped = false;
        let mut result = if self.la(1) == TokenType::Comma {
            let mut exprs = vec![first];
            while self.la(1) == TokenType::Comma {
                self.consume();
                exprs.push(self.member_expr()?);
            }
            self.expect(TokenType::Colon)?;
            let template = self.map_template_ref()?;
            zipped = true;
            Expr::new(ExprKind::Zip { exprs, template }, self.span_from(start))
        } else {
            first
        };
        while self.la(1) == TokenType::Colon {
            self.consume();
            let mut templates = vec![self.map_template_ref()?];
            if !zipped {
                while self.la(1) == TokenType::Comma {
                    self.consume();
                    templates.push(self.map_template_ref()?);
                }
            }
            result = Expr::new(
                ExprKind::Map {
                    target: Box::new(result),
                    templates,
                },
                self.span_from(start),
            );
        }
        Ok(result)
    }

    fn expr_no_comma(&mut self) -> ParseResult<Expr> {
        let start = self.lt(1).start;
        let target = self.member_expr()?;
        if self.la(1) != TokenType::Colon {
            return Ok(target);
        }
        self.consume();
        let template = self.map_template_ref()?;
        Ok(Expr::new(
            ExprKind::Map {
                target: Box::new(target),
                templates: vec![template],
            },
            self.span_from(start),
        ))
    }

    fn map_template_ref(&mut self) -> ParseResult<TemplateRef> {
        let start = self.lt(1).start;
        match (self.la(1), self.la(2)) {
            (TokenType::Id, TokenType::Lparen) => {
                let name = self.consume().text;
                self.consume();
                let args = self.args()?;
                self.expect(TokenType::Rparen)?;
                Ok(TemplateRef::Include {
                    name,
                    args,
                    interval: self.span_from(start),
                })
            }
            (TokenType::LCurly, _) => Ok(TemplateRef::Subtemplate(self.subtemplate()?)),
            (TokenType::Lparen, _) => {
                self.consume();
                let name = self.map_expr()?;
                self.expect(TokenType::Rparen)?;
                self.expect(TokenType::Lparen)?;
                let args = self.arg_expr_list_until_rparen()?;
                self.expect(TokenType::Rparen)?;
                Ok(TemplateRef::Indirect {
                    name: Box::new(name),
                    args,
                    interval: self.span_from(start),
                })
            }
            _ => self.no_viable_alt(),
        }
    }

    fn member_expr(&mut self) -> ParseResult<Expr> {
        let start = self.lt(1).start;
        let mut e = self.include_expr()?;
        while self.la(1) == TokenType::Dot {
            match self.la(2) {
                TokenType::Id => {
                    self.consume();
                    let name = self.consume().text;
                    e = Expr::new(ExprKind::Prop { target: Box::new(e), name }, self.span_from(start));
                }
                TokenType::Lparen => {
                    self.consume();
                    self.consume();
                    let property = self.map_expr()?;
                    self.expect(TokenType::Rparen)?;
                    e = Expr::new(
                        ExprKind::PropInd {
                            target: Box::new(e),
                            property: Box::new(property),
                        },
                        self.span_from(start),
                    );
                }
                _ => return Err(SyntaxError::NoViableAlt { at: self.p + 1 }),
            }
        }
        Ok(e)
    }

    fn include_expr(&mut self) -> ParseResult<Expr> {
        let start = self.lt(1).start;
        let kind = match (self.la(1), self.la(2)) {
            (TokenType::Id, TokenType::Lparen) if FUNCS.contains_key(self.lt(1).text.as_str()) => {
                let name = self.consume().text;
                self.consume();
                let arg = if self.la(1) == TokenType::Rparen {
                    None
                } else {
                    Some(Box::new(self.expr()?))
                };
                self.expect(TokenType::Rparen)?;
                ExprKind::Func { name, arg }
            }
            (TokenType::Super, TokenType::Dot) => {
                self.consume();
                self.consume();
                let name = self.expect(TokenType::Id)?.text;
                self.expect(TokenType::Lparen)?;
                let args = self.args()?;
                self.expect(TokenType::Rparen)?;
                ExprKind::IncludeSuper { name, args }
            }
            (TokenType::Id, TokenType::Lparen) => {
                let name = self.consume().text;
                self.consume();
                let args = self.args()?;
                self.expect(TokenType::Rparen)?;
                ExprKind::Include { name, args }
            }
            (TokenType::At, TokenType::Super) => {
                self.consume();
                self.consume();
                self.expect(TokenType::Dot)?;
                let name = self.expect(TokenType::Id)?.text;
                self.expect(TokenType::Lparen)?;
                self.expect(TokenType::Rparen)?;
                ExprKind::IncludeSuperRegion(name)
            }
            (TokenType::At, TokenType::Id) => {
                self.consume();
                let name = self.consume().text;
                self.expect(TokenType::Lparen)?;
                self.expect(TokenType::Rparen)?;
                ExprKind::IncludeRegion(name)
            }
            _ => return self.primary(),
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let start = self.lt(1).start;
        let kind = match self.la(1) {
            TokenType::Id if matches!(self.la(2), TokenType::Id | TokenType::String | TokenType::True | TokenType::False) => {
                return Err(SyntaxError::NoViableAlt { at: self.p + 1 });
            }
            TokenType::Id => ExprKind::Attr(self.consume().text),
            TokenType::String => ExprKind::Str(strip_quotes(&self.consume().text)),
            TokenType::True => {
                self.consume();
                ExprKind::Bool(true)
            }
            TokenType::False => {
                self.consume();
                ExprKind::Bool(false)
            }
            TokenType::LCurly => ExprKind::Subtemplate(self.subtemplate()?),
            TokenType::LBrack => self.list()?,
            TokenType::Lparen if self.conditional_depth > 0 => {
                self.consume();
                let c = self.conditional()?;
                self.expect(TokenType::Rparen)?;
                match c.kind {
                    ExprKind::Or(..) | ExprKind::And(..) | ExprKind::Not(_) | ExprKind::Bool(_) => return Ok(c),
                    _ if self.la(1) == TokenType::Lparen => {
                        self.consume();
                        let args = self.arg_expr_list_until_rparen()?;
                        self.expect(TokenType::Rparen)?;
                        ExprKind::IncludeInd { name: Box::new(c), args }
                    }
                    _ => ExprKind::ToStr(Box::new(c)),
                }
            }
            TokenType::Lparen => {
                self.consume();
                let e = self.expr()?;
                self.expect(TokenType::Rparen)?;
                if self.la(1) == TokenType::Lparen {
                    self.consume();
                    let args = self.arg_expr_list_until_rparen()?;
                    self.expect(TokenType::Rparen)?;
                    ExprKind::IncludeInd { name: Box::new(e), args }
                } else {
                    ExprKind::ToStr(Box::new(e))
                }
            }
            _ => return self.no_viable_alt(),
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    fn list(&mut self) -> ParseResult<ExprKind> {
        self.expect(TokenType::LBrack)?;
        let mut elements = Vec::new();
        if self.la(1) == TokenType::RBrack {
            self.consume();
            return Ok(ExprKind::List(elements));
        }
        loop {
            if matches!(self.la(1), TokenType::Comma | TokenType::RBrack) {
                elements.push(None);
            } else {
                elements.push(Some(self.expr_no_comma()?));
            }
            if self.la(1) != TokenType::Comma {
                break;
            }
            self.consume();
        }
        self.expect(TokenType::RBrack)?;
        Ok(ExprKind::List(elements))
    }

    fn args(&mut self) -> ParseResult<Args> {
        match (self.la(1), self.la(2)) {
            (TokenType::Rparen, _) => Ok(Args::None),
            (TokenType::Ellipsis, _) => {
                self.consume();
                Ok(Args::PassThrough)
            }
            (TokenType::Id, TokenType::Equals) => {
                let mut args = Vec::new();
                let mut pass_through = false;
                loop {
                    let name = self.expect(TokenType::Id)?;
                    self.expect(TokenType::Equals)?;
                    let value = self.expr_no_comma()?;
                    args.push((name.text.clone(), self.span_from(name.start), value));
                    if self.la(1) != TokenType::Comma {
                        break;
                    }
                    self.consume();
                    if self.la(1) == TokenType::Ellipsis {
                        self.consume();
                        pass_through = true;
                        break;
                    }
                }
                Ok(Args::Named { args, pass_through })
            }
            _ => Ok(Args::Positional(self.arg_expr_list()?)),
        }
    }

    fn arg_expr_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = vec![self.expr_no_comma()?];
        while self.la(1) == TokenType::Comma {
            self.consume();
            args.push(self.expr_no_comma()?);
        }
        Ok(args)
    }

    fn arg_expr_list_until_rparen(&mut self) -> ParseResult<Vec<Expr>> {
        if self.la(1) == TokenType::Rparen {
            return Ok(Vec::new());
        }
        self.arg_expr_list()
    }
}

fn wrap_indent(indent: Option<Token>, indented: bool, element: Element) -> Element {
    match indent {
        Some(t) if indented => Element::Indented {
            indent: t.text.clone(),
            interval: t.interval(),
            element: Box::new(element),
        },
        _ => element,
    }
}

fn strip_quotes(s: &str) -> String {
    let inner = s.strip_prefix('"').unwrap_or(s);
    inner.strip_suffix('"').unwrap_or(inner).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::error::ErrorBuffer;
    use crate::lexer::Lexer;

    fn parse(input: &str) -> (Option<Chunk>, String) {
        let buffer = Arc::new(ErrorBuffer::new());
        let errors = ErrorManager::new(buffer.clone());
        let origin = TemplateOrigin::default();
        let tokens = Lexer::new(input, ('<', '>'), &errors, &origin).tokenize();
        let chunk = Parser::new(tokens, input, &errors, &origin).parse();
        (chunk, buffer.to_string())
    }

    fn expr_of(input: &str) -> ExprKind {
        let (chunk, errors) = parse(input);
        assert_eq!(errors, "");
        match chunk.unwrap().into_iter().next() {
            Some(Element::Expr(tag)) => tag.expr.kind,
            other => panic!("expected an expression, got {:?}", other),
        }
    }

    #[test]
    fn test_text_and_attribute() {
        let (chunk, errors) = parse("hi <name>!");
        assert_eq!(errors, "");
        let chunk = chunk.unwrap();
        assert_eq!(chunk.len(), 3);
        assert!(matches!(&chunk[0], Element::Text { text, .. } if text == "hi "));
        assert!(matches!(&chunk[1], Element::Expr(ExprTag { expr: Expr { kind: ExprKind::Attr(n), .. }, .. }) if n == "name"));
    }

    #[test]
    fn test_rot_map_and_zip() {
        match expr_of("<a:t(),u()>") {
            ExprKind::Map { templates, .. } => assert_eq!(templates.len(), 2),
            other => panic!("{:?}", other),
        }
        match expr_of("<a,b:{x,y|<x><y>}>") {
            ExprKind::Zip { exprs, template: TemplateRef::Subtemplate(s) } => {
                assert_eq!(exprs.len(), 2);
                assert_eq!(s.args, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_functions_and_includes() {
        assert!(matches!(expr_of("<first(names)>"), ExprKind::Func { .. }));
        assert!(matches!(expr_of("<foo(names)>"), ExprKind::Include { .. }));
        assert!(matches!(expr_of("<super.foo()>"), ExprKind::IncludeSuper { .. }));
        assert!(matches!(expr_of("<@r()>"), ExprKind::IncludeRegion(_)));
        assert!(matches!(expr_of("<@super.r()>"), ExprKind::IncludeSuperRegion(_)));
        assert!(matches!(expr_of("<(name)()>"), ExprKind::IncludeInd { .. }));
        assert!(matches!(expr_of("<(name)>"), ExprKind::ToStr(_)));
        assert!(matches!(
            expr_of("<foo(x=a, ...)>"),
            ExprKind::Include { args: Args::Named { pass_through: true, .. }, .. }
        ));
    }

    #[test]
    fn test_list_with_empty_slots() {
        match expr_of("<[a,,\"b\"]>") {
            ExprKind::List(items) => {
                assert_eq!(items.len(), 3);
                assert!(items[1].is_none());
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_if_elseif_else() {
        let (chunk, errors) = parse("<if(a||!b)>x<elseif((c))>y<else>z<endif>");
        assert_eq!(errors, "");
        match &chunk.unwrap()[0] {
            Element::If(stat) => {
                assert_eq!(stat.branches.len(), 2);
                assert!(matches!(stat.branches[0].condition.kind, ExprKind::Or(..)));
                assert!(matches!(stat.branches[1].condition.kind, ExprKind::ToStr(_)));
                assert!(stat.else_branch.is_some());
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_parens_in_condition_group_boolean_operators() {
        let (chunk, errors) = parse("<if((a||b)&&(!c))>x<endif>");
        assert_eq!(errors, "");
        match &chunk.unwrap()[0] {
            Element::If(stat) => match &stat.branches[0].condition.kind {
                ExprKind::And(left, right) => {
                    assert!(matches!(left.kind, ExprKind::Or(..)));
                    assert!(matches!(right.kind, ExprKind::Not(_)));
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_indented_if_alone_on_line_drops_indent() {
        let (chunk, _) = parse("  <if(a)>\n  x\n  <endif>\n");
        assert!(matches!(&chunk.unwrap()[0], Element::If(_)));
        let (chunk, _) = parse("  <if(a)>x<endif>\n");
        assert!(matches!(&chunk.unwrap()[0], Element::Indented { .. }));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse("hi <> ").1, "1:3: doesn't look like an expression\n");
        assert_eq!(parse(" <> ").1, "1:0: this doesn't look like a template: \" <> \"\n");
        assert_eq!(parse("<a.b!>").1, "1:4: mismatched input '!' expecting RDELIM\n");
        assert_eq!(parse("hi <name:{x|[<a>]}").1, "1:18: premature EOF\n");
        assert_eq!(parse("<(t)(...)>").1, "1:5: '...' came as a complete surprise to me\n");
    }

    #[test]
    fn test_bad_option_reported_but_parsed() {
        let (chunk, errors) = parse("<a; bad=\"x\", separator>");
        assert_eq!(errors, "1:4: no such option: bad\n1:13: missing dictionary default value\n");
        match &chunk.unwrap()[0] {
            Element::Expr(tag) => {
                let options = tag.options.as_ref().unwrap();
                assert_eq!(options.len(), 1);
                assert_eq!(options[0].option, None);
            }
            other => panic!("{:?}", other),
        }
    }
}
