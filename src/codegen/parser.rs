//! Recursive-descent parser for `.pp` program files
//!
//! The parser never stops at the first problem. Malformed input is reported
//! as a diagnostic, the offending line or block is skipped, and parsing
//! resumes, so one pass reports everything wrong with a file.

use super::ast::{
    Accessor, Attribute, ConfigBlock, Expr, Item, LocalBinding, OutputBlock, ResourceBlock,
    ResourceOptions, SourceFile, TemplatePart,
};
use super::lexer::{tokenize, Segment, Token, TokenKind};
use crate::protocol::{Diagnostic, Diagnostics, Pos, Range};

/// Attributes and nested blocks of one `{ ... }` body
#[derive(Debug, Default)]
struct Body {
    attributes: Vec<Attribute>,
    blocks: Vec<NestedBlock>,
}

#[derive(Debug)]
struct NestedBlock {
    kind: String,
    body: Body,
    range: Range,
}

struct Parser<'d> {
    tokens: Vec<Token>,
    idx: usize,
    filename: String,
    diags: &'d mut Diagnostics,
}

impl<'d> Parser<'d> {
    fn new(mut tokens: Vec<Token>, filename: &str, diags: &'d mut Diagnostics) -> Self {
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let end = tokens.last().map(|t| t.end).unwrap_or_default();
            tokens.push(Token {
                kind: TokenKind::Eof,
                start: end,
                end,
            });
        }
        Self {
            tokens,
            idx: 0,
            filename: filename.to_string(),
            diags,
        }
    }

    fn current(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.idx.min(last)]
    }

    fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    fn bump(&mut self) -> Token {
        let token = self.current().clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        token
    }

    fn range(&self, start: Pos, end: Pos) -> Range {
        Range {
            filename: self.filename.clone(),
            start,
            end,
        }
    }

    fn token_range(&self, token: &Token) -> Range {
        self.range(token.start, token.end)
    }

    fn last_end(&self) -> Pos {
        match self.idx {
            0 => self.current().start,
            i => self.tokens[i - 1].end,
        }
    }

    fn error_at(&mut self, summary: impl Into<String>, range: Range) {
        self.diags.push(Diagnostic::error(summary).at(range));
    }

    fn warn_at(&mut self, summary: impl Into<String>, range: Range) {
        self.diags.push(Diagnostic::warning(summary).at(range));
    }

    fn skip_newlines(&mut self) {
        while *self.peek() == TokenKind::Newline {
            self.bump();
        }
    }

    /// Skip to the end of the current line, stepping over balanced braces.
    fn recover_line(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                TokenKind::Eof => return,
                TokenKind::Newline if depth == 0 => return,
                TokenKind::RBrace if depth == 0 => return,
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                _ => {}
            }
            self.bump();
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> bool {
        if *self.peek() == kind {
            self.bump();
            true
        } else {
            let range = self.token_range(self.current());
            self.error_at(format!("expected {}", what), range);
            false
        }
    }

    fn parse_file(&mut self) -> Vec<Item> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek().clone() {
                TokenKind::Eof => break,
                TokenKind::Ident(keyword) => {
                    let token = self.bump();
                    if let Some(item) = self.parse_item(keyword, token) {
                        items.push(item);
                    }
                }
                _ => {
                    let range = self.token_range(self.current());
                    self.error_at("expected a block or a local value", range);
                    self.recover_line();
                    if *self.peek() == TokenKind::RBrace {
                        self.bump();
                    }
                }
            }
        }
        items
    }

    fn parse_item(&mut self, keyword: String, first: Token) -> Option<Item> {
        if *self.peek() == TokenKind::Equals {
            self.bump();
            let value = self.parse_expr();
            let range = self.range(first.start, self.last_end());
            return Some(Item::Local(LocalBinding {
                name: keyword,
                value,
                range,
            }));
        }

        let mut labels = Vec::new();
        loop {
            match self.peek().clone() {
                TokenKind::Ident(label) => {
                    self.bump();
                    labels.push(label);
                }
                TokenKind::Template(segments) => {
                    let token = self.bump();
                    match literal(&segments) {
                        Some(label) => labels.push(label),
                        None => {
                            let range = self.token_range(&token);
                            self.error_at("block labels cannot be interpolated", range);
                            labels.push(String::new());
                        }
                    }
                }
                _ => break,
            }
        }

        if *self.peek() != TokenKind::LBrace {
            let range = self.token_range(self.current());
            self.error_at(format!("expected '{{' to open the {} block", keyword), range);
            self.recover_line();
            return None;
        }
        let body = self.parse_body();
        let range = self.range(first.start, self.last_end());

        match keyword.as_str() {
            "config" => self.config_block(labels, body, range),
            "resource" => self.resource_block(labels, body, range),
            "output" => self.output_block(labels, body, range),
            other => {
                self.error_at(format!("unsupported block type '{}'", other), range);
                None
            }
        }
    }

    fn parse_body(&mut self) -> Body {
        let open = self.bump();
        let mut body = Body::default();
        loop {
            self.skip_newlines();
            match self.peek().clone() {
                TokenKind::RBrace => {
                    self.bump();
                    break;
                }
                TokenKind::Eof => {
                    let range = self.token_range(&open);
                    self.error_at("unclosed block", range);
                    break;
                }
                TokenKind::Ident(name) => {
                    let token = self.bump();
                    match self.peek() {
                        TokenKind::Equals => {
                            self.bump();
                            let value = self.parse_expr();
                            let range = self.range(token.start, self.last_end());
                            body.attributes.push(Attribute { name, value, range });
                        }
                        TokenKind::LBrace => {
                            let inner = self.parse_body();
                            let range = self.range(token.start, self.last_end());
                            body.blocks.push(NestedBlock {
                                kind: name,
                                body: inner,
                                range,
                            });
                        }
                        _ => {
                            let range = self.token_range(self.current());
                            self.error_at(format!("expected '=' after '{}'", name), range);
                            self.recover_line();
                        }
                    }
                }
                _ => {
                    let range = self.token_range(self.current());
                    self.error_at("expected an attribute", range);
                    self.recover_line();
                }
            }
        }
        body
    }

    fn one_label(&mut self, kind: &str, labels: &[String], expected: usize, range: &Range) -> bool {
        if labels.len() != expected {
            self.error_at(
                format!(
                    "{} block takes {} label{}, found {}",
                    kind,
                    expected,
                    if expected == 1 { "" } else { "s" },
                    labels.len()
                ),
                range.clone(),
            );
            return false;
        }
        true
    }

    fn reject_blocks(&mut self, kind: &str, blocks: Vec<NestedBlock>) {
        for block in blocks {
            self.error_at(
                format!("unsupported block '{}' in {}", block.kind, kind),
                block.range,
            );
        }
    }

    fn config_block(&mut self, labels: Vec<String>, body: Body, range: Range) -> Option<Item> {
        if labels.is_empty() || labels.len() > 2 {
            self.one_label("config", &labels, 2, &range);
            return None;
        }
        let mut labels = labels.into_iter();
        let name = labels.next().unwrap_or_default();
        let type_name = labels.next().unwrap_or_else(|| {
            self.diags.push(
                Diagnostic::warning(format!("config '{}' has no type; assuming string", name))
                    .at(range.clone()),
            );
            "string".to_string()
        });

        let mut default = None;
        let mut description = None;
        for attr in body.attributes {
            match attr.name.as_str() {
                "default" => default = Some(attr.value),
                "description" => description = attr.value.as_literal_str(),
                other => self.warn_at(
                    format!("unsupported config attribute '{}'", other),
                    attr.range,
                ),
            }
        }
        self.reject_blocks("config", body.blocks);
        Some(Item::Config(ConfigBlock {
            name,
            type_name,
            default,
            description,
            range,
        }))
    }

    fn resource_block(&mut self, labels: Vec<String>, body: Body, range: Range) -> Option<Item> {
        if !self.one_label("resource", &labels, 2, &range) {
            return None;
        }
        let mut labels = labels.into_iter();
        let name = labels.next().unwrap_or_default();
        let token = labels.next().unwrap_or_default();

        let mut options = ResourceOptions::default();
        let mut others = Vec::new();
        for block in body.blocks {
            if block.kind != "options" {
                others.push(block);
                continue;
            }
            for attr in block.body.attributes {
                let slot = match attr.name.as_str() {
                    "protect" => &mut options.protect,
                    "dependsOn" => &mut options.depends_on,
                    "parent" => &mut options.parent,
                    "provider" => &mut options.provider,
                    "ignoreChanges" => &mut options.ignore_changes,
                    other => {
                        self.warn_at(
                            format!("unsupported resource option '{}'", other),
                            attr.range,
                        );
                        continue;
                    }
                };
                *slot = Some(attr.value);
            }
            self.reject_blocks("options", block.body.blocks);
        }
        self.reject_blocks("resource", others);

        Some(Item::Resource(ResourceBlock {
            name,
            token,
            attributes: body.attributes,
            options,
            range,
        }))
    }

    fn output_block(&mut self, labels: Vec<String>, body: Body, range: Range) -> Option<Item> {
        if !self.one_label("output", &labels, 1, &range) {
            return None;
        }
        let name = labels.into_iter().next().unwrap_or_default();
        let mut value = None;
        for attr in body.attributes {
            if attr.name == "value" {
                value = Some(attr.value);
            } else {
                self.warn_at(format!("unsupported output attribute '{}'", attr.name), attr.range);
            }
        }
        self.reject_blocks("output", body.blocks);
        match value {
            Some(value) => Some(Item::Output(OutputBlock { name, value, range })),
            None => {
                self.error_at(format!("output '{}' has no value", name), range);
                None
            }
        }
    }

    fn parse_expr(&mut self) -> Expr {
        let token = self.bump();
        let range = self.token_range(&token);
        match token.kind {
            TokenKind::Number(n) => Expr::Number(n),
            TokenKind::Template(segments) => Expr::Template(self.template(segments)),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                _ if *self.peek() == TokenKind::LParen => self.call(name, token.start),
                _ => self.traversal(name, token.start),
            },
            TokenKind::LBracket => self.list(),
            TokenKind::LBrace => self.object(),
            other => {
                self.error_at(format!("unexpected {} in expression", describe(&other)), range);
                if other == TokenKind::Newline || other == TokenKind::RBrace {
                    // Leave the terminator for the enclosing body
                    self.idx -= 1;
                }
                Expr::Null
            }
        }
    }

    fn template(&mut self, segments: Vec<Segment>) -> Vec<TemplatePart> {
        let mut parts = Vec::with_capacity(segments.len());
        for segment in segments {
            match segment {
                Segment::Literal(s) => parts.push(TemplatePart::Literal(s)),
                Segment::Interpolation(tokens) => {
                    let mut inner = Parser::new(tokens, &self.filename, self.diags);
                    inner.skip_newlines();
                    let expr = inner.parse_expr();
                    inner.skip_newlines();
                    if *inner.peek() != TokenKind::Eof {
                        let range = inner.token_range(inner.current());
                        inner.error_at("unexpected tokens in interpolation", range);
                    }
                    parts.push(TemplatePart::Interpolation(expr));
                }
            }
        }
        parts
    }

    fn call(&mut self, name: String, start: Pos) -> Expr {
        self.bump();
        let mut args = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.peek(), TokenKind::RParen | TokenKind::Eof) {
                break;
            }
            args.push(self.parse_expr());
            self.skip_newlines();
            if *self.peek() == TokenKind::Comma {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen, "')' to close the call");
        let range = self.range(start, self.last_end());
        Expr::Call { name, args, range }
    }

    fn traversal(&mut self, root: String, start: Pos) -> Expr {
        let mut accessors = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.bump();
                    let token = self.bump();
                    match token.kind {
                        TokenKind::Ident(attr) => accessors.push(Accessor::Attr(attr)),
                        TokenKind::Number(n) => accessors.push(Accessor::Index(Expr::Number(n))),
                        _ => {
                            let range = self.token_range(&token);
                            self.error_at("expected an attribute name after '.'", range);
                            break;
                        }
                    }
                }
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.parse_expr();
                    self.expect(TokenKind::RBracket, "']' to close the index");
                    accessors.push(Accessor::Index(index));
                }
                _ => break,
            }
        }
        let range = self.range(start, self.last_end());
        Expr::Traversal {
            root,
            accessors,
            range,
        }
    }

    fn list(&mut self) -> Expr {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.peek(), TokenKind::RBracket | TokenKind::Eof) {
                break;
            }
            items.push(self.parse_expr());
            self.skip_newlines();
            if *self.peek() == TokenKind::Comma {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBracket, "']' to close the list");
        Expr::List(items)
    }

    fn object(&mut self) -> Expr {
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
                break;
            }
            let key_token = self.bump();
            let key = match &key_token.kind {
                TokenKind::Ident(k) => Some(k.clone()),
                TokenKind::Template(segments) => literal(segments),
                _ => None,
            };
            let Some(key) = key else {
                let range = self.token_range(&key_token);
                self.error_at("object keys must be names or plain strings", range);
                self.recover_line();
                continue;
            };
            if matches!(self.peek(), TokenKind::Equals | TokenKind::Colon) {
                self.bump();
            } else {
                let range = self.token_range(self.current());
                self.error_at(format!("expected '=' after object key '{}'", key), range);
                self.recover_line();
                continue;
            }
            let value = self.parse_expr();
            entries.push((key, value));
            if *self.peek() == TokenKind::Comma {
                self.bump();
            }
        }
        self.expect(TokenKind::RBrace, "'}' to close the object");
        Expr::Object(entries)
    }
}

fn literal(segments: &[Segment]) -> Option<String> {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(s) => out.push_str(s),
            Segment::Interpolation(_) => return None,
        }
    }
    Some(out)
}

fn describe(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::Ident(_) => "name",
        TokenKind::Number(_) => "number",
        TokenKind::Template(_) => "string",
        TokenKind::LBrace => "'{'",
        TokenKind::RBrace => "'}'",
        TokenKind::LBracket => "'['",
        TokenKind::RBracket => "']'",
        TokenKind::LParen => "'('",
        TokenKind::RParen => "')'",
        TokenKind::Equals => "'='",
        TokenKind::Comma => "','",
        TokenKind::Dot => "'.'",
        TokenKind::Colon => "':'",
        TokenKind::Newline => "end of line",
        TokenKind::Eof => "end of file",
    }
}

/// Parse one file, recording problems in `diags`.
pub fn parse_file(filename: &str, src: &str, diags: &mut Diagnostics) -> SourceFile {
    let tokens = tokenize(filename, src, diags);
    let mut parser = Parser::new(tokens, filename, diags);
    let items = parser.parse_file();
    SourceFile {
        name: filename.to_string(),
        items,
    }
}
