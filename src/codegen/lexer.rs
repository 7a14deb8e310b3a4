//! Tokenizer for `.pp` program files
//!
//! Newlines are tokens because they separate attributes. Strings are lexed
//! into segments, and each `${ ... }` interpolation carries its own token
//! list for the parser.

use crate::protocol::{Diagnostic, Diagnostics, Pos, Range};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(String),
    Template(Vec<Segment>),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Equals,
    Comma,
    Dot,
    Colon,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Interpolation(Vec<Token>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: Pos,
    pub end: Pos,
}

struct Cursor {
    chars: Vec<char>,
    idx: usize,
    pos: Pos,
}

impl Cursor {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.idx + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.idx += 1;
        self.pos.byte += c.len_utf8() as u32;
        if c == '\n' {
            self.pos.line += 1;
            self.pos.column = 1;
        } else {
            self.pos.column += 1;
        }
        Some(c)
    }
}

struct Lexer<'d> {
    cur: Cursor,
    filename: String,
    diags: &'d mut Diagnostics,
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

impl Lexer<'_> {
    fn error(&mut self, summary: impl Into<String>, start: Pos) {
        let range = Range {
            filename: self.filename.clone(),
            start,
            end: self.cur.pos,
        };
        self.diags.push(Diagnostic::error(summary).at(range));
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.cur.peek(), self.cur.peek_at(1)) {
                (Some(' ' | '\t' | '\r'), _) => {
                    self.cur.bump();
                }
                (Some('#'), _) | (Some('/'), Some('/')) => {
                    while self.cur.peek().is_some_and(|c| c != '\n') {
                        self.cur.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.cur.pos;
                    self.cur.bump();
                    self.cur.bump();
                    loop {
                        match (self.cur.peek(), self.cur.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.cur.bump();
                                self.cur.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.cur.bump();
                            }
                            (None, _) => {
                                self.error("unterminated block comment", start);
                                break;
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    /// Lex until end of input, or until the `}` closing an interpolation.
    fn lex(&mut self, in_interpolation: bool) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        let opened_at = self.cur.pos;
        loop {
            self.skip_trivia();
            let start = self.cur.pos;
            let Some(c) = self.cur.peek() else {
                if in_interpolation {
                    self.error("unterminated interpolation", opened_at);
                } else {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        start,
                        end: start,
                    });
                }
                return tokens;
            };

            let kind = match c {
                '}' if in_interpolation && depth == 0 => {
                    self.cur.bump();
                    return tokens;
                }
                '\n' => {
                    self.cur.bump();
                    TokenKind::Newline
                }
                '"' => {
                    self.cur.bump();
                    TokenKind::Template(self.template(start))
                }
                c if c.is_ascii_digit()
                    || (c == '-' && self.cur.peek_at(1).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    TokenKind::Number(self.number())
                }
                c if is_ident_start(c) => {
                    let mut ident = String::new();
                    while let Some(c) = self.cur.peek().filter(|c| is_ident_char(*c)) {
                        ident.push(c);
                        self.cur.bump();
                    }
                    TokenKind::Ident(ident)
                }
                _ => {
                    self.cur.bump();
                    match c {
                        '{' => {
                            depth += 1;
                            TokenKind::LBrace
                        }
                        '}' => {
                            depth = depth.saturating_sub(1);
                            TokenKind::RBrace
                        }
                        '[' => TokenKind::LBracket,
                        ']' => TokenKind::RBracket,
                        '(' => TokenKind::LParen,
                        ')' => TokenKind::RParen,
                        '=' => TokenKind::Equals,
                        ',' => TokenKind::Comma,
                        '.' => TokenKind::Dot,
                        ':' => TokenKind::Colon,
                        other => {
                            self.error(format!("unexpected character '{}'", other), start);
                            continue;
                        }
                    }
                }
            };
            tokens.push(Token {
                kind,
                start,
                end: self.cur.pos,
            });
        }
    }

    fn number(&mut self) -> String {
        let mut text = String::new();
        if self.cur.peek() == Some('-') {
            text.push('-');
            self.cur.bump();
        }
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(c) = self.cur.peek() {
            let next_is_digit = self.cur.peek_at(1).is_some_and(|n| n.is_ascii_digit());
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == '.' && !seen_dot && !seen_exp && next_is_digit {
                seen_dot = true;
                text.push(c);
            } else if matches!(c, 'e' | 'E') && !seen_exp {
                seen_exp = true;
                text.push(c);
                if let Some(sign @ ('+' | '-')) = self.cur.peek_at(1) {
                    self.cur.bump();
                    text.push(sign);
                }
            } else {
                break;
            }
            self.cur.bump();
        }
        text
    }

    fn template(&mut self, start: Pos) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        loop {
            match self.cur.peek() {
                None | Some('\n') => {
                    self.error("unterminated string", start);
                    break;
                }
                Some('"') => {
                    self.cur.bump();
                    break;
                }
                Some('\\') => {
                    let escape_start = self.cur.pos;
                    self.cur.bump();
                    match self.cur.bump() {
                        Some('n') => literal.push('\n'),
                        Some('t') => literal.push('\t'),
                        Some('r') => literal.push('\r'),
                        Some('"') => literal.push('"'),
                        Some('\\') => literal.push('\\'),
                        Some('u') => {
                            let hex: String = (0..4).filter_map(|_| self.cur.bump()).collect();
                            match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                                Some(c) => literal.push(c),
                                None => self.error("invalid unicode escape", escape_start),
                            }
                        }
                        _ => self.error("invalid escape sequence", escape_start),
                    }
                }
                Some('$') if self.cur.peek_at(1) == Some('$') && self.cur.peek_at(2) == Some('{') => {
                    self.cur.bump();
                    self.cur.bump();
                    self.cur.bump();
                    literal.push_str("${");
                }
                Some('$') if self.cur.peek_at(1) == Some('{') => {
                    self.cur.bump();
                    self.cur.bump();
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let inner = self.lex(true);
                    segments.push(Segment::Interpolation(inner));
                }
                Some(c) => {
                    self.cur.bump();
                    literal.push(c);
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        segments
    }
}

/// Tokenize one file. The result always ends with `Eof`.
pub fn tokenize(filename: &str, src: &str, diags: &mut Diagnostics) -> Vec<Token> {
    let mut lexer = Lexer {
        cur: Cursor {
            chars: src.chars().collect(),
            idx: 0,
            pos: Pos {
                line: 1,
                column: 1,
                byte: 0,
            },
        },
        filename: filename.to_string(),
        diags,
    };
    lexer.lex(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut diags = Diagnostics::new();
        let tokens = tokenize("main.pp", src, &mut diags);
        assert!(diags.is_empty(), "{:?}", diags.iter().collect::<Vec<_>>());
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_a_block() {
        assert_eq!(
            kinds("resource b \"aws:s3:Bucket\" { # comment\n size = -1.5e3\n}"),
            [
                TokenKind::Ident("resource".into()),
                TokenKind::Ident("b".into()),
                TokenKind::Template(vec![Segment::Literal("aws:s3:Bucket".into())]),
                TokenKind::LBrace,
                TokenKind::Newline,
                TokenKind::Ident("size".into()),
                TokenKind::Equals,
                TokenKind::Number("-1.5e3".into()),
                TokenKind::Newline,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn interpolation_carries_its_own_tokens() {
        let toks = kinds(r#""arn:${bucket.arn}/$${x}""#);
        let TokenKind::Template(segments) = &toks[0] else {
            panic!("expected template");
        };
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Literal("arn:".into()));
        let Segment::Interpolation(inner) = &segments[1] else {
            panic!("expected interpolation");
        };
        let inner: Vec<_> = inner.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            inner,
            [
                TokenKind::Ident("bucket".into()),
                TokenKind::Dot,
                TokenKind::Ident("arn".into())
            ]
        );
        assert_eq!(segments[2], Segment::Literal("/${x}".into()));
    }

    #[test]
    fn positions_are_one_based() {
        let mut diags = Diagnostics::new();
        let tokens = tokenize("main.pp", "a =\n  b", &mut diags);
        let b = tokens.iter().find(|t| t.kind == TokenKind::Ident("b".into())).unwrap();
        assert_eq!((b.start.line, b.start.column, b.start.byte), (2, 3, 6));
    }

    #[test]
    fn bad_input_becomes_diagnostics() {
        let mut diags = Diagnostics::new();
        tokenize("main.pp", "a = @\nb = \"open", &mut diags);
        let summaries: Vec<_> = diags.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, ["unexpected character '@'", "unterminated string"]);
        assert_eq!(diags.iter().next().unwrap().subject.as_ref().unwrap().start.line, 1);
    }
}
