// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! The declaration indexer.
//!
//! Indexing turns one source file into one AST tree. It is a *skeleton*
//! parse: class, module, method, constant and instance-variable definitions
//! are recognized with byte-accurate spans; expression statements the
//! declaration table doesn't cover are skipped. That is all the downstream
//! passes need to answer workspace queries and attach diagnostics.
//!
//! The indexer recovers rather than aborts: errors accumulate alongside the
//! trees and the caller decides how to report them.

use miette::Diagnostic;
use thiserror::Error;

use crate::ast::{
    make, Assign, BlockArg, ClassDef, ClassDefKind, ConstantLit, EmptyTree, Expression, InsSeq,
    KeywordArg, Literal, LiteralValue, Local, LocalVariable, MethodDef, OptionalArg, RestArg,
    SelfExpr, UnresolvedIdent, VarKind,
};
use crate::loc::Loc;
use crate::symbol_table::{FileRef, SymbolRef};

/// An error encountered while indexing a file.
///
/// Indexing uses error recovery, so these do not stop the pipeline; the
/// caller converts them into diagnostics on the error queue.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{kind}")]
#[diagnostic()]
pub struct IndexError {
    /// The kind of indexing error.
    #[source]
    pub kind: IndexErrorKind,
    /// The source location of the error.
    #[label("here")]
    pub loc: Loc,
}

impl IndexError {
    fn new(kind: IndexErrorKind, loc: Loc) -> Self {
        Self { kind, loc }
    }
}

/// The kind of indexing error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexErrorKind {
    /// A definition was still open at end of file.
    #[error("unexpected end of file, expected `end`")]
    UnexpectedEof,

    /// An `end` with no matching definition.
    #[error("unexpected `end`")]
    UnexpectedEnd,

    /// A definition keyword without a usable name.
    #[error("expected a name after `{0}`")]
    MissingName(&'static str),

    /// A string literal was not terminated.
    #[error("unterminated string literal")]
    UnterminatedString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Str,
    Sep,
    Lt,
    Eq,
    LParen,
    RParen,
    Comma,
    Dot,
    Colon,
    ColonColon,
    Star,
    StarStar,
    Amp,
    Other,
}

#[derive(Debug, Clone, Copy)]
struct Token<'src> {
    kind: TokenKind,
    text: &'src str,
    start: u32,
    end: u32,
}

fn is_word_start(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '@' || c == '$'
}

fn is_word_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '?' || c == '!'
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "source files over 4GB are not supported"
)]
fn scan(source: &str, file: FileRef) -> (Vec<Token<'_>>, Vec<IndexError>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut chars = source.char_indices().peekable();

    let mut push = |kind, start: usize, end: usize| {
        tokens.push(Token {
            kind,
            text: &source[start..end],
            start: start as u32,
            end: end as u32,
        });
    };

    while let Some((i, c)) = chars.next() {
        match c {
            ' ' | '\t' | '\r' => {}
            '\n' | ';' => push(TokenKind::Sep, i, i + 1),
            '#' => {
                while let Some(&(_, c)) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut end = None;
                while let Some((j, c)) = chars.next() {
                    if c == '\\' {
                        chars.next();
                    } else if c == quote {
                        end = Some(j);
                        break;
                    }
                }
                match end {
                    Some(j) => push(TokenKind::Str, i + 1, j),
                    None => errors.push(IndexError::new(
                        IndexErrorKind::UnterminatedString,
                        Loc::new(file, i as u32, source.len() as u32),
                    )),
                }
            }
            ':' => {
                if chars.peek().is_some_and(|&(_, c)| c == ':') {
                    chars.next();
                    push(TokenKind::ColonColon, i, i + 2);
                } else {
                    push(TokenKind::Colon, i, i + 1);
                }
            }
            '=' => {
                if chars.peek().is_some_and(|&(_, c)| c == '=') {
                    chars.next();
                    push(TokenKind::Other, i, i + 2);
                } else {
                    push(TokenKind::Eq, i, i + 1);
                }
            }
            '*' => {
                if chars.peek().is_some_and(|&(_, c)| c == '*') {
                    chars.next();
                    push(TokenKind::StarStar, i, i + 2);
                } else {
                    push(TokenKind::Star, i, i + 1);
                }
            }
            '<' => push(TokenKind::Lt, i, i + 1),
            '(' => push(TokenKind::LParen, i, i + 1),
            ')' => push(TokenKind::RParen, i, i + 1),
            ',' => push(TokenKind::Comma, i, i + 1),
            '.' => push(TokenKind::Dot, i, i + 1),
            '&' => push(TokenKind::Amp, i, i + 1),
            c if is_word_start(c) => {
                let mut end = i + c.len_utf8();
                while let Some(&(j, c)) = chars.peek() {
                    let is_float_dot = c == '.'
                        && source[i..j].chars().next().is_some_and(char::is_numeric)
                        && source[j + 1..].chars().next().is_some_and(char::is_numeric);
                    if is_word_continue(c) || is_float_dot {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                push(TokenKind::Word, i, end);
            }
            _ => push(TokenKind::Other, i, i + 1),
        }
    }
    (tokens, errors)
}

/// Parses one file into its top-level statements plus recovered errors.
#[must_use]
pub fn parse_source(source: &str, file: FileRef) -> (Vec<Expression>, Vec<IndexError>) {
    let (tokens, mut errors) = scan(source, file);
    let mut parser = Parser {
        tokens,
        pos: 0,
        file,
        eof: u32::try_from(source.len()).unwrap_or(u32::MAX),
        errors: Vec::new(),
    };
    let stmts = parser.parse_statements(false);
    errors.append(&mut parser.errors);
    (stmts, errors)
}

/// Folds statements into a single expression: nothing becomes an
/// [`EmptyTree`], one statement stands alone, several become an [`InsSeq`].
#[must_use]
pub fn seq_of(stmts: Vec<Expression>, loc: Loc) -> Expression {
    let mut stmts = stmts;
    match stmts.len() {
        0 => Expression::EmptyTree(EmptyTree::new(loc)),
        1 => stmts.pop().unwrap_or_else(|| unreachable!()),
        _ => {
            let expr = stmts.pop().unwrap_or_else(|| unreachable!());
            Expression::InsSeq(InsSeq::new(loc, stmts, expr))
        }
    }
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
    file: FileRef,
    eof: u32,
    errors: Vec<IndexError>,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<Token<'src>> {
        self.tokens.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<Token<'src>> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eof_loc(&self) -> Loc {
        Loc::new(self.file, self.eof, self.eof)
    }

    fn token_loc(&self, tok: Token<'src>) -> Loc {
        Loc::new(self.file, tok.start, tok.end)
    }

    fn error(&mut self, kind: IndexErrorKind, loc: Loc) {
        self.errors.push(IndexError::new(kind, loc));
    }

    fn skip_seps(&mut self) {
        while self.peek().is_some_and(|t| t.kind == TokenKind::Sep) {
            self.pos += 1;
        }
    }

    fn skip_to_sep(&mut self) {
        while let Some(tok) = self.peek() {
            if tok.kind == TokenKind::Sep {
                break;
            }
            self.pos += 1;
        }
    }

    fn at_word(&self, text: &str) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::Word && t.text == text)
    }

    /// Parses statements until `end` (when `terminated`) or end of input.
    /// The closing `end` is consumed.
    fn parse_statements(&mut self, terminated: bool) -> Vec<Expression> {
        let mut stmts = Vec::new();
        loop {
            self.skip_seps();
            let Some(tok) = self.peek() else {
                if terminated {
                    self.error(IndexErrorKind::UnexpectedEof, self.eof_loc());
                }
                return stmts;
            };
            if tok.kind == TokenKind::Word && tok.text == "end" {
                if terminated {
                    self.pos += 1;
                } else {
                    self.error(IndexErrorKind::UnexpectedEnd, self.token_loc(tok));
                    self.pos += 1;
                    continue;
                }
                return stmts;
            }
            if let Some(stmt) = self.parse_statement(tok) {
                stmts.push(stmt);
            }
        }
    }

    fn parse_statement(&mut self, tok: Token<'src>) -> Option<Expression> {
        if tok.kind == TokenKind::Word {
            match tok.text {
                "class" => return self.parse_class_like(ClassDefKind::Class),
                "module" => return self.parse_class_like(ClassDefKind::Module),
                "def" => return self.parse_def(),
                _ => {}
            }
            // CONST = value / @ivar = value
            if self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Eq) {
                if tok.text.starts_with(char::is_uppercase) {
                    return Some(self.parse_const_assign(tok));
                }
                if tok.text.starts_with('@') {
                    return Some(self.parse_var_assign(tok));
                }
            }
        }
        self.skip_to_sep();
        None
    }

    /// `class Name [< Ancestor::Path] ... end` or `module Name ... end`.
    ///
    /// The singleton-class form (`class << self`) is parsed for balance but
    /// produces no declaration.
    fn parse_class_like(&mut self, kind: ClassDefKind) -> Option<Expression> {
        let keyword = self.bump()?;
        let start = keyword.start;

        if self.peek().is_some_and(|t| t.kind == TokenKind::Lt) {
            self.skip_to_sep();
            let _ = self.parse_statements(true);
            return None;
        }

        let Some(name) = self.parse_const_path() else {
            self.error(
                IndexErrorKind::MissingName(match kind {
                    ClassDefKind::Class => "class",
                    ClassDefKind::Module => "module",
                }),
                self.token_loc(keyword),
            );
            self.skip_to_sep();
            return None;
        };

        let mut ancestors = Vec::new();
        if kind == ClassDefKind::Class && self.peek().is_some_and(|t| t.kind == TokenKind::Lt) {
            self.pos += 1;
            if let Some(ancestor) = self.parse_const_path() {
                ancestors.push(ancestor);
            }
        }
        self.skip_to_sep();

        let rhs = self.parse_statements(true);
        let end = self.last_consumed_end();
        Some(Expression::ClassDef(ClassDef::new(
            Loc::new(self.file, start, end),
            SymbolRef::none(),
            name,
            ancestors,
            rhs,
            kind,
        )))
    }

    /// `def name(params) ... end`, optionally `def self.name`.
    fn parse_def(&mut self) -> Option<Expression> {
        let keyword = self.bump()?;
        let start = keyword.start;

        let is_self = self.at_word("self")
            && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Dot);
        if is_self {
            self.pos += 2;
        }

        let Some(name) = self.peek().filter(|t| t.kind == TokenKind::Word) else {
            self.error(IndexErrorKind::MissingName("def"), self.token_loc(keyword));
            self.skip_to_sep();
            return None;
        };
        self.pos += 1;

        let args = if self.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
            self.pos += 1;
            self.parse_params()
        } else {
            Vec::new()
        };
        self.skip_to_sep();

        let body_stmts = self.parse_statements(true);
        let end = self.last_consumed_end();
        let loc = Loc::new(self.file, start, end);
        Some(Expression::MethodDef(MethodDef::new(
            loc,
            SymbolRef::none(),
            name.text,
            args,
            seq_of(body_stmts, loc),
            is_self,
        )))
    }

    /// Parses a parenthesized parameter list; consumes the closing paren.
    fn parse_params(&mut self) -> Vec<Expression> {
        let mut params = Vec::new();
        loop {
            self.skip_seps();
            let Some(tok) = self.peek() else {
                self.error(IndexErrorKind::UnexpectedEof, self.eof_loc());
                return params;
            };
            match tok.kind {
                TokenKind::RParen => {
                    self.pos += 1;
                    return params;
                }
                TokenKind::Comma => {
                    self.pos += 1;
                }
                _ => {
                    if let Some(param) = self.parse_param(tok) {
                        params.push(param);
                    } else {
                        self.pos += 1;
                    }
                }
            }
        }
    }

    fn parse_param(&mut self, tok: Token<'src>) -> Option<Expression> {
        let loc = self.token_loc(tok);
        let local = |name: &str, loc: Loc| {
            Expression::Local(Local::new(loc, LocalVariable::new(name)))
        };
        match tok.kind {
            TokenKind::Star | TokenKind::StarStar => {
                self.pos += 1;
                let name = self.bump().filter(|t| t.kind == TokenKind::Word)?;
                let name_loc = self.token_loc(name);
                Some(Expression::RestArg(RestArg::new(
                    Loc::new(self.file, tok.start, name.end),
                    local(name.text, name_loc),
                )))
            }
            TokenKind::Amp => {
                self.pos += 1;
                let name = self.bump().filter(|t| t.kind == TokenKind::Word)?;
                let name_loc = self.token_loc(name);
                Some(Expression::BlockArg(BlockArg::new(
                    Loc::new(self.file, tok.start, name.end),
                    local(name.text, name_loc),
                )))
            }
            TokenKind::Word => {
                self.pos += 1;
                if self.peek().is_some_and(|t| t.kind == TokenKind::Colon) {
                    self.pos += 1;
                    let kwarg = Expression::KeywordArg(KeywordArg::new(loc, local(tok.text, loc)));
                    // A default value makes it optional: `key: 0`.
                    if self
                        .peek()
                        .is_some_and(|t| !matches!(t.kind, TokenKind::Comma | TokenKind::RParen))
                    {
                        let default = self.parse_primary();
                        return Some(Expression::OptionalArg(OptionalArg::new(loc, kwarg, default)));
                    }
                    return Some(kwarg);
                }
                if self.peek().is_some_and(|t| t.kind == TokenKind::Eq) {
                    self.pos += 1;
                    let default = self.parse_primary();
                    return Some(Expression::OptionalArg(OptionalArg::new(
                        loc,
                        local(tok.text, loc),
                        default,
                    )));
                }
                Some(local(tok.text, loc))
            }
            _ => None,
        }
    }

    /// `CONST = value`, the unresolved form the resolver turns into a
    /// constant definition.
    fn parse_const_assign(&mut self, tok: Token<'src>) -> Expression {
        self.pos += 2; // name, `=`
        let lhs = Expression::ConstantLit(ConstantLit::new(
            self.token_loc(tok),
            make::empty_tree(self.token_loc(tok)),
            tok.text,
        ));
        let rhs = self.parse_primary();
        let end = self.last_consumed_end();
        self.skip_to_sep();
        Expression::Assign(Assign::new(Loc::new(self.file, tok.start, end), lhs, rhs))
    }

    /// `@ivar = value` / `@@cvar = value`.
    fn parse_var_assign(&mut self, tok: Token<'src>) -> Expression {
        self.pos += 2; // name, `=`
        let kind = if tok.text.starts_with("@@") {
            VarKind::Class
        } else {
            VarKind::Instance
        };
        let lhs = Expression::UnresolvedIdent(UnresolvedIdent::new(
            self.token_loc(tok),
            kind,
            tok.text,
        ));
        let rhs = self.parse_primary();
        let end = self.last_consumed_end();
        self.skip_to_sep();
        Expression::Assign(Assign::new(Loc::new(self.file, tok.start, end), lhs, rhs))
    }

    /// Parses a `Name` or `Scope::Name` path into nested constant literals.
    fn parse_const_path(&mut self) -> Option<Expression> {
        let first = self
            .peek()
            .filter(|t| t.kind == TokenKind::Word && t.text.starts_with(char::is_uppercase))?;
        self.pos += 1;
        let mut expr = Expression::ConstantLit(ConstantLit::new(
            self.token_loc(first),
            make::empty_tree(self.token_loc(first)),
            first.text,
        ));
        let start = first.start;
        while self.peek().is_some_and(|t| t.kind == TokenKind::ColonColon) {
            let Some(segment) = self.peek_at(1).filter(|t| t.kind == TokenKind::Word) else {
                break;
            };
            self.pos += 2;
            expr = Expression::ConstantLit(ConstantLit::new(
                Loc::new(self.file, start, segment.end),
                expr,
                segment.text,
            ));
        }
        Some(expr)
    }

    /// Parses a single literal-ish value. Anything unrecognized yields an
    /// [`EmptyTree`] so declaration shapes survive arbitrary right-hand
    /// sides.
    fn parse_primary(&mut self) -> Expression {
        let Some(tok) = self.peek() else {
            return make::empty_tree(self.eof_loc());
        };
        let loc = self.token_loc(tok);
        match tok.kind {
            TokenKind::Str => {
                self.pos += 1;
                Expression::Literal(Literal::new(loc, LiteralValue::String(tok.text.into())))
            }
            TokenKind::Colon => {
                if let Some(word) = self.peek_at(1).filter(|t| t.kind == TokenKind::Word) {
                    self.pos += 2;
                    return Expression::Literal(Literal::new(
                        Loc::new(self.file, tok.start, word.end),
                        LiteralValue::Symbol(word.text.into()),
                    ));
                }
                self.pos += 1;
                make::empty_tree(loc)
            }
            TokenKind::Word => {
                if tok.text.starts_with(char::is_uppercase) {
                    return self
                        .parse_const_path()
                        .unwrap_or_else(|| make::empty_tree(loc));
                }
                self.pos += 1;
                match tok.text {
                    "true" => Expression::Literal(Literal::new(loc, LiteralValue::True)),
                    "false" => Expression::Literal(Literal::new(loc, LiteralValue::False)),
                    "nil" => Expression::Literal(Literal::new(loc, LiteralValue::Nil)),
                    "self" => Expression::SelfExpr(SelfExpr::new(loc, SymbolRef::none())),
                    text => {
                        if text.starts_with(|c: char| c.is_ascii_digit()) {
                            if let Ok(i) = text.parse::<i64>() {
                                return Expression::Literal(Literal::new(
                                    loc,
                                    LiteralValue::Integer(i),
                                ));
                            }
                            if let Ok(f) = text.parse::<f64>() {
                                return Expression::Literal(Literal::new(
                                    loc,
                                    LiteralValue::Float(f),
                                ));
                            }
                        }
                        let kind = if text.starts_with("@@") {
                            VarKind::Class
                        } else if text.starts_with('@') {
                            VarKind::Instance
                        } else if text.starts_with('$') {
                            VarKind::Global
                        } else {
                            VarKind::Local
                        };
                        Expression::UnresolvedIdent(UnresolvedIdent::new(loc, kind, text))
                    }
                }
            }
            _ => {
                self.pos += 1;
                make::empty_tree(loc)
            }
        }
    }

    fn last_consumed_end(&self) -> u32 {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(self.eof, |t| t.end)
    }
}
