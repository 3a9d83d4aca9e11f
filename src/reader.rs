//! S 表达式读取器
//!
//! 词法：`(` `)`、`"..."`（支持 `\"` `\\`）、整数、浮点、symbol、
//! `?x` 局部变量（含 `?x:col`）、`?*x*` 全局变量、紧贴的 `=(` 即时求值标记、
//! `;` 行注释。

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use crate::common::{Result, TableError};
use crate::value::{Atom, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    Atom(Atom),
    /// `?name`，名字不含 `?`
    Variable(String),
    /// `?*name*`，名字不含 `?*` 与 `*`
    Global(String),
    List(Vec<SExpr>),
    /// `=(f args...)`：定义期立即求值
    Eval(Vec<SExpr>),
}

impl SExpr {
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Self::Atom(Atom::Symbol(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            Self::List(xs) => Some(xs),
            _ => None,
        }
    }

    /// 若为列表，返回其头部 symbol
    pub fn head(&self) -> Option<&str> {
        self.as_list()?.first()?.as_symbol()
    }

    /// 原子字面量 / 原子列表 → 常量值
    pub fn to_literal(&self) -> Option<Value> {
        match self {
            Self::Atom(a) => Some(Value::Atom(a.clone())),
            Self::List(xs) => xs.iter()
                .map(|x| match x { Self::Atom(a) => Some(a.clone()), _ => None })
                .collect::<Option<Vec<_>>>()
                .map(Value::Multifield),
            _ => None,
        }
    }
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, xs: &[SExpr]) -> fmt::Result {
            write!(f, "(")?;
            for (i, x) in xs.iter().enumerate() {
                if i > 0 { write!(f, " ")?; }
                write!(f, "{x}")?;
            }
            write!(f, ")")
        }
        match self {
            Self::Atom(a)     => write!(f, "{a}"),
            Self::Variable(v) => write!(f, "?{v}"),
            Self::Global(g)   => write!(f, "?*{g}*"),
            Self::List(xs)    => list(f, xs),
            Self::Eval(xs)    => { write!(f, "=")?; list(f, xs) }
        }
    }
}

// ── 词法 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    EvalParen,
    RParen,
    Atom(Atom),
    Variable(String),
    Global(String),
    Eof,
}

struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line:  usize,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';')
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input: input.chars().peekable(), line: 1 }
    }

    fn error(&self, message: impl Into<String>) -> TableError {
        TableError::Syntax { line: self.line, message: message.into() }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        while let Some(&c) = self.input.peek() {
            if c.is_whitespace() {
                self.advance();
            } else if c == ';' {
                while let Some(c) = self.advance() {
                    if c == '\n' { break; }
                }
            } else {
                break;
            }
        }
    }

    fn word(&mut self) -> String {
        let mut s = String::new();
        while let Some(&c) = self.input.peek() {
            if is_delimiter(c) { break; }
            s.push(c);
            self.advance();
        }
        s
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia();
        let Some(&c) = self.input.peek() else { return Ok(Token::Eof) };
        match c {
            '(' => { self.advance(); Ok(Token::LParen) }
            ')' => { self.advance(); Ok(Token::RParen) }
            '"' => { self.advance(); self.string() }
            _ => {
                let w = self.word();
                if w == "=" && self.input.peek() == Some(&'(') {
                    self.advance();
                    return Ok(Token::EvalParen);
                }
                self.classify(w)
            }
        }
    }

    fn string(&mut self) -> Result<Token> {
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(Token::Atom(Atom::Str(s))),
                Some('\\') => match self.advance() {
                    None => return Err(self.error("unterminated string")),
                    Some(c) => s.push(c),
                },
                Some(c) => s.push(c),
            }
        }
    }

    fn classify(&self, w: String) -> Result<Token> {
        if let Some(rest) = w.strip_prefix('?') {
            if let Some(inner) = rest.strip_prefix('*') {
                return match inner.strip_suffix('*') {
                    Some(name) if !name.is_empty() => Ok(Token::Global(name.into())),
                    _ => Err(self.error(format!("malformed global variable {w}"))),
                };
            }
            if rest.is_empty() {
                return Err(self.error("variable name expected after ?"));
            }
            return Ok(Token::Variable(rest.into()));
        }
        Ok(Token::Atom(number(&w).unwrap_or(Atom::Symbol(w))))
    }
}

fn number(w: &str) -> Option<Atom> {
    let body = w.strip_prefix(['+', '-']).unwrap_or(w);
    let first = body.chars().next()?;
    if !(first.is_ascii_digit() || first == '.') {
        return None;
    }
    if let Ok(i) = w.parse::<i64>() {
        return Some(Atom::Integer(i));
    }
    w.parse::<f64>().ok().map(Atom::Float)
}

// ── 语法 ──────────────────────────────────────────────────────────────────────

struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    fn form(&mut self) -> Result<Option<SExpr>> {
        match self.lexer.next_token()? {
            Token::Eof         => Ok(None),
            Token::RParen      => Err(self.lexer.error("unexpected )")),
            Token::Atom(a)     => Ok(Some(SExpr::Atom(a))),
            Token::Variable(v) => Ok(Some(SExpr::Variable(v))),
            Token::Global(g)   => Ok(Some(SExpr::Global(g))),
            Token::LParen      => Ok(Some(SExpr::List(self.items()?))),
            Token::EvalParen   => Ok(Some(SExpr::Eval(self.items()?))),
        }
    }

    fn items(&mut self) -> Result<Vec<SExpr>> {
        let mut items = Vec::new();
        loop {
            match self.lexer.next_token()? {
                Token::Eof         => return Err(self.lexer.error("unexpected end of input, missing )")),
                Token::RParen      => return Ok(items),
                Token::Atom(a)     => items.push(SExpr::Atom(a)),
                Token::Variable(v) => items.push(SExpr::Variable(v)),
                Token::Global(g)   => items.push(SExpr::Global(g)),
                Token::LParen      => items.push(SExpr::List(self.items()?)),
                Token::EvalParen   => items.push(SExpr::Eval(self.items()?)),
            }
        }
    }
}

/// 读取全部顶层形式
pub fn read_all(src: &str) -> Result<Vec<SExpr>> {
    let mut parser = Parser { lexer: Lexer::new(src) };
    let mut forms = Vec::new();
    while let Some(f) = parser.form()? {
        forms.push(f);
    }
    Ok(forms)
}

/// 读取恰好一个形式
pub fn read_one(src: &str) -> Result<SExpr> {
    let mut parser = Parser { lexer: Lexer::new(src) };
    let first = parser.form()?
        .ok_or_else(|| parser.lexer.error("expected an expression"))?;
    if parser.form()?.is_some() {
        return Err(parser.lexer.error("expected a single expression"));
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_atoms_and_variables() {
        let forms = read_all(r#"foo "a \"q\"" 12 -3 1.5 ?x ?a:balance ?*count* + -"#).unwrap();
        assert_eq!(forms, vec![
            SExpr::Atom(Atom::symbol("foo")),
            SExpr::Atom(Atom::string("a \"q\"")),
            SExpr::Atom(Atom::Integer(12)),
            SExpr::Atom(Atom::Integer(-3)),
            SExpr::Atom(Atom::Float(1.5)),
            SExpr::Variable("x".into()),
            SExpr::Variable("a:balance".into()),
            SExpr::Global("count".into()),
            SExpr::Atom(Atom::symbol("+")),
            SExpr::Atom(Atom::symbol("-")),
        ]);
    }

    #[test]
    fn eval_marker_requires_adjacent_paren() {
        let f = read_one("(a =(+ 1 2) = (b))").unwrap();
        let items = f.as_list().unwrap();
        assert!(matches!(&items[1], SExpr::Eval(xs) if xs.len() == 3));
        assert_eq!(items[2], SExpr::Atom(Atom::symbol("=")));
        assert!(matches!(&items[3], SExpr::List(_)));
    }

    #[test]
    fn comments_and_lines() {
        let err = read_all("; header\n(a\n b").unwrap_err();
        assert!(matches!(err, TableError::Syntax { line: 3, .. }));
        assert!(read_one(")").is_err());
        assert!(read_one("a b").is_err());
    }

    #[test]
    fn malformed_global_is_rejected() {
        assert!(read_one("?*x").is_err());
        assert!(read_one("?").is_err());
    }
}
