//! 组表达式
//!
//! 引用具名策略的布尔表达式，如 `(user AND location)OR(admin OR super_admin)`。
//! 优先级 NOT > AND > OR，括号改变优先级；两个操作数之间缺少连接符视为错误。

use crate::error::{PolicyError, Result};
use std::fmt;

/// 组表达式语法树
#[derive(Debug, Clone, PartialEq)]
pub enum GroupExpr {
    Policy(String),
    Not(Box<GroupExpr>),
    And(Box<GroupExpr>, Box<GroupExpr>),
    Or(Box<GroupExpr>, Box<GroupExpr>),
}

impl GroupExpr {
    /// 解析组表达式
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = ExprParser {
            source,
            tokens,
            pos: 0,
            depth: 0,
        };

        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(parser.error_at(
                token.offset,
                format!("意外的 '{}'，操作数之间缺少 AND / OR", token.kind),
            ));
        }

        Ok(expr)
    }

    /// 按首次出现顺序列出引用的策略名（去重）
    pub fn names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Policy(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            Self::Not(inner) => inner.collect_names(names),
            Self::And(lhs, rhs) | Self::Or(lhs, rhs) => {
                lhs.collect_names(names);
                rhs.collect_names(names);
            }
        }
    }

    /// 根据每个策略的适用性计算布尔结果
    pub fn evaluate(&self, applicable: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Self::Policy(name) => applicable(name),
            Self::Not(inner) => !inner.evaluate(applicable),
            Self::And(lhs, rhs) => {
                let (l, r) = (lhs.evaluate(applicable), rhs.evaluate(applicable));
                l && r
            }
            Self::Or(lhs, rhs) => {
                let (l, r) = (lhs.evaluate(applicable), rhs.evaluate(applicable));
                l || r
            }
        }
    }
}

impl fmt::Display for GroupExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(name) => write!(f, "{}", name),
            Self::Not(inner) => write!(f, "NOT {}", inner),
            Self::And(lhs, rhs) => write!(f, "({} AND {})", lhs, rhs),
            Self::Or(lhs, rhs) => write!(f, "({} OR {})", lhs, rhs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "{}", name),
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let offset = pos;

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        let kind = match c {
            '(' => {
                pos += 1;
                TokenKind::LParen
            }
            ')' => {
                pos += 1;
                TokenKind::RParen
            }
            c if is_name_char(c) => {
                while pos < chars.len() && is_name_char(chars[pos]) {
                    pos += 1;
                }
                let word: String = chars[offset..pos].iter().collect();
                match word.as_str() {
                    "AND" => TokenKind::And,
                    "OR" => TokenKind::Or,
                    "NOT" => TokenKind::Not,
                    _ => TokenKind::Ident(word),
                }
            }
            other => {
                return Err(PolicyError::Expression {
                    expression: source.to_string(),
                    offset,
                    message: format!("意外的字符 '{}'", other),
                });
            }
        };

        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

/// `NOT` 与括号的最大嵌套层数
const MAX_NESTING_DEPTH: usize = 128;

struct ExprParser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| &t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<GroupExpr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let rhs = self.parse_and()?;
            lhs = GroupExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<GroupExpr> {
        let mut lhs = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let rhs = self.parse_not()?;
            lhs = GroupExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<GroupExpr> {
        if self.depth >= MAX_NESTING_DEPTH {
            let offset = self
                .peek()
                .map(|t| t.offset)
                .unwrap_or_else(|| self.source.chars().count());
            return Err(self.error_at(offset, "嵌套层数超过上限"));
        }
        self.depth += 1;
        let expr = self.parse_not_inner();
        self.depth -= 1;
        expr
    }

    fn parse_not_inner(&mut self) -> Result<GroupExpr> {
        if self.eat(&TokenKind::Not) {
            let inner = self.parse_not()?;
            return Ok(GroupExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<GroupExpr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_at(self.source.chars().count(), "缺少策略名"));
        };

        match token.kind {
            TokenKind::Ident(name) => {
                self.pos += 1;
                Ok(GroupExpr::Policy(name))
            }
            TokenKind::LParen => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if !self.eat(&TokenKind::RParen) {
                    let offset = self
                        .peek()
                        .map(|t| t.offset)
                        .unwrap_or_else(|| self.source.chars().count());
                    return Err(self.error_at(offset, "缺少 ')'"));
                }
                Ok(inner)
            }
            other => Err(self.error_at(token.offset, format!("意外的 '{}'", other))),
        }
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> PolicyError {
        PolicyError::Expression {
            expression: self.source.to_string(),
            offset,
            message: message.into(),
        }
    }
}
