//! 规则语法树
//!
//! 规则字符串在策略构造时解析为 [`RuleClause`]，之后不再改变。

use crate::operators::{ArithOp, Comparator, is_combinator_key};
use crate::value::{RegexLiteral, Value};
use std::fmt;

/// 属性命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    User,
    Action,
    Environment,
    Resource,
}

impl Namespace {
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "user" => Some(Self::User),
            "action" => Some(Self::Action),
            "environment" => Some(Self::Environment),
            "resource" => Some(Self::Resource),
            _ => None,
        }
    }

    /// 主体侧命名空间在 check 时总是完全已知
    pub fn is_subject(&self) -> bool {
        !matches!(self, Self::Resource)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Action => "action",
            Self::Environment => "environment",
            Self::Resource => "resource",
        }
    }
}

/// 属性路径
///
/// `resource.age.$gt` 解析为命名空间 `Resource`、属性 `["age"]`、操作符键 `$gt`；
/// `'name.last'` 解析为命名空间 `Resource`、属性 `["name.last"]`。
#[derive(Debug, Clone, PartialEq)]
pub struct AttributePath {
    pub namespace: Namespace,
    pub segments: Vec<String>,
    /// 末尾的 `$` 操作符键
    pub key: Option<String>,
}

impl AttributePath {
    pub fn new(namespace: Namespace, segments: Vec<String>) -> Self {
        Self {
            namespace,
            segments,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn is_combinator(&self) -> bool {
        self.key.as_deref().is_some_and(is_combinator_key)
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace.as_str())?;
        for segment in &self.segments {
            write!(f, ".{}", segment)?;
        }
        if let Some(key) = &self.key {
            write!(f, ".{}", key)?;
        }
        Ok(())
    }
}

/// 右值表达式
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(AttributePath),
    Regex(RegexLiteral),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Binary {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: ArithOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

/// 编译后的规则子句
#[derive(Debug, Clone, PartialEq)]
pub struct RuleClause {
    /// 原始规则字符串
    pub source: String,
    pub path: AttributePath,
    pub comparator: Comparator,
    pub expr: Expr,
}

impl fmt::Display for RuleClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
