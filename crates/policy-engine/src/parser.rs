//! 规则字符串解析器
//!
//! 将 `path comparator expr` 形式的规则字符串解析为 [`RuleClause`]。
//! 解析只在策略构造时执行一次。

use crate::ast::{AttributePath, Expr, Namespace, RuleClause};
use crate::error::{PolicyError, Result};
use crate::operators::{ArithOp, Comparator, is_combinator_key};
use crate::value::{RegexLiteral, Value};

/// 解析单条规则
pub fn parse_rule(source: &str) -> Result<RuleClause> {
    RuleParser::new(source).parse_clause()
}

/// 路径所处位置：左值允许末尾操作符键，右值不允许
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathPosition {
    Assignment,
    Value,
}

struct RawSegment {
    name: String,
    quoted: bool,
    offset: usize,
}

/// 括号、数组、对象的最大嵌套层数
const MAX_NESTING_DEPTH: usize = 128;

struct RuleParser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl<'a> RuleParser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn parse_clause(mut self) -> Result<RuleClause> {
        self.skip_ws();
        let path = self.parse_path(PathPosition::Assignment)?;

        self.skip_ws();
        let comparator_offset = self.pos;
        let comparator = self.parse_comparator()?;
        if path.key.is_some() && comparator != Comparator::Eq {
            return Err(self.error_at(comparator_offset, "操作符键只能使用 '=' 赋值"));
        }

        self.skip_ws();
        let expr = self.parse_arith()?;

        self.skip_ws();
        if let Some(c) = self.peek() {
            return Err(self.error(format!("多余的字符 '{}'", c)));
        }

        Ok(RuleClause {
            source: self.source.to_string(),
            path,
            comparator,
            expr,
        })
    }

    // ==================== 路径 ====================

    fn parse_path(&mut self, position: PathPosition) -> Result<AttributePath> {
        let start = self.pos;
        let mut raw = vec![self.parse_segment(true)?];

        while self.peek() == Some('.') {
            self.pos += 1;
            raw.push(self.parse_segment(false)?);
        }

        let (namespace, rest) = match raw.first() {
            Some(first) if !first.quoted => match Namespace::from_segment(&first.name) {
                Some(ns) => (ns, &raw[1..]),
                None => (Namespace::Resource, &raw[..]),
            },
            _ => (Namespace::Resource, &raw[..]),
        };

        let mut segments = Vec::with_capacity(rest.len());
        let mut key = None;

        for (i, segment) in rest.iter().enumerate() {
            let is_operator = !segment.quoted && segment.name.starts_with('$');
            if !is_operator {
                segments.push(segment.name.clone());
                continue;
            }

            if position == PathPosition::Value {
                return Err(self.error_at(
                    segment.offset,
                    format!("值表达式中不允许操作符键 '{}'", segment.name),
                ));
            }
            if i + 1 != rest.len() {
                return Err(self.error_at(
                    segment.offset,
                    format!("操作符键 '{}' 只能出现在路径末尾", segment.name),
                ));
            }
            key = Some(segment.name.clone());
        }

        if position == PathPosition::Assignment {
            match &key {
                None if segments.is_empty() => {
                    return Err(self.error_at(start, "缺少属性名"));
                }
                Some(k) if segments.is_empty() && !is_combinator_key(k) => {
                    return Err(self.error_at(start, format!("操作符键 '{}' 缺少所属属性", k)));
                }
                _ => {}
            }
        }

        Ok(AttributePath {
            namespace,
            segments,
            key,
        })
    }

    fn parse_segment(&mut self, first: bool) -> Result<RawSegment> {
        let offset = self.pos;
        match self.peek() {
            Some(q @ ('\'' | '"')) => {
                let name = self.parse_string(q)?;
                Ok(RawSegment {
                    name,
                    quoted: true,
                    offset,
                })
            }
            Some(c) if is_ident_char(c) && !(first && c.is_ascii_digit()) => {
                let name = self.take_while(is_ident_char);
                Ok(RawSegment {
                    name,
                    quoted: false,
                    offset,
                })
            }
            _ => Err(self.error("无效的属性路径")),
        }
    }

    fn parse_comparator(&mut self) -> Result<Comparator> {
        let two: String = self.chars.iter().skip(self.pos).take(2).collect();
        let (comparator, len) = match two.as_str() {
            ">=" => (Comparator::Gte, 2),
            "<=" => (Comparator::Lte, 2),
            "!=" => (Comparator::Ne, 2),
            _ => match self.peek() {
                Some('=') => (Comparator::Eq, 1),
                Some('>') => (Comparator::Gt, 1),
                Some('<') => (Comparator::Lt, 1),
                _ => return Err(self.error("缺少比较符")),
            },
        };
        self.pos += len;
        Ok(comparator)
    }

    // ==================== 表达式 ====================

    fn parse_arith(&mut self) -> Result<Expr> {
        self.parse_binary(1)
    }

    /// 优先级爬升，左结合
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr> {
        let mut lhs = self.parse_primary()?;

        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some('+') => ArithOp::Add,
                Some('-') => ArithOp::Sub,
                Some('*') => ArithOp::Mul,
                Some('/') => ArithOp::Div,
                _ => break,
            };
            if op.precedence() < min_precedence {
                break;
            }

            self.pos += 1;
            self.skip_ws();
            let rhs = self.parse_binary(op.precedence() + 1)?;
            lhs = Expr::binary(op, lhs, rhs);
        }

        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error("嵌套层数超过上限"));
        }
        self.depth += 1;
        let expr = self.parse_primary_inner();
        self.depth -= 1;
        expr
    }

    fn parse_primary_inner(&mut self) -> Result<Expr> {
        self.skip_ws();
        let Some(c) = self.peek() else {
            return Err(self.error("缺少值表达式"));
        };

        match c {
            '(' => {
                self.pos += 1;
                self.skip_ws();
                let expr = self.parse_arith()?;
                self.skip_ws();
                self.expect(')')?;
                Ok(expr)
            }
            '\'' | '"' => Ok(Expr::Literal(Value::String(self.parse_string(c)?))),
            '/' => self.parse_regex(),
            '[' => self.parse_array(),
            '{' => self.parse_object(),
            '-' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit() || n == '.') => {
                self.parse_number()
            }
            c if c.is_ascii_digit() => self.parse_number(),
            '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => self.parse_number(),
            c if is_ident_char(c) => self.parse_word(),
            other => Err(self.error(format!("意外的字符 '{}'", other))),
        }
    }

    /// 关键字字面量或属性路径
    fn parse_word(&mut self) -> Result<Expr> {
        let start = self.pos;
        let word = self.take_while(is_ident_char);
        if self.peek() != Some('.') {
            let literal = match word.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                "null" => Some(Value::Null),
                _ => None,
            };
            if let Some(value) = literal {
                return Ok(Expr::Literal(value));
            }
        }

        self.pos = start;
        Ok(Expr::Path(self.parse_path(PathPosition::Value)?))
    }

    fn parse_number(&mut self) -> Result<Expr> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        self.take_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            self.pos += 1;
            self.take_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some('+' | '-')) {
                self.pos += 1;
            }
            self.take_while(|c| c.is_ascii_digit());
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(|n| Expr::Literal(Value::Number(n)))
            .map_err(|_| self.error_at(start, format!("无效的数字 '{}'", text)))
    }

    fn parse_string(&mut self, quote: char) -> Result<String> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();

        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                c if c == quote => return Ok(out),
                '\\' => {
                    let Some(escaped) = self.peek() else { break };
                    self.pos += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                other => out.push(other),
            }
        }

        Err(self.error_at(start, "字符串未闭合"))
    }

    /// `/pattern/flags`，模式原样保留（包括转义符）
    fn parse_regex(&mut self) -> Result<Expr> {
        let start = self.pos;
        self.pos += 1;
        let mut pattern = String::new();
        let mut in_class = false;

        loop {
            let Some(c) = self.peek() else {
                return Err(self.error_at(start, "正则表达式未闭合"));
            };
            self.pos += 1;
            match c {
                '\\' => {
                    pattern.push(c);
                    if let Some(next) = self.peek() {
                        pattern.push(next);
                        self.pos += 1;
                    }
                }
                '[' => {
                    in_class = true;
                    pattern.push(c);
                }
                ']' => {
                    in_class = false;
                    pattern.push(c);
                }
                '/' if !in_class => break,
                other => pattern.push(other),
            }
        }

        if pattern.is_empty() {
            return Err(self.error_at(start, "正则表达式不能为空"));
        }

        let flags = self.take_while(|c| c.is_ascii_alphabetic());
        Ok(Expr::Regex(RegexLiteral::new(pattern, flags)))
    }

    fn parse_array(&mut self) -> Result<Expr> {
        self.pos += 1;
        let mut items = Vec::new();

        self.skip_ws();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(Expr::Array(items));
        }

        loop {
            items.push(self.parse_arith()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(Expr::Array(items));
                }
                _ => return Err(self.error("数组缺少 ',' 或 ']'")),
            }
        }
    }

    fn parse_object(&mut self) -> Result<Expr> {
        self.pos += 1;
        let mut entries = Vec::new();

        self.skip_ws();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(Expr::Object(entries));
        }

        loop {
            self.skip_ws();
            let key = match self.peek() {
                Some(q @ ('\'' | '"')) => self.parse_string(q)?,
                Some(c) if is_ident_char(c) => self.take_while(is_ident_char),
                _ => return Err(self.error("无效的对象键")),
            };

            self.skip_ws();
            self.expect(':')?;
            let value = self.parse_arith()?;
            entries.push((key, value));

            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(Expr::Object(entries));
                }
                _ => return Err(self.error("对象缺少 ',' 或 '}'")),
            }
        }
    }

    // ==================== 工具 ====================

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("缺少 '{}'", expected)))
        }
    }

    fn error(&self, message: impl Into<String>) -> PolicyError {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> PolicyError {
        PolicyError::parse(self.source, offset, message)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(ns: Namespace, segments: &[&str]) -> AttributePath {
        AttributePath::new(ns, segments.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_parse_simple_assignment() {
        let clause = parse_rule("resource.name='post'").unwrap();

        assert_eq!(clause.path, path(Namespace::Resource, &["name"]));
        assert_eq!(clause.comparator, Comparator::Eq);
        assert_eq!(clause.expr, Expr::Literal(Value::from("post")));
    }

    #[test]
    fn test_parse_quoted_key() {
        let clause = parse_rule("'name.last'='Ghost'").unwrap();

        assert_eq!(clause.path, path(Namespace::Resource, &["name.last"]));
        assert_eq!(clause.expr, Expr::Literal(Value::from("Ghost")));
    }

    #[test]
    fn test_parse_operator_key() {
        let clause = parse_rule("resource.age.$gt=17").unwrap();

        assert_eq!(clause.path, path(Namespace::Resource, &["age"]).with_key("$gt"));
        assert_eq!(clause.expr, Expr::Literal(Value::Number(17.0)));
    }

    #[test]
    fn test_parse_combinator_without_attribute() {
        let clause = parse_rule("resource.$or={status:'A'}").unwrap();

        assert!(clause.path.is_combinator());
        assert!(clause.path.segments.is_empty());
        assert_eq!(
            clause.expr,
            Expr::Object(vec![(
                "status".to_string(),
                Expr::Literal(Value::from("A"))
            )])
        );
    }

    #[test]
    fn test_parse_comparators() {
        let cases = [
            ("resource.x>=5", Comparator::Gte),
            ("resource.x<=5", Comparator::Lte),
            ("resource.x>5", Comparator::Gt),
            ("resource.x<5", Comparator::Lt),
            ("resource.x!=5", Comparator::Ne),
            ("resource.x = 5", Comparator::Eq),
        ];

        for (rule, expected) in cases {
            assert_eq!(parse_rule(rule).unwrap().comparator, expected, "{}", rule);
        }
    }

    #[test]
    fn test_parse_arithmetic_precedence() {
        let clause = parse_rule("resource.total>=(user.total + 2 * 10)").unwrap();

        let expected = Expr::binary(
            ArithOp::Add,
            Expr::Path(path(Namespace::User, &["total"])),
            Expr::binary(
                ArithOp::Mul,
                Expr::Literal(Value::Number(2.0)),
                Expr::Literal(Value::Number(10.0)),
            ),
        );
        assert_eq!(clause.expr, expected);
    }

    #[test]
    fn test_parse_arithmetic_left_associative() {
        let clause = parse_rule("resource.x=(10 - 4 - 3)").unwrap();

        let expected = Expr::binary(
            ArithOp::Sub,
            Expr::binary(
                ArithOp::Sub,
                Expr::Literal(Value::Number(10.0)),
                Expr::Literal(Value::Number(4.0)),
            ),
            Expr::Literal(Value::Number(3.0)),
        );
        assert_eq!(clause.expr, expected);
    }

    #[test]
    fn test_parse_regex_literal() {
        let clause = parse_rule("resource.occupation=/ho\\/st[/]/gi").unwrap();

        assert_eq!(
            clause.expr,
            Expr::Regex(RegexLiteral::new("ho\\/st[/]", "gi"))
        );
    }

    #[test]
    fn test_parse_nested_literals() {
        let clause = parse_rule("resource.$or=[{status:'A'},{qty:{$lt:30}}, -1.5, null]").unwrap();

        let Expr::Array(items) = clause.expr else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 4);
        assert_eq!(
            items[1],
            Expr::Object(vec![(
                "qty".to_string(),
                Expr::Object(vec![(
                    "$lt".to_string(),
                    Expr::Literal(Value::Number(30.0))
                )])
            )])
        );
        assert_eq!(items[2], Expr::Literal(Value::Number(-1.5)));
        assert_eq!(items[3], Expr::Literal(Value::Null));
    }

    #[test]
    fn test_parse_bare_key_is_resource() {
        let clause = parse_rule("status=\"A\"").unwrap();
        assert_eq!(clause.path, path(Namespace::Resource, &["status"]));
    }

    #[test]
    fn test_parse_error_reports_offset() {
        let err = parse_rule("resource.name='post").unwrap_err();
        match err {
            PolicyError::Parse { rule, offset, .. } => {
                assert_eq!(rule, "resource.name='post");
                assert_eq!(offset, 14);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_errors() {
        let invalid = [
            "resource.name",
            "resource.name=",
            "resource.name='a' 'b'",
            "resource.age.$gt>=17",
            "resource.$gt.age=1",
            "resource.$gt=1",
            "resource=1",
            "resource.x=[1, 2",
            "resource.x={a 1}",
            "resource.x=(1 + 2",
            "resource.x=user.$gt",
            "resource.x=//",
        ];

        for rule in invalid {
            assert!(
                matches!(parse_rule(rule), Err(PolicyError::Parse { .. })),
                "should reject {}",
                rule
            );
        }
    }

    #[test]
    fn test_parse_leading_dot_number() {
        let clause = parse_rule("resource.v=.5").unwrap();
        assert_eq!(clause.expr, Expr::Literal(Value::Number(0.5)));

        let clause = parse_rule("resource.v=-.5").unwrap();
        assert_eq!(clause.expr, Expr::Literal(Value::Number(-0.5)));
    }

    #[test]
    fn test_parse_nesting_limit() {
        let moderate = format!("resource.v={}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(
            parse_rule(&moderate).unwrap().expr,
            Expr::Literal(Value::Number(1.0))
        );

        let deep_parens = format!("resource.v={}", "(".repeat(100_000));
        let deep_arrays = format!("resource.v={}", "[".repeat(100_000));
        let deep_objects = format!("resource.v={}", "{a:".repeat(100_000));

        for rule in [deep_parens, deep_arrays, deep_objects] {
            match parse_rule(&rule) {
                Err(PolicyError::Parse { message, .. }) => {
                    assert_eq!(message, "嵌套层数超过上限")
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }
}
