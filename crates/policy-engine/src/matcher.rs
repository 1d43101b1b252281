//! 目标子句匹配器
//!
//! 目标（target）在 check 时被完全求值。任何缺失值或类型不匹配都按不匹配处理，
//! 从而让策略以"不适用"的方式关闭，而不是报错。

use crate::operators::Operator;
use crate::value::{RegexLiteral, Value};
use std::cmp::Ordering;
use tracing::warn;

/// 条件匹配器
pub struct TargetMatcher;

impl TargetMatcher {
    /// 评估条件
    ///
    /// # Arguments
    /// * `field_value` - 从上下文中解析出的左值
    /// * `operator` - 操作符
    /// * `expected_value` - 右值表达式的求值结果
    pub fn evaluate(field_value: Option<&Value>, operator: Operator, expected_value: &Value) -> bool {
        // $exists 的语义就是检查值是否存在
        if operator == Operator::Exists {
            let wanted = !matches!(expected_value, Value::Bool(false) | Value::Null);
            return field_value.is_some() == wanted;
        }

        let Some(field_value) = field_value else {
            return false;
        };

        match operator {
            Operator::Eq => Self::eq(field_value, expected_value),
            Operator::Ne => !Self::eq(field_value, expected_value),
            Operator::Gt => Self::compare(field_value, expected_value, Ordering::is_gt),
            Operator::Gte => Self::compare(field_value, expected_value, Ordering::is_ge),
            Operator::Lt => Self::compare(field_value, expected_value, Ordering::is_lt),
            Operator::Lte => Self::compare(field_value, expected_value, Ordering::is_le),
            Operator::In => Self::in_list(field_value, expected_value),
            Operator::Nin => {
                expected_value.as_array().is_some() && !Self::in_list(field_value, expected_value)
            }
            Operator::Regex => match expected_value {
                Value::Regex(re) => Self::regex_match(field_value, re),
                Value::String(pattern) => {
                    Self::regex_match(field_value, &RegexLiteral::new(pattern.clone(), ""))
                }
                _ => false,
            },
            Operator::Exists => unreachable!(),
        }
    }

    /// 相等比较，数组字段包含期望值时同样视为相等
    fn eq(field: &Value, expected: &Value) -> bool {
        if let Value::Regex(re) = expected {
            return Self::regex_match(field, re);
        }

        // 数值比较统一转为浮点数，避免 100 与 100.0 比较失败
        if let (Value::Number(f1), Value::Number(f2)) = (field, expected) {
            return (f1 - f2).abs() < f64::EPSILON;
        }

        if field == expected {
            return true;
        }

        match (field, expected) {
            (Value::Array(items), expected) if !matches!(expected, Value::Array(_)) => {
                items.iter().any(|item| Self::eq(item, expected))
            }
            _ => false,
        }
    }

    /// 数值或字符串的大小比较
    fn compare(field: &Value, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
        let ordering = match (Self::as_number(field), Self::as_number(expected)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => match (field, expected) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            },
        };

        ordering.is_some_and(accept)
    }

    /// 列表包含检查 ($in)
    fn in_list(field: &Value, expected: &Value) -> bool {
        let Some(candidates) = expected.as_array() else {
            return false;
        };

        match field {
            Value::Array(items) => items
                .iter()
                .any(|item| candidates.iter().any(|c| Self::eq(item, c))),
            _ => candidates.iter().any(|c| Self::eq(field, c)),
        }
    }

    /// 正则表达式匹配
    fn regex_match(field: &Value, re: &RegexLiteral) -> bool {
        let regex = match re.compile() {
            Ok(regex) => regex,
            Err(e) => {
                warn!("无效的正则表达式 '{}': {}", re, e);
                return false;
            }
        };

        match field {
            Value::String(s) => regex.is_match(s),
            Value::Array(items) => items
                .iter()
                .any(|item| item.as_str().is_some_and(|s| regex.is_match(s))),
            _ => false,
        }
    }

    /// 尝试将值转换为数字，数字字符串同样接受
    fn as_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}
