//! 引擎值模型
//!
//! 在 JSON 数据模型之上增加正则字面量，编译后的条件树与上下文快照都使用该类型。

use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;

/// 对象类型（键有序，保证输出稳定）
pub type Object = BTreeMap<String, Value>;

/// 正则字面量，模式与标志原样保留
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegexLiteral {
    pub pattern: String,
    pub flags: String,
}

impl RegexLiteral {
    pub fn new(pattern: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            flags: flags.into(),
        }
    }

    /// 编译为 Rust 正则，`i`/`m`/`s`/`x` 标志转换为内联标志，其余忽略
    pub fn compile(&self) -> std::result::Result<regex::Regex, regex::Error> {
        let inline: String = self
            .flags
            .chars()
            .filter(|c| matches!(*c, 'i' | 'm' | 's' | 'x'))
            .collect();

        if inline.is_empty() {
            regex::Regex::new(&self.pattern)
        } else {
            regex::Regex::new(&format!("(?{}){}", inline, self.pattern))
        }
    }
}

impl fmt::Display for RegexLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.pattern, self.flags)
    }
}

/// 引擎值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Regex(RegexLiteral),
    Array(Vec<Value>),
    Object(Object),
}

impl Value {
    pub fn regex(pattern: impl Into<String>, flags: impl Into<String>) -> Self {
        Self::Regex(RegexLiteral::new(pattern, flags))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// 取得可变对象，非对象值先被替换为空对象
    pub fn object_mut(&mut self) -> &mut Object {
        if !self.is_object() {
            *self = Self::Object(Object::new());
        }
        match self {
            Self::Object(obj) => obj,
            _ => unreachable!(),
        }
    }

    /// 转换为 JSON，正则按 MongoDB 扩展 JSON 输出为 `{"$regex", "$options"}`
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Regex(re) => {
                let mut map = Map::new();
                map.insert("$regex".to_string(), JsonValue::String(re.pattern.clone()));
                map.insert("$options".to_string(), JsonValue::String(re.flags.clone()));
                JsonValue::Object(map)
            }
            Self::Array(arr) => JsonValue::Array(arr.iter().map(Value::to_json).collect()),
            Self::Object(obj) => JsonValue::Object(object_to_json(obj)),
        }
    }
}

/// 整数值按整数输出，避免 `100` 变成 `100.0`
fn number_to_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        JsonValue::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

pub fn object_to_json(obj: &Object) -> Map<String, JsonValue> {
    obj.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Regex(re) => write!(f, "{}", re),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(arr) => Self::Array(arr.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&JsonValue> for Value {
    fn from(value: &JsonValue) -> Self {
        Self::from(value.clone())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Self::Object(value)
    }
}
