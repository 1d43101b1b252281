//! 策略引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("规则解析失败: '{rule}' 位置 {offset}: {message}")]
    Parse {
        rule: String,
        offset: usize,
        message: String,
    },

    #[error("组表达式解析失败: '{expression}' 位置 {offset}: {message}")]
    Expression {
        expression: String,
        offset: usize,
        message: String,
    },

    #[error("组表达式引用了未声明的策略: {0}")]
    UnknownPolicy(String),

    #[error("无效的策略声明: {0}")]
    InvalidDeclaration(String),

    #[error("非法状态: {0}")]
    IllegalState(String),

    #[error("策略未找到: {0}")]
    PolicyNotFound(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("读取策略文件失败: {0}")]
    Io(#[from] std::io::Error),
}

impl PolicyError {
    pub(crate) fn parse(rule: &str, offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            rule: rule.to_string(),
            offset,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;
