//! 策略声明
//!
//! 声明是策略的输入形式：叶子策略 `{effect, target?, condition?}`，
//! 或组策略 `{expression, policies}`。声明的形状在反序列化时校验。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 策略效果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    #[default]
    Permit,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permit => write!(f, "permit"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// 叶子策略声明
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LeafDeclaration {
    pub effect: Effect,
    pub target: Vec<String>,
    pub condition: Vec<String>,
}

impl LeafDeclaration {
    pub fn new(effect: Effect) -> Self {
        Self {
            effect,
            target: Vec::new(),
            condition: Vec::new(),
        }
    }

    pub fn with_target<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target.extend(rules.into_iter().map(Into::into));
        self
    }

    pub fn with_condition<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.condition.extend(rules.into_iter().map(Into::into));
        self
    }
}

/// 组策略声明
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDeclaration {
    pub expression: String,
    pub policies: BTreeMap<String, PolicyDeclaration>,
}

impl GroupDeclaration {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            policies: BTreeMap::new(),
        }
    }

    pub fn with_policy(mut self, name: impl Into<String>, policy: impl Into<PolicyDeclaration>) -> Self {
        self.policies.insert(name.into(), policy.into());
        self
    }
}

/// 策略声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDeclaration", into = "RawDeclaration")]
pub enum PolicyDeclaration {
    Leaf(LeafDeclaration),
    Group(GroupDeclaration),
}

impl From<LeafDeclaration> for PolicyDeclaration {
    fn from(value: LeafDeclaration) -> Self {
        Self::Leaf(value)
    }
}

impl From<GroupDeclaration> for PolicyDeclaration {
    fn from(value: GroupDeclaration) -> Self {
        Self::Group(value)
    }
}

/// 线上格式，所有字段可选，由 `TryFrom` 校验组合是否合法
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    effect: Option<Effect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    policies: Option<BTreeMap<String, PolicyDeclaration>>,
}

impl TryFrom<RawDeclaration> for PolicyDeclaration {
    type Error = String;

    fn try_from(raw: RawDeclaration) -> Result<Self, Self::Error> {
        if raw.expression.is_some() || raw.policies.is_some() {
            if raw.effect.is_some() || raw.target.is_some() || raw.condition.is_some() {
                return Err("组策略不能声明 effect、target 或 condition".to_string());
            }
            let expression = raw
                .expression
                .ok_or_else(|| "组策略缺少 expression".to_string())?;
            let policies = raw
                .policies
                .ok_or_else(|| "组策略缺少 policies".to_string())?;
            if policies.is_empty() {
                return Err("组策略的 policies 不能为空".to_string());
            }
            return Ok(Self::Group(GroupDeclaration {
                expression,
                policies,
            }));
        }

        let effect = raw
            .effect
            .ok_or_else(|| "策略缺少 effect（permit 或 deny）".to_string())?;

        Ok(Self::Leaf(LeafDeclaration {
            effect,
            target: raw.target.unwrap_or_default(),
            condition: raw.condition.unwrap_or_default(),
        }))
    }
}

impl From<PolicyDeclaration> for RawDeclaration {
    fn from(value: PolicyDeclaration) -> Self {
        match value {
            PolicyDeclaration::Leaf(leaf) => Self {
                effect: Some(leaf.effect),
                target: (!leaf.target.is_empty()).then_some(leaf.target),
                condition: (!leaf.condition.is_empty()).then_some(leaf.condition),
                ..Default::default()
            },
            PolicyDeclaration::Group(group) => Self {
                expression: Some(group.expression),
                policies: Some(group.policies),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_leaf_deserialization() {
        let decl: PolicyDeclaration = serde_json::from_value(json!({
            "effect": "deny",
            "target": ["user.role='guest'"],
            "condition": ["resource.name='post'"]
        }))
        .unwrap();

        assert_eq!(
            decl,
            PolicyDeclaration::Leaf(
                LeafDeclaration::new(Effect::Deny)
                    .with_target(["user.role='guest'"])
                    .with_condition(["resource.name='post'"])
            )
        );
    }

    #[test]
    fn test_group_deserialization() {
        let decl: PolicyDeclaration = serde_json::from_value(json!({
            "expression": "a OR b",
            "policies": {
                "a": {"effect": "permit"},
                "b": {"effect": "permit", "condition": ["resource.x=1"]}
            }
        }))
        .unwrap();

        let PolicyDeclaration::Group(group) = decl else {
            panic!("expected group");
        };
        assert_eq!(group.expression, "a OR b");
        assert_eq!(group.policies.len(), 2);
    }

    #[test]
    fn test_missing_effect_rejected() {
        let err = serde_json::from_value::<PolicyDeclaration>(json!({
            "condition": ["resource.x=1"]
        }))
        .unwrap_err();

        assert!(err.to_string().contains("effect"));
    }

    #[test]
    fn test_mixed_shape_rejected() {
        let result = serde_json::from_value::<PolicyDeclaration>(json!({
            "expression": "a",
            "effect": "permit",
            "policies": {"a": {"effect": "permit"}}
        }));

        assert!(result.is_err());
    }

    #[test]
    fn test_group_without_policies_rejected() {
        let result = serde_json::from_value::<PolicyDeclaration>(json!({"expression": "a"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let decl = PolicyDeclaration::Group(
            GroupDeclaration::new("a").with_policy(
                "a",
                LeafDeclaration::new(Effect::Permit).with_condition(["resource.x=1"]),
            ),
        );

        let json = serde_json::to_value(&decl).unwrap();
        assert_eq!(
            json,
            json!({
                "expression": "a",
                "policies": {"a": {"effect": "permit", "condition": ["resource.x=1"]}}
            })
        );
    }
}
