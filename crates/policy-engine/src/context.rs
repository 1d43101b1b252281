//! 评估上下文
//!
//! 一次 check 调用的输入：user / action / environment / resource 四个属性表，
//! 任一缺省时按空表处理。

use crate::ast::Namespace;
use serde_json::{Map, Value as JsonValue};
use tracing::warn;

/// 评估上下文
#[derive(Debug, Clone)]
pub struct EvalContext {
    user: JsonValue,
    action: JsonValue,
    environment: JsonValue,
    resource: JsonValue,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalContext {
    pub fn new() -> Self {
        Self {
            user: empty(),
            action: empty(),
            environment: empty(),
            resource: empty(),
        }
    }

    /// 按 `check(user?, action?, environment?, resource?)` 的参数顺序构造
    pub fn from_parts(
        user: Option<JsonValue>,
        action: Option<JsonValue>,
        environment: Option<JsonValue>,
        resource: Option<JsonValue>,
    ) -> Self {
        Self {
            user: normalize(Namespace::User, user),
            action: normalize(Namespace::Action, action),
            environment: normalize(Namespace::Environment, environment),
            resource: normalize(Namespace::Resource, resource),
        }
    }

    pub fn with_user(mut self, user: JsonValue) -> Self {
        self.user = normalize(Namespace::User, Some(user));
        self
    }

    pub fn with_action(mut self, action: JsonValue) -> Self {
        self.action = normalize(Namespace::Action, Some(action));
        self
    }

    pub fn with_environment(mut self, environment: JsonValue) -> Self {
        self.environment = normalize(Namespace::Environment, Some(environment));
        self
    }

    pub fn with_resource(mut self, resource: JsonValue) -> Self {
        self.resource = normalize(Namespace::Resource, Some(resource));
        self
    }

    pub fn namespace(&self, namespace: Namespace) -> &JsonValue {
        match namespace {
            Namespace::User => &self.user,
            Namespace::Action => &self.action,
            Namespace::Environment => &self.environment,
            Namespace::Resource => &self.resource,
        }
    }

    /// 获取属性值（支持嵌套路径和数组下标，如 `["items", "0", "name"]`）
    ///
    /// 空路径返回整个命名空间。
    pub fn lookup(&self, namespace: Namespace, segments: &[String]) -> Option<&JsonValue> {
        let mut current = self.namespace(namespace);

        for part in segments {
            match current {
                JsonValue::Object(map) => {
                    current = map.get(part)?;
                }
                JsonValue::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }
}

fn empty() -> JsonValue {
    JsonValue::Object(Map::new())
}

/// null 和缺省视为空表；非对象值同样按空表处理
fn normalize(namespace: Namespace, value: Option<JsonValue>) -> JsonValue {
    match value {
        Some(JsonValue::Object(map)) => JsonValue::Object(map),
        None | Some(JsonValue::Null) => empty(),
        Some(other) => {
            warn!(
                namespace = namespace.as_str(),
                "上下文属性表不是对象 ({}), 按空表处理", other
            );
            empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segments(path: &str) -> Vec<String> {
        path.split('.').map(String::from).collect()
    }

    #[test]
    fn test_lookup_nested() {
        let ctx = EvalContext::new()
            .with_user(json!({"location": "NY", "address": {"city": "Boston"}}))
            .with_resource(json!({"items": [{"name": "ticket"}]}));

        assert_eq!(
            ctx.lookup(Namespace::User, &segments("location")),
            Some(&json!("NY"))
        );
        assert_eq!(
            ctx.lookup(Namespace::User, &segments("address.city")),
            Some(&json!("Boston"))
        );
        assert_eq!(
            ctx.lookup(Namespace::Resource, &segments("items.0.name")),
            Some(&json!("ticket"))
        );
        assert_eq!(ctx.lookup(Namespace::User, &segments("missing")), None);
    }

    #[test]
    fn test_omitted_parts_are_empty() {
        let ctx = EvalContext::from_parts(Some(json!({"a": 1})), None, Some(JsonValue::Null), None);

        assert_eq!(ctx.namespace(Namespace::Action), &json!({}));
        assert_eq!(ctx.namespace(Namespace::Environment), &json!({}));
        assert_eq!(ctx.lookup(Namespace::User, &[]), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_non_object_part_is_empty() {
        let ctx = EvalContext::new().with_resource(json!([1, 2, 3]));
        assert_eq!(ctx.namespace(Namespace::Resource), &json!({}));
    }
}
