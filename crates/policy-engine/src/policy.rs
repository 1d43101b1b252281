//! 策略
//!
//! 策略在构造时一次性编译（规则字符串 → 语法树），之后不可变，可以在线程间共享。
//! 每次评估返回调用级别的 [`Evaluation`]，不修改策略本身；
//! 需要 "先 check 再取 condition" 两步调用时使用 [`PolicyCheck`]。

use crate::ast::RuleClause;
use crate::context::EvalContext;
use crate::declaration::{Effect, GroupDeclaration, LeafDeclaration, PolicyDeclaration};
use crate::error::{PolicyError, Result};
use crate::group::GroupExpr;
use crate::matcher::TargetMatcher;
use crate::operators::{LogicalOperator, Operator};
use crate::parser::parse_rule;
use crate::resolver::Resolver;
use crate::tree::ConditionTree;
use crate::value::{Object, Value};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, warn};

/// 编译后的策略
#[derive(Debug, Clone)]
pub struct Policy {
    node: Arc<PolicyNode>,
}

#[derive(Debug)]
enum PolicyNode {
    Leaf(LeafPolicy),
    Composite {
        operator: LogicalOperator,
        left: Policy,
        right: Policy,
    },
    Group(PolicyGroup),
}

#[derive(Debug)]
struct LeafPolicy {
    effect: Effect,
    target: Vec<RuleClause>,
    condition: Vec<RuleClause>,
}

#[derive(Debug)]
struct PolicyGroup {
    expression: GroupExpr,
    /// 按表达式中首次出现的顺序排列
    policies: Vec<(String, Policy)>,
}

impl Policy {
    /// 从声明编译策略
    pub fn new(declaration: PolicyDeclaration) -> Result<Self> {
        let node = match declaration {
            PolicyDeclaration::Leaf(leaf) => PolicyNode::Leaf(LeafPolicy::compile(leaf)?),
            PolicyDeclaration::Group(group) => PolicyNode::Group(PolicyGroup::compile(group)?),
        };

        Ok(Self {
            node: Arc::new(node),
        })
    }

    /// 从 JSON 字符串编译策略
    pub fn from_json(json: &str) -> Result<Self> {
        let declaration: PolicyDeclaration = serde_json::from_str(json).map_err(|e| {
            if e.is_data() {
                PolicyError::InvalidDeclaration(e.to_string())
            } else {
                PolicyError::JsonError(e)
            }
        })?;
        Self::new(declaration)
    }

    /// 从 JSON 值编译策略
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let declaration: PolicyDeclaration = serde_json::from_value(value)
            .map_err(|e| PolicyError::InvalidDeclaration(e.to_string()))?;
        Self::new(declaration)
    }

    /// AND 组合：两侧都适用时组合策略才适用
    pub fn and(&self, other: &Policy) -> Policy {
        self.combine(LogicalOperator::And, other)
    }

    /// OR 组合：任一侧适用时组合策略即适用
    pub fn or(&self, other: &Policy) -> Policy {
        self.combine(LogicalOperator::Or, other)
    }

    fn combine(&self, operator: LogicalOperator, other: &Policy) -> Policy {
        Policy {
            node: Arc::new(PolicyNode::Composite {
                operator,
                left: self.clone(),
                right: other.clone(),
            }),
        }
    }

    /// 评估策略，返回本次调用的结果
    pub fn evaluate(&self, ctx: &EvalContext) -> Evaluation {
        match self.node.as_ref() {
            PolicyNode::Leaf(leaf) => leaf.evaluate(ctx),
            PolicyNode::Composite {
                operator,
                left,
                right,
            } => {
                let left = left.evaluate(ctx);
                let right = right.evaluate(ctx);
                let applicable = match operator {
                    LogicalOperator::And => left.applicable && right.applicable,
                    LogicalOperator::Or => left.applicable || right.applicable,
                };
                debug!(operator = %operator, applicable, "组合策略评估完成");
                Evaluation::combine(applicable, vec![left, right])
            }
            PolicyNode::Group(group) => group.evaluate(ctx),
        }
    }

    /// 开始一次 "check 然后 condition" 的两步调用
    pub fn session(&self) -> PolicyCheck<'_> {
        PolicyCheck {
            policy: self,
            last: None,
        }
    }
}

impl LeafPolicy {
    fn compile(declaration: LeafDeclaration) -> Result<Self> {
        let target = declaration
            .target
            .iter()
            .map(|rule| parse_rule(rule))
            .collect::<Result<Vec<_>>>()?;
        let condition = declaration
            .condition
            .iter()
            .map(|rule| parse_rule(rule))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            effect = %declaration.effect,
            targets = target.len(),
            conditions = condition.len(),
            "策略已编译"
        );

        Ok(Self {
            effect: declaration.effect,
            target,
            condition,
        })
    }

    fn evaluate(&self, ctx: &EvalContext) -> Evaluation {
        let mut resolver = Resolver::new(ctx);

        let mut applicable = self
            .target
            .iter()
            .all(|clause| eager_match(&mut resolver, clause));
        // 目标中引用的资源属性只用于判断，不写入条件
        resolver.take_bindings();

        let mut condition = ConditionTree::new();
        if applicable {
            for clause in &self.condition {
                // 主体侧属性在 check 时完全已知，直接判断
                if clause.path.namespace.is_subject() {
                    let matched = eager_match(&mut resolver, clause);
                    resolver.take_bindings();
                    if !matched {
                        debug!(rule = %clause, "主体条件不满足");
                        applicable = false;
                        break;
                    }
                    continue;
                }

                match resolver.evaluate(&clause.expr) {
                    Some(value) => {
                        condition.assign(
                            &clause.path.segments,
                            clause.path.key.as_deref(),
                            clause.comparator,
                            value,
                        );
                        for (path, bound) in resolver.take_bindings() {
                            condition.assign_value(&path, bound);
                        }
                    }
                    None => {
                        resolver.take_bindings();
                        debug!(rule = %clause, "值无法解析，条件中省略该属性");
                    }
                }
            }
        } else {
            debug!("目标不满足，策略不适用");
        }

        if !applicable {
            condition = ConditionTree::new();
        }

        let (user, resource) = resolver.into_snapshots();
        Evaluation {
            applicable,
            effect: applicable.then_some(self.effect),
            user,
            resource,
            condition,
        }
    }
}

/// 即时求值一条子句（目标或主体条件），任何未解析的值都视为不匹配
fn eager_match(resolver: &mut Resolver<'_>, clause: &RuleClause) -> bool {
    let operator = match clause.path.key.as_deref() {
        None => clause.comparator.operator(),
        Some(key) => match Operator::from_key(key) {
            Some(op) => op,
            None => {
                warn!(rule = %clause, "目标中不支持的操作符键 '{}'", key);
                return false;
            }
        },
    };

    let field = resolver.resolve(clause.path.namespace, &clause.path.segments);
    let Some(expected) = resolver.evaluate(&clause.expr) else {
        debug!(rule = %clause, "目标右值无法解析");
        return false;
    };

    TargetMatcher::evaluate(field.as_ref(), operator, &expected)
}

impl PolicyGroup {
    fn compile(declaration: GroupDeclaration) -> Result<Self> {
        let expression = GroupExpr::parse(&declaration.expression)?;

        let mut compiled = Vec::with_capacity(declaration.policies.len());
        for (name, policy) in declaration.policies {
            compiled.push((name, Policy::new(policy)?));
        }

        let names = expression.names();
        let mut policies = Vec::with_capacity(names.len());
        for name in &names {
            let policy = compiled
                .iter()
                .find(|(declared, _)| declared == name)
                .map(|(_, policy)| policy.clone())
                .ok_or_else(|| PolicyError::UnknownPolicy(name.to_string()))?;
            policies.push((name.to_string(), policy));
        }

        for (declared, _) in &compiled {
            if !names.contains(&declared.as_str()) {
                warn!(policy = %declared, "策略已声明但未在组表达式中使用");
            }
        }

        Ok(Self {
            expression,
            policies,
        })
    }

    /// 每个引用的策略都会被评估，布尔结果不做短路
    fn evaluate(&self, ctx: &EvalContext) -> Evaluation {
        let results: Vec<(&str, Evaluation)> = self
            .policies
            .iter()
            .map(|(name, policy)| (name.as_str(), policy.evaluate(ctx)))
            .collect();

        let applicable = self.expression.evaluate(&|name| {
            results
                .iter()
                .find(|(n, _)| *n == name)
                .is_some_and(|(_, e)| e.applicable)
        });

        debug!(expression = %self.expression, applicable, "组策略评估完成");
        Evaluation::combine(applicable, results.into_iter().map(|(_, e)| e).collect())
    }
}

/// 一次评估的结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evaluation {
    /// 策略是否适用
    pub applicable: bool,
    /// 适用时的效果
    pub effect: Option<Effect>,
    /// 被引用的 user 属性快照
    pub user: Object,
    /// 被引用的 resource 属性快照
    pub resource: Object,
    /// 编译后的条件树
    pub condition: ConditionTree,
}

impl Evaluation {
    /// 适用且效果为 permit
    pub fn is_permitted(&self) -> bool {
        self.effect == Some(Effect::Permit)
    }

    /// 合并子结果：快照取并集，只有适用的子结果参与条件合并；效果取 deny 优先
    fn combine(applicable: bool, children: Vec<Evaluation>) -> Evaluation {
        let mut result = Evaluation {
            applicable,
            ..Default::default()
        };
        let mut denied = false;

        for child in children {
            merge_snapshot(&mut result.user, child.user);
            merge_snapshot(&mut result.resource, child.resource);

            if child.applicable {
                result.condition.merge(&child.condition);
                denied |= child.effect == Some(Effect::Deny);
            }
        }

        if applicable {
            result.effect = Some(if denied { Effect::Deny } else { Effect::Permit });
        }
        result
    }

    /// 将调用方提供的属性混入 user 快照
    pub fn with_user_mixins(mut self, mixins: &JsonValue) -> Self {
        if let Value::Object(extra) = Value::from(mixins) {
            merge_snapshot(&mut self.user, extra);
        }
        self
    }

    /// 投影为 `{user?, resource?, condition?}`，空的部分省略
    pub fn condition(&self) -> CompiledCondition {
        CompiledCondition {
            user: (!self.user.is_empty()).then(|| self.user.clone()),
            resource: (!self.resource.is_empty()).then(|| self.resource.clone()),
            condition: (!self.condition.is_empty()).then(|| self.condition.clone()),
        }
    }
}

fn merge_snapshot(target: &mut Object, incoming: Object) {
    for (key, value) in incoming {
        match target.get_mut(&key) {
            Some(Value::Object(existing)) if value.is_object() => {
                if let Value::Object(nested) = value {
                    merge_snapshot(existing, nested);
                }
            }
            _ => {
                target.insert(key, value);
            }
        }
    }
}

/// 编译条件的投影
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CompiledCondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Object>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionTree>,
}

impl CompiledCondition {
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// 两步调用句柄：`check` 保存本次结果，`condition` 读取结果
///
/// 结果保存在句柄中而不是策略上，同一个策略可以被多个句柄并发使用。
pub struct PolicyCheck<'p> {
    policy: &'p Policy,
    last: Option<Evaluation>,
}

impl PolicyCheck<'_> {
    pub fn check(&mut self, ctx: &EvalContext) -> bool {
        let evaluation = self.policy.evaluate(ctx);
        let applicable = evaluation.applicable;
        self.last = Some(evaluation);
        applicable
    }

    /// 按 `(user?, action?, environment?, resource?)` 参数检查
    pub fn check_parts(
        &mut self,
        user: Option<JsonValue>,
        action: Option<JsonValue>,
        environment: Option<JsonValue>,
        resource: Option<JsonValue>,
    ) -> bool {
        self.check(&EvalContext::from_parts(user, action, environment, resource))
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.last.as_ref()
    }

    pub fn condition(&self) -> Result<CompiledCondition> {
        self.last
            .as_ref()
            .map(Evaluation::condition)
            .ok_or_else(|| PolicyError::IllegalState("必须先调用 check 再读取 condition".to_string()))
    }

    /// 读取条件，并把 `mixins` 混入 user 快照
    pub fn condition_with(&self, mixins: &JsonValue) -> Result<CompiledCondition> {
        self.last
            .clone()
            .map(|e| e.with_user_mixins(mixins).condition())
            .ok_or_else(|| PolicyError::IllegalState("必须先调用 check 再读取 condition".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(declaration: JsonValue) -> Policy {
        Policy::from_value(declaration).unwrap()
    }

    #[test]
    fn test_no_target_is_applicable() {
        let p = policy(json!({"effect": "permit"}));
        let evaluation = p.evaluate(&EvalContext::new());

        assert!(evaluation.applicable);
        assert!(evaluation.is_permitted());
        assert_eq!(evaluation.condition(), CompiledCondition::default());
    }

    #[test]
    fn test_target_gates_applicability() {
        let p = policy(json!({
            "effect": "permit",
            "target": ["user.role='admin'"],
            "condition": ["resource.test='test'"]
        }));

        let denied = p.evaluate(&EvalContext::new());
        assert!(!denied.applicable);
        assert_eq!(denied.effect, None);
        assert!(denied.condition.is_empty());

        let admitted = p.evaluate(&EvalContext::new().with_user(json!({"role": "admin"})));
        assert!(admitted.applicable);
        assert_eq!(admitted.condition.to_json(), json!({"test": "test"}));
        assert_eq!(Value::Object(admitted.user).to_json(), json!({"role": "admin"}));
    }

    #[test]
    fn test_deny_effect() {
        let p = policy(json!({"effect": "deny"}));
        let evaluation = p.evaluate(&EvalContext::new());

        assert!(evaluation.applicable);
        assert_eq!(evaluation.effect, Some(Effect::Deny));
        assert!(!evaluation.is_permitted());
    }

    #[test]
    fn test_subject_condition_gates_applicability() {
        let p = policy(json!({
            "effect": "permit",
            "condition": ["user.active=true", "resource.owner=user.id"]
        }));

        let inactive = p.evaluate(&EvalContext::new().with_user(json!({"active": false, "id": 7})));
        assert!(!inactive.applicable);
        assert!(inactive.condition.is_empty());

        let active = p.evaluate(&EvalContext::new().with_user(json!({"active": true, "id": 7})));
        assert!(active.applicable);
        assert_eq!(active.condition.to_json(), json!({"owner": 7}));
    }

    #[test]
    fn test_unresolved_value_is_omitted() {
        let p = policy(json!({
            "effect": "permit",
            "condition": ["resource.name='post'", "resource.location=user.location"]
        }));
        let evaluation = p.evaluate(&EvalContext::new());

        assert_eq!(evaluation.condition.to_json(), json!({"name": "post"}));
        assert!(evaluation.user.is_empty());
    }

    #[test]
    fn test_and_requires_both() {
        let a = policy(json!({"effect": "permit", "condition": ["resource.a=1"]}));
        let b = policy(json!({
            "effect": "permit",
            "target": ["user.role='admin'"],
            "condition": ["resource.b=2"]
        }));

        let evaluation = a.and(&b).evaluate(&EvalContext::new());
        assert!(!evaluation.applicable);
        assert_eq!(evaluation.effect, None);
        // 只有适用的分支参与条件合并
        assert_eq!(evaluation.condition.to_json(), json!({"a": 1}));
    }

    #[test]
    fn test_or_requires_one() {
        let a = policy(json!({"effect": "permit", "condition": ["resource.a=1"]}));
        let b = policy(json!({
            "effect": "deny",
            "target": ["user.role='admin'"],
            "condition": ["resource.b=2"]
        }));

        let evaluation = a.or(&b).evaluate(&EvalContext::new());
        assert!(evaluation.applicable);
        assert_eq!(evaluation.effect, Some(Effect::Permit));
        assert_eq!(evaluation.condition.to_json(), json!({"a": 1}));

        let as_admin = a
            .or(&b)
            .evaluate(&EvalContext::new().with_user(json!({"role": "admin"})));
        assert_eq!(as_admin.effect, Some(Effect::Deny));
        assert_eq!(as_admin.condition.to_json(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_group_unknown_policy() {
        let err = Policy::from_value(json!({
            "expression": "a AND missing",
            "policies": {"a": {"effect": "permit"}}
        }))
        .unwrap_err();

        assert!(matches!(err, PolicyError::UnknownPolicy(name) if name == "missing"));
    }

    #[test]
    fn test_group_not_expression() {
        let p = policy(json!({
            "expression": "NOT admin",
            "policies": {
                "admin": {"effect": "permit", "target": ["user.role='admin'"]}
            }
        }));

        assert!(p.evaluate(&EvalContext::new()).applicable);
        assert!(!p
            .evaluate(&EvalContext::new().with_user(json!({"role": "admin"})))
            .applicable);
    }

    #[test]
    fn test_malformed_rule_fails_construction() {
        let err = Policy::from_value(json!({
            "effect": "permit",
            "condition": ["resource.name='post"]
        }))
        .unwrap_err();

        assert!(err.to_string().contains("resource.name='post"));
    }

    #[test]
    fn test_session_requires_check() {
        let p = policy(json!({"effect": "permit"}));
        let mut session = p.session();

        assert!(matches!(session.condition(), Err(PolicyError::IllegalState(_))));
        assert!(session.check(&EvalContext::new()));
        assert!(session.condition().is_ok());
    }

    #[test]
    fn test_condition_with_mixins() {
        let p = policy(json!({"effect": "permit", "condition": ["resource.owner=user.firstName"]}));
        let mut session = p.session();
        session.check_parts(Some(json!({"firstName": "John"})), None, None, None);

        let condition = session.condition_with(&json!({"lastName": "Doe"})).unwrap();
        assert_eq!(
            condition.to_json()["user"],
            json!({"firstName": "John", "lastName": "Doe"})
        );
    }
}
