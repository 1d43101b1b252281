//! 属性解析与右值求值
//!
//! 对语法树做纯递归求值。缺失的属性解析为 `None`（未解析），从不报错；
//! 求值过程中实际引用到的 user / resource 属性会被记录为快照。

use crate::ast::{AttributePath, Expr, Namespace};
use crate::context::EvalContext;
use crate::operators::ArithOp;
use crate::value::{Object, Value};
use tracing::trace;

/// 已解析的资源属性，需要作为等值约束写入条件树
pub type Binding = (Vec<String>, Value);

/// 一次评估的解析器，持有调用级别的快照
pub struct Resolver<'a> {
    ctx: &'a EvalContext,
    user: Object,
    resource: Object,
    bindings: Vec<Binding>,
}

impl<'a> Resolver<'a> {
    pub fn new(ctx: &'a EvalContext) -> Self {
        Self {
            ctx,
            user: Object::new(),
            resource: Object::new(),
            bindings: Vec::new(),
        }
    }

    /// 解析属性路径
    pub fn resolve_path(&mut self, path: &AttributePath) -> Option<Value> {
        let value = self.resolve(path.namespace, &path.segments);
        if value.is_none() {
            trace!(path = %path, "属性不存在");
        }
        value
    }

    /// 解析命名空间下的属性并记录引用
    pub fn resolve(&mut self, namespace: Namespace, segments: &[String]) -> Option<Value> {
        let value = Value::from(self.ctx.lookup(namespace, segments)?);

        match namespace {
            Namespace::User => insert_path(&mut self.user, segments, value.clone()),
            Namespace::Resource => self.record_resource(segments, &value),
            Namespace::Action | Namespace::Environment => {}
        }

        Some(value)
    }

    fn record_resource(&mut self, segments: &[String], value: &Value) {
        insert_path(&mut self.resource, segments, value.clone());

        if !segments.is_empty() {
            self.bindings.push((segments.to_vec(), value.clone()));
        } else if let Value::Object(obj) = value {
            for (key, item) in obj {
                self.bindings.push((vec![key.clone()], item.clone()));
            }
        }
    }

    /// 求值右值表达式
    pub fn evaluate(&mut self, expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Literal(value) => Some(value.clone()),
            Expr::Regex(re) => Some(Value::Regex(re.clone())),
            Expr::Path(path) => self.resolve_path(path),
            Expr::Array(items) => {
                // 先求值所有元素以记录快照，任一元素未解析则整体未解析
                let values: Vec<Option<Value>> = items.iter().map(|e| self.evaluate(e)).collect();
                values.into_iter().collect::<Option<Vec<_>>>().map(Value::Array)
            }
            Expr::Object(entries) => {
                let values: Vec<(String, Option<Value>)> = entries
                    .iter()
                    .map(|(k, e)| (k.clone(), self.evaluate(e)))
                    .collect();
                values
                    .into_iter()
                    .map(|(k, v)| v.map(|v| (k, v)))
                    .collect::<Option<Object>>()
                    .map(Value::Object)
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = self.evaluate(lhs);
                let right = self.evaluate(rhs);
                let result = arithmetic(*op, left?, right?);
                if result.is_none() {
                    trace!(op = %op, "算术表达式无法求值");
                }
                result
            }
        }
    }

    /// 取出自上次调用以来记录的资源等值约束
    pub fn take_bindings(&mut self) -> Vec<Binding> {
        std::mem::take(&mut self.bindings)
    }

    /// 结束评估，返回 (user, resource) 快照
    pub fn into_snapshots(self) -> (Object, Object) {
        (self.user, self.resource)
    }
}

/// 数值按 f64 计算；`+` 的任一侧为字符串时做拼接
fn arithmetic(op: ArithOp, lhs: Value, rhs: Value) -> Option<Value> {
    if op == ArithOp::Add
        && (matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)))
    {
        return Some(Value::String(format!("{}{}", lhs, rhs)));
    }

    let (a, b) = (lhs.as_f64()?, rhs.as_f64()?);
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div if b == 0.0 => return None,
        ArithOp::Div => a / b,
    };

    result.is_finite().then_some(Value::Number(result))
}

/// 按路径写入嵌套对象，中间节点不是对象时被替换
pub fn insert_path(root: &mut Object, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        if let Value::Object(obj) = value {
            root.extend(obj);
        }
        return;
    };

    let mut current = root;
    for segment in parents {
        current = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Object::new()))
            .object_mut();
    }

    current.insert(last.clone(), value);
}
