//! 条件树构建与合并
//!
//! 把一系列 (属性路径, 操作符键, 比较符, 值) 赋值折叠成一个 Mongo 查询形式的嵌套对象。
//!
//! 合并规则：
//! - 组合键（`$or` / `$and` / `$nor`）总是追加到数组，数组值逐个展开追加
//! - 操作符键合并进属性对象，同一属性上的不同操作符共存
//! - 普通值后写覆盖；两侧都是对象时递归合并
//! - 比较符不是 `=` 的普通值保存为 `[比较符, 值]`
//! - `[比较符, 值]` 与操作符对象落在同一属性上时折叠为一个操作符对象（`>=` 对应 `$gte`）

use crate::operators::{Comparator, is_combinator_key};
use crate::value::{Object, Value, object_to_json};
use serde::Serialize;
use std::collections::btree_map::Entry;

/// 编译后的条件树
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConditionTree {
    root: Object,
}

impl ConditionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_object(root: Object) -> Self {
        Self { root }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn as_object(&self) -> &Object {
        &self.root
    }

    pub fn into_object(self) -> Object {
        self.root
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(object_to_json(&self.root))
    }

    /// 写入一条赋值
    ///
    /// `attribute` 不含末尾的操作符键；`key` 为操作符键或组合键。
    pub fn assign(
        &mut self,
        attribute: &[String],
        key: Option<&str>,
        comparator: Comparator,
        value: Value,
    ) {
        match key {
            Some(combinator) if is_combinator_key(combinator) => {
                let node = descend(&mut self.root, attribute);
                append_combinator(node, combinator, value);
            }
            Some(operator) => {
                let mut incoming = Object::new();
                incoming.insert(operator.to_string(), value);
                set_value(&mut self.root, attribute, Value::Object(incoming));
            }
            None => {
                let value = if comparator == Comparator::Eq {
                    value
                } else {
                    Value::Array(vec![Value::from(comparator.as_str()), value])
                };
                set_value(&mut self.root, attribute, value);
            }
        }
    }

    /// 普通等值赋值
    pub fn assign_value(&mut self, attribute: &[String], value: Value) {
        set_value(&mut self.root, attribute, value);
    }

    /// 合并另一棵树：把它的每个叶子当作后续赋值重新应用
    pub fn merge(&mut self, other: &ConditionTree) {
        merge_objects(&mut self.root, other.root.clone());
    }
}

/// 沿路径下降，缺失或非对象的节点被替换为空对象
fn descend<'a>(root: &'a mut Object, segments: &[String]) -> &'a mut Object {
    let mut current = root;
    for segment in segments {
        current = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Object::new()))
            .object_mut();
    }
    current
}

fn set_value(root: &mut Object, attribute: &[String], value: Value) {
    let Some((last, parents)) = attribute.split_last() else {
        if let Value::Object(incoming) = value {
            merge_objects(root, incoming);
        }
        return;
    };

    let node = descend(root, parents);
    if is_combinator_key(last) {
        append_combinator(node, last, value);
        return;
    }

    match node.entry(last.clone()) {
        Entry::Occupied(mut slot) => coalesce(slot.get_mut(), value),
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
    }
}

/// 把新值写入已有槽位
///
/// 延迟比较与操作符对象互相折叠，其余情况对象递归合并、标量后写覆盖。
fn coalesce(slot: &mut Value, value: Value) {
    let incoming = match deferred_comparison(&value) {
        Some(operators) if is_operator_form(slot) => Value::Object(operators),
        _ => value,
    };

    if is_operator_form(&incoming) {
        if let Some(operators) = deferred_comparison(slot) {
            *slot = Value::Object(operators);
        }
    }

    match (slot, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => merge_objects(existing, incoming),
        (slot, incoming) => *slot = incoming,
    }
}

/// `[比较符, 值]` 转换为 `{$操作符: 值}`
fn deferred_comparison(value: &Value) -> Option<Object> {
    let Value::Array(items) = value else {
        return None;
    };
    let [Value::String(symbol), operand] = items.as_slice() else {
        return None;
    };
    let comparator = Comparator::from_symbol(symbol).filter(|c| *c != Comparator::Eq)?;

    let mut operators = Object::new();
    operators.insert(comparator.operator().to_string(), operand.clone());
    Some(operators)
}

/// 延迟比较，或所有键都是 `$` 操作符键的对象
fn is_operator_form(value: &Value) -> bool {
    match value {
        Value::Object(obj) => !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')),
        other => deferred_comparison(other).is_some(),
    }
}

fn merge_objects(target: &mut Object, incoming: Object) {
    for (key, value) in incoming {
        set_value(target, std::slice::from_ref(&key), value);
    }
}

fn append_combinator(node: &mut Object, key: &str, value: Value) {
    let slot = node
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));

    if !matches!(slot, Value::Array(_)) {
        let previous = std::mem::take(slot);
        *slot = Value::Array(vec![previous]);
    }

    if let Value::Array(items) = slot {
        match value {
            Value::Array(values) => items.extend(values),
            other => items.push(other),
        }
    }
}
