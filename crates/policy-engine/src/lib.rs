//! ABAC 策略引擎
//!
//! 把声明式的访问策略编译为可复用的对象，提供：
//! - 规则字符串解析（`resource.total>=(user.total*10)`）
//! - 针对 user / action / environment / resource 上下文的适用性判断
//! - Mongo 查询形式的条件树构建与合并
//! - AND / OR 组合与具名策略的组表达式
//! - 线程安全的策略存储

pub mod ast;
pub mod context;
pub mod declaration;
pub mod error;
pub mod group;
pub mod matcher;
pub mod operators;
pub mod parser;
pub mod policy;
pub mod resolver;
pub mod store;
pub mod tree;
pub mod value;

pub use context::EvalContext;
pub use declaration::{Effect, GroupDeclaration, LeafDeclaration, PolicyDeclaration};
pub use error::{PolicyError, Result};
pub use group::GroupExpr;
pub use matcher::TargetMatcher;
pub use operators::{Comparator, LogicalOperator, Operator};
pub use parser::parse_rule;
pub use policy::{CompiledCondition, Evaluation, Policy, PolicyCheck};
pub use store::PolicyStore;
pub use tree::ConditionTree;
pub use value::{Object, RegexLiteral, Value};
