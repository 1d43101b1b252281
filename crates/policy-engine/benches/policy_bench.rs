//! 策略引擎性能基准测试
//!
//! 分别测量规则解析、策略编译、单次检查和组表达式评估。

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use policyline::{EvalContext, Operator, Policy, TargetMatcher, Value, parse_rule};
use serde_json::json;
use std::hint::black_box;

fn leaf_declaration() -> serde_json::Value {
    json!({
        "effect": "permit",
        "target": ["user.role='admin'"],
        "condition": [
            "resource.name='post'",
            "resource.location=user.location",
            "resource.total>=(user.total*10)",
            "resource.$or=[{status:'A'},{qty:{$lt:30}}]"
        ]
    })
}

fn group_declaration() -> serde_json::Value {
    json!({
        "expression": "(user AND location)OR(admin OR super_admin)",
        "policies": {
            "user": {
                "effect": "permit",
                "condition": ["resource.occupation=/host/", "resource.age.$gt=17"]
            },
            "location": {
                "effect": "permit",
                "condition": [
                    "resource.age.$lt=66",
                    "'name.last'='Ghost'",
                    "resource.likes.$in=['vaporizing', 'talking']"
                ]
            },
            "admin": {
                "target": ["user.role='admin'"],
                "effect": "permit",
                "condition": ["resource.test='test'"]
            },
            "super_admin": {"target": ["user.role='admin'"], "effect": "permit"}
        }
    })
}

fn create_context() -> EvalContext {
    EvalContext::new()
        .with_user(json!({"role": "admin", "location": "NY", "total": 10}))
        .with_resource(json!({"total": 120}))
}

/// 规则字符串解析基准
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_rule");

    for rule in [
        "resource.name='post'",
        "resource.limit>=(resource.total + user.operation)",
        "resource.$or=[{status:'A'},{qty:{$gt:30, $lt:50}}]",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(rule), rule, |b, rule| {
            b.iter(|| parse_rule(black_box(rule)))
        });
    }

    group.finish();
}

/// 策略编译基准
fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");

    let leaf = leaf_declaration();
    let grouped = group_declaration();

    group.bench_function("leaf", |b| {
        b.iter(|| Policy::from_value(black_box(leaf.clone())))
    });
    group.bench_function("group", |b| {
        b.iter(|| Policy::from_value(black_box(grouped.clone())))
    });

    group.finish();
}

/// 单次检查基准
fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");

    let ctx = create_context();
    let leaf = Policy::from_value(leaf_declaration()).unwrap();
    let grouped = Policy::from_value(group_declaration()).unwrap();
    let composed = leaf.and(&grouped).or(&leaf);

    group.bench_function("leaf", |b| b.iter(|| leaf.evaluate(black_box(&ctx))));
    group.bench_function("group", |b| b.iter(|| grouped.evaluate(black_box(&ctx))));
    group.bench_function("composite", |b| {
        b.iter(|| composed.evaluate(black_box(&ctx)))
    });
    group.bench_function("check_and_condition", |b| {
        b.iter(|| {
            let mut session = leaf.session();
            session.check(black_box(&ctx));
            session.condition()
        })
    });

    group.finish();
}

/// 组合深度对评估耗时的影响
fn bench_composition_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("composition_depth");

    let ctx = create_context();
    let base = Policy::from_value(leaf_declaration()).unwrap();

    for depth in [1, 4, 16, 64].iter() {
        let mut policy = base.clone();
        for _ in 1..*depth {
            policy = policy.and(&base);
        }

        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| policy.evaluate(black_box(&ctx)))
        });
    }

    group.finish();
}

/// 目标匹配 `$in` 列表长度扩展
fn bench_target_in_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("target_in_scaling");

    let field = Value::from("target");

    for size in [5, 10, 50, 100, 500].iter() {
        let list: Vec<Value> = (0..*size)
            .map(|i| {
                if i == size - 1 {
                    Value::from("target")
                } else {
                    Value::from(format!("item_{}", i))
                }
            })
            .collect();
        let list_value = Value::Array(list);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                TargetMatcher::evaluate(
                    black_box(Some(&field)),
                    black_box(Operator::In),
                    black_box(&list_value),
                )
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_compile,
    bench_evaluate,
    bench_composition_depth,
    bench_target_in_scaling,
);

criterion_main!(benches);
