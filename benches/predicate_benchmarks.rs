//! Predicate performance benchmarks: deep chains, both dialects, handle
//! call overhead.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rulekit::{
    predicate, LogicNode, ParamSpec, ParamType, Predicate, Registry, RegistryManager, RuleConfig,
    RuleDef, RuleEngine, RuleSetManifest,
};
use serde_json::json;

fn make_chain(depth: usize) -> Predicate<i64> {
    let mut expr = predicate(|ctx: &i64| *ctx > 0, "positive");
    for _ in 1..depth {
        expr = expr & predicate(|ctx: &i64| *ctx > 0, "positive");
    }
    expr
}

fn bench_bool_eval(c: &mut Criterion) {
    let mut group = c.benchmark_group("bool_eval_chain");
    for depth in [100usize, 1_000] {
        let expr = make_chain(depth);
        // Warm the evaluator cache so the loop measures steady-state calls.
        expr.eval(&1).expect("no failure");
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| expr.eval(&1));
        });
    }
    group.finish();
}

fn bench_trace_eval(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace_eval_chain");
    for depth in [100usize, 1_000] {
        let expr = make_chain(depth);
        expr.trace(&1).expect("no failure");
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| expr.trace(&1));
        });
    }
    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_chain");
    for depth in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            // Fresh predicate per iteration: the first eval pays compilation.
            b.iter_batched(
                || make_chain(depth),
                |expr| expr.eval(&1),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_handle_overhead(c: &mut Criterion) {
    let manager = RegistryManager::new();
    let registry = Registry::new("bench_registry", &manager).expect("fresh manager");
    registry
        .register(
            RuleDef::builder("is_positive")
                .param(ParamSpec::new("threshold", ParamType::Integer).with_default(json!(0)))
                .producer(|params| {
                    let threshold = params.i64("threshold")?;
                    Ok(predicate(move |ctx: &i64| *ctx > threshold, "is_positive"))
                }),
        )
        .expect("unique name");

    let engine = RuleEngine::new(manager);
    let manifest = RuleSetManifest::new(
        "bench_registry",
        [(
            "gate".to_string(),
            LogicNode::leaf(RuleConfig::new("is_positive")),
        )],
    )
    .expect("valid manifest");
    engine.update_manifests(&[manifest]).expect("compiles");

    let handle = engine.get_predicate_handle("bench_registry", "gate");
    let direct = predicate(|ctx: &i64| *ctx > 0, "is_positive");
    direct.eval(&1).expect("no failure");
    handle.eval(&1).expect("no failure");

    let mut group = c.benchmark_group("call_overhead");
    group.bench_function("direct_predicate", |b| b.iter(|| direct.eval(&1)));
    group.bench_function("through_handle", |b| b.iter(|| handle.eval(&1)));
    group.finish();
}

criterion_group!(
    benches,
    bench_bool_eval,
    bench_trace_eval,
    bench_compile,
    bench_handle_overhead
);
criterion_main!(benches);
