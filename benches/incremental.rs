//! Performance benchmarks: incremental maintenance vs evaluating from scratch.
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use trellis_eval::{ClosureStrategy, Engine, EngineOptions, FactStore, ReachabilityMaintainer, Value};
use trellis_ir::{Program, ProgramBuilder};

fn pair(a: i64, b: i64) -> Vec<Value> {
    vec![Value::Int(a), Value::Int(b)]
}

fn chain_store(n: i64) -> FactStore {
    let mut store = FactStore::new();
    store.declare("edge", 2).unwrap();
    for i in 1..n {
        store.insert("edge", pair(i, i + 1)).unwrap();
    }
    store.take_changes();
    store
}

fn recursive_path() -> Program {
    let mut b = ProgramBuilder::new();
    b.relation("edge", 2).unwrap();
    b.query("path", &["x", "y"], |q| {
        q.clause(|c| {
            c.relation("edge", &["x", "y"]);
        });
        q.clause(|c| {
            c.relation("edge", &["x", "z"]).call("path", &["z", "y"]);
        });
    })
    .unwrap();
    b.build()
}

fn transitive_path() -> Program {
    let mut b = ProgramBuilder::new();
    b.relation("edge", 2).unwrap();
    b.query("link", &["x", "y"], |q| {
        q.clause(|c| {
            c.relation("edge", &["x", "y"]);
        });
    })
    .unwrap();
    b.query("path", &["x", "y"], |q| {
        q.clause(|c| {
            c.transitive_call("link", &["x", "y"]);
        });
    })
    .unwrap();
    b.build()
}

// ─── Transitive Closure ─────────────────────────────────────────────

fn bench_closure_maintainer(c: &mut Criterion) {
    let mut group = c.benchmark_group("closure_cut_and_restore");

    for &n in &[50u32, 100, 200] {
        for strategy in [ClosureStrategy::Counting, ClosureStrategy::DeleteAndRederive] {
            let mut m = ReachabilityMaintainer::from_edges(strategy, (1..n).map(|i| (i, i + 1)));
            let mid = n / 2;
            group.bench_with_input(BenchmarkId::new(format!("{strategy:?}"), n), &mid, |b, &mid| {
                b.iter(|| {
                    m.delete_edge(&mid, &(mid + 1));
                    m.insert_edge(mid, mid + 1);
                });
            });
        }
    }
    group.finish();
}

// ─── Engine Updates ─────────────────────────────────────────────────

fn bench_engine_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_cut_and_restore");

    for &n in &[25i64, 50, 100] {
        let programs = [("recursive", recursive_path()), ("transitive", transitive_path())];
        for (label, program) in programs {
            let mut store = chain_store(n);
            let mut engine = Engine::new(program.clone(), &store, EngineOptions::default()).unwrap();
            let mid = n / 2;
            group.bench_with_input(BenchmarkId::new(label, n), &mid, |b, &mid| {
                b.iter(|| {
                    store.remove("edge", &pair(mid, mid + 1)).unwrap();
                    engine.sync(&mut store).unwrap();
                    store.insert("edge", pair(mid, mid + 1)).unwrap();
                    engine.sync(&mut store).unwrap();
                });
            });

            group.bench_with_input(BenchmarkId::new(format!("{label}_from_scratch"), n), &n, |b, _| {
                b.iter(|| Engine::new(program.clone(), &store, EngineOptions::default()).unwrap());
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_closure_maintainer, bench_engine_update);
criterion_main!(benches);
