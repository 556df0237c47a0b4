//! Benchmarks for fragment composition
//!
//! Measures dependency collection, WITH-clause rendering and full
//! composition on generated fragment graphs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ctekit_core::{Config, CyclePolicy};
use ctekit_sql::SqlParserEngine;
use ctekit_workspace::{DependencyCollector, FragmentId, FragmentKind, WithComposer, Workspace};
use std::sync::Arc;

/// Workspace with N CTEs where each CTE reads the previous two, and a Main
/// fragment reading the last one
fn generate_workspace(num_ctes: usize) -> (Workspace, FragmentId) {
    let mut workspace = Workspace::new(Arc::new(SqlParserEngine::default()), Config::default());
    let mut ids = Vec::with_capacity(num_ctes);

    for i in 0..num_ctes {
        let body = match i {
            0 => "SELECT account_id, amount_cents FROM payments".to_string(),
            1 => "SELECT account_id, amount_cents FROM step_0".to_string(),
            _ => format!(
                "SELECT a.account_id, a.amount_cents + b.amount_cents AS amount_cents \
                 FROM step_{} AS a JOIN step_{} AS b ON a.account_id = b.account_id",
                i - 1,
                i - 2
            ),
        };
        let id = workspace
            .add_fragment(FragmentKind::Cte, format!("step_{}", i), body)
            .unwrap();

        for &dep in ids.iter().rev().take(2) {
            workspace.add_dependency(id, dep).unwrap();
        }
        ids.push(id);
    }

    let main = workspace
        .add_fragment(
            FragmentKind::Main,
            "main",
            format!("SELECT account_id, amount_cents FROM step_{}", num_ctes - 1),
        )
        .unwrap();
    if let Some(&last) = ids.last() {
        workspace.add_dependency(main, last).unwrap();
    }

    (workspace, main)
}

/// Benchmark: dependency collection (10, 100, 1000 CTEs)
fn bench_dependency_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency_collection");

    for num_ctes in [10, 100, 1000].iter() {
        let (workspace, main) = generate_workspace(*num_ctes);

        group.bench_with_input(BenchmarkId::from_parameter(num_ctes), num_ctes, |b, _| {
            b.iter(|| {
                let collector = DependencyCollector::new(workspace.fragments(), CyclePolicy::Reject);
                black_box(collector.collect(main))
            });
        });
    }

    group.finish();
}

/// Benchmark: dependency depths for graph statistics
fn bench_dependency_depths(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency_depths");

    for num_ctes in [10, 100, 1000].iter() {
        let (workspace, _) = generate_workspace(*num_ctes);

        group.bench_with_input(BenchmarkId::from_parameter(num_ctes), num_ctes, |b, _| {
            b.iter(|| black_box(workspace.statistics()));
        });
    }

    group.finish();
}

/// Benchmark: WITH-clause rendering of collected CTEs
fn bench_with_rendering(c: &mut Criterion) {
    let mut group = c.benchmark_group("with_rendering");

    for num_ctes in [10, 100, 1000].iter() {
        let (workspace, main) = generate_workspace(*num_ctes);
        let collector = DependencyCollector::new(workspace.fragments(), CyclePolicy::Reject);
        let ctes: Vec<_> = collector
            .collect(main)
            .unwrap()
            .into_iter()
            .filter_map(|id| workspace.fragment(id))
            .collect();
        let body = workspace.fragment(main).unwrap().body();

        group.bench_with_input(BenchmarkId::from_parameter(num_ctes), num_ctes, |b, _| {
            b.iter(|| black_box(WithComposer::new().with_ctes(ctes.clone()).compose(body)));
        });
    }

    group.finish();
}

/// Benchmark: full composition including parse, filter and format
fn bench_dynamic_sql(c: &mut Criterion) {
    let mut group = c.benchmark_group("dynamic_sql");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let filter = r#"{"account_id": [1, 2, 3], "amount_cents": {"min": 100}}"#;

    for num_ctes in [10, 50].iter() {
        let (workspace, main) = generate_workspace(*num_ctes);

        group.bench_with_input(BenchmarkId::from_parameter(num_ctes), num_ctes, |b, _| {
            b.iter(|| {
                runtime.block_on(async {
                    black_box(workspace.dynamic_sql(main, None, Some(filter), true).await)
                })
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dependency_collection,
    bench_dependency_depths,
    bench_with_rendering,
    bench_dynamic_sql
);
criterion_main!(benches);
