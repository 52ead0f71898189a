//! Benchmarks for grid quorum construction
//!
//! Measures:
//! - Single quorum construction at growing populations
//! - Exhaustive pairwise intersection checks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use maekawa_quorum::{build_quorum, verify_intersection, NodeId};

fn bench_build_quorum(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_quorum");

    for &n in &[4u32, 16, 100, 1_000, 10_000, 100_000] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| build_quorum(black_box(NodeId(n / 2)), black_box(n)))
        });
    }
    group.finish();
}

fn bench_verify_intersection(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify_intersection");
    group.sample_size(10);

    for &n in &[9u32, 49, 100, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| verify_intersection(black_box(n)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build_quorum, bench_verify_intersection);
criterion_main!(benches);
