//! Benchmarks for factor-graph assembly and max-sum propagation.
//!
//! Run with `cargo bench --bench propagation`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use exemplar_core::{propagate, DissimilarityMatrix, FactorGraph, PropagationConfig};

fn make_dissimilarities(side: usize, seed: u64) -> DissimilarityMatrix {
    let mut state = seed;
    let mut data = Vec::with_capacity(side * side);
    for _ in 0..side * side {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let unit = ((state >> 11) as f64) / ((u64::MAX >> 11) as f64);
        data.push(unit * 10.0);
    }
    DissimilarityMatrix::from_flat(data, side, side).expect("valid benchmark matrix")
}

fn bench_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble");
    let config = PropagationConfig::default();
    for (idx, side) in [4_usize, 8, 16].iter().enumerate() {
        let matrix = make_dissimilarities(*side, idx as u64 + 1);
        group.bench_with_input(BenchmarkId::from_parameter(side), &matrix, |b, matrix| {
            b.iter(|| {
                black_box(
                    FactorGraph::assemble(black_box(matrix.clone()), 1.0, &config)
                        .expect("assembly"),
                )
            });
        });
    }
    group.finish();
}

fn bench_propagate(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate");
    let config = PropagationConfig {
        max_iterations: 100,
        ..PropagationConfig::default()
    };
    for (idx, side) in [4_usize, 8, 16].iter().enumerate() {
        let matrix = make_dissimilarities(*side, idx as u64 + 1);
        group.bench_with_input(BenchmarkId::from_parameter(side), &matrix, |b, matrix| {
            b.iter(|| {
                black_box(propagate(black_box(matrix.clone()), 1.0, &config).expect("propagation"))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assemble, bench_propagate);
criterion_main!(benches);
