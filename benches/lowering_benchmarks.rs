//! Benchmarks for graph construction and lowering.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use polylower::prelude::*;

fn matmul(n: i64) -> Vec<Tensor> {
    let a = Tensor::placeholder("A", &[n, n], Type::float(32));
    let b = Tensor::placeholder("B", &[n, n], Type::float(32));
    let c = Tensor::reduce("C", &[n, n], ReduceKind::Sum, &[n], |ax, rk| {
        let lhs = a.at(vec![ax[0].clone(), rk[0].clone()])?;
        let rhs = b.at(vec![rk[0].clone(), ax[1].clone()])?;
        Expr::mul(lhs, rhs)
    })
    .unwrap();
    c.vectorize(1, 8);
    vec![a, b, c]
}

/// A chain of `len` elementwise stages over one input.
fn elementwise_chain(len: usize) -> Vec<Tensor> {
    let input = Tensor::placeholder("In", &[256], Type::float(32));
    let mut last = input.clone();
    for n in 0..len {
        let prev = last.clone();
        last = Tensor::compute(format!("T{}", n), &[256], |ax| {
            Expr::add(prev.at(ax.to_vec())?, Expr::float(1.0))
        })
        .unwrap();
    }
    vec![input, last]
}

fn bench_graph(c: &mut Criterion) {
    let chain = elementwise_chain(32);
    c.bench_function("comp_graph_chain_32", |b| {
        b.iter(|| create_comp_graph(black_box(&chain), true).unwrap())
    });
}

fn bench_lower(c: &mut Criterion) {
    let mm = matmul(64);
    c.bench_function("lower_matmul", |b| {
        b.iter(|| polylower::lower("matmul", black_box(&mm), &[], &[], LowerOptions::default()).unwrap())
    });

    let chain = elementwise_chain(16);
    c.bench_function("lower_chain_16", |b| {
        b.iter(|| polylower::lower("chain", black_box(&chain), &[], &[], LowerOptions::default()).unwrap())
    });
}

criterion_group!(benches, bench_graph, bench_lower);
criterion_main!(benches);
