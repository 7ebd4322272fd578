use criterion::{Criterion, criterion_group, criterion_main};
use oneflow_eager_kernels::{BinaryOp, cpu_accumulate, cpu_binary, cpu_sum};
use std::hint::black_box;

fn benchmark_binary(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary");
    let sizes = [1 << 10, 1 << 14, 1 << 18, 1 << 20];

    for &size in &sizes {
        let lhs = vec![1.0f32; size];
        let rhs = vec![2.0f32; size];

        group.bench_function(format!("mul/{}", size), |b| {
            b.iter(|| cpu_binary(BinaryOp::Mul, black_box(&lhs), black_box(&rhs)).unwrap())
        });
        group.bench_function(format!("scale/{}", size), |b| {
            b.iter(|| cpu_binary(BinaryOp::Div, black_box(&lhs), black_box(&[4.0f32])).unwrap())
        });
    }
    group.finish();
}

fn benchmark_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce");
    let sizes = [1 << 10, 1 << 14, 1 << 18, 1 << 20];

    for &size in &sizes {
        let data = vec![1.0f32; size];
        let mut acc = vec![0.0f32; size];

        group.bench_function(format!("sum/{}", size), |b| {
            b.iter(|| cpu_sum(black_box(&data)))
        });
        group.bench_function(format!("accumulate/{}", size), |b| {
            b.iter(|| cpu_accumulate(black_box(&mut acc), black_box(&data)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_binary, benchmark_reduce);
criterion_main!(benches);
