//! Benchmarks for the dot-product kernels that dominate search cost.

use canopy::{simd, DIM};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_unit(rng: &mut StdRng) -> Vec<f32> {
    let mut v: Vec<f32> = (0..DIM).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-9);
    for x in &mut v {
        *x /= norm;
    }
    v
}

fn bench_dot(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let a = random_unit(&mut rng);
    let b = random_unit(&mut rng);

    let mut group = c.benchmark_group("dot");
    group.throughput(Throughput::Elements(DIM as u64));
    group.bench_function(simd::kernel_name(), |bench| {
        bench.iter(|| simd::dot(black_box(&a), black_box(&b)))
    });
    group.bench_function("scalar", |bench| {
        bench.iter(|| simd::dot_scalar(black_box(&a), black_box(&b)))
    });
    group.finish();
}

fn bench_dot_batch(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let query = random_unit(&mut rng);

    let mut group = c.benchmark_group("dot_batch_flat");
    for rows in [16_usize, 64, 256] {
        let mut data = Vec::with_capacity(rows * DIM);
        for _ in 0..rows {
            data.extend_from_slice(&random_unit(&mut rng));
        }
        let mut out = vec![0.0_f64; rows];
        group.throughput(Throughput::Elements((rows * DIM) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |bench, &rows| {
            bench.iter(|| {
                simd::dot_batch_into(black_box(&query), black_box(&data), rows, &mut out)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dot, bench_dot_batch);
criterion_main!(benches);
