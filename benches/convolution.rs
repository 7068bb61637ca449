//! Benchmark for the multi-order shapelet convolution

use criterion::{Criterion, criterion_group, criterion_main};
use shapelet_response::{BasisFamily, ConvolutionEngine, Field2D, Normalization, OrderPolicy, ShapeletConfig};
use std::f64::consts::PI;

fn lattice(size: usize, period: f64) -> Field2D {
    Field2D::from_fn(size, size, |x, y| {
        0.5 * ((2.0 * PI * x as f64 / period).cos() + (2.0 * PI * y as f64 / period).cos())
    })
}

fn benchmark_convolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("shapelet_convolution");
    group.sample_size(10);

    let image = lattice(128, 8.0);
    // kernels are built once and served from the cache afterwards
    let engine = ConvolutionEngine::new(ShapeletConfig::default());

    group.bench_function("fixed_6_orders_128x128", |b| {
        b.iter(|| {
            let _stack = engine
                .convolve(&image, 8.0, OrderPolicy::Fixed(6), BasisFamily::PolarN0, Normalization::Individual)
                .expect("Convolution failed");
        })
    });

    group.bench_function("adaptive_128x128", |b| {
        b.iter(|| {
            let _stack = engine
                .convolve(&image, 8.0, OrderPolicy::Adaptive, BasisFamily::PolarN0, Normalization::Vector)
                .expect("Convolution failed");
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_convolution);
criterion_main!(benches);
