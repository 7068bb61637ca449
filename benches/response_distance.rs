//! Benchmark for the response distance backends
//! Same synthetic response vectors through the portable and the probed backend

use criterion::{Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shapelet_response::{DistanceBackend, DistanceEngine, PortableBackend};

const DEPTH: usize = 12;

fn vectors(rng: &mut StdRng, count: usize) -> Vec<f64> {
    (0..count * DEPTH).map(|_| rng.gen_range(0.0..1.0)).collect()
}

fn benchmark_response_distance(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_distance");
    group.sample_size(10);

    let mut rng = StdRng::seed_from_u64(3);
    // a 256x256 image against 20 clustered references
    let tests = vectors(&mut rng, 256 * 256);
    let refs = vectors(&mut rng, 20);

    group.bench_function("portable_256x256_k20", |b| {
        b.iter(|| {
            let _distances = PortableBackend
                .min_distances(&refs, &tests, DEPTH)
                .expect("Portable response distance failed");
        })
    });

    let engine = DistanceEngine::probe();
    if engine.backend_name() != PortableBackend.name() {
        group.bench_function(format!("{}_256x256_k20", engine.backend_name()), |b| {
            b.iter(|| {
                let _distances = engine
                    .min_distances(&refs, &tests, DEPTH)
                    .expect("Accelerated response distance failed");
            })
        });
    } else {
        println!("No accelerated backend on this system, benchmarking the portable backend only");
    }

    group.finish();
}

criterion_group!(benches, benchmark_response_distance);
criterion_main!(benches);
