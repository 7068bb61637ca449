use rayon::prelude::*;

use super::{DistanceBackend, check_vector_sets};
use crate::error::Result;

/// Brute-force nearest reference search on the CPU, parallel over test vectors.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableBackend;

impl DistanceBackend for PortableBackend {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn min_distances(&self, refs: &[f64], tests: &[f64], depth: usize) -> Result<Vec<f64>> {
        check_vector_sets(refs, tests, depth)?;
        Ok(tests
            .par_chunks(depth)
            .map(|test| {
                refs.chunks(depth)
                    .map(|r| test.iter().zip(r).map(|(a, b)| (a - b) * (a - b)).sum::<f64>())
                    .fold(f64::INFINITY, f64::min)
                    .sqrt()
            })
            .collect())
    }
}
