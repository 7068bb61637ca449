//! Discretised shapelet kernels and their sizing.

pub mod calibrate;

use log::{debug, warn};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::basis::{BasisFamily, SizePolicy};
use crate::config::KernelConfig;
use crate::error::{Result, ShapeletError};

/// Smallest grid a kernel may be evaluated on.
pub const MIN_KERNEL_SIZE: usize = 9;

/// Square coordinate grid of width `n`, centred on zero.
///
/// Returns the meshgrid pair `(grid_x, grid_y)` in row-major order. An even
/// `n` is bumped to the next odd value.
pub fn make_grid(n: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let n = odd_size(n)?;
    let half = (n - 1) as f64 / 2.0;
    let axis: Vec<f64> = (0..n).map(|i| i as f64 - half).collect();
    let grid_x = (0..n).flat_map(|_| axis.iter().copied()).collect();
    let grid_y = axis.iter().flat_map(|&y| std::iter::repeat_n(y, n)).collect();
    Ok((grid_x, grid_y))
}

fn odd_size(n: usize) -> Result<usize> {
    let n = if n % 2 == 0 {
        warn!("Even grid size {} requested, using {}", n, n + 1);
        n + 1
    } else {
        n
    };
    if n < MIN_KERNEL_SIZE {
        return Err(ShapeletError::InvalidInput(format!(
            "kernel grid must be at least {} wide, got {}",
            MIN_KERNEL_SIZE, n
        )));
    }
    Ok(n)
}

/// A shapelet sampled on an odd, square grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    pub order: u32,
    pub beta: f64,
    pub family: BasisFamily,
    pub size: usize,
    /// Row-major samples, `size * size` of them.
    pub data: Vec<Complex<f64>>,
}

impl Kernel {
    /// Sample `family` on a `size x size` grid.
    pub fn evaluate(order: u32, beta: f64, family: BasisFamily, size: usize) -> Result<Self> {
        family.check_parameters(order, beta)?;
        let size = odd_size(size)?;
        let half = (size - 1) as f64 / 2.0;
        let data = (0..size * size)
            .into_par_iter()
            .map(|idx| {
                let x = (idx % size) as f64 - half;
                let y = (idx / size) as f64 - half;
                family.evaluate(order, x, y, beta)
            })
            .collect();
        Ok(Self {
            order,
            beta,
            family,
            size,
            data,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Complex<f64> {
        self.data[y * self.size + x]
    }

    pub fn mid(&self) -> usize {
        (self.size - 1) / 2
    }

    /// Real part of row `row`.
    pub fn real_row(&self, row: usize) -> Vec<f64> {
        self.data[row * self.size..(row + 1) * self.size].iter().map(|c| c.re).collect()
    }

    /// `|Re k[mid, last]| / max(Re k)`: how much of the function the grid cuts off.
    pub fn edge_weight(&self) -> f64 {
        let max_re = self.data.iter().map(|c| c.re).fold(f64::NEG_INFINITY, f64::max);
        if max_re <= 0.0 {
            // no positive lobe, nothing left to truncate
            return 0.0;
        }
        self.get(self.size - 1, self.mid()).re.abs() / max_re
    }

    pub fn mean(&self) -> Complex<f64> {
        self.data.iter().sum::<Complex<f64>>() / self.data.len() as f64
    }

    /// Centred sub-kernel of the (odd, smaller) `size`.
    ///
    /// Grid coordinates are integers about the centre, so cropping is exact.
    pub fn crop(&self, size: usize) -> Self {
        let offset = (self.size - size) / 2;
        let mut data = Vec::with_capacity(size * size);
        for y in offset..offset + size {
            let start = y * self.size + offset;
            data.extend_from_slice(&self.data[start..start + size]);
        }
        Self {
            order: self.order,
            beta: self.beta,
            family: self.family,
            size,
            data,
        }
    }
}

/// Build a kernel whose grid fits the function, following the family's
/// [`SizePolicy`].
pub fn build_kernel(order: u32, beta: f64, family: BasisFamily, config: &KernelConfig) -> Result<Kernel> {
    match family.size_policy(config) {
        SizePolicy::Grow { start, step, threshold } => {
            let mut size = start;
            loop {
                let kernel = Kernel::evaluate(order, beta, family, size)?;
                if kernel.edge_weight() <= threshold {
                    debug!("order {} beta {:.4}: kernel size {}", order, beta, kernel.size);
                    return Ok(kernel);
                }
                size = kernel.size + step;
                if size > config.max_size {
                    return Err(ShapeletError::KernelSizeExhausted { order, beta, size });
                }
            }
        }
        SizePolicy::Shrink { start, step, threshold } => {
            let full = Kernel::evaluate(order, beta, family, start)?;
            let mut size = full.size;
            loop {
                let kernel = full.crop(size);
                if kernel.edge_weight() >= threshold {
                    debug!("order {} beta {:.4}: kernel size {}", order, beta, kernel.size);
                    return Ok(kernel);
                }
                if size < MIN_KERNEL_SIZE + step {
                    return Err(ShapeletError::KernelSizeExhausted {
                        order,
                        beta,
                        size: size.saturating_sub(step),
                    });
                }
                size -= step;
            }
        }
    }
}

type KernelKey = (BasisFamily, u32, u64);

/// Kernels are immutable once built and shared between the orders of an
/// analysis (and between analyses of images with the same wavelength).
#[derive(Debug, Default)]
pub struct KernelCache {
    kernels: Mutex<HashMap<KernelKey, Arc<Kernel>>>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&self, order: u32, beta: f64, family: BasisFamily, config: &KernelConfig) -> Result<Arc<Kernel>> {
        let key = (family, order, beta.to_bits());
        if let Some(kernel) = self.lock().get(&key) {
            return Ok(Arc::clone(kernel));
        }
        // built outside the lock so independent orders do not serialise
        let kernel = Arc::new(build_kernel(order, beta, family, config)?);
        Ok(Arc::clone(self.lock().entry(key).or_insert(kernel)))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<KernelKey, Arc<Kernel>>> {
        self.kernels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_grid_bumps_even_sizes_and_rejects_small_ones() {
        let (gx, gy) = make_grid(10).unwrap();
        assert_eq!(gx.len(), 121);
        assert_eq!((gx[0], gx[10]), (-5.0, 5.0));
        assert_eq!((gy[0], gy[120]), (-5.0, 5.0));
        assert!(make_grid(7).is_err());
        assert!(make_grid(8).is_ok());
    }

    #[test]
    fn growing_kernels_meet_their_edge_threshold() {
        let config = KernelConfig::default();
        for order in 1..=6 {
            let kernel = build_kernel(order, 3.0, BasisFamily::PolarN0, &config).unwrap();
            assert_eq!(kernel.size % 2, 1);
            assert!(kernel.edge_weight() <= config.grow_threshold);
            if kernel.size > config.grow_start {
                let smaller = Kernel::evaluate(order, 3.0, BasisFamily::PolarN0, kernel.size - config.step).unwrap();
                assert!(smaller.edge_weight() > config.grow_threshold);
            }
        }
    }

    #[test]
    fn shrinking_kernels_stop_at_the_first_significant_edge() {
        let config = KernelConfig::default();
        let kernel = build_kernel(2, 4.0, BasisFamily::PolarN1, &config).unwrap();
        assert_eq!(kernel.size % 2, 1);
        assert!(kernel.size < config.shrink_start);
        assert!(kernel.edge_weight() >= config.shrink_threshold);
        let larger = Kernel::evaluate(2, 4.0, BasisFamily::PolarN1, kernel.size + config.step).unwrap();
        assert!(larger.edge_weight() < config.shrink_threshold);
    }

    #[test]
    fn crop_matches_direct_evaluation() {
        let big = Kernel::evaluate(3, 2.5, BasisFamily::PolarN1, 31).unwrap();
        let direct = Kernel::evaluate(3, 2.5, BasisFamily::PolarN1, 23).unwrap();
        assert_eq!(big.crop(23), direct);
    }

    #[test]
    fn growth_is_bounded() {
        let config = KernelConfig {
            max_size: 41,
            ..KernelConfig::default()
        };
        let err = build_kernel(1, 50.0, BasisFamily::PolarN0, &config);
        assert!(matches!(err, Err(ShapeletError::KernelSizeExhausted { .. })));
    }

    #[test]
    fn cache_shares_kernels() {
        let cache = KernelCache::new();
        let config = KernelConfig::default();
        let a = cache.get_or_build(2, 2.0, BasisFamily::PolarN0, &config).unwrap();
        let b = cache.get_or_build(2, 2.0, BasisFamily::PolarN0, &config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
