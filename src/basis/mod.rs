//! Basis families used as convolution kernels.

pub mod functions;

use rustfft::num_complex::Complex;

use crate::config::{BetaSearchConfig, KernelConfig};
use crate::error::{Result, ShapeletError};

/// Orthonormal, rotationally symmetric polar shapelet families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasisFamily {
    /// No radial node. Compact support, closed-form length scale.
    PolarN0,
    /// One radial node. Extended support, length scale found numerically.
    PolarN1,
}

/// How the kernel grid is sized for a family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizePolicy {
    /// Start small and grow while the edge weight exceeds `threshold`.
    Grow { start: usize, step: usize, threshold: f64 },
    /// Start large and shrink while the edge weight stays below `threshold`.
    Shrink { start: usize, step: usize, threshold: f64 },
}

impl BasisFamily {
    pub fn name(&self) -> &'static str {
        match self {
            BasisFamily::PolarN0 => "polar n=0",
            BasisFamily::PolarN1 => "polar n=1",
        }
    }

    /// Value at Cartesian offset `(x, y)` from the kernel centre.
    ///
    /// `order` must be at least 1 and `beta` positive; [`check_parameters`]
    /// validates both once per kernel.
    ///
    /// [`check_parameters`]: BasisFamily::check_parameters
    #[inline]
    pub fn evaluate(&self, order: u32, x: f64, y: f64, beta: f64) -> Complex<f64> {
        match self {
            BasisFamily::PolarN0 => functions::polar_n0_unchecked(order, x, y, beta),
            BasisFamily::PolarN1 => functions::polar_n1_unchecked(order, x, y, beta),
        }
    }

    pub fn check_parameters(&self, order: u32, beta: f64) -> Result<()> {
        if order < 1 {
            return Err(ShapeletError::InvalidInput("shapelet order must be >= 1".to_string()));
        }
        if !(beta > 0.0 && beta.is_finite()) {
            return Err(ShapeletError::InvalidInput(format!("beta must be positive, got {}", beta)));
        }
        Ok(())
    }

    pub fn size_policy(&self, config: &KernelConfig) -> SizePolicy {
        match self {
            BasisFamily::PolarN0 => SizePolicy::Grow {
                start: config.grow_start,
                step: config.step,
                threshold: config.grow_threshold,
            },
            BasisFamily::PolarN1 => SizePolicy::Shrink {
                start: config.shrink_start,
                step: config.step,
                threshold: config.shrink_threshold,
            },
        }
    }

    /// Length scale matching `wavelength` for the given order.
    pub fn calibrate(
        &self,
        order: u32,
        wavelength: f64,
        search: &BetaSearchConfig,
        kernel: &KernelConfig,
    ) -> Result<f64> {
        crate::kernel::calibrate::lambda_to_beta(order, wavelength, *self, search, kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_pick_opposite_size_policies() {
        let config = KernelConfig::default();
        assert!(matches!(BasisFamily::PolarN0.size_policy(&config), SizePolicy::Grow { start: 21, .. }));
        assert!(matches!(BasisFamily::PolarN1.size_policy(&config), SizePolicy::Shrink { start: 501, .. }));
    }

    #[test]
    fn evaluate_agrees_with_checked_functions() {
        let a = BasisFamily::PolarN1.evaluate(3, 2.0, -1.0, 1.7);
        let b = functions::orthonormal_polar_n1(3, 2.0, -1.0, 1.7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parameters_are_validated() {
        assert!(BasisFamily::PolarN0.check_parameters(0, 1.0).is_err());
        assert!(BasisFamily::PolarN0.check_parameters(1, 0.0).is_err());
        assert!(BasisFamily::PolarN0.check_parameters(1, f64::NAN).is_err());
        assert!(BasisFamily::PolarN0.check_parameters(2, 0.5).is_ok());
    }
}
