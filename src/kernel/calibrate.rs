//! Length-scale calibration: choose `beta` so a kernel's lobes match the
//! characteristic wavelength of the image.

use log::debug;
use std::f64::consts::SQRT_2;

use super::build_kernel;
use crate::basis::BasisFamily;
use crate::config::{BetaSearchConfig, KernelConfig};
use crate::error::{Result, ShapeletError};

/// Result of the numerical length-scale search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchOutcome {
    Converged { beta: f64, iterations: usize },
    Exhausted { beta: f64, iterations: usize },
}

pub fn lambda_to_beta(
    order: u32,
    wavelength: f64,
    family: BasisFamily,
    search: &BetaSearchConfig,
    kernel: &KernelConfig,
) -> Result<f64> {
    if order < 1 {
        return Err(ShapeletError::InvalidInput("shapelet order must be >= 1".to_string()));
    }
    if !(wavelength > 0.0 && wavelength.is_finite()) {
        return Err(ShapeletError::InvalidInput(format!(
            "wavelength must be positive, got {}",
            wavelength
        )));
    }
    match family {
        BasisFamily::PolarN0 => Ok(lambda_to_beta_n0(order, wavelength)),
        BasisFamily::PolarN1 => match search_beta_n1(order, wavelength, search, kernel)? {
            SearchOutcome::Converged { beta, .. } => Ok(beta),
            SearchOutcome::Exhausted { beta, iterations } => {
                Err(ShapeletError::BetaSearchExhausted { order, beta, iterations })
            }
        },
    }
}

/// Closed form for the node-free family: `beta = lambda / sqrt(m) * f(m)`.
pub fn lambda_to_beta_n0(order: u32, wavelength: f64) -> f64 {
    let f = match order {
        1 => 0.25,
        2 => 0.5,
        3 => 1.0 / 3f64.sqrt(),
        4 => SQRT_2 / 2.0,
        _ => 1.0,
    };
    wavelength / (order as f64).sqrt() * f
}

/// Walk `beta` until the midpoint between the inner and outer lobe of the
/// kernel's midline sits `target_factor * wavelength` pixels from the centre.
pub fn search_beta_n1(
    order: u32,
    wavelength: f64,
    search: &BetaSearchConfig,
    kernel_config: &KernelConfig,
) -> Result<SearchOutcome> {
    let target = (search.target_factor * wavelength).round_ties_even();
    let mut beta = search.initial_beta;

    for iteration in 0..search.max_iterations {
        let kernel = build_kernel(order, beta, BasisFamily::PolarN1, kernel_config)?;
        let mid = kernel.mid();
        let peaks = midline_extrema(&kernel.real_row(mid), mid);
        let [p0, p1] = peaks[..] else {
            return Err(ShapeletError::PeakCount {
                order,
                beta,
                found: peaks.len(),
            });
        };

        let midpoint = p0 as f64 + ((p1 - p0) as f64 / 2.0).round_ties_even();
        let residual = target - (midpoint - mid as f64);
        debug!(
            "order {} beta {:.4}: lobe midpoint at {} px, target {} px",
            order,
            beta,
            midpoint - mid as f64,
            target
        );

        if residual.abs() <= search.tolerance_px {
            return Ok(SearchOutcome::Converged {
                beta,
                iterations: iteration + 1,
            });
        }

        let step = if residual > 0.0 {
            if residual < 2.0 {
                search.fine_step
            } else {
                3.0 * search.fine_step * residual
            }
        } else {
            // overshoot: step back in proportion to the miss
            search.fine_step * residual
        };
        beta = if beta + step > 0.0 { beta + step } else { beta / 2.0 };
    }

    Ok(SearchOutcome::Exhausted {
        beta,
        iterations: search.max_iterations,
    })
}

/// Strict local extrema of `line` right of `mid`, excluding the last sample.
fn midline_extrema(line: &[f64], mid: usize) -> Vec<usize> {
    (mid + 1..line.len().saturating_sub(1))
        .filter(|&p| {
            let (a, b, c) = (line[p - 1], line[p], line[p + 1]);
            (a < b && b > c) || (a > b && b < c)
        })
        .collect()
}
