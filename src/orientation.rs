//! Dense orientation field from one order's steerable response.
//!
//! Only pixels with a strong response carry a trustworthy phase. Starting
//! from the strictest magnitude threshold, the phase is masked to those
//! pixels, spread over the gaps by grey dilation and smoothed by a median
//! filter. The threshold is relaxed until almost no pixel is left undefined.

use log::{debug, info};
use std::f64::consts::TAU;

use crate::config::OrientationConfig;
use crate::error::{Result, ShapeletError};
use crate::field::{Field2D, Normalization, ResponseStack};
use crate::image::morphology::{grey_dilation, median_filter};
use crate::image::trim_field;

/// Diagnostic state of one threshold trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialReport {
    /// 1-based trial counter.
    pub trial: usize,
    pub threshold: f64,
    /// Fraction of blended pixels that are still exactly zero.
    pub error: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrientationResult {
    /// Phase where the magnitude passed the accepted threshold, trimmed.
    pub mask: Field2D,
    pub dilated: Field2D,
    pub blended: Field2D,
    /// Largest orientation the order can express, `2*pi/m`.
    pub max_value: f64,
    pub threshold: f64,
    pub error: f64,
    pub trials: usize,
}

/// Outputs of one threshold trial.
struct Trial {
    mask: Field2D,
    dilated: Field2D,
    blended: Field2D,
    error: f64,
}

pub fn estimate_orientation(
    stack: &ResponseStack,
    order_index: usize,
    wavelength: f64,
    config: &OrientationConfig,
) -> Result<OrientationResult> {
    estimate_orientation_with_progress(stack, order_index, wavelength, config, |_| {})
}

/// As [`estimate_orientation`], reporting every trial to `progress`.
pub fn estimate_orientation_with_progress(
    stack: &ResponseStack,
    order_index: usize,
    wavelength: f64,
    config: &OrientationConfig,
    mut progress: impl FnMut(&TrialReport),
) -> Result<OrientationResult> {
    stack.require(Normalization::Individual)?;
    if order_index >= stack.depth {
        return Err(ShapeletError::InvalidInput(format!(
            "order index {} is outside a stack of depth {}",
            order_index, stack.depth
        )));
    }
    if !(wavelength > 0.0 && wavelength.is_finite()) {
        return Err(ShapeletError::InvalidInput(format!(
            "wavelength must be positive, got {}",
            wavelength
        )));
    }
    if config.step_pct == 0 {
        return Err(ShapeletError::InvalidInput("threshold step must be >= 1 hundredth".to_string()));
    }

    let dilation_size = window_size(config.dilation_factor, wavelength);
    let blend_size = window_size(config.blend_factor, wavelength);
    let magnitude = stack.magnitude_plane(order_index);
    let phase = stack.phase_plane(order_index);
    info!(
        "Orientation for m = {}: dilation {} px, blend {} px, tolerance {}",
        order_index + 1,
        dilation_size,
        blend_size,
        config.error_tolerance
    );

    let mut threshold_pct = config.start_threshold_pct;
    let mut trials = 0;
    loop {
        let threshold = threshold_pct as f64 / 100.0;
        let trial = run_trial(&magnitude, &phase, threshold, wavelength, dilation_size, blend_size)?;
        trials += 1;
        progress(&TrialReport {
            trial: trials,
            threshold,
            error: trial.error,
        });

        if trial.error <= config.error_tolerance {
            info!("Orientation successful with error {:.5} at threshold {:.2}", trial.error, threshold);
            return Ok(OrientationResult {
                mask: trial.mask,
                dilated: trial.dilated,
                blended: trial.blended,
                max_value: TAU / (order_index + 1) as f64,
                threshold,
                error: trial.error,
                trials,
            });
        }

        if threshold_pct < config.step_pct {
            return Err(ShapeletError::OrientationFailed {
                threshold,
                error: trial.error,
            });
        }
        threshold_pct -= config.step_pct;
        debug!(
            "Orientation failed with error {:.5}; reducing threshold to {:.2}",
            trial.error,
            threshold_pct as f64 / 100.0
        );
    }
}

fn window_size(factor: f64, wavelength: f64) -> usize {
    ((factor * wavelength).round_ties_even() as usize).max(1)
}

fn run_trial(
    magnitude: &Field2D,
    phase: &Field2D,
    threshold: f64,
    wavelength: f64,
    dilation_size: usize,
    blend_size: usize,
) -> Result<Trial> {
    let masked = Field2D {
        data: magnitude
            .data
            .iter()
            .zip(phase.data.iter())
            .map(|(&m, &p)| if m >= threshold { p } else { 0.0 })
            .collect(),
        width: magnitude.width,
        height: magnitude.height,
    };
    let mask = trim_field(&masked, wavelength)?;
    let dilated = grey_dilation(&mask, dilation_size)?;
    let blended = median_filter(&dilated, blend_size)?;
    let error = blended.data.iter().filter(|&&v| v == 0.0).count() as f64 / blended.len() as f64;

    Ok(Trial {
        mask,
        dilated,
        blended,
        error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(magnitude: Vec<f64>, phase: Vec<f64>, size: usize, normalization: Normalization) -> ResponseStack {
        ResponseStack::from_planes(size, size, vec![magnitude], vec![phase], normalization).unwrap()
    }

    #[test]
    fn strong_uniform_response_is_accepted_first_time() {
        let n = 24;
        let magnitude: Vec<f64> = (0..n * n).map(|i| if i == 0 { 0.0 } else { 1.0 }).collect();
        let s = stack(magnitude, vec![0.4; n * n], n, Normalization::Individual);
        let result = estimate_orientation(&s, 0, 4.0, &OrientationConfig::default()).unwrap();
        assert_eq!(result.trials, 1);
        assert_eq!(result.threshold, 1.0);
        assert!(result.error <= 0.01);
        assert_eq!(result.max_value, TAU);
        // trimmed by round(4 / 2) on every side
        assert_eq!((result.mask.width, result.mask.height), (20, 20));
        assert!(result.blended.data.iter().all(|&v| v == 0.4));
    }

    #[test]
    fn threshold_relaxes_until_accepted() {
        let n = 32;
        let magnitude: Vec<f64> = (0..n * n).map(|i| (i % n) as f64 / (n - 1) as f64).collect();
        let phase = vec![0.7; n * n];
        let s = stack(magnitude, phase, n, Normalization::Individual);

        let mut reports = Vec::new();
        let result =
            estimate_orientation_with_progress(&s, 0, 4.0, &OrientationConfig::default(), |r| reports.push(*r)).unwrap();
        assert!(result.trials > 1);
        assert_eq!(reports.len(), result.trials);
        assert!(result.error <= 0.01);
        assert!(result.threshold < 1.0);
        for pair in reports.windows(2) {
            assert!((pair[0].threshold - pair[1].threshold - 0.01).abs() < 1e-12);
        }
    }

    #[test]
    fn empty_response_fails_with_last_state() {
        let n = 16;
        let s = stack(vec![0.0; n * n], vec![0.0; n * n], n, Normalization::Individual);
        let mut trials = 0;
        let err = estimate_orientation_with_progress(&s, 0, 4.0, &OrientationConfig::default(), |_| trials += 1);
        match err {
            Err(ShapeletError::OrientationFailed { threshold, error }) => {
                assert_eq!(threshold, 0.0);
                assert_eq!(error, 1.0);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(trials, 101);
    }

    #[test]
    fn requires_individual_normalisation() {
        let n = 16;
        let s = stack(vec![1.0; n * n], vec![0.5; n * n], n, Normalization::Vector);
        assert!(matches!(
            estimate_orientation(&s, 0, 4.0, &OrientationConfig::default()),
            Err(ShapeletError::NormalizationMismatch { .. })
        ));
        let s = stack(vec![1.0; n * n], vec![0.5; n * n], n, Normalization::Individual);
        assert!(estimate_orientation(&s, 1, 4.0, &OrientationConfig::default()).is_err());
        assert!(estimate_orientation(&s, 0, 0.0, &OrientationConfig::default()).is_err());
    }
}
