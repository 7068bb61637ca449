//! Multi-order convolutional responses.
//!
//! Each order `m` gets its own calibrated kernel. The complex response gives
//! a magnitude (how strongly the neighbourhood looks m-fold symmetric) and a
//! phase (the orientation of that symmetry, wrapped to `[0, 2*pi/m)`).

use log::{debug, info, warn};
use rayon::prelude::*;
use rustfft::num_complex::Complex;
use std::f64::consts::TAU;

use crate::basis::BasisFamily;
use crate::config::ShapeletConfig;
use crate::error::{Result, ShapeletError};
use crate::field::{Field2D, Normalization, ResponseStack};
use crate::image::fft::fft_convolve_same;
use crate::kernel::KernelCache;
use crate::wavelength::{WavelengthRange, estimate_wavelength};

/// Orders above this are past the useful range of the one-node family.
const N1_ORDER_WARNING: u32 = 10;

/// Which shapelet orders to convolve with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPolicy {
    /// Orders `1..=n`.
    Fixed(u32),
    /// Keep adding orders until the response energy saturates.
    Adaptive,
}

/// One order's response planes.
struct OrderResponse {
    magnitude: Vec<f64>,
    phase: Vec<f64>,
    energy: f64,
}

/// Convolution front end that owns the kernel cache of an analysis.
#[derive(Debug, Default)]
pub struct ConvolutionEngine {
    pub config: ShapeletConfig,
    cache: KernelCache,
}

impl ConvolutionEngine {
    pub fn new(config: ShapeletConfig) -> Self {
        Self {
            config,
            cache: KernelCache::new(),
        }
    }

    pub fn cached_kernels(&self) -> usize {
        self.cache.len()
    }

    pub fn convolve(
        &self,
        image: &Field2D,
        wavelength: f64,
        policy: OrderPolicy,
        family: BasisFamily,
        normalization: Normalization,
    ) -> Result<ResponseStack> {
        if image.width == 0 || image.height == 0 {
            return Err(ShapeletError::InvalidInput("image is empty".to_string()));
        }
        image.ensure_finite()?;

        let responses = match policy {
            OrderPolicy::Fixed(0) => {
                return Err(ShapeletError::InvalidInput("fixed order count must be >= 1".to_string()));
            }
            OrderPolicy::Fixed(n) => {
                if family == BasisFamily::PolarN1 && n >= N1_ORDER_WARNING {
                    warn!(
                        "Shapelet behaviour of the {} family degrades for m >= {}; requested up to m = {}",
                        family.name(),
                        N1_ORDER_WARNING,
                        n
                    );
                }
                let responses = (1..=n)
                    .into_par_iter()
                    .map(|order| self.order_response(image, wavelength, order, family))
                    .collect::<Result<Vec<_>>>()?;
                info!("Convolution complete for shapelets m <= {}", n);
                responses
            }
            OrderPolicy::Adaptive => {
                if family != BasisFamily::PolarN0 {
                    return Err(ShapeletError::InvalidInput(format!(
                        "adaptive order selection is only defined for the {} family",
                        BasisFamily::PolarN0.name()
                    )));
                }
                self.adaptive_responses(image, wavelength, family)?
            }
        };

        let (magnitude_planes, phase_planes) = responses.into_iter().map(|r| (r.magnitude, r.phase)).unzip();
        ResponseStack::from_planes(image.width, image.height, magnitude_planes, phase_planes, normalization)
    }

    /// Add orders until `energy / max energy` drops below the tolerance; the
    /// order that triggers the stop is discarded.
    fn adaptive_responses(&self, image: &Field2D, wavelength: f64, family: BasisFamily) -> Result<Vec<OrderResponse>> {
        let tolerance = self.config.convolution.min_response_tolerance;
        let max_order = self.config.convolution.max_adaptive_order;
        let mut responses = Vec::new();
        let mut max_energy: f64 = 0.0;

        for order in 1..=max_order {
            let response = self.order_response(image, wavelength, order, family)?;
            max_energy = max_energy.max(response.energy);

            if max_energy == 0.0 {
                warn!("Order {} has no response; keeping a single zero order", order);
                responses.push(response);
                return Ok(responses);
            }

            let ratio = response.energy / max_energy;
            debug!("order {}: relative response {:.4}", order, ratio);
            if ratio < tolerance {
                info!("Convolution complete for shapelets m <= {} before tolerance exceeded", order - 1);
                return Ok(responses);
            }
            responses.push(response);
        }

        Err(ShapeletError::AdaptiveOrderExhausted { max_order })
    }

    fn order_response(&self, image: &Field2D, wavelength: f64, order: u32, family: BasisFamily) -> Result<OrderResponse> {
        let config = &self.config;
        let beta = family.calibrate(order, wavelength, &config.beta_search, &config.kernel)?;
        let kernel = self.cache.get_or_build(order, beta, family, &config.kernel)?;

        let mean = kernel.mean();
        let centred: Vec<Complex<f64>> = kernel.data.iter().map(|c| c - mean).collect();
        let response = fft_convolve_same(image, &centred, kernel.size)?;

        let floor = config.convolution.response_floor;
        let (magnitude, phase): (Vec<f64>, Vec<f64>) = response
            .iter()
            .map(|c| {
                let mag = c.norm();
                if mag < floor { (0.0, 0.0) } else { (mag, wrap_phase(c.arg(), order)) }
            })
            .unzip();
        let energy = magnitude.iter().sum();

        debug!(
            "order {}: beta {:.4}, kernel {}x{}, energy {:.4e}",
            order, beta, kernel.size, kernel.size, energy
        );
        Ok(OrderResponse { magnitude, phase, energy })
    }
}

/// Map an angle onto `[0, 2*pi/m)`.
fn wrap_phase(angle: f64, order: u32) -> f64 {
    let m = order as f64;
    let wrapped = angle.rem_euclid(TAU) / m;
    if wrapped >= TAU / m { 0.0 } else { wrapped }
}

/// Convolve `image` after estimating its wavelength over the default range.
pub fn convolve(
    image: &Field2D,
    policy: OrderPolicy,
    family: BasisFamily,
    normalization: Normalization,
    config: &ShapeletConfig,
) -> Result<ResponseStack> {
    let wavelength = estimate_wavelength(image, WavelengthRange::default())?;
    convolve_with_wavelength(image, wavelength, policy, family, normalization, config)
}

pub fn convolve_with_wavelength(
    image: &Field2D,
    wavelength: f64,
    policy: OrderPolicy,
    family: BasisFamily,
    normalization: Normalization,
    config: &ShapeletConfig,
) -> Result<ResponseStack> {
    ConvolutionEngine::new(config.clone()).convolve(image, wavelength, policy, family, normalization)
}
