//! Tunable constants of the pipeline.
//!
//! Every empirically chosen threshold lives here so that callers can tighten
//! or relax it without touching the algorithms. The defaults reproduce the
//! values the method was published with.

/// Adaptive kernel sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    /// Starting size for compact kernels, grown until the edge weight drops.
    pub grow_start: usize,
    /// Grow while `edge weight > grow_threshold`.
    pub grow_threshold: f64,
    /// Starting size for extended kernels, shrunk until the edge weight rises.
    pub shrink_start: usize,
    /// Shrink while `edge weight < shrink_threshold`.
    pub shrink_threshold: f64,
    /// Size change per step (keeps the size odd).
    pub step: usize,
    /// Largest grid a growing kernel may reach before the search is abandoned.
    pub max_size: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            grow_start: 21,
            grow_threshold: 1e-4,
            shrink_start: 501,
            shrink_threshold: 1e-3,
            step: 4,
            max_size: 4001,
        }
    }
}

/// Numerical length-scale search for the extended basis family.
#[derive(Debug, Clone, PartialEq)]
pub struct BetaSearchConfig {
    pub initial_beta: f64,
    /// Lobe separation target as a multiple of the wavelength.
    pub target_factor: f64,
    /// Accept when the lobe midpoint is within this many pixels of the target.
    pub tolerance_px: f64,
    pub fine_step: f64,
    pub max_iterations: usize,
}

impl Default for BetaSearchConfig {
    fn default() -> Self {
        Self {
            initial_beta: 1.0,
            target_factor: 1.5,
            tolerance_px: 1.0,
            fine_step: 0.1,
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionConfig {
    /// Adaptive policy stops once `energy / max energy` falls below this.
    pub min_response_tolerance: f64,
    /// Hard bound on the adaptive order growth.
    pub max_adaptive_order: u32,
    /// Magnitudes below this are numerical noise and are clamped to zero.
    pub response_floor: f64,
}

impl Default for ConvolutionConfig {
    fn default() -> Self {
        Self {
            min_response_tolerance: 0.1,
            max_adaptive_order: 200,
            response_floor: 1e-10,
        }
    }
}

/// k-means clustering of response vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Independent k-means runs; the lowest distortion wins.
    pub restarts: usize,
    /// Stop a run once the distortion improves by less than this.
    pub threshold: f64,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            restarts: 20,
            threshold: 1e-5,
            max_iterations: 300,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrientationConfig {
    /// Starting magnitude threshold, in hundredths (100 = 1.0).
    pub start_threshold_pct: u32,
    /// Threshold decrement per retry, in hundredths.
    pub step_pct: u32,
    /// Largest accepted fraction of unresolved pixels.
    pub error_tolerance: f64,
    /// Dilation size as a multiple of the wavelength.
    pub dilation_factor: f64,
    /// Median blend size as a multiple of the wavelength.
    pub blend_factor: f64,
}

impl Default for OrientationConfig {
    fn default() -> Self {
        Self {
            start_threshold_pct: 100,
            step_pct: 1,
            error_tolerance: 0.01,
            dilation_factor: 2.0,
            blend_factor: 4.0,
        }
    }
}

/// All tunables of one analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeletConfig {
    pub kernel: KernelConfig,
    pub beta_search: BetaSearchConfig,
    pub convolution: ConvolutionConfig,
    pub cluster: ClusterConfig,
    pub orientation: OrientationConfig,
}
