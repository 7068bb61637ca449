use thiserror::Error;
#[cfg(feature = "vulkan")]
use ash::vk;

#[derive(Error, Debug)]
pub enum ShapeletError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No radial frequency bin falls inside the wavelength range [{min:?}, {max:?}]")]
    EmptyWavelengthRange { min: Option<f64>, max: Option<f64> },

    #[error("Region x=[{x0}, {x1}], y=[{y0}, {y1}] lies outside a {width}x{height} field")]
    RegionOutOfBounds {
        x0: usize,
        x1: usize,
        y0: usize,
        y1: usize,
        width: usize,
        height: usize,
    },

    #[error("Response depth mismatch: expected {expected}, got {found}")]
    DepthMismatch { expected: usize, found: usize },

    #[error("Response stack normalised as {found}, but {expected} is required")]
    NormalizationMismatch { expected: &'static str, found: &'static str },

    #[error("Kernel size search for order {order} (beta = {beta:.4}) gave up at size {size}")]
    KernelSizeExhausted { order: u32, beta: f64, size: usize },

    #[error("Expected two midline lobes for order {order} at beta = {beta:.4}, found {found}")]
    PeakCount { order: u32, beta: f64, found: usize },

    #[error("Length-scale search for order {order} did not converge after {iterations} iterations (last beta = {beta:.4})")]
    BetaSearchExhausted { order: u32, beta: f64, iterations: usize },

    #[error("Adaptive order growth reached order {max_order} without the response saturating")]
    AdaptiveOrderExhausted { max_order: u32 },

    #[error("Orientation failed at threshold {threshold:.2} with unresolved fraction {error:.5}; the pattern may be mixed-order or unsuitable")]
    OrientationFailed { threshold: f64, error: f64 },

    #[cfg(feature = "vulkan")]
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    #[cfg(feature = "vulkan")]
    #[error("GPU allocator error: {0}")]
    GpuAllocatorError(#[from] gpu_allocator::AllocationError),

    #[cfg(feature = "vulkan")]
    #[error("Pipeline creation error: {0:?}")]
    PipelineCreationError((Vec<vk::Pipeline>, vk::Result)),

    #[error("No suitable GPU found")]
    NoGpuFound,

    #[error("Vulkan entry load error: {0}")]
    VulkanEntryLoadError(String),

    #[error("Compute shader unavailable: {0}")]
    ShaderUnavailable(String),

    #[error("Accelerated backend disagrees with the portable result by {0:e}")]
    BackendMismatch(f64),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, ShapeletError>;
