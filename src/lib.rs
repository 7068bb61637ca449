//! Shapelet Response Library
//!
//! Quantifies periodic and quasi-periodic 2D patterns, such as micrographs of
//! self-assembled nanostructures, by projecting every local neighbourhood onto
//! a family of rotationally symmetric orthonormal functions ("shapelets").
//!
//! Based on: Tino et al., "Defect quantification in self-assembled patterns
//! using higher-order shapelets", Nanotechnology 35 (2024), and Suderman et al.,
//! Phys. Rev. E 91, 033307 (2015).
//!
//! ## Pipeline
//!
//! 1. **Wavelength** (`wavelength::estimate_wavelength`): the characteristic
//!    feature spacing, from the radially averaged power spectrum.
//! 2. **Kernels** (`kernel::build_kernel`, `kernel::calibrate::lambda_to_beta`):
//!    each order's length scale is tied to the wavelength and the grid is
//!    grown or shrunk until the kernel has decayed at its border.
//! 3. **Convolution** (`convolution::ConvolutionEngine`): magnitude and phase
//!    response per order, over a fixed order range or adaptively until the
//!    response saturates.
//! 4. **Response distance** (`distance::DistanceEngine`): distance of every
//!    response vector to the nearest reference vector, on the GPU through
//!    Vulkan when available, otherwise on the CPU.
//! 5. **Defects** (`cluster`): k-means over response vectors; selected clusters
//!    form the defect response distance field.
//! 6. **Orientation** (`orientation::estimate_orientation`): dense orientation
//!    field by iterative thresholding, dilation and median blending.
//!
//! `pipeline::ShapeletAnalysis` runs these end to end on an
//! [`image::loader::ImageSource`] and hands the results to an
//! [`image::ResultSink`].

pub mod basis;
pub mod cluster;
pub mod config;
pub mod convolution;
pub mod distance;
pub mod error;
pub mod field;
pub mod image;
pub mod kernel;
pub mod orientation;
pub mod pipeline;
#[cfg(feature = "vulkan")]
pub mod vulkan;
pub mod wavelength;

pub use basis::BasisFamily;
pub use cluster::{ClusterResult, ClusterSelector, FixedSelection, PointSelection, cluster};
pub use config::{BetaSearchConfig, ClusterConfig, ConvolutionConfig, KernelConfig, OrientationConfig, ShapeletConfig};
pub use convolution::{ConvolutionEngine, OrderPolicy, convolve, convolve_with_wavelength};
pub use distance::{DistanceBackend, DistanceEngine, PortableBackend, ReferenceSet, response_distance};
pub use error::{Result, ShapeletError};
pub use field::{Field2D, Normalization, Region, ResponseStack};
pub use crate::image::loader::{FileImageSource, ImageSource, MemoryImageSource};
pub use crate::image::{FieldMetadata, MemorySink, PngDirectorySink, ResultSink};
pub use orientation::{OrientationResult, TrialReport, estimate_orientation};
pub use pipeline::{Method, Pattern, ShapeletAnalysis};
pub use wavelength::{WavelengthRange, estimate_wavelength};
