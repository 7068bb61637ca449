//! High-level analyses built on the response pipeline.
//!
//! [`ShapeletAnalysis`] ties together wavelength estimation, convolution, the
//! response-distance engine, clustering and orientation, and post-processes
//! the results into the scalar fields an operator looks at.

use log::info;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::basis::BasisFamily;
use crate::cluster::{ClusterResult, ClusterSelector, FixedSelection, cluster};
use crate::config::ShapeletConfig;
use crate::convolution::{ConvolutionEngine, OrderPolicy};
use crate::distance::{DistanceEngine, ReferenceSet};
use crate::error::{Result, ShapeletError};
use crate::field::{Field2D, Normalization, Region, ResponseStack};
use crate::image::loader::ImageSource;
use crate::image::morphology::median_filter;
use crate::image::{FieldMetadata, ResultSink, trim_field};
use crate::orientation::{OrientationResult, estimate_orientation};
use crate::wavelength::{WavelengthRange, estimate_wavelength};

/// Reference regions are this many wavelengths across.
const REFERENCE_WINDOW_FACTOR: f64 = 2.5;
/// Default k-means codebook size for the reference set.
pub const DEFAULT_REFERENCE_CLUSTERS: usize = 20;
/// Orientation only needs the low orders.
const ORIENTATION_ORDERS: u32 = 6;

/// Symmetry class of the self-assembled pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    Stripe,
    Square,
    Hexagonal,
}

impl Pattern {
    /// Smallest cluster count that separates the defect types of the pattern.
    pub fn clusters(&self) -> usize {
        match self {
            Pattern::Stripe => 4,
            Pattern::Square => 8,
            Pattern::Hexagonal => 10,
        }
    }

    /// Zero-based stack index of the order whose phase encodes orientation.
    pub fn orientation_index(&self) -> usize {
        match self {
            Pattern::Stripe => 0,
            Pattern::Square => 3,
            Pattern::Hexagonal => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Pattern::Stripe => "stripe",
            Pattern::Square => "square",
            Pattern::Hexagonal => "hexagonal",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pattern {
    type Err = ShapeletError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stripe" => Ok(Pattern::Stripe),
            "square" => Ok(Pattern::Square),
            "hexagonal" => Ok(Pattern::Hexagonal),
            other => Err(ShapeletError::InvalidInput(format!(
                "unknown pattern '{}', expected stripe, square or hexagonal",
                other
            ))),
        }
    }
}

/// Which analysis [`ShapeletAnalysis::run`] performs.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    ResponseDistance {
        /// `None` picks the most regular window automatically.
        reference: Option<Region>,
        /// k-means codebook size; 0 keeps every reference vector.
        clusters: usize,
        orders: OrderPolicy,
    },
    DefectIdentification {
        pattern: Pattern,
        /// Cluster ids treated as defects.
        selected: Vec<usize>,
    },
    Orientation {
        pattern: Pattern,
    },
}

impl Method {
    pub fn response_distance() -> Self {
        Method::ResponseDistance {
            reference: None,
            clusters: DEFAULT_REFERENCE_CLUSTERS,
            orders: OrderPolicy::Adaptive,
        }
    }
}

/// Raw response distance and the reference it was measured against.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDistanceOutput {
    /// Untrimmed distance of every pixel to the nearest reference vector.
    pub distance: Field2D,
    pub region: Region,
    pub references: usize,
}

impl ResponseDistanceOutput {
    /// Scaled to [0, 1], inverted so regular areas read bright, and trimmed.
    pub fn display_field(&self, wavelength: f64) -> Result<Field2D> {
        let scaled = self.distance.normalized();
        let inverted = Field2D {
            data: scaled.data.iter().map(|v| 1.0 - v).collect(),
            width: scaled.width,
            height: scaled.height,
        };
        trim_field(&inverted, wavelength)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefectOutput {
    pub clusters: ClusterResult,
    pub selected: Vec<usize>,
    /// Defect response distance, untrimmed.
    pub defects: Field2D,
}

impl DefectOutput {
    /// Median smoothed over half a wavelength, then trimmed.
    pub fn display_field(&self, wavelength: f64) -> Result<Field2D> {
        let size = ((wavelength / 2.0).round_ties_even() as usize).max(1);
        trim_field(&median_filter(&self.defects, size)?, wavelength)
    }
}

/// Most regular `round(2.5 * wavelength)` square window of `irregularity`.
///
/// Windows are kept clear of the `round(wavelength / 2)` border that the
/// padded convolution distorts whenever the field is large enough. Ties go to
/// the first window in row-major order.
pub fn find_reference_region(irregularity: &Field2D, wavelength: f64) -> Result<Region> {
    if !(wavelength > 0.0 && wavelength.is_finite()) {
        return Err(ShapeletError::InvalidInput(format!(
            "wavelength must be positive, got {}",
            wavelength
        )));
    }
    let (w, h) = (irregularity.width, irregularity.height);
    let size = ((REFERENCE_WINDOW_FACTOR * wavelength).round_ties_even() as usize).max(1);
    if size > w || size > h {
        return Err(ShapeletError::InvalidInput(format!(
            "a {}x{} field cannot hold a {} px reference window",
            w, h, size
        )));
    }
    let margin = (wavelength / 2.0).round_ties_even() as usize;
    let margin = if size + 2 * margin <= w && size + 2 * margin <= h { margin } else { 0 };

    // summed-area table with a zero first row and column
    let mut table = vec![0.0; (w + 1) * (h + 1)];
    for y in 0..h {
        let mut row = 0.0;
        for x in 0..w {
            row += irregularity.get(x, y);
            table[(y + 1) * (w + 1) + x + 1] = table[y * (w + 1) + x + 1] + row;
        }
    }
    let at = |x: usize, y: usize| table[y * (w + 1) + x];

    let mut best = (f64::INFINITY, margin, margin);
    for y0 in margin..=h - size - margin {
        for x0 in margin..=w - size - margin {
            let (x1, y1) = (x0 + size, y0 + size);
            let sum = at(x1, y1) - at(x0, y1) - at(x1, y0) + at(x0, y0);
            if sum < best.0 {
                best = (sum, x0, y0);
            }
        }
    }
    let (_, x0, y0) = best;
    Ok(Region::new((x0, x0 + size - 1), (y0, y0 + size - 1)))
}

/// Distance of every response vector to the stack's mean vector: large where
/// the local structure departs from what most of the image looks like.
pub fn irregularity(stack: &ResponseStack) -> Result<Field2D> {
    let n = stack.pixel_count() as f64;
    let mut mean = vec![0.0; stack.depth];
    for vector in stack.magnitude.chunks_exact(stack.depth) {
        mean.iter_mut().zip(vector).for_each(|(m, v)| *m += v / n);
    }
    let data = stack
        .magnitude
        .chunks_exact(stack.depth)
        .map(|v| v.iter().zip(&mean).map(|(a, b)| (a - b) * (a - b)).sum::<f64>().sqrt())
        .collect();
    Field2D::from_vec(stack.width, stack.height, data)
}

/// One analysis session: the kernel cache and the distance backend are
/// shared by every call.
#[derive(Debug)]
pub struct ShapeletAnalysis {
    engine: ConvolutionEngine,
    distance: Arc<DistanceEngine>,
    pub wavelength_range: WavelengthRange,
}

impl ShapeletAnalysis {
    /// Uses the process-wide distance engine, probing it on first use.
    pub fn new(config: ShapeletConfig) -> Self {
        Self::with_shared_engine(config, DistanceEngine::shared())
    }

    pub fn with_distance_engine(config: ShapeletConfig, distance: DistanceEngine) -> Self {
        Self::with_shared_engine(config, Arc::new(distance))
    }

    fn with_shared_engine(config: ShapeletConfig, distance: Arc<DistanceEngine>) -> Self {
        Self {
            engine: ConvolutionEngine::new(config),
            distance,
            wavelength_range: WavelengthRange::default(),
        }
    }

    pub fn config(&self) -> &ShapeletConfig {
        &self.engine.config
    }

    pub fn distance_backend(&self) -> &'static str {
        self.distance.backend_name()
    }

    pub fn wavelength(&self, image: &Field2D) -> Result<f64> {
        estimate_wavelength(image, self.wavelength_range)
    }

    pub fn responses(
        &self,
        image: &Field2D,
        wavelength: f64,
        orders: OrderPolicy,
        normalization: Normalization,
    ) -> Result<ResponseStack> {
        self.engine
            .convolve(image, wavelength, orders, BasisFamily::PolarN0, normalization)
    }

    /// Distance of each pixel's response to the nearest reference response.
    pub fn response_distance(
        &self,
        image: &Field2D,
        wavelength: f64,
        reference: Option<Region>,
        clusters: usize,
        orders: OrderPolicy,
    ) -> Result<ResponseDistanceOutput> {
        let stack = self.responses(image, wavelength, orders, Normalization::Vector)?;
        let region = match reference {
            Some(region) => region,
            None => {
                let region = find_reference_region(&irregularity(&stack)?, wavelength)?;
                info!(
                    "Automatic reference region x=[{}, {}], y=[{}, {}]",
                    region.x0, region.x1, region.y0, region.y1
                );
                region
            }
        };
        let refs = ReferenceSet::clustered(&stack, region, clusters, &self.config().cluster)?;
        let distance = self.distance.response_distance(&stack, &refs)?;
        Ok(ResponseDistanceOutput {
            distance,
            region,
            references: refs.len(),
        })
    }

    /// Cluster every pixel's response and keep the clusters `selector` picks.
    pub fn defect_identification(
        &self,
        image: &Field2D,
        wavelength: f64,
        pattern: Pattern,
        selector: &mut dyn ClusterSelector,
    ) -> Result<DefectOutput> {
        let stack = self.responses(image, wavelength, OrderPolicy::Adaptive, Normalization::Vector)?;
        let clusters = cluster(&stack, pattern.clusters(), &self.config().cluster)?;
        let selected = selector.select(&clusters)?;
        let defects = clusters.select_defect_field(&selected)?;
        Ok(DefectOutput {
            clusters,
            selected,
            defects,
        })
    }

    pub fn orientation(&self, image: &Field2D, wavelength: f64, pattern: Pattern) -> Result<OrientationResult> {
        let stack = self.responses(
            image,
            wavelength,
            OrderPolicy::Fixed(ORIENTATION_ORDERS),
            Normalization::Individual,
        )?;
        estimate_orientation(&stack, pattern.orientation_index(), wavelength, &self.config().orientation)
    }

    /// Load an image, run `method`, and hand the display fields to `sink`.
    /// Returns the wavelength the analysis used.
    pub fn run(&self, source: &dyn ImageSource, sink: &mut dyn ResultSink, method: &Method) -> Result<f64> {
        let image = source.load()?;
        let wavelength = self.wavelength(&image)?;
        info!("Characteristic wavelength: {:.3} px", wavelength);
        let metadata = |order: Option<u32>, clusters: Option<usize>| FieldMetadata {
            wavelength,
            order,
            clusters,
        };

        match method {
            Method::ResponseDistance {
                reference,
                clusters,
                orders,
            } => {
                let output = self.response_distance(&image, wavelength, *reference, *clusters, *orders)?;
                sink.accept(
                    &format!("response_distance_k{}", clusters),
                    &output.display_field(wavelength)?,
                    &metadata(None, Some(*clusters)),
                )?;
            }
            Method::DefectIdentification { pattern, selected } => {
                let mut selector = FixedSelection(selected.clone());
                let output = self.defect_identification(&image, wavelength, *pattern, &mut selector)?;
                let k = output.clusters.k;
                sink.accept(
                    &format!("defectid_clusters_k{}", k),
                    &trim_field(&output.clusters.label_field(), wavelength)?,
                    &metadata(None, Some(k)),
                )?;
                sink.accept(
                    &format!("defectid_drd_k{}", k),
                    &output.display_field(wavelength)?,
                    &metadata(None, Some(k)),
                )?;
            }
            Method::Orientation { pattern } => {
                let result = self.orientation(&image, wavelength, *pattern)?;
                let order = Some(pattern.orientation_index() as u32 + 1);
                sink.accept("orientation_mask", &result.mask, &metadata(order, None))?;
                sink.accept("orientation_dilate", &result.dilated, &metadata(order, None))?;
                sink.accept("orientation_blend", &result.blended, &metadata(order, None))?;
            }
        }
        Ok(wavelength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_presets() {
        assert_eq!(Pattern::Stripe.clusters(), 4);
        assert_eq!(Pattern::Square.clusters(), 8);
        assert_eq!(Pattern::Hexagonal.clusters(), 10);
        assert_eq!(Pattern::Square.orientation_index(), 3);
        assert_eq!("Hexagonal".parse::<Pattern>().unwrap(), Pattern::Hexagonal);
        assert!("triangle".parse::<Pattern>().is_err());
    }

    #[test]
    fn reference_window_avoids_the_noisy_corner() {
        let field = Field2D::from_fn(40, 40, |x, y| if x < 20 && y < 20 { 1.0 } else { 0.0 });
        let region = find_reference_region(&field, 4.0).unwrap();
        assert_eq!(region.width(), 10);
        assert_eq!(region.height(), 10);
        for y in region.y0..=region.y1 {
            for x in region.x0..=region.x1 {
                assert_eq!(field.get(x, y), 0.0);
            }
        }
        // the border of round(4 / 2) is skipped
        assert!(region.x0 >= 2 && region.y0 >= 2);
        assert!(region.x1 <= 37 && region.y1 <= 37);
    }

    #[test]
    fn reference_window_must_fit() {
        assert!(find_reference_region(&Field2D::zeros(8, 8), 4.0).is_err());
        assert!(find_reference_region(&Field2D::zeros(8, 8), 0.0).is_err());
        // fits only without the border margin
        let region = find_reference_region(&Field2D::zeros(10, 10), 4.0).unwrap();
        assert_eq!((region.x0, region.y0, region.x1, region.y1), (0, 0, 9, 9));
    }

    #[test]
    fn irregularity_is_zero_for_identical_vectors() {
        let stack = ResponseStack::from_vectors(3, 2, 2, [0.6, 0.8].repeat(6), Normalization::Vector).unwrap();
        assert!(irregularity(&stack).unwrap().data.iter().all(|&v| v.abs() < 1e-12));
    }

    #[test]
    fn display_fields_are_inverted_and_trimmed() {
        let output = ResponseDistanceOutput {
            distance: Field2D::from_fn(12, 12, |x, _| x as f64),
            region: Region::new((0, 1), (0, 1)),
            references: 4,
        };
        let shown = output.display_field(4.0).unwrap();
        assert_eq!((shown.width, shown.height), (8, 8));
        assert!((shown.get(0, 0) - (1.0 - 2.0 / 11.0)).abs() < 1e-12);
    }
}
