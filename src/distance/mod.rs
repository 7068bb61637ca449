//! Response distance: how far each pixel's response vector lies from the
//! nearest vector of a reference (defect-free) region.

pub mod portable;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use portable::PortableBackend;
#[cfg(feature = "vulkan")]
pub use vulkan::VulkanBackend;

use log::{debug, info};
use std::sync::{Arc, OnceLock};

use crate::cluster::kmeans;
use crate::config::ClusterConfig;
use crate::error::{Result, ShapeletError};
use crate::field::{Field2D, Region, ResponseStack};

/// Minimum-distance search over flat, row-major vector sets.
pub trait DistanceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// For every `depth`-long row of `tests`, the smallest Euclidean distance
    /// to any row of `refs`.
    fn min_distances(&self, refs: &[f64], tests: &[f64], depth: usize) -> Result<Vec<f64>>;
}

/// Reference response vectors, one per row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSet {
    pub depth: usize,
    pub vectors: Vec<f64>,
}

impl ReferenceSet {
    pub fn new(depth: usize, vectors: Vec<f64>) -> Result<Self> {
        if depth == 0 || vectors.is_empty() || vectors.len() % depth != 0 {
            return Err(ShapeletError::InvalidInput(format!(
                "reference set of {} values cannot hold vectors of depth {}",
                vectors.len(),
                depth
            )));
        }
        Ok(Self { depth, vectors })
    }

    /// Every response vector inside `region` (inclusive bounds).
    pub fn from_region(stack: &ResponseStack, region: Region) -> Result<Self> {
        region.check_within(stack.width, stack.height)?;
        let mut vectors = Vec::with_capacity(region.width() * region.height() * stack.depth);
        for y in region.y0..=region.y1 {
            for x in region.x0..=region.x1 {
                vectors.extend_from_slice(stack.vector(x, y));
            }
        }
        Self::new(stack.depth, vectors)
    }

    /// k-means centroids of the vectors inside `region`. `clusters == 0`
    /// keeps every vector.
    pub fn clustered(stack: &ResponseStack, region: Region, clusters: usize, config: &ClusterConfig) -> Result<Self> {
        let whole = Self::from_region(stack, region)?;
        if clusters == 0 {
            debug!("Using all {} reference vectors without clustering", whole.len());
            return Ok(whole);
        }
        let fit = kmeans(&whole.vectors, whole.depth, clusters, config)?;
        info!(
            "k-means reduced {} reference vectors to {} centroids (distortion {:.3})",
            whole.len(),
            clusters,
            fit.distortion
        );
        Self::new(whole.depth, fit.centroids)
    }

    pub fn len(&self) -> usize {
        self.vectors.len() / self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Owns the selected backend and always keeps the portable one as fallback.
pub struct DistanceEngine {
    accelerated: Option<Box<dyn DistanceBackend>>,
    portable: PortableBackend,
}

impl std::fmt::Debug for DistanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistanceEngine")
            .field("backend", &self.backend_name())
            .finish()
    }
}

impl DistanceEngine {
    /// Select the fastest backend that works on this machine.
    ///
    /// Any failure to bring up the accelerated backend, including a
    /// disagreement with the portable result on a small fixture, is logged and
    /// the portable backend is used instead.
    pub fn probe() -> Self {
        let accelerated = Self::probe_accelerated();
        match &accelerated {
            Some(backend) => info!("Response distance backend: {}", backend.name()),
            None => info!("Response distance backend: portable"),
        }
        Self {
            accelerated,
            portable: PortableBackend,
        }
    }

    #[cfg(feature = "vulkan")]
    fn probe_accelerated() -> Option<Box<dyn DistanceBackend>> {
        let checked = VulkanBackend::new().and_then(|backend| {
            self_check(&backend)?;
            Ok(backend)
        });
        match checked {
            Ok(backend) => Some(Box::new(backend)),
            Err(e) => {
                info!("Vulkan backend unavailable, falling back to portable: {}", e);
                None
            }
        }
    }

    #[cfg(not(feature = "vulkan"))]
    fn probe_accelerated() -> Option<Box<dyn DistanceBackend>> {
        debug!("Built without the vulkan feature");
        None
    }

    pub fn portable() -> Self {
        Self {
            accelerated: None,
            portable: PortableBackend,
        }
    }

    /// Use `backend` first, with the portable backend behind it.
    pub fn with_backend(backend: Box<dyn DistanceBackend>) -> Self {
        Self {
            accelerated: Some(backend),
            portable: PortableBackend,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.accelerated.as_ref().map_or(self.portable.name(), |b| b.name())
    }

    /// The process-wide engine, probed on first use.
    pub fn shared() -> Arc<DistanceEngine> {
        static SHARED: OnceLock<Arc<DistanceEngine>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(DistanceEngine::probe())))
    }

    pub fn min_distances(&self, refs: &[f64], tests: &[f64], depth: usize) -> Result<Vec<f64>> {
        check_vector_sets(refs, tests, depth)?;
        if tests.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(backend) = &self.accelerated {
            match backend.min_distances(refs, tests, depth) {
                Ok(distances) => return Ok(distances),
                Err(e) => info!("{} backend failed, falling back to portable: {}", backend.name(), e),
            }
        }
        self.portable.min_distances(refs, tests, depth)
    }

    pub fn response_distance(&self, stack: &ResponseStack, refs: &ReferenceSet) -> Result<Field2D> {
        if refs.depth != stack.depth {
            return Err(ShapeletError::DepthMismatch {
                expected: stack.depth,
                found: refs.depth,
            });
        }
        let distances = self.min_distances(&refs.vectors, &stack.magnitude, stack.depth)?;
        Field2D::from_vec(stack.width, stack.height, distances)
    }
}

/// Response distance on [`DistanceEngine::shared`].
pub fn response_distance(stack: &ResponseStack, refs: &ReferenceSet) -> Result<Field2D> {
    DistanceEngine::shared().response_distance(stack, refs)
}

/// Shape checks every backend applies before searching.
pub(crate) fn check_vector_sets(refs: &[f64], tests: &[f64], depth: usize) -> Result<()> {
    if depth == 0 {
        return Err(ShapeletError::InvalidInput("vector depth must be >= 1".to_string()));
    }
    if refs.is_empty() {
        return Err(ShapeletError::InvalidInput("reference set is empty".to_string()));
    }
    if refs.len() % depth != 0 || tests.len() % depth != 0 {
        return Err(ShapeletError::InvalidInput(format!(
            "vector sets of {} and {} values do not divide into depth {}",
            refs.len(),
            tests.len(),
            depth
        )));
    }
    Ok(())
}

/// Small fixture with a known answer, used to vet accelerated backends.
pub const FIXTURE_REFS: [f64; 9] = [2.0, 5.0, 9.0, 3.0, 4.0, 6.0, 1.0, 5.0, 7.0];
pub const FIXTURE_TESTS: [f64; 6] = [3.0, 4.0, 8.0, 5.0, 2.0, 7.0];

/// Reject a backend whose fixture result differs from the portable one.
pub fn self_check(backend: &dyn DistanceBackend) -> Result<()> {
    let expected = PortableBackend.min_distances(&FIXTURE_REFS, &FIXTURE_TESTS, 3)?;
    let found = backend.min_distances(&FIXTURE_REFS, &FIXTURE_TESTS, 3)?;
    if found.len() != expected.len() {
        return Err(ShapeletError::BackendMismatch(f64::INFINITY));
    }
    let worst = expected
        .iter()
        .zip(found.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    if !(worst <= 1e-9) {
        return Err(ShapeletError::BackendMismatch(worst));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Normalization;

    struct Broken;

    impl DistanceBackend for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn min_distances(&self, _refs: &[f64], _tests: &[f64], _depth: usize) -> Result<Vec<f64>> {
            Err(ShapeletError::NoGpuFound)
        }
    }

    fn stack() -> ResponseStack {
        let values: Vec<f64> = (0..4 * 3 * 2).map(|i| (i % 5) as f64 * 0.2).collect();
        ResponseStack::from_vectors(4, 3, 2, values, Normalization::Vector).unwrap()
    }

    #[test]
    fn fixture_distances() {
        let d = DistanceEngine::portable().min_distances(&FIXTURE_REFS, &FIXTURE_TESTS, 3).unwrap();
        assert!((d[0] - 3f64.sqrt()).abs() < 1e-12);
        assert!((d[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn failing_backend_falls_back_silently() {
        let engine = DistanceEngine::with_backend(Box::new(Broken));
        assert_eq!(engine.backend_name(), "broken");
        let d = engine.min_distances(&FIXTURE_REFS, &FIXTURE_TESTS, 3).unwrap();
        assert!((d[1] - 3.0).abs() < 1e-12);
        assert!(self_check(&Broken).is_err());
    }

    #[test]
    fn region_against_itself_is_zero() {
        let stack = stack();
        let region = Region::new((1, 2), (0, 1));
        let refs = ReferenceSet::from_region(&stack, region).unwrap();
        assert_eq!(refs.len(), 4);
        let field = DistanceEngine::portable().response_distance(&stack, &refs).unwrap();
        for y in 0..=1 {
            for x in 1..=2 {
                assert_eq!(field.get(x, y), 0.0);
            }
        }
    }

    #[test]
    fn invalid_reference_sets_are_rejected() {
        let stack = stack();
        assert!(ReferenceSet::new(2, vec![]).is_err());
        assert!(ReferenceSet::new(2, vec![1.0, 2.0, 3.0]).is_err());
        assert!(ReferenceSet::from_region(&stack, Region::new((0, 4), (0, 0))).is_err());

        let wrong_depth = ReferenceSet::new(3, vec![0.0; 3]).unwrap();
        assert!(matches!(
            DistanceEngine::portable().response_distance(&stack, &wrong_depth),
            Err(ShapeletError::DepthMismatch { .. })
        ));
        assert!(DistanceEngine::portable().min_distances(&[], &[1.0], 1).is_err());
    }

    #[test]
    fn clustered_reference_has_k_vectors() {
        let stack = stack();
        let region = Region::new((0, 3), (0, 2));
        let refs = ReferenceSet::clustered(&stack, region, 3, &ClusterConfig::default()).unwrap();
        assert_eq!(refs.len(), 3);
        let raw = ReferenceSet::clustered(&stack, region, 0, &ClusterConfig::default()).unwrap();
        assert_eq!(raw.len(), 12);
    }

    #[test]
    fn shared_engine_is_probed_once_per_process() {
        let first = DistanceEngine::shared();
        let other_thread = std::thread::spawn(DistanceEngine::shared).join().unwrap();
        assert!(Arc::ptr_eq(&first, &other_thread));
        assert!(Arc::ptr_eq(&first, &DistanceEngine::shared()));
    }

    #[test]
    fn free_function_matches_portable() {
        let stack = stack();
        let refs = ReferenceSet::new(2, vec![0.2, 0.4, 0.0, 0.8]).unwrap();
        let a = response_distance(&stack, &refs).unwrap();
        let b = DistanceEngine::portable().response_distance(&stack, &refs).unwrap();
        for (x, y) in a.data.iter().zip(b.data.iter()) {
            assert!((x - y).abs() <= 1e-9);
        }
    }
}
