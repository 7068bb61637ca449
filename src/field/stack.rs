use super::Field2D;
use crate::error::{Result, ShapeletError};

/// How the response magnitudes of one analysis are scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Normalization {
    /// Each pixel's response vector is scaled to unit L2 norm.
    Vector,
    /// Each order's magnitude plane is min-max scaled to [0, 1] on its own.
    Individual,
}

impl Normalization {
    pub fn name(&self) -> &'static str {
        match self {
            Normalization::Vector => "Vector",
            Normalization::Individual => "Individual",
        }
    }
}

/// Per-pixel response vectors of a multi-order convolution.
///
/// Storage is pixel-major: the `depth` responses of pixel `(x, y)` are the
/// contiguous slice starting at `(y * width + x) * depth`, which is the layout
/// the distance backends and the clustering consume directly.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseStack {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub magnitude: Vec<f64>,
    pub phase: Vec<f64>,
    pub normalization: Normalization,
}

impl ResponseStack {
    /// Interleave per-order planes and apply `normalization` to the magnitudes.
    pub fn from_planes(
        width: usize,
        height: usize,
        magnitude_planes: Vec<Vec<f64>>,
        phase_planes: Vec<Vec<f64>>,
        normalization: Normalization,
    ) -> Result<Self> {
        let depth = magnitude_planes.len();
        if depth == 0 || depth != phase_planes.len() {
            return Err(ShapeletError::InvalidInput(format!(
                "need matching non-empty magnitude/phase planes, got {} and {}",
                depth,
                phase_planes.len()
            )));
        }
        let pixels = width * height;
        if let Some(bad) = magnitude_planes.iter().chain(phase_planes.iter()).find(|p| p.len() != pixels) {
            return Err(ShapeletError::InvalidInput(format!(
                "response plane has {} values, expected {}",
                bad.len(),
                pixels
            )));
        }

        let mut magnitude = vec![0.0; pixels * depth];
        let mut phase = vec![0.0; pixels * depth];
        for (k, (mag_plane, phase_plane)) in magnitude_planes.iter().zip(phase_planes.iter()).enumerate() {
            for idx in 0..pixels {
                magnitude[idx * depth + k] = mag_plane[idx];
                phase[idx * depth + k] = phase_plane[idx];
            }
        }

        match normalization {
            Normalization::Vector => normalize_vectors(&mut magnitude, depth),
            Normalization::Individual => normalize_individual(&mut magnitude, depth),
        }

        Ok(Self {
            width,
            height,
            depth,
            magnitude,
            phase,
            normalization,
        })
    }

    /// Wrap already-normalised pixel-major vectors (phase defaults to zero).
    pub fn from_vectors(
        width: usize,
        height: usize,
        depth: usize,
        magnitude: Vec<f64>,
        normalization: Normalization,
    ) -> Result<Self> {
        if depth == 0 || magnitude.len() != width * height * depth {
            return Err(ShapeletError::InvalidInput(format!(
                "{} response values do not form a {}x{}x{} stack",
                magnitude.len(),
                width,
                height,
                depth
            )));
        }
        let phase = vec![0.0; magnitude.len()];
        Ok(Self {
            width,
            height,
            depth,
            magnitude,
            phase,
            normalization,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Response vector of one pixel.
    #[inline]
    pub fn vector(&self, x: usize, y: usize) -> &[f64] {
        let start = (y * self.width + x) * self.depth;
        &self.magnitude[start..start + self.depth]
    }

    /// A pixel whose responses are all zero carries no direction.
    pub fn is_degenerate(&self, x: usize, y: usize) -> bool {
        self.vector(x, y).iter().all(|&v| v == 0.0)
    }

    pub fn magnitude_plane(&self, k: usize) -> Field2D {
        self.plane(&self.magnitude, k)
    }

    pub fn phase_plane(&self, k: usize) -> Field2D {
        self.plane(&self.phase, k)
    }

    fn plane(&self, values: &[f64], k: usize) -> Field2D {
        let data = values.iter().skip(k).step_by(self.depth).copied().collect();
        Field2D {
            data,
            width: self.width,
            height: self.height,
        }
    }

    pub fn require(&self, expected: Normalization) -> Result<()> {
        if self.normalization != expected {
            return Err(ShapeletError::NormalizationMismatch {
                expected: expected.name(),
                found: self.normalization.name(),
            });
        }
        Ok(())
    }
}

/// Unit L2 norm per pixel; zero vectors stay zero.
fn normalize_vectors(magnitude: &mut [f64], depth: usize) {
    for vector in magnitude.chunks_exact_mut(depth) {
        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
    }
}

/// Min-max per order plane; flat planes become zero.
fn normalize_individual(magnitude: &mut [f64], depth: usize) {
    for k in 0..depth {
        let (lo, hi) = magnitude
            .iter()
            .skip(k)
            .step_by(depth)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = hi - lo;
        for v in magnitude.iter_mut().skip(k).step_by(depth) {
            *v = if range > 0.0 { (*v - lo) / range } else { 0.0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_mode_gives_unit_vectors_and_keeps_zero_pixels() {
        let stack = ResponseStack::from_planes(
            2,
            1,
            vec![vec![3.0, 0.0], vec![4.0, 0.0]],
            vec![vec![0.0; 2], vec![0.0; 2]],
            Normalization::Vector,
        )
        .unwrap();
        assert_eq!(stack.vector(0, 0), &[0.6, 0.8]);
        assert!(stack.is_degenerate(1, 0));
        assert!(stack.magnitude.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn individual_mode_scales_each_plane() {
        let stack = ResponseStack::from_planes(
            3,
            1,
            vec![vec![1.0, 2.0, 3.0], vec![5.0, 5.0, 5.0]],
            vec![vec![0.0; 3], vec![0.0; 3]],
            Normalization::Individual,
        )
        .unwrap();
        assert_eq!(stack.magnitude_plane(0).data, vec![0.0, 0.5, 1.0]);
        assert_eq!(stack.magnitude_plane(1).data, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn require_rejects_other_mode() {
        let stack = ResponseStack::from_vectors(1, 1, 2, vec![1.0, 0.0], Normalization::Vector).unwrap();
        assert!(stack.require(Normalization::Vector).is_ok());
        assert!(matches!(
            stack.require(Normalization::Individual),
            Err(ShapeletError::NormalizationMismatch { .. })
        ));
    }
}
