//! k-means clustering of response vectors and defect-field selection.

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rayon::prelude::*;
use std::collections::BTreeSet;

use crate::config::ClusterConfig;
use crate::error::{Result, ShapeletError};
use crate::field::{Field2D, ResponseStack};

/// Codebook of one k-means fit.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    pub k: usize,
    pub depth: usize,
    /// `k * depth` values, one centroid per row.
    pub centroids: Vec<f64>,
    /// Mean Euclidean distance of the observations to their centroid.
    pub distortion: f64,
}

impl KMeans {
    pub fn centroid(&self, id: usize) -> &[f64] {
        &self.centroids[id * self.depth..(id + 1) * self.depth]
    }
}

/// Fit `k` centroids to the `depth`-long rows of `observations`.
///
/// Every restart starts from `k` distinct observations drawn from a seeded
/// generator and runs Lloyd iterations until the distortion improves by less
/// than the threshold. The fit with the lowest distortion is returned. A
/// centroid that loses all its members keeps its position.
pub fn kmeans(observations: &[f64], depth: usize, k: usize, config: &ClusterConfig) -> Result<KMeans> {
    if depth == 0 || observations.len() % depth != 0 {
        return Err(ShapeletError::InvalidInput(format!(
            "{} values do not form rows of length {}",
            observations.len(),
            depth
        )));
    }
    let n = observations.len() / depth;
    if k == 0 || k > n {
        return Err(ShapeletError::InvalidInput(format!(
            "cannot fit {} clusters to {} observations",
            k, n
        )));
    }
    if config.restarts == 0 {
        return Err(ShapeletError::InvalidInput("k-means needs at least one restart".to_string()));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<KMeans> = None;

    for restart in 0..config.restarts {
        let mut centroids = Vec::with_capacity(k * depth);
        for idx in sample(&mut rng, n, k).into_iter() {
            centroids.extend_from_slice(&observations[idx * depth..(idx + 1) * depth]);
        }

        let mut previous = f64::INFINITY;
        let mut distortion = f64::INFINITY;
        for _ in 0..config.max_iterations {
            let (labels, distances) = assign(observations, &centroids, depth);
            distortion = distances.iter().sum::<f64>() / n as f64;
            update_centroids(observations, &labels, &mut centroids, depth);
            if previous - distortion <= config.threshold {
                break;
            }
            previous = distortion;
        }

        debug!("k-means restart {}: distortion {:.6}", restart, distortion);
        if best.as_ref().is_none_or(|b| distortion < b.distortion) {
            best = Some(KMeans {
                k,
                depth,
                centroids,
                distortion,
            });
        }
    }

    best.ok_or_else(|| ShapeletError::InvalidInput("k-means produced no fit".to_string()))
}

/// Label and distance of each observation to its nearest centroid.
///
/// Ties go to the lowest centroid id.
pub fn assign(observations: &[f64], centroids: &[f64], depth: usize) -> (Vec<usize>, Vec<f64>) {
    observations
        .par_chunks(depth)
        .map(|obs| {
            let (label, sq) = centroids
                .chunks(depth)
                .map(|c| obs.iter().zip(c).map(|(a, b)| (a - b) * (a - b)).sum::<f64>())
                .enumerate()
                .fold((0, f64::INFINITY), |best, (id, sq)| if sq < best.1 { (id, sq) } else { best });
            (label, sq.sqrt())
        })
        .unzip()
}

fn update_centroids(observations: &[f64], labels: &[usize], centroids: &mut [f64], depth: usize) {
    let k = centroids.len() / depth;
    let mut sums = vec![0.0; k * depth];
    let mut counts = vec![0usize; k];
    for (obs, &label) in observations.chunks(depth).zip(labels) {
        counts[label] += 1;
        sums[label * depth..(label + 1) * depth]
            .iter_mut()
            .zip(obs)
            .for_each(|(s, v)| *s += v);
    }
    for (id, &count) in counts.iter().enumerate() {
        if count > 0 {
            for p in 0..depth {
                centroids[id * depth + p] = sums[id * depth + p] / count as f64;
            }
        }
    }
}

/// Per-pixel cluster membership of a response stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    pub k: usize,
    pub depth: usize,
    pub width: usize,
    pub height: usize,
    pub centroids: Vec<f64>,
    pub labels: Vec<usize>,
    /// Distance of each pixel to its own centroid, scaled to [0, 1].
    pub distances: Vec<f64>,
}

/// Cluster every pixel's response vector into `k` groups.
pub fn cluster(stack: &ResponseStack, k: usize, config: &ClusterConfig) -> Result<ClusterResult> {
    info!("Performing k-means clustering with k={} on {} pixels", k, stack.pixel_count());
    let fit = kmeans(&stack.magnitude, stack.depth, k, config)?;
    let (labels, raw) = assign(&stack.magnitude, &fit.centroids, stack.depth);
    let distances = Field2D::from_vec(stack.width, stack.height, raw)?.normalized().data;

    Ok(ClusterResult {
        k,
        depth: stack.depth,
        width: stack.width,
        height: stack.height,
        centroids: fit.centroids,
        labels,
        distances,
    })
}

impl ClusterResult {
    /// Cluster id of the pixel at `(x, y)`.
    pub fn cluster_at(&self, x: usize, y: usize) -> Result<usize> {
        if x >= self.width || y >= self.height {
            return Err(ShapeletError::RegionOutOfBounds {
                x0: x,
                x1: x,
                y0: y,
                y1: y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(self.labels[y * self.width + x])
    }

    /// Membership map, each pixel holding its cluster id.
    pub fn label_field(&self) -> Field2D {
        Field2D {
            data: self.labels.iter().map(|&l| l as f64).collect(),
            width: self.width,
            height: self.height,
        }
    }

    pub fn distance_field(&self) -> Field2D {
        Field2D {
            data: self.distances.clone(),
            width: self.width,
            height: self.height,
        }
    }

    /// Normalised distance where the pixel belongs to a selected cluster, zero elsewhere.
    pub fn select_defect_field(&self, selected: &[usize]) -> Result<Field2D> {
        if selected.is_empty() {
            return Err(ShapeletError::InvalidInput("no clusters selected".to_string()));
        }
        if let Some(&bad) = selected.iter().find(|&&id| id >= self.k) {
            return Err(ShapeletError::InvalidInput(format!(
                "cluster id {} is out of range for k = {}",
                bad, self.k
            )));
        }
        let selected: BTreeSet<usize> = selected.iter().copied().collect();
        let data = self
            .labels
            .iter()
            .zip(self.distances.iter())
            .map(|(label, &d)| if selected.contains(label) { d } else { 0.0 })
            .collect();
        Field2D::from_vec(self.width, self.height, data)
    }
}

/// Chooses which clusters count as defects.
pub trait ClusterSelector {
    fn select(&mut self, result: &ClusterResult) -> Result<Vec<usize>>;
}

/// A preset list of cluster ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSelection(pub Vec<usize>);

impl ClusterSelector for FixedSelection {
    fn select(&mut self, _result: &ClusterResult) -> Result<Vec<usize>> {
        Ok(self.0.clone())
    }
}

/// Selects the clusters under a set of picked pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointSelection(pub Vec<(usize, usize)>);

impl ClusterSelector for PointSelection {
    fn select(&mut self, result: &ClusterResult) -> Result<Vec<usize>> {
        self.0.iter().map(|&(x, y)| result.cluster_at(x, y)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Normalization;

    /// Two well separated blobs of 2D points.
    fn blobs() -> Vec<f64> {
        let mut data = Vec::new();
        for i in 0..10 {
            let j = i as f64 * 0.01;
            data.extend_from_slice(&[0.0 + j, 0.0 - j]);
        }
        for i in 0..10 {
            let j = i as f64 * 0.01;
            data.extend_from_slice(&[5.0 - j, 5.0 + j]);
        }
        data
    }

    fn blob_stack() -> ResponseStack {
        ResponseStack::from_vectors(5, 4, 2, blobs(), Normalization::Vector).unwrap()
    }

    #[test]
    fn kmeans_separates_blobs() {
        let fit = kmeans(&blobs(), 2, 2, &ClusterConfig::default()).unwrap();
        let mut xs: Vec<f64> = (0..2).map(|id| fit.centroid(id)[0]).collect();
        xs.sort_by(f64::total_cmp);
        assert!((xs[0] - 0.045).abs() < 1e-9);
        assert!((xs[1] - 4.955).abs() < 1e-9);
        assert!(fit.distortion < 0.1);
    }

    #[test]
    fn kmeans_is_deterministic_for_a_seed() {
        let config = ClusterConfig::default();
        let a = kmeans(&blobs(), 2, 3, &config).unwrap();
        let b = kmeans(&blobs(), 2, 3, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn kmeans_rejects_bad_k() {
        let config = ClusterConfig::default();
        assert!(kmeans(&blobs(), 2, 0, &config).is_err());
        assert!(kmeans(&blobs(), 2, 21, &config).is_err());
        assert!(kmeans(&blobs(), 3, 2, &config).is_err());
    }

    #[test]
    fn distances_are_normalised() {
        let result = cluster(&blob_stack(), 2, &ClusterConfig::default()).unwrap();
        let (lo, hi) = result.distance_field().min_max();
        assert_eq!((lo, hi), (0.0, 1.0));
        assert_ne!(result.cluster_at(0, 0).unwrap(), result.cluster_at(4, 3).unwrap());
    }

    #[test]
    fn selection_masks_and_ignores_duplicates() {
        let result = cluster(&blob_stack(), 2, &ClusterConfig::default()).unwrap();
        let first = result.cluster_at(0, 0).unwrap();
        let once = result.select_defect_field(&[first]).unwrap();
        let twice = result.select_defect_field(&[first, first]).unwrap();
        assert_eq!(once, twice);
        for (idx, &v) in once.data.iter().enumerate() {
            if result.labels[idx] != first {
                assert_eq!(v, 0.0);
            } else {
                assert_eq!(v, result.distances[idx]);
            }
        }
    }

    #[test]
    fn invalid_selections_are_rejected() {
        let result = cluster(&blob_stack(), 2, &ClusterConfig::default()).unwrap();
        assert!(result.select_defect_field(&[]).is_err());
        assert!(result.select_defect_field(&[2]).is_err());
        assert!(result.cluster_at(5, 0).is_err());
    }

    #[test]
    fn point_selection_reads_clicked_clusters() {
        let result = cluster(&blob_stack(), 2, &ClusterConfig::default()).unwrap();
        let ids = PointSelection(vec![(0, 0), (4, 3)]).select(&result).unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(FixedSelection(vec![1]).select(&result).unwrap(), vec![1]);
    }
}
