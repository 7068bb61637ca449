pub mod stack;

pub use stack::{Normalization, ResponseStack};

use crate::error::{Result, ShapeletError};

/// Dense row-major 2D field of real values.
///
/// Used for the input image as well as every scalar output (response
/// distance, defect field, orientation stages).
#[derive(Debug, Clone, PartialEq)]
pub struct Field2D {
    pub data: Vec<f64>,
    pub width: usize,
    pub height: usize,
}

impl Field2D {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            data: vec![0.0; width * height],
            width,
            height,
        }
    }

    /// Wrap existing data, checking its length against the dimensions.
    pub fn from_vec(width: usize, height: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != width * height {
            return Err(ShapeletError::InvalidInput(format!(
                "field data has {} values, expected {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self { data, width, height })
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self { data, width, height }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f64) {
        self.data[y * self.width + x] = value;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn min_max(&self) -> (f64, f64) {
        self.data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Rescale to [0, 1]. A flat field maps to all zeros.
    pub fn normalized(&self) -> Self {
        let (lo, hi) = self.min_max();
        let range = hi - lo;
        let data = if range > 0.0 && range.is_finite() {
            self.data.iter().map(|v| (v - lo) / range).collect()
        } else {
            vec![0.0; self.data.len()]
        };
        Self {
            data,
            width: self.width,
            height: self.height,
        }
    }

    /// Copy of the sub-field `[x0, x0 + width) x [y0, y0 + height)`.
    pub fn crop(&self, x0: usize, y0: usize, width: usize, height: usize) -> Result<Self> {
        if x0 + width > self.width || y0 + height > self.height {
            return Err(ShapeletError::RegionOutOfBounds {
                x0,
                x1: x0 + width,
                y0,
                y1: y0 + height,
                width: self.width,
                height: self.height,
            });
        }
        let mut data = Vec::with_capacity(width * height);
        for y in y0..y0 + height {
            let start = y * self.width + x0;
            data.extend_from_slice(&self.data[start..start + width]);
        }
        Ok(Self { data, width, height })
    }

    /// Reject NaN/inf, which would poison every downstream stage.
    pub fn ensure_finite(&self) -> Result<()> {
        if let Some(idx) = self.data.iter().position(|v| !v.is_finite()) {
            return Err(ShapeletError::InvalidInput(format!(
                "non-finite value at ({}, {})",
                idx % self.width.max(1),
                idx / self.width.max(1)
            )));
        }
        Ok(())
    }
}

/// Inclusive pixel rectangle `[x0, x1] x [y0, y1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x0: usize,
    pub x1: usize,
    pub y0: usize,
    pub y1: usize,
}

impl Region {
    /// Build from two corner ranges, in any order.
    pub fn new(ux: (usize, usize), uy: (usize, usize)) -> Self {
        Self {
            x0: ux.0.min(ux.1),
            x1: ux.0.max(ux.1),
            y0: uy.0.min(uy.1),
            y1: uy.0.max(uy.1),
        }
    }

    pub fn width(&self) -> usize {
        self.x1 - self.x0 + 1
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0 + 1
    }

    pub fn check_within(&self, width: usize, height: usize) -> Result<()> {
        if self.x1 >= width || self.y1 >= height {
            return Err(ShapeletError::RegionOutOfBounds {
                x0: self.x0,
                x1: self.x1,
                y0: self.y0,
                y1: self.y1,
                width,
                height,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(Field2D::from_vec(3, 3, vec![0.0; 8]).is_err());
        assert!(Field2D::from_vec(3, 3, vec![0.0; 9]).is_ok());
    }

    #[test]
    fn normalized_flat_field_is_zero() {
        let field = Field2D::from_fn(4, 4, |_, _| 0.7);
        assert!(field.normalized().data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn crop_copies_the_window() {
        let field = Field2D::from_fn(5, 4, |x, y| (y * 10 + x) as f64);
        let sub = field.crop(1, 2, 3, 2).unwrap();
        assert_eq!(sub.data, vec![21.0, 22.0, 23.0, 31.0, 32.0, 33.0]);
        assert!(field.crop(3, 0, 3, 1).is_err());
    }

    #[test]
    fn region_orders_its_corners() {
        let region = Region::new((9, 2), (4, 1));
        assert_eq!((region.x0, region.x1, region.y0, region.y1), (2, 9, 1, 4));
        assert_eq!(region.width(), 8);
        assert!(region.check_within(10, 5).is_ok());
        assert!(region.check_within(9, 5).is_err());
    }
}
