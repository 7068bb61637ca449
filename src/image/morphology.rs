//! Rank filters over square windows with mirrored boundaries.
//!
//! Even window sizes follow the usual ndimage placement: the extra sample of a
//! dilation window lies after the centre, that of a median window before it.

use rayon::prelude::*;

use super::reflect_index;
use crate::error::{Result, ShapeletError};
use crate::field::Field2D;

fn check_size(size: usize) -> Result<()> {
    if size == 0 {
        return Err(ShapeletError::InvalidInput("filter size must be >= 1".to_string()));
    }
    Ok(())
}

/// Grey dilation with a flat `size x size` footprint: the maximum over the window.
pub fn grey_dilation(field: &Field2D, size: usize) -> Result<Field2D> {
    check_size(size)?;
    let (lo, hi) = (-(((size - 1) / 2) as isize), (size / 2) as isize);
    let (w, h) = (field.width, field.height);

    // the flat footprint is separable: rows first, then columns
    let mut rows = vec![0.0; w * h];
    rows.par_chunks_mut(w).enumerate().for_each(|(y, out)| {
        for (x, value) in out.iter_mut().enumerate() {
            *value = (lo..=hi)
                .map(|d| field.get(reflect_index(x as isize + d, w), y))
                .fold(f64::NEG_INFINITY, f64::max);
        }
    });

    let mut data = vec![0.0; w * h];
    data.par_chunks_mut(w).enumerate().for_each(|(y, out)| {
        for (x, value) in out.iter_mut().enumerate() {
            *value = (lo..=hi)
                .map(|d| rows[reflect_index(y as isize + d, h) * w + x])
                .fold(f64::NEG_INFINITY, f64::max);
        }
    });

    Field2D::from_vec(w, h, data)
}

/// Median over a `size x size` window. For an even sample count the upper
/// median is taken.
pub fn median_filter(field: &Field2D, size: usize) -> Result<Field2D> {
    check_size(size)?;
    let (lo, hi) = (-((size / 2) as isize), ((size - 1) / 2) as isize);
    let (w, h) = (field.width, field.height);
    let rank = size * size / 2;

    let mut data = vec![0.0; w * h];
    data.par_chunks_mut(w).enumerate().for_each(|(y, out)| {
        let mut window = Vec::with_capacity(size * size);
        for (x, value) in out.iter_mut().enumerate() {
            window.clear();
            for dy in lo..=hi {
                let sy = reflect_index(y as isize + dy, h);
                for dx in lo..=hi {
                    window.push(field.get(reflect_index(x as isize + dx, w), sy));
                }
            }
            let (_, median, _) = window.select_nth_unstable_by(rank, f64::total_cmp);
            *value = *median;
        }
    });

    Field2D::from_vec(w, h, data)
}
