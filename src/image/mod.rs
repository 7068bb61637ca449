pub mod fft;
pub mod loader;
pub mod morphology;

use image::{ImageBuffer, Luma};
use log::{debug, info};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Result, ShapeletError};
use crate::field::Field2D;

/// Map an out-of-range index back into `[0, n)` by mirroring about the edge,
/// repeating the edge sample (`d c b a | a b c d | d c b a`).
#[inline]
pub fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period) as usize;
    if m < n { m } else { 2 * n - 1 - m }
}

/// Pad every side of `field` by `pad` reflected samples.
pub fn pad_reflect(field: &Field2D, pad: usize) -> Field2D {
    let width = field.width + 2 * pad;
    let height = field.height + 2 * pad;
    Field2D::from_fn(width, height, |x, y| {
        let sx = reflect_index(x as isize - pad as isize, field.width);
        let sy = reflect_index(y as isize - pad as isize, field.height);
        field.get(sx, sy)
    })
}

/// Remove `round(wavelength / 2)` pixels from each side of a convolution
/// output, where the padded boundary distorts the response.
pub fn trim_field(field: &Field2D, wavelength: f64) -> Result<Field2D> {
    let trim = (wavelength / 2.0).round_ties_even() as usize;
    if trim == 0 {
        return Ok(field.clone());
    }
    if 2 * trim >= field.width || 2 * trim >= field.height {
        return Err(ShapeletError::InvalidInput(format!(
            "trimming {} pixels per side leaves nothing of a {}x{} field",
            trim, field.width, field.height
        )));
    }
    field.crop(trim, trim, field.width - 2 * trim, field.height - 2 * trim)
}

/// Normalised difference map of two equally sized images.
///
/// Both inputs are scaled to [0, 1], subtracted (`b - a`), and the difference
/// is rescaled and inverted so identical regions read 1.
pub fn image_difference(a: &Field2D, b: &Field2D) -> Result<Field2D> {
    if a.width != b.width || a.height != b.height {
        return Err(ShapeletError::InvalidInput(format!(
            "image sizes differ: {}x{} vs {}x{}",
            a.width, a.height, b.width, b.height
        )));
    }
    let (na, nb) = (a.normalized(), b.normalized());
    let diff = Field2D {
        data: nb.data.iter().zip(na.data.iter()).map(|(y, x)| y - x).collect(),
        width: a.width,
        height: a.height,
    };
    let scaled = diff.normalized();
    Ok(Field2D {
        data: scaled.data.iter().map(|v| 1.0 - v).collect(),
        width: a.width,
        height: a.height,
    })
}

/// Provenance attached to every field handed to a [`ResultSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMetadata {
    pub wavelength: f64,
    /// Shapelet order the field belongs to, when it is order specific.
    pub order: Option<u32>,
    pub clusters: Option<usize>,
}

/// Receives the labelled scalar fields of an analysis.
pub trait ResultSink {
    fn accept(&mut self, label: &str, field: &Field2D, metadata: &FieldMetadata) -> Result<()>;
}

/// Writes each field as a min-max scaled 8-bit greyscale PNG named `<label>.png`.
#[derive(Debug, Clone)]
pub struct PngDirectorySink {
    directory: PathBuf,
}

impl PngDirectorySink {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn path_for(&self, label: &str) -> PathBuf {
        self.directory.join(format!("{}.png", label))
    }
}

impl ResultSink for PngDirectorySink {
    fn accept(&mut self, label: &str, field: &Field2D, metadata: &FieldMetadata) -> Result<()> {
        let scaled = field.normalized();
        let mut img_buffer = ImageBuffer::new(field.width as u32, field.height as u32);

        for (x, y, pixel) in img_buffer.enumerate_pixels_mut() {
            let intensity = scaled.get(x as usize, y as usize);
            let byte_val = (intensity * 255.0).round().clamp(0.0, 255.0) as u8;
            *pixel = Luma([byte_val]);
        }

        let path = self.path_for(label);
        img_buffer.save(&path)?;
        info!(
            "Saved {} (wavelength {:.2}, order {:?}) to {}",
            label,
            metadata.wavelength,
            metadata.order,
            path.display()
        );
        Ok(())
    }
}

/// Keeps every accepted field in memory, keyed by label.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub fields: HashMap<String, (Field2D, FieldMetadata)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<&Field2D> {
        self.fields.get(label).map(|(field, _)| field)
    }
}

impl ResultSink for MemorySink {
    fn accept(&mut self, label: &str, field: &Field2D, metadata: &FieldMetadata) -> Result<()> {
        debug!("MemorySink accepted {} ({}x{})", label, field.width, field.height);
        self.fields.insert(label.to_string(), (field.clone(), metadata.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflect_repeats_the_edge_sample() {
        let mapped: Vec<usize> = (-3..7).map(|i| reflect_index(i, 4)).collect();
        assert_eq!(mapped, vec![2, 1, 0, 0, 1, 2, 3, 3, 2, 1]);
        assert_eq!(reflect_index(-9, 4), 0);
    }

    #[test]
    fn pad_reflect_grows_each_side() {
        let field = Field2D::from_fn(3, 2, |x, y| (y * 3 + x) as f64);
        let padded = pad_reflect(&field, 2);
        assert_eq!((padded.width, padded.height), (7, 6));
        assert_eq!(padded.get(0, 2), field.get(1, 0));
        assert_eq!(padded.get(2, 2), field.get(0, 0));
    }

    #[test]
    fn trim_removes_half_a_wavelength() {
        let field = Field2D::from_fn(10, 8, |x, y| (y * 10 + x) as f64);
        let trimmed = trim_field(&field, 4.0).unwrap();
        assert_eq!((trimmed.width, trimmed.height), (6, 4));
        assert_eq!(trimmed.get(0, 0), field.get(2, 2));
        assert_eq!(trim_field(&field, 0.8).unwrap(), field);
        assert!(trim_field(&field, 16.0).is_err());
    }

    #[test]
    fn identical_images_have_flat_difference() {
        let a = Field2D::from_fn(5, 5, |x, y| (x * y) as f64);
        let diff = image_difference(&a, &a).unwrap();
        assert!(diff.data.iter().all(|&v| v == 1.0));
        assert!(image_difference(&a, &Field2D::zeros(4, 5)).is_err());
    }

    #[test]
    fn memory_sink_keeps_fields() {
        let mut sink = MemorySink::new();
        let meta = FieldMetadata {
            wavelength: 8.0,
            order: None,
            clusters: Some(4),
        };
        sink.accept("distance", &Field2D::zeros(2, 2), &meta).unwrap();
        assert_eq!(sink.get("distance").map(|f| f.len()), Some(4));
        assert!(sink.get("missing").is_none());
    }
}
