use crate::error::{Result, ShapeletError};
use crate::field::Field2D;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageBuffer, Luma};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Supplies the greyscale image an analysis runs on.
pub trait ImageSource {
    fn load(&self) -> Result<Field2D>;
}

/// Decodes an image file into a greyscale field on [-1, 1].
#[derive(Debug, Clone)]
pub struct FileImageSource {
    path: PathBuf,
    rescale: bool,
}

impl FileImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rescale: true,
        }
    }

    /// Keep the decoded size instead of resampling into the workable range.
    pub fn without_rescale(mut self) -> Self {
        self.rescale = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageSource for FileImageSource {
    fn load(&self) -> Result<Field2D> {
        let img = image::open(&self.path)?;
        let mut grey = to_greyscale(img);
        if self.rescale {
            grey = rescale_to_workable_size(grey);
        }
        let (width, height) = grey.dimensions();
        let field = Field2D::from_vec(width as usize, height as usize, grey.into_raw().into_iter().map(f64::from).collect())?;
        info!("Loaded {} as {}x{} greyscale", self.path.display(), width, height);
        normalize_signed(&field)
    }
}

/// An already decoded image.
#[derive(Debug, Clone)]
pub struct MemoryImageSource {
    field: Field2D,
}

impl MemoryImageSource {
    pub fn new(field: Field2D) -> Self {
        Self { field }
    }
}

impl ImageSource for MemoryImageSource {
    fn load(&self) -> Result<Field2D> {
        self.field.ensure_finite()?;
        Ok(self.field.clone())
    }
}

type GreyImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Luma conversion with the ITU-R 601 weights.
fn to_greyscale(img: DynamicImage) -> GreyImage {
    let (width, height) = img.dimensions();
    match img {
        DynamicImage::ImageLuma8(img) => {
            ImageBuffer::from_fn(width, height, |x, y| Luma([img.get_pixel(x, y)[0] as f32]))
        }
        other => {
            let rgb = other.to_rgb8();
            ImageBuffer::from_fn(width, height, |x, y| {
                let pixel = rgb.get_pixel(x, y);
                Luma([0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32])
            })
        }
    }
}

/// Shrink by 0.8 while any side is at least 2000 pixels, then grow by 1.2
/// while any side is at most 500 pixels.
fn rescale_to_workable_size(mut grey: GreyImage) -> GreyImage {
    let resize = |img: &GreyImage, factor: f64| {
        let (w, h) = img.dimensions();
        let nw = ((w as f64 * factor).round() as u32).max(1);
        let nh = ((h as f64 * factor).round() as u32).max(1);
        debug!("Resampling {}x{} -> {}x{}", w, h, nw, nh);
        imageops::resize(img, nw, nh, FilterType::Triangle)
    };
    while grey.width() >= 2000 || grey.height() >= 2000 {
        grey = resize(&grey, 0.8);
    }
    while grey.width() <= 500 || grey.height() <= 500 {
        grey = resize(&grey, 1.2);
    }
    grey
}

/// Min-max scale onto [-1, 1].
pub fn normalize_signed(field: &Field2D) -> Result<Field2D> {
    field.ensure_finite()?;
    let (lo, hi) = field.min_max();
    if hi <= lo {
        return Err(ShapeletError::InvalidInput("image has no contrast".to_string()));
    }
    let data = field.data.iter().map(|v| 2.0 * (v - lo) / (hi - lo) - 1.0).collect();
    Field2D::from_vec(field.width, field.height, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_signed_spans_unit_interval() {
        let field = Field2D::from_fn(4, 2, |x, y| (x + 4 * y) as f64);
        let scaled = normalize_signed(&field).unwrap();
        let (lo, hi) = scaled.min_max();
        assert_eq!((lo, hi), (-1.0, 1.0));
        assert!(normalize_signed(&Field2D::zeros(3, 3)).is_err());
    }

    #[test]
    fn small_images_are_upsampled() {
        let grey = GreyImage::from_pixel(100, 120, Luma([1.0]));
        let rescaled = rescale_to_workable_size(grey);
        assert!(rescaled.width() > 500 && rescaled.height() > 500);
        assert!(rescaled.width() < 2000 && rescaled.height() < 2000);
    }

    #[test]
    fn file_source_round_trips_a_png() {
        let dir = std::env::temp_dir().join(format!("shapelet_loader_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gradient.png");
        let img = image::GrayImage::from_fn(16, 8, |x, _| Luma([(x * 16) as u8]));
        img.save(&path).unwrap();

        let field = FileImageSource::new(&path).without_rescale().load().unwrap();
        assert_eq!((field.width, field.height), (16, 8));
        assert_eq!(field.get(0, 0), -1.0);
        assert_eq!(field.get(15, 7), 1.0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(FileImageSource::new("/definitely/not/here.png").load().is_err());
    }
}
