//! Characteristic wavelength of a periodic image.
//!
//! The wavelength is read off the radially averaged power spectrum: the
//! spectrum and the frequency grid are averaged over the same rings, and the
//! ring with the strongest power inside the admissible wavelength range wins.

use log::debug;
use std::collections::BTreeMap;

use crate::error::{Result, ShapeletError};
use crate::field::Field2D;
use crate::image::fft::{fft_2d_real, fftfreq, fftshift};

/// Substitute for the DC term so the mean level cannot dominate the spectrum.
const DC_REPLACEMENT: f64 = 0.1;

/// Admissible wavelengths, in pixels. `None` leaves that end open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavelengthRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl WavelengthRange {
    pub const UNBOUNDED: Self = Self { min: None, max: None };

    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, wavelength: f64) -> bool {
        self.min.is_none_or(|lo| wavelength >= lo) && self.max.is_none_or(|hi| wavelength <= hi)
    }
}

impl Default for WavelengthRange {
    fn default() -> Self {
        Self::new(0.0, 100.0)
    }
}

/// Mean of all samples sharing one rounded radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialBin {
    pub radius: u64,
    pub mean: f64,
    pub count: usize,
}

/// One ring of the radially averaged spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadialSample {
    pub wavelength: f64,
    pub power: f64,
}

/// Average `field` over rings of equal rounded radius about `(width/2, height/2)`,
/// the sample `fftshift` moves the zero frequency to.
///
/// The axes are rescaled to the shorter half-extent, so non-square fields are
/// averaged over ellipses. The innermost ring is the centre sample alone and
/// is dropped; radii no sample rounds to produce no bin.
pub fn radial_average(field: &Field2D) -> Result<Vec<RadialBin>> {
    if field.width < 2 || field.height < 2 {
        return Err(ShapeletError::InvalidInput(format!(
            "radial average needs at least 2x2 samples, got {}x{}",
            field.width, field.height
        )));
    }
    let cx = (field.width / 2) as f64;
    let cy = (field.height / 2) as f64;
    let length = cx.min(cy);

    let mut bins: BTreeMap<u64, (f64, usize)> = BTreeMap::new();
    for y in 0..field.height {
        for x in 0..field.width {
            let dx = (x as f64 - cx) * length / cx;
            let dy = (y as f64 - cy) * length / cy;
            let radius = dx.hypot(dy).round_ties_even() as u64;
            let entry = bins.entry(radius).or_insert((0.0, 0));
            entry.0 += field.get(x, y);
            entry.1 += 1;
        }
    }

    Ok(bins
        .into_iter()
        .skip(1)
        .map(|(radius, (sum, count))| RadialBin {
            radius,
            mean: sum / count as f64,
            count,
        })
        .collect())
}

/// Radially averaged power spectrum paired with the wavelength of each ring.
pub fn radial_profile(image: &Field2D) -> Result<Vec<RadialSample>> {
    image.ensure_finite()?;
    let (width, height) = (image.width, image.height);

    let mut spectrum = fft_2d_real(&image.data, width, height);
    if let Some(dc) = spectrum.first_mut() {
        dc.re = DC_REPLACEMENT;
        dc.im = 0.0;
    }
    let power: Vec<f64> = fftshift(&spectrum, width, height).iter().map(|c| c.norm()).collect();

    let fx = fftfreq(width);
    let fy = fftfreq(height);
    let omega: Vec<f64> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| fx[x].hypot(fy[y]))
        .collect();
    let freqs = fftshift(&omega, width, height);

    let power_bins = radial_average(&Field2D::from_vec(width, height, power)?)?;
    let freq_bins = radial_average(&Field2D::from_vec(width, height, freqs)?)?;

    Ok(power_bins
        .iter()
        .zip(freq_bins.iter())
        .map(|(p, f)| RadialSample {
            wavelength: 1.0 / f.mean,
            power: p.mean,
        })
        .collect())
}

/// Dominant spatial period of `image`, in pixels.
pub fn estimate_wavelength(image: &Field2D, range: WavelengthRange) -> Result<f64> {
    let profile = radial_profile(image)?;

    let best = profile
        .iter()
        .filter(|s| s.wavelength.is_finite() && range.contains(s.wavelength))
        .fold(None::<RadialSample>, |best, s| match best {
            Some(b) if b.power >= s.power => Some(b),
            _ => Some(*s),
        })
        .ok_or(ShapeletError::EmptyWavelengthRange {
            min: range.min,
            max: range.max,
        })?;

    debug!("Wavelength of image is {:.2} pixels", best.wavelength);
    Ok(best.wavelength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn square_lattice(size: usize, period: f64) -> Field2D {
        Field2D::from_fn(size, size, |x, y| {
            0.5 * ((2.0 * PI * x as f64 / period).cos() + (2.0 * PI * y as f64 / period).cos())
        })
    }

    #[test]
    fn square_lattice_period_is_recovered() {
        let lambda = estimate_wavelength(&square_lattice(64, 8.0), WavelengthRange::default()).unwrap();
        assert!((lambda - 8.0).abs() <= 1.0, "estimated {}", lambda);
    }

    #[test]
    fn lattice_periods_within_one_pixel() {
        for period in [5.0, 6.0, 8.0, 10.0, 12.0, 16.0] {
            let lambda = estimate_wavelength(&square_lattice(64, period), WavelengthRange::default()).unwrap();
            assert!((lambda - period).abs() <= 1.0, "period {}: estimated {}", period, lambda);
        }
    }

    #[test]
    fn even_fields_are_ringed_about_the_zero_frequency() {
        let field = Field2D::from_fn(8, 8, |x, y| if (x, y) == (4, 4) { 100.0 } else { 1.0 });
        let bins = radial_average(&field).unwrap();
        assert_eq!(bins.first().map(|b| b.radius), Some(1));
        assert!(bins.iter().all(|b| b.mean == 1.0));
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 63);
    }

    #[test]
    fn stripes_on_rectangular_image() {
        let image = Field2D::from_fn(96, 64, |x, _| (2.0 * PI * x as f64 / 12.0).cos());
        let lambda = estimate_wavelength(&image, WavelengthRange::default()).unwrap();
        assert!((lambda - 12.0).abs() <= 1.5, "estimated {}", lambda);
    }

    #[test]
    fn estimate_is_deterministic() {
        let image = square_lattice(48, 6.0);
        let a = estimate_wavelength(&image, WavelengthRange::default()).unwrap();
        let b = estimate_wavelength(&image, WavelengthRange::default()).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn impossible_range_is_an_error() {
        let err = estimate_wavelength(&square_lattice(32, 8.0), WavelengthRange::new(500.0, 600.0));
        assert!(matches!(err, Err(ShapeletError::EmptyWavelengthRange { .. })));
    }

    #[test]
    fn open_ended_range_admits_everything() {
        let range = WavelengthRange {
            min: Some(4.0),
            max: None,
        };
        assert!(range.contains(1e6));
        assert!(!range.contains(3.9));
        assert!(WavelengthRange::UNBOUNDED.contains(0.5));
    }

    #[test]
    fn radial_average_drops_the_centre_of_odd_fields() {
        let field = Field2D::from_fn(5, 5, |x, y| if (x, y) == (2, 2) { 100.0 } else { 1.0 });
        let bins = radial_average(&field).unwrap();
        assert_eq!(bins.first().map(|b| b.radius), Some(1));
        assert!(bins.iter().all(|b| b.mean == 1.0));
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 24);
    }

    #[test]
    fn degenerate_fields_are_rejected() {
        assert!(radial_average(&Field2D::zeros(1, 8)).is_err());
    }
}
