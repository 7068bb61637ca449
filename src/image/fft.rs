//! 2D FFT helpers on row-major complex buffers.
//!
//! Rows are transformed in place, the buffer is transposed, columns are
//! transformed as rows, and the result is transposed back.

use rayon::prelude::*;
use rustfft::{FftDirection, FftPlanner, num_complex::Complex};

use crate::error::{Result, ShapeletError};
use crate::field::Field2D;

/// In-place 2D FFT. The inverse is left unnormalised, as rustfft does.
pub fn fft_2d(data: &mut [Complex<f64>], width: usize, height: usize, direction: FftDirection) {
    let mut planner = FftPlanner::new();

    let fft_width = planner.plan_fft(width, direction);
    data.par_chunks_mut(width).for_each(|row| fft_width.process(row));

    let mut transposed = vec![Complex::new(0.0, 0.0); width * height];
    (0..height).flat_map(|y| (0..width).map(move |x| (y, x))).for_each(|(y, x)| {
        transposed[x * height + y] = data[y * width + x];
    });

    let fft_height = planner.plan_fft(height, direction);
    transposed.par_chunks_mut(height).for_each(|col| fft_height.process(col));

    (0..height).flat_map(|y| (0..width).map(move |x| (y, x))).for_each(|(y, x)| {
        data[y * width + x] = transposed[x * height + y];
    });
}

/// Forward 2D FFT of real data.
pub fn fft_2d_real(data: &[f64], width: usize, height: usize) -> Vec<Complex<f64>> {
    let mut complex_data: Vec<Complex<f64>> = data.iter().map(|&x| Complex::new(x, 0.0)).collect();
    fft_2d(&mut complex_data, width, height, FftDirection::Forward);
    complex_data
}

/// Normalised inverse 2D FFT.
pub fn ifft_2d(data: &[Complex<f64>], width: usize, height: usize) -> Vec<Complex<f64>> {
    let mut complex_data = data.to_vec();
    fft_2d(&mut complex_data, width, height, FftDirection::Inverse);
    let normalisation = (width * height) as f64;
    complex_data.iter_mut().for_each(|c| *c /= normalisation);
    complex_data
}

/// Sample frequencies of a length-`n` DFT with unit spacing.
pub fn fftfreq(n: usize) -> Vec<f64> {
    let positive = n.div_ceil(2);
    (0..n)
        .map(|i| {
            let k = if i < positive { i as isize } else { i as isize - n as isize };
            k as f64 / n as f64
        })
        .collect()
}

/// Move the zero-frequency term to the centre (index `n / 2` on each axis).
pub fn fftshift<T: Copy>(data: &[T], width: usize, height: usize) -> Vec<T> {
    let mut shifted = data.to_vec();
    for y in 0..height {
        for x in 0..width {
            let sy = (y + height / 2) % height;
            let sx = (x + width / 2) % width;
            shifted[sy * width + sx] = data[y * width + x];
        }
    }
    shifted
}

/// Linear convolution of `image` with a square complex kernel, returning an
/// output the size of the image.
///
/// The image is reflect-padded by the kernel half-width. A circular
/// convolution at the padded size is exact on the slice `[size - 1, size - 1 + n)`
/// of each axis, which is exactly the image footprint.
pub fn fft_convolve_same(image: &Field2D, kernel: &[Complex<f64>], size: usize) -> Result<Vec<Complex<f64>>> {
    if kernel.len() != size * size || size % 2 == 0 {
        return Err(ShapeletError::InvalidInput(format!(
            "kernel must be square with odd size, got {} values for size {}",
            kernel.len(),
            size
        )));
    }
    let half = (size - 1) / 2;
    let padded = super::pad_reflect(image, half);
    let (pw, ph) = (padded.width, padded.height);

    let mut image_fft = fft_2d_real(&padded.data, pw, ph);

    let mut kernel_padded = vec![Complex::new(0.0, 0.0); pw * ph];
    for ky in 0..size {
        kernel_padded[ky * pw..ky * pw + size].copy_from_slice(&kernel[ky * size..(ky + 1) * size]);
    }
    fft_2d(&mut kernel_padded, pw, ph, FftDirection::Forward);

    image_fft.iter_mut().zip(kernel_padded.iter()).for_each(|(a, b)| *a *= b);
    let full = ifft_2d(&image_fft, pw, ph);

    let offset = size - 1;
    let mut result = Vec::with_capacity(image.width * image.height);
    for y in 0..image.height {
        let start = (y + offset) * pw + offset;
        result.extend_from_slice(&full[start..start + image.width]);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct "same" convolution with reflect boundary, for comparison.
    fn direct_convolve(image: &Field2D, kernel: &[Complex<f64>], size: usize) -> Vec<Complex<f64>> {
        let half = (size - 1) as isize / 2;
        let mut out = vec![Complex::new(0.0, 0.0); image.len()];
        for y in 0..image.height {
            for x in 0..image.width {
                let mut acc = Complex::new(0.0, 0.0);
                for ky in 0..size {
                    for kx in 0..size {
                        let sy = super::super::reflect_index(y as isize + half - ky as isize, image.height);
                        let sx = super::super::reflect_index(x as isize + half - kx as isize, image.width);
                        acc += kernel[ky * size + kx] * image.get(sx, sy);
                    }
                }
                out[y * image.width + x] = acc;
            }
        }
        out
    }

    #[test]
    fn fftfreq_matches_numpy_layout() {
        assert_eq!(fftfreq(4), vec![0.0, 0.25, -0.5, -0.25]);
        assert_eq!(fftfreq(5), vec![0.0, 0.2, 0.4, -0.4, -0.2]);
    }

    #[test]
    fn fftshift_centres_dc() {
        let data: Vec<usize> = (0..5).collect();
        assert_eq!(fftshift(&data, 5, 1), vec![3, 4, 0, 1, 2]);
        let even: Vec<usize> = (0..4).collect();
        assert_eq!(fftshift(&even, 1, 4), vec![2, 3, 0, 1]);
    }

    #[test]
    fn forward_then_inverse_restores_data() {
        let data: Vec<f64> = (0..12).map(|v| (v as f64 * 0.37).sin()).collect();
        let restored = ifft_2d(&fft_2d_real(&data, 4, 3), 4, 3);
        for (a, b) in data.iter().zip(restored.iter()) {
            assert!((a - b.re).abs() < 1e-12 && b.im.abs() < 1e-12);
        }
    }

    #[test]
    fn fft_convolution_matches_direct_sum() {
        let image = Field2D::from_fn(7, 5, |x, y| ((x * 3 + y * 5) % 7) as f64 / 7.0 - 0.5);
        let kernel: Vec<Complex<f64>> = (0..9).map(|i| Complex::new(i as f64 * 0.1 - 0.3, (i % 3) as f64 * 0.2)).collect();
        let fast = fft_convolve_same(&image, &kernel, 3).unwrap();
        let slow = direct_convolve(&image, &kernel, 3);
        for (a, b) in fast.iter().zip(slow.iter()) {
            assert!((a - b).norm() < 1e-10, "{} vs {}", a, b);
        }
    }

    #[test]
    fn kernel_larger_than_image_is_supported() {
        let image = Field2D::from_fn(4, 3, |x, y| (x + 2 * y) as f64);
        let kernel = vec![Complex::new(1.0 / 81.0, 0.0); 81];
        let fast = fft_convolve_same(&image, &kernel, 9).unwrap();
        let slow = direct_convolve(&image, &kernel, 9);
        for (a, b) in fast.iter().zip(slow.iter()) {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn even_kernel_is_rejected() {
        let image = Field2D::zeros(4, 4);
        assert!(fft_convolve_same(&image, &[Complex::new(0.0, 0.0); 4], 2).is_err());
    }
}
