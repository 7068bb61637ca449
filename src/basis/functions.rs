//! Closed-form shapelet basis functions.
//!
//! Cartesian (Gauss-Hermite), polar (Gauss-Laguerre), the two orthonormal
//! polar families used for pattern analysis, and exponential shapelets.
//! Polar functions return the complex value `S(r) e^{-i m theta}` evaluated at
//! Cartesian coordinates `(x1, x2)`.

use rustfft::num_complex::Complex;
use std::f64::consts::PI;

use crate::error::{Result, ShapeletError};

/// `ln(n!)`, exact summation (orders stay small enough).
pub fn ln_factorial(n: u32) -> f64 {
    (2..=n).map(|k| (k as f64).ln()).sum()
}

pub fn factorial(n: u32) -> f64 {
    (2..=n).map(|k| k as f64).product()
}

/// Physicists' Hermite polynomial `H_n(x)` by the three-term recurrence.
pub fn hermite(n: u32, x: f64) -> f64 {
    let (mut prev, mut curr) = (1.0, 2.0 * x);
    if n == 0 {
        return prev;
    }
    for k in 1..n {
        let next = 2.0 * x * curr - 2.0 * k as f64 * prev;
        prev = curr;
        curr = next;
    }
    curr
}

/// Generalised Laguerre polynomial `L_n^alpha(x)`.
pub fn gen_laguerre(n: u32, alpha: f64, x: f64) -> f64 {
    let (mut prev, mut curr) = (1.0, 1.0 + alpha - x);
    if n == 0 {
        return prev;
    }
    for k in 1..n {
        let k = k as f64;
        let next = ((2.0 * k + 1.0 + alpha - x) * curr - (k + alpha) * prev) / (k + 1.0);
        prev = curr;
        curr = next;
    }
    curr
}

fn check_beta(beta: f64) -> Result<()> {
    if !(beta > 0.0 && beta.is_finite()) {
        return Err(ShapeletError::InvalidInput(format!("beta must be positive, got {}", beta)));
    }
    Ok(())
}

/// 1D Cartesian shapelet `beta^{-1/2} phi_n(x / beta)`.
pub fn cartesian_1d(n: u32, x1: f64, beta: f64) -> Result<f64> {
    check_beta(beta)?;
    Ok(beta.powf(-0.5) * hermite_function(n, x1 / beta))
}

/// 2D Cartesian shapelet, separable product of two 1D functions.
pub fn cartesian_2d(n1: u32, n2: u32, x1: f64, x2: f64, beta: f64) -> Result<f64> {
    check_beta(beta)?;
    Ok(hermite_function(n1, x1 / beta) * hermite_function(n2, x2 / beta) / beta)
}

/// Dimensionless `phi_n(x) = (2^n sqrt(pi) n!)^{-1/2} H_n(x) e^{-x^2/2}`.
fn hermite_function(n: u32, x: f64) -> f64 {
    let ln_norm = -0.5 * (n as f64 * 2f64.ln() + 0.5 * PI.ln() + ln_factorial(n));
    ln_norm.exp() * hermite(n, x) * (-0.5 * x * x).exp()
}

/// 2D polar shapelet `S_{n,m}` with `|m| <= n` and `n - m` even.
pub fn polar_2d(n: u32, m: i32, x1: f64, x2: f64, beta: f64) -> Result<Complex<f64>> {
    check_beta(beta)?;
    let abs_m = m.unsigned_abs();
    if abs_m > n {
        return Err(ShapeletError::InvalidInput(format!("m = {} must lie in [-{}, {}]", m, n, n)));
    }
    if (n - abs_m) % 2 != 0 {
        return Err(ShapeletError::InvalidInput(format!(
            "m = {} must have the same parity as n = {}",
            m, n
        )));
    }
    let nm = (n - abs_m) / 2;
    let nm2 = (n + abs_m) / 2;
    let sign = if nm % 2 == 0 { 1.0 } else { -1.0 };
    let weight = sign / beta.powi(abs_m as i32 + 1)
        * (0.5 * (ln_factorial(nm) - PI.ln() - ln_factorial(nm2))).exp();

    let r = x1.hypot(x2);
    let theta = x2.atan2(x1);
    let rho2 = (r / beta).powi(2);
    let radial = weight * r.powi(abs_m as i32) * gen_laguerre(nm, abs_m as f64, rho2) * (-0.5 * rho2).exp();
    Ok(Complex::from_polar(1.0, -(m as f64) * theta) * radial)
}

/// Orthonormal polar shapelet with no radial node (`n = 0`).
pub fn orthonormal_polar_n0(m: u32, x1: f64, x2: f64, beta: f64) -> Result<Complex<f64>> {
    check_beta(beta)?;
    check_rotational_order(m)?;
    Ok(polar_n0_unchecked(m, x1, x2, beta))
}

/// Orthonormal polar shapelet with one radial node (`n = 1`).
pub fn orthonormal_polar_n1(m: u32, x1: f64, x2: f64, beta: f64) -> Result<Complex<f64>> {
    check_beta(beta)?;
    check_rotational_order(m)?;
    Ok(polar_n1_unchecked(m, x1, x2, beta))
}

fn check_rotational_order(m: u32) -> Result<()> {
    if m < 1 {
        return Err(ShapeletError::InvalidInput("rotational order m must be >= 1".to_string()));
    }
    Ok(())
}

// Amplitudes are assembled in the log domain so that high orders neither
// overflow m! nor (r / beta)^m.

pub(crate) fn polar_n0_unchecked(m: u32, x1: f64, x2: f64, beta: f64) -> Complex<f64> {
    let rho = x1.hypot(x2) / beta;
    if rho == 0.0 {
        return Complex::new(0.0, 0.0);
    }
    let ln_amp = -beta.ln() - 0.5 * (PI.ln() + ln_factorial(m)) + m as f64 * rho.ln() - 0.5 * rho * rho;
    Complex::from_polar(ln_amp.exp(), -(m as f64) * x2.atan2(x1))
}

pub(crate) fn polar_n1_unchecked(m: u32, x1: f64, x2: f64, beta: f64) -> Complex<f64> {
    let rho = x1.hypot(x2) / beta;
    let node = 1.0 + m as f64 - rho * rho;
    if rho == 0.0 || node == 0.0 {
        return Complex::new(0.0, 0.0);
    }
    let ln_amp = -beta.ln() - 0.5 * (PI.ln() + ln_factorial(m) + ((m + 1) as f64).ln()) + m as f64 * rho.ln()
        - 0.5 * rho * rho
        + node.abs().ln();
    Complex::from_polar(node.signum() * ln_amp.exp(), -(m as f64) * x2.atan2(x1))
}

/// 1D exponential shapelet, defined for `x1 >= 0` and `n >= 1`.
pub fn exponential_1d(n: u32, x1: f64, beta: f64) -> Result<f64> {
    check_beta(beta)?;
    if n < 1 {
        return Err(ShapeletError::InvalidInput("n must be >= 1".to_string()));
    }
    if x1 < 0.0 {
        return Err(ShapeletError::InvalidInput(format!("x1 must be >= 0, got {}", x1)));
    }
    let sign = if (n - 1) % 2 == 0 { 1.0 } else { -1.0 };
    let a = sign / (beta * (n as f64).powi(3)).sqrt();
    let u = 2.0 * x1 / (n as f64 * beta);
    Ok(a * u * gen_laguerre(n - 1, 1.0, u) * (-x1 / (n as f64 * beta)).exp())
}

/// 2D exponential shapelet `S_{n,m}` with `|m| <= n`.
pub fn exponential_2d(n: u32, m: i32, x1: f64, x2: f64, beta: f64) -> Result<Complex<f64>> {
    check_beta(beta)?;
    let abs_m = m.unsigned_abs();
    if abs_m > n {
        return Err(ShapeletError::InvalidInput(format!("m = {} must lie in [-{}, {}]", m, n, n)));
    }
    let nm = n - abs_m;
    let nm2 = n + abs_m;
    let nm3 = (2 * n + 1) as f64;
    let b = 2.0 / (beta * nm3);
    let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
    let c = sign * (2.0 / (beta * PI * nm3.powi(3))).sqrt() * (0.5 * (ln_factorial(nm) - ln_factorial(nm2))).exp();

    let r = x1.hypot(x2);
    let radial = c * (r * b).powi(abs_m as i32) * gen_laguerre(nm, 2.0 * abs_m as f64, r * b) * (-r / (beta * nm3)).exp();
    Ok(Complex::from_polar(1.0, -(m as f64) * x2.atan2(x1)) * radial)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Riemann sum of |f|^2 over a unit-spaced square grid.
    fn grid_energy(half: i32, f: impl Fn(f64, f64) -> f64) -> f64 {
        let mut total = 0.0;
        for y in -half..=half {
            for x in -half..=half {
                let v = f(x as f64, y as f64);
                total += v * v;
            }
        }
        total
    }

    #[test]
    fn hermite_matches_closed_forms() {
        let x: f64 = 0.7;
        assert!((hermite(2, x) - (4.0 * x * x - 2.0)).abs() < 1e-12);
        assert!((hermite(3, x) - (8.0 * x.powi(3) - 12.0 * x)).abs() < 1e-12);
    }

    #[test]
    fn laguerre_matches_closed_forms() {
        let (x, a): (f64, f64) = (1.3, 2.0);
        let l2 = 0.5 * (x * x - 2.0 * (a + 2.0) * x + (a + 1.0) * (a + 2.0));
        assert!((gen_laguerre(1, a, x) - (1.0 + a - x)).abs() < 1e-12);
        assert!((gen_laguerre(2, a, x) - l2).abs() < 1e-12);
    }

    #[test]
    fn factorials_agree() {
        assert_eq!(factorial(5), 120.0);
        assert!((ln_factorial(10) - factorial(10).ln()).abs() < 1e-12);
    }

    #[test]
    fn orthonormal_polar_families_have_unit_energy() {
        for m in 1..=4 {
            let n0 = grid_energy(60, |x, y| orthonormal_polar_n0(m, x, y, 4.0).unwrap().norm());
            let n1 = grid_energy(60, |x, y| orthonormal_polar_n1(m, x, y, 4.0).unwrap().norm());
            assert!((n0 - 1.0).abs() < 1e-3, "n0 m={} energy {}", m, n0);
            assert!((n1 - 1.0).abs() < 1e-3, "n1 m={} energy {}", m, n1);
        }
    }

    #[test]
    fn cartesian_and_polar_are_normalised() {
        let cart = grid_energy(40, |x, y| cartesian_2d(2, 1, x, y, 3.0).unwrap());
        let polar = grid_energy(40, |x, y| polar_2d(2, 0, x, y, 3.0).unwrap().norm());
        assert!((cart - 1.0).abs() < 1e-3, "cartesian energy {}", cart);
        assert!((polar - 1.0).abs() < 1e-3, "polar energy {}", polar);
    }

    #[test]
    fn polar_n0_matches_general_polar_form() {
        // S_{m,m} of the general family is the n = 0 orthonormal function up to sign.
        let general = polar_2d(3, 3, 1.5, -0.5, 2.0).unwrap();
        let special = orthonormal_polar_n0(3, 1.5, -0.5, 2.0).unwrap();
        assert!((general - special).norm() < 1e-12);
    }

    #[test]
    fn high_orders_stay_finite() {
        let v = orthonormal_polar_n0(180, 40.0, 3.0, 2.0).unwrap();
        assert!(v.re.is_finite() && v.im.is_finite());
    }

    #[test]
    fn parameter_validation() {
        assert!(orthonormal_polar_n0(0, 1.0, 1.0, 1.0).is_err());
        assert!(orthonormal_polar_n1(2, 1.0, 1.0, -1.0).is_err());
        assert!(polar_2d(2, 1, 0.0, 0.0, 1.0).is_err());
        assert!(polar_2d(2, 4, 0.0, 0.0, 1.0).is_err());
        assert!(exponential_1d(0, 1.0, 1.0).is_err());
        assert!(exponential_1d(1, -1.0, 1.0).is_err());
        assert!(exponential_2d(1, 2, 1.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn exponential_ground_state_decays() {
        let near = exponential_2d(0, 0, 0.5, 0.0, 1.0).unwrap().norm();
        let far = exponential_2d(0, 0, 5.0, 0.0, 1.0).unwrap().norm();
        assert!(near > far);
        assert!((exponential_1d(1, 0.0, 1.0).unwrap()).abs() < 1e-15);
    }
}
