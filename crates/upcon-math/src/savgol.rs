// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Savitzky-Golay Smoothing
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Savitzky-Golay smoothing for measured decay curves.
//!
//! Fits a least-squares polynomial over a sliding window and evaluates
//! it at the window centre. Edges are handled by nearest-value padding,
//! matching the treatment the comparison pipeline expects.

use upcon_types::error::{UpconError, UpconResult};

use crate::linalg::solve_dense;

/// Convolution kernel that evaluates the windowed LS polynomial fit at
/// the centre sample.
fn savgol_kernel(window: usize, order: usize) -> UpconResult<Vec<f64>> {
    let half = (window / 2) as isize;
    let ncoef = order + 1;

    // Normal equations (AᵀA)z = e0 with A[i][j] = x_i^j, x_i = i − half.
    let mut ata = vec![0.0; ncoef * ncoef];
    for i in 0..window {
        let x = (i as isize - half) as f64;
        let mut powers = vec![1.0; ncoef];
        for j in 1..ncoef {
            powers[j] = powers[j - 1] * x;
        }
        for r in 0..ncoef {
            for c in 0..ncoef {
                ata[r * ncoef + c] += powers[r] * powers[c];
            }
        }
    }
    let mut e0 = vec![0.0; ncoef];
    e0[0] = 1.0;
    let z = solve_dense(&ata, &e0, ncoef)
        .map_err(|_| UpconError::LinAlg("degenerate smoothing window".into()))?;

    let mut kernel = vec![0.0; window];
    for i in 0..window {
        let x = (i as isize - half) as f64;
        let mut xp = 1.0;
        for coef in z.iter().take(ncoef) {
            kernel[i] += coef * xp;
            xp *= x;
        }
    }
    Ok(kernel)
}

/// Smooth `data` with a window of `window` samples and a polynomial of
/// degree `order`, padding the edges with the nearest sample.
pub fn savgol_filter(data: &[f64], window: usize, order: usize) -> UpconResult<Vec<f64>> {
    if window % 2 == 0 {
        return Err(UpconError::ConfigError(format!(
            "smoothing window must be odd, got {window}"
        )));
    }
    if order >= window {
        return Err(UpconError::ConfigError(format!(
            "polynomial order {order} does not fit in window {window}"
        )));
    }
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let kernel = savgol_kernel(window, order)?;
    let half = (window / 2) as isize;
    let len = data.len() as isize;

    let mut out = vec![0.0; data.len()];
    for (i, slot) in out.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (k, &w) in kernel.iter().enumerate() {
            let idx = (i as isize + k as isize - half).clamp(0, len - 1);
            acc += w * data[idx as usize];
        }
        *slot = acc;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_weights_sum_to_one() {
        let kernel = savgol_kernel(11, 2).unwrap();
        let sum: f64 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_quadratic_passes_through_interior() {
        let data: Vec<f64> = (0..40).map(|i| {
            let x = i as f64;
            0.5 * x * x - 3.0 * x + 7.0
        }).collect();
        let smooth = savgol_filter(&data, 11, 2).unwrap();
        // A degree-2 fit reproduces a quadratic exactly away from the
        // padded edges.
        for i in 5..35 {
            assert!(
                (smooth[i] - data[i]).abs() < 1e-9,
                "index {i}: {} vs {}",
                smooth[i],
                data[i]
            );
        }
    }

    #[test]
    fn test_constant_signal_unchanged_everywhere() {
        let data = vec![4.25; 30];
        let smooth = savgol_filter(&data, 11, 2).unwrap();
        for v in smooth {
            assert!((v - 4.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_alternating_noise_is_attenuated() {
        let data: Vec<f64> = (0..60)
            .map(|i| 2.0 * i as f64 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let smooth = savgol_filter(&data, 11, 2).unwrap();
        for i in 5..55 {
            let line = 2.0 * i as f64;
            assert!(
                (smooth[i] - line).abs() < 0.5,
                "index {i}: residual {}",
                smooth[i] - line
            );
        }
    }

    #[test]
    fn test_even_window_rejected() {
        assert!(savgol_filter(&[1.0; 20], 10, 2).is_err());
    }

    #[test]
    fn test_order_must_fit_window() {
        assert!(savgol_filter(&[1.0; 20], 5, 5).is_err());
    }
}
