//! Piecewise-linear interpolation and finite-difference gradients.
//!
//! Measured decay curves and simulated trajectories live on different
//! time grids. [`interp1d_extrap`] resamples one onto the other,
//! extending the edge segments beyond the sampled range so a slightly
//! longer measurement never truncates the comparison.

use upcon_types::error::{UpconError, UpconResult};

fn check_samples(xp: &[f64], fp: &[f64]) -> UpconResult<()> {
    if xp.len() != fp.len() {
        return Err(UpconError::ShapeMismatch(format!(
            "sample points {} and values {} differ in length",
            xp.len(),
            fp.len()
        )));
    }
    if xp.len() < 2 {
        return Err(UpconError::ShapeMismatch(
            "interpolation needs at least two sample points".into(),
        ));
    }
    if xp.windows(2).any(|w| w[1] <= w[0]) {
        return Err(UpconError::DataFormat(
            "sample points must be strictly increasing".into(),
        ));
    }
    Ok(())
}

/// Evaluate the piecewise-linear interpolant of `(xp, fp)` at each `x`,
/// extrapolating with the first or last segment slope outside the range.
pub fn interp1d_extrap(x: &[f64], xp: &[f64], fp: &[f64]) -> UpconResult<Vec<f64>> {
    check_samples(xp, fp)?;
    let n = xp.len();
    let mut out = Vec::with_capacity(x.len());
    for &xi in x {
        let pos = xp.partition_point(|&v| v <= xi);
        let j = pos.saturating_sub(1).min(n - 2);
        let t = (xi - xp[j]) / (xp[j + 1] - xp[j]);
        out.push(fp[j] + t * (fp[j + 1] - fp[j]));
    }
    Ok(out)
}

/// First derivative of `y` on the (possibly nonuniform) grid `x`.
///
/// Interior points use the second-order weighted central difference,
/// the edges one-sided first differences.
pub fn gradient(y: &[f64], x: &[f64]) -> UpconResult<Vec<f64>> {
    check_samples(x, y)?;
    let n = x.len();
    let mut out = vec![0.0; n];
    out[0] = (y[1] - y[0]) / (x[1] - x[0]);
    out[n - 1] = (y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n - 1 {
        let dx1 = x[i] - x[i - 1];
        let dx2 = x[i + 1] - x[i];
        let a = -dx2 / (dx1 * (dx1 + dx2));
        let b = (dx2 - dx1) / (dx1 * dx2);
        let c = dx1 / (dx2 * (dx1 + dx2));
        out[i] = a * y[i - 1] + b * y[i] + c * y[i + 1];
    }
    Ok(out)
}
