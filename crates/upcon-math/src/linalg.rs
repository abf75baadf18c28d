//! Dense linear algebra kernels.
//!
//! LU factorization with partial pivoting on row-major buffers. Sized for
//! the Newton iteration matrices of the rate-equation solver (a few
//! hundred rows) and the tiny Savitzky-Golay normal equations; no BLAS.

use upcon_types::error::{UpconError, UpconResult};

/// Pivot magnitude below which the matrix is treated as singular.
const SINGULAR_EPS: f64 = 1e-30;

/// Factor a row-major `n x n` matrix in place into `P*A = L*U`.
///
/// `a` holds L (unit diagonal, below) and U (on and above) afterwards;
/// `pivot` records the row permutation for [`lu_solve`].
pub fn lu_factor(a: &mut [f64], pivot: &mut [usize], n: usize) -> UpconResult<()> {
    if a.len() != n * n || pivot.len() != n {
        return Err(UpconError::LinAlg(format!(
            "lu_factor: buffer {} and pivot {} do not fit n={n}",
            a.len(),
            pivot.len()
        )));
    }
    for (i, p) in pivot.iter_mut().enumerate() {
        *p = i;
    }
    for k in 0..n {
        let mut max_val = a[k * n + k].abs();
        let mut max_row = k;
        for i in (k + 1)..n {
            let v = a[i * n + k].abs();
            if v > max_val {
                max_val = v;
                max_row = i;
            }
        }
        if max_val < SINGULAR_EPS {
            return Err(UpconError::LinAlg(
                "singular iteration matrix (degenerate Jacobian)".into(),
            ));
        }
        if max_row != k {
            pivot.swap(k, max_row);
            for j in 0..n {
                a.swap(k * n + j, max_row * n + j);
            }
        }
        let akk = a[k * n + k];
        for i in (k + 1)..n {
            a[i * n + k] /= akk;
            let lik = a[i * n + k];
            for j in (k + 1)..n {
                a[i * n + j] -= lik * a[k * n + j];
            }
        }
    }
    Ok(())
}

/// Solve `A*x = b` from a factorization produced by [`lu_factor`].
/// `b` is overwritten with the solution.
pub fn lu_solve(a: &[f64], pivot: &[usize], b: &mut [f64], n: usize) {
    let mut pb = vec![0.0; n];
    for i in 0..n {
        pb[i] = b[pivot[i]];
    }
    for i in 0..n {
        for j in 0..i {
            pb[i] -= a[i * n + j] * pb[j];
        }
    }
    for i in (0..n).rev() {
        for j in (i + 1)..n {
            pb[i] -= a[i * n + j] * pb[j];
        }
        pb[i] /= a[i * n + i];
    }
    b.copy_from_slice(&pb);
}

/// Solve a dense system once, factoring a scratch copy of `a`.
pub fn solve_dense(a: &[f64], b: &[f64], n: usize) -> UpconResult<Vec<f64>> {
    let mut work = a.to_vec();
    let mut pivot = vec![0usize; n];
    lu_factor(&mut work, &mut pivot, n)?;
    let mut x = b.to_vec();
    lu_solve(&work, &pivot, &mut x, n);
    Ok(x)
}
