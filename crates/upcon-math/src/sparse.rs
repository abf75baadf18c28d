// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Sparse Kernels
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Sparse matrix-vector kernels used on the hot right-hand-side path.
//!
//! The rate matrices are assembled once as CSR and applied millions of
//! times per solve, so these loops stay allocation-free.

use sprs::CsMat;

/// Dense `out = A·x`, overwriting `out`.
pub fn spmv(a: &CsMat<f64>, x: &[f64], out: &mut [f64]) {
    out.fill(0.0);
    spmv_acc(a, x, out);
}

/// Dense `out += A·x` without clearing `out`.
pub fn spmv_acc(a: &CsMat<f64>, x: &[f64], out: &mut [f64]) {
    debug_assert_eq!(a.cols(), x.len());
    debug_assert_eq!(a.rows(), out.len());
    for (row, vec) in a.outer_iterator().enumerate() {
        let mut acc = 0.0;
        for (col, &val) in vec.iter() {
            acc += val * x[col];
        }
        out[row] += acc;
    }
}
