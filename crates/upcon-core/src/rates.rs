//! Rate-equation right-hand side and analytic Jacobian.
//!
//! The system is `y' = A·y + D·y + U·p(y)` with `p_k(y) = y_i·y_j` the
//! pairwise population products (`A` absorption, pulse phase only; `D`
//! decay; `U` upconversion). The bilinear term makes the Jacobian linear
//! in `y`: `∂(y_i·y_j)/∂y_i = y_j`, so each interaction scatters two
//! state values and the whole Jacobian costs one pass over the stored
//! operators per evaluation. This is the inner loop of every solver step
//! and every Newton iteration; nothing here allocates.

use std::cell::RefCell;

use upcon_math::odeint::OdeSystem;
use upcon_math::sparse::{spmv, spmv_acc};
use upcon_types::system::SystemMatrices;

/// Shared evaluation core borrowed by both phase adapters.
pub struct RateEquations<'a> {
    mats: &'a SystemMatrices,
    n: usize,
    /// Per interaction `k`, the `(column, source)` pairs receiving
    /// `y[source]` in the Jacobian. Duplicates sum, so a self-product
    /// `y_i²` correctly contributes `2·y_i`.
    jac_scatter: Vec<Vec<(usize, usize)>>,
    /// Product vector scratch. Single-threaded by design.
    products: RefCell<Vec<f64>>,
}

impl<'a> RateEquations<'a> {
    pub fn new(mats: &'a SystemMatrices) -> Self {
        let mut jac_scatter = vec![Vec::new(); mats.n_interactions()];
        for trip in &mats.jac_indices {
            jac_scatter[trip[0]].push((trip[1], trip[2]));
        }
        Self {
            mats,
            n: mats.n_states(),
            jac_scatter,
            products: RefCell::new(vec![0.0; mats.n_interactions()]),
        }
    }

    fn rhs_into(&self, y: &[f64], dydt: &mut [f64], with_absorption: bool) {
        spmv(&self.mats.decay, y, dydt);
        if with_absorption {
            spmv_acc(&self.mats.absorption, y, dydt);
        }
        let mut products = self.products.borrow_mut();
        for (k, pair) in self.mats.n_indices.iter().enumerate() {
            products[k] = y[pair[0]] * y[pair[1]];
        }
        spmv_acc(&self.mats.uc, &products, dydt);
    }

    fn jac_into(&self, y: &[f64], jac: &mut [f64], with_absorption: bool) {
        let n = self.n;
        jac.fill(0.0);
        for (&v, (r, c)) in self.mats.decay.iter() {
            jac[r * n + c] += v;
        }
        if with_absorption {
            for (&v, (r, c)) in self.mats.absorption.iter() {
                jac[r * n + c] += v;
            }
        }
        // Bilinear term, fused: (U·scatter)[row, col] accumulated
        // without materializing the scatter matrix.
        for (&w, (row, k)) in self.mats.uc.iter() {
            for &(col, src) in &self.jac_scatter[k] {
                jac[row * n + col] += w * y[src];
            }
        }
    }
}

/// Excitation-pulse phase: pumping, decay and transfer all active.
pub struct PulsePhase<'a> {
    core: RateEquations<'a>,
}

impl<'a> PulsePhase<'a> {
    pub fn new(mats: &'a SystemMatrices) -> Self {
        Self {
            core: RateEquations::new(mats),
        }
    }
}

impl OdeSystem for PulsePhase<'_> {
    fn ndim(&self) -> usize {
        self.core.n
    }
    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        self.core.rhs_into(y, dydt, true);
    }
    fn jacobian(&self, _t: f64, y: &[f64], jac: &mut [f64]) {
        self.core.jac_into(y, jac, true);
    }
}

/// Free-relaxation phase: the pump is off, decay and transfer remain.
pub struct RelaxationPhase<'a> {
    core: RateEquations<'a>,
}

impl<'a> RelaxationPhase<'a> {
    pub fn new(mats: &'a SystemMatrices) -> Self {
        Self {
            core: RateEquations::new(mats),
        }
    }
}

impl OdeSystem for RelaxationPhase<'_> {
    fn ndim(&self) -> usize {
        self.core.n
    }
    fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
        self.core.rhs_into(y, dydt, false);
    }
    fn jacobian(&self, _t: f64, y: &[f64], jac: &mut [f64]) {
        self.core.jac_into(y, jac, false);
    }
}
