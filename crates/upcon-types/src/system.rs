// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — System Matrices
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Container for the assembled rate-equation operators.
//!
//! Matrix assembly produces one value of this type per run; the ODE system
//! and the solution post-processing consume it read-only.

use ndarray::Array1;
use sprs::CsMat;

use crate::config::SimulationConfig;
use crate::error::{UpconError, UpconResult};

/// Sparse operators and bookkeeping indices for one assembled system.
///
/// The state vector concatenates all sensitizer states first, then all
/// activator states, ion by ion in placement order. `n_indices[k]` names
/// the two state-vector entries whose product forms row `k` of the
/// upconversion input; `jac_indices` holds `(row, col, source)` triples
/// scattering `y[source]` into the non-linear Jacobian contribution of
/// shape `(uc.cols(), uc.rows())`.
#[derive(Debug, Clone)]
pub struct SystemMatrices {
    pub absorption: CsMat<f64>,
    pub decay: CsMat<f64>,
    pub uc: CsMat<f64>,
    pub n_indices: Vec<[usize; 2]>,
    pub jac_indices: Vec<[usize; 3]>,
    pub initial_population: Array1<f64>,
    /// Per placed ion: global index of its ground state when the ion is
    /// a sensitizer, `None` otherwise.
    pub index_s: Vec<Option<usize>>,
    /// Per placed ion: global index of its ground state when the ion is
    /// an activator.
    pub index_a: Vec<Option<usize>>,
}

impl SystemMatrices {
    /// Total number of (ion, state) entries in the state vector.
    pub fn n_states(&self) -> usize {
        self.initial_population.len()
    }

    /// Number of pairwise interaction products.
    pub fn n_interactions(&self) -> usize {
        self.n_indices.len()
    }

    /// Check mutual dimension consistency of all operators and indices.
    pub fn validate(&self) -> UpconResult<()> {
        let n = self.n_states();
        if self.absorption.rows() != n || self.absorption.cols() != n {
            return Err(UpconError::ShapeMismatch(format!(
                "absorption matrix is {}x{}, state vector has {n} entries",
                self.absorption.rows(),
                self.absorption.cols()
            )));
        }
        if self.decay.rows() != n || self.decay.cols() != n {
            return Err(UpconError::ShapeMismatch(format!(
                "decay matrix is {}x{}, state vector has {n} entries",
                self.decay.rows(),
                self.decay.cols()
            )));
        }
        if self.uc.rows() != n {
            return Err(UpconError::ShapeMismatch(format!(
                "uc matrix has {} rows, state vector has {n} entries",
                self.uc.rows()
            )));
        }
        if self.uc.cols() != self.n_indices.len() {
            return Err(UpconError::ShapeMismatch(format!(
                "uc matrix has {} columns for {} interaction pairs",
                self.uc.cols(),
                self.n_indices.len()
            )));
        }
        for (k, pair) in self.n_indices.iter().enumerate() {
            if pair[0] >= n || pair[1] >= n {
                return Err(UpconError::ShapeMismatch(format!(
                    "n_indices[{k}] = {pair:?} outside state vector of length {n}"
                )));
            }
        }
        for (k, trip) in self.jac_indices.iter().enumerate() {
            if trip[0] >= self.uc.cols() || trip[1] >= n || trip[2] >= n {
                return Err(UpconError::ShapeMismatch(format!(
                    "jac_indices[{k}] = {trip:?} outside scatter shape ({}, {n})",
                    self.uc.cols()
                )));
            }
        }
        if self.index_s.len() != self.index_a.len() {
            return Err(UpconError::ShapeMismatch(format!(
                "index maps cover {} and {} ions",
                self.index_s.len(),
                self.index_a.len()
            )));
        }
        for idx in self.index_s.iter().chain(self.index_a.iter()).flatten() {
            if *idx >= n {
                return Err(UpconError::ShapeMismatch(format!(
                    "ground-state index {idx} outside state vector of length {n}"
                )));
            }
        }
        Ok(())
    }
}

/// Output of the matrix-assembly step: the configuration snapshot actually
/// used plus the validated operators.
#[derive(Debug, Clone)]
pub struct AssembledSystem {
    pub config: SimulationConfig,
    pub matrices: SystemMatrices,
}
