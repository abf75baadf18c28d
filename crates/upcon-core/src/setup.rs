// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Lattice & Matrix Assembly
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Lattice generation and rate-matrix assembly.
//!
//! Turns a [`SimulationConfig`] into the sparse operators of the rate
//! equations:
//!   1. Place sensitizer and activator ions on a cubic site grid by a
//!      seeded uniform doping draw, one candidate ion per site.
//!   2. Lay out the state vector: all sensitizer states first, then all
//!      activator states, each placed ion owning one contiguous block.
//!   3. Fill `decay` from lifetimes and branching ratios (loss on the
//!      diagonal, branched gains below, remainder to the ground state),
//!      `absorption` from every active excitation, and the upconversion
//!      operator plus its index maps from every energy-transfer process
//!      over all ordered ion pairs within the interaction distance.

use log::{debug, info};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sprs::{CsMat, TriMat};
use upcon_types::config::{BranchingRatio, IonKind, SimulationConfig};
use upcon_types::error::{UpconError, UpconResult};
use upcon_types::system::{AssembledSystem, SystemMatrices};

/// An ion placed on the lattice.
#[derive(Debug, Clone)]
struct PlacedIon {
    kind: IonKind,
    /// Cartesian position in Å.
    pos: [f64; 3],
    /// Global index of the ion's ground state.
    base: usize,
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Every lifetime of both ion types, in seconds. The longest one sizes
/// the relaxation horizon.
pub fn get_lifetimes(config: &SimulationConfig) -> Vec<f64> {
    config
        .decay
        .sensitizer_lifetimes
        .iter()
        .chain(config.decay.activator_lifetimes.iter())
        .copied()
        .collect()
}

fn validate_branching(label: &str, branching: &[BranchingRatio], n_states: usize) -> UpconResult<()> {
    for br in branching {
        if br.from == 0 || br.from >= n_states {
            return Err(UpconError::ConfigError(format!(
                "{label} branching from state {} outside excited range 1..{n_states}",
                br.from
            )));
        }
        if br.to >= br.from {
            return Err(UpconError::ConfigError(format!(
                "{label} branching {} -> {} must go to a lower state",
                br.from, br.to
            )));
        }
        if !(0.0..=1.0).contains(&br.fraction) {
            return Err(UpconError::ConfigError(format!(
                "{label} branching {} -> {} fraction {} outside [0, 1]",
                br.from, br.to, br.fraction
            )));
        }
    }
    for from in 1..n_states {
        let total: f64 = branching
            .iter()
            .filter(|br| br.from == from)
            .map(|br| br.fraction)
            .sum();
        if total > 1.0 + 1e-12 {
            return Err(UpconError::ConfigError(format!(
                "{label} branching fractions from state {from} sum to {total}"
            )));
        }
    }
    Ok(())
}

fn validate_config(config: &SimulationConfig) -> UpconResult<()> {
    let s_states = config.states.sensitizer_states();
    let a_states = config.states.activator_states();
    if s_states == 0 {
        return Err(UpconError::ConfigError(
            "sensitizer state label list is empty".into(),
        ));
    }
    if a_states == 0 {
        return Err(UpconError::ConfigError(
            "activator state label list is empty".into(),
        ));
    }

    let lat = &config.lattice;
    if lat.n_uc == 0 {
        return Err(UpconError::ConfigError("N_uc must be at least 1".into()));
    }
    if lat.cell_par <= 0.0 {
        return Err(UpconError::ConfigError(format!(
            "cell parameter {} must be positive",
            lat.cell_par
        )));
    }
    if lat.d_max <= 0.0 {
        return Err(UpconError::ConfigError(format!(
            "interaction distance {} must be positive",
            lat.d_max
        )));
    }
    if lat.s_conc < 0.0 || lat.a_conc < 0.0 || lat.s_conc + lat.a_conc > 100.0 {
        return Err(UpconError::ConfigError(format!(
            "doping concentrations S={}% A={}% must be non-negative and sum to at most 100%",
            lat.s_conc, lat.a_conc
        )));
    }

    let check_lifetimes = |label: &str, lifetimes: &[f64], n_states: usize| -> UpconResult<()> {
        if lifetimes.len() != n_states - 1 {
            return Err(UpconError::ConfigError(format!(
                "{label} lifetime list has {} entries for {} states",
                lifetimes.len(),
                n_states
            )));
        }
        for (k, tau) in lifetimes.iter().enumerate() {
            if *tau <= 0.0 || !tau.is_finite() {
                return Err(UpconError::ConfigError(format!(
                    "{label} lifetime for state {} is {tau}",
                    k + 1
                )));
            }
        }
        Ok(())
    };
    check_lifetimes("sensitizer", &config.decay.sensitizer_lifetimes, s_states)?;
    check_lifetimes("activator", &config.decay.activator_lifetimes, a_states)?;
    validate_branching("sensitizer", &config.decay.sensitizer_branching, s_states)?;
    validate_branching("activator", &config.decay.activator_branching, a_states)?;

    for exc in &config.excitations {
        let n_states = match exc.ion {
            IonKind::Sensitizer => s_states,
            IonKind::Activator => a_states,
        };
        if exc.init_state >= n_states || exc.final_state >= n_states {
            return Err(UpconError::ConfigError(format!(
                "excitation {} uses states {} -> {} outside 0..{n_states}",
                exc.label, exc.init_state, exc.final_state
            )));
        }
        if exc.init_state == exc.final_state {
            return Err(UpconError::ConfigError(format!(
                "excitation {} starts and ends on state {}",
                exc.label, exc.init_state
            )));
        }
        if exc.pump_rate < 0.0 || exc.power_dens < 0.0 || exc.degeneracy < 0.0 {
            return Err(UpconError::ConfigError(format!(
                "excitation {} has a negative pump rate, power density or degeneracy",
                exc.label
            )));
        }
    }

    for proc in &config.energy_transfer {
        let donor_states = match proc.donor {
            IonKind::Sensitizer => s_states,
            IonKind::Activator => a_states,
        };
        let acceptor_states = match proc.acceptor {
            IonKind::Sensitizer => s_states,
            IonKind::Activator => a_states,
        };
        if proc.donor_initial >= donor_states
            || proc.donor_final >= donor_states
            || proc.acceptor_initial >= acceptor_states
            || proc.acceptor_final >= acceptor_states
        {
            return Err(UpconError::ConfigError(format!(
                "energy-transfer process {} names a state outside its ion's range",
                proc.label
            )));
        }
        if proc.donor_initial == proc.donor_final || proc.acceptor_initial == proc.acceptor_final {
            return Err(UpconError::ConfigError(format!(
                "energy-transfer process {} must change both ions' states",
                proc.label
            )));
        }
        if proc.strength < 0.0 || !proc.strength.is_finite() {
            return Err(UpconError::ConfigError(format!(
                "energy-transfer process {} has strength {}",
                proc.label, proc.strength
            )));
        }
    }
    Ok(())
}

/// Seeded doping draw over the cubic site grid.
fn place_ions(config: &SimulationConfig) -> Vec<(IonKind, [f64; 3])> {
    let lat = &config.lattice;
    let mut rng = StdRng::seed_from_u64(lat.seed);
    let mut placed = Vec::new();
    for i in 0..lat.n_uc {
        for j in 0..lat.n_uc {
            for k in 0..lat.n_uc {
                let draw: f64 = rng.gen_range(0.0..100.0);
                let kind = if draw < lat.s_conc {
                    Some(IonKind::Sensitizer)
                } else if draw < lat.s_conc + lat.a_conc {
                    Some(IonKind::Activator)
                } else {
                    None
                };
                if let Some(kind) = kind {
                    let pos = [
                        i as f64 * lat.cell_par,
                        j as f64 * lat.cell_par,
                        k as f64 * lat.cell_par,
                    ];
                    placed.push((kind, pos));
                }
            }
        }
    }
    placed
}

fn build_decay(config: &SimulationConfig, ions: &[PlacedIon], total: usize) -> CsMat<f64> {
    let mut tri = TriMat::new((total, total));
    for ion in ions {
        let (lifetimes, branching) = match ion.kind {
            IonKind::Sensitizer => (
                &config.decay.sensitizer_lifetimes,
                &config.decay.sensitizer_branching,
            ),
            IonKind::Activator => (
                &config.decay.activator_lifetimes,
                &config.decay.activator_branching,
            ),
        };
        for (k, tau) in lifetimes.iter().enumerate() {
            let state = k + 1;
            let rate = 1.0 / tau;
            tri.add_triplet(ion.base + state, ion.base + state, -rate);
            let mut branched = 0.0;
            for br in branching.iter().filter(|br| br.from == state) {
                tri.add_triplet(ion.base + br.to, ion.base + state, br.fraction * rate);
                branched += br.fraction;
            }
            // Whatever does not branch lands on the ground state.
            let remainder = 1.0 - branched;
            if remainder > 0.0 {
                tri.add_triplet(ion.base, ion.base + state, remainder * rate);
            }
        }
    }
    tri.to_csr()
}

fn build_absorption(config: &SimulationConfig, ions: &[PlacedIon], total: usize) -> CsMat<f64> {
    let mut tri = TriMat::new((total, total));
    for exc in config.active_excitations() {
        let rate = exc.pump_rate * exc.power_dens;
        let back = rate * exc.degeneracy;
        for ion in ions.iter().filter(|ion| ion.kind == exc.ion) {
            let i = ion.base + exc.init_state;
            let f = ion.base + exc.final_state;
            tri.add_triplet(i, i, -rate);
            tri.add_triplet(f, i, rate);
            // Stimulated balance back toward the initial state, weighted
            // by the degeneracy ratio of the two levels.
            tri.add_triplet(f, f, -back);
            tri.add_triplet(i, f, back);
        }
    }
    tri.to_csr()
}

/// One upconversion column per (energy-transfer process, ordered ion
/// pair within range). Columns sum to zero: population only moves.
fn build_transfer(
    config: &SimulationConfig,
    ions: &[PlacedIon],
    total: usize,
) -> (CsMat<f64>, Vec<[usize; 2]>, Vec<[usize; 3]>) {
    let d_max = config.lattice.d_max;
    let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
    let mut n_indices: Vec<[usize; 2]> = Vec::new();
    let mut jac_indices: Vec<[usize; 3]> = Vec::new();

    for (p, donor) in ions.iter().enumerate() {
        for (q, acceptor) in ions.iter().enumerate() {
            if p == q {
                continue;
            }
            let d = distance(donor.pos, acceptor.pos);
            if d > d_max {
                continue;
            }
            for proc in &config.energy_transfer {
                if proc.donor != donor.kind || proc.acceptor != acceptor.kind {
                    continue;
                }
                let w = proc.strength / d.powi(proc.mult as i32);
                let k = n_indices.len();
                let di = donor.base + proc.donor_initial;
                let df = donor.base + proc.donor_final;
                let ai = acceptor.base + proc.acceptor_initial;
                let af = acceptor.base + proc.acceptor_final;
                triplets.push((di, k, -w));
                triplets.push((df, k, w));
                triplets.push((ai, k, -w));
                triplets.push((af, k, w));
                n_indices.push([di, ai]);
                // d(y_di·y_ai)/dy_di = y_ai and symmetrically.
                jac_indices.push([k, di, ai]);
                jac_indices.push([k, ai, di]);
            }
        }
    }

    let mut tri = TriMat::new((total, n_indices.len()));
    for (r, c, v) in triplets {
        tri.add_triplet(r, c, v);
    }
    (tri.to_csr(), n_indices, jac_indices)
}

/// Place ions and assemble every operator the rate equations need.
///
/// Returns the configuration snapshot actually used together with the
/// validated matrices; callers keep mutating their own copy for sweeps.
pub fn precalculate(config: &SimulationConfig) -> UpconResult<AssembledSystem> {
    validate_config(config)?;

    let s_states = config.states.sensitizer_states();
    let a_states = config.states.activator_states();

    let placed = place_ions(config);
    if placed.is_empty() {
        return Err(UpconError::ConfigError(
            "no ions placed; raise the concentrations or enlarge the lattice".into(),
        ));
    }

    let n_s = placed
        .iter()
        .filter(|(kind, _)| *kind == IonKind::Sensitizer)
        .count();
    let n_a = placed.len() - n_s;
    let total = n_s * s_states + n_a * a_states;

    // Sensitizer blocks first, then activator blocks, both in placement
    // order; the index maps record each placed ion's block start.
    let mut ions = Vec::with_capacity(placed.len());
    let mut index_s = Vec::with_capacity(placed.len());
    let mut index_a = Vec::with_capacity(placed.len());
    let mut s_seen = 0usize;
    let mut a_seen = 0usize;
    for (kind, pos) in placed {
        let base = match kind {
            IonKind::Sensitizer => {
                let base = s_seen * s_states;
                s_seen += 1;
                index_s.push(Some(base));
                index_a.push(None);
                base
            }
            IonKind::Activator => {
                let base = n_s * s_states + a_seen * a_states;
                a_seen += 1;
                index_s.push(None);
                index_a.push(Some(base));
                base
            }
        };
        ions.push(PlacedIon { kind, pos, base });
    }

    let mut initial_population = Array1::zeros(total);
    for ion in &ions {
        initial_population[ion.base] = 1.0;
    }

    let decay = build_decay(config, &ions, total);
    let absorption = build_absorption(config, &ions, total);
    let (uc, n_indices, jac_indices) = build_transfer(config, &ions, total);
    debug!(
        "assembled operators: decay nnz {}, absorption nnz {}, uc nnz {}",
        decay.nnz(),
        absorption.nnz(),
        uc.nnz()
    );

    let matrices = SystemMatrices {
        absorption,
        decay,
        uc,
        n_indices,
        jac_indices,
        initial_population,
        index_s,
        index_a,
    };
    matrices.validate()?;

    info!(
        "lattice {}: {} sensitizers + {} activators, {} states, {} interaction pairs",
        config.lattice.name,
        n_s,
        n_a,
        total,
        matrices.n_interactions()
    );
    Ok(AssembledSystem {
        config: config.clone(),
        matrices,
    })
}
