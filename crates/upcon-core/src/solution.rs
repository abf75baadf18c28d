// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Solution Data Model
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Solution data model for completed simulations.
//!
//! A solution is created empty, filled exactly once with the sampled
//! trajectory, and read-mostly afterwards. Every derived quantity
//! (average curves, steady-state populations, comparison errors) is an
//! explicit `OnceCell` memo: computed on first access, bit-identical on
//! every later access, never invalidated. Each solution keeps its own
//! deep configuration snapshot taken at matrix-build time, so sweeps
//! mutating the live configuration never corrupt stored results.
//!
//! Persistence is an NPZ archive holding the trajectory, the snapshot as
//! JSON bytes, the index maps (−1 encoding `None` on disk only) and every
//! *filled* cache, so a round trip reproduces caches exactly.

use std::cell::OnceCell;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use ndarray::{Array1, Array2};
use ndarray_npy::{NpzReader, NpzWriter};
use upcon_types::config::SimulationConfig;
use upcon_types::error::{UpconError, UpconResult};
use upcon_types::system::AssembledSystem;

use crate::driver::SolveOutcome;

/// One measured decay trace, time stamps plus normalized intensity.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpTrace {
    pub t: Array1<f64>,
    pub intensity: Array1<f64>,
}

/// Fields shared by every solution variant.
#[derive(Debug, Clone)]
pub struct SolutionCore {
    config: SimulationConfig,
    index_s: Vec<Option<usize>>,
    index_a: Vec<Option<usize>>,
    t_sol: Option<Array1<f64>>,
    y_sol: Option<Array2<f64>>,
    outcome: SolveOutcome,
    avg: OnceCell<Array2<f64>>,
}

impl SolutionCore {
    pub fn new(assembled: &AssembledSystem) -> Self {
        Self {
            config: assembled.config.clone(),
            index_s: assembled.matrices.index_s.clone(),
            index_a: assembled.matrices.index_a.clone(),
            t_sol: None,
            y_sol: None,
            outcome: SolveOutcome::Completed,
            avg: OnceCell::new(),
        }
    }

    /// Store the sampled trajectory. A solution is filled exactly once.
    pub fn add_sim_data(
        &mut self,
        t: Array1<f64>,
        y: Array2<f64>,
        outcome: SolveOutcome,
    ) -> UpconResult<()> {
        if self.t_sol.is_some() {
            return Err(UpconError::DataFormat(
                "solution already holds simulation data".into(),
            ));
        }
        if t.is_empty() {
            return Err(UpconError::ShapeMismatch("time grid is empty".into()));
        }
        if t.len() != y.nrows() {
            return Err(UpconError::ShapeMismatch(format!(
                "time grid has {} points, trajectory has {} rows",
                t.len(),
                y.nrows()
            )));
        }
        self.t_sol = Some(t);
        self.y_sol = Some(y);
        self.outcome = outcome;
        Ok(())
    }

    pub fn t_sol(&self) -> UpconResult<&Array1<f64>> {
        self.t_sol
            .as_ref()
            .ok_or_else(|| UpconError::DataFormat("solution holds no simulation data".into()))
    }

    pub fn y_sol(&self) -> UpconResult<&Array2<f64>> {
        self.y_sol
            .as_ref()
            .ok_or_else(|| UpconError::DataFormat("solution holds no simulation data".into()))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn outcome(&self) -> SolveOutcome {
        self.outcome
    }

    pub fn index_s(&self) -> &[Option<usize>] {
        &self.index_s
    }

    pub fn index_a(&self) -> &[Option<usize>] {
        &self.index_a
    }

    /// Number of average curves: one per (ion type, state).
    pub fn n_curves(&self) -> usize {
        self.config.states.sensitizer_states() + self.config.states.activator_states()
    }

    /// Curve labels in storage order, `<IonLabel>(<state label>)`,
    /// sensitizer states first.
    pub fn curve_labels(&self) -> Vec<String> {
        let st = &self.config.states;
        st.sensitizer_states_labels
            .iter()
            .map(|s| format!("{}({})", st.sensitizer_ion_label, s))
            .chain(
                st.activator_states_labels
                    .iter()
                    .map(|s| format!("{}({})", st.activator_ion_label, s)),
            )
            .collect()
    }

    /// Per-state population curves averaged over every ion of the type,
    /// one row per curve. A type with no ions contributes zero curves of
    /// the right length.
    pub fn avg_data(&self) -> UpconResult<&Array2<f64>> {
        if let Some(avg) = self.avg.get() {
            return Ok(avg);
        }
        let avg = self.compute_avg()?;
        Ok(self.avg.get_or_init(|| avg))
    }

    fn compute_avg(&self) -> UpconResult<Array2<f64>> {
        let y = self.y_sol()?;
        let s_states = self.config.states.sensitizer_states();
        let a_states = self.config.states.activator_states();
        let n_times = y.nrows();
        let mut avg = Array2::zeros((s_states + a_states, n_times));

        let mut fill = |bases: &[usize], n_states: usize, row_off: usize| {
            if bases.is_empty() {
                return;
            }
            let inv = 1.0 / bases.len() as f64;
            for state in 0..n_states {
                for it in 0..n_times {
                    let sum: f64 = bases.iter().map(|b| y[[it, b + state]]).sum();
                    avg[[row_off + state, it]] = sum * inv;
                }
            }
        };
        let s_bases: Vec<usize> = self.index_s.iter().flatten().copied().collect();
        let a_bases: Vec<usize> = self.index_a.iter().flatten().copied().collect();
        fill(&s_bases, s_states, 0);
        fill(&a_bases, a_states, s_states);
        Ok(avg)
    }

    /// Plain-text export: comment header, then tab-separated `t` plus one
    /// column per average curve.
    pub fn save_txt(&self, path: &str) -> UpconResult<()> {
        let t = self.t_sol()?;
        let avg = self.avg_data()?;
        let labels = self.curve_labels();

        let mut file = File::create(path)?;
        writeln!(file, "# lattice: {}", self.config.lattice.name)?;
        writeln!(file, "# t\t{}", labels.join("\t"))?;
        for (it, &ti) in t.iter().enumerate() {
            write!(file, "{ti:.8e}")?;
            for c in 0..avg.nrows() {
                write!(file, "\t{:.8e}", avg[[c, it]])?;
            }
            writeln!(file)?;
        }
        Ok(())
    }

    fn write_npz(&self, npz: &mut NpzWriter<File>) -> UpconResult<()> {
        let config_json = serde_json::to_vec(&self.config)?;
        add(npz, "config", &Array1::from_vec(config_json))?;
        add_f(npz, "t_sol", self.t_sol()?)?;
        add2(npz, "y_sol", self.y_sol()?)?;
        add_i(npz, "index_s", &encode_index(&self.index_s))?;
        add_i(npz, "index_a", &encode_index(&self.index_a))?;
        let outcome = match self.outcome {
            SolveOutcome::Completed => vec![0.0, 0.0, 0.0],
            SolveOutcome::Degraded { at_step, t_stop } => vec![1.0, at_step as f64, t_stop],
        };
        add_f(npz, "outcome", &Array1::from_vec(outcome))?;
        if let Some(avg) = self.avg.get() {
            add2(npz, "avg_data", avg)?;
        }
        Ok(())
    }

    fn read_npz(npz: &mut NpzReader<File>) -> UpconResult<Self> {
        let config_bytes = read_u8(npz, "config")?;
        let config: SimulationConfig = serde_json::from_slice(&config_bytes.to_vec())?;
        let t_sol = read_f1(npz, "t_sol")?;
        let y_sol = read_f2(npz, "y_sol")?;
        let index_s = decode_index(&read_i1(npz, "index_s")?);
        let index_a = decode_index(&read_i1(npz, "index_a")?);
        let outcome_enc = read_f1(npz, "outcome")?;
        if outcome_enc.len() != 3 {
            return Err(UpconError::DataFormat(
                "outcome entry must hold three values".into(),
            ));
        }
        let outcome = if outcome_enc[0] == 0.0 {
            SolveOutcome::Completed
        } else {
            SolveOutcome::Degraded {
                at_step: outcome_enc[1] as usize,
                t_stop: outcome_enc[2],
            }
        };
        let avg = OnceCell::new();
        if let Some(cached) = try_f2(npz, "avg_data") {
            let _ = avg.set(cached);
        }
        Ok(Self {
            config,
            index_s,
            index_a,
            t_sol: Some(t_sol),
            y_sol: Some(y_sol),
            outcome,
            avg,
        })
    }
}

/// Long-time limiting populations under continuous excitation.
#[derive(Debug, Clone)]
pub struct SteadyStateSolution {
    pub core: SolutionCore,
    steady: OnceCell<Array1<f64>>,
}

impl SteadyStateSolution {
    pub fn new(assembled: &AssembledSystem) -> Self {
        Self {
            core: SolutionCore::new(assembled),
            steady: OnceCell::new(),
        }
    }

    /// Final entry of each average curve.
    pub fn steady_state_populations(&self) -> UpconResult<&Array1<f64>> {
        if let Some(v) = self.steady.get() {
            return Ok(v);
        }
        let avg = self.core.avg_data()?;
        let last = avg.ncols() - 1;
        let vals = Array1::from_iter(avg.outer_iter().map(|row| row[last]));
        Ok(self.steady.get_or_init(|| vals))
    }

    pub fn save_npz(&self, path: &str) -> UpconResult<()> {
        let mut npz = NpzWriter::new(File::create(path)?);
        add_i(&mut npz, "kind", &Array1::from_vec(vec![0i64]))?;
        self.core.write_npz(&mut npz)?;
        if let Some(s) = self.steady.get() {
            add_f(&mut npz, "steady_state", s)?;
        }
        npz.finish()
            .map_err(|e| UpconError::DataFormat(format!("failed to finish archive: {e}")))?;
        Ok(())
    }

    fn read_npz(npz: &mut NpzReader<File>) -> UpconResult<Self> {
        let core = SolutionCore::read_npz(npz)?;
        let steady = OnceCell::new();
        if let Some(cached) = try_f1(npz, "steady_state") {
            let _ = steady.set(cached);
        }
        Ok(Self { core, steady })
    }
}

/// Two-phase pulse-and-relaxation run, comparable to measured decay.
#[derive(Debug, Clone)]
pub struct DynamicsSolution {
    pub core: SolutionCore,
    /// Directory searched for experimental decay files.
    pub data_root: PathBuf,
    pub(crate) exp: OnceCell<Vec<Option<ExpTrace>>>,
    pub(crate) corrected: OnceCell<Array2<f64>>,
    pub(crate) interp: OnceCell<Vec<Option<Array1<f64>>>>,
    pub(crate) errors: OnceCell<Array1<f64>>,
    pub(crate) total_error: OnceCell<f64>,
}

impl DynamicsSolution {
    pub fn new(assembled: &AssembledSystem) -> Self {
        Self {
            core: SolutionCore::new(assembled),
            data_root: PathBuf::from("expData"),
            exp: OnceCell::new(),
            corrected: OnceCell::new(),
            interp: OnceCell::new(),
            errors: OnceCell::new(),
            total_error: OnceCell::new(),
        }
    }

    pub fn save_npz(&self, path: &str) -> UpconResult<()> {
        let mut npz = NpzWriter::new(File::create(path)?);
        add_i(&mut npz, "kind", &Array1::from_vec(vec![1i64]))?;
        self.core.write_npz(&mut npz)?;
        if let Some(exp) = self.exp.get() {
            add_i(&mut npz, "exp_filled", &Array1::from_vec(vec![1i64]))?;
            for (k, trace) in exp.iter().enumerate() {
                if let Some(trace) = trace {
                    add_f(&mut npz, &format!("exp_t_{k}"), &trace.t)?;
                    add_f(&mut npz, &format!("exp_i_{k}"), &trace.intensity)?;
                }
            }
        }
        if let Some(corr) = self.corrected.get() {
            add2(&mut npz, "corrected", corr)?;
        }
        if let Some(interp) = self.interp.get() {
            add_i(&mut npz, "interp_filled", &Array1::from_vec(vec![1i64]))?;
            for (k, curve) in interp.iter().enumerate() {
                if let Some(curve) = curve {
                    add_f(&mut npz, &format!("interp_{k}"), curve)?;
                }
            }
        }
        if let Some(errors) = self.errors.get() {
            add_f(&mut npz, "errors", errors)?;
        }
        if let Some(total) = self.total_error.get() {
            add_f(&mut npz, "total_error", &Array1::from_vec(vec![*total]))?;
        }
        npz.finish()
            .map_err(|e| UpconError::DataFormat(format!("failed to finish archive: {e}")))?;
        Ok(())
    }

    fn read_npz(npz: &mut NpzReader<File>) -> UpconResult<Self> {
        let core = SolutionCore::read_npz(npz)?;
        let n_curves = core.n_curves();

        let exp = OnceCell::new();
        if try_i1(npz, "exp_filled").is_some() {
            let mut traces = Vec::with_capacity(n_curves);
            for k in 0..n_curves {
                let t = try_f1(npz, &format!("exp_t_{k}"));
                let i = try_f1(npz, &format!("exp_i_{k}"));
                traces.push(match (t, i) {
                    (Some(t), Some(intensity)) => Some(ExpTrace { t, intensity }),
                    _ => None,
                });
            }
            let _ = exp.set(traces);
        }

        let corrected = OnceCell::new();
        if let Some(c) = try_f2(npz, "corrected") {
            let _ = corrected.set(c);
        }

        let interp = OnceCell::new();
        if try_i1(npz, "interp_filled").is_some() {
            let curves = (0..n_curves)
                .map(|k| try_f1(npz, &format!("interp_{k}")))
                .collect();
            let _ = interp.set(curves);
        }

        let errors = OnceCell::new();
        if let Some(e) = try_f1(npz, "errors") {
            let _ = errors.set(e);
        }

        let total_error = OnceCell::new();
        if let Some(t) = try_f1(npz, "total_error") {
            if let Some(&v) = t.first() {
                let _ = total_error.set(v);
            }
        }

        Ok(Self {
            core,
            data_root: PathBuf::from("expData"),
            exp,
            corrected,
            interp,
            errors,
            total_error,
        })
    }
}

/// Tagged variant dispatching persistence over the two solution kinds.
#[derive(Debug, Clone)]
pub enum Solution {
    SteadyState(SteadyStateSolution),
    Dynamics(DynamicsSolution),
}

impl Solution {
    pub fn load_npz(path: &str) -> UpconResult<Solution> {
        let file = File::open(path)?;
        let mut npz = NpzReader::new(file)
            .map_err(|e| UpconError::DataFormat(format!("failed to open archive '{path}': {e}")))?;
        let kind = read_i1(&mut npz, "kind")?;
        match kind.first() {
            Some(0) => Ok(Solution::SteadyState(SteadyStateSolution::read_npz(
                &mut npz,
            )?)),
            Some(1) => Ok(Solution::Dynamics(DynamicsSolution::read_npz(&mut npz)?)),
            other => Err(UpconError::DataFormat(format!(
                "unknown solution kind tag {other:?}"
            ))),
        }
    }

    pub fn save_npz(&self, path: &str) -> UpconResult<()> {
        match self {
            Solution::SteadyState(s) => s.save_npz(path),
            Solution::Dynamics(d) => d.save_npz(path),
        }
    }

    pub fn core(&self) -> &SolutionCore {
        match self {
            Solution::SteadyState(s) => &s.core,
            Solution::Dynamics(d) => &d.core,
        }
    }
}

// ── NPZ helpers ──────────────────────────────────────────────────────

fn npz_write_err(key: &str, e: impl std::fmt::Display) -> UpconError {
    UpconError::DataFormat(format!("failed to write {key}: {e}"))
}

fn add(npz: &mut NpzWriter<File>, key: &str, arr: &Array1<u8>) -> UpconResult<()> {
    npz.add_array(key, arr).map_err(|e| npz_write_err(key, e))
}

fn add_f(npz: &mut NpzWriter<File>, key: &str, arr: &Array1<f64>) -> UpconResult<()> {
    npz.add_array(key, arr).map_err(|e| npz_write_err(key, e))
}

fn add2(npz: &mut NpzWriter<File>, key: &str, arr: &Array2<f64>) -> UpconResult<()> {
    npz.add_array(key, arr).map_err(|e| npz_write_err(key, e))
}

fn add_i(npz: &mut NpzWriter<File>, key: &str, arr: &Array1<i64>) -> UpconResult<()> {
    npz.add_array(key, arr).map_err(|e| npz_write_err(key, e))
}

fn read_f1(npz: &mut NpzReader<File>, key: &str) -> UpconResult<Array1<f64>> {
    npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix1>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix1>(key))
        .map_err(|e| UpconError::DataFormat(format!("failed to read {key} from archive: {e}")))
}

fn read_f2(npz: &mut NpzReader<File>, key: &str) -> UpconResult<Array2<f64>> {
    npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix2>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<f64>, ndarray::Ix2>(key))
        .map_err(|e| UpconError::DataFormat(format!("failed to read {key} from archive: {e}")))
}

fn read_i1(npz: &mut NpzReader<File>, key: &str) -> UpconResult<Array1<i64>> {
    npz.by_name::<ndarray::OwnedRepr<i64>, ndarray::Ix1>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<i64>, ndarray::Ix1>(key))
        .map_err(|e| UpconError::DataFormat(format!("failed to read {key} from archive: {e}")))
}

fn read_u8(npz: &mut NpzReader<File>, key: &str) -> UpconResult<Array1<u8>> {
    npz.by_name::<ndarray::OwnedRepr<u8>, ndarray::Ix1>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<ndarray::OwnedRepr<u8>, ndarray::Ix1>(key))
        .map_err(|e| UpconError::DataFormat(format!("failed to read {key} from archive: {e}")))
}

fn try_f1(npz: &mut NpzReader<File>, key: &str) -> Option<Array1<f64>> {
    read_f1(npz, key).ok()
}

fn try_f2(npz: &mut NpzReader<File>, key: &str) -> Option<Array2<f64>> {
    read_f2(npz, key).ok()
}

fn try_i1(npz: &mut NpzReader<File>, key: &str) -> Option<Array1<i64>> {
    read_i1(npz, key).ok()
}

fn encode_index(index: &[Option<usize>]) -> Array1<i64> {
    Array1::from_iter(index.iter().map(|o| o.map_or(-1, |v| v as i64)))
}

fn decode_index(arr: &Array1<i64>) -> Vec<Option<usize>> {
    arr.iter()
        .map(|&v| if v < 0 { None } else { Some(v as usize) })
        .collect()
}
