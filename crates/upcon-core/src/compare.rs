//! Comparison of simulated dynamics against measured decay traces.
//!
//! Every step degrades gracefully: a missing, empty or unparseable data
//! file means "no ground truth for this state" and is carried as `None`
//! through the whole pipeline, never as a fake zero signal. The pipeline
//! per curve is background correction on the solver grid, resampling onto
//! the measured time stamps, then a scale-invariant relative error.

use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::{Array1, Array2};
use upcon_math::interp::interp1d_extrap;
use upcon_math::savgol::savgol_filter;
use upcon_types::constants::{BACKGROUND_POINTS, EXP_DATA_COMMENT, SMOOTH_ORDER, SMOOTH_WINDOW};
use upcon_types::error::UpconResult;

use crate::solution::{DynamicsSolution, ExpTrace};

impl DynamicsSolution {
    fn decay_file_path(&self, ion_label: &str, state_label: &str) -> PathBuf {
        let config = self.core.config();
        self.data_root.join(&config.lattice.name).join(format!(
            "decay_{ion_label}_{state_label}_exc_{}.txt",
            config.excitation_tag()
        ))
    }

    /// Measured trace per curve, loaded once from the data directory.
    pub fn experimental(&self) -> UpconResult<&[Option<ExpTrace>]> {
        if let Some(exp) = self.exp.get() {
            return Ok(exp);
        }
        let st = &self.core.config().states;
        let mut traces = Vec::with_capacity(self.core.n_curves());
        for state in &st.sensitizer_states_labels {
            let path = self.decay_file_path(&st.sensitizer_ion_label, state);
            traces.push(load_decay_file(&path)?);
        }
        for state in &st.activator_states_labels {
            let path = self.decay_file_path(&st.activator_ion_label, state);
            traces.push(load_decay_file(&path)?);
        }
        Ok(self.exp.get_or_init(|| traces))
    }

    /// Average curves with the measured background floor added back in.
    ///
    /// The offset per curve is the mean of the positive entries among the
    /// last [`BACKGROUND_POINTS`] measured intensities, scaled by the
    /// simulated peak. Curves without data pass through unchanged, and a
    /// non-finite estimate skips the correction instead of poisoning it.
    pub fn corrected_curves(&self) -> UpconResult<&Array2<f64>> {
        if let Some(corrected) = self.corrected.get() {
            return Ok(corrected);
        }
        let exp = self.experimental()?;
        let avg = self.core.avg_data()?;
        let mut corrected = avg.clone();
        for (k, trace) in exp.iter().enumerate() {
            let Some(trace) = trace else { continue };
            let tail_start = trace.intensity.len().saturating_sub(BACKGROUND_POINTS);
            let tail: Vec<f64> = trace
                .intensity
                .iter()
                .skip(tail_start)
                .copied()
                .filter(|&v| v > 0.0)
                .collect();
            if tail.is_empty() {
                continue;
            }
            let floor = tail.iter().sum::<f64>() / tail.len() as f64;
            let sim_peak = avg.row(k).iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let offset = floor * sim_peak;
            if !offset.is_finite() {
                continue;
            }
            corrected.row_mut(k).mapv_inplace(|v| v + offset);
        }
        Ok(self.corrected.get_or_init(|| corrected))
    }

    /// Corrected curves resampled onto the measured time stamps.
    pub fn interpolated(&self) -> UpconResult<&[Option<Array1<f64>>]> {
        if let Some(interp) = self.interp.get() {
            return Ok(interp);
        }
        let exp = self.experimental()?;
        let corrected = self.corrected_curves()?;
        let sim_t = self.core.t_sol()?.to_vec();
        let mut curves = Vec::with_capacity(exp.len());
        for (k, trace) in exp.iter().enumerate() {
            match trace {
                None => curves.push(None),
                Some(trace) => {
                    let sim_y = corrected.row(k).to_vec();
                    let stamps = trace.t.to_vec();
                    let vals = interp1d_extrap(&stamps, &sim_t, &sim_y)?;
                    curves.push(Some(Array1::from_vec(vals)));
                }
            }
        }
        Ok(self.interp.get_or_init(|| curves))
    }

    /// Relative error per curve against the measured trace.
    ///
    /// `error = (1/mean(sim)) * sqrt(mean((sim - exp*max(sim))^2))` over the
    /// measured stamps, so only the decay shape matters, never the absolute
    /// intensity calibration. Curves without data, or with a degenerate
    /// zero-mean simulation, contribute an exact zero.
    pub fn errors(&self) -> UpconResult<&Array1<f64>> {
        if let Some(errors) = self.errors.get() {
            return Ok(errors);
        }
        let exp = self.experimental()?;
        let interp = self.interpolated()?;
        let mut errors = Array1::zeros(exp.len());
        for k in 0..exp.len() {
            let (Some(trace), Some(sim)) = (&exp[k], &interp[k]) else {
                continue;
            };
            let mean = sim.sum() / sim.len() as f64;
            if mean == 0.0 || !mean.is_finite() {
                continue;
            }
            let peak = sim.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mse = sim
                .iter()
                .zip(trace.intensity.iter())
                .map(|(&s, &e)| {
                    let d = s - e * peak;
                    d * d
                })
                .sum::<f64>()
                / sim.len() as f64;
            errors[k] = mse.sqrt() / mean;
        }
        Ok(self.errors.get_or_init(|| errors))
    }

    /// Root mean square of the nonzero per-curve errors, zero when no curve
    /// could be compared. Curves without data are excluded, not weighted in.
    pub fn total_error(&self) -> UpconResult<f64> {
        if let Some(&total) = self.total_error.get() {
            return Ok(total);
        }
        let errors = self.errors()?;
        let nonzero: Vec<f64> = errors.iter().copied().filter(|&e| e > 0.0).collect();
        let total = if nonzero.is_empty() {
            0.0
        } else {
            (nonzero.iter().map(|e| e * e).sum::<f64>() / nonzero.len() as f64).sqrt()
        };
        Ok(*self.total_error.get_or_init(|| total))
    }

    pub fn log_errors(&self) -> UpconResult<()> {
        let labels = self.core.curve_labels();
        let errors = self.errors()?;
        for (label, &err) in labels.iter().zip(errors.iter()) {
            if err > 0.0 {
                info!("relative error for {label}: {err:.3e}");
            }
        }
        info!("total relative error: {:.3e}", self.total_error()?);
        Ok(())
    }
}

/// Read one two-column decay trace, or `None` when there is no usable data.
///
/// Comment lines start with `#`. Tab-delimited is tried first, then comma.
/// The intensity column is normalized to [0, 1] against the min and max of
/// a smoothed copy, then clamped at zero.
pub(crate) fn load_decay_file(path: &Path) -> UpconResult<Option<ExpTrace>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            warn!("cannot read experimental trace {}: {e}", path.display());
            return Ok(None);
        }
    };
    let rows = match parse_rows(&content, '\t').or_else(|| parse_rows(&content, ',')) {
        Some(rows) if rows.len() >= 2 => rows,
        _ => return Ok(None),
    };
    normalize_trace(path, rows)
}

/// All data rows under one delimiter, or `None` on the first malformed row.
fn parse_rows(content: &str, delimiter: char) -> Option<Vec<(f64, f64)>> {
    let mut rows = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(EXP_DATA_COMMENT) {
            continue;
        }
        let mut fields = line.split(delimiter);
        let t = fields.next()?.trim().parse::<f64>().ok()?;
        let intensity = fields.next()?.trim().parse::<f64>().ok()?;
        rows.push((t, intensity));
    }
    Some(rows)
}

fn normalize_trace(path: &Path, rows: Vec<(f64, f64)>) -> UpconResult<Option<ExpTrace>> {
    let t: Vec<f64> = rows.iter().map(|r| r.0).collect();
    let raw: Vec<f64> = rows.iter().map(|r| r.1).collect();
    let smooth = savgol_filter(&raw, SMOOTH_WINDOW, SMOOTH_ORDER)?;
    let lo = smooth.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = smooth.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = hi - lo;
    if span <= 0.0 || !span.is_finite() {
        warn!(
            "experimental trace {} has no dynamic range, ignoring",
            path.display()
        );
        return Ok(None);
    }
    let intensity: Vec<f64> = raw.iter().map(|&v| ((v - lo) / span).max(0.0)).collect();
    Ok(Some(ExpTrace {
        t: Array1::from_vec(t),
        intensity: Array1::from_vec(intensity),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SolveOutcome;
    use ndarray::array;
    use sprs::TriMat;
    use upcon_types::config::{
        DecayParams, Excitation, IonKind, LatticeParams, SimulationConfig, SimulationParams,
        StatesParams,
    };
    use upcon_types::system::{AssembledSystem, SystemMatrices};

    fn empty_csr(rows: usize, cols: usize) -> sprs::CsMat<f64> {
        TriMat::new((rows, cols)).to_csr()
    }

    /// One sensitizer and one activator ion, two states each.
    fn assembled() -> AssembledSystem {
        let config = SimulationConfig {
            lattice: LatticeParams {
                name: "test".into(),
                s_conc: 50.0,
                a_conc: 50.0,
                n_uc: 1,
                cell_par: 3.0,
                d_max: 10.0,
                seed: 1,
            },
            states: StatesParams {
                sensitizer_ion_label: "Yb".into(),
                activator_ion_label: "Tm".into(),
                sensitizer_states_labels: vec!["GS".into(), "ES".into()],
                activator_states_labels: vec!["3H6".into(), "3H4".into()],
            },
            excitations: vec![Excitation {
                label: "Vis_473".into(),
                active: true,
                t_pulse: Some(1e-8),
                power_dens: 1e6,
                pump_rate: 1e-4,
                degeneracy: 1.0,
                ion: IonKind::Activator,
                init_state: 0,
                final_state: 1,
            }],
            decay: DecayParams {
                sensitizer_lifetimes: vec![1e-3],
                activator_lifetimes: vec![1e-3],
                sensitizer_branching: vec![],
                activator_branching: vec![],
            },
            energy_transfer: vec![],
            simulation_params: SimulationParams::default(),
            no_console: true,
            no_plot: true,
        };
        let matrices = SystemMatrices {
            absorption: empty_csr(4, 4),
            decay: empty_csr(4, 4),
            uc: empty_csr(4, 0),
            n_indices: vec![],
            jac_indices: vec![],
            initial_population: array![1.0, 0.0, 1.0, 0.0],
            index_s: vec![Some(0), None],
            index_a: vec![None, Some(2)],
        };
        AssembledSystem { config, matrices }
    }

    /// Excited-activator average curve is exactly [4, 2, 1].
    fn dynamics_with_curve() -> DynamicsSolution {
        let mut sol = DynamicsSolution::new(&assembled());
        sol.core
            .add_sim_data(
                array![0.0, 1.0, 2.0],
                array![
                    [1.0, 0.0, 0.0, 4.0],
                    [1.0, 0.0, 0.5, 2.0],
                    [1.0, 0.0, 0.75, 1.0],
                ],
                SolveOutcome::Completed,
            )
            .unwrap();
        sol
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("upcon_{tag}_{}_{nanos}", std::process::id()))
    }

    #[test]
    fn test_no_data_is_all_sentinels() {
        let mut sol = dynamics_with_curve();
        sol.data_root = scratch_dir("absent");
        assert!(sol.experimental().unwrap().iter().all(Option::is_none));
        // Background correction and the errors are no-ops without data.
        let corrected = sol.corrected_curves().unwrap();
        let avg = sol.core.avg_data().unwrap();
        assert_eq!(corrected, avg);
        assert!(sol.errors().unwrap().iter().all(|&e| e == 0.0));
        assert_eq!(sol.total_error().unwrap(), 0.0);
    }

    #[test]
    fn test_error_exactly_zero_on_matching_shape() {
        let sol = dynamics_with_curve();
        let sim = array![4.0, 2.0, 1.0];
        // Peak is a power of two, so dividing and re-scaling is exact.
        let measured = &sim / 4.0;
        let mut traces = vec![None; 4];
        traces[3] = Some(ExpTrace {
            t: array![0.0, 1.0, 2.0],
            intensity: measured,
        });
        sol.exp.set(traces).unwrap();
        let mut curves = vec![None; 4];
        curves[3] = Some(sim);
        sol.interp.set(curves).unwrap();

        assert_eq!(sol.errors().unwrap()[3], 0.0);
        assert_eq!(sol.total_error().unwrap(), 0.0);
    }

    #[test]
    fn test_background_offset_added_to_curve_with_data() {
        let sol = dynamics_with_curve();
        let mut traces = vec![None; 4];
        traces[3] = Some(ExpTrace {
            t: array![0.0, 1.0, 2.0],
            intensity: array![0.5, 0.25, 0.25],
        });
        sol.exp.set(traces).unwrap();

        let corrected = sol.corrected_curves().unwrap();
        let avg = sol.core.avg_data().unwrap();
        // offset = mean([0.5, 0.25, 0.25]) * max([4, 2, 1]) = 4/3
        let offset = 4.0 / 3.0;
        for it in 0..3 {
            assert!((corrected[[3, it]] - (avg[[3, it]] + offset)).abs() < 1e-12);
        }
        // Curves without data pass through untouched.
        for c in 0..3 {
            for it in 0..3 {
                assert_eq!(corrected[[c, it]], avg[[c, it]]);
            }
        }
    }

    #[test]
    fn test_interpolation_exact_on_grid_stamps() {
        let sol = dynamics_with_curve();
        let mut traces = vec![None; 4];
        traces[3] = Some(ExpTrace {
            t: array![0.0, 1.0, 2.0],
            intensity: array![1.0, 0.5, 0.25],
        });
        sol.exp.set(traces).unwrap();

        let expected: Vec<f64> = {
            let corrected = sol.corrected_curves().unwrap();
            corrected.row(3).to_vec()
        };
        let interp = sol.interpolated().unwrap();
        let vals = interp[3].as_ref().unwrap();
        for (v, e) in vals.iter().zip(&expected) {
            assert!((v - e).abs() < 1e-12);
        }
        assert!(interp[0].is_none());
    }

    #[test]
    fn test_total_error_skips_zero_entries() {
        let sol = dynamics_with_curve();
        sol.errors.set(array![0.0, 3.0, 4.0, 0.0]).unwrap();
        let total = sol.total_error().unwrap();
        assert!((total - (12.5f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_load_tab_then_comma_fallback() {
        let dir = scratch_dir("load");
        std::fs::create_dir_all(&dir).unwrap();

        let tab = dir.join("tab.txt");
        let mut content = String::from("# time\tintensity\n");
        for i in 0..15 {
            content.push_str(&format!("{}\t{}\n", i as f64 * 1e-4, 12.0 - i as f64));
        }
        std::fs::write(&tab, &content).unwrap();
        let trace = load_decay_file(&tab).unwrap().unwrap();
        assert_eq!(trace.t.len(), 15);
        // Normalized to [0, 1] with negatives clamped away.
        assert!(trace.intensity.iter().all(|&v| v >= 0.0));
        assert!(trace.intensity.iter().cloned().fold(f64::MIN, f64::max) <= 1.5);

        let comma = dir.join("comma.txt");
        std::fs::write(&comma, content.replace('\t', ",")).unwrap();
        let trace2 = load_decay_file(&comma).unwrap().unwrap();
        assert_eq!(trace2.t.len(), 15);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unusable_files_are_no_data() {
        let dir = scratch_dir("unusable");
        std::fs::create_dir_all(&dir).unwrap();

        assert!(load_decay_file(&dir.join("missing.txt")).unwrap().is_none());

        let garbage = dir.join("garbage.txt");
        std::fs::write(&garbage, "not a number\nstill not\n").unwrap();
        assert!(load_decay_file(&garbage).unwrap().is_none());

        let empty = dir.join("empty.txt");
        std::fs::write(&empty, "# only comments\n\n").unwrap();
        assert!(load_decay_file(&empty).unwrap().is_none());

        let flat = dir.join("flat.txt");
        let rows: String = (0..20).map(|i| format!("{}\t5.0\n", i)).collect();
        std::fs::write(&flat, rows).unwrap();
        assert!(load_decay_file(&flat).unwrap().is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
