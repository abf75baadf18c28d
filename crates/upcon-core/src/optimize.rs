// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Strength Fitting
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Derivative-free fitting of energy-transfer strengths.
//!
//! The objective is the total comparison error of a dynamics run against
//! the experimental decay traces. Both methods walk the strength space in
//! log units, since transfer strengths span many decades.

use log::{debug, info};
use upcon_types::error::{UpconError, UpconResult};

use crate::simulations::Simulator;

/// Fraction of each parameter's log-space range used as the initial
/// compass step.
const INITIAL_STEP_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeMethod {
    BruteForce,
    PatternSearch,
}

impl OptimizeMethod {
    /// Parse a method name, case-insensitively.
    pub fn parse(name: &str) -> UpconResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "brute_force" | "brute-force" | "bruteforce" => Ok(OptimizeMethod::BruteForce),
            "pattern_search" | "pattern-search" | "patternsearch" => {
                Ok(OptimizeMethod::PatternSearch)
            }
            _ => Err(UpconError::UnsupportedMethod(name.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    pub method: OptimizeMethod,
    /// Grid points per parameter for the brute-force scan.
    pub grid_points: usize,
    /// Objective evaluation budget.
    pub max_evaluations: usize,
    /// Pattern search stops once every compass step is below this many
    /// decades.
    pub step_tolerance: f64,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            method: OptimizeMethod::PatternSearch,
            grid_points: 5,
            max_evaluations: 200,
            step_tolerance: 1e-2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizeResult {
    pub best_params: Vec<f64>,
    pub best_error: f64,
    pub evaluations: usize,
}

/// Minimize the dynamics comparison error over the named transfer
/// strengths, each constrained to its `(lower, upper)` bounds.
///
/// Console and plot flags are suppressed for the duration of the fit and
/// restored on every exit path. The live configuration keeps the last
/// strengths the fit evaluated.
pub fn optimize_strengths(
    simulator: &mut Simulator,
    processes: &[String],
    bounds: &[(f64, f64)],
    options: &OptimizeOptions,
) -> UpconResult<OptimizeResult> {
    validate(simulator, processes, bounds)?;

    info!(
        "fitting {} energy-transfer strengths with {:?}",
        processes.len(),
        options.method
    );
    let saved = (simulator.config.no_console, simulator.config.no_plot);
    simulator.config.no_console = true;
    simulator.config.no_plot = true;
    let result = match options.method {
        OptimizeMethod::BruteForce => brute_force(simulator, processes, bounds, options),
        OptimizeMethod::PatternSearch => pattern_search(simulator, processes, bounds, options),
    };
    simulator.config.no_console = saved.0;
    simulator.config.no_plot = saved.1;

    let result = result?;
    info!(
        "best error {:.4e} after {} evaluations",
        result.best_error, result.evaluations
    );
    Ok(result)
}

fn validate(
    simulator: &Simulator,
    processes: &[String],
    bounds: &[(f64, f64)],
) -> UpconResult<()> {
    if processes.is_empty() {
        return Err(UpconError::ConfigError(
            "no energy-transfer processes to fit".into(),
        ));
    }
    if processes.len() != bounds.len() {
        return Err(UpconError::ShapeMismatch(format!(
            "{} processes but {} bounds",
            processes.len(),
            bounds.len()
        )));
    }
    for (label, &(lo, hi)) in processes.iter().zip(bounds) {
        if simulator
            .config
            .energy_transfer
            .iter()
            .all(|p| p.label != *label)
        {
            return Err(UpconError::ConfigError(format!(
                "unknown energy-transfer process: {label}"
            )));
        }
        if lo <= 0.0 || hi <= lo {
            return Err(UpconError::ConfigError(format!(
                "bounds for {label} must satisfy 0 < {lo} < {hi}"
            )));
        }
    }
    Ok(())
}

/// One objective evaluation: apply the strengths, rerun the dynamics,
/// read the total comparison error.
fn objective(
    simulator: &mut Simulator,
    processes: &[String],
    params: &[f64],
) -> UpconResult<f64> {
    for (label, &value) in processes.iter().zip(params) {
        simulator.update_energy_transfer_strength(label, value)?;
    }
    let solution = simulator.simulate_dynamics()?;
    solution.total_error()
}

fn brute_force(
    simulator: &mut Simulator,
    processes: &[String],
    bounds: &[(f64, f64)],
    options: &OptimizeOptions,
) -> UpconResult<OptimizeResult> {
    let points = options.grid_points.max(2);
    let axes: Vec<Vec<f64>> = bounds
        .iter()
        .map(|&(lo, hi)| log_axis(lo, hi, points))
        .collect();
    let total: usize = axes.iter().map(Vec::len).product();

    let mut best_params = Vec::new();
    let mut best_error = f64::INFINITY;
    let mut evaluations = 0;
    for flat in 0..total {
        if evaluations >= options.max_evaluations {
            break;
        }
        let mut rem = flat;
        let params: Vec<f64> = axes
            .iter()
            .map(|axis| {
                let i = rem % axis.len();
                rem /= axis.len();
                axis[i]
            })
            .collect();
        let error = objective(simulator, processes, &params)?;
        evaluations += 1;
        debug!("grid point {flat} of {total}: error {error:.4e}");
        if error < best_error {
            best_error = error;
            best_params = params;
        }
    }
    Ok(OptimizeResult {
        best_params,
        best_error,
        evaluations,
    })
}

fn pattern_search(
    simulator: &mut Simulator,
    processes: &[String],
    bounds: &[(f64, f64)],
    options: &OptimizeOptions,
) -> UpconResult<OptimizeResult> {
    let lo_log: Vec<f64> = bounds.iter().map(|b| b.0.log10()).collect();
    let hi_log: Vec<f64> = bounds.iter().map(|b| b.1.log10()).collect();

    // Start from the configured strengths, clamped into bounds.
    let mut x: Vec<f64> = processes
        .iter()
        .enumerate()
        .map(|(d, label)| {
            let current = simulator
                .config
                .energy_transfer
                .iter()
                .find(|p| p.label == *label)
                .map_or(bounds[d].0, |p| p.strength);
            current.clamp(bounds[d].0, bounds[d].1).log10()
        })
        .collect();
    let mut steps: Vec<f64> = lo_log
        .iter()
        .zip(&hi_log)
        .map(|(lo, hi)| (hi - lo) * INITIAL_STEP_FRACTION)
        .collect();

    let linear = |logs: &[f64]| logs.iter().map(|v| 10f64.powf(*v)).collect::<Vec<f64>>();

    let mut best_params = linear(&x);
    let mut best_error = objective(simulator, processes, &best_params)?;
    let mut evaluations = 1;

    'outer: while evaluations < options.max_evaluations
        && steps.iter().any(|&s| s > options.step_tolerance)
    {
        let mut improved = false;
        for d in 0..x.len() {
            for dir in [1.0, -1.0] {
                if evaluations >= options.max_evaluations {
                    break 'outer;
                }
                let moved = (x[d] + dir * steps[d]).clamp(lo_log[d], hi_log[d]);
                if moved == x[d] {
                    continue;
                }
                let mut candidate = x.clone();
                candidate[d] = moved;
                let params = linear(&candidate);
                let error = objective(simulator, processes, &params)?;
                evaluations += 1;
                debug!("compass move along dim {d}: error {error:.4e}");
                if error < best_error {
                    best_error = error;
                    best_params = params;
                    x = candidate;
                    improved = true;
                    // Take the move and keep sweeping the other dims.
                    break;
                }
            }
        }
        if !improved {
            for s in &mut steps {
                *s *= 0.5;
            }
        }
    }

    Ok(OptimizeResult {
        best_params,
        best_error,
        evaluations,
    })
}

/// Logarithmically spaced scan axis between two positive bounds.
fn log_axis(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    let (llo, lhi) = (lo.log10(), hi.log10());
    (0..n)
        .map(|i| 10f64.powf(llo + (lhi - llo) * i as f64 / (n - 1) as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use upcon_types::config::{
        DecayParams, EnergyTransferProcess, Excitation, IonKind, LatticeParams, SimulationConfig,
        SimulationParams, StatesParams,
    };

    fn fit_config() -> SimulationConfig {
        SimulationConfig {
            lattice: LatticeParams {
                name: "fit".into(),
                s_conc: 0.0,
                a_conc: 100.0,
                n_uc: 1,
                cell_par: 5.0,
                d_max: 1.0,
                seed: 7,
            },
            states: StatesParams {
                sensitizer_ion_label: "Yb".into(),
                activator_ion_label: "Tm".into(),
                sensitizer_states_labels: vec!["GS".into()],
                activator_states_labels: vec!["3H6".into(), "3H4".into()],
            },
            excitations: vec![Excitation {
                label: "Vis_473".into(),
                active: true,
                t_pulse: Some(1e-8),
                power_dens: 1e6,
                pump_rate: 1e-2,
                degeneracy: 1.0,
                ion: IonKind::Activator,
                init_state: 0,
                final_state: 1,
            }],
            decay: DecayParams {
                sensitizer_lifetimes: vec![],
                activator_lifetimes: vec![1e-2],
                sensitizer_branching: vec![],
                activator_branching: vec![],
            },
            energy_transfer: vec![EnergyTransferProcess {
                label: "ETU".into(),
                donor: IonKind::Activator,
                donor_initial: 1,
                donor_final: 0,
                acceptor: IonKind::Activator,
                acceptor_initial: 0,
                acceptor_final: 1,
                strength: 1e3,
                mult: 6,
            }],
            simulation_params: SimulationParams::default(),
            no_console: true,
            no_plot: true,
        }
    }

    fn processes() -> Vec<String> {
        vec!["ETU".into()]
    }

    #[test]
    fn test_parse_method_names() {
        assert_eq!(
            OptimizeMethod::parse("Brute_Force").unwrap(),
            OptimizeMethod::BruteForce
        );
        assert_eq!(
            OptimizeMethod::parse("  pattern-search ").unwrap(),
            OptimizeMethod::PatternSearch
        );
        match OptimizeMethod::parse("simplex") {
            Err(UpconError::UnsupportedMethod(name)) => assert_eq!(name, "simplex"),
            other => panic!("expected UnsupportedMethod, got {other:?}"),
        }
    }

    #[test]
    fn test_bounds_validation() {
        let mut sim = Simulator::new(fit_config());
        let opts = OptimizeOptions::default();

        let err = optimize_strengths(&mut sim, &processes(), &[], &opts);
        assert!(matches!(err, Err(UpconError::ShapeMismatch(_))));

        let err = optimize_strengths(&mut sim, &processes(), &[(0.0, 1e6)], &opts);
        assert!(matches!(err, Err(UpconError::ConfigError(_))));

        let unknown = vec!["no-such-process".to_string()];
        let err = optimize_strengths(&mut sim, &unknown, &[(1.0, 1e6)], &opts);
        assert!(matches!(err, Err(UpconError::ConfigError(_))));
    }

    #[test]
    fn test_brute_force_scans_the_grid() {
        let mut sim = Simulator::new(fit_config());
        let opts = OptimizeOptions {
            method: OptimizeMethod::BruteForce,
            grid_points: 3,
            max_evaluations: 100,
            ..OptimizeOptions::default()
        };
        let result = optimize_strengths(&mut sim, &processes(), &[(1.0, 1e4)], &opts).unwrap();
        assert_eq!(result.evaluations, 3);
        assert_eq!(result.best_params.len(), 1);
        // Without experimental data every error is zero, so the first grid
        // point wins.
        assert_eq!(result.best_error, 0.0);
        assert!((result.best_params[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_search_respects_budget() {
        let mut sim = Simulator::new(fit_config());
        let opts = OptimizeOptions {
            method: OptimizeMethod::PatternSearch,
            max_evaluations: 5,
            ..OptimizeOptions::default()
        };
        let result = optimize_strengths(&mut sim, &processes(), &[(1.0, 1e4)], &opts).unwrap();
        assert!(result.evaluations >= 1);
        assert!(result.evaluations <= 5);
        assert!(result.best_params[0] >= 1.0);
        assert!(result.best_params[0] <= 1e4);
    }

    #[test]
    fn test_flags_restored_after_fit() {
        let mut config = fit_config();
        config.no_console = false;
        config.no_plot = false;
        let mut sim = Simulator::new(config);
        let opts = OptimizeOptions {
            method: OptimizeMethod::BruteForce,
            grid_points: 2,
            max_evaluations: 2,
            ..OptimizeOptions::default()
        };
        optimize_strengths(&mut sim, &processes(), &[(1.0, 1e4)], &opts).unwrap();
        assert!(!sim.config.no_console);
        assert!(!sim.config.no_plot);
    }
}
