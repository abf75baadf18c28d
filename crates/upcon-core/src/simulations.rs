// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Simulation Orchestrator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Simulation orchestrator: dynamics, steady state, and parameter sweeps.
//!
//! The two-phase dynamics protocol integrates a short driven pulse on a
//! linear grid with the explicit stepper, then free relaxation on a log
//! grid with the implicit one, chaining the pulse's final state. The
//! relaxation horizon is ten times the slowest configured lifetime, so a
//! run always covers the full multi-decade decay.

use std::time::Instant;

use log::{error, info, warn};
use ndarray::{Array1, Array2};
use upcon_math::interp::gradient;
use upcon_math::odeint::OdeOptions;
use upcon_types::config::{SimulationConfig, SimulationParams};
use upcon_types::constants::{HORIZON_DECIMALS, LIFETIME_HORIZON_FACTOR};
use upcon_types::error::{UpconError, UpconResult};

use crate::driver::{progress_bar, solve_ode, OdeMethod, SolveOutcome};
use crate::rates::{PulsePhase, RelaxationPhase};
use crate::setup;
use crate::solution::{DynamicsSolution, SteadyStateSolution};

/// Owns the live configuration and runs every simulation flavour on it.
///
/// Sweep operations mutate the configuration in place between points;
/// every returned solution carries its own snapshot taken when the
/// matrices were assembled, so stored results never change retroactively.
#[derive(Debug, Clone)]
pub struct Simulator {
    pub config: SimulationConfig,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn from_file(path: &str) -> UpconResult<Self> {
        Ok(Self::new(SimulationConfig::from_file(path)?))
    }

    /// Mutation hook for external fitting: set one process strength.
    pub fn update_energy_transfer_strength(&mut self, label: &str, value: f64) -> UpconResult<()> {
        self.config.set_energy_transfer_strength(label, value)
    }

    /// Pulse phase then free relaxation. The stored solution covers the
    /// relaxation grid, starting from the pulse's final state.
    pub fn simulate_dynamics(&mut self) -> UpconResult<DynamicsSolution> {
        let start = Instant::now();
        info!("starting dynamics simulation...");

        let assembled = setup::precalculate(&self.config)?;
        let params = assembled.config.simulation_params.clone();
        let quiet = assembled.config.no_console;

        let t_pulse = match assembled.config.pulse_width() {
            Ok(width) => width,
            Err(e) => {
                error!("t_pulse value not found!");
                error!("add t_pulse to the active excitation settings");
                return Err(e);
            }
        };
        let tf = relaxation_horizon(&assembled.config)?;
        let options = ode_options(&params);

        info!("solving excitation pulse...");
        let pulse_grid = linear_grid(0.0, t_pulse, params.n_steps_pulse);
        let pulse_system = PulsePhase::new(&assembled.matrices);
        let initial = assembled.matrices.initial_population.to_vec();
        let pulse_sol = solve_ode(
            &pulse_system,
            &initial,
            &pulse_grid,
            options.clone(),
            OdeMethod::Explicit,
            quiet,
        )?;
        let chained = pulse_sol.y.row(pulse_grid.len() - 1).to_vec();

        info!("solving relaxation...");
        let relax_grid = log_grid(t_pulse, tf, params.n_steps);
        let relax_system = RelaxationPhase::new(&assembled.matrices);
        let relax_sol = solve_ode(
            &relax_system,
            &chained,
            &relax_grid,
            options,
            OdeMethod::Stiff,
            quiet,
        )?;

        let outcome = match pulse_sol.outcome {
            SolveOutcome::Degraded { .. } => {
                warn!("pulse phase hit the step budget, relaxation starts from a truncated state");
                pulse_sol.outcome
            }
            SolveOutcome::Completed => relax_sol.outcome,
        };

        let mut solution = DynamicsSolution::new(&assembled);
        solution
            .core
            .add_sim_data(Array1::from_vec(relax_grid), relax_sol.y, outcome)?;
        info!(
            "dynamics simulation finished, total time {}",
            format_elapsed(start.elapsed().as_secs_f64())
        );
        Ok(solution)
    }

    /// Single phase under continuous excitation, out to the same horizon
    /// on a linear grid. The curve tails are the steady-state populations.
    pub fn simulate_steady_state(&mut self) -> UpconResult<SteadyStateSolution> {
        let start = Instant::now();
        info!("starting steady-state simulation...");

        let assembled = setup::precalculate(&self.config)?;
        let params = assembled.config.simulation_params.clone();
        let quiet = assembled.config.no_console;
        let tf = relaxation_horizon(&assembled.config)?;
        let options = ode_options(&params);

        info!("solving steady state under continuous excitation...");
        let grid = linear_grid(0.0, tf, params.n_steps);
        let system = PulsePhase::new(&assembled.matrices);
        let initial = assembled.matrices.initial_population.to_vec();
        let sol = solve_ode(&system, &initial, &grid, options, OdeMethod::Stiff, quiet)?;
        let outcome = sol.outcome;

        let mut solution = SteadyStateSolution::new(&assembled);
        solution
            .core
            .add_sim_data(Array1::from_vec(grid), sol.y, outcome)?;

        let labels = solution.core.curve_labels();
        let steady = solution.steady_state_populations()?;
        info!("steady state populations:");
        for (label, &population) in labels.iter().zip(steady.iter()) {
            info!("  {label}: {population:.4e}");
        }
        info!(
            "steady-state simulation finished, total time {}",
            format_elapsed(start.elapsed().as_secs_f64())
        );
        Ok(solution)
    }

    /// Rerun the steady state at each power density and collect the
    /// populations into a (power, curve) table.
    pub fn simulate_power_dependence(
        &mut self,
        power_densities: &[f64],
    ) -> UpconResult<PowerDependenceSolution> {
        let start = Instant::now();
        info!("simulating power dependence of the steady state...");

        let saved = (self.config.no_console, self.config.no_plot);
        self.config.no_console = true;
        self.config.no_plot = true;
        let result = self.power_sweep(power_densities, saved.0);
        self.config.no_console = saved.0;
        self.config.no_plot = saved.1;

        let solution = result?;
        info!(
            "power dependence finished, total time {}",
            format_elapsed(start.elapsed().as_secs_f64())
        );
        Ok(solution)
    }

    fn power_sweep(
        &mut self,
        power_densities: &[f64],
        quiet: bool,
    ) -> UpconResult<PowerDependenceSolution> {
        let bar = progress_bar(power_densities.len(), quiet);
        let mut solutions = Vec::with_capacity(power_densities.len());
        for (num, &power_dens) in power_densities.iter().enumerate() {
            info!(
                "power point {} of {}: {power_dens:.3e} W/cm2",
                num + 1,
                power_densities.len()
            );
            self.config.set_power_density(power_dens);
            solutions.push(self.simulate_steady_state()?);
            bar.inc(1);
        }
        bar.finish_and_clear();
        PowerDependenceSolution::new(Array1::from_vec(power_densities.to_vec()), solutions)
    }

    /// Rerun the dynamics at each (sensitizer, activator) concentration
    /// pair and collect the full solutions.
    pub fn simulate_concentration_dependence(
        &mut self,
        concentrations: &[(f64, f64)],
    ) -> UpconResult<ConcentrationDependenceSolution> {
        let start = Instant::now();
        info!("simulating concentration dependence of the dynamics...");

        let saved = (self.config.no_console, self.config.no_plot);
        self.config.no_console = true;
        self.config.no_plot = true;
        let result = self.concentration_sweep(concentrations, saved.0);
        self.config.no_console = saved.0;
        self.config.no_plot = saved.1;

        let solution = result?;
        info!(
            "concentration dependence finished, total time {}",
            format_elapsed(start.elapsed().as_secs_f64())
        );
        Ok(solution)
    }

    fn concentration_sweep(
        &mut self,
        concentrations: &[(f64, f64)],
        quiet: bool,
    ) -> UpconResult<ConcentrationDependenceSolution> {
        let bar = progress_bar(concentrations.len(), quiet);
        let mut solutions = Vec::with_capacity(concentrations.len());
        for (num, &(s_conc, a_conc)) in concentrations.iter().enumerate() {
            info!(
                "concentration point {} of {}: S = {s_conc}%, A = {a_conc}%",
                num + 1,
                concentrations.len()
            );
            self.config.set_concentrations(s_conc, a_conc);
            solutions.push(self.simulate_dynamics()?);
            bar.inc(1);
        }
        bar.finish_and_clear();
        Ok(ConcentrationDependenceSolution {
            concentrations: concentrations.to_vec(),
            solutions,
        })
    }
}

/// Steady-state populations across a power-density sweep.
#[derive(Debug, Clone)]
pub struct PowerDependenceSolution {
    pub power_densities: Array1<f64>,
    /// Steady-state population per (power point, curve).
    pub populations: Array2<f64>,
    pub solutions: Vec<SteadyStateSolution>,
}

impl PowerDependenceSolution {
    fn new(
        power_densities: Array1<f64>,
        solutions: Vec<SteadyStateSolution>,
    ) -> UpconResult<Self> {
        let n_curves = solutions.first().map_or(0, |s| s.core.n_curves());
        let mut populations = Array2::zeros((solutions.len(), n_curves));
        for (i, sol) in solutions.iter().enumerate() {
            populations.row_mut(i).assign(sol.steady_state_populations()?);
        }
        Ok(Self {
            power_densities,
            populations,
            solutions,
        })
    }

    pub fn curve_labels(&self) -> Vec<String> {
        self.solutions
            .first()
            .map_or_else(Vec::new, |s| s.core.curve_labels())
    }

    /// Local log-log slope of each population curve against power density,
    /// rounded to one decimal. A slope near 1 flags a one-photon process,
    /// near 2 a two-photon upconversion step.
    pub fn slopes(&self) -> UpconResult<Array2<f64>> {
        let log_p: Vec<f64> = self.power_densities.iter().map(|&p| p.log10()).collect();
        let mut slopes = Array2::zeros(self.populations.dim());
        for k in 0..self.populations.ncols() {
            let log_n: Vec<f64> = self
                .populations
                .column(k)
                .iter()
                .map(|&v| v.log10())
                .collect();
            let grad = gradient(&log_n, &log_p)?;
            for (i, g) in grad.into_iter().enumerate() {
                slopes[[i, k]] = (g * 10.0).round() / 10.0;
            }
        }
        Ok(slopes)
    }
}

/// Dynamics solutions across a doping-concentration sweep.
#[derive(Debug, Clone)]
pub struct ConcentrationDependenceSolution {
    pub concentrations: Vec<(f64, f64)>,
    pub solutions: Vec<DynamicsSolution>,
}

impl ConcentrationDependenceSolution {
    /// Average population curves per concentration pair.
    pub fn average_curves(&self) -> UpconResult<Vec<Array2<f64>>> {
        self.solutions
            .iter()
            .map(|s| Ok(s.core.avg_data()?.clone()))
            .collect()
    }

    /// Total comparison error per concentration pair.
    pub fn total_errors(&self) -> UpconResult<Array1<f64>> {
        let mut errors = Array1::zeros(self.solutions.len());
        for (i, sol) in self.solutions.iter().enumerate() {
            errors[i] = sol.total_error()?;
        }
        Ok(errors)
    }
}

fn ode_options(params: &SimulationParams) -> OdeOptions {
    OdeOptions {
        rtol: params.rtol,
        atol: params.atol,
        max_steps: params.max_internal_steps,
        ..OdeOptions::default()
    }
}

/// Ten times the slowest lifetime, rounded to fixed precision.
fn relaxation_horizon(config: &SimulationConfig) -> UpconResult<f64> {
    let slowest = setup::get_lifetimes(config)
        .into_iter()
        .fold(0.0f64, f64::max);
    if slowest <= 0.0 {
        return Err(UpconError::ConfigError(
            "configuration defines no decay lifetimes to size the relaxation horizon".into(),
        ));
    }
    Ok(round_to_decimals(
        LIFETIME_HORIZON_FACTOR * slowest,
        HORIZON_DECIMALS,
    ))
}

fn round_to_decimals(x: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (x * scale).round() / scale
}

fn linear_grid(start: f64, end: f64, n: usize) -> Vec<f64> {
    Array1::linspace(start, end, n).to_vec()
}

fn log_grid(start: f64, end: f64, n: usize) -> Vec<f64> {
    Array1::logspace(10.0, start.log10(), end.log10(), n).to_vec()
}

fn format_elapsed(seconds: f64) -> String {
    let minutes = (seconds / 60.0) as u64;
    format!("{minutes}m {:.2}s", seconds - 60.0 * minutes as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use upcon_types::config::{
        DecayParams, Excitation, IonKind, LatticeParams, SimulationParams, StatesParams,
    };

    /// One activator ion with a ground and an excited state, decay rate
    /// 100/s, pumped 0 -> 1.
    fn two_state_config() -> SimulationConfig {
        SimulationConfig {
            lattice: LatticeParams {
                name: "scenario".into(),
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
                activator_lifetimes: vec![1.0 / 100.0],
                sensitizer_branching: vec![],
                activator_branching: vec![],
            },
            energy_transfer: vec![],
            simulation_params: SimulationParams::default(),
            no_console: true,
            no_plot: true,
        }
    }

    // The excited-state curve sits after the sensitizer GS curve and the
    // activator GS curve.
    const EXCITED: usize = 2;

    #[test]
    fn test_dynamics_follows_exponential_decay() {
        let mut sim = Simulator::new(two_state_config());
        let sol = sim.simulate_dynamics().unwrap();
        let t = sol.core.t_sol().unwrap();
        let y = sol.core.y_sol().unwrap();

        // Log-spaced grid: constant ratio between consecutive stamps.
        let ratio = t[1] / t[0];
        for w in t.to_vec().windows(2) {
            assert!(w[1] > w[0]);
            assert!((w[1] / w[0] - ratio).abs() < 1e-6 * ratio);
        }

        // The excited state decays as exp(-100 (t - t0)) from the chained
        // pulse output.
        let y0 = y[[0, 1]];
        assert!(y0 > 1e-5, "pulse left no excited population: {y0}");
        for &i in &[1usize, 100, 500, 999] {
            let expected = y0 * (-100.0 * (t[i] - t[0])).exp();
            assert!(
                (y[[i, 1]] - expected).abs() < 0.05 * expected + 1e-12,
                "at t = {}: {} vs {expected}",
                t[i],
                y[[i, 1]]
            );
        }

        // Total population in the closed two-state system never grows.
        let total0: f64 = y.row(0).sum();
        for i in 0..y.nrows() {
            assert!(y.row(i).sum() <= total0 + 1e-6);
        }
    }

    #[test]
    fn test_steady_state_matches_rate_balance() {
        // R = pump_rate * power_dens = 100 = decay rate, degeneracy 1:
        // n_e = R / (2R + k) = 1/3.
        let mut config = two_state_config();
        config.excitations[0].pump_rate = 1e-4;
        let mut sim = Simulator::new(config);
        let sol = sim.simulate_steady_state().unwrap();
        let steady = sol.steady_state_populations().unwrap();
        assert!((steady[EXCITED] - 1.0 / 3.0).abs() < 1e-3);
        assert!((steady[1] - 2.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_power_sweep_slope_is_one_in_linear_regime() {
        let mut config = two_state_config();
        config.excitations[0].pump_rate = 1e-6;
        config.excitations[0].power_dens = 10.0;
        let mut sim = Simulator::new(config);
        let sweep = sim
            .simulate_power_dependence(&[10.0, 100.0, 1000.0])
            .unwrap();

        assert_eq!(sweep.populations.dim(), (3, 3));
        let slopes = sweep.slopes().unwrap();
        for i in 0..3 {
            assert_eq!(slopes[[i, EXCITED]], 1.0, "slope at power point {i}");
        }
    }

    #[test]
    fn test_sweep_restores_flags_and_results_ignore_them() {
        let mut config = two_state_config();
        config.no_console = false;
        config.no_plot = false;
        let mut noisy = Simulator::new(config.clone());
        let a = noisy.simulate_power_dependence(&[10.0, 100.0]).unwrap();
        assert!(!noisy.config.no_console);
        assert!(!noisy.config.no_plot);

        config.no_console = true;
        config.no_plot = true;
        let mut quiet = Simulator::new(config);
        let b = quiet.simulate_power_dependence(&[10.0, 100.0]).unwrap();
        assert_eq!(a.populations, b.populations);
    }

    #[test]
    fn test_concentration_sweep_snapshots_each_pair() {
        let mut config = two_state_config();
        config.lattice.n_uc = 2;
        config.lattice.s_conc = 0.0;
        config.lattice.a_conc = 100.0;
        let mut sim = Simulator::new(config);
        let pairs = [(0.0, 100.0), (100.0, 0.0)];
        let sweep = sim.simulate_concentration_dependence(&pairs).unwrap();

        assert_eq!(sweep.solutions.len(), 2);
        for (sol, &(s, a)) in sweep.solutions.iter().zip(&pairs) {
            assert_eq!(sol.core.config().lattice.s_conc, s);
            assert_eq!(sol.core.config().lattice.a_conc, a);
            sol.core.avg_data().unwrap();
        }
        // The live configuration keeps the last pair.
        assert_eq!(sim.config.lattice.s_conc, 100.0);
    }

    #[test]
    fn test_missing_pulse_width_is_config_error() {
        let mut config = two_state_config();
        config.excitations[0].t_pulse = None;
        let mut sim = Simulator::new(config);
        let err = sim.simulate_dynamics();
        assert!(matches!(err, Err(UpconError::ConfigError(_))));
    }

    #[test]
    fn test_unknown_process_label_rejected() {
        let mut sim = Simulator::new(two_state_config());
        let err = sim.update_energy_transfer_strength("no-such-process", 1.0);
        assert!(matches!(err, Err(UpconError::ConfigError(_))));
    }

    #[test]
    fn test_horizon_is_ten_lifetimes_rounded() {
        let horizon = relaxation_horizon(&two_state_config()).unwrap();
        assert_eq!(horizon, 0.1);

        let mut config = two_state_config();
        config.decay.activator_lifetimes = vec![1.0 / 3.0];
        let horizon = relaxation_horizon(&config).unwrap();
        assert_eq!(horizon, 3.33333333);
    }
}
