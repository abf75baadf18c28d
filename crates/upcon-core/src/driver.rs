// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Integration Driver
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Output-grid integration driver.
//!
//! Walks an adaptive stepper from one requested output time to the next,
//! so the sampled trajectory and the post-processing grid agree exactly.
//! Running out of the internal step budget is not an error: the driver
//! warns, stops, leaves the remaining rows at zero and reports a
//! [`SolveOutcome::Degraded`] the caller can still post-process and save.

use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use ndarray::{Array2, ArrayView1};
use upcon_math::odeint::{AdamsStepper, OdeOptions, OdeSystem, Reach, Stepper, StiffStepper};
use upcon_types::error::{UpconError, UpconResult};

/// Which stepper family drives the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdeMethod {
    /// L-stable implicit stepper, for the stiff relaxation dynamics.
    Stiff,
    /// Explicit predictor-corrector, for the short smooth pulse.
    Explicit,
}

/// How far the walk got.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolveOutcome {
    Completed,
    /// The step budget ran out while heading for output row `at_step`;
    /// the stepper rested at `t_stop` and later rows stayed zero.
    Degraded { at_step: usize, t_stop: f64 },
}

/// Trajectory sampled on the requested output grid, row 0 the initial
/// state.
#[derive(Debug, Clone)]
pub struct OdeSolution {
    pub y: Array2<f64>,
    pub outcome: SolveOutcome,
}

pub(crate) fn progress_bar(len: usize, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{bar:40}] {percent:>3}% | {msg}") {
        bar.set_style(style);
    }
    bar
}

/// Integrate `system` from `initial` across `time_grid`.
pub fn solve_ode<S: OdeSystem>(
    system: &S,
    initial: &[f64],
    time_grid: &[f64],
    options: OdeOptions,
    method: OdeMethod,
    quiet: bool,
) -> UpconResult<OdeSolution> {
    if time_grid.is_empty() {
        return Err(UpconError::ShapeMismatch("output grid is empty".into()));
    }
    if time_grid.windows(2).any(|w| w[1] <= w[0]) {
        return Err(UpconError::ShapeMismatch(
            "output grid must be strictly increasing".into(),
        ));
    }

    let mut stepper: Box<dyn Stepper + '_> = match method {
        OdeMethod::Stiff => Box::new(StiffStepper::new(system, initial, time_grid[0], options)?),
        OdeMethod::Explicit => Box::new(AdamsStepper::new(system, initial, time_grid[0], options)?),
    };

    let n = system.ndim();
    let n_rows = time_grid.len();
    let mut y = Array2::zeros((n_rows, n));
    y.row_mut(0).assign(&ArrayView1::from(initial));

    let bar = progress_bar(n_rows - 1, quiet);
    let mut outcome = SolveOutcome::Completed;
    for (row, &t_target) in time_grid.iter().enumerate().skip(1) {
        match stepper.step_to(t_target)? {
            Reach::Reached { .. } => {
                y.row_mut(row).assign(&ArrayView1::from(stepper.y()));
                bar.set_message(format!("t = {t_target:.3e} s"));
                bar.inc(1);
            }
            Reach::BudgetExhausted { t_stop, steps } => {
                warn!(
                    "step budget exhausted after {steps} internal steps at t = {t_stop:.3e} s \
                     (output step {row} of {n_rows})"
                );
                warn!("most likely the system is too stiff for the current tolerances");
                warn!("raise max_internal_steps or loosen rtol/atol to integrate further");
                warn!("the remaining output rows stay at zero population");
                outcome = SolveOutcome::Degraded { at_step: row, t_stop };
                break;
            }
        }
    }
    bar.finish_and_clear();

    Ok(OdeSolution { y, outcome })
}
