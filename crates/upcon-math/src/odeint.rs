// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Adaptive ODE Steppers
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Adaptive ODE steppers for the rate-equation engine.
//!
//! Two steppers behind one [`Stepper`] interface:
//!   - [`StiffStepper`]: L-stable TR-BDF2-type SDIRK scheme (γ = 1 − 1/√2)
//!     with a modified-Newton inner iteration on the analytic Jacobian.
//!     The iteration matrix `I − hγJ` is LU-factored once and reused until
//!     `hγ` drifts or Newton stalls. Drives the relaxation phase.
//!   - [`AdamsStepper`]: explicit Adams-Bashforth-Moulton
//!     predictor-corrector (order 2) with a Milne error estimate. Drives
//!     the short, smooth excitation pulse.
//!
//! Both advance point-to-point so a caller can walk an output grid, carry
//! their step size across calls, and convert "too many internal steps"
//! into a [`Reach::BudgetExhausted`] report instead of an error.

use upcon_types::error::{UpconError, UpconResult};

use crate::linalg::{lu_factor, lu_solve};

/// Diagonal coefficient of the stiff scheme, chosen for L-stability.
const GAMMA: f64 = 1.0 - std::f64::consts::FRAC_1_SQRT_2;

/// Newton iteration cap per implicit stage.
const MAX_NEWTON: usize = 10;

/// Newton convergence threshold, relative to the error tolerance.
const NEWTON_TOL: f64 = 0.01;

/// Step-size safety factor.
const SAFETY: f64 = 0.9;

/// Step-size change bounds per accepted step.
const FACTOR_MIN: f64 = 0.25;
const FACTOR_MAX: f64 = 4.0;

/// A first-order autonomous-friendly ODE system `y' = f(t, y)`.
pub trait OdeSystem {
    fn ndim(&self) -> usize;

    /// Evaluate the right-hand side into `dydt`.
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]);

    /// Evaluate the dense row-major Jacobian `J[i*n + j] = df_i/dy_j`.
    fn jacobian(&self, t: f64, y: &[f64], jac: &mut [f64]);
}

/// Tolerances and step bounds for the adaptive steppers.
#[derive(Debug, Clone)]
pub struct OdeOptions {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance. Populations can be meaningful down to ~1e-12,
    /// so the domain default is far below the usual 1e-9.
    pub atol: f64,
    /// Initial step size; 0.0 selects an automatic guess.
    pub h0: f64,
    pub h_min: f64,
    pub h_max: f64,
    /// Internal step attempts allowed per [`Stepper::step_to`] call.
    pub max_steps: usize,
}

impl Default for OdeOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-3,
            atol: 1e-15,
            h0: 0.0,
            h_min: 1e-18,
            h_max: f64::INFINITY,
            max_steps: 1000,
        }
    }
}

impl OdeOptions {
    pub fn validate(&self) -> UpconResult<()> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(UpconError::ConfigError("rtol must be finite and > 0".into()));
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(UpconError::ConfigError("atol must be finite and > 0".into()));
        }
        if self.max_steps == 0 {
            return Err(UpconError::ConfigError("max_steps must be > 0".into()));
        }
        Ok(())
    }

    fn initial_step(&self, span: f64) -> f64 {
        if self.h0 > 0.0 {
            self.h0.min(span)
        } else {
            (span * 1e-3).max(self.h_min).min(self.h_max).min(span)
        }
    }
}

/// Result of one point-to-point advance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reach {
    /// The target time was reached.
    Reached { steps: usize },
    /// The internal step budget ran out first; the stepper rests at
    /// `t_stop` with a best-effort state.
    BudgetExhausted { t_stop: f64, steps: usize },
}

/// Point-to-point advancing interface shared by both steppers.
pub trait Stepper {
    fn t(&self) -> f64;
    fn y(&self) -> &[f64];
    fn step_to(&mut self, t_target: f64) -> UpconResult<Reach>;
}

/// Weighted RMS norm with per-component scale `atol + rtol*|y_ref|`.
fn scaled_norm(v: &[f64], y_ref: &[f64], opts: &OdeOptions) -> f64 {
    let n = v.len();
    let mut acc = 0.0;
    for i in 0..n {
        let sc = opts.atol + opts.rtol * y_ref[i].abs();
        let r = v[i] / sc;
        acc += r * r;
    }
    (acc / n as f64).sqrt()
}

fn non_finite(v: &[f64]) -> bool {
    v.iter().any(|x| !x.is_finite())
}

fn target_reached(t: f64, t_target: f64) -> bool {
    t_target - t <= 4.0 * f64::EPSILON * t_target.abs().max(t.abs())
}

// ── Stiff stepper ────────────────────────────────────────────────────

/// L-stable implicit stepper for the stiff relaxation dynamics.
pub struct StiffStepper<'a, S: OdeSystem> {
    sys: &'a S,
    opts: OdeOptions,
    n: usize,
    t: f64,
    y: Vec<f64>,
    h: f64,
    jac: Vec<f64>,
    lu: Vec<f64>,
    pivot: Vec<usize>,
    cached_hgamma: f64,
}

impl<'a, S: OdeSystem> StiffStepper<'a, S> {
    pub fn new(sys: &'a S, y0: &[f64], t0: f64, opts: OdeOptions) -> UpconResult<Self> {
        opts.validate()?;
        let n = sys.ndim();
        if y0.len() != n {
            return Err(UpconError::ShapeMismatch(format!(
                "initial state has {} entries, system has {n}",
                y0.len()
            )));
        }
        Ok(Self {
            sys,
            opts,
            n,
            t: t0,
            y: y0.to_vec(),
            h: 0.0,
            jac: vec![0.0; n * n],
            lu: vec![0.0; n * n],
            pivot: vec![0; n],
            cached_hgamma: -1.0,
        })
    }

    /// Rebuild and factor `I − hγJ` at the current state.
    fn refresh_iteration_matrix(&mut self, hg: f64) -> UpconResult<()> {
        self.sys.jacobian(self.t, &self.y, &mut self.jac);
        let n = self.n;
        for i in 0..n {
            for j in 0..n {
                let idx = i * n + j;
                self.lu[idx] = -hg * self.jac[idx];
                if i == j {
                    self.lu[idx] += 1.0;
                }
            }
        }
        lu_factor(&mut self.lu, &mut self.pivot, n).map_err(|_| UpconError::SolverFailed {
            t: self.t,
            message: "singular Newton iteration matrix".into(),
        })?;
        self.cached_hgamma = hg;
        Ok(())
    }

    /// Newton-solve one implicit stage `k = f(t_stage, y_base + hγ·k)`.
    /// Returns whether the iteration converged.
    fn solve_stage(
        &self,
        t_stage: f64,
        hg: f64,
        y_base: &[f64],
        k: &mut [f64],
        stage_y: &mut [f64],
        resid: &mut [f64],
    ) -> bool {
        let n = self.n;
        for _ in 0..MAX_NEWTON {
            for i in 0..n {
                stage_y[i] = y_base[i] + hg * k[i];
            }
            self.sys.rhs(t_stage, stage_y, resid);
            for i in 0..n {
                resid[i] -= k[i];
            }
            lu_solve(&self.lu, &self.pivot, resid, n);
            for i in 0..n {
                k[i] += resid[i];
            }
            if scaled_norm(resid, &self.y, &self.opts) < NEWTON_TOL {
                return true;
            }
        }
        false
    }
}

impl<S: OdeSystem> Stepper for StiffStepper<'_, S> {
    fn t(&self) -> f64 {
        self.t
    }

    fn y(&self) -> &[f64] {
        &self.y
    }

    fn step_to(&mut self, t_target: f64) -> UpconResult<Reach> {
        let n = self.n;
        if self.h <= 0.0 {
            self.h = self.opts.initial_step(t_target - self.t);
        }

        let mut k1 = vec![0.0; n];
        let mut k2 = vec![0.0; n];
        let mut base2 = vec![0.0; n];
        let mut y_new = vec![0.0; n];
        let mut stage_y = vec![0.0; n];
        let mut resid = vec![0.0; n];

        let mut steps = 0usize;
        while !target_reached(self.t, t_target) {
            if steps >= self.opts.max_steps {
                return Ok(Reach::BudgetExhausted { t_stop: self.t, steps });
            }
            steps += 1;

            let remaining = t_target - self.t;
            let h = self.h.max(self.opts.h_min).min(self.opts.h_max).min(remaining);
            let lands = h >= remaining;
            let hg = h * GAMMA;

            if self.cached_hgamma <= 0.0
                || (hg - self.cached_hgamma).abs() > 0.2 * self.cached_hgamma
            {
                self.refresh_iteration_matrix(hg)?;
            }

            // Stage 1: k1 = f(t + γh, y + hγ·k1), seeded with f(t, y).
            self.sys.rhs(self.t, &self.y, &mut k1);
            if !self.solve_stage(self.t + GAMMA * h, hg, &self.y, &mut k1, &mut stage_y, &mut resid)
            {
                self.h = h * 0.5;
                self.cached_hgamma = -1.0;
                continue;
            }

            // Stage 2: k2 = f(t + h, y + h(1−γ)·k1 + hγ·k2).
            for i in 0..n {
                base2[i] = self.y[i] + h * (1.0 - GAMMA) * k1[i];
            }
            k2.copy_from_slice(&k1);
            if !self.solve_stage(self.t + h, hg, &base2, &mut k2, &mut stage_y, &mut resid) {
                self.h = h * 0.5;
                self.cached_hgamma = -1.0;
                continue;
            }

            for i in 0..n {
                y_new[i] = self.y[i] + h * ((1.0 - GAMMA) * k1[i] + GAMMA * k2[i]);
            }
            if non_finite(&y_new) {
                return Err(UpconError::SolverFailed {
                    t: self.t,
                    message: "non-finite state during stiff integration".into(),
                });
            }

            // Embedded first-order solution differs by hγ(k2 − k1).
            let mut err_norm = 0.0;
            for i in 0..n {
                let ei = hg * (k2[i] - k1[i]);
                let sc = self.opts.atol + self.opts.rtol * self.y[i].abs().max(y_new[i].abs());
                err_norm += (ei / sc) * (ei / sc);
            }
            err_norm = (err_norm / n as f64).sqrt();
            if !err_norm.is_finite() {
                return Err(UpconError::SolverFailed {
                    t: self.t,
                    message: "non-finite error estimate during stiff integration".into(),
                });
            }

            let accepted = err_norm <= 1.0;
            if accepted {
                self.t = if lands { t_target } else { self.t + h };
                self.y.copy_from_slice(&y_new);
            } else {
                // Stale Jacobians misjudge the step; refresh on rejection.
                self.cached_hgamma = -1.0;
            }

            let factor = if err_norm == 0.0 {
                FACTOR_MAX
            } else {
                (SAFETY * err_norm.powf(-1.0 / 3.0)).clamp(FACTOR_MIN, FACTOR_MAX)
            };
            self.h = (h * factor).max(self.opts.h_min).min(self.opts.h_max);
        }
        Ok(Reach::Reached { steps })
    }
}

// ── Explicit predictor-corrector stepper ─────────────────────────────

/// Adams-Bashforth-Moulton order-2 stepper for smooth transients.
pub struct AdamsStepper<'a, S: OdeSystem> {
    sys: &'a S,
    opts: OdeOptions,
    n: usize,
    t: f64,
    y: Vec<f64>,
    h: f64,
    /// Derivative at the current point.
    f_curr: Vec<f64>,
    /// Step length and derivative of the previous accepted point.
    prev: Option<(f64, Vec<f64>)>,
}

impl<'a, S: OdeSystem> AdamsStepper<'a, S> {
    pub fn new(sys: &'a S, y0: &[f64], t0: f64, opts: OdeOptions) -> UpconResult<Self> {
        opts.validate()?;
        let n = sys.ndim();
        if y0.len() != n {
            return Err(UpconError::ShapeMismatch(format!(
                "initial state has {} entries, system has {n}",
                y0.len()
            )));
        }
        let mut f_curr = vec![0.0; n];
        sys.rhs(t0, y0, &mut f_curr);
        if non_finite(&f_curr) {
            return Err(UpconError::SolverFailed {
                t: t0,
                message: "non-finite derivative at the initial state".into(),
            });
        }
        Ok(Self {
            sys,
            opts,
            n,
            t: t0,
            y: y0.to_vec(),
            h: 0.0,
            f_curr,
            prev: None,
        })
    }
}

impl<S: OdeSystem> Stepper for AdamsStepper<'_, S> {
    fn t(&self) -> f64 {
        self.t
    }

    fn y(&self) -> &[f64] {
        &self.y
    }

    fn step_to(&mut self, t_target: f64) -> UpconResult<Reach> {
        let n = self.n;
        if self.h <= 0.0 {
            self.h = self.opts.initial_step(t_target - self.t);
        }

        let mut y_pred = vec![0.0; n];
        let mut f_pred = vec![0.0; n];
        let mut y_new = vec![0.0; n];
        let mut est = vec![0.0; n];

        let mut steps = 0usize;
        while !target_reached(self.t, t_target) {
            if steps >= self.opts.max_steps {
                return Ok(Reach::BudgetExhausted { t_stop: self.t, steps });
            }
            steps += 1;

            let remaining = t_target - self.t;
            let h = self.h.max(self.opts.h_min).min(self.opts.h_max).min(remaining);
            let lands = h >= remaining;

            // Predict: AB2 over the uneven last step, Euler on the first.
            match &self.prev {
                Some((h_old, f_prev)) => {
                    let r = h / h_old;
                    for i in 0..n {
                        y_pred[i] = self.y[i]
                            + h * ((1.0 + 0.5 * r) * self.f_curr[i] - 0.5 * r * f_prev[i]);
                    }
                }
                None => {
                    for i in 0..n {
                        y_pred[i] = self.y[i] + h * self.f_curr[i];
                    }
                }
            }

            // Evaluate and correct with the trapezoidal rule.
            self.sys.rhs(self.t + h, &y_pred, &mut f_pred);
            for i in 0..n {
                y_new[i] = self.y[i] + 0.5 * h * (self.f_curr[i] + f_pred[i]);
                est[i] = (y_new[i] - y_pred[i]) / 6.0;
            }
            if non_finite(&y_new) {
                return Err(UpconError::SolverFailed {
                    t: self.t,
                    message: "non-finite state during pulse integration".into(),
                });
            }

            let mut err_norm = 0.0;
            for i in 0..n {
                let sc = self.opts.atol + self.opts.rtol * self.y[i].abs().max(y_new[i].abs());
                err_norm += (est[i] / sc) * (est[i] / sc);
            }
            err_norm = (err_norm / n as f64).sqrt();
            if !err_norm.is_finite() {
                return Err(UpconError::SolverFailed {
                    t: self.t,
                    message: "non-finite error estimate during pulse integration".into(),
                });
            }

            if err_norm <= 1.0 {
                self.sys.rhs(self.t + h, &y_new, &mut f_pred);
                self.prev = Some((h, std::mem::replace(&mut self.f_curr, f_pred.clone())));
                self.t = if lands { t_target } else { self.t + h };
                self.y.copy_from_slice(&y_new);
            }

            let factor = if err_norm == 0.0 {
                FACTOR_MAX
            } else {
                (SAFETY * err_norm.powf(-1.0 / 3.0)).clamp(FACTOR_MIN, FACTOR_MAX)
            };
            self.h = (h * factor).max(self.opts.h_min).min(self.opts.h_max);
        }
        Ok(Reach::Reached { steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y' = -k*y, solution exp(-k t).
    struct Decay {
        k: f64,
    }

    impl OdeSystem for Decay {
        fn ndim(&self) -> usize {
            1
        }
        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            dydt[0] = -self.k * y[0];
        }
        fn jacobian(&self, _t: f64, _y: &[f64], jac: &mut [f64]) {
            jac[0] = -self.k;
        }
    }

    /// Two-compartment chain with widely separated rates.
    struct StiffChain;

    impl OdeSystem for StiffChain {
        fn ndim(&self) -> usize {
            2
        }
        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            dydt[0] = -1e4 * y[0];
            dydt[1] = 1e4 * y[0] - 1.0 * y[1];
        }
        fn jacobian(&self, _t: f64, _y: &[f64], jac: &mut [f64]) {
            jac[0] = -1e4;
            jac[1] = 0.0;
            jac[2] = 1e4;
            jac[3] = -1.0;
        }
    }

    #[test]
    fn test_stiff_exponential_decay() {
        let sys = Decay { k: 100.0 };
        let opts = OdeOptions {
            rtol: 1e-6,
            atol: 1e-12,
            ..OdeOptions::default()
        };
        let mut st = StiffStepper::new(&sys, &[1.0], 0.0, opts).unwrap();
        let reach = st.step_to(0.01).unwrap();
        assert!(matches!(reach, Reach::Reached { .. }));
        let exact = (-100.0_f64 * 0.01).exp();
        assert!(
            (st.y()[0] - exact).abs() < 1e-4,
            "got {}, want {exact}",
            st.y()[0]
        );
    }

    #[test]
    fn test_stiff_chain_mass_flows_downhill() {
        let sys = StiffChain;
        let mut st = StiffStepper::new(&sys, &[1.0, 0.0], 0.0, OdeOptions::default()).unwrap();
        st.step_to(0.01).unwrap();
        // Fast compartment drained, slow one holding nearly everything.
        assert!(st.y()[0] < 1e-8);
        let exact = (-0.01_f64).exp();
        assert!((st.y()[1] - exact).abs() < 1e-2, "got {}", st.y()[1]);
    }

    #[test]
    fn test_adams_matches_stiff_on_smooth_problem() {
        let sys = Decay { k: 2.0 };
        let opts = OdeOptions {
            rtol: 1e-8,
            atol: 1e-12,
            ..OdeOptions::default()
        };
        let mut ad = AdamsStepper::new(&sys, &[1.0], 0.0, opts.clone()).unwrap();
        let mut st = StiffStepper::new(&sys, &[1.0], 0.0, opts).unwrap();
        ad.step_to(1.0).unwrap();
        st.step_to(1.0).unwrap();
        let exact = (-2.0_f64).exp();
        assert!((ad.y()[0] - exact).abs() < 1e-5, "adams {}", ad.y()[0]);
        assert!((st.y()[0] - exact).abs() < 1e-5, "stiff {}", st.y()[0]);
    }

    #[test]
    fn test_step_budget_reports_partial_progress() {
        let sys = StiffChain;
        let opts = OdeOptions {
            max_steps: 3,
            h0: 1e-9,
            ..OdeOptions::default()
        };
        let mut st = StiffStepper::new(&sys, &[1.0, 0.0], 0.0, opts).unwrap();
        match st.step_to(1.0).unwrap() {
            Reach::BudgetExhausted { t_stop, steps } => {
                assert!(t_stop < 1.0);
                assert_eq!(steps, 3);
            }
            Reach::Reached { .. } => panic!("three tiny steps cannot cover the span"),
        }
    }

    #[test]
    fn test_step_size_carries_across_calls() {
        let sys = Decay { k: 1.0 };
        let mut st = StiffStepper::new(&sys, &[1.0], 0.0, OdeOptions::default()).unwrap();
        st.step_to(0.5).unwrap();
        let h_after_first = st.h;
        assert!(h_after_first > 0.0);
        st.step_to(1.0).unwrap();
        assert!((st.y()[0] - (-1.0_f64).exp()).abs() < 1e-3);
    }

    #[test]
    fn test_invalid_tolerances_rejected() {
        let sys = Decay { k: 1.0 };
        let opts = OdeOptions {
            rtol: -1.0,
            ..OdeOptions::default()
        };
        assert!(StiffStepper::new(&sys, &[1.0], 0.0, opts).is_err());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let sys = Decay { k: 1.0 };
        let err = AdamsStepper::new(&sys, &[1.0, 2.0], 0.0, OdeOptions::default());
        assert!(matches!(err, Err(UpconError::ShapeMismatch(_))));
    }
}
