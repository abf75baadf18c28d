// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Relaxation horizon as a multiple of the slowest decay lifetime.
pub const LIFETIME_HORIZON_FACTOR: f64 = 10.0;

/// Decimal places the relaxation horizon is rounded to.
pub const HORIZON_DECIMALS: u32 = 8;

/// Savitzky-Golay window length for experimental-trace smoothing.
/// Must stay odd.
pub const SMOOTH_WINDOW: usize = 11;

/// Savitzky-Golay polynomial order for experimental-trace smoothing.
pub const SMOOTH_ORDER: usize = 2;

/// Trailing experimental points used for the background-offset estimate.
pub const BACKGROUND_POINTS: usize = 50;

/// Default relative tolerance for the rate-equation solvers.
pub const DEFAULT_RTOL: f64 = 1e-3;

/// Default absolute tolerance for the rate-equation solvers.
pub const DEFAULT_ATOL: f64 = 1e-15;

/// Default number of output points on the relaxation grid.
pub const DEFAULT_N_STEPS: usize = 1000;

/// Default number of output points on the excitation-pulse grid.
pub const DEFAULT_N_STEPS_PULSE: usize = 100;

/// Default ceiling on internal solver steps per output interval.
pub const DEFAULT_MAX_INTERNAL_STEPS: usize = 1000;

/// Comment marker in experimental decay files.
pub const EXP_DATA_COMMENT: char = '#';
