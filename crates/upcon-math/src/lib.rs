// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Numerical Foundations
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Numerical foundations for the upconversion kinetics engine.
//!
//! Deliberately free of any rate-equation knowledge: dense LU, sparse
//! kernels, adaptive ODE steppers, smoothing and interpolation. The
//! physics lives in `upcon-core`; this crate only knows `f64`s.

pub mod interp;
pub mod linalg;
pub mod odeint;
pub mod savgol;
pub mod sparse;
