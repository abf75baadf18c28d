//! Rate-equation engine for lanthanide upconversion kinetics.
//!
//! Assembles sparse rate matrices from a randomly doped lattice,
//! integrates the two-phase pulse/relaxation dynamics, stores solutions
//! with lazily cached derived data, compares them against measured decay
//! traces, and sweeps power density and doping concentration.

pub mod compare;
pub mod driver;
pub mod optimize;
pub mod rates;
pub mod setup;
pub mod simulations;
pub mod solution;
