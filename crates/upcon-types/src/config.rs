// ─────────────────────────────────────────────────────────────────────
// SCPN Upconversion Kinetics — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{UpconError, UpconResult};

/// Which dopant species a transition or process acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IonKind {
    Sensitizer,
    Activator,
}

/// Top-level simulation configuration.
///
/// One value of this type parametrizes a full rate-equation run: lattice
/// doping, electronic-state structure, excitations, decay and branching,
/// energy-transfer processes and solver tuning. Sweeps mutate a small set
/// of fields in place between runs; every finished solution keeps its own
/// clone, so later mutation never alters a stored result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub lattice: LatticeParams,
    pub states: StatesParams,
    pub excitations: Vec<Excitation>,
    pub decay: DecayParams,
    #[serde(default)]
    pub energy_transfer: Vec<EnergyTransferProcess>,
    #[serde(default)]
    pub simulation_params: SimulationParams,
    #[serde(default)]
    pub no_console: bool,
    #[serde(default)]
    pub no_plot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatticeParams {
    pub name: String,
    /// Sensitizer doping concentration in percent of available sites.
    #[serde(rename = "S_conc")]
    pub s_conc: f64,
    /// Activator doping concentration in percent of available sites.
    #[serde(rename = "A_conc")]
    pub a_conc: f64,
    /// Unit cells per axis of the simulated cubic volume.
    #[serde(rename = "N_uc")]
    pub n_uc: usize,
    /// Lattice parameter (Angstrom).
    pub cell_par: f64,
    /// Maximum ion-ion interaction distance (Angstrom).
    pub d_max: f64,
    /// Seed for the site-occupation draws. Same seed, same lattice.
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatesParams {
    pub sensitizer_ion_label: String,
    pub activator_ion_label: String,
    /// State labels, ground state first. The list length is the state count.
    pub sensitizer_states_labels: Vec<String>,
    pub activator_states_labels: Vec<String>,
}

impl StatesParams {
    pub fn sensitizer_states(&self) -> usize {
        self.sensitizer_states_labels.len()
    }

    pub fn activator_states(&self) -> usize {
        self.activator_states_labels.len()
    }
}

/// A pump transition between two states of one ion species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Excitation {
    pub label: String,
    pub active: bool,
    /// Pulse width in seconds. Required for dynamics runs on the active
    /// excitation; steady-state runs ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t_pulse: Option<f64>,
    /// Excitation power density (W/cm2).
    pub power_dens: f64,
    /// Pump rate per unit power density (cm2/W/s).
    pub pump_rate: f64,
    /// Degeneracy ratio g_lower/g_upper of the pumped pair.
    pub degeneracy: f64,
    pub ion: IonKind,
    pub init_state: usize,
    pub final_state: usize,
}

/// Spontaneous decay and branching for both ion species.
///
/// Lifetimes are listed per excited state, state 1 first (the ground state
/// does not decay). A branching entry diverts a fraction of one excited
/// state's decay to an intermediate state; the remainder lands on the
/// ground state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayParams {
    pub sensitizer_lifetimes: Vec<f64>,
    pub activator_lifetimes: Vec<f64>,
    #[serde(default)]
    pub sensitizer_branching: Vec<BranchingRatio>,
    #[serde(default)]
    pub activator_branching: Vec<BranchingRatio>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchingRatio {
    pub from: usize,
    pub to: usize,
    pub fraction: f64,
}

/// One pairwise ion-ion energy-transfer (upconversion) process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyTransferProcess {
    pub label: String,
    pub donor: IonKind,
    pub donor_initial: usize,
    pub donor_final: usize,
    pub acceptor: IonKind,
    pub acceptor_initial: usize,
    pub acceptor_final: usize,
    /// Transfer strength at unit distance (Angstrom^mult / s).
    pub strength: f64,
    /// Distance exponent: 6, 8 or 10 for multipolar interactions.
    pub mult: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParams {
    #[serde(default = "default_rtol")]
    pub rtol: f64,
    #[serde(default = "default_atol")]
    pub atol: f64,
    #[serde(rename = "N_steps", default = "default_n_steps")]
    pub n_steps: usize,
    #[serde(rename = "N_steps_pulse", default = "default_n_steps_pulse")]
    pub n_steps_pulse: usize,
    #[serde(default = "default_max_internal_steps")]
    pub max_internal_steps: usize,
}

fn default_rtol() -> f64 {
    constants::DEFAULT_RTOL
}
fn default_atol() -> f64 {
    constants::DEFAULT_ATOL
}
fn default_n_steps() -> usize {
    constants::DEFAULT_N_STEPS
}
fn default_n_steps_pulse() -> usize {
    constants::DEFAULT_N_STEPS_PULSE
}
fn default_max_internal_steps() -> usize {
    constants::DEFAULT_MAX_INTERNAL_STEPS
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            rtol: default_rtol(),
            atol: default_atol(),
            n_steps: default_n_steps(),
            n_steps_pulse: default_n_steps_pulse(),
            max_internal_steps: default_max_internal_steps(),
        }
    }
}

impl SimulationConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> UpconResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn active_excitations(&self) -> impl Iterator<Item = &Excitation> {
        self.excitations.iter().filter(|exc| exc.active)
    }

    /// Widest pulse among the active excitations.
    ///
    /// Dynamics runs need this to schedule the excitation phase; a missing
    /// value is a configuration fault, not a solver fault.
    pub fn pulse_width(&self) -> UpconResult<f64> {
        self.active_excitations()
            .filter_map(|exc| exc.t_pulse)
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |m| m.max(t))))
            .ok_or_else(|| {
                UpconError::ConfigError("no active excitation defines t_pulse".into())
            })
    }

    /// Labels of the active excitations, joined for file naming.
    pub fn excitation_tag(&self) -> String {
        self.active_excitations()
            .map(|exc| exc.label.as_str())
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Set every excitation's power density. Sweep mutation hook.
    pub fn set_power_density(&mut self, power_dens: f64) {
        for exc in &mut self.excitations {
            exc.power_dens = power_dens;
        }
    }

    /// Set both doping concentrations. Sweep mutation hook.
    pub fn set_concentrations(&mut self, s_conc: f64, a_conc: f64) {
        self.lattice.s_conc = s_conc;
        self.lattice.a_conc = a_conc;
    }

    /// Set the strength of one energy-transfer process. Optimizer hook.
    pub fn set_energy_transfer_strength(&mut self, label: &str, value: f64) -> UpconResult<()> {
        match self
            .energy_transfer
            .iter_mut()
            .find(|proc| proc.label == label)
        {
            Some(proc) => {
                proc.strength = value;
                Ok(())
            }
            None => Err(UpconError::ConfigError(format!(
                "unknown energy-transfer process: {label}"
            ))),
        }
    }
}
