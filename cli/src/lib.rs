//! Agora command-line front end
//!
//! The `agorad` binary loads an orchestrator config from TOML and either
//! validates it or runs a JSON scenario through a simulated orchestrator.

pub mod display;
pub mod scenario;

pub use scenario::{Scenario, ScenarioParticipant, SimulationReport, Simulation, Step, StepOutcome};
