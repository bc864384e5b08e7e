//! Population control, configuration, and bounded runs for the Highlander
//! simulation.
//!
//! This crate sits on top of `highlander-agents`. It turns a
//! [`SimulationConfig`] into a running [`Population`], gives the operator
//! pause, resume, stop, and quiescence controls, verifies that health is
//! conserved, and drives bounded headless runs.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with environment overrides.
//! - [`conservation`] -- The `N x H` health-sum check.
//! - [`controller`] -- The [`Population`] lifecycle controller.
//! - [`runner`] -- Bounded runs with periodic checkpoints.

pub mod config;
pub mod conservation;
pub mod controller;
pub mod runner;

pub use config::{ConfigError, SimulationConfig, SinkKind};
pub use conservation::{ConservationResult, HealthAnomaly};
pub use controller::{
    ControllerError, FieldOutcome, ImmortalHandle, Population, PopulationStats,
};
pub use runner::{RunEndReason, RunReport, RunnerError, Survivor, log_run_end, run_simulation};
