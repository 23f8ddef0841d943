//! ExperimentManager trait - physics/scene collaborator
//!
//! The engine owns the scene and the solver. The station only flips the
//! advancing flag, rewinds time, reads scalar state and writes parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CameraPose, ContractError};

/// Named scalar quantities read from the engine for one experiment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalarState {
    /// Simulation time in seconds
    pub sim_time: f64,
    pub values: BTreeMap<String, f64>,
}

impl ScalarState {
    pub fn new(sim_time: f64) -> Self {
        Self {
            sim_time,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Engine control interface
#[trait_variant::make(ExperimentManager: Send)]
pub trait LocalExperimentManager {
    /// Whether the simulation is currently advancing
    async fn is_advancing(&self) -> Result<bool, ContractError>;

    /// Start or stop advancing
    async fn set_advancing(&self, advancing: bool) -> Result<(), ContractError>;

    /// Current simulation time in seconds
    async fn current_time(&self) -> Result<f64, ContractError>;

    /// Rewind or seek simulation time
    async fn set_current_time(&self, time: f64) -> Result<(), ContractError>;

    /// Scalar state for the given experiment
    async fn read_scalar_state(&self, experiment_id: &str) -> Result<ScalarState, ContractError>;

    /// Write one attribute on one entity
    ///
    /// Idempotent. Returns false when the entity is absent, never errors.
    async fn apply_mutable_parameter(&self, entity_path: &str, name: &str, value: f64) -> bool;

    /// Zero all velocities, returns how many entities were reset
    async fn reset_all_motion(&self) -> Result<usize, ContractError>;

    /// Move the observer camera; false when the engine has no camera control
    async fn apply_camera_pose(&self, pose: &CameraPose) -> bool;
}
