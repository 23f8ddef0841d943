//! Experiment session
//!
//! Written only by the command dispatcher, read by the telemetry loop.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::Serialize;

/// Snapshot of the session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub current_experiment_id: Option<String>,
    /// Current parameter values of the active experiment
    pub parameters: BTreeMap<String, f64>,
    /// Bumped by every command that changes experiment or run state
    pub epoch: u64,
}

#[derive(Debug, Default)]
pub struct ExperimentSession {
    state: RwLock<SessionState>,
}

impl ExperimentSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_experiment_id(&self) -> Option<String> {
        self.state.read().current_experiment_id.clone()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn epoch(&self) -> u64 {
        self.state.read().epoch
    }

    /// Invalidate every in-flight write started under the current epoch
    pub fn advance_epoch(&self) -> u64 {
        let mut state = self.state.write();
        state.epoch += 1;
        state.epoch
    }

    /// Switch experiment, replacing parameters with the given defaults
    pub fn enter(&self, experiment_id: impl Into<String>, defaults: BTreeMap<String, f64>) {
        let mut state = self.state.write();
        state.current_experiment_id = Some(experiment_id.into());
        state.parameters = defaults;
        state.epoch += 1;
    }

    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.state.read().parameters.get(name).copied()
    }

    pub fn set_parameter(&self, name: impl Into<String>, value: f64) {
        self.state.write().parameters.insert(name.into(), value);
    }

    /// Store a value only if nothing advanced the epoch since `epoch` was read
    pub fn set_parameter_at(&self, epoch: u64, name: impl Into<String>, value: f64) -> bool {
        let mut state = self.state.write();
        if state.epoch != epoch {
            return false;
        }
        state.parameters.insert(name.into(), value);
        true
    }

    pub fn parameters(&self) -> BTreeMap<String, f64> {
        self.state.read().parameters.clone()
    }
}
