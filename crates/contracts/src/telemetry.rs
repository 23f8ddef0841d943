//! Telemetry payloads
//!
//! One fixed struct per experiment kind, selected by the active experiment.
//! `timestamp` and `is_running` are present in every variant.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Disk/ring angular momentum rig
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngularMomentumSample {
    pub experiment_id: String,
    pub timestamp: DateTime<Utc>,
    pub sim_time: f64,
    pub is_running: bool,
    /// rad/s, after the configured scale
    pub disk_angular_velocity: f64,
    pub ring_angular_velocity: f64,
    /// kg·m²/s
    pub disk_angular_momentum: f64,
    pub ring_angular_momentum: f64,
    pub total_angular_momentum: f64,
}

/// Simple or damped pendulum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendulumSample {
    pub experiment_id: String,
    pub timestamp: DateTime<Utc>,
    pub sim_time: f64,
    pub is_running: bool,
    /// Phase angle in radians
    pub angle: f64,
    pub angular_velocity: f64,
    /// Smoothed oscillation period in seconds, once enough crossings were seen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<f64>,
}

/// Experiments without a dedicated schema; raw scalars are forwarded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sim_time: f64,
    pub is_running: bool,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

/// Per-experiment telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "experiment", rename_all = "snake_case")]
pub enum TelemetrySample {
    AngularMomentum(AngularMomentumSample),
    Pendulum(PendulumSample),
    Generic(GenericSample),
}

impl TelemetrySample {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::AngularMomentum(s) => s.timestamp,
            Self::Pendulum(s) => s.timestamp,
            Self::Generic(s) => s.timestamp,
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            Self::AngularMomentum(s) => s.is_running,
            Self::Pendulum(s) => s.is_running,
            Self::Generic(s) => s.is_running,
        }
    }

    pub fn sim_time(&self) -> f64 {
        match self {
            Self::AngularMomentum(s) => s.sim_time,
            Self::Pendulum(s) => s.sim_time,
            Self::Generic(s) => s.sim_time,
        }
    }
}

/// Periodic engine state snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub running: bool,
    /// Stopped but not at the start of the timeline
    pub paused: bool,
    pub time: f64,
}

impl SimulationState {
    pub fn new(running: bool, time: f64) -> Self {
        Self {
            running,
            paused: !running && time > 0.0,
            time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_tagging() {
        let sample = TelemetrySample::Pendulum(PendulumSample {
            experiment_id: "2".into(),
            timestamp: Utc::now(),
            sim_time: 1.0,
            is_running: true,
            angle: 0.1,
            angular_velocity: 0.0,
            period: None,
        });
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value["experiment"], "pendulum");
        assert_eq!(value["is_running"], true);
        assert!(value.get("period").is_none());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_simulation_state_paused() {
        assert!(SimulationState::new(false, 3.0).paused);
        assert!(!SimulationState::new(false, 0.0).paused);
        assert!(!SimulationState::new(true, 3.0).paused);

        let value = serde_json::to_value(SimulationState::new(true, 1.5)).unwrap();
        assert_eq!(value, serde_json::json!({"running": true, "paused": false, "time": 1.5}));
    }
}
