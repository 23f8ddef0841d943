//! Control-plane messages
//!
//! Inbound commands are JSON objects with a `type` discriminator.
//! Outbound messages are `{"type": ..., "data": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CameraPose, ContractError, FailureKind, SimulationState, TelemetrySample};

/// Prefix of parameter-setting commands (`set_<parameter>`)
pub const SET_PREFIX: &str = "set_";

/// Inbound control command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartSimulation,
    StopSimulation,
    Reset,
    EnterExperiment { experiment_id: String },
    SetParameter { name: String, value: f64 },
    SetAutoStop { enabled: bool },
}

impl Command {
    /// Debounce key, identical to the wire `type`
    pub fn name(&self) -> String {
        match self {
            Self::StartSimulation => "start_simulation".to_string(),
            Self::StopSimulation => "stop_simulation".to_string(),
            Self::Reset => "reset".to_string(),
            Self::EnterExperiment { .. } => "enter_experiment".to_string(),
            Self::SetParameter { name, .. } => format!("{SET_PREFIX}{name}"),
            Self::SetAutoStop { .. } => "set_auto_stop".to_string(),
        }
    }

    /// Decode one inbound text frame
    pub fn from_json(text: &str) -> Result<Self, ContractError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ContractError::invalid_command(format!("malformed JSON: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, ContractError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ContractError::invalid_command("missing 'type' field"))?;

        match kind {
            "start_simulation" => Ok(Self::StartSimulation),
            "stop_simulation" => Ok(Self::StopSimulation),
            "reset" => Ok(Self::Reset),
            "enter_experiment" => {
                let experiment_id = value
                    .get("experiment_id")
                    .and_then(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        ContractError::invalid_command("enter_experiment needs 'experiment_id'")
                    })?;
                Ok(Self::EnterExperiment { experiment_id })
            }
            "set_auto_stop" => {
                let enabled = value
                    .get("enabled")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| ContractError::invalid_command("set_auto_stop needs 'enabled'"))?;
                Ok(Self::SetAutoStop { enabled })
            }
            other => match other.strip_prefix(SET_PREFIX) {
                Some(name) if !name.is_empty() => {
                    let value = value.get("value").and_then(Value::as_f64).ok_or_else(|| {
                        ContractError::invalid_command(format!("{other} needs numeric 'value'"))
                    })?;
                    if !value.is_finite() {
                        return Err(ContractError::invalid_command(format!(
                            "{other} value must be finite"
                        )));
                    }
                    Ok(Self::SetParameter {
                        name: name.to_string(),
                        value,
                    })
                }
                _ => Err(ContractError::invalid_command(format!(
                    "unknown command type '{other}'"
                ))),
            },
        }
    }
}

/// Why the engine was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Access policy forced it
    AutoStopped,
    UserRequested,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopNotice {
    pub is_playing: bool,
    pub reason: StopReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentEntered {
    pub experiment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<CameraPose>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamUpdated {
    pub name: String,
    pub value: f64,
    /// Whether the engine accepted the write
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebounceNotice {
    pub command: String,
    pub suppressed_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    pub message: String,
}

/// Outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Telemetry(TelemetrySample),
    SimulationState(SimulationState),
    SimulationStopped(StopNotice),
    ExperimentEntered(ExperimentEntered),
    ParamUpdated(ParamUpdated),
    CommandDebounced(DebounceNotice),
    Error(ErrorReport),
}

impl ServerMessage {
    pub fn error(command: Option<String>, kind: Option<FailureKind>, message: impl Into<String>) -> Self {
        Self::Error(ErrorReport {
            command,
            kind,
            message: message.into(),
        })
    }

    pub fn auto_stopped() -> Self {
        Self::SimulationStopped(StopNotice {
            is_playing: false,
            reason: StopReason::AutoStopped,
        })
    }

    /// Wire `type` of this message
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Telemetry(_) => "telemetry",
            Self::SimulationState(_) => "simulation_state",
            Self::SimulationStopped(_) => "simulation_stopped",
            Self::ExperimentEntered(_) => "experiment_entered",
            Self::ParamUpdated(_) => "param_updated",
            Self::CommandDebounced(_) => "command_debounced",
            Self::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, ContractError> {
        Ok(serde_json::to_string(self)?)
    }
}
