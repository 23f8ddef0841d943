//! Dispatch error types

use contracts::{ContractError, FailureKind};
use thiserror::Error;

/// Command dispatch errors
///
/// Every variant is reported back to the originating connection; none of
/// them stops a loop or affects another connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Experiment id not present in the catalog
    #[error("unknown experiment '{experiment_id}'")]
    UnknownExperiment { experiment_id: String },

    /// Command needs an active experiment
    #[error("'{command}' requires an active experiment, send enter_experiment first")]
    NoActiveExperiment { command: String },

    /// Parameter not declared by the active experiment
    #[error("experiment '{experiment_id}' has no parameter '{name}'")]
    UnknownParameter { experiment_id: String, name: String },

    /// Value rejected by the parameter bounds
    #[error("value {value} for '{name}' is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: String,
        max: String,
    },

    /// Parameter target still absent after every retry
    #[error("'{name}' not applied: entity '{entity_path}' unresolved after {attempts} attempts")]
    EntityNotResolved {
        name: String,
        entity_path: String,
        attempts: u32,
    },

    /// Another command changed the session while a parameter was being applied
    #[error("'{name}' abandoned: simulation state changed while it was being applied")]
    Superseded { name: String },

    /// Reset gate could not be acquired in time
    #[error("reset already in progress (waited {waited_ms} ms)")]
    GateTimeout { waited_ms: u64 },

    /// Configured sink could not be created
    #[error("failed to create sink '{sink}': {message}")]
    SinkCreation { sink: String, message: String },

    /// Engine or subscriber error
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl DispatchError {
    pub fn unknown_experiment(experiment_id: impl Into<String>) -> Self {
        Self::UnknownExperiment {
            experiment_id: experiment_id.into(),
        }
    }

    pub fn no_active_experiment(command: impl Into<String>) -> Self {
        Self::NoActiveExperiment {
            command: command.into(),
        }
    }

    pub fn unknown_parameter(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownParameter {
            experiment_id: experiment_id.into(),
            name: name.into(),
        }
    }

    pub fn sink_creation(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Taxonomy bucket of this error, if it belongs to one
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::EntityNotResolved { .. } => Some(FailureKind::EntityNotResolved),
            Self::GateTimeout { .. } => Some(FailureKind::SuppressedDuplicate),
            Self::Contract(e) => e.kind(),
            _ => None,
        }
    }
}

/// Dispatch Result type alias
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = DispatchError::EntityNotResolved {
            name: "mass".into(),
            entity_path: "/World/exp1/disk".into(),
            attempts: 3,
        };
        assert_eq!(err.kind(), Some(FailureKind::EntityNotResolved));
        assert!(err.to_string().contains("3 attempts"));

        let err: DispatchError = ContractError::entity_not_resolved("/World/x").into();
        assert_eq!(err.kind(), Some(FailureKind::EntityNotResolved));

        assert_eq!(DispatchError::unknown_experiment("9").kind(), None);
    }
}
