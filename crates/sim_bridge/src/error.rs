//! Sim bridge error types

use contracts::{ContractError, FailureKind};
use thiserror::Error;

/// Stand-in engine and renderer errors
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Experiment id not registered with the engine
    #[error("engine has no experiment '{experiment_id}'")]
    UnknownExperiment { experiment_id: String },

    /// Failure injected by a test
    #[error("injected failure in '{operation}'")]
    Injected { operation: String },

    /// Renderer has no target to attach to
    #[error("render target '{target}' is not available")]
    TargetUnavailable { target: String },

    /// Background producer could not be started
    #[error("failed to start frame producer: {message}")]
    Producer { message: String },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl BridgeError {
    pub fn unknown_experiment(experiment_id: impl Into<String>) -> Self {
        Self::UnknownExperiment {
            experiment_id: experiment_id.into(),
        }
    }

    pub fn injected(operation: impl Into<String>) -> Self {
        Self::Injected {
            operation: operation.into(),
        }
    }

    pub fn target_unavailable(target: impl Into<String>) -> Self {
        Self::TargetUnavailable {
            target: target.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownExperiment { .. } => FailureKind::EntityNotResolved,
            Self::Injected { .. } => FailureKind::TransientCaptureFailure,
            Self::TargetUnavailable { .. } | Self::Producer { .. } => {
                FailureKind::ConfigurationUnavailable
            }
            Self::Contract(e) => e.kind().unwrap_or(FailureKind::ConfigurationUnavailable),
        }
    }
}

impl From<BridgeError> for ContractError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Contract(inner) => inner,
            BridgeError::UnknownExperiment { experiment_id } => {
                ContractError::UnknownExperiment { experiment_id }
            }
            BridgeError::TargetUnavailable { target } => {
                ContractError::capture_unavailable(target, "no active render target")
            }
            other => ContractError::engine("sim_bridge", other.to_string()),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, BridgeError>;
