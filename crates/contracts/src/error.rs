//! Layered error definitions
//!
//! Categorized by source: config / capture / engine / command / subscriber

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy
///
/// Every recoverable failure in the station maps to exactly one kind.
/// Log suppression and failure metrics are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retryable capture failure, expected under normal operation
    TransientCaptureFailure,
    /// Upstream renderer or camera not ready yet
    ConfigurationUnavailable,
    /// Target scene entity absent
    EntityNotResolved,
    /// State change attempted while control is locked
    AccessViolation,
    /// Debounce rejection (informational)
    SuppressedDuplicate,
}

impl FailureKind {
    pub const ALL: [FailureKind; 5] = [
        FailureKind::TransientCaptureFailure,
        FailureKind::ConfigurationUnavailable,
        FailureKind::EntityNotResolved,
        FailureKind::AccessViolation,
        FailureKind::SuppressedDuplicate,
    ];

    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientCaptureFailure => "transient_capture_failure",
            Self::ConfigurationUnavailable => "configuration_unavailable",
            Self::EntityNotResolved => "entity_not_resolved",
            Self::AccessViolation => "access_violation",
            Self::SuppressedDuplicate => "suppressed_duplicate",
        }
    }

    /// Whether the failure may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientCaptureFailure | Self::ConfigurationUnavailable | Self::EntityNotResolved
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Capture Errors =====
    /// Renderer has no active capture target or channel
    #[error("capture target unavailable on '{source_name}': {message}")]
    CaptureUnavailable {
        source_name: String,
        message: String,
    },

    /// A single capture attempt failed
    #[error("capture failed on '{source_name}': {message}")]
    CaptureFailed {
        source_name: String,
        message: String,
    },

    // ===== Engine Errors =====
    /// Engine call failed
    #[error("engine error during '{operation}': {message}")]
    Engine { operation: String, message: String },

    /// Scene entity could not be resolved
    #[error("entity not resolved: {entity_path}")]
    EntityNotResolved { entity_path: String },

    /// Experiment is not known to the engine or the catalog
    #[error("unknown experiment '{experiment_id}'")]
    UnknownExperiment { experiment_id: String },

    // ===== Command Errors =====
    /// Inbound command could not be decoded
    #[error("invalid command: {message}")]
    InvalidCommand { message: String },

    /// Access policy rejected a state change
    #[error("access violation: {message}")]
    AccessViolation { message: String },

    // ===== Subscriber Errors =====
    /// Subscriber send failed
    #[error("subscriber '{subscriber}' send error: {message}")]
    SubscriberSend { subscriber: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn capture_unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CaptureUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn capture_failed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CaptureFailed {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create engine error
    pub fn engine(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn entity_not_resolved(entity_path: impl Into<String>) -> Self {
        Self::EntityNotResolved {
            entity_path: entity_path.into(),
        }
    }

    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            message: message.into(),
        }
    }

    /// Create subscriber send error
    pub fn subscriber_send(subscriber: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubscriberSend {
            subscriber: subscriber.into(),
            message: message.into(),
        }
    }

    /// Taxonomy bucket of this error, if it belongs to one
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::CaptureFailed { .. } => Some(FailureKind::TransientCaptureFailure),
            Self::CaptureUnavailable { .. } => Some(FailureKind::ConfigurationUnavailable),
            Self::EntityNotResolved { .. } => Some(FailureKind::EntityNotResolved),
            Self::AccessViolation { .. } => Some(FailureKind::AccessViolation),
            _ => None,
        }
    }
}
