//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Listener could not be bound
    #[error("Failed to bind {channel} channel on {addr}: {message}")]
    Bind {
        channel: &'static str,
        addr: String,
        message: String,
    },

    /// Configured sinks could not be attached
    #[error("Failed to attach sinks: {message}")]
    Sinks { message: String },

    /// Metrics exporter could not be installed
    #[error("Failed to start metrics endpoint on port {port}: {message}")]
    Metrics { port: u16, message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn bind(channel: &'static str, addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bind {
            channel,
            addr: addr.into(),
            message: message.into(),
        }
    }

    pub fn sinks(message: impl Into<String>) -> Self {
        Self::Sinks {
            message: message.into(),
        }
    }

    pub fn metrics(port: u16, message: impl Into<String>) -> Self {
        Self::Metrics {
            port,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_channel() {
        let err = CliError::bind("control", "0.0.0.0:30000", "address in use");
        assert_eq!(
            err.to_string(),
            "Failed to bind control channel on 0.0.0.0:30000: address in use"
        );
        assert!(CliError::config_not_found("x.toml")
            .to_string()
            .contains("x.toml"));
    }
}
