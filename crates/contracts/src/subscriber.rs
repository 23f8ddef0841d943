//! Subscriber trait - broadcast output interface
//!
//! A subscriber is one live output channel: a WebSocket connection, a log,
//! a snapshot directory. Registries hold them as trait objects.

use async_trait::async_trait;

use crate::ContractError;

/// Output channel for messages of type `M`
///
/// A failed `send` means the channel is dead; the owning registry drops it.
#[async_trait]
pub trait Subscriber<M: Sync>: Send {
    /// Subscriber name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one message
    ///
    /// # Errors
    /// Returns send error (should include context)
    async fn send(&mut self, message: &M) -> Result<(), ContractError>;

    /// Close the channel
    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}
