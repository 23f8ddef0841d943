//! FrameSource trait - upstream renderer abstraction
//!
//! A renderer exposes capture targets (viewports, render products). The
//! frame pipeline attaches a capture channel to a target and polls it once
//! per output tick.

use serde::{Deserialize, Serialize};

use crate::{ContractError, RawFrame};

/// Opaque reference to something the renderer can capture from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef(pub String);

impl TargetRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a capture channel created on a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: u64,
    pub target: TargetRef,
    pub width: u32,
    pub height: u32,
}

/// Outcome of one capture attempt
///
/// Drives fallback ordering: only `Frame` stops the strategy walk.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureAttemptResult {
    Frame(RawFrame),
    /// Channel is attached but has nothing new yet
    Empty,
    /// No channel, no target, or the attempt timed out
    Unavailable,
    /// The attempt failed; the cause is kept for logging
    TransientError(String),
}

impl CaptureAttemptResult {
    pub fn is_frame(&self) -> bool {
        matches!(self, Self::Frame(_))
    }

    /// Stable label used in metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Frame(_) => "frame",
            Self::Empty => "empty",
            Self::Unavailable => "unavailable",
            Self::TransientError(_) => "error",
        }
    }
}

/// Renderer capture interface
///
/// `poll_latest_frame` must be non-blocking or boundedly blocking; callers
/// still wrap it in their own timeout.
#[trait_variant::make(FrameSource: Send)]
pub trait LocalFrameSource {
    /// Source name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Currently active capture target, if the renderer has one
    async fn list_active_capture_target(&self) -> Option<TargetRef>;

    /// Attach a capture channel of the given size to `target`
    async fn create_capture_channel(
        &self,
        target: &TargetRef,
        width: u32,
        height: u32,
    ) -> Result<ChannelHandle, ContractError>;

    /// Latest frame produced on `channel`
    async fn poll_latest_frame(&self, channel: &ChannelHandle) -> CaptureAttemptResult;

    /// Release the channel
    async fn destroy_channel(&self, channel: ChannelHandle);
}
