//! # Contracts
//!
//! Frozen interface contracts shared by every labcast crate.
//! Business crates depend only on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Wall-clock timestamps are UTC (`chrono::DateTime<Utc>`)
//! - Simulation time is reported by the engine in seconds (f64)
//! - Loop cadences use the tokio clock so tests can pause and advance it

mod blueprint;
mod capture;
mod error;
mod experiment;
mod frame;
mod message;
mod policy;
mod session;
mod subscriber;
mod telemetry;

pub use blueprint::*;
pub use capture::{CaptureAttemptResult, ChannelHandle, FrameSource, LocalFrameSource, TargetRef};
pub use error::*;
pub use experiment::{ExperimentManager, LocalExperimentManager, ScalarState};
pub use frame::*;
pub use message::*;
pub use policy::{AccessPolicy, AccessPolicyState};
pub use session::{ExperimentSession, SessionState};
pub use subscriber::Subscriber;
pub use telemetry::*;
