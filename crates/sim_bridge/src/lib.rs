//! # Sim Bridge
//!
//! In-process stand-ins for the simulation engine and its renderer.
//!
//! Responsibilities:
//! - `MockEngine`: `ExperimentManager` with a disk/ring rig and a damped pendulum
//! - `SyntheticRenderer`: render-product style `FrameSource` (float RGBA)
//! - `ViewportGrabber`: viewport style `FrameSource` (8-bit RGBA from a producer thread)
//! - Call recording and failure injection for tests

pub mod engine;
pub mod error;
pub mod renderer;
pub mod viewport;

pub use engine::{EngineCall, MockEngine};
pub use error::{BridgeError, Result};
pub use renderer::{RendererConfig, SyntheticRenderer};
pub use viewport::{ViewportConfig, ViewportGrabber};
