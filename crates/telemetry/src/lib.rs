//! # Telemetry
//!
//! 遥测广播模块。
//!
//! 负责：
//! - 周期读取引擎状态，按当前实验派生物理量 (角动量、摆动周期)
//! - 访问策略执行：无用户控制时强制停止引擎，并限频通知
//! - 定期广播 `simulation_state`
//!
//! ## 使用示例
//!
//! ```ignore
//! use telemetry::TelemetryBroadcastLoop;
//!
//! let monitor = TelemetryBroadcastLoop::new(engine, messages, policy, session, &blueprint.telemetry)
//!     .with_experiments(blueprint.experiments.clone())
//!     .with_suppressor(suppressor);
//!
//! monitor.start(&shutdown);
//! // ...
//! monitor.stop().await;
//! ```

mod derive;
mod error;
mod monitor;
mod period;

pub use derive::{quantity, TelemetryDeriver};
pub use error::{Result, TelemetryError};
pub use monitor::{MonitorState, TelemetryBroadcastLoop, TelemetryLoopConfig};
pub use period::{PeriodConfig, PeriodEstimator};
