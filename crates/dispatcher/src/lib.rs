//! # Dispatcher
//!
//! 控制面与输出扇出模块。
//!
//! 负责：
//! - 订阅者注册表：快照后广播，失败者在本轮结束后移除
//! - 命令执行：去抖、reset 互斥门、暂停-修改-恢复
//! - 配置的输出 sink (日志、PNG 快照)

pub mod command;
pub mod debounce;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod registry;
pub mod sinks;

pub use command::{CommandDispatcher, CommandDispatcherBuilder, DispatchOutcome, DispatcherConfig};
pub use debounce::{DebounceEntry, Debouncer, Decision};
pub use error::DispatchError;
pub use gate::{GatePermit, ResetGate};
pub use metrics::{CommandMetrics, CommandSnapshot, RegistryMetrics, RegistrySnapshot};
pub use registry::{SubscriberId, SubscriberRegistry};
pub use sinks::{attach_configured, LogSink, SnapshotSink, SnapshotSinkConfig};
