//! # Frame Pipeline
//!
//! 视频帧采集模块。
//!
//! 负责：
//! - 按优先级依次尝试采集策略，首个成功者胜出
//! - 将任意像素缓冲归一化为偶数尺寸的 8 位 RGB 帧
//! - 按目标帧率节拍输出，失败时输出占位帧而非报错
//!
//! ## 使用示例
//!
//! ```ignore
//! use frame_pipeline::{ChannelCaptureStrategy, FrameAcquisitionPipeline, PipelineConfig, StrategyLimits};
//!
//! let config = PipelineConfig::from(&blueprint.video);
//! let limits = StrategyLimits::from(&config);
//! let pipeline = FrameAcquisitionPipeline::new(config, suppressor.clone())
//!     .with_strategy(ChannelCaptureStrategy::new("render_product", renderer, limits, suppressor));
//! let handle = pipeline.spawn(video_registry, cancel);
//! ```

pub mod config;
pub mod error;
pub mod normalizer;
pub mod pipeline;
pub mod placeholder;
pub mod strategy;

pub use config::{PipelineConfig, PipelineMetrics, PipelineSnapshot};
pub use error::FrameError;
pub use normalizer::{FrameNormalizer, SAFE_COLOR};
pub use pipeline::{FrameAcquisitionPipeline, PipelineHandle, PipelineStatus};
pub use strategy::{CaptureStrategy, ChannelCaptureStrategy, StrategyLimits, StrategyStatus};
