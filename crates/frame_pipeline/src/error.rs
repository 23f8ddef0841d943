//! Frame pipeline 错误类型

use contracts::{ContractError, FailureKind};
use thiserror::Error;

/// Frame pipeline 错误
///
/// 只在管线内部流动；对外总是降级为安全帧或占位帧。
#[derive(Debug, Error)]
pub enum FrameError {
    /// 缓冲区长度与声明尺寸不符
    #[error("malformed buffer: {width}x{height}x{channels} declared, {samples} samples")]
    MalformedBuffer {
        width: u32,
        height: u32,
        channels: u32,
        samples: usize,
    },

    /// 不支持的通道数
    #[error("unsupported channel count {channels}")]
    UnsupportedChannels { channels: u32 },

    /// 缩放失败
    #[error("resize failed: {message}")]
    Resize { message: String },

    /// 上游契约错误
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl FrameError {
    pub fn resize(message: impl Into<String>) -> Self {
        Self::Resize {
            message: message.into(),
        }
    }

    /// 失败分类
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Contract(e) => e.kind().unwrap_or(FailureKind::TransientCaptureFailure),
            _ => FailureKind::TransientCaptureFailure,
        }
    }
}

/// Frame pipeline Result 类型别名
pub type Result<T> = std::result::Result<T, FrameError>;
