//! 遥测错误类型

use contracts::{ContractError, FailureKind};
use thiserror::Error;

/// 遥测派生/广播错误
///
/// 均为单次 tick 内的失败，由循环记录后继续下一个 tick。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// 引擎未返回派生所需的标量
    #[error("experiment '{experiment_id}' state has no '{quantity}'")]
    MissingQuantity {
        experiment_id: String,
        quantity: String,
    },

    /// 引擎调用失败
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl TelemetryError {
    pub fn missing_quantity(experiment_id: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self::MissingQuantity {
            experiment_id: experiment_id.into(),
            quantity: quantity.into(),
        }
    }

    /// 日志抑制使用的失败类型
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingQuantity { .. } => FailureKind::EntityNotResolved,
            Self::Contract(e) => e.kind().unwrap_or(FailureKind::ConfigurationUnavailable),
        }
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
