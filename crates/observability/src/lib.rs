//! # Observability
//!
//! 可观测性模块：Tracing 初始化、Prometheus 指标、按失败类型的日志抑制。
//!
//! ```ignore
//! use observability::{LogSuppressor, ObservabilityConfig};
//!
//! observability::init_with_config(ObservabilityConfig::from_verbosity(false, 1))?;
//!
//! let suppressor = LogSuppressor::default();
//! suppressor.report("capture", FailureKind::TransientCaptureFailure, &err);
//! observability::record_frame_emitted("placeholder");
//! ```

pub mod metrics;
pub mod suppress;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

pub use crate::metrics::{
    record_auto_stop_enforced, record_capture_attempt, record_capture_latency_ms, record_command,
    record_frame_emitted, record_subscriber_count, record_subscriber_removed,
    record_suppressed_failure, record_telemetry_broadcast, RunningStats, StatsSummary,
};
pub use crate::suppress::{Emission, LogSuppressor, SuppressionPolicy, SuppressionSummary};

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus 端口，None 表示不导出
    pub metrics_port: Option<u16>,
    /// RUST_LOG 未设置时使用
    pub default_log_level: String,
}

impl ObservabilityConfig {
    /// `-q` wins over any number of `-v`
    pub fn from_verbosity(quiet: bool, verbose: u8) -> Self {
        let level = match (quiet, verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        };
        Self {
            default_log_level: level.to_string(),
            ..Self::default()
        }
    }

    pub fn with_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_port: None,
            default_log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// 结构化 JSON，适合采集
    #[default]
    Json,
    Pretty,
    /// 单行
    Compact,
}

impl LogFormat {
    fn layer(self) -> Box<dyn Layer<Registry> + Send + Sync> {
        match self {
            Self::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true)
                .with_line_number(true)
                .boxed(),
            Self::Pretty => fmt::layer().pretty().boxed(),
            Self::Compact => fmt::layer().compact().with_target(false).boxed(),
        }
    }
}

/// Install the global tracing subscriber, plus the exporter when a port is set
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_log_level));

    tracing_subscriber::registry()
        .with(config.log_format.layer())
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::debug!(
        log_format = ?config.log_format,
        level = %config.default_log_level,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );
    Ok(())
}

/// Prometheus 导出（Tracing 已初始化时使用）
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .with_context(|| format!("Failed to install Prometheus recorder on port {port}"))?;

    tracing::info!(port, "Prometheus metrics endpoint listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.default_log_level, "info");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(ObservabilityConfig::from_verbosity(false, 0).default_log_level, "info");
        assert_eq!(ObservabilityConfig::from_verbosity(false, 1).default_log_level, "debug");
        assert_eq!(ObservabilityConfig::from_verbosity(false, 3).default_log_level, "trace");
        assert_eq!(ObservabilityConfig::from_verbosity(true, 2).default_log_level, "warn");

        let config = ObservabilityConfig::from_verbosity(false, 0).with_format(LogFormat::Compact);
        assert_eq!(config.log_format, LogFormat::Compact);
    }
}
