//! 运行指标记录模块
//!
//! 视频帧、采集尝试、遥测广播、命令处理、订阅者数量。

use contracts::FailureKind;
use metrics::{counter, gauge, histogram};

/// 记录一帧输出
///
/// `origin` 为 `FrameOrigin::label()` (live / warmup / placeholder / safe)
pub fn record_frame_emitted(origin: &str) {
    counter!("labcast_frames_emitted_total", "origin" => origin.to_string()).increment(1);
}

/// 记录一次采集尝试
pub fn record_capture_attempt(strategy: &str, outcome: &str) {
    counter!(
        "labcast_capture_attempts_total",
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录采集延迟
pub fn record_capture_latency_ms(strategy: &str, latency_ms: f64) {
    histogram!("labcast_capture_latency_ms", "strategy" => strategy.to_string())
        .record(latency_ms);
}

/// 记录遥测广播
pub fn record_telemetry_broadcast(experiment: &str, delivered: usize) {
    counter!("labcast_telemetry_broadcasts_total", "experiment" => experiment.to_string())
        .increment(1);
    histogram!("labcast_telemetry_fanout").record(delivered as f64);
}

/// 记录一次自动停止
pub fn record_auto_stop_enforced() {
    counter!("labcast_auto_stop_enforced_total").increment(1);
}

/// 记录命令处理结果
///
/// `outcome`: executed / suppressed / failed
pub fn record_command(command: &str, outcome: &str) {
    counter!(
        "labcast_commands_total",
        "command" => command.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录订阅者数量
pub fn record_subscriber_count(registry: &str, count: usize) {
    gauge!("labcast_subscribers", "registry" => registry.to_string()).set(count as f64);
}

/// 记录订阅者移除
pub fn record_subscriber_removed(registry: &str) {
    counter!("labcast_subscribers_removed_total", "registry" => registry.to_string())
        .increment(1);
}

/// 记录被抑制的失败日志
pub fn record_suppressed_failure(kind: FailureKind) {
    counter!("labcast_suppressed_failures_total", "kind" => kind.as_str()).increment(1);
}

/// 在线统计 (Welford)，只保留计数、极值与二阶矩
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        if self.count == 1 {
            (self.min, self.max, self.mean, self.m2) = (value, value, value, 0.0);
            return;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn summary(&self) -> StatsSummary {
        let std_dev = if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        };
        StatsSummary {
            count: self.count,
            min: self.min,
            max: self.max,
            mean: self.mean,
            std_dev,
        }
    }
}

/// Frozen view of a [`RunningStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// 样本标准差
    pub std_dev: f64,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            return write!(f, "n/a");
        }
        write!(
            f,
            "mean {:.2} ± {:.2} [{:.2}, {:.2}] n={}",
            self.mean, self.std_dev, self.min, self.max, self.count
        )
    }
}
