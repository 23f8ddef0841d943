//! Pipeline configuration and metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use contracts::{even_dimension, FrameOrigin, VideoConfig};
use observability::{RunningStats, StatsSummary};
use parking_lot::Mutex;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Output size, always even
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Bound on each capture call
    pub capture_timeout: Duration,
    /// Placeholder frames before the first capture attempt
    pub warmup_frames: u32,
    /// Channel creation attempts per round
    pub init_max_retries: u32,
    /// Failed ticks before a channel is torn down or init is retried
    pub reinit_after_failures: u32,
}

impl PipelineConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

impl From<&VideoConfig> for PipelineConfig {
    fn from(video: &VideoConfig) -> Self {
        Self {
            width: even_dimension(video.width),
            height: even_dimension(video.height),
            fps: video.fps.max(1),
            capture_timeout: Duration::from_millis(video.capture_timeout_ms),
            warmup_frames: video.warmup_frames,
            init_max_retries: video.init_max_retries.max(1),
            reinit_after_failures: video.reinit_after_failures.max(1),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&VideoConfig::default())
    }
}

/// Pipeline counters
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    frames: AtomicU64,
    live: AtomicU64,
    warmup: AtomicU64,
    placeholder: AtomicU64,
    safe: AtomicU64,
    deliveries: AtomicU64,
    idle_ticks: AtomicU64,
    capture_latency: Mutex<RunningStats>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one emitted frame and how many subscribers got it
    pub fn record_frame(&self, origin: &FrameOrigin, delivered: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        let counter = match origin {
            FrameOrigin::Live { .. } => &self.live,
            FrameOrigin::Warmup => &self.warmup,
            FrameOrigin::Placeholder => &self.placeholder,
            FrameOrigin::Safe => &self.safe,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        observability::record_frame_emitted(origin.label());
    }

    /// Tick skipped because nobody is watching
    pub fn record_idle(&self) {
        self.idle_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Latency of successful captures only
    pub fn record_capture_latency(&self, strategy: &str, latency_ms: f64) {
        self.capture_latency.lock().push(latency_ms);
        observability::record_capture_latency_ms(strategy, latency_ms);
    }

    pub fn capture_latency(&self) -> StatsSummary {
        self.capture_latency.lock().summary()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            live: self.live.load(Ordering::Relaxed),
            warmup: self.warmup.load(Ordering::Relaxed),
            placeholder: self.placeholder.load(Ordering::Relaxed),
            safe: self.safe.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub frames: u64,
    pub live: u64,
    pub warmup: u64,
    pub placeholder: u64,
    pub safe: u64,
    pub deliveries: u64,
    pub idle_ticks: u64,
}
