//! FrameAcquisitionPipeline main entry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use contracts::{CaptureAttemptResult, CanonicalFrame, FrameOrigin, RawFrame, VideoFrame};
use dispatcher::SubscriberRegistry;
use observability::{LogSuppressor, StatsSummary};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::{PipelineConfig, PipelineMetrics, PipelineSnapshot};
use crate::normalizer::FrameNormalizer;
use crate::placeholder;
use crate::strategy::{CaptureStrategy, StrategyStatus};

const SITE_NORMALIZE: &str = "frame_normalize";

/// Diagnostic view of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    /// Last emitted presentation counter
    pub pts: u64,
    pub warmup_remaining: u32,
    pub strategies: Vec<StrategyStatus>,
}

/// Frame Acquisition Pipeline
///
/// Produces one canonical frame per tick: warm-up frames first, then the
/// first strategy that yields a frame, else a placeholder. Nothing leaves
/// the pipeline without passing the normalizer.
pub struct FrameAcquisitionPipeline {
    config: PipelineConfig,
    normalizer: FrameNormalizer,
    strategies: Vec<Box<dyn CaptureStrategy>>,
    suppressor: Arc<LogSuppressor>,
    metrics: Arc<PipelineMetrics>,
    warmup_remaining: u32,
    pts: u64,
    last_emit: Option<Instant>,
}

impl FrameAcquisitionPipeline {
    pub fn new(config: PipelineConfig, suppressor: Arc<LogSuppressor>) -> Self {
        Self {
            normalizer: FrameNormalizer::new(config.width, config.height),
            strategies: Vec::new(),
            suppressor,
            metrics: Arc::new(PipelineMetrics::new()),
            warmup_remaining: config.warmup_frames,
            pts: 0,
            last_emit: None,
            config,
        }
    }

    /// Append a strategy; earlier strategies take priority
    pub fn with_strategy<S: CaptureStrategy + 'static>(mut self, strategy: S) -> Self {
        self.add_strategy(Box::new(strategy));
        self
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn CaptureStrategy>) {
        debug!(strategy = strategy.name(), priority = self.strategies.len(), "Strategy registered");
        self.strategies.push(strategy);
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            pts: self.pts,
            warmup_remaining: self.warmup_remaining,
            strategies: self.strategies.iter().map(|s| s.status()).collect(),
        }
    }

    /// Forget every strategy's channel and retry budget
    pub async fn reset_strategies(&mut self) {
        for strategy in &mut self.strategies {
            strategy.reset().await;
        }
        info!(strategies = self.strategies.len(), "Capture strategies reset");
    }

    /// Wait for the next tick, then produce a frame
    pub async fn next_frame(&mut self) -> VideoFrame {
        if let Some(last) = self.last_emit {
            let deadline = last + self.config.frame_interval();
            if Instant::now() < deadline {
                sleep_until(deadline).await;
            }
        }
        let frame = self.produce().await;
        self.last_emit = Some(Instant::now());
        frame
    }

    /// Produce a frame immediately, without pacing
    #[instrument(name = "pipeline_produce", skip(self), fields(pts = self.pts + 1))]
    pub async fn produce(&mut self) -> VideoFrame {
        let (origin, frame) = if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            (
                FrameOrigin::Warmup,
                placeholder::warmup_frame(self.config.width, self.config.height),
            )
        } else {
            match self.capture().await {
                Some((strategy, raw)) => self.normalize(strategy, &raw),
                None => (
                    FrameOrigin::Placeholder,
                    placeholder::test_pattern(self.config.width, self.config.height),
                ),
            }
        };

        self.pts += 1;
        VideoFrame {
            pts: self.pts,
            captured_at: Utc::now(),
            origin,
            frame,
        }
    }

    /// Walk the strategies in order, stop at the first frame
    async fn capture(&mut self) -> Option<(String, RawFrame)> {
        for strategy in &mut self.strategies {
            let started = Instant::now();
            let result = strategy.capture().await;
            observability::record_capture_attempt(strategy.name(), result.outcome());

            if let CaptureAttemptResult::Frame(raw) = result {
                self.metrics
                    .record_capture_latency(strategy.name(), started.elapsed().as_secs_f64() * 1000.0);
                return Some((strategy.name().to_string(), raw));
            }
        }
        None
    }

    fn normalize(&self, strategy: String, raw: &RawFrame) -> (FrameOrigin, CanonicalFrame) {
        match self.normalizer.try_normalize(raw) {
            Ok(frame) => {
                self.suppressor.clear(SITE_NORMALIZE, contracts::FailureKind::TransientCaptureFailure);
                (FrameOrigin::Live { strategy }, frame)
            }
            Err(e) => {
                self.suppressor
                    .report(SITE_NORMALIZE, e.kind(), &format_args!("{strategy}: {e}"));
                (FrameOrigin::Safe, self.normalizer.safe_frame())
            }
        }
    }

    /// Run on a background task, broadcasting to `video`
    ///
    /// While nobody is subscribed the pipeline idles instead of capturing.
    pub fn spawn(
        self,
        video: Arc<SubscriberRegistry<VideoFrame>>,
        cancel: CancellationToken,
    ) -> PipelineHandle {
        let shared = Arc::new(Shared {
            status: Mutex::new(self.status()),
            reset_requested: AtomicBool::new(false),
        });
        let metrics = self.metrics();
        let task = tokio::spawn(self.run(video, Arc::clone(&shared), cancel.clone()));
        PipelineHandle {
            shared,
            metrics,
            cancel,
            task,
        }
    }

    #[instrument(name = "pipeline_run", skip_all)]
    async fn run(
        mut self,
        video: Arc<SubscriberRegistry<VideoFrame>>,
        shared: Arc<Shared>,
        cancel: CancellationToken,
    ) {
        let interval = self.config.frame_interval();
        info!(
            fps = self.config.fps,
            width = self.config.width,
            height = self.config.height,
            strategies = self.strategies.len(),
            "Frame pipeline started"
        );

        loop {
            if shared.reset_requested.swap(false, Ordering::AcqRel) {
                self.reset_strategies().await;
            }

            if video.is_empty() {
                self.metrics.record_idle();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(interval) => continue,
                }
            }

            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = self.next_frame() => frame,
            };

            let delivered = video.broadcast(&frame).await;
            self.metrics.record_frame(&frame.origin, delivered);
            *shared.status.lock() = self.status();

            if frame.pts.is_multiple_of(300) {
                debug!(pts = frame.pts, origin = frame.origin.label(), delivered, "Frame pipeline progress");
            }
        }

        for strategy in &mut self.strategies {
            strategy.reset().await;
        }
        *shared.status.lock() = self.status();
        info!(frames = self.pts, "Frame pipeline stopped");
    }
}

struct Shared {
    status: Mutex<PipelineStatus>,
    reset_requested: AtomicBool,
}

/// Handle to a running pipeline
pub struct PipelineHandle {
    shared: Arc<Shared>,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Status as of the last emitted frame
    pub fn status(&self) -> PipelineStatus {
        self.shared.status.lock().clone()
    }

    pub fn metrics(&self) -> PipelineSnapshot {
        self.metrics.snapshot()
    }

    pub fn capture_latency(&self) -> StatsSummary {
        self.metrics.capture_latency()
    }

    /// Ask the pipeline to reset its strategies before the next tick
    pub fn request_reset(&self) {
        self.shared.reset_requested.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the loop to release its channels
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        if tokio::time::timeout(grace, self.task).await.is_err() {
            debug!("Frame pipeline did not stop within the grace period");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::{rgb_frame, ScriptedSource};
    use crate::strategy::{ChannelCaptureStrategy, StrategyLimits};
    use async_trait::async_trait;
    use contracts::{ContractError, PixelData, Subscriber};

    fn config(warmup_frames: u32) -> PipelineConfig {
        PipelineConfig {
            width: 4,
            height: 4,
            fps: 10,
            capture_timeout: Duration::from_millis(50),
            warmup_frames,
            init_max_retries: 3,
            reinit_after_failures: 5,
        }
    }

    fn pipeline_with(source: &Arc<ScriptedSource>, warmup: u32) -> FrameAcquisitionPipeline {
        let config = config(warmup);
        let suppressor = Arc::new(LogSuppressor::default());
        let strategy = ChannelCaptureStrategy::new(
            "render_product",
            Arc::clone(source),
            StrategyLimits::from(&config),
            Arc::clone(&suppressor),
        );
        FrameAcquisitionPipeline::new(config, suppressor).with_strategy(strategy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_warmup_then_live() {
        let source = Arc::new(ScriptedSource::with_target());
        source.push(rgb_frame());
        let mut pipeline = pipeline_with(&source, 2);

        assert_eq!(pipeline.produce().await.origin, FrameOrigin::Warmup);
        assert_eq!(pipeline.produce().await.origin, FrameOrigin::Warmup);
        assert_eq!(source.creates.load(Ordering::SeqCst), 0);

        let live = pipeline.produce().await;
        assert_eq!(
            live.origin,
            FrameOrigin::Live { strategy: "render_product".into() }
        );
        assert_eq!(live.pts, 3);
        assert_eq!((live.frame.width(), live.frame.height()), (4, 4));
        assert_eq!(live.frame.pixel(3, 3), Some([200, 200, 200]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_strategy_gives_placeholder() {
        let mut pipeline = FrameAcquisitionPipeline::new(config(0), Arc::new(LogSuppressor::default()));
        let frame = pipeline.produce().await;
        assert_eq!(frame.origin, FrameOrigin::Placeholder);
        assert_eq!(frame.frame, placeholder::test_pattern(4, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_order() {
        let first = Arc::new(ScriptedSource::default());
        let second = Arc::new(ScriptedSource::with_target());
        second.push(rgb_frame());

        let config = config(0);
        let suppressor = Arc::new(LogSuppressor::default());
        let limits = StrategyLimits::from(&config);
        let mut pipeline = FrameAcquisitionPipeline::new(config, Arc::clone(&suppressor))
            .with_strategy(ChannelCaptureStrategy::new("render_product", first, limits, Arc::clone(&suppressor)))
            .with_strategy(ChannelCaptureStrategy::new("viewport", second, limits, suppressor));

        let frame = pipeline.produce().await;
        assert_eq!(frame.origin, FrameOrigin::Live { strategy: "viewport".into() });
        let status = pipeline.status();
        assert_eq!(status.strategies[0].consecutive_failures, 1);
        assert_eq!(status.strategies[1].frames, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unnormalizable_frame_is_safe() {
        let source = Arc::new(ScriptedSource::with_target());
        source.push(CaptureAttemptResult::Frame(RawFrame::new(2, 2, 2, PixelData::U8(vec![1; 8]))));
        let mut pipeline = pipeline_with(&source, 0);
        let frame = pipeline.produce().await;
        assert_eq!(frame.origin, FrameOrigin::Safe);
        assert_eq!(frame.frame.pixel(0, 0), Some(crate::normalizer::SAFE_COLOR));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_holds_frame_interval() {
        let source = Arc::new(ScriptedSource::with_target());
        let mut pipeline = pipeline_with(&source, 0);

        let start = Instant::now();
        pipeline.next_frame().await;
        pipeline.next_frame().await;
        pipeline.next_frame().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_strategies() {
        let source = Arc::new(ScriptedSource::with_target());
        source.push(rgb_frame());
        let mut pipeline = pipeline_with(&source, 0);
        pipeline.produce().await;
        assert!(pipeline.status().strategies[0].initialized);

        pipeline.reset_strategies().await;
        assert!(!pipeline.status().strategies[0].initialized);
        assert_eq!(source.destroys.load(Ordering::SeqCst), 1);
    }

    struct Collector {
        frames: Arc<Mutex<Vec<VideoFrame>>>,
    }

    #[async_trait]
    impl Subscriber<VideoFrame> for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        async fn send(&mut self, frame: &VideoFrame) -> Result<(), ContractError> {
            self.frames.lock().push(frame.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_pipeline_broadcasts_and_stops() {
        let source = Arc::new(ScriptedSource::with_target());
        let pipeline = pipeline_with(&source, 1);
        let video: Arc<SubscriberRegistry<VideoFrame>> = Arc::new(SubscriberRegistry::new("video"));
        let frames = Arc::new(Mutex::new(Vec::new()));
        video.add(Collector {
            frames: Arc::clone(&frames),
        });

        let handle = pipeline.spawn(Arc::clone(&video), CancellationToken::new());
        sleep(Duration::from_millis(450)).await;
        handle.request_reset();
        sleep(Duration::from_millis(100)).await;

        let metrics = handle.metrics();
        handle.shutdown(Duration::from_secs(1)).await;

        let frames = frames.lock();
        assert!(frames.len() >= 4, "got {} frames", frames.len());
        assert_eq!(frames[0].origin, FrameOrigin::Warmup);
        assert!(frames.windows(2).all(|w| w[1].pts > w[0].pts));
        assert_eq!(metrics.warmup, 1);
        assert!(source.destroys.load(Ordering::SeqCst) >= 1);
    }
}
