//! CaptureStrategy - one way of getting a frame out of the renderer
//!
//! The pipeline walks an ordered list of strategies each tick. The only
//! implementation attaches a capture channel to the renderer's active target
//! and polls it; the list order decides which renderer path is preferred.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contracts::{CaptureAttemptResult, ChannelHandle, FailureKind, FrameSource};
use observability::LogSuppressor;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::config::PipelineConfig;

const SITE_INIT: &str = "capture_init";
const SITE_POLL: &str = "capture_poll";

/// Diagnostic view of one strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyStatus {
    pub name: String,
    /// A capture channel is attached
    pub initialized: bool,
    /// Channel creation attempts in the current round
    pub init_attempts: u32,
    pub consecutive_failures: u32,
    pub frames: u64,
}

/// One capture path, tried in priority order
#[async_trait]
pub trait CaptureStrategy: Send {
    fn name(&self) -> &str;

    /// One bounded capture attempt; never errors, failures are outcomes
    async fn capture(&mut self) -> CaptureAttemptResult;

    /// Drop any channel and forget retry budgets
    async fn reset(&mut self);

    fn status(&self) -> StrategyStatus;
}

/// Limits shared by channel-based strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyLimits {
    pub width: u32,
    pub height: u32,
    pub capture_timeout: Duration,
    pub init_max_retries: u32,
    pub reinit_after_failures: u32,
}

impl From<&PipelineConfig> for StrategyLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            capture_timeout: config.capture_timeout,
            init_max_retries: config.init_max_retries,
            reinit_after_failures: config.reinit_after_failures,
        }
    }
}

/// Strategy over a [`FrameSource`] capture channel
///
/// The channel is created lazily. Creation is attempted at most
/// `init_max_retries` times in a row; once that budget is spent, a new round
/// starts only after `reinit_after_failures` failed ticks. An attached
/// channel that yields nothing for `reinit_after_failures` ticks is torn
/// down and recreated.
pub struct ChannelCaptureStrategy<S> {
    name: String,
    source: Arc<S>,
    limits: StrategyLimits,
    suppressor: Arc<LogSuppressor>,
    channel: Option<ChannelHandle>,
    init_attempts: u32,
    consecutive_failures: u32,
    frames: u64,
}

impl<S: FrameSource + Sync + 'static> ChannelCaptureStrategy<S> {
    pub fn new(
        name: impl Into<String>,
        source: Arc<S>,
        limits: StrategyLimits,
        suppressor: Arc<LogSuppressor>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            limits,
            suppressor,
            channel: None,
            init_attempts: 0,
            consecutive_failures: 0,
            frames: 0,
        }
    }

    fn init_budget_left(&self) -> bool {
        self.init_attempts < self.limits.init_max_retries
    }

    fn fail(&mut self, result: CaptureAttemptResult) -> CaptureAttemptResult {
        self.consecutive_failures += 1;
        result
    }

    async fn initialize(&mut self) -> Result<(), CaptureAttemptResult> {
        self.init_attempts += 1;

        let Some(target) = self.source.list_active_capture_target().await else {
            self.suppressor.report(
                SITE_INIT,
                FailureKind::ConfigurationUnavailable,
                &format_args!("{}: renderer has no active capture target", self.name),
            );
            return Err(CaptureAttemptResult::Unavailable);
        };

        let create = self
            .source
            .create_capture_channel(&target, self.limits.width, self.limits.height);
        match timeout(self.limits.capture_timeout, create).await {
            Ok(Ok(handle)) => {
                info!(
                    strategy = %self.name,
                    source = self.source.name(),
                    target = %target,
                    channel = handle.id,
                    attempts = self.init_attempts,
                    "Capture channel attached"
                );
                self.suppressor
                    .clear(SITE_INIT, FailureKind::ConfigurationUnavailable);
                self.channel = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let kind = e.kind().unwrap_or(FailureKind::ConfigurationUnavailable);
                self.suppressor
                    .report(SITE_INIT, kind, &format_args!("{}: {e}", self.name));
                Err(CaptureAttemptResult::TransientError(e.to_string()))
            }
            Err(_) => {
                self.suppressor.report(
                    SITE_INIT,
                    FailureKind::ConfigurationUnavailable,
                    &format_args!("{}: channel creation timed out", self.name),
                );
                Err(CaptureAttemptResult::Unavailable)
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!(strategy = %self.name, channel = channel.id, "Capture channel released");
            self.source.destroy_channel(channel).await;
        }
    }
}

#[async_trait]
impl<S: FrameSource + Sync + 'static> CaptureStrategy for ChannelCaptureStrategy<S> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "strategy_capture", skip(self), fields(strategy = %self.name))]
    async fn capture(&mut self) -> CaptureAttemptResult {
        if self.channel.is_none() {
            if !self.init_budget_left() {
                if self.consecutive_failures < self.limits.reinit_after_failures {
                    return self.fail(CaptureAttemptResult::Unavailable);
                }
                debug!(strategy = %self.name, "Starting a new initialization round");
                self.init_attempts = 0;
                self.consecutive_failures = 0;
            }
            if let Err(result) = self.initialize().await {
                return self.fail(result);
            }
        }

        let Some(channel) = self.channel.as_ref() else {
            return self.fail(CaptureAttemptResult::Unavailable);
        };
        let result = timeout(self.limits.capture_timeout, self.source.poll_latest_frame(channel))
            .await
            .unwrap_or(CaptureAttemptResult::Unavailable);

        match result {
            CaptureAttemptResult::Frame(_) => {
                self.consecutive_failures = 0;
                self.init_attempts = 0;
                self.frames += 1;
                self.suppressor
                    .clear(SITE_POLL, FailureKind::TransientCaptureFailure);
                result
            }
            other => {
                if let CaptureAttemptResult::TransientError(cause) = &other {
                    self.suppressor.report(
                        SITE_POLL,
                        FailureKind::TransientCaptureFailure,
                        &format_args!("{}: {cause}", self.name),
                    );
                }
                let other = self.fail(other);
                if self.consecutive_failures >= self.limits.reinit_after_failures {
                    info!(
                        strategy = %self.name,
                        failures = self.consecutive_failures,
                        "Channel produced nothing, recreating"
                    );
                    self.teardown().await;
                    self.init_attempts = 0;
                    self.consecutive_failures = 0;
                }
                other
            }
        }
    }

    async fn reset(&mut self) {
        self.teardown().await;
        self.init_attempts = 0;
        self.consecutive_failures = 0;
    }

    fn status(&self) -> StrategyStatus {
        StrategyStatus {
            name: self.name.clone(),
            initialized: self.channel.is_some(),
            init_attempts: self.init_attempts,
            consecutive_failures: self.consecutive_failures,
            frames: self.frames,
        }
    }
}
