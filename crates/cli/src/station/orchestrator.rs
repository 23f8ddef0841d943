//! Station orchestrator - wires every component and owns their lifecycle.
//!
//! One process-wide access policy, session and pair of registries are built
//! here and handed by reference to the frame pipeline, the telemetry loop,
//! the dispatcher and the transport. All background tasks hang off a single
//! cancellation token.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{AccessPolicy, ExperimentSession, ServerMessage, StationBlueprint, VideoFrame};
use dispatcher::{CommandDispatcher, SubscriberRegistry};
use frame_pipeline::{
    ChannelCaptureStrategy, FrameAcquisitionPipeline, PipelineConfig, PipelineHandle,
    StrategyLimits,
};
use observability::LogSuppressor;
use sim_bridge::{MockEngine, RendererConfig, SyntheticRenderer, ViewportConfig, ViewportGrabber};
use telemetry::TelemetryBroadcastLoop;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::transport;
use super::SessionStats;
use crate::error::CliError;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Build the frame pipeline with strategies in configured priority order
pub fn build_pipeline(
    blueprint: &StationBlueprint,
    engine: &Arc<MockEngine>,
    suppressor: &Arc<LogSuppressor>,
) -> FrameAcquisitionPipeline {
    let config = PipelineConfig::from(&blueprint.video);
    let limits = StrategyLimits::from(&config);
    let mut pipeline = FrameAcquisitionPipeline::new(config, Arc::clone(suppressor));

    for name in &blueprint.video.strategies {
        match name.as_str() {
            "render_product" => {
                let renderer = SyntheticRenderer::new(RendererConfig::default())
                    .with_engine(Arc::clone(engine));
                pipeline.add_strategy(Box::new(ChannelCaptureStrategy::new(
                    name.as_str(),
                    Arc::new(renderer),
                    limits,
                    Arc::clone(suppressor),
                )));
            }
            "viewport" => {
                let grabber = ViewportGrabber::new(ViewportConfig {
                    frequency_hz: f64::from(blueprint.video.fps.max(1)),
                    ..ViewportConfig::default()
                });
                pipeline.add_strategy(Box::new(ChannelCaptureStrategy::new(
                    name.as_str(),
                    Arc::new(grabber),
                    limits,
                    Arc::clone(suppressor),
                )));
            }
            other => warn!(strategy = other, "Unknown capture strategy skipped"),
        }
    }
    pipeline
}

/// A running station
pub struct Station {
    started: Instant,
    engine: Arc<MockEngine>,
    dispatcher: CommandDispatcher<MockEngine>,
    messages: Arc<SubscriberRegistry<ServerMessage>>,
    video: Arc<SubscriberRegistry<VideoFrame>>,
    telemetry: TelemetryBroadcastLoop<MockEngine>,
    pipeline: PipelineHandle,
    suppressor: Arc<LogSuppressor>,
    servers: Vec<JoinHandle<()>>,
    control_addr: SocketAddr,
    video_addr: SocketAddr,
    sinks: usize,
    cancel: CancellationToken,
}

impl Station {
    /// Build every component, bind both listeners and start the loops
    #[instrument(name = "station_start", skip_all)]
    pub async fn start(blueprint: StationBlueprint) -> Result<Self> {
        let started = Instant::now();
        let suppressor = Arc::new(LogSuppressor::default());
        let messages = Arc::new(SubscriberRegistry::<ServerMessage>::new("messages"));
        let video = Arc::new(SubscriberRegistry::<VideoFrame>::new("video"));
        let policy = Arc::new(AccessPolicy::new(blueprint.control.auto_stop));
        let session = Arc::new(ExperimentSession::new());
        let engine = Arc::new(MockEngine::new(&blueprint.experiments));

        let sinks = dispatcher::attach_configured(&blueprint.sinks, &messages, &video)
            .map_err(|e| CliError::sinks(e.to_string()))?;
        if sinks == 0 {
            info!("No sinks configured - output goes to network clients only");
        }

        let dispatcher = CommandDispatcher::builder(Arc::clone(&engine), Arc::clone(&messages))
            .control(&blueprint.control)
            .experiments(blueprint.experiments.clone())
            .policy(Arc::clone(&policy))
            .session(Arc::clone(&session))
            .build();

        let telemetry = TelemetryBroadcastLoop::new(
            Arc::clone(&engine),
            Arc::clone(&messages),
            policy,
            session,
            &blueprint.telemetry,
        )
        .with_experiments(blueprint.experiments.clone())
        .with_suppressor(Arc::clone(&suppressor));

        let server = &blueprint.server;
        let control_listener = transport::bind("control", &server.host, server.control_port).await?;
        let video_listener = transport::bind("video", &server.host, server.video_port).await?;
        let control_addr = control_listener
            .local_addr()
            .context("Failed to read control listener address")?;
        let video_addr = video_listener
            .local_addr()
            .context("Failed to read video listener address")?;

        let cancel = CancellationToken::new();
        let pipeline = build_pipeline(&blueprint, &engine, &suppressor);
        let strategies = pipeline.strategy_count();
        let pipeline = pipeline.spawn(Arc::clone(&video), cancel.child_token());
        telemetry.start(&cancel);
        let servers = vec![
            transport::spawn_control(control_listener, dispatcher.clone(), cancel.child_token()),
            transport::spawn_video(video_listener, Arc::clone(&video), cancel.child_token()),
        ];

        info!(
            control = %control_addr,
            video = %video_addr,
            experiments = blueprint.experiments.len(),
            strategies,
            sinks,
            auto_stop = blueprint.control.auto_stop,
            "Station started"
        );

        Ok(Self {
            started,
            engine,
            dispatcher,
            messages,
            video,
            telemetry,
            pipeline,
            suppressor,
            servers,
            control_addr,
            video_addr,
            sinks,
            cancel,
        })
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn video_addr(&self) -> SocketAddr {
        self.video_addr
    }

    pub fn engine(&self) -> &Arc<MockEngine> {
        &self.engine
    }

    /// Run until `signal` resolves or `timeout` elapses, then shut down
    pub async fn run_until<F>(self, signal: F, timeout: Option<Duration>) -> SessionStats
    where
        F: Future<Output = ()>,
    {
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::pin!(signal, deadline);
        let mut hangup = hangup_listener();
        loop {
            tokio::select! {
                _ = &mut signal => {
                    warn!("Received shutdown signal, stopping station...");
                    break;
                }
                _ = &mut deadline => {
                    info!(timeout_secs = timeout.map(|t| t.as_secs()), "Run time limit reached");
                    break;
                }
                Some(()) = next_hangup(&mut hangup) => self.reinit_video(),
            }
        }
        self.shutdown().await
    }

    /// Drop every capture channel and start the strategies over on the next tick
    pub fn reinit_video(&self) {
        info!(status = ?self.pipeline.status(), "Video re-initialisation requested");
        self.pipeline.request_reset();
    }

    /// Stop every loop, close every subscriber and collect statistics
    #[instrument(name = "station_shutdown", skip_all)]
    pub async fn shutdown(self) -> SessionStats {
        info!("Shutting down station...");
        self.cancel.cancel();

        self.telemetry.stop().await;
        let pipeline = self.pipeline.metrics();
        let pipeline_status = self.pipeline.status();
        let capture_latency = self.pipeline.capture_latency();
        self.pipeline.shutdown(SHUTDOWN_GRACE).await;

        for server in self.servers {
            if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
                warn!("Listener did not stop within the grace period");
            }
        }

        self.messages.close_all().await;
        self.video.close_all().await;
        self.suppressor.log_summary();

        let stats = SessionStats {
            duration: self.started.elapsed(),
            pipeline,
            pipeline_status,
            capture_latency,
            monitor: self.telemetry.state(),
            commands: self.dispatcher.metrics(),
            messages: self.messages.metrics(),
            video: self.video.metrics(),
            sinks: self.sinks,
            suppressed: self.suppressor.summary(),
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            frames = stats.pipeline.frames,
            telemetry = stats.monitor.telemetry_count,
            commands = stats.commands.executed,
            "Station shutdown complete"
        );
        stats
    }
}

#[cfg(unix)]
type Hangup = Option<tokio::signal::unix::Signal>;
#[cfg(not(unix))]
type Hangup = ();

/// SIGHUP asks for a video re-init
#[cfg(unix)]
fn hangup_listener() -> Hangup {
    use tokio::signal::unix::{signal, SignalKind};
    signal(SignalKind::hangup())
        .map_err(|e| warn!(error = %e, "Failed to install SIGHUP handler"))
        .ok()
}

#[cfg(not(unix))]
fn hangup_listener() -> Hangup {}

#[cfg(unix)]
async fn next_hangup(hangup: &mut Hangup) -> Option<()> {
    match hangup {
        Some(sig) => sig.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn next_hangup(_: &mut Hangup) -> Option<()> {
    std::future::pending().await
}
