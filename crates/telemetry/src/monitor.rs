//! TelemetryBroadcastLoop - periodic state poll, access enforcement, fan-out
//!
//! One task per started loop. Each tick reads the advancing flag, forces the
//! engine to stop when the access policy forbids it, and publishes telemetry
//! only while the engine advances. A failed tick is logged through the
//! suppressor and the loop carries on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    AccessPolicy, ExperimentDefinition, ExperimentManager, ExperimentSession, ScalarState,
    ServerMessage, SimulationState, TelemetryConfig,
};
use dispatcher::SubscriberRegistry;
use observability::LogSuppressor;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::derive::TelemetryDeriver;
use crate::error::{Result, TelemetryError};

const SITE_READ_FLAG: &str = "monitor_read_flag";
const SITE_ENFORCE: &str = "monitor_enforce";
const SITE_TELEMETRY: &str = "monitor_telemetry";
const SITE_STATE: &str = "monitor_state";

/// Loop cadences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryLoopConfig {
    pub interval: Duration,
    pub state_interval: Duration,
    /// Minimum gap between two `auto_stopped` notices
    pub auto_stop_notice_interval: Duration,
    /// Suppressed-failure summary cadence
    pub summary_interval: Duration,
}

impl From<&TelemetryConfig> for TelemetryLoopConfig {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
            state_interval: Duration::from_millis(config.state_interval_ms.max(1)),
            auto_stop_notice_interval: Duration::from_millis(config.auto_stop_notice_interval_ms),
            summary_interval: Duration::from_secs(60),
        }
    }
}

impl Default for TelemetryLoopConfig {
    fn default() -> Self {
        Self::from(&TelemetryConfig::default())
    }
}

#[derive(Debug, Default)]
struct LoopCounters {
    ticks: AtomicU64,
    telemetry: AtomicU64,
    auto_stops: AtomicU64,
    notices: AtomicU64,
    failures: AtomicU64,
}

/// Monitor state as reported to operators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorState {
    pub running: bool,
    pub auto_stop_enabled: bool,
    pub user_control_enabled: bool,
    pub telemetry_count: u64,
    pub auto_stop_count: u64,
    pub notice_count: u64,
    pub tick_count: u64,
    pub failure_count: u64,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Periodic telemetry broadcaster with auto-stop enforcement
pub struct TelemetryBroadcastLoop<E> {
    engine: Arc<E>,
    messages: Arc<SubscriberRegistry<ServerMessage>>,
    policy: Arc<AccessPolicy>,
    session: Arc<ExperimentSession>,
    experiments: Arc<Vec<ExperimentDefinition>>,
    telemetry: TelemetryConfig,
    config: TelemetryLoopConfig,
    suppressor: Arc<LogSuppressor>,
    counters: Arc<LoopCounters>,
    running: Mutex<Option<Running>>,
}

impl<E: ExperimentManager + Sync + 'static> TelemetryBroadcastLoop<E> {
    pub fn new(
        engine: Arc<E>,
        messages: Arc<SubscriberRegistry<ServerMessage>>,
        policy: Arc<AccessPolicy>,
        session: Arc<ExperimentSession>,
        telemetry: &TelemetryConfig,
    ) -> Self {
        Self {
            engine,
            messages,
            policy,
            session,
            experiments: Arc::new(Vec::new()),
            config: TelemetryLoopConfig::from(telemetry),
            telemetry: telemetry.clone(),
            suppressor: Arc::new(LogSuppressor::default()),
            counters: Arc::new(LoopCounters::default()),
            running: Mutex::new(None),
        }
    }

    /// Experiment catalog used to pick the telemetry schema
    pub fn with_experiments(mut self, experiments: Vec<ExperimentDefinition>) -> Self {
        self.experiments = Arc::new(experiments);
        self
    }

    pub fn with_suppressor(mut self, suppressor: Arc<LogSuppressor>) -> Self {
        self.suppressor = suppressor;
        self
    }

    pub fn with_loop_config(mut self, config: TelemetryLoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> TelemetryLoopConfig {
        self.config
    }

    /// Stopped -> Running
    ///
    /// The loop also stops when `shutdown` is cancelled. Returns false if it
    /// was already running.
    pub fn start(&self, shutdown: &CancellationToken) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return false;
        }

        let cancel = shutdown.child_token();
        let worker = Worker {
            engine: Arc::clone(&self.engine),
            messages: Arc::clone(&self.messages),
            policy: Arc::clone(&self.policy),
            session: Arc::clone(&self.session),
            experiments: Arc::clone(&self.experiments),
            suppressor: Arc::clone(&self.suppressor),
            counters: Arc::clone(&self.counters),
            deriver: TelemetryDeriver::new(&self.telemetry),
            config: self.config,
            last_notice: None,
        };
        let task = tokio::spawn(worker.run(cancel.clone()));
        *running = Some(Running { cancel, task });
        true
    }

    /// Running -> Stopped, waits for the in-flight tick to finish
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(Running { cancel, task }) = running else {
            return;
        };
        cancel.cancel();
        let grace = self.config.interval * 4 + Duration::from_secs(1);
        if tokio::time::timeout(grace, task).await.is_err() {
            debug!("Telemetry loop did not stop within the grace period");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    pub fn state(&self) -> MonitorState {
        let policy = self.policy.snapshot();
        MonitorState {
            running: self.is_running(),
            auto_stop_enabled: policy.auto_stop_enabled,
            user_control_enabled: policy.user_control_enabled,
            telemetry_count: self.counters.telemetry.load(Ordering::Relaxed),
            auto_stop_count: self.counters.auto_stops.load(Ordering::Relaxed),
            notice_count: self.counters.notices.load(Ordering::Relaxed),
            tick_count: self.counters.ticks.load(Ordering::Relaxed),
            failure_count: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

/// State owned by the running task
struct Worker<E> {
    engine: Arc<E>,
    messages: Arc<SubscriberRegistry<ServerMessage>>,
    policy: Arc<AccessPolicy>,
    session: Arc<ExperimentSession>,
    experiments: Arc<Vec<ExperimentDefinition>>,
    suppressor: Arc<LogSuppressor>,
    counters: Arc<LoopCounters>,
    deriver: TelemetryDeriver,
    config: TelemetryLoopConfig,
    last_notice: Option<Instant>,
}

impl<E: ExperimentManager + Sync + 'static> Worker<E> {
    #[instrument(name = "telemetry_loop", skip_all)]
    async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            state_interval_ms = self.config.state_interval.as_millis() as u64,
            "Telemetry loop started"
        );

        let mut next_state = Instant::now();
        let mut next_summary = Instant::now() + self.config.summary_interval;

        loop {
            let started = Instant::now();
            let advancing = self.tick(started).await;

            if started >= next_state {
                self.broadcast_state(advancing).await;
                next_state = started + self.config.state_interval;
            }
            if started >= next_summary {
                self.suppressor.log_summary();
                next_summary = started + self.config.summary_interval;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep_until(started + self.config.interval) => {}
            }
        }

        self.deriver.reset();
        info!(
            ticks = self.counters.ticks.load(Ordering::Relaxed),
            telemetry = self.counters.telemetry.load(Ordering::Relaxed),
            "Telemetry loop stopped"
        );
    }

    /// One iteration, returns whether the engine is advancing afterwards
    async fn tick(&mut self, now: Instant) -> bool {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let advancing = match self.engine.is_advancing().await {
            Ok(advancing) => advancing,
            Err(e) => {
                self.fail(SITE_READ_FLAG, &TelemetryError::from(e));
                return false;
            }
        };

        let advancing = if advancing && self.policy.snapshot().forbids_advancing() {
            self.enforce_stop(now).await
        } else {
            advancing
        };

        if advancing {
            if let Err(e) = self.emit_telemetry(advancing).await {
                self.fail(SITE_TELEMETRY, &e);
            }
        }
        advancing
    }

    /// Force the engine back to stopped; the notice is rate limited
    async fn enforce_stop(&mut self, now: Instant) -> bool {
        if let Err(e) = self.engine.set_advancing(false).await {
            self.fail(SITE_ENFORCE, &TelemetryError::from(e));
            return true;
        }
        self.counters.auto_stops.fetch_add(1, Ordering::Relaxed);
        observability::record_auto_stop_enforced();

        let due = self
            .last_notice
            .map_or(true, |last| now.duration_since(last) >= self.config.auto_stop_notice_interval);
        if due {
            self.last_notice = Some(now);
            self.counters.notices.fetch_add(1, Ordering::Relaxed);
            let delivered = self.messages.broadcast(&ServerMessage::auto_stopped()).await;
            info!(delivered, "Engine advanced without user control, auto-stopped");
        } else {
            debug!("Auto-stop enforced, notice rate limited");
        }
        false
    }

    async fn emit_telemetry(&mut self, is_running: bool) -> Result<()> {
        let session = self.session.snapshot();
        let experiment = session
            .current_experiment_id
            .as_deref()
            .and_then(|id| self.experiments.iter().find(|e| e.id == id));

        let state = match session.current_experiment_id.as_deref() {
            Some(id) => self.engine.read_scalar_state(id).await?,
            None => ScalarState::new(self.engine.current_time().await?),
        };

        let sample = self
            .deriver
            .derive(experiment, &session.parameters, &state, is_running)?;
        let delivered = self.messages.broadcast(&ServerMessage::Telemetry(sample)).await;

        self.counters.telemetry.fetch_add(1, Ordering::Relaxed);
        observability::record_telemetry_broadcast(
            session.current_experiment_id.as_deref().unwrap_or("none"),
            delivered,
        );
        Ok(())
    }

    async fn broadcast_state(&mut self, advancing: bool) {
        match self.engine.current_time().await {
            Ok(time) => {
                let state = SimulationState::new(advancing, time);
                self.messages
                    .broadcast(&ServerMessage::SimulationState(state))
                    .await;
            }
            Err(e) => self.fail(SITE_STATE, &TelemetryError::from(e)),
        }
    }

    fn fail(&self, site: &'static str, error: &TelemetryError) {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        self.suppressor.report(site, error.kind(), error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use contracts::{
        CameraPose, ContractError, ExperimentKind, StopReason, Subscriber, TelemetrySample,
    };
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeEngine {
        advancing: AtomicBool,
        /// Something outside the station keeps pressing play
        forced: AtomicBool,
        fail_reads: AtomicBool,
        stops: AtomicU64,
        time: Mutex<f64>,
    }

    impl ExperimentManager for FakeEngine {
        async fn is_advancing(&self) -> std::result::Result<bool, ContractError> {
            Ok(self.forced.load(Ordering::SeqCst) || self.advancing.load(Ordering::SeqCst))
        }

        async fn set_advancing(&self, advancing: bool) -> std::result::Result<(), ContractError> {
            if !advancing {
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
            self.advancing.store(advancing, Ordering::SeqCst);
            Ok(())
        }

        async fn current_time(&self) -> std::result::Result<f64, ContractError> {
            Ok(*self.time.lock())
        }

        async fn set_current_time(&self, time: f64) -> std::result::Result<(), ContractError> {
            *self.time.lock() = time;
            Ok(())
        }

        async fn read_scalar_state(
            &self,
            _experiment_id: &str,
        ) -> std::result::Result<ScalarState, ContractError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(ContractError::engine("read_scalar_state", "stage not loaded"));
            }
            let mut time = self.time.lock();
            *time += 0.05;
            Ok(ScalarState::new(*time)
                .with("angle", 0.2)
                .with("angular_velocity", 0.0))
        }

        async fn apply_mutable_parameter(&self, _entity_path: &str, _name: &str, _value: f64) -> bool {
            true
        }

        async fn reset_all_motion(&self) -> std::result::Result<usize, ContractError> {
            Ok(0)
        }

        async fn apply_camera_pose(&self, _pose: &CameraPose) -> bool {
            false
        }
    }

    struct Inbox {
        received: Arc<Mutex<Vec<ServerMessage>>>,
    }

    #[async_trait]
    impl Subscriber<ServerMessage> for Inbox {
        fn name(&self) -> &str {
            "inbox"
        }

        async fn send(&mut self, message: &ServerMessage) -> std::result::Result<(), ContractError> {
            self.received.lock().push(message.clone());
            Ok(())
        }
    }

    fn pendulum() -> ExperimentDefinition {
        ExperimentDefinition {
            id: "2".into(),
            kind: ExperimentKind::Pendulum,
            title: None,
            entities: BTreeMap::new(),
            parameters: Vec::new(),
            camera: None,
        }
    }

    struct Fixture {
        engine: Arc<FakeEngine>,
        policy: Arc<AccessPolicy>,
        session: Arc<ExperimentSession>,
        received: Arc<Mutex<Vec<ServerMessage>>>,
        monitor: TelemetryBroadcastLoop<FakeEngine>,
    }

    fn setup(auto_stop: bool) -> Fixture {
        let engine = Arc::new(FakeEngine::default());
        let messages: Arc<SubscriberRegistry<ServerMessage>> =
            Arc::new(SubscriberRegistry::new("messages"));
        let received = Arc::new(Mutex::new(Vec::new()));
        messages.add(Inbox {
            received: Arc::clone(&received),
        });
        let policy = Arc::new(AccessPolicy::new(auto_stop));
        let session = Arc::new(ExperimentSession::new());
        let monitor = TelemetryBroadcastLoop::new(
            Arc::clone(&engine),
            messages,
            Arc::clone(&policy),
            Arc::clone(&session),
            &TelemetryConfig::default(),
        )
        .with_experiments(vec![pendulum()]);
        Fixture {
            engine,
            policy,
            session,
            received,
            monitor,
        }
    }

    fn count(received: &Mutex<Vec<ServerMessage>>, kind: &str) -> usize {
        received.lock().iter().filter(|m| m.kind() == kind).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stop_notice_once_per_window() {
        let f = setup(true);
        f.engine.forced.store(true, Ordering::SeqCst);
        assert!(f.monitor.start(&CancellationToken::new()));

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(count(&f.received, "simulation_stopped"), 1);
        assert!(f.engine.stops.load(Ordering::SeqCst) > 10);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count(&f.received, "simulation_stopped"), 2);
        assert_eq!(count(&f.received, "telemetry"), 0);

        let notice = f
            .received
            .lock()
            .iter()
            .find_map(|m| match m {
                ServerMessage::SimulationStopped(n) => Some(n.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(notice.reason, StopReason::AutoStopped);
        assert!(!notice.is_playing);

        f.monitor.stop().await;
        assert!(f.monitor.state().auto_stop_count > 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_control_lifts_enforcement() {
        let f = setup(true);
        f.policy.set_user_control(true);
        f.engine.forced.store(true, Ordering::SeqCst);
        f.monitor.start(&CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count(&f.received, "simulation_stopped"), 0);
        assert_eq!(f.engine.stops.load(Ordering::SeqCst), 0);
        f.monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_only_while_advancing() {
        let f = setup(false);
        f.session.enter("2", BTreeMap::new());
        f.monitor.start(&CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count(&f.received, "telemetry"), 0);

        f.engine.advancing.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(count(&f.received, "telemetry") >= 9);

        let sample = f
            .received
            .lock()
            .iter()
            .find_map(|m| match m {
                ServerMessage::Telemetry(TelemetrySample::Pendulum(s)) => Some(s.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(sample.experiment_id, "2");
        assert!(sample.is_running);
        f.monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reads_do_not_stop_loop() {
        let f = setup(false);
        f.session.enter("2", BTreeMap::new());
        f.engine.advancing.store(true, Ordering::SeqCst);
        f.engine.fail_reads.store(true, Ordering::SeqCst);
        f.monitor.start(&CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let state = f.monitor.state();
        assert!(state.running);
        assert!(state.failure_count >= 5);
        assert_eq!(state.telemetry_count, 0);

        f.engine.fail_reads.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(f.monitor.state().telemetry_count > 0);
        f.monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_broadcast_cadence() {
        let f = setup(false);
        f.monitor.start(&CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(count(&f.received, "simulation_state"), 2);
        f.monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let f = setup(true);
        let shutdown = CancellationToken::new();
        assert!(f.monitor.start(&shutdown));
        assert!(!f.monitor.start(&shutdown));
        assert!(f.monitor.is_running());

        f.monitor.stop().await;
        assert!(!f.monitor.is_running());
        assert!(!f.monitor.state().running);

        assert!(f.monitor.start(&shutdown));
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!f.monitor.is_running());
    }
}
