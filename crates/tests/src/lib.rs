//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 基于替身引擎的端到端测试（命令去抖、广播剔除、自动停止限流、周期估计、采集回退）

#[cfg(test)]
mod contract_tests {
    use contracts::{Command, ServerMessage};

    #[test]
    fn test_builtin_station_loads() {
        let blueprint = config_loader::ConfigLoader::builtin().unwrap();
        assert_eq!(blueprint.version, contracts::ConfigVersion::V1);
        assert!(blueprint.experiment("1").is_some());
        assert!(blueprint.experiment("2").is_some());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(ServerMessage::auto_stopped().kind(), "simulation_stopped");
        let json = ServerMessage::auto_stopped().to_json().unwrap();
        assert!(json.contains(r#""type":"simulation_stopped""#));
        assert!(json.contains(r#""reason":"auto_stopped""#));
        assert_eq!(
            Command::from_json(r#"{"type":"set_mass","value":2.0}"#).unwrap(),
            Command::SetParameter {
                name: "mass".into(),
                value: 2.0
            }
        );
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use contracts::{
        AccessPolicy, ContractError, ExperimentManager, ExperimentSession, FrameOrigin,
        ServerMessage, StationBlueprint, StopReason, Subscriber, TelemetrySample,
        VideoConfig,
    };
    use dispatcher::{CommandDispatcher, DispatchOutcome, SubscriberRegistry};
    use frame_pipeline::{
        ChannelCaptureStrategy, FrameAcquisitionPipeline, PipelineConfig, StrategyLimits,
    };
    use observability::LogSuppressor;
    use parking_lot::Mutex;
    use sim_bridge::{MockEngine, SyntheticRenderer, ViewportConfig, ViewportGrabber};
    use telemetry::TelemetryBroadcastLoop;
    use tokio_util::sync::CancellationToken;

    /// Records every message it is sent
    #[derive(Clone, Default)]
    struct Inbox {
        messages: Arc<Mutex<Vec<ServerMessage>>>,
    }

    impl Inbox {
        fn count(&self, kind: &str) -> usize {
            self.messages.lock().iter().filter(|m| m.kind() == kind).count()
        }

        fn last_period(&self) -> Option<f64> {
            self.messages.lock().iter().rev().find_map(|m| match m {
                ServerMessage::Telemetry(TelemetrySample::Pendulum(s)) => s.period,
                _ => None,
            })
        }
    }

    #[async_trait]
    impl Subscriber<ServerMessage> for Inbox {
        fn name(&self) -> &str {
            "inbox"
        }

        async fn send(&mut self, message: &ServerMessage) -> Result<(), ContractError> {
            self.messages.lock().push(message.clone());
            Ok(())
        }
    }

    /// Counts deliveries, optionally failing every send
    struct Probe {
        name: String,
        received: Arc<AtomicUsize>,
        broken: bool,
    }

    impl Probe {
        fn new(name: &str, broken: bool) -> (Self, Arc<AtomicUsize>) {
            let received = Arc::new(AtomicUsize::new(0));
            let probe = Self {
                name: name.to_string(),
                received: Arc::clone(&received),
                broken,
            };
            (probe, received)
        }
    }

    #[async_trait]
    impl Subscriber<ServerMessage> for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&mut self, _message: &ServerMessage) -> Result<(), ContractError> {
            if self.broken {
                return Err(ContractError::subscriber_send(&self.name, "socket reset"));
            }
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Rig {
        blueprint: StationBlueprint,
        engine: Arc<MockEngine>,
        messages: Arc<SubscriberRegistry<ServerMessage>>,
        dispatcher: CommandDispatcher<MockEngine>,
        monitor: TelemetryBroadcastLoop<MockEngine>,
        inbox: Inbox,
    }

    /// Bundled station wired the way the CLI wires it, minus the network
    fn rig() -> Rig {
        let blueprint = config_loader::ConfigLoader::builtin().unwrap();
        let engine = Arc::new(MockEngine::new(&blueprint.experiments));
        let messages = Arc::new(SubscriberRegistry::<ServerMessage>::new("messages"));
        let policy = Arc::new(AccessPolicy::new(blueprint.control.auto_stop));
        let session = Arc::new(ExperimentSession::new());
        let inbox = Inbox::default();
        messages.add(inbox.clone());

        let dispatcher = CommandDispatcher::builder(Arc::clone(&engine), Arc::clone(&messages))
            .control(&blueprint.control)
            .experiments(blueprint.experiments.clone())
            .policy(Arc::clone(&policy))
            .session(Arc::clone(&session))
            .build();
        let monitor = TelemetryBroadcastLoop::new(
            Arc::clone(&engine),
            Arc::clone(&messages),
            policy,
            session,
            &blueprint.telemetry,
        )
        .with_experiments(blueprint.experiments.clone());

        Rig {
            blueprint,
            engine,
            messages,
            dispatcher,
            monitor,
            inbox,
        }
    }

    /// Two resets 60 ms apart inside a 500 ms window: one reset sequence
    #[tokio::test(start_paused = true)]
    async fn test_double_reset_runs_once() {
        let rig = rig();
        assert_eq!(rig.blueprint.control.debounce_window_ms, 500);

        let first = rig.dispatcher.clone();
        let pending = tokio::spawn(async move { first.handle_text(None, r#"{"type":"reset"}"#).await });
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = rig.dispatcher.handle_text(None, r#"{"type":"reset"}"#).await;
        let first = pending.await.unwrap();

        assert!(first.is_executed());
        assert!(matches!(second, DispatchOutcome::Suppressed { suppressed_count: 1 }));
        assert_eq!(rig.engine.reset_count(), 1);

        let metrics = rig.dispatcher.metrics();
        assert_eq!(metrics.resets, 1);
        assert_eq!(metrics.suppressed, 1);
        assert!(!rig.dispatcher.gate().is_held());

        // Outside the window the next reset goes through
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rig.dispatcher.handle_text(None, r#"{"type":"reset"}"#).await.is_executed());
        assert_eq!(rig.engine.reset_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_subscriber_removed_after_broadcast() {
        let registry = SubscriberRegistry::<ServerMessage>::new("messages");
        let (one, one_count) = Probe::new("one", false);
        let (two, two_count) = Probe::new("two", true);
        let (three, three_count) = Probe::new("three", false);
        registry.add(one);
        registry.add(two);
        registry.add(three);

        let message = ServerMessage::auto_stopped();
        assert_eq!(registry.broadcast(&message).await, 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["one".to_string(), "three".to_string()]);

        assert_eq!(registry.broadcast(&message).await, 2);
        assert_eq!(one_count.load(Ordering::SeqCst), 2);
        assert_eq!(two_count.load(Ordering::SeqCst), 0);
        assert_eq!(three_count.load(Ordering::SeqCst), 2);

        let metrics = registry.metrics();
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.removals, 1);
    }

    /// Someone keeps pressing play in the engine for 4.5 s
    #[tokio::test(start_paused = true)]
    async fn test_forced_play_reverted_with_rate_limited_notice() {
        let rig = rig();
        let shutdown = CancellationToken::new();
        assert!(rig.monitor.start(&shutdown));

        for _ in 0..45 {
            rig.engine.force_advancing();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        rig.monitor.stop().await;

        assert!(!rig.engine.is_advancing().await.unwrap());
        assert_eq!(rig.inbox.count("simulation_stopped"), 3);
        assert_eq!(rig.inbox.count("telemetry"), 0);
        let all_auto = rig.inbox.messages.lock().iter().all(|m| match m {
            ServerMessage::SimulationStopped(notice) => notice.reason == StopReason::AutoStopped,
            _ => true,
        });
        assert!(all_auto);

        let state = rig.monitor.state();
        assert_eq!(state.notice_count, 3);
        assert!(state.auto_stop_count >= 44);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_control_allows_telemetry() {
        let rig = rig();
        let shutdown = CancellationToken::new();
        rig.monitor.start(&shutdown);

        rig.dispatcher
            .handle_text(None, r#"{"type":"enter_experiment","experiment_id":"1"}"#)
            .await;
        rig.dispatcher
            .handle_text(None, r#"{"type":"set_initial_velocity","value":4.0}"#)
            .await;
        rig.dispatcher.handle_text(None, r#"{"type":"start_simulation"}"#).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        shutdown.cancel();
        rig.monitor.stop().await;

        assert_eq!(rig.inbox.count("simulation_stopped"), 0);
        assert!(rig.inbox.count("telemetry") >= 30);
        let totals: Vec<f64> = rig
            .inbox
            .messages
            .lock()
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Telemetry(TelemetrySample::AngularMomentum(s)) => {
                    Some(s.total_angular_momentum)
                }
                _ => None,
            })
            .collect();
        let first = totals[0];
        assert!(first > 0.0);
        assert!(totals.iter().all(|l| (l - first).abs() < 1e-6 * first.abs().max(1.0)));
    }

    /// Small-angle period of a 1 m pendulum is 2π·sqrt(L/g)
    #[tokio::test(start_paused = true)]
    async fn test_pendulum_period_converges() {
        let rig = rig();
        let shutdown = CancellationToken::new();

        rig.dispatcher
            .handle_text(None, r#"{"type":"enter_experiment","experiment_id":"2"}"#)
            .await;
        rig.dispatcher.handle_text(None, r#"{"type":"start_simulation"}"#).await;
        rig.monitor.start(&shutdown);
        tokio::time::sleep(Duration::from_secs(12)).await;
        rig.monitor.stop().await;

        let expected = 2.0 * std::f64::consts::PI * (1.0_f64 / 9.81).sqrt();
        let period = rig.inbox.last_period().unwrap();
        assert!(
            (period - expected).abs() / expected < 0.05,
            "period {period} vs {expected}"
        );
    }

    #[tokio::test]
    async fn test_capture_falls_back_to_viewport() {
        let suppressor = Arc::new(LogSuppressor::default());
        let config = PipelineConfig::from(&VideoConfig {
            width: 65,
            height: 37,
            warmup_frames: 1,
            ..VideoConfig::default()
        });
        let limits = StrategyLimits::from(&config);
        let renderer = Arc::new(SyntheticRenderer::default());
        let viewport = Arc::new(ViewportGrabber::new(ViewportConfig {
            frequency_hz: 200.0,
            ..ViewportConfig::default()
        }));
        let mut pipeline = FrameAcquisitionPipeline::new(config, Arc::clone(&suppressor))
            .with_strategy(ChannelCaptureStrategy::new(
                "render_product",
                Arc::clone(&renderer),
                limits,
                Arc::clone(&suppressor),
            ))
            .with_strategy(ChannelCaptureStrategy::new(
                "viewport",
                viewport,
                limits,
                Arc::clone(&suppressor),
            ));

        let mut frames = vec![pipeline.produce().await, pipeline.produce().await];
        assert_eq!(frames[0].origin, FrameOrigin::Warmup);
        assert_eq!(
            frames[1].origin,
            FrameOrigin::Live {
                strategy: "render_product".into()
            }
        );

        renderer.set_available(false);
        let mut fell_back = false;
        for _ in 0..100 {
            let frame = pipeline.produce().await;
            fell_back = frame.origin
                == FrameOrigin::Live {
                    strategy: "viewport".into(),
                };
            frames.push(frame);
            if fell_back {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(fell_back);

        for frame in &frames {
            assert_eq!((frame.frame.width(), frame.frame.height()), (64, 36));
            assert_eq!(frame.frame.as_slice().len(), 64 * 36 * 3);
        }
        assert!(frames.windows(2).all(|w| w[1].pts == w[0].pts + 1));
    }

    #[tokio::test]
    async fn test_messages_registry_shared_by_dispatcher() {
        let rig = rig();
        let outcome = rig
            .dispatcher
            .handle_text(None, r#"{"type":"set_mass","value":2.0}"#)
            .await;
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        assert_eq!(rig.messages.len(), 1);
        assert_eq!(rig.dispatcher.metrics().failed, 1);
    }
}
