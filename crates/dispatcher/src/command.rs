//! CommandDispatcher - executes inbound control commands
//!
//! Every mutating command passes the debouncer first. `reset` additionally
//! holds the reset gate for its whole sequence. Parameter writes go through
//! pause-mutate-resume with bounded retries.
//!
//! Errors are reported to the originating connection only; nothing here
//! stops a loop or touches another connection.

use std::sync::Arc;
use std::time::Duration;

use contracts::{
    AccessPolicy, Command, ControlConfig, DebounceNotice, ExperimentDefinition, ExperimentEntered,
    ExperimentManager, ExperimentSession, ParamUpdated, ParameterSpec, ServerMessage,
    SimulationState, StopNotice, StopReason,
};
use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::debounce::Debouncer;
use crate::error::{DispatchError, Result};
use crate::gate::ResetGate;
use crate::metrics::{CommandMetrics, CommandSnapshot};
use crate::registry::{SubscriberId, SubscriberRegistry};

/// Timing knobs of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub debounce_window: Duration,
    pub reset_gate_timeout: Duration,
    /// Wait between pausing the engine and touching it
    pub mutation_quantum: Duration,
    pub mutation_retries: u32,
    pub mutation_retry_delay: Duration,
}

impl From<&ControlConfig> for DispatcherConfig {
    fn from(control: &ControlConfig) -> Self {
        Self {
            debounce_window: Duration::from_millis(control.debounce_window_ms),
            reset_gate_timeout: Duration::from_millis(control.reset_gate_timeout_ms),
            mutation_quantum: Duration::from_millis(control.mutation_quantum_ms),
            mutation_retries: control.mutation_retries.max(1),
            mutation_retry_delay: Duration::from_millis(control.mutation_retry_delay_ms),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&ControlConfig::default())
    }
}

/// What happened to one command
#[derive(Debug)]
pub enum DispatchOutcome {
    Executed,
    /// Rejected by the debouncer
    Suppressed { suppressed_count: u32 },
    Failed(DispatchError),
}

impl DispatchOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed)
    }

    /// Label used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Suppressed { .. } => "suppressed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Builder for [`CommandDispatcher`]
pub struct CommandDispatcherBuilder<E> {
    engine: Arc<E>,
    messages: Arc<SubscriberRegistry<ServerMessage>>,
    config: DispatcherConfig,
    auto_stop: bool,
    experiments: Vec<ExperimentDefinition>,
    policy: Option<Arc<AccessPolicy>>,
    session: Option<Arc<ExperimentSession>>,
    gate: Option<ResetGate>,
}

impl<E: ExperimentManager + Sync + 'static> CommandDispatcherBuilder<E> {
    pub fn new(engine: Arc<E>, messages: Arc<SubscriberRegistry<ServerMessage>>) -> Self {
        Self {
            engine,
            messages,
            config: DispatcherConfig::default(),
            auto_stop: true,
            experiments: Vec::new(),
            policy: None,
            session: None,
            gate: None,
        }
    }

    /// Take timing and the initial auto-stop flag from the control section
    pub fn control(mut self, control: &ControlConfig) -> Self {
        self.config = DispatcherConfig::from(control);
        self.auto_stop = control.auto_stop;
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn experiments(mut self, experiments: Vec<ExperimentDefinition>) -> Self {
        self.experiments = experiments;
        self
    }

    pub fn policy(mut self, policy: Arc<AccessPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn session(mut self, session: Arc<ExperimentSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Share a reset gate with other dispatchers driving the same engine
    pub fn gate(mut self, gate: ResetGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn build(self) -> CommandDispatcher<E> {
        let config = self.config;
        let auto_stop = self.auto_stop;
        CommandDispatcher {
            inner: Arc::new(Inner {
                engine: self.engine,
                messages: self.messages,
                experiments: self.experiments,
                policy: self
                    .policy
                    .unwrap_or_else(|| Arc::new(AccessPolicy::new(auto_stop))),
                session: self.session.unwrap_or_default(),
                gate: self
                    .gate
                    .unwrap_or_else(|| ResetGate::new(config.reset_gate_timeout)),
                debouncer: Mutex::new(Debouncer::new(config.debounce_window)),
                metrics: CommandMetrics::new(),
                config,
            }),
        }
    }
}

struct Inner<E> {
    engine: Arc<E>,
    messages: Arc<SubscriberRegistry<ServerMessage>>,
    experiments: Vec<ExperimentDefinition>,
    policy: Arc<AccessPolicy>,
    session: Arc<ExperimentSession>,
    gate: ResetGate,
    debouncer: Mutex<Debouncer>,
    metrics: CommandMetrics,
    config: DispatcherConfig,
}

/// Executes control commands against the engine
///
/// Cheap to clone; clones share the debouncer, the gate and the session.
pub struct CommandDispatcher<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for CommandDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: ExperimentManager + Sync + 'static> CommandDispatcher<E> {
    pub fn builder(
        engine: Arc<E>,
        messages: Arc<SubscriberRegistry<ServerMessage>>,
    ) -> CommandDispatcherBuilder<E> {
        CommandDispatcherBuilder::new(engine, messages)
    }

    pub fn policy(&self) -> &Arc<AccessPolicy> {
        &self.inner.policy
    }

    pub fn session(&self) -> &Arc<ExperimentSession> {
        &self.inner.session
    }

    pub fn gate(&self) -> &ResetGate {
        &self.inner.gate
    }

    pub fn messages(&self) -> &Arc<SubscriberRegistry<ServerMessage>> {
        &self.inner.messages
    }

    pub fn metrics(&self) -> CommandSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Decode one inbound text frame and handle it
    ///
    /// Malformed input is answered with an error message to `origin`.
    pub async fn handle_text(&self, origin: Option<SubscriberId>, text: &str) -> DispatchOutcome {
        match Command::from_json(text) {
            Ok(command) => self.handle(origin, command).await,
            Err(e) => {
                debug!(error = %e, "Rejected inbound frame");
                let err = DispatchError::from(e);
                self.reply(origin, ServerMessage::error(None, err.kind(), err.to_string()))
                    .await;
                self.inner.metrics.inc_failed();
                observability::record_command("invalid", "failed");
                DispatchOutcome::Failed(err)
            }
        }
    }

    /// Execute one command on behalf of `origin`
    #[instrument(name = "dispatcher_handle", skip(self, command), fields(command = %command.name(), origin = ?origin))]
    pub async fn handle(&self, origin: Option<SubscriberId>, command: Command) -> DispatchOutcome {
        let name = command.name();

        if Self::is_debounced(&command) {
            let now = tokio::time::Instant::now().into_std();
            let decision = self.inner.debouncer.lock().should_execute(&name, now);
            if !decision.execute {
                self.inner.metrics.inc_suppressed();
                observability::record_command(&name, "suppressed");
                debug!(
                    command = %name,
                    suppressed_count = decision.suppressed_count,
                    "Command debounced"
                );
                let notice = ServerMessage::CommandDebounced(DebounceNotice {
                    command: name,
                    suppressed_count: decision.suppressed_count,
                });
                self.reply(origin, notice).await;
                return DispatchOutcome::Suppressed {
                    suppressed_count: decision.suppressed_count,
                };
            }
        }

        let result = match command {
            Command::StartSimulation => self.start_simulation().await,
            Command::StopSimulation => self.stop_simulation().await,
            Command::Reset => self.reset().await,
            Command::EnterExperiment { experiment_id } => self.enter_experiment(&experiment_id).await,
            Command::SetParameter { name, value } => self.set_parameter(&name, value).await,
            Command::SetAutoStop { enabled } => {
                self.set_auto_stop(enabled);
                Ok(())
            }
        };

        let outcome = match result {
            Ok(()) => {
                self.inner.metrics.inc_executed();
                DispatchOutcome::Executed
            }
            Err(e) => {
                self.inner.metrics.inc_failed();
                warn!(command = %name, error = %e, "Command failed");
                self.reply(origin, ServerMessage::error(Some(name.clone()), e.kind(), e.to_string()))
                    .await;
                DispatchOutcome::Failed(e)
            }
        };
        observability::record_command(&name, outcome.label());
        outcome
    }

    /// Policy toggles are idempotent and never debounced
    fn is_debounced(command: &Command) -> bool {
        !matches!(command, Command::SetAutoStop { .. })
    }

    async fn start_simulation(&self) -> Result<()> {
        self.inner.session.advance_epoch();
        self.inner.policy.set_user_control(true);
        self.inner.engine.set_advancing(true).await?;
        info!("Simulation started");
        self.broadcast_state().await;
        Ok(())
    }

    async fn stop_simulation(&self) -> Result<()> {
        self.inner.session.advance_epoch();
        self.inner.policy.set_user_control(false);
        self.inner.engine.set_advancing(false).await?;
        info!("Simulation stopped");
        self.inner
            .messages
            .broadcast(&ServerMessage::SimulationStopped(StopNotice {
                is_playing: false,
                reason: StopReason::UserRequested,
            }))
            .await;
        self.broadcast_state().await;
        Ok(())
    }

    /// Stop, rewind to zero, zero all motion, restore parameters
    ///
    /// Holds the reset gate for the whole sequence.
    #[instrument(name = "dispatcher_reset", skip(self))]
    async fn reset(&self) -> Result<()> {
        self.inner.session.advance_epoch();
        let permit = self.inner.gate.acquire("reset").await?;

        self.inner.policy.set_user_control(false);
        self.inner.engine.set_advancing(false).await?;
        sleep(self.inner.config.mutation_quantum).await;

        self.inner.engine.set_current_time(0.0).await?;
        let entities = self.inner.engine.reset_all_motion().await?;
        let restored = self.reapply_parameters().await;

        self.inner.metrics.inc_resets();
        info!(
            entities,
            restored,
            held_ms = permit.held_for().as_millis() as u64,
            "Reset complete"
        );
        drop(permit);

        self.broadcast_state().await;
        Ok(())
    }

    #[instrument(name = "dispatcher_enter_experiment", skip(self))]
    async fn enter_experiment(&self, experiment_id: &str) -> Result<()> {
        let definition = self
            .experiment(experiment_id)
            .ok_or_else(|| DispatchError::unknown_experiment(experiment_id))?;

        self.inner.session.advance_epoch();
        self.inner.policy.set_user_control(false);
        self.inner.engine.set_advancing(false).await?;
        self.inner
            .session
            .enter(experiment_id, definition.default_parameters());
        self.inner.engine.reset_all_motion().await?;
        let restored = self.reapply_parameters().await;

        if let Some(pose) = &definition.camera {
            if !self.inner.engine.apply_camera_pose(pose).await {
                debug!(experiment_id, "Engine has no camera control, pose skipped");
            }
        }

        info!(experiment_id, restored, "Experiment entered");
        self.inner
            .messages
            .broadcast(&ServerMessage::ExperimentEntered(ExperimentEntered {
                experiment_id: experiment_id.to_string(),
                camera: definition.camera,
            }))
            .await;
        self.broadcast_state().await;
        Ok(())
    }

    #[instrument(name = "dispatcher_set_parameter", skip(self))]
    async fn set_parameter(&self, name: &str, value: f64) -> Result<()> {
        let command = format!("{}{name}", contracts::SET_PREFIX);
        let session = self.inner.session.snapshot();
        let epoch = session.epoch;
        let experiment_id = session
            .current_experiment_id
            .ok_or_else(|| DispatchError::no_active_experiment(&command))?;
        let definition = self
            .experiment(&experiment_id)
            .ok_or_else(|| DispatchError::unknown_experiment(&experiment_id))?;
        let spec = definition
            .parameter(name)
            .ok_or_else(|| DispatchError::unknown_parameter(&experiment_id, name))?;

        if !spec.accepts(value) {
            return Err(DispatchError::OutOfRange {
                name: name.to_string(),
                value,
                min: spec.min.map_or_else(|| "-inf".to_string(), |v| v.to_string()),
                max: spec.max.map_or_else(|| "inf".to_string(), |v| v.to_string()),
            });
        }

        let applied = if spec.targets.is_empty() {
            false
        } else {
            self.mutate_with_retries(definition, spec, value, epoch).await?;
            true
        };

        if !self.inner.session.set_parameter_at(epoch, name, value) {
            return Err(self.superseded(name));
        }
        debug!(experiment_id = %experiment_id, name, value, applied, "Parameter updated");
        self.inner
            .messages
            .broadcast(&ServerMessage::ParamUpdated(ParamUpdated {
                name: name.to_string(),
                value,
                applied,
            }))
            .await;
        Ok(())
    }

    fn set_auto_stop(&self, enabled: bool) {
        let state = self.inner.policy.set_auto_stop(enabled);
        info!(
            auto_stop = state.auto_stop_enabled,
            user_control = state.user_control_enabled,
            "Auto-stop toggled"
        );
    }

    /// Pause-mutate-resume, retried while a target entity is missing
    ///
    /// Gives up with [`DispatchError::Superseded`] once the session epoch
    /// moves past `epoch`.
    async fn mutate_with_retries(
        &self,
        definition: &ExperimentDefinition,
        spec: &ParameterSpec,
        value: f64,
        epoch: u64,
    ) -> Result<()> {
        let retries = self.inner.config.mutation_retries;
        let mut unresolved = String::new();

        for attempt in 1..=retries {
            match self.pause_mutate_resume(definition, spec, value, epoch).await? {
                None => {
                    if attempt > 1 {
                        debug!(name = %spec.name, attempt, "Parameter applied after retry");
                    }
                    return Ok(());
                }
                Some(path) => {
                    debug!(name = %spec.name, entity_path = %path, attempt, "Target not resolved");
                    unresolved = path;
                    if attempt < retries {
                        sleep(self.inner.config.mutation_retry_delay).await;
                    }
                }
            }
        }

        Err(DispatchError::EntityNotResolved {
            name: spec.name.clone(),
            entity_path: unresolved,
            attempts: retries,
        })
    }

    /// One write pass; returns the first unresolved entity path, if any
    ///
    /// The epoch is checked after every wait. A stale pass neither writes
    /// nor resumes; whoever advanced the epoch now owns the run state.
    async fn pause_mutate_resume(
        &self,
        definition: &ExperimentDefinition,
        spec: &ParameterSpec,
        value: f64,
        epoch: u64,
    ) -> Result<Option<String>> {
        let engine = &self.inner.engine;
        let quantum = self.inner.config.mutation_quantum;

        self.ensure_epoch(&spec.name, epoch)?;
        let was_advancing = engine.is_advancing().await?;
        if was_advancing {
            engine.set_advancing(false).await?;
            sleep(quantum).await;
        }

        self.ensure_epoch(&spec.name, epoch)?;
        let unresolved = self.write_targets(definition, spec, value).await;

        if was_advancing && !self.inner.policy.snapshot().forbids_advancing() {
            sleep(quantum).await;
            self.ensure_epoch(&spec.name, epoch)?;
            engine.set_advancing(true).await?;
        }
        Ok(unresolved)
    }

    fn ensure_epoch(&self, name: &str, epoch: u64) -> Result<()> {
        if self.inner.session.epoch() == epoch {
            Ok(())
        } else {
            Err(self.superseded(name))
        }
    }

    fn superseded(&self, name: &str) -> DispatchError {
        debug!(name, "Parameter write superseded by a newer command");
        DispatchError::Superseded {
            name: name.to_string(),
        }
    }

    async fn write_targets(
        &self,
        definition: &ExperimentDefinition,
        spec: &ParameterSpec,
        value: f64,
    ) -> Option<String> {
        let mut unresolved = None;
        for target in &spec.targets {
            let Some(path) = definition.entity_path(&target.entity) else {
                unresolved.get_or_insert_with(|| target.entity.clone());
                continue;
            };
            if !self
                .inner
                .engine
                .apply_mutable_parameter(path, &target.attribute, value)
                .await
            {
                unresolved.get_or_insert_with(|| path.to_string());
            }
        }
        unresolved
    }

    /// Write the session's values back to the engine, single attempt
    ///
    /// Returns how many parameters were fully written.
    async fn reapply_parameters(&self) -> usize {
        let Some(experiment_id) = self.inner.session.current_experiment_id() else {
            return 0;
        };
        let Some(definition) = self.experiment(&experiment_id) else {
            return 0;
        };

        let values = self.inner.session.parameters();
        let mut restored = 0;
        for spec in definition.parameters.iter().filter(|p| !p.targets.is_empty()) {
            let value = values.get(&spec.name).copied().unwrap_or(spec.default);
            match self.write_targets(definition, spec, value).await {
                None => restored += 1,
                Some(path) => {
                    debug!(name = %spec.name, entity_path = %path, "Parameter not restored")
                }
            }
        }
        restored
    }

    async fn broadcast_state(&self) {
        let engine = &self.inner.engine;
        let state = match (engine.is_advancing().await, engine.current_time().await) {
            (Ok(running), Ok(time)) => SimulationState::new(running, time),
            (Err(e), _) | (_, Err(e)) => {
                debug!(error = %e, "Engine state unavailable");
                return;
            }
        };
        self.inner
            .messages
            .broadcast(&ServerMessage::SimulationState(state))
            .await;
    }

    async fn reply(&self, origin: Option<SubscriberId>, message: ServerMessage) {
        if let Some(id) = origin {
            self.inner.messages.send_to(id, &message).await;
        }
    }

    fn experiment(&self, experiment_id: &str) -> Option<&ExperimentDefinition> {
        self.inner
            .experiments
            .iter()
            .find(|e| e.id == experiment_id)
    }
}
