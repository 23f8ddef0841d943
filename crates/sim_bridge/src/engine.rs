//! MockEngine - in-process stand-in for the physics engine
//!
//! Simulates the two catalog rigs well enough to drive the station end to
//! end: a disk and a ring coupled by friction (total angular momentum is
//! conserved) and a damped pendulum. Simulation time advances lazily from
//! the tokio clock whenever the engine is touched, so paused-clock tests
//! are deterministic.
//!
//! Every mutating call is recorded and failures can be injected.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use contracts::{
    CameraPose, ContractError, ExperimentDefinition, ExperimentKind, ExperimentManager,
    ScalarState,
};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

use crate::error::BridgeError;

const GRAVITY: f64 = 9.81;
/// Friction torque per unit of relative angular velocity (N·m·s)
const COUPLING: f64 = 0.8;
const BODY_RADIUS: f64 = 0.5;
const PENDULUM_SUBSTEP: f64 = 0.002;

/// One recorded engine call
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    SetAdvancing(bool),
    SetCurrentTime(f64),
    ResetAllMotion {
        entities: usize,
    },
    ApplyParameter {
        entity_path: String,
        name: String,
        value: f64,
        applied: bool,
    },
    ApplyCameraPose(CameraPose),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Disk,
    Ring,
    Bob,
    Pivot,
    Other,
}

impl Role {
    fn parse(role: &str) -> Self {
        match role {
            "disk" => Self::Disk,
            "ring" => Self::Ring,
            "bob" => Self::Bob,
            "pivot" => Self::Pivot,
            _ => Self::Other,
        }
    }

    fn is_dynamic(self) -> bool {
        matches!(self, Self::Disk | Self::Ring | Self::Bob)
    }
}

#[derive(Debug)]
struct Entity {
    role: Role,
    attributes: BTreeMap<String, f64>,
}

#[derive(Debug, Default)]
struct World {
    advancing: bool,
    time: f64,
    last_sync: Option<Instant>,
    entities: HashMap<String, Entity>,
    kinds: HashMap<String, ExperimentKind>,
    disk_w: f64,
    ring_w: f64,
    theta: f64,
    omega: f64,
    camera: Option<CameraPose>,
}

impl World {
    fn attribute(&self, role: Role, name: &str, default: f64) -> f64 {
        self.entities
            .values()
            .filter(|e| e.role == role)
            .find_map(|e| e.attributes.get(name).copied())
            .unwrap_or(default)
    }

    fn inertia(&self, role: Role) -> f64 {
        let mass = self.attribute(role, "mass", 1.0).max(1e-6);
        0.5 * mass * BODY_RADIUS * BODY_RADIUS
    }

    fn angular_momentum(&self) -> f64 {
        self.inertia(Role::Disk) * self.disk_w + self.inertia(Role::Ring) * self.ring_w
    }

    fn initial_angle(&self) -> f64 {
        self.attribute(Role::Bob, "initial_angle", 0.3)
    }

    /// Catch up simulation time with the clock
    fn sync(&mut self, now: Instant) {
        if self.advancing {
            if let Some(last) = self.last_sync {
                let dt = now.saturating_duration_since(last).as_secs_f64();
                self.step(dt);
            }
        }
        self.last_sync = Some(now);
    }

    fn step(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        self.time += dt;

        // disk/ring: relative velocity decays exponentially, L is kept
        let (i_d, i_r) = (self.inertia(Role::Disk), self.inertia(Role::Ring));
        let total = self.angular_momentum();
        let relative = (self.disk_w - self.ring_w) * (-COUPLING * (1.0 / i_d + 1.0 / i_r) * dt).exp();
        self.disk_w = (total + i_r * relative) / (i_d + i_r);
        self.ring_w = (total - i_d * relative) / (i_d + i_r);

        // pendulum: semi-implicit Euler
        let length = self.attribute(Role::Pivot, "rod_length", 1.0).max(1e-3);
        let damping = self.attribute(Role::Pivot, "angular_damping", 0.0);
        let mut remaining = dt;
        while remaining > 0.0 {
            let h = remaining.min(PENDULUM_SUBSTEP);
            self.omega += (-(GRAVITY / length) * self.theta.sin() - damping * self.omega) * h;
            self.theta += self.omega * h;
            remaining -= h;
        }
    }
}

/// Stand-in physics engine
#[derive(Debug)]
pub struct MockEngine {
    world: Mutex<World>,
    calls: Mutex<Vec<EngineCall>>,
    unresolved: Mutex<HashSet<String>>,
    fail_reads: AtomicBool,
}

impl MockEngine {
    /// Register every entity declared by `experiments`
    pub fn new(experiments: &[ExperimentDefinition]) -> Self {
        let mut world = World::default();
        for experiment in experiments {
            world.kinds.insert(experiment.id.clone(), experiment.kind);
            for (role, path) in &experiment.entities {
                world.entities.entry(path.clone()).or_insert_with(|| Entity {
                    role: Role::parse(role),
                    attributes: BTreeMap::new(),
                });
            }
        }
        world.theta = world.initial_angle();

        Self {
            world: Mutex::new(world),
            calls: Mutex::new(Vec::new()),
            unresolved: Mutex::new(HashSet::new()),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Start advancing without going through the station (e.g. someone
    /// pressed play in the engine UI)
    pub fn force_advancing(&self) {
        let mut world = self.world.lock();
        world.sync(Instant::now());
        world.advancing = true;
        debug!("Engine forced to advance");
    }

    /// Step the physics by `dt` seconds regardless of the clock
    pub fn advance_by(&self, dt: f64) {
        self.world.lock().step(dt);
    }

    /// Make `read_scalar_state` fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Pretend the entity is not loaded yet
    pub fn mark_unresolved(&self, entity_path: impl Into<String>) {
        self.unresolved.lock().insert(entity_path.into());
    }

    pub fn mark_resolved(&self, entity_path: &str) {
        self.unresolved.lock().remove(entity_path);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of `reset_all_motion` calls so far
    pub fn reset_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, EngineCall::ResetAllMotion { .. }))
            .count()
    }

    pub fn attribute(&self, entity_path: &str, name: &str) -> Option<f64> {
        self.world
            .lock()
            .entities
            .get(entity_path)
            .and_then(|e| e.attributes.get(name).copied())
    }

    pub fn camera_pose(&self) -> Option<CameraPose> {
        self.world.lock().camera
    }

    /// Total angular momentum of the disk/ring rig
    pub fn angular_momentum(&self) -> f64 {
        self.world.lock().angular_momentum()
    }

    pub fn pendulum_angle(&self) -> f64 {
        self.world.lock().theta
    }

    fn record(&self, call: EngineCall) {
        trace!(?call, "Engine call");
        self.calls.lock().push(call);
    }

    fn scalar_state(&self, experiment_id: &str) -> Result<ScalarState, BridgeError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BridgeError::injected("read_scalar_state"));
        }

        let mut world = self.world.lock();
        world.sync(Instant::now());
        let kind = *world
            .kinds
            .get(experiment_id)
            .ok_or_else(|| BridgeError::unknown_experiment(experiment_id))?;

        let state = ScalarState::new(world.time);
        let state = match kind {
            ExperimentKind::AngularMomentum => state
                .with("disk_angular_velocity", world.disk_w)
                .with("ring_angular_velocity", world.ring_w)
                .with("disk_mass", world.attribute(Role::Disk, "mass", 1.0))
                .with("ring_mass", world.attribute(Role::Ring, "mass", 1.0)),
            ExperimentKind::Pendulum => state
                .with("angle", world.theta)
                .with("angular_velocity", world.omega)
                .with("length", world.attribute(Role::Pivot, "rod_length", 1.0)),
            ExperimentKind::Generic => state.with("time", world.time),
        };
        Ok(state)
    }
}

impl ExperimentManager for MockEngine {
    async fn is_advancing(&self) -> Result<bool, ContractError> {
        let mut world = self.world.lock();
        world.sync(Instant::now());
        Ok(world.advancing)
    }

    async fn set_advancing(&self, advancing: bool) -> Result<(), ContractError> {
        {
            let mut world = self.world.lock();
            world.sync(Instant::now());
            world.advancing = advancing;
        }
        self.record(EngineCall::SetAdvancing(advancing));
        Ok(())
    }

    async fn current_time(&self) -> Result<f64, ContractError> {
        let mut world = self.world.lock();
        world.sync(Instant::now());
        Ok(world.time)
    }

    async fn set_current_time(&self, time: f64) -> Result<(), ContractError> {
        {
            let mut world = self.world.lock();
            world.sync(Instant::now());
            world.time = time.max(0.0);
            if world.time == 0.0 {
                world.theta = world.initial_angle();
                world.omega = 0.0;
            }
        }
        self.record(EngineCall::SetCurrentTime(time));
        Ok(())
    }

    #[instrument(name = "mock_engine_read", skip(self), level = "trace")]
    async fn read_scalar_state(&self, experiment_id: &str) -> Result<ScalarState, ContractError> {
        Ok(self.scalar_state(experiment_id)?)
    }

    async fn apply_mutable_parameter(&self, entity_path: &str, name: &str, value: f64) -> bool {
        let applied = !self.unresolved.lock().contains(entity_path) && {
            let mut world = self.world.lock();
            world.sync(Instant::now());
            let role = match world.entities.get_mut(entity_path) {
                Some(entity) => {
                    entity.attributes.insert(name.to_string(), value);
                    Some(entity.role)
                }
                None => None,
            };
            match (role, name) {
                (Some(Role::Disk), "angular_velocity_z") => world.disk_w = value,
                (Some(Role::Ring), "angular_velocity_z") => world.ring_w = value,
                (Some(Role::Bob), "initial_angle") if !world.advancing => world.theta = value,
                _ => {}
            }
            role.is_some()
        };

        self.record(EngineCall::ApplyParameter {
            entity_path: entity_path.to_string(),
            name: name.to_string(),
            value,
            applied,
        });
        applied
    }

    async fn reset_all_motion(&self) -> Result<usize, ContractError> {
        let entities = {
            let mut world = self.world.lock();
            world.sync(Instant::now());
            world.disk_w = 0.0;
            world.ring_w = 0.0;
            world.omega = 0.0;
            world.entities.values().filter(|e| e.role.is_dynamic()).count()
        };
        self.record(EngineCall::ResetAllMotion { entities });
        Ok(entities)
    }

    async fn apply_camera_pose(&self, pose: &CameraPose) -> bool {
        self.world.lock().camera = Some(*pose);
        self.record(EngineCall::ApplyCameraPose(*pose));
        true
    }
}
