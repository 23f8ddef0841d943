//! 遥测派生
//!
//! 按当前实验类型把引擎标量组装为 `TelemetrySample`。

use std::collections::BTreeMap;

use chrono::Utc;
use contracts::{
    AngularMomentumSample, ExperimentDefinition, ExperimentKind, GenericSample, PendulumSample,
    ScalarState, TelemetryConfig, TelemetrySample,
};

use crate::error::{Result, TelemetryError};
use crate::period::{PeriodConfig, PeriodEstimator};

/// 引擎状态中的标量名
pub mod quantity {
    pub const DISK_ANGULAR_VELOCITY: &str = "disk_angular_velocity";
    pub const RING_ANGULAR_VELOCITY: &str = "ring_angular_velocity";
    pub const ANGLE: &str = "angle";
    pub const ANGULAR_VELOCITY: &str = "angular_velocity";
}

/// 转动惯量参数名及缺省值
const INERTIA_DEFAULTS: [(&str, f64); 6] = [
    ("disk_mass", 1.0),
    ("ring_mass", 1.0),
    ("disk_radius", 0.5),
    ("ring_radius", 0.5),
    ("disk_inertia_factor", 0.5),
    ("ring_inertia_factor", 0.5),
];

fn inertia_param(params: &BTreeMap<String, f64>, name: &str) -> f64 {
    params.get(name).copied().unwrap_or_else(|| {
        INERTIA_DEFAULTS
            .iter()
            .find(|(n, _)| *n == name)
            .map_or(0.0, |(_, v)| *v)
    })
}

/// I = k·m·r²
fn moment_of_inertia(params: &BTreeMap<String, f64>, body: &str) -> f64 {
    let mass = inertia_param(params, &format!("{body}_mass"));
    let radius = inertia_param(params, &format!("{body}_radius"));
    let factor = inertia_param(params, &format!("{body}_inertia_factor"));
    factor * mass * radius * radius
}

/// 每个实验类型一份派生逻辑，周期估计器跨 tick 保留
#[derive(Debug)]
pub struct TelemetryDeriver {
    angular_velocity_scale: f64,
    period: PeriodEstimator,
    experiment_id: Option<String>,
}

impl TelemetryDeriver {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            angular_velocity_scale: config.angular_velocity_scale,
            period: PeriodEstimator::new(PeriodConfig::from(config)),
            experiment_id: None,
        }
    }

    /// 组装一条遥测
    ///
    /// `experiment` 为 None 时输出原始标量 (Generic)。切换实验会清空周期历史。
    pub fn derive(
        &mut self,
        experiment: Option<&ExperimentDefinition>,
        params: &BTreeMap<String, f64>,
        state: &ScalarState,
        is_running: bool,
    ) -> Result<TelemetrySample> {
        let id = experiment.map(|e| e.id.as_str());
        if self.experiment_id.as_deref() != id {
            self.period.reset();
            self.experiment_id = id.map(str::to_string);
        }

        let Some(experiment) = experiment else {
            return Ok(self.generic(None, state, is_running));
        };

        match experiment.kind {
            ExperimentKind::AngularMomentum => {
                self.angular_momentum(&experiment.id, params, state, is_running)
            }
            ExperimentKind::Pendulum => self.pendulum(&experiment.id, state, is_running),
            ExperimentKind::Generic => {
                Ok(self.generic(Some(experiment.id.clone()), state, is_running))
            }
        }
    }

    /// 当前平滑周期
    pub fn period(&self) -> Option<f64> {
        self.period.period()
    }

    pub fn reset(&mut self) {
        self.period.reset();
        self.experiment_id = None;
    }

    fn angular_momentum(
        &self,
        experiment_id: &str,
        params: &BTreeMap<String, f64>,
        state: &ScalarState,
        is_running: bool,
    ) -> Result<TelemetrySample> {
        let require = |name: &str| {
            state
                .get(name)
                .ok_or_else(|| TelemetryError::missing_quantity(experiment_id, name))
        };
        let disk_w = require(quantity::DISK_ANGULAR_VELOCITY)? * self.angular_velocity_scale;
        let ring_w = require(quantity::RING_ANGULAR_VELOCITY)? * self.angular_velocity_scale;

        let disk_l = moment_of_inertia(params, "disk") * disk_w;
        let ring_l = moment_of_inertia(params, "ring") * ring_w;

        Ok(TelemetrySample::AngularMomentum(AngularMomentumSample {
            experiment_id: experiment_id.to_string(),
            timestamp: Utc::now(),
            sim_time: state.sim_time,
            is_running,
            disk_angular_velocity: disk_w,
            ring_angular_velocity: ring_w,
            disk_angular_momentum: disk_l,
            ring_angular_momentum: ring_l,
            total_angular_momentum: disk_l + ring_l,
        }))
    }

    fn pendulum(
        &mut self,
        experiment_id: &str,
        state: &ScalarState,
        is_running: bool,
    ) -> Result<TelemetrySample> {
        let angle = state
            .get(quantity::ANGLE)
            .ok_or_else(|| TelemetryError::missing_quantity(experiment_id, quantity::ANGLE))?;
        let angular_velocity = state.get(quantity::ANGULAR_VELOCITY).unwrap_or(0.0);
        let period = self.period.update(state.sim_time, angle);

        Ok(TelemetrySample::Pendulum(PendulumSample {
            experiment_id: experiment_id.to_string(),
            timestamp: Utc::now(),
            sim_time: state.sim_time,
            is_running,
            angle,
            angular_velocity,
            period,
        }))
    }

    fn generic(
        &self,
        experiment_id: Option<String>,
        state: &ScalarState,
        is_running: bool,
    ) -> TelemetrySample {
        TelemetrySample::Generic(GenericSample {
            experiment_id,
            timestamp: Utc::now(),
            sim_time: state.sim_time,
            is_running,
            values: state.values.clone(),
        })
    }
}
