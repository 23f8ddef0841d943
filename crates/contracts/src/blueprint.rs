//! StationBlueprint - Config Loader 输出
//!
//! 描述完整的工作站配置：服务端口、视频管线、遥测、控制策略、实验目录、输出路由。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use validator::Validate;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的工作站配置蓝图
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct StationBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 服务端设置
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// 视频管线设置
    #[serde(default)]
    #[validate(nested)]
    pub video: VideoConfig,

    /// 遥测广播设置
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,

    /// 命令控制设置
    #[serde(default)]
    #[validate(nested)]
    pub control: ControlConfig,

    /// 实验目录
    #[serde(default)]
    #[validate(nested)]
    pub experiments: Vec<ExperimentDefinition>,

    /// 输出路由配置
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,
}

impl StationBlueprint {
    /// 按 ID 查找实验
    pub fn experiment(&self, id: &str) -> Option<&ExperimentDefinition> {
        self.experiments.iter().find(|e| e.id == id)
    }
}

/// 服务端配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// 控制通道 (WebSocket JSON) 端口
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// 视频通道 (WebSocket binary) 端口
    #[serde(default = "default_video_port")]
    pub video_port: u16,

    /// Prometheus 端口 (None = 禁用)
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            control_port: default_control_port(),
            video_port: default_video_port(),
            metrics_port: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_control_port() -> u16 {
    30000
}

fn default_video_port() -> u16 {
    30001
}

/// 视频管线配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VideoConfig {
    /// 输出宽度 (奇数会向下取偶)
    #[serde(default = "default_width")]
    #[validate(range(min = 2, max = 7680))]
    pub width: u32,

    /// 输出高度 (奇数会向下取偶)
    #[serde(default = "default_height")]
    #[validate(range(min = 2, max = 4320))]
    pub height: u32,

    /// 目标帧率
    #[serde(default = "default_fps")]
    #[validate(range(min = 1, max = 240))]
    pub fps: u32,

    /// 单次采集超时 (毫秒)
    #[serde(default = "default_capture_timeout_ms")]
    #[validate(range(min = 1))]
    pub capture_timeout_ms: u64,

    /// 启动时的预热占位帧数
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,

    /// 采集策略优先级 (按顺序尝试)
    #[serde(default = "default_strategies")]
    #[validate(length(min = 1))]
    pub strategies: Vec<String>,

    /// 单个策略初始化的最大重试次数
    #[serde(default = "default_init_max_retries")]
    pub init_max_retries: u32,

    /// 连续失败多少帧后才重新初始化
    #[serde(default = "default_reinit_after_failures")]
    #[validate(range(min = 1))]
    pub reinit_after_failures: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            capture_timeout_ms: default_capture_timeout_ms(),
            warmup_frames: default_warmup_frames(),
            strategies: default_strategies(),
            init_max_retries: default_init_max_retries(),
            reinit_after_failures: default_reinit_after_failures(),
        }
    }
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

fn default_capture_timeout_ms() -> u64 {
    200
}

fn default_warmup_frames() -> u32 {
    5
}

fn default_strategies() -> Vec<String> {
    vec!["render_product".to_string(), "viewport".to_string()]
}

fn default_init_max_retries() -> u32 {
    3
}

fn default_reinit_after_failures() -> u32 {
    30
}

/// 遥测广播配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TelemetryConfig {
    /// 轮询/广播周期 (毫秒)
    #[serde(default = "default_interval_ms")]
    #[validate(range(min = 1))]
    pub interval_ms: u64,

    /// simulation_state 广播周期 (毫秒)
    #[serde(default = "default_state_interval_ms")]
    #[validate(range(min = 1))]
    pub state_interval_ms: u64,

    /// auto_stopped 通知的最小间隔 (毫秒)
    #[serde(default = "default_auto_stop_notice_interval_ms")]
    pub auto_stop_notice_interval_ms: u64,

    /// 角速度缩放系数 (历史版本出现过 1 / 10 / 1000，统一在此配置)
    #[serde(default = "default_angular_velocity_scale")]
    pub angular_velocity_scale: f64,

    /// 过零点保留窗口 (秒)
    #[serde(default = "default_period_window_s")]
    pub period_window_s: f64,

    /// 可接受周期下限 (秒)
    #[serde(default = "default_period_min_s")]
    pub period_min_s: f64,

    /// 可接受周期上限 (秒)
    #[serde(default = "default_period_max_s")]
    pub period_max_s: f64,

    /// 周期滑动平均样本数
    #[serde(default = "default_period_smoothing")]
    #[validate(range(min = 1, max = 64))]
    pub period_smoothing: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            state_interval_ms: default_state_interval_ms(),
            auto_stop_notice_interval_ms: default_auto_stop_notice_interval_ms(),
            angular_velocity_scale: default_angular_velocity_scale(),
            period_window_s: default_period_window_s(),
            period_min_s: default_period_min_s(),
            period_max_s: default_period_max_s(),
            period_smoothing: default_period_smoothing(),
        }
    }
}

fn default_interval_ms() -> u64 {
    50
}

fn default_state_interval_ms() -> u64 {
    2000
}

fn default_auto_stop_notice_interval_ms() -> u64 {
    2000
}

fn default_angular_velocity_scale() -> f64 {
    1.0
}

fn default_period_window_s() -> f64 {
    10.0
}

fn default_period_min_s() -> f64 {
    0.3
}

fn default_period_max_s() -> f64 {
    10.0
}

fn default_period_smoothing() -> usize {
    3
}

/// 命令控制配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ControlConfig {
    /// 去抖窗口 (毫秒)
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,

    /// reset 互斥门获取超时 (毫秒)
    #[serde(default = "default_reset_gate_timeout_ms")]
    #[validate(range(min = 1))]
    pub reset_gate_timeout_ms: u64,

    /// 暂停-修改-恢复 之间的等待量子 (毫秒)
    #[serde(default = "default_mutation_quantum_ms")]
    pub mutation_quantum_ms: u64,

    /// 实体未解析时的重试次数
    #[serde(default = "default_mutation_retries")]
    #[validate(range(min = 1, max = 20))]
    pub mutation_retries: u32,

    /// 重试间隔 (毫秒)
    #[serde(default = "default_mutation_retry_delay_ms")]
    pub mutation_retry_delay_ms: u64,

    /// 是否启用自动停止
    #[serde(default = "default_auto_stop")]
    pub auto_stop: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: default_debounce_window_ms(),
            reset_gate_timeout_ms: default_reset_gate_timeout_ms(),
            mutation_quantum_ms: default_mutation_quantum_ms(),
            mutation_retries: default_mutation_retries(),
            mutation_retry_delay_ms: default_mutation_retry_delay_ms(),
            auto_stop: default_auto_stop(),
        }
    }
}

fn default_debounce_window_ms() -> u64 {
    500
}

fn default_reset_gate_timeout_ms() -> u64 {
    30_000
}

fn default_mutation_quantum_ms() -> u64 {
    50
}

fn default_mutation_retries() -> u32 {
    3
}

fn default_mutation_retry_delay_ms() -> u64 {
    200
}

fn default_auto_stop() -> bool {
    true
}

/// 实验类型 (决定遥测 schema)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    /// 圆盘 + 圆环角动量守恒
    AngularMomentum,
    /// 单摆
    Pendulum,
    /// 无专用 schema，原样转发标量
    #[default]
    Generic,
}

/// 实验定义
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExperimentDefinition {
    /// 唯一标识符
    #[validate(length(min = 1))]
    pub id: String,

    /// 实验类型
    #[serde(default)]
    pub kind: ExperimentKind,

    /// 显示名称
    #[serde(default)]
    pub title: Option<String>,

    /// 角色 -> 场景实体路径 (e.g., "disk" -> "/World/exp1/disk")
    #[serde(default)]
    pub entities: BTreeMap<String, String>,

    /// 可调参数
    #[serde(default)]
    #[validate(nested)]
    pub parameters: Vec<ParameterSpec>,

    /// 固定相机位姿 (可选)
    #[serde(default)]
    pub camera: Option<CameraPose>,
}

impl ExperimentDefinition {
    /// 按名称查找参数
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// 参数默认值表
    pub fn default_parameters(&self) -> BTreeMap<String, f64> {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.default))
            .collect()
    }

    /// 解析实体角色为路径
    pub fn entity_path(&self, role: &str) -> Option<&str> {
        self.entities.get(role).map(String::as_str)
    }
}

/// 可调参数定义
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ParameterSpec {
    /// 参数名 (命令为 `set_<name>`)
    #[validate(length(min = 1))]
    pub name: String,

    /// 写入目标；为空时只记录在会话中 (e.g., 惯量系数)
    #[serde(default)]
    pub targets: Vec<ParameterTarget>,

    /// 默认值
    pub default: f64,

    /// 下限
    #[serde(default)]
    pub min: Option<f64>,

    /// 上限
    #[serde(default)]
    pub max: Option<f64>,
}

impl ParameterSpec {
    /// 值是否在允许范围内
    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite()
            && self.min.map_or(true, |min| value >= min)
            && self.max.map_or(true, |max| value <= max)
    }
}

/// 参数写入目标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterTarget {
    /// 实体角色 (引用 `entities` 中的键)
    pub entity: String,

    /// 引擎属性名 (e.g., "mass", "angular_velocity_z")
    pub attribute: String,
}

/// 相机位姿
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// 位置 (x, y, z) 单位：米
    pub position: [f64; 3],

    /// 注视点
    pub target: [f64; 3],

    /// 垂直视场角 (度)
    #[serde(default = "default_fov")]
    pub fov_deg: f64,
}

fn default_fov() -> f64 {
    60.0
}

/// Sink 输出配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Sink 名称
    #[validate(length(min = 1))]
    pub name: String,

    /// Sink 类型
    pub sink_type: SinkType,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Sink 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// 日志输出 (消息通道)
    Log,
    /// PNG 快照 (视频通道)
    Snapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_experiment() -> ExperimentDefinition {
        ExperimentDefinition {
            id: "1".into(),
            kind: ExperimentKind::AngularMomentum,
            title: None,
            entities: BTreeMap::from([
                ("disk".into(), "/World/exp1/disk".into()),
                ("ring".into(), "/World/exp1/ring".into()),
            ]),
            parameters: vec![ParameterSpec {
                name: "disk_mass".into(),
                targets: vec![ParameterTarget {
                    entity: "disk".into(),
                    attribute: "mass".into(),
                }],
                default: 1.0,
                min: Some(0.01),
                max: Some(100.0),
            }],
            camera: None,
        }
    }

    #[test]
    fn test_defaults_match_station_constants() {
        let bp = StationBlueprint::default();
        assert_eq!(bp.video.width, 1280);
        assert_eq!(bp.video.height, 720);
        assert_eq!(bp.video.fps, 30);
        assert_eq!(bp.telemetry.interval_ms, 50);
        assert_eq!(bp.control.debounce_window_ms, 500);
        assert_eq!(bp.server.control_port, 30000);
    }

    #[test]
    fn test_parameter_lookup_and_defaults() {
        let exp = sample_experiment();
        assert!(exp.parameter("disk_mass").is_some());
        assert!(exp.parameter("ring_mass").is_none());
        assert_eq!(exp.default_parameters().get("disk_mass"), Some(&1.0));
        assert_eq!(exp.entity_path("disk"), Some("/World/exp1/disk"));
    }

    #[test]
    fn test_parameter_bounds() {
        let exp = sample_experiment();
        let spec = exp.parameter("disk_mass").unwrap();
        assert!(spec.accepts(5.0));
        assert!(!spec.accepts(0.0));
        assert!(!spec.accepts(f64::NAN));
        assert!(!spec.accepts(1000.0));
    }

    #[test]
    fn test_nested_validation() {
        let mut bp = StationBlueprint::default();
        assert!(bp.validate().is_ok());
        bp.video.fps = 0;
        assert!(bp.validate().is_err());
    }
}
