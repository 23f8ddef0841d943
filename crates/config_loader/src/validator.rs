//! 配置校验模块
//!
//! 校验规则：
//! - 字段范围 (`validator` derive，嵌套结构一并校验)
//! - experiment_id 唯一
//! - 同一实验内参数名唯一，参数目标引用已声明的实体角色
//! - 参数默认值在 [min, max] 内
//! - 周期上下限有序
//! - 采集策略名称合法
//! - sink 名称唯一

use std::collections::HashSet;

use contracts::{ContractError, ExperimentKind, StationBlueprint};
use validator::Validate;

/// 已知的采集策略名称
pub const KNOWN_STRATEGIES: [&str; 2] = ["render_product", "viewport"];

/// 校验 StationBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &StationBlueprint) -> Result<(), ContractError> {
    validate_fields(blueprint)?;
    validate_strategies(blueprint)?;
    validate_period_bounds(blueprint)?;
    validate_experiment_ids(blueprint)?;
    validate_parameters(blueprint)?;
    validate_sinks(blueprint)?;
    Ok(())
}

/// 字段级校验 (derive)
fn validate_fields(blueprint: &StationBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|e| ContractError::config_validation("station", e.to_string()))
}

/// 校验采集策略
fn validate_strategies(blueprint: &StationBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, name) in blueprint.video.strategies.iter().enumerate() {
        if !KNOWN_STRATEGIES.contains(&name.as_str()) {
            return Err(ContractError::config_validation(
                format!("video.strategies[{idx}]"),
                format!("unknown capture strategy '{name}', expected one of {KNOWN_STRATEGIES:?}"),
            ));
        }
        if !seen.insert(name) {
            return Err(ContractError::config_validation(
                format!("video.strategies[{idx}]"),
                format!("duplicate capture strategy '{name}'"),
            ));
        }
    }
    Ok(())
}

/// 校验周期估计范围
fn validate_period_bounds(blueprint: &StationBlueprint) -> Result<(), ContractError> {
    let t = &blueprint.telemetry;
    if !(t.period_min_s > 0.0 && t.period_min_s < t.period_max_s) {
        return Err(ContractError::config_validation(
            "telemetry.period_min_s / telemetry.period_max_s",
            format!(
                "need 0 < period_min_s ({}) < period_max_s ({})",
                t.period_min_s, t.period_max_s
            ),
        ));
    }
    if t.period_window_s < t.period_max_s {
        return Err(ContractError::config_validation(
            "telemetry.period_window_s",
            format!(
                "window ({}s) must cover period_max_s ({}s)",
                t.period_window_s, t.period_max_s
            ),
        ));
    }
    if !t.angular_velocity_scale.is_finite() || t.angular_velocity_scale == 0.0 {
        return Err(ContractError::config_validation(
            "telemetry.angular_velocity_scale",
            "scale must be finite and non-zero",
        ));
    }
    Ok(())
}

/// 校验 experiment_id 唯一性
fn validate_experiment_ids(blueprint: &StationBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for experiment in &blueprint.experiments {
        if !seen.insert(&experiment.id) {
            return Err(ContractError::config_validation(
                format!("experiments[id={}]", experiment.id),
                "duplicate experiment_id",
            ));
        }
    }
    Ok(())
}

/// 校验参数定义
fn validate_parameters(blueprint: &StationBlueprint) -> Result<(), ContractError> {
    for experiment in &blueprint.experiments {
        let mut seen = HashSet::new();
        for param in &experiment.parameters {
            let field = format!("experiments[{}].parameters[{}]", experiment.id, param.name);

            if !seen.insert(&param.name) {
                return Err(ContractError::config_validation(field, "duplicate parameter name"));
            }

            if param.name == "auto_stop" {
                return Err(ContractError::config_validation(
                    field,
                    "'auto_stop' is reserved for set_auto_stop",
                ));
            }

            if let (Some(min), Some(max)) = (param.min, param.max) {
                if min > max {
                    return Err(ContractError::config_validation(
                        field,
                        format!("min ({min}) must be <= max ({max})"),
                    ));
                }
            }

            if !param.accepts(param.default) {
                return Err(ContractError::config_validation(
                    field,
                    format!("default {} outside allowed range", param.default),
                ));
            }

            for target in &param.targets {
                if experiment.entity_path(&target.entity).is_none() {
                    return Err(ContractError::config_validation(
                        field,
                        format!("target entity role '{}' is not declared", target.entity),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// 校验 sink 配置
fn validate_sinks(blueprint: &StationBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if !seen.insert(&sink.name) {
            return Err(ContractError::config_validation(
                format!("sinks[{}].name", idx),
                format!("duplicate sink name '{}'", sink.name),
            ));
        }
    }
    Ok(())
}

/// 收集非致命问题
pub fn collect_warnings(blueprint: &StationBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.experiments.is_empty() {
        warnings.push("No experiments configured - telemetry falls back to generic samples".to_string());
    }

    if blueprint.video.width % 2 != 0 || blueprint.video.height % 2 != 0 {
        warnings.push(format!(
            "Video size {}x{} is odd - output will be rounded down to even",
            blueprint.video.width, blueprint.video.height
        ));
    }

    for experiment in &blueprint.experiments {
        if experiment.kind == ExperimentKind::AngularMomentum {
            for role in ["disk", "ring"] {
                if experiment.entity_path(role).is_none() {
                    warnings.push(format!(
                        "Experiment '{}' has no '{}' entity - its angular velocity reads as 0",
                        experiment.id, role
                    ));
                }
            }
        }
        if experiment.parameters.is_empty() {
            warnings.push(format!(
                "Experiment '{}' declares no parameters - set_<parameter> commands will be rejected",
                experiment.id
            ));
        }
    }

    if blueprint.control.debounce_window_ms == 0 {
        warnings.push("control.debounce_window_ms is 0 - duplicate commands are not suppressed".to_string());
    }

    if !blueprint.control.auto_stop {
        warnings.push("control.auto_stop is disabled - the engine may advance without user control".to_string());
    }

    warnings
}
