//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use contracts::StationBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    server: ServerInfo,
    video: VideoInfo,
    control: ControlInfo,
    experiments: Vec<ExperimentInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct ServerInfo {
    host: String,
    control_port: u16,
    video_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics_port: Option<u16>,
}

#[derive(Serialize)]
struct VideoInfo {
    width: u32,
    height: u32,
    fps: u32,
    strategies: Vec<String>,
}

#[derive(Serialize)]
struct ControlInfo {
    auto_stop: bool,
    debounce_window_ms: u64,
    telemetry_interval_ms: u64,
}

#[derive(Serialize)]
struct ExperimentInfo {
    id: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    entities: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<ParameterInfo>,
    has_camera: bool,
}

#[derive(Serialize)]
struct ParameterInfo {
    name: String,
    default: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    targets: Vec<String>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &StationBlueprint, args: &InfoArgs) -> ConfigInfo {
    let experiments = blueprint
        .experiments
        .iter()
        .map(|e| {
            let (entities, parameters) = if args.experiments {
                let parameters = e
                    .parameters
                    .iter()
                    .map(|p| ParameterInfo {
                        name: p.name.clone(),
                        default: p.default,
                        min: p.min,
                        max: p.max,
                        targets: p
                            .targets
                            .iter()
                            .map(|t| format!("{}.{}", t.entity, t.attribute))
                            .collect(),
                    })
                    .collect();
                (e.entities.clone(), parameters)
            } else {
                (BTreeMap::new(), Vec::new())
            };
            ExperimentInfo {
                id: e.id.clone(),
                kind: format!("{:?}", e.kind),
                title: e.title.clone(),
                entities,
                parameters,
                has_camera: e.camera.is_some(),
            }
        })
        .collect();

    let sinks = if args.sinks {
        blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        server: ServerInfo {
            host: blueprint.server.host.clone(),
            control_port: blueprint.server.control_port,
            video_port: blueprint.server.video_port,
            metrics_port: blueprint.server.metrics_port,
        },
        video: VideoInfo {
            width: blueprint.video.width,
            height: blueprint.video.height,
            fps: blueprint.video.fps,
            strategies: blueprint.video.strategies.clone(),
        },
        control: ControlInfo {
            auto_stop: blueprint.control.auto_stop,
            debounce_window_ms: blueprint.control.debounce_window_ms,
            telemetry_interval_ms: blueprint.telemetry.interval_ms,
        },
        experiments,
        sinks,
    }
}

fn branch(index: usize, len: usize) -> (&'static str, &'static str) {
    if index + 1 == len {
        ("`-", "   ")
    } else {
        ("|-", "|  ")
    }
}

fn print_config_info(blueprint: &StationBlueprint, args: &InfoArgs) {
    println!("+--------------------------------------------------------------+");
    println!("|                labcast Station Configuration                 |");
    println!("+--------------------------------------------------------------+\n");

    let server = &blueprint.server;
    println!("Server");
    println!("   |- Version: {:?}", blueprint.version);
    println!("   |- Control: ws://{}:{}", server.host, server.control_port);
    println!("   |- Video: ws://{}:{}", server.host, server.video_port);
    match server.metrics_port {
        Some(port) => println!("   `- Metrics: port {}", port),
        None => println!("   `- Metrics: disabled"),
    }

    let video = &blueprint.video;
    println!("\nVideo");
    println!("   |- Output: {}x{} @ {} fps", video.width, video.height, video.fps);
    println!("   |- Warm-up frames: {}", video.warmup_frames);
    println!("   `- Strategies: {}", video.strategies.join(" -> "));

    let control = &blueprint.control;
    println!("\nControl");
    println!("   |- Auto-stop: {}", control.auto_stop);
    println!("   |- Debounce window: {} ms", control.debounce_window_ms);
    println!("   `- Telemetry interval: {} ms", blueprint.telemetry.interval_ms);

    println!("\nExperiments ({})", blueprint.experiments.len());
    for (i, experiment) in blueprint.experiments.iter().enumerate() {
        let (prefix, child_prefix) = branch(i, blueprint.experiments.len());
        let title = experiment.title.as_deref().unwrap_or("untitled");
        println!("   {} {} ({:?}) - {}", prefix, experiment.id, experiment.kind, title);

        if args.experiments {
            for (role, path) in &experiment.entities {
                println!("   {}  entity {} = {}", child_prefix, role, path);
            }
            for parameter in &experiment.parameters {
                let min = parameter.min.map_or_else(|| "-inf".to_string(), |v| v.to_string());
                let max = parameter.max.map_or_else(|| "inf".to_string(), |v| v.to_string());
                println!(
                    "   {}  set_{} default={} range=[{}, {}]",
                    child_prefix, parameter.name, parameter.default, min, max
                );
            }
        } else {
            println!(
                "   {}  {} entities, {} parameters",
                child_prefix,
                experiment.entities.len(),
                experiment.parameters.len()
            );
        }
    }

    if args.sinks && !blueprint.sinks.is_empty() {
        println!("\nSinks ({})", blueprint.sinks.len());
        for (i, sink) in blueprint.sinks.iter().enumerate() {
            let (prefix, _) = branch(i, blueprint.sinks.len());
            println!("   {} {} ({:?})", prefix, sink.name, sink.sink_type);
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(experiments: bool, sinks: bool) -> InfoArgs {
        InfoArgs {
            config: "config/station.toml".into(),
            json: true,
            experiments,
            sinks,
        }
    }

    #[test]
    fn test_detail_flags() {
        let blueprint = config_loader::ConfigLoader::builtin().unwrap();

        let brief = build_config_info(&blueprint, &args(false, false));
        assert_eq!(brief.experiments.len(), 2);
        assert!(brief.experiments.iter().all(|e| e.parameters.is_empty()));
        assert!(brief.sinks.is_empty());

        let full = build_config_info(&blueprint, &args(true, true));
        let rig = &full.experiments[0];
        assert!(rig.has_camera);
        let mass = rig.parameters.iter().find(|p| p.name == "mass").unwrap();
        assert_eq!(mass.targets, vec!["disk.mass", "ring.mass"]);
        assert_eq!(full.sinks.len(), 1);
    }

    #[test]
    fn test_branch_markers() {
        assert_eq!(branch(0, 2).0, "|-");
        assert_eq!(branch(1, 2).0, "`-");
    }
}
