//! `validate` command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use contracts::StationBlueprint;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::ValidateArgs;

#[derive(Serialize)]
struct ValidationReport {
    config_path: String,
    #[serde(flatten)]
    verdict: Verdict,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Verdict {
    Valid {
        summary: ConfigSummary,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Invalid {
        error: String,
    },
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    resolution: String,
    fps: u32,
    /// `id:kind` per experiment
    experiments: Vec<String>,
    parameter_count: usize,
    sink_count: usize,
}

impl ConfigSummary {
    fn of(blueprint: &StationBlueprint) -> Self {
        Self {
            version: format!("{:?}", blueprint.version),
            resolution: format!("{}x{}", blueprint.video.width, blueprint.video.height),
            fps: blueprint.video.fps,
            experiments: blueprint
                .experiments
                .iter()
                .map(|e| format!("{}:{:?}", e.id, e.kind))
                .collect(),
            parameter_count: blueprint.experiments.iter().map(|e| e.parameters.len()).sum(),
            sink_count: blueprint.sinks.len(),
        }
    }
}

impl ValidationReport {
    fn is_valid(&self) -> bool {
        matches!(self.verdict, Verdict::Valid { .. })
    }
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");
    let report = check(&args.config);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize validation report")?
        );
    } else {
        print_report(&report);
    }

    if !report.is_valid() {
        anyhow::bail!("Configuration validation failed");
    }
    Ok(())
}

fn check(path: &Path) -> ValidationReport {
    let config_path = path.display().to_string();
    let verdict = if !path.exists() {
        Verdict::Invalid {
            error: format!("File not found: {config_path}"),
        }
    } else {
        match config_loader::ConfigLoader::load_from_path(path) {
            Ok(blueprint) => {
                let warnings = config_loader::collect_warnings(&blueprint);
                for warning in &warnings {
                    warn!(config = %config_path, "{warning}");
                }
                Verdict::Valid {
                    summary: ConfigSummary::of(&blueprint),
                    warnings,
                }
            }
            Err(e) => Verdict::Invalid { error: e.to_string() },
        }
    };
    ValidationReport { config_path, verdict }
}

fn print_report(report: &ValidationReport) {
    match &report.verdict {
        Verdict::Valid { summary, warnings } => {
            println!("[ok] {} is valid", report.config_path);
            println!("     {} @ {} fps, config {}", summary.resolution, summary.fps, summary.version);
            println!(
                "     experiments [{}], {} parameters, {} sinks",
                summary.experiments.join(", "),
                summary.parameter_count,
                summary.sink_count
            );
            for warning in warnings {
                println!("[warn] {warning}");
            }
        }
        Verdict::Invalid { error } => {
            println!("[error] {} is invalid", report.config_path);
            println!("        {error}");
        }
    }
}
