//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::StationBlueprint;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::station::Station;

/// Execute the `run` command
pub async fn run_station(args: &RunArgs) -> Result<()> {
    let mut blueprint = load_blueprint(args)?;
    apply_overrides(&mut blueprint, args);

    info!(
        host = %blueprint.server.host,
        control_port = blueprint.server.control_port,
        video_port = blueprint.server.video_port,
        fps = blueprint.video.fps,
        experiments = blueprint.experiments.len(),
        sinks = blueprint.sinks.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    if let Some(port) = blueprint.server.metrics_port {
        observability::init_metrics_only(port).map_err(|e| CliError::metrics(port, e.to_string()))?;
    }

    let timeout = (args.timeout > 0).then(|| Duration::from_secs(args.timeout));
    let station = Station::start(blueprint)
        .await
        .context("Failed to start station")?;

    let stats = station.run_until(shutdown_signal(), timeout).await;
    info!(
        frames = stats.pipeline.frames,
        fps = format!("{:.2}", stats.fps()),
        duration_secs = stats.duration.as_secs_f64(),
        "Station finished"
    );
    stats.print_summary();
    Ok(())
}

fn load_blueprint(args: &RunArgs) -> Result<StationBlueprint> {
    match &args.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => {
            info!("No configuration given, using the bundled station");
            config_loader::ConfigLoader::builtin().context("Bundled configuration is invalid")
        }
    }
}

/// Apply CLI overrides on top of the loaded configuration
fn apply_overrides(blueprint: &mut StationBlueprint, args: &RunArgs) {
    if let Some(ref host) = args.host {
        info!(host = %host, "Overriding listen host from CLI");
        blueprint.server.host = host.clone();
    }
    if let Some(port) = args.control_port {
        info!(port, "Overriding control port from CLI");
        blueprint.server.control_port = port;
    }
    if let Some(port) = args.video_port {
        info!(port, "Overriding video port from CLI");
        blueprint.server.video_port = port;
    }
    if let Some(fps) = args.fps {
        if fps == 0 {
            warn!("Ignoring --fps 0");
        } else {
            info!(fps, "Overriding frame rate from CLI");
            blueprint.video.fps = fps;
        }
    }
    match args.metrics_port {
        Some(0) => blueprint.server.metrics_port = None,
        Some(port) => blueprint.server.metrics_port = Some(port),
        None => {}
    }
}

/// Resolves on Ctrl+C or SIGTERM
///
/// A handler that cannot be installed never fires; the other one still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &StationBlueprint) {
    let server = &blueprint.server;
    println!("\n=== Configuration Summary ===\n");
    println!("Server:");
    println!("  Control: ws://{}:{}", server.host, server.control_port);
    println!("  Video:   ws://{}:{}", server.host, server.video_port);
    match server.metrics_port {
        Some(port) => println!("  Metrics: http://{}:{}/metrics", server.host, port),
        None => println!("  Metrics: disabled"),
    }

    let video = &blueprint.video;
    println!("\nVideo:");
    println!("  {}x{} @ {} fps", video.width, video.height, video.fps);
    println!("  Strategies: {}", video.strategies.join(" -> "));

    println!("\nExperiments ({}):", blueprint.experiments.len());
    for experiment in &blueprint.experiments {
        println!(
            "  - {} ({:?}) - {} parameters",
            experiment.id,
            experiment.kind,
            experiment.parameters.len()
        );
    }

    if !blueprint.sinks.is_empty() {
        println!("\nSinks ({}):", blueprint.sinks.len());
        for sink in &blueprint.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            config: None,
            host: None,
            control_port: None,
            video_port: None,
            fps: None,
            metrics_port: None,
            timeout: 0,
            dry_run: false,
        }
    }

    #[test]
    fn test_overrides_applied() {
        let mut blueprint = config_loader::ConfigLoader::builtin().unwrap();
        blueprint.server.metrics_port = Some(9000);
        let args = RunArgs {
            host: Some("127.0.0.1".into()),
            control_port: Some(4000),
            fps: Some(0),
            metrics_port: Some(0),
            ..args()
        };
        apply_overrides(&mut blueprint, &args);

        assert_eq!(blueprint.server.host, "127.0.0.1");
        assert_eq!(blueprint.server.control_port, 4000);
        assert_eq!(blueprint.server.video_port, 30001);
        assert_eq!(blueprint.video.fps, 30);
        assert_eq!(blueprint.server.metrics_port, None);
    }

    #[test]
    fn test_missing_config_reported() {
        let args = RunArgs {
            config: Some("/nonexistent/station.toml".into()),
            ..args()
        };
        let err = load_blueprint(&args).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_bind() {
        let args = RunArgs {
            dry_run: true,
            ..args()
        };
        run_station(&args).await.unwrap();
    }
}
