//! Command-line surface of the `labcast` binary.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// labcast - remote viewing and control for a running physics simulation
#[derive(Parser, Debug)]
#[command(
    name = "labcast",
    author,
    version,
    about = "Live video, telemetry and control for a simulation station",
    long_about = "Serves a live video feed, derived telemetry and a debounced control \n\
                  channel over WebSocket for a running physics simulation.\n\n\
                  The bundled stand-in engine simulates a disk/ring rig and a pendulum."
)]
pub struct Cli {
    /// -v for debug logs, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "LABCAST_VERBOSE")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "LABCAST_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve video, telemetry and control
    Run(RunArgs),

    /// Check a configuration file without serving
    Validate(ValidateArgs),

    /// Describe a configuration file
    Info(InfoArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Validate(_) => "validate",
            Self::Info(_) => "info",
        }
    }
}

/// `labcast run`
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); the bundled station when omitted
    #[arg(short, long, env = "LABCAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override listen address
    #[arg(long, env = "LABCAST_HOST")]
    pub host: Option<String>,

    /// Override control channel port
    #[arg(long, env = "LABCAST_CONTROL_PORT")]
    pub control_port: Option<u16>,

    /// Override video channel port
    #[arg(long, env = "LABCAST_VIDEO_PORT")]
    pub video_port: Option<u16>,

    /// Override target frame rate
    #[arg(long, env = "LABCAST_FPS")]
    pub fps: Option<u32>,

    /// Metrics server port (0 = disabled, unset = from configuration)
    #[arg(long, env = "LABCAST_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Stop after this many seconds (0 = run until Ctrl+C)
    #[arg(long, default_value = "0", env = "LABCAST_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without serving
    #[arg(long)]
    pub dry_run: bool,
}

/// `labcast validate`
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Station configuration to check
    #[arg(short, long, default_value = "config/station.toml")]
    pub config: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// `labcast info`
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Station configuration to describe
    #[arg(short, long, default_value = "config/station.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show experiment entities and parameters
    #[arg(long)]
    pub experiments: bool,

    /// List configured output sinks
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Multi-line, for terminals
    #[default]
    Pretty,
    /// One line per event
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "labcast",
            "-v",
            "run",
            "--control-port",
            "4000",
            "--fps",
            "15",
            "--timeout",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.control_port, Some(4000));
        assert_eq!(args.fps, Some(15));
        assert_eq!(args.timeout, 3);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["labcast", "-q", "-v", "info"]).is_err());
    }
}
