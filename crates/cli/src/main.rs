//! # labcast
//!
//! 工作站命令行入口：`run` 启动视频/遥测/控制服务，`validate` 与 `info` 检查配置。

mod cli;
mod commands;
mod error;
mod station;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Exporter is installed by `run` once overrides are applied
    observability::init_with_config(
        ObservabilityConfig::from_verbosity(cli.quiet, cli.verbose).with_format(cli.log_format.into()),
    )?;
    info!(version = env!("CARGO_PKG_VERSION"), command = cli.command.name(), "labcast starting");

    let outcome = match &cli.command {
        Commands::Run(args) => commands::run_station(args).await,
        Commands::Validate(args) => commands::run_validate(args),
        Commands::Info(args) => commands::run_info(args),
    };
    if let Err(e) = &outcome {
        tracing::error!(error = %e, command = cli.command.name(), "labcast failed");
    }
    outcome
}
