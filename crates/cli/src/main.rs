//! # Consumer Service CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - Consumer 启动与生命周期管理
//! - 优雅关闭处理

mod cli;
mod commands;
mod error;
mod service;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_info, run_service, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging based on CLI options
    init_logging(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Consumer service CLI starting"
    );

    // Execute command
    let result = match &cli.command {
        Commands::Run(args) => run_service(args, cli.env_name.as_deref()).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging based on CLI options
///
/// Metrics are installed later by `run`, only when a port is configured.
fn init_logging(cli: &Cli) -> Result<()> {
    let env_name = cli.env_name.as_deref().unwrap_or("dev");
    let mut config = ObservabilityConfig::for_env(env_name);

    if let Some(format) = cli.log_format {
        config.log_format = format.into();
    }
    config.default_log_level = if cli.quiet {
        "warn".to_string()
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
        .to_string()
    };

    observability::init_with_config(config)
}
