//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Consumer service - broker consumer dispatch with per-endpoint worker pools
#[derive(Parser, Debug)]
#[command(
    name = "consumer-svc",
    author,
    version,
    about = "Broker message consumer service",
    long_about = "Runs a configurable pool of broker consumers per endpoint.\n\n\
                  Binds each endpoint to a named handler, starts the workers, \n\
                  and reports every consumer failure through a single error watcher."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "CONSUMER_SVC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format (defaults to json for prod, pretty otherwise)
    #[arg(long, value_enum, global = true, env = "CONSUMER_SVC_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Environment name, overrides `service.env` from the configuration
    #[arg(long, global = true, env = "CONSUMER_SVC_ENV_NAME")]
    pub env_name: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the consumers and run until interrupted
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display version and configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "consumer.toml",
        env = "CONSUMER_SVC_CONFIG"
    )]
    pub config: PathBuf,

    /// Override the broker URL from configuration
    #[arg(long, env = "CONSUMER_SVC_RABBIT_URL")]
    pub broker_url: Option<String>,

    /// Override the worker count of every endpoint
    #[arg(long, env = "CONSUMER_SVC_RABBIT_NUM_CONSUMERS", allow_negative_numbers = true)]
    pub workers: Option<i32>,

    /// Override the error channel capacity
    #[arg(long, env = "CONSUMER_SVC_ERROR_BUFFER")]
    pub error_buffer: Option<usize>,

    /// Override how long shutdown waits for workers, in seconds
    #[arg(long, env = "CONSUMER_SVC_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: Option<u64>,

    /// Publish N synthetic messages per endpoint (memory broker only)
    #[arg(long, default_value = "0", env = "CONSUMER_SVC_DEMO_MESSAGES")]
    pub demo_messages: usize,

    /// Validate configuration and exit without starting consumers
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "CONSUMER_SVC_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "consumer.toml", env = "CONSUMER_SVC_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file; version only when absent
    #[arg(short, long, env = "CONSUMER_SVC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
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
