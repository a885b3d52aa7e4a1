//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::ServiceBlueprint;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::service::{RunnerConfig, ServiceRunner};

/// Execute the `run` command
pub async fn run_service(args: &RunArgs, env_name: Option<&str>) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    // Validate config path
    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    // Load and parse configuration
    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut blueprint, args, env_name);

    for warning in config_loader::ConfigLoader::warnings(&blueprint) {
        warn!("{}", warning);
    }

    info!(
        service = %blueprint.service.name,
        env = %blueprint.service.env,
        broker = blueprint.broker.kind.as_str(),
        endpoints = blueprint.endpoints.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let runner = ServiceRunner::new(RunnerConfig {
        blueprint,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
        demo_messages: args.demo_messages,
    });

    // Setup graceful shutdown handler
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        setup_shutdown_signal().await;
        warn!("Received shutdown signal, stopping consumers...");
        trigger.cancel();
    });

    info!("Starting consumers...");
    let stats = runner.run(shutdown).await.context("Consumer service failed")?;

    info!(
        handled = stats.dispatch.handled,
        failed = stats.dispatch.failed,
        consume_errors = stats.dispatch.consume_errors,
        duration_secs = stats.duration.as_secs_f64(),
        "Consumers finished"
    );
    stats.print_summary();

    if !stats.drained {
        return Err(CliError::shutdown("workers still running after shutdown timeout").into());
    }

    info!("Consumer service finished");
    Ok(())
}

/// Apply CLI and environment overrides on top of the file
fn apply_overrides(blueprint: &mut ServiceBlueprint, args: &RunArgs, env_name: Option<&str>) {
    if let Some(ref url) = args.broker_url {
        info!("Overriding broker URL from CLI");
        blueprint.broker.url = url.clone();
    }
    if let Some(workers) = args.workers {
        info!(workers, "Overriding worker count of every endpoint");
        for spec in blueprint.endpoints.values_mut() {
            spec.workers = workers;
        }
    }
    if let Some(buffer) = args.error_buffer {
        info!(buffer, "Overriding error buffer from CLI");
        blueprint.dispatcher.error_buffer = buffer;
    }
    if let Some(secs) = args.shutdown_timeout {
        info!(secs, "Overriding shutdown timeout from CLI");
        blueprint.dispatcher.shutdown_timeout_secs = secs;
    }
    if let Some(env) = env_name {
        blueprint.service.env = env.to_string();
    }
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &ServiceBlueprint) {
    println!("\n=== Configuration Summary ===\n");
    println!("Service:");
    println!("  Name: {}", blueprint.service.name);
    println!("  Env: {}", blueprint.service.env);
    println!("\nBroker:");
    println!("  Kind: {}", blueprint.broker.kind.as_str());
    println!("  URL: {}", blueprint.broker.url);
    println!("  Prefetch: {}", blueprint.broker.prefetch);
    println!("  Reconnect delay: {}ms", blueprint.broker.reconnect_delay_ms);
    println!("\nDispatcher:");
    println!("  Error buffer: {}", blueprint.dispatcher.error_buffer);
    println!("  Shutdown timeout: {}s", blueprint.dispatcher.shutdown_timeout_secs);
    println!("  Ack policy: {}", blueprint.dispatcher.ack_policy.as_str());

    let mut names: Vec<_> = blueprint.endpoints.keys().collect();
    names.sort();
    println!("\nEndpoints ({}):", names.len());
    for name in names {
        let spec = &blueprint.endpoints[name];
        println!(
            "  - {} -> {} ({} workers, handler {})",
            name, spec.resource, spec.workers, spec.handler
        );
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["consumer-svc", "run"];
        argv.extend_from_slice(extra);
        match crate::cli::Cli::try_parse_from(argv).unwrap().command {
            crate::cli::Commands::Run(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn blueprint() -> ServiceBlueprint {
        config_loader::ConfigLoader::load_from_str(
            r#"
[endpoints.main]
resource = "q-main"
workers = 2

[endpoints.audit]
resource = "q-audit"
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap()
    }

    #[test]
    fn test_overrides_applied() {
        let mut bp = blueprint();
        let args = run_args(&[
            "--broker-url",
            "amqp://rabbit:5672",
            "--workers",
            "7",
            "--error-buffer",
            "8",
            "--shutdown-timeout",
            "3",
        ]);

        apply_overrides(&mut bp, &args, Some("prod"));

        assert_eq!(bp.broker.url, "amqp://rabbit:5672");
        assert!(bp.endpoints.values().all(|e| e.workers == 7));
        assert_eq!(bp.dispatcher.error_buffer, 8);
        assert_eq!(bp.dispatcher.shutdown_timeout_secs, 3);
        assert_eq!(bp.service.env, "prod");
    }

    #[test]
    fn test_no_overrides_keeps_file_values() {
        let mut bp = blueprint();
        apply_overrides(&mut bp, &run_args(&[]), None);

        assert_eq!(bp.endpoints["main"].workers, 2);
        assert_eq!(bp.service.env, "dev");
    }
}
