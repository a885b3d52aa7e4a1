//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::ServiceBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Version and configuration info for JSON output
#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
    amqp_support: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<ConfigInfo>,
}

#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    service: String,
    env: String,
    broker: BrokerInfo,
    dispatcher: DispatcherInfo,
    endpoints: Vec<EndpointInfo>,
}

#[derive(Serialize)]
struct BrokerInfo {
    kind: String,
    url: String,
    prefetch: u16,
    consumer_tag_prefix: String,
}

#[derive(Serialize)]
struct DispatcherInfo {
    error_buffer: usize,
    shutdown_timeout_secs: u64,
    ack_policy: String,
}

#[derive(Serialize)]
struct EndpointInfo {
    name: String,
    resource: String,
    workers: i32,
    handler: String,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    let blueprint = match args.config {
        Some(ref path) => {
            info!(config = %path.display(), "Loading configuration info");
            if !path.exists() {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            let blueprint = config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            Some(blueprint)
        }
        None => None,
    };

    let info = build_service_info(blueprint.as_ref());
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize service info")?;
        println!("{}", json);
    } else {
        print_service_info(&info);
    }

    Ok(())
}

fn build_service_info(blueprint: Option<&ServiceBlueprint>) -> ServiceInfo {
    ServiceInfo {
        name: env!("CARGO_BIN_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        amqp_support: cfg!(feature = "amqp"),
        config: blueprint.map(build_config_info),
    }
}

fn build_config_info(blueprint: &ServiceBlueprint) -> ConfigInfo {
    let mut endpoints: Vec<EndpointInfo> = blueprint
        .endpoints
        .iter()
        .map(|(name, spec)| EndpointInfo {
            name: name.clone(),
            resource: spec.resource.clone(),
            workers: spec.workers,
            handler: spec.handler.clone(),
        })
        .collect();
    endpoints.sort_by(|a, b| a.name.cmp(&b.name));

    ConfigInfo {
        version: blueprint.version.as_str().to_string(),
        service: blueprint.service.name.clone(),
        env: blueprint.service.env.clone(),
        broker: BrokerInfo {
            kind: blueprint.broker.kind.as_str().to_string(),
            url: blueprint.broker.url.clone(),
            prefetch: blueprint.broker.prefetch,
            consumer_tag_prefix: blueprint.consumer_tag_prefix().to_string(),
        },
        dispatcher: DispatcherInfo {
            error_buffer: blueprint.dispatcher.error_buffer,
            shutdown_timeout_secs: blueprint.dispatcher.shutdown_timeout_secs,
            ack_policy: blueprint.dispatcher.ack_policy.as_str().to_string(),
        },
        endpoints,
    }
}

fn print_service_info(info: &ServiceInfo) {
    println!("{} {}", info.name, info.version);
    println!(
        "AMQP support: {}",
        if info.amqp_support { "enabled" } else { "disabled" }
    );

    let Some(ref config) = info.config else {
        return;
    };

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║               Consumer Service Configuration                 ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("🏷  Service");
    println!("   ├─ Version: {}", config.version);
    println!("   ├─ Name: {}", config.service);
    println!("   └─ Env: {}", config.env);

    println!("\n📡 Broker");
    println!("   ├─ Kind: {}", config.broker.kind);
    println!("   ├─ URL: {}", config.broker.url);
    println!("   ├─ Prefetch: {}", config.broker.prefetch);
    println!("   └─ Consumer tag prefix: {}", config.broker.consumer_tag_prefix);

    println!("\n⚙️  Dispatcher");
    println!("   ├─ Error buffer: {}", config.dispatcher.error_buffer);
    println!(
        "   ├─ Shutdown timeout: {}s",
        config.dispatcher.shutdown_timeout_secs
    );
    println!("   └─ Ack policy: {}", config.dispatcher.ack_policy);

    println!("\n📥 Endpoints ({})", config.endpoints.len());
    for (i, endpoint) in config.endpoints.iter().enumerate() {
        let is_last = i == config.endpoints.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!("   {} {} -> {}", prefix, endpoint.name, endpoint.resource);
        println!(
            "   {}  └─ {} workers, handler {}",
            child_prefix, endpoint.workers, endpoint.handler
        );
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_loader::{ConfigFormat, ConfigLoader};

    #[test]
    fn test_version_only_without_config() {
        let info = build_service_info(None);
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(info.config.is_none());
    }

    #[test]
    fn test_endpoints_sorted_by_name() {
        let bp = ConfigLoader::load_from_str(
            r#"
[endpoints.zeta]
resource = "qz"

[endpoints.alpha]
resource = "qa"
handler = "main_consume"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let config = build_config_info(&bp);
        let names: Vec<_> = config.endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(config.broker.consumer_tag_prefix, "consumer-svc");
    }

    #[test]
    fn test_enum_fields_use_config_names() {
        let bp = ConfigLoader::load_from_str(
            r#"
[broker]
kind = "memory"

[dispatcher]
ack_policy = "on_success"

[endpoints.main]
resource = "q"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let config = build_config_info(&bp);
        assert_eq!(config.version, "V1");
        assert_eq!(config.broker.kind, "memory");
        assert_eq!(config.dispatcher.ack_policy, "on_success");
    }
}
