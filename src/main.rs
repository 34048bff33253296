//! OCPP router CLI
//!
//! ```sh
//! # Run with default config (~/.config/ocpp-router/config.toml)
//! ocpp-router
//!
//! # Custom config path
//! ocpp-router --config /etc/ocpp-router/config.toml
//!
//! # Validate config without starting
//! ocpp-router --check
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use ocpp_router::config::WebsocketServerConfig;
use ocpp_router::{default_config_path, init_tracing, AppConfig, ServerHandle};

/// OCPP-J routing engine for EV charging stations.
#[derive(Parser, Debug)]
#[command(name = "ocpp-router", version, about)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "OCPP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let loaded = AppConfig::load(&config_path);

    if cli.check {
        return match loaded {
            Ok(config) => {
                println!("Configuration is valid");
                println!("   Config file : {}", config_path.display());
                for ws in &config.websocket {
                    println!(
                        "   Gateway     : {} ws://{} ({}, profile {}, tenant {})",
                        ws.id,
                        ws.address(),
                        ws.protocol.subprotocol(),
                        ws.security_profile,
                        ws.tenant_id
                    );
                }
                println!("   Stations    : {}", config.stations.len());
                println!("   Webhooks    : {}", config.webhooks.len());
                Ok(())
            }
            Err(e) => {
                eprintln!("Configuration is invalid: {e}");
                Err(e.into())
            }
        };
    }

    let (mut config, load_error) = match loaded {
        Ok(cfg) => (cfg, None),
        Err(e) => {
            let mut cfg = AppConfig::default();
            cfg.websocket.push(WebsocketServerConfig::default());
            (cfg, Some(e))
        }
    };

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_tracing(&config);
    match load_error {
        Some(e) => {
            error!(path = %config_path.display(), error = %e, "Failed to load config, using defaults")
        }
        None => info!(path = %config_path.display(), "Configuration loaded"),
    }

    run(config).await
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handle = ServerHandle::start(config).await?;
    handle.install_signal_handler();
    info!("Press Ctrl+C to shut down gracefully");

    if !handle.wait().await {
        error!("Shutdown did not complete in time");
    }
    Ok(())
}
