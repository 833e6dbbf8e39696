//! Audit gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────────────┐
//!                      │                   AUDIT GATEWAY                     │
//!   Client             │  ┌──────────┐   ┌──────────┐   ┌───────────────┐   │
//!   ──────────────────▶│  │   net    │──▶│  http    │──▶│    gateway    │   │
//!   (CONNECT → MITM)   │  │ listener │   │  server  │   │ reverse|fwd   │   │
//!                      │  └──────────┘   └──────────┘   └──────┬────────┘   │
//!                      │                                       ▼            │
//!                      │   ┌────────┐   ┌───────────┐   ┌───────────────┐   │
//!                      │   │ certs  │   │   authz   │──▶│ proxy engine  │───┼──▶ Upstream
//!                      │   │ signer │   │ 4 variants│   │ stream+capture│   │
//!                      │   └────────┘   └───────────┘   └──────┬────────┘   │
//!                      │                                       ▼            │
//!                      │                               ┌───────────────┐    │
//!                      │                               │ record → sink │────┼──▶ syslog/file/stdout
//!                      │                               └───────────────┘    │
//!                      └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use audit_gateway::config::validation::validate_config;
use audit_gateway::config::watcher::ConfigWatcher;
use audit_gateway::config::{load_config, GatewayConfig};
use audit_gateway::http::HttpServer;
use audit_gateway::lifecycle::{spawn_signal_handler, Shutdown};
use audit_gateway::net::Listener;
use audit_gateway::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "audit-gateway", version)]
#[command(about = "Auditing reverse / intercepting forward HTTP gateway", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }

    if cli.check {
        return match validate_config(&config) {
            Ok(()) => {
                println!("configuration ok");
                Ok(())
            }
            Err(errors) => {
                for error in &errors {
                    eprintln!("{error}");
                }
                Err(format!("{} configuration error(s)", errors.len()).into())
            }
        };
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "audit-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(&config)?;

    // Held for the life of the process; dropping it stops the watch.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let reloader = server.reloader();
            let bind_address = config.listener.bind_address.clone();
            tokio::spawn(async move {
                while let Some(mut next) = updates.recv().await {
                    if next.listener.bind_address != bind_address {
                        tracing::warn!("listener changes take effect on restart");
                        next.listener.bind_address = bind_address.clone();
                    }
                    if let Err(e) = reloader.apply(&next) {
                        tracing::error!(error = %e, "Reload rejected, keeping current gateway");
                    }
                }
            });
            Some(watcher.run()?)
        }
        None => None,
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
