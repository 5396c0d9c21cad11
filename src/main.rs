//! response-relay: forward proxy whose responses flow through the relay
//! pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ net::listener ──▶ http::server ──▶ upstream server
//!                                                      │
//!   client ◀── relay::pipeline ◀── relay::hooks ◀─────┘
//!                  │
//!                  └─ chunked / copier / codec
//! ```

use std::path::PathBuf;

use clap::Parser;
use futures_util::future::BoxFuture;

use response_relay::config::loader::{load_config, ConfigError};
use response_relay::config::validation::validate_config;
use response_relay::config::ProxyConfig;
use response_relay::http::server::shutdown_signal;
use response_relay::net::listener::Listener;
use response_relay::observability::{logging, metrics};
use response_relay::relay::{HookContext, HookRegistry, HookResult, ResponseHook};
use response_relay::ProxyServer;

#[derive(Parser)]
#[command(name = "response-relay")]
#[command(about = "HTTP forward proxy with response interception", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

/// Stamps every relayed response with a `Via` header.
struct ViaHeader;

impl ResponseHook for ViaHeader {
    fn name(&self) -> &str {
        "via-header"
    }

    fn on_response<'a>(&'a self, cx: &'a HookContext<'_>) -> BoxFuture<'a, HookResult> {
        Box::pin(stamp_via(cx))
    }
}

async fn stamp_via(cx: &HookContext<'_>) -> HookResult {
    let mut session = cx.session().await;
    if let Some(response) = session.response_mut() {
        let via = format!("{} response-relay", response.version());
        response.append_header("Via", via)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    if args.check {
        println!("configuration ok");
        return Ok(());
    }

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "response-relay starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        buffer_size = config.relay.buffer_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;
    let hooks = HookRegistry::new().with(ViaHeader);
    let server = ProxyServer::new(config, hooks);
    server.run(listener, shutdown_signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
