//! CGI/1.1 gateway (v1)
//!
//! Serves a document root over HTTP, executing gateway targets as CGI scripts.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ routing::resolver ──┬──▶ cgi::Gateway
//!                     (request id,     (decode, contain     │     env → spawn → bridge
//!                      trace, limits)   within root)        │           │
//!                                                           │     child stdin/stdout
//!                                                           │           │
//!                                                           └──▶ http::response
//!     Client Response                                             (static, 404)
//!     ◀────────────── streamed body ◀───────────────────────────────────┘
//!
//!     Cross-cutting: config (TOML), observability (tracing, metrics),
//!                    lifecycle (signals, graceful shutdown)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use cgi_gateway::config::{load_config, validate_config, GatewayConfig};
use cgi_gateway::http::HttpServer;
use cgi_gateway::lifecycle::{signals, Shutdown};
use cgi_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "cgi-gateway")]
#[command(about = "Serve a directory over HTTP, running CGI scripts", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Document root (overrides site.root)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Listen address (overrides listener.bind_address)
    #[arg(short, long)]
    bind: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(root) = cli.root {
        config.site.root = root;
    }
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {}", error);
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }
    if cli.check {
        println!("configuration ok");
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!("cgi-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        root = %config.site.root.display(),
        cgi_suffix = %config.site.cgi_suffix,
        cgi_timeout_secs = config.cgi.timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn(async move {
        signals::trigger_on_signal(&shutdown).await;
    });

    HttpServer::new(config).run(listener, signal).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
