//! obus-client monitor entry point.
//!
//! Loads a TOML configuration describing the bus, connects to the server and
//! logs every bus event and object change until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()             -- [client] settings + [bus] definition
//!  └─ Client::start()           -- transport reader/writer tasks
//!  └─ message dispatch loop
//!       ├─ Ctrl-C               -> Client::stop()
//!       └─ Client::process_next -> registry update + logging callbacks
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use obus_client::application::monitor::{LogBusEvents, LogObjects};
use obus_client::infrastructure::config::load_config;
use obus_client::Client;

/// Command-line arguments for the obus bus monitor.
#[derive(Debug, Parser)]
#[command(
    name = "obus-client",
    about = "Connects to an obus server and logs every bus event",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "OBUS_CONFIG")]
    config: PathBuf,

    /// Server address (`host:port`), overriding `[client] server`.
    #[arg(long, env = "OBUS_SERVER")]
    server: Option<String>,

    /// Give up after the first connection ends instead of reconnecting.
    #[arg(long)]
    no_reconnect: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.client.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bus_desc = Arc::new(
        config
            .bus
            .to_bus_desc()
            .context("building bus descriptors")?,
    );
    info!(
        bus = %bus_desc.name,
        crc = %format!("{:#010x}", bus_desc.crc),
        objects = bus_desc.objects().count(),
        "obus-client starting"
    );

    // ── Client ────────────────────────────────────────────────────────────────
    let mut client = Client::new(config.client.name.clone(), Arc::clone(&bus_desc));
    client.set_object_log(config.client.object_log);
    client.set_autoreconnect(config.client.autoreconnect && !cli.no_reconnect);
    client.set_bus_event_callback(Box::new(LogBusEvents));
    for desc in bus_desc.objects() {
        client.register_object_callback(desc, Box::new(LogObjects::new(desc.name.clone())))?;
    }

    let server = cli.server.unwrap_or(config.client.server);
    client
        .start(server.clone())
        .with_context(|| format!("starting client for {server}"))?;

    // ── Main message dispatch loop ────────────────────────────────────────────
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("waiting for Ctrl-C")?;
                info!("shutdown signal received");
                break;
            }
            _ = client.process_next() => {}
        }
    }

    client.stop().await;
    info!("obus-client stopped");
    Ok(())
}
