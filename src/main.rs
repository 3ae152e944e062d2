//! Event relay daemon
//!
//! Holds one authenticated server-sent event stream open while the live
//! configuration permits it, and fans matching events out to local targets.
//!
//! ## Configuration
//!
//! Static settings come from `--config <file>` (TOML) and `RELAY_*`
//! environment variables; see `config::settings`. The live
//! `{enabled, filter_id, credential}` configuration lives in the store file
//! (`[store] path`), which is created with defaults on first launch and
//! watched for edits.
//!
//! ## Control
//!
//! `relay-ctl start|stop|status` talks to the control listener
//! (`[control] listen_addr`, default 127.0.0.1:7380).

use clap::Parser;
use event_relay::config::{FileConfigStore, RelaySettings};
use event_relay::control::ControlServer;
use event_relay::credential::StoreCredentialProvider;
use event_relay::delivery::HttpTargetRegistry;
use event_relay::relay::{spawn_relay, RelayComponents, RelayOptions};
use event_relay::transport::HttpTransport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "event-relay", version, about = "Authenticated event-stream relay")]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing(settings: &RelaySettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    if settings.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let settings = RelaySettings::load(args.config.as_deref())?;
    init_tracing(&settings);

    info!(
        endpoint = %settings.upstream.endpoint,
        max_attempts = settings.retry.max_attempts,
        delay_ms = settings.retry.delay.as_millis() as u64,
        "Starting event relay"
    );

    let store = Arc::new(FileConfigStore::open(&settings.store.path)?);
    let transport = Arc::new(HttpTransport::new(&settings.upstream)?);
    let registry = Arc::new(HttpTargetRegistry::new(&settings.delivery.targets_file));

    let relay = spawn_relay(
        RelayComponents {
            transport,
            credentials: Arc::new(StoreCredentialProvider::new(store.clone())),
            store: store.clone(),
            registry,
        },
        RelayOptions::from_settings(&settings),
    );

    let shutdown = relay.shutdown_token();
    let watcher = store
        .clone()
        .spawn_watcher(settings.store.poll_interval, shutdown.clone());

    let server = ControlServer::bind(&settings.control.listen_addr, relay.surface()).await?;
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    relay.shutdown().await;
    let _ = watcher.await;
    let _ = server_task.await;
    Ok(())
}
