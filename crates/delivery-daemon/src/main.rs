mod cli;
mod config;
mod host;
mod logging;
mod server;

use crate::cli::Args;
use crate::config::{load_config, TomlSettingsStore};
use crate::host::ProcessHost;
use crate::logging::init_tracing;
use crate::server::run_control_server;
use anyhow::Context;
use clap::Parser;
use delivery_engine::{ApiClient, DeliveryEngine, EngineOptions, ReqwestTransport};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref(), args.log_to_stderr)?;

    let mut config = load_config(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    if let Some(addr) = args.control_addr {
        config.control_addr = addr;
    }

    let transport = ReqwestTransport::new(config.request_timeout)?;
    let host = ProcessHost::new(config.host_command.as_deref(), config.host_timeout)?;
    if config.host_command.is_none() {
        tracing::warn!("no host command configured, deliveries will fail until one is set");
    }
    let identity = config.link_identity();
    tracing::info!(
        api_url = %config.api_url,
        hostname = %identity.hostname,
        platform = %identity.platform,
        "starting paynow-delivery"
    );

    let shutdown = CancellationToken::new();
    let engine = DeliveryEngine::new(
        ApiClient::new(transport, &config.api_url),
        host,
        Box::new(TomlSettingsStore::new(args.config.clone())),
        identity,
        config.settings(),
        EngineOptions::default(),
        shutdown.clone(),
    );

    let listener = TcpListener::bind(&config.control_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.control_addr))?;
    tracing::info!(addr = %config.control_addr, "control socket listening");

    spawn_signal_handler(shutdown.clone());
    engine.start().await;
    let served = run_control_server(listener, engine.clone(), shutdown.clone()).await;
    engine.shutdown().await;
    served
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("ctrl-c received, shutting down");
        shutdown.cancel();
    });
}
