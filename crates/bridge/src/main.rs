use anyhow::Context as _;
use chrono::Utc;
use clap::Parser;
use crossbridge_bridge::config::{BackendSeed, BridgeConfig};
use crossbridge_bridge::discovery::DiscoveryEngine;
use crossbridge_bridge::http::{self, AppState};
use crossbridge_bridge::registry::Registry;
use crossbridge_bridge::router::CallRouter;
use crossbridge_bridge::transport::{HttpTransport, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Bidirectional bridge between OpenAPI services and tool-protocol agents.
#[derive(Debug, Parser)]
#[command(name = "crossbridge", version)]
struct Args {
    /// Path to the YAML config file.
    #[arg(long, env = "CROSSBRIDGE_CONFIG", default_value = "crossbridge.yaml")]
    config: PathBuf,
    /// Override the configured listen address.
    #[arg(long, env = "CROSSBRIDGE_LISTEN")]
    listen: Option<String>,
    /// Emit logs as JSON lines.
    #[arg(long, env = "CROSSBRIDGE_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = BridgeConfig::load(&args.config)?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let registry = Arc::new(Registry::new(Some(config.snapshot_path())));
    match registry.load_snapshot() {
        Ok(0) => {}
        Ok(count) => tracing::info!(backends = count, "restored registry snapshot"),
        // A corrupt snapshot must not brick startup.
        Err(err) => tracing::warn!(error = %err, "ignoring unreadable registry snapshot"),
    }

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.call_timeout())?);
    let discovery = Arc::new(DiscoveryEngine::new(
        registry.clone(),
        transport.clone(),
        config.probe_timeout(),
        config.discovery_interval(),
        config.offline_grace(),
    ));

    for seed in config.backends.clone() {
        match seed {
            BackendSeed::OpenApi {
                name,
                base_url,
                spec_url,
            } => {
                let id = discovery.register_openapi(name, base_url, spec_url).await;
                tracing::info!(backend = %id, "seeded openapi backend");
            }
            BackendSeed::Tool {
                name,
                endpoint_url,
                launch_command,
            } => {
                let id = discovery
                    .register_tool(name, endpoint_url, launch_command)
                    .await;
                tracing::info!(backend = %id, "seeded tool backend");
            }
        }
    }

    let state = AppState {
        registry: registry.clone(),
        router: Arc::new(CallRouter::new(registry, transport)),
        discovery: discovery.clone(),
        started_at: Utc::now(),
    };
    tokio::spawn(discovery.run());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "crossbridge listening");
    axum::serve(listener, http::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown requested");
}
