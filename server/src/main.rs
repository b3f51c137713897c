use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relay_bridge::config::RelayConfig;
use relay_bridge::engine::housekeeping::spawn_housekeeping;
use relay_bridge::engine::relay_engine::{RelayEngine, Stores};
use relay_bridge::platform::http::HttpPlatform;
use relay_bridge::web::app_state::AppState;
use relay_bridge::web::router::build_router;

#[derive(Parser)]
#[command(name = "relay-bridge", about = "Cross-server channel relay")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = RelayConfig::load(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(%problem, "invalid configuration");
        }
        bail!("refusing to start with {} configuration problem(s)", problems.len());
    }

    let platform = HttpPlatform::new(
        &config.platform.base_url,
        &config.platform.token,
        config.platform.request_timeout(),
    )
    .context("failed to build platform client")?;

    let web_addr = config.server.web_address.clone();
    let inbound_secret = config.server.inbound_secret().map(str::to_string);
    let stores = Stores::open(&config);
    let engine = Arc::new(RelayEngine::new(config, Arc::new(platform), stores));

    let removed = engine.reconcile().await;
    if !removed.is_empty() {
        info!(channels = ?removed, "removed unreachable channels");
    }

    let cancel = CancellationToken::new();
    let housekeeping = spawn_housekeeping(engine.clone(), cancel.clone());

    let app = build_router(Arc::new(AppState {
        engine,
        inbound_secret,
    }));

    let listener = tokio::net::TcpListener::bind(&web_addr)
        .await
        .with_context(|| format!("failed to bind web listener on {web_addr}"))?;
    info!(%web_addr, "relay bridge listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutting down");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    cancel.cancel();
    if let Err(e) = housekeeping.await {
        error!(error = %e, "housekeeping task failed");
    }
    Ok(())
}
