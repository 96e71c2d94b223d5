use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use lobster_dispatch::ReqwestTransport;
use lobster_server::config::LobsterConfig;
use lobster_server::state::AppState;
use lobster_server::sweeper::Sweeper;

#[derive(Debug, Parser)]
#[command(name = "lobster", version, about = "Agent-to-agent service marketplace")]
struct Cli {
    /// State directory holding config.toml and snapshots.
    #[arg(long, env = "LOBSTER_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Address to listen on, overriding the config file.
    #[arg(long)]
    bind: Option<String>,

    /// "text" or "json".
    #[arg(long)]
    log_format: Option<String>,
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let state_dir = cli
        .state_dir
        .unwrap_or_else(LobsterConfig::default_state_dir);
    let mut config = LobsterConfig::load(&state_dir)?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    init_tracing(&config.log_format);

    let transport = Arc::new(ReqwestTransport::new(config.webhook.request_timeout())?);
    let state = AppState::load(config.clone(), transport, &state_dir)?;
    let recovered = state.recover().await?;
    if recovered > 0 {
        tracing::info!("Recovered {} task(s) or freeze(s) after restart", recovered);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(Sweeper::new(state.clone(), shutdown_rx).run());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("Lobster market listening on {}", config.bind_addr);

    axum::serve(listener, lobster_server::router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    sweeper.await.context("Sweeper task panicked")?;
    Ok(())
}
