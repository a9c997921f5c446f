mod cli;
mod config;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use edge_proxy::Gateway;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let cfg = config::load(&cli).context("failed to load configuration")?;

    info!(
        listen = %cfg.listen_addr,
        target = %cfg.target_base(),
        origins = cfg.allowed_origins.len(),
        token_configured = cfg.shared_token.is_some(),
        "edgegate starting"
    );

    let gateway = Gateway::new(cfg).context("failed to initialize gateway")?;

    tokio::select! {
        result = gateway.run() => result.context("gateway exited")?,
        _ = shutdown_signal() => {}
    }

    info!("edgegate shutting down");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    tracing::warn!(%err, "failed to register SIGTERM handler");
                    ctrl_c.await.ok();
                    return;
                }
            };

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT (ctrl-c)");
    }
}
