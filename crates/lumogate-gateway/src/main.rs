use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use lumogate_gateway::app;

#[derive(Parser)]
#[command(name = "lumogate", version, about = "Local OpenAI-compatible gateway in front of the upstream encrypted chat backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Server {
        /// Path to lumogate.yaml; defaults to ~/.lumogate/lumogate.yaml.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "lumogate=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Server { config } => run_server(config.as_deref()).await,
    }
}

/// Exit codes per the CLI contract: `0` clean shutdown, `1` config
/// validation failure, `2` auth failure, `3` bind failure.
async fn run_server(config_path: Option<&str>) -> ExitCode {
    let config = match lumogate_core::config::GatewayConfig::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "config validation failed");
            return ExitCode::from(1);
        }
    };

    if config.auth.api_key.trim().is_empty() {
        error!("auth.api_key must not be empty");
        return ExitCode::from(2);
    }

    let bind = config.server.bind.clone();
    let port = config.server.port;

    let addr: SocketAddr = match format!("{bind}:{port}").parse() {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "invalid bind address");
            return ExitCode::from(3);
        }
    };

    let state = Arc::new(app::AppState::new(config));
    if let Some(sync) = state.sync.clone() {
        if let Err(e) = sync.pull_on_startup().await {
            tracing::warn!(error = %e, "startup sync pull failed, continuing with an empty store");
        }
    }

    let router = app::build_router(state.clone());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind HTTP listener");
            return ExitCode::from(3);
        }
    };

    info!(%addr, "lumogate gateway listening");

    match axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await {
        Ok(()) => {
            info!("lumogate gateway shut down cleanly");
            ExitCode::from(0)
        }
        Err(e) => {
            error!(error = %e, "server loop exited with an error");
            ExitCode::from(3)
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received shutdown signal");
}
