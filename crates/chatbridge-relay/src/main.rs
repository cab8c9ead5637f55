//! Chatbridge relay binary.
//!
//! Starts the link listener with structured logging and graceful shutdown on
//! SIGTERM/SIGINT. Refuses to start without platform credentials.

use chatbridge_relay::{
    app,
    config::{self, ConfigError},
    fetch::HttpFetcher,
    link::LinkManager,
    pump::{DeliveryPump, PumpSettings},
    rest::RestPlatform,
    AppState,
};
use chatbridge_routing::ConversationRouter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CHATBRIDGE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("chatbridge.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the relay cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let credentials = match config.credentials() {
        Ok(credentials) => credentials,
        Err(ConfigError::Missing(setting)) => {
            tracing::error!(setting, "required setting is missing, refusing to start");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let platform = RestPlatform::new(
        &config.platform.api_base,
        &credentials.token,
        &credentials.workspace_id,
        config.platform.request_timeout(),
    )
    .expect("failed to build platform client");

    let fetcher = HttpFetcher::new(config.relay.fetch_timeout(), config.relay.max_attachment_bytes)
        .expect("failed to build attachment fetcher");

    let link = LinkManager::new();
    let pump = DeliveryPump::new(
        ConversationRouter::new(Arc::new(platform)),
        Arc::new(fetcher),
        link.clone(),
        PumpSettings {
            self_id: config.platform.self_id.clone(),
            request_timeout: config.platform.request_timeout(),
            fetch_timeout: config.relay.fetch_timeout(),
            lane_idle: config.relay.lane_idle(),
        },
    );

    let state = AppState::new(link, pump, &config);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, workspace = %credentials.workspace_id, "starting chatbridge relay");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("chatbridge relay shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
