//! Courier server binary.
//!
//! Starts an axum HTTP server that relays agent responses to WebSocket
//! clients, with structured logging and graceful shutdown on SIGTERM/SIGINT.

use courier_relay::Relay;
use courier_server::backend::{HttpAgentBackend, HttpRetriever};
use courier_server::{api_ws::ConnectionManager, app, config, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("COURIER_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn build_state(config: &config::Config) -> AppState {
    let connection_manager = ConnectionManager::new();
    let retriever = HttpRetriever::new(
        config.retrieval.url.clone(),
        config.retrieval.number_of_results,
    );
    let backend = HttpAgentBackend::new(
        config.agent.url.clone(),
        Duration::from_secs(config.agent.request_timeout_secs),
    );
    let relay = Relay::new(
        Arc::new(retriever),
        Arc::new(backend),
        Arc::new(connection_manager.clone()),
    )
    .with_retry_policy(config.retry.policy());

    AppState {
        connection_manager,
        relay,
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("cannot start without a valid configuration");

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
    tracing::info!(
        agent_url = %config.agent.url,
        retrieval_url = %config.retrieval.url,
        max_attempts = config.retry.max_attempts,
        "configured backends"
    );

    let app = app(build_state(&config));
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting courier server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind listen address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("courier server shut down");
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

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = app(build_state(&config::Config::default()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn retry_policy_follows_config() {
        let mut config = config::Config::default();
        config.retry.max_attempts = 7;
        let state = build_state(&config);
        assert_eq!(state.relay.retry_policy().max_attempts, 7);
    }
}
