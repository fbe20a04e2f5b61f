// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ledgrid contributors

//! LEDGRID WebSocket Gateway - stream frame batches to LED controllers.
//!
//! Hosts one WebSocket session per hardware controller, wires the delivery
//! core (event bus, frame buffer, controller interface) and exposes REST
//! endpoints for health and status.
//!
//! # Usage
//!
//! ```bash
//! # Start the gateway on default port 4000
//! ledgrid-gateway
//!
//! # Custom port and delivery tuning from a file
//! ledgrid-gateway --port 8080 --config delivery.toml
//! ```
//!
//! # Endpoints
//!
//! - `GET /ws` - controller WebSocket endpoint
//! - `GET /health` - liveness probe
//! - `GET /status` - controller set and buffer snapshot
//! - `POST /signal` - operator fan-out (request_stats, simulation_config, ...)

mod protocol;
mod session;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::extract::ws::WebSocket;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ledgrid::{BusEvent, DeliveryConfig, TOPIC_SOCKET};

use protocol::OperatorSignal;
use session::ControllerSession;
use state::{AppState, ServerOptions};

/// LEDGRID WebSocket Gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "ledgrid-gateway")]
#[command(about = "LEDGRID WebSocket Gateway - stream frame batches to LED controllers")]
#[command(version)]
struct Args {
    /// WebSocket server port
    #[arg(short, long, default_value = "4000")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Delivery configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Maximum concurrent controller sessions
    #[arg(long, default_value = "64")]
    max_clients: usize,

    /// Also push legacy single-frame `display` events alongside batches
    #[arg(long)]
    legacy_frames: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    info!("LEDGRID Gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => {
            info!("Loading delivery config from {}", path.display());
            DeliveryConfig::from_file(path)?
        }
        None => DeliveryConfig::default(),
    };

    let options = ServerOptions {
        max_clients: args.max_clients,
        legacy_frames: args.legacy_frames,
    };
    let state = Arc::new(AppState::new(config, options));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/signal", post(signal_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", args.bind, args.port);
    info!("Controller endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {e}");
        return;
    }
    info!("Shutdown requested, draining sessions");
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.can_accept_client().await {
        warn!("Connection rejected: max clients reached");
        return (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Too many connections",
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

/// Run one controller session over the socket.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    state.add_client().await;

    let session = ControllerSession::new(state.clone());
    session.run(socket).await;

    state.remove_client().await;
}

/// Liveness probe.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.uptime_secs(),
        "clients": state.client_count().await,
        "max_clients": state.options.max_clients,
    }))
}

/// Controller set and buffer snapshot for telemetry clients.
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.interface.status().await)
}

/// Operator fan-out: forwards a signal to every live session.
async fn signal_handler(
    State(state): State<Arc<AppState>>,
    Json(signal): Json<OperatorSignal>,
) -> impl IntoResponse {
    let event = match signal {
        OperatorSignal::RequestStats => BusEvent::RequestStats,
        OperatorSignal::RequestDetailedStats => BusEvent::RequestDetailedStats,
        OperatorSignal::SimulationConfig { params } => BusEvent::SimulationConfig { params },
    };
    let reached = state.bus.publish(TOPIC_SOCKET, event);

    Json(serde_json::json!({
        "delivered_to": reached,
    }))
}
