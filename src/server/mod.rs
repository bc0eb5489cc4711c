//! HTTP and WebSocket surface over the board core.

pub mod api;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use crate::board::{BoardDb, DbHandle};
use crate::config::CardflowConfig;
use api::AppState;

/// Configuration for `cardflow serve`.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub board: CardflowConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let board = CardflowConfig::default();
        Self {
            port: board.server.port,
            db_path: board.server.db_path.clone(),
            dev_mode: false,
            board,
        }
    }
}

impl ServerConfig {
    /// Server settings taken from a loaded config file.
    pub fn from_config(board: CardflowConfig) -> Self {
        Self {
            port: board.server.port,
            db_path: board.server.db_path.clone(),
            dev_mode: false,
            board,
        }
    }
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Start the board server and block until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = BoardDb::new(&config.db_path).context("Failed to initialize board database")?;
    let state = Arc::new(AppState::new(DbHandle::new(db), &config.board).await);

    let mut app = build_router(state.clone());
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(address = %local_addr, db = %config.db_path.display(), "Cardflow listening");
    println!("Cardflow running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.dispatcher.shutdown().await;
    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
