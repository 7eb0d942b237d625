//! WebSocket front end of the daemon.
//!
//! Serves one endpoint. Each connection is a session that turns valid client
//! messages into broker [`Request`](crate::broker::Request)s.

mod config;
mod session;

pub use config::ServerConfig;
pub use session::WsReply;

use axum::Router;
use axum::routing::get;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broker::Request;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Shared state handed to every session.
#[derive(Clone)]
pub struct AppState {
    inbound: mpsc::Sender<Request>,
}

/// Build the router serving the token endpoint at `config.path`.
pub fn build_router(config: &ServerConfig, inbound: mpsc::Sender<Request>) -> Router {
    Router::new()
        .route(&config.path, get(session::upgrade))
        .with_state(AppState { inbound })
}

/// Serve `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    info!(%addr, "WebSocket server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("WebSocket server stopped");
    Ok(())
}
