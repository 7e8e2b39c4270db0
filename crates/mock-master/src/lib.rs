//! SaltDock mock master
//!
//! A stand-in for the master's remote command endpoint. It accepts the
//! console's WebSocket channel, resolves targets against a simulated fleet
//! and streams the same events a real master would.

pub mod auth;
pub mod fanout;
pub mod fleet;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, response::IntoResponse, routing::get, Router};
use saltdock_protocol::REMOTE_COMMANDS_PATH;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use fleet::{Fleet, MinionSpec};

pub struct MasterState {
    pub fleet: Arc<Fleet>,
}

pub fn router(fleet: Fleet, auth_token: Option<String>) -> Router {
    let state = Arc::new(MasterState {
        fleet: Arc::new(fleet),
    });

    let mut app = Router::new()
        .route(REMOTE_COMMANDS_PATH, get(websocket::ws_handler))
        .route("/api/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if let Some(token) = auth_token {
        app = app.layer(middleware::from_fn_with_state(token, auth::auth_middleware));
    }
    app.layer(TraceLayer::new_for_http())
}

pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    info!(
        component = "master",
        event = "master.listening",
        addr = ?listener.local_addr().ok(),
        "Mock master listening"
    );
    axum::serve(listener, app).await
}

/// Bind an ephemeral loopback port and serve in the background.
pub async fn spawn_local(fleet: Fleet, auth_token: Option<String>) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    let app = router(fleet, auth_token);
    tokio::spawn(async move {
        let _ = serve(listener, app).await;
    });
    Ok(addr)
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn ping_handler() -> impl IntoResponse {
    "pong"
}
