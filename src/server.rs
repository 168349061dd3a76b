//! Router assembly and the serve loop.

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the full application: `/ws`, `/health`, API docs, request
/// tracing and CORS restricted to the configured origins.
pub fn build_app(state: AppState) -> Router {
    let cors = state.config.allowed_origins.cors_layer();

    Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves the relay on `listener` until the process exits.
///
/// # Errors
///
/// Returns the I/O error that stopped the accept loop.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, build_app(state)).await
}
