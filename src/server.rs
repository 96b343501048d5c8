//! Embedded WebDAV server.

mod handlers;
mod paths;
mod state;

pub use paths::{DavPath, Depth};
pub use state::DavState;

use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
};
use tower_http::trace::TraceLayer;

/// Create the WebDAV router. Every method and path goes through one dispatcher.
pub fn create_router(state: DavState) -> Router {
    Router::new()
        .fallback(handlers::dispatch)
        .layer(middleware::from_fn_with_state(state.clone(), notify_change))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Flip the change signal once the response is computed, whatever its status.
async fn notify_change(State(state): State<DavState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    state.changes().notify();
    response
}
