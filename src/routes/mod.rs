use axum::Router;

use crate::state::SharedState;

/// Swagger UI and OpenAPI document.
pub mod docs;
/// Gameplay commands.
pub mod game;
/// Health check.
pub mod health;
/// Create, join and leave.
pub mod session;
/// Server-Sent Events streams.
pub mod sse;
/// Current props of this device.
pub mod view;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(session::router())
        .merge(game::router())
        .merge(view::router())
        .merge(sse::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
