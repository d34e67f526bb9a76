use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::info;

use crate::{
    services::{sse_events, sse_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/view",
    tag = "sse",
    responses((status = 200, description = "Live view stream", content_type = "text/event-stream", body = String))
)]
/// Stream the props of this device whenever they change.
pub async fn view_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let receiver = sse_service::subscribe_view(&state);
    info!("New view SSE connection");
    let initial = sse_events::handshake_events(&state).await;
    sse_service::to_sse_stream(receiver, initial)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/view", get(view_stream))
}
