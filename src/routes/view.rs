use axum::{Json, Router, extract::State, routing::get};

use crate::{dto::view::QuizView, services::view_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/view",
    tag = "view",
    responses((status = 200, description = "Current props of this device", body = QuizView))
)]
/// Snapshot of the props the rendering layer should show.
pub async fn current_view(State(state): State<SharedState>) -> Json<QuizView> {
    Json(view_service::current_view(&state).await)
}

/// Configure the view snapshot route.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/view", get(current_view))
}
