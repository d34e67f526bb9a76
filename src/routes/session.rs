use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::{
        session::{CreateSessionRequest, JoinSessionRequest},
        view::QuizView,
    },
    error::AppError,
    services::quiz_service,
    state::SharedState,
};

/// Routes creating, joining and leaving a session.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/session", post(create_session).delete(leave_session))
        .route("/session/join", post(join_session))
}

/// Create a session hosted by this device.
#[utoipa::path(
    post,
    path = "/session",
    tag = "session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = QuizView),
        (status = 400, description = "Invalid name or game code"),
        (status = 409, description = "Game code already in use"),
        (status = 503, description = "Session store unavailable")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<QuizView>, AppError> {
    let view = quiz_service::create_session(&state, &payload.name, payload.code.as_deref()).await?;
    Ok(Json(view))
}

/// Join a session by game code.
#[utoipa::path(
    post,
    path = "/session/join",
    tag = "session",
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Session joined", body = QuizView),
        (status = 404, description = "No game with this code"),
        (status = 503, description = "Session store unavailable")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinSessionRequest>>,
) -> Result<Json<QuizView>, AppError> {
    let view = quiz_service::join_by_code(&state, &payload.name, &payload.code).await?;
    Ok(Json(view))
}

/// Forget the active session on this device.
#[utoipa::path(
    delete,
    path = "/session",
    tag = "session",
    responses((status = 200, description = "Session left", body = QuizView))
)]
pub async fn leave_session(State(state): State<SharedState>) -> Result<Json<QuizView>, AppError> {
    let view = quiz_service::leave_session(&state).await?;
    Ok(Json(view))
}
