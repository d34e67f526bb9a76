use axum::{Json, Router, extract::State, routing::post};
use axum_valid::Valid;

use crate::{
    dto::{game::SubmitAnswerRequest, view::QuizView},
    error::AppError,
    services::quiz_service,
    state::SharedState,
};

/// Gameplay commands of this device.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/game/start", post(start_game))
        .route("/game/answer", post(submit_answer))
        .route("/game/reveal", post(reveal))
        .route("/game/continue", post(continue_game))
        .route("/game/play-again", post(play_again))
}

/// Host: start the game from the lobby.
#[utoipa::path(
    post,
    path = "/game/start",
    tag = "game",
    responses(
        (status = 200, description = "Game started", body = QuizView),
        (status = 401, description = "Device is not the host"),
        (status = 409, description = "Session is not in the lobby")
    )
)]
pub async fn start_game(State(state): State<SharedState>) -> Result<Json<QuizView>, AppError> {
    Ok(Json(quiz_service::start_game(&state).await?))
}

/// Answer the open question.
#[utoipa::path(
    post,
    path = "/game/answer",
    tag = "game",
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer stored", body = QuizView),
        (status = 400, description = "Not one of the options"),
        (status = 409, description = "Already answered or no question open")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<QuizView>, AppError> {
    Ok(Json(quiz_service::submit_answer(&state, &payload.answer).await?))
}

/// Host: reveal the open question now.
#[utoipa::path(
    post,
    path = "/game/reveal",
    tag = "game",
    responses(
        (status = 200, description = "Question revealed", body = QuizView),
        (status = 401, description = "Device is not the host"),
        (status = 409, description = "No question open")
    )
)]
pub async fn reveal(State(state): State<SharedState>) -> Result<Json<QuizView>, AppError> {
    Ok(Json(quiz_service::reveal(&state).await?))
}

/// Host: advance past the intro, the reveal or the leaderboard.
#[utoipa::path(
    post,
    path = "/game/continue",
    tag = "game",
    responses(
        (status = 200, description = "Session advanced", body = QuizView),
        (status = 401, description = "Device is not the host"),
        (status = 409, description = "Nothing to continue from")
    )
)]
pub async fn continue_game(State(state): State<SharedState>) -> Result<Json<QuizView>, AppError> {
    Ok(Json(quiz_service::continue_game(&state).await?))
}

/// Host: reset a finished game to the lobby.
#[utoipa::path(
    post,
    path = "/game/play-again",
    tag = "game",
    responses(
        (status = 200, description = "Session reset", body = QuizView),
        (status = 401, description = "Device is not the host"),
        (status = 409, description = "Game is not finished")
    )
)]
pub async fn play_again(State(state): State<SharedState>) -> Result<Json<QuizView>, AppError> {
    Ok(Json(quiz_service::play_again(&state).await?))
}
