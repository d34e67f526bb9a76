use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification of the device API.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::create_session,
        crate::routes::session::join_session,
        crate::routes::session::leave_session,
        crate::routes::game::start_game,
        crate::routes::game::submit_answer,
        crate::routes::game::reveal,
        crate::routes::game::continue_game,
        crate::routes::game::play_again,
        crate::routes::view::current_view,
        crate::routes::sse::view_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::JoinSessionRequest,
            crate::dto::game::SubmitAnswerRequest,
            crate::dto::view::QuizView,
            crate::dto::view::Stage,
            crate::dto::view::PlayerView,
            crate::dto::view::RoundView,
            crate::dto::view::QuestionView,
            crate::dto::view::CountdownView,
            crate::dto::view::PointsView,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Create, join and leave a session"),
        (name = "game", description = "Gameplay commands"),
        (name = "view", description = "Props of this device"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
/// OpenAPI document of the device API.
pub struct ApiDoc;
