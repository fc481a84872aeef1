use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the quiz host service.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::host::launch_session,
        crate::routes::host::attach_session,
        crate::routes::host::get_session,
        crate::routes::host::start_session,
        crate::routes::host::skip_question,
        crate::routes::host::advance_session,
        crate::routes::host::hold_leaderboard,
        crate::routes::host::close_session,
        crate::routes::sse::session_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::LaunchSessionRequest,
            crate::dto::session::QuizInput,
            crate::dto::session::QuestionInput,
            crate::dto::session::LaunchSessionResponse,
            crate::dto::session::ActionResponse,
            crate::dto::session::SessionView,
            crate::dto::session::QuestionView,
            crate::dto::session::StandingRow,
            crate::dto::sse::Handshake,
            crate::dto::sse::PhaseChangedEvent,
            crate::dto::sse::TimerEvent,
            crate::dto::sse::AnswersEvent,
            crate::dto::sse::PlayerAnsweredEvent,
            crate::dto::sse::NotificationDismissedEvent,
            crate::dto::sse::LeaderboardCountdownEvent,
            crate::dto::sse::WarningEvent,
            crate::dto::sse::SessionEndedEvent,
            crate::dao::models::SessionStatus,
            crate::dao::models::RoundId,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "host", description = "Session launch and host controls"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
