use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        session::{ActionResponse, LaunchSessionRequest, LaunchSessionResponse, SessionView},
        validation::validate_host_id,
    },
    error::AppError,
    services::session_service,
    state::{HostAction, SharedState},
};

const HOST_ID_HEADER: &str = "x-host-id";

/// Identity of the calling host, resolved by [`require_host_id`].
#[derive(Debug, Clone)]
pub struct HostId(pub String);

/// Host endpoints for launching and driving sessions.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(launch_session))
        .route("/sessions/{pin}", get(get_session).delete(close_session))
        .route("/sessions/{pin}/attach", post(attach_session))
        .route("/sessions/{pin}/start", post(start_session))
        .route("/sessions/{pin}/skip", post(skip_question))
        .route("/sessions/{pin}/advance", post(advance_session))
        .route("/sessions/{pin}/hold", post(hold_leaderboard))
        .route_layer(middleware::from_fn_with_state(state, require_host_id))
}

/// Launch a session from a quiz and start driving it.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "host",
    params(("X-Host-Id" = String, Header, description = "Identifier of the authenticated host")),
    request_body = LaunchSessionRequest,
    responses(
        (status = 201, description = "Session created in the lobby", body = LaunchSessionResponse),
        (status = 400, description = "Invalid quiz"),
        (status = 503, description = "Session store unavailable")
    )
)]
pub async fn launch_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Valid(Json(payload)): Valid<Json<LaunchSessionRequest>>,
) -> Result<(StatusCode, Json<LaunchSessionResponse>), AppError> {
    let launched = session_service::launch_session(&state, &host_id, payload).await?;
    Ok((StatusCode::CREATED, Json(launched)))
}

/// Resume driving a session after a host restart.
#[utoipa::path(
    post,
    path = "/sessions/{pin}/attach",
    tag = "host",
    params(
        ("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
        ("pin" = String, Path, description = "Six digit session PIN")
    ),
    responses(
        (status = 200, description = "Session attached", body = ActionResponse),
        (status = 401, description = "Session belongs to another host"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn attach_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(pin): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        session_service::attach_session(&state, &host_id, &pin).await?,
    ))
}

/// Current host view of a live session.
#[utoipa::path(
    get,
    path = "/sessions/{pin}",
    tag = "host",
    params(
        ("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
        ("pin" = String, Path, description = "Six digit session PIN")
    ),
    responses(
        (status = 200, description = "Session view", body = SessionView),
        (status = 404, description = "No live session with this PIN")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(pin): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(session_service::session_view(&state, &host_id, &pin)?))
}

/// Start the quiz from the lobby.
#[utoipa::path(
    post,
    path = "/sessions/{pin}/start",
    tag = "host",
    params(
        ("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
        ("pin" = String, Path, description = "Six digit session PIN")
    ),
    responses(
        (status = 200, description = "Start written", body = ActionResponse),
        (status = 409, description = "Not in the lobby or no participants")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(pin): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    host_action(&state, &host_id, &pin, HostAction::Start).await
}

/// End the current question before its window closes.
#[utoipa::path(
    post,
    path = "/sessions/{pin}/skip",
    tag = "host",
    params(
        ("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
        ("pin" = String, Path, description = "Six digit session PIN")
    ),
    responses(
        (status = 200, description = "Skip written", body = ActionResponse),
        (status = 409, description = "No question is running")
    )
)]
pub async fn skip_question(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(pin): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    host_action(&state, &host_id, &pin, HostAction::Skip).await
}

/// Leave the leaderboard for the next question, or finish the quiz.
#[utoipa::path(
    post,
    path = "/sessions/{pin}/advance",
    tag = "host",
    params(
        ("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
        ("pin" = String, Path, description = "Six digit session PIN")
    ),
    responses(
        (status = 200, description = "Advance written", body = ActionResponse),
        (status = 409, description = "Not on the leaderboard")
    )
)]
pub async fn advance_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(pin): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    host_action(&state, &host_id, &pin, HostAction::Advance).await
}

/// Pause the leaderboard auto-advance countdown.
#[utoipa::path(
    post,
    path = "/sessions/{pin}/hold",
    tag = "host",
    params(
        ("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
        ("pin" = String, Path, description = "Six digit session PIN")
    ),
    responses(
        (status = 200, description = "Countdown paused", body = ActionResponse),
        (status = 409, description = "Not on the leaderboard")
    )
)]
pub async fn hold_leaderboard(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(pin): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    host_action(&state, &host_id, &pin, HostAction::Hold).await
}

/// Delete the session for every participant.
#[utoipa::path(
    delete,
    path = "/sessions/{pin}",
    tag = "host",
    params(
        ("X-Host-Id" = String, Header, description = "Identifier of the authenticated host"),
        ("pin" = String, Path, description = "Six digit session PIN")
    ),
    responses(
        (status = 200, description = "Session deleted", body = ActionResponse),
        (status = 404, description = "No live session with this PIN")
    )
)]
pub async fn close_session(
    State(state): State<SharedState>,
    Extension(HostId(host_id)): Extension<HostId>,
    Path(pin): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    host_action(&state, &host_id, &pin, HostAction::Close).await
}

async fn host_action(
    state: &SharedState,
    host_id: &str,
    pin: &str,
    action: HostAction,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(
        session_service::dispatch(state, host_id, pin, action).await?,
    ))
}

async fn require_host_id(
    State(_state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let host_id = req
        .headers()
        .get(HOST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_owned())
        .ok_or_else(|| AppError::Unauthorized("missing host header `X-Host-Id`".into()))?;

    validate_host_id(&host_id).map_err(|err| {
        AppError::Unauthorized(
            err.message
                .map(|message| message.into_owned())
                .unwrap_or_else(|| "invalid host id".into()),
        )
    })?;

    req.extensions_mut().insert(HostId(host_id));
    Ok(next.run(req).await)
}
