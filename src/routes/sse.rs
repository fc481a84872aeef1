use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/sse/sessions/{pin}",
    tag = "sse",
    params(("pin" = String, Path, description = "Six digit session PIN")),
    responses(
        (status = 200, description = "Session event stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "No live session with this PIN")
    )
)]
/// Stream the events of one live session to the host screen.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(pin): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let subscription = sse_service::subscribe_session(&state, &pin)?;
    info!(pin = %subscription.pin, "new session SSE connection");
    Ok(sse_service::to_sse_stream(subscription))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/sessions/{pin}", get(session_stream))
}
