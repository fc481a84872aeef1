//! Host-facing session operations: launch, re-attach, inspect and drive.

use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    dao::{
        models::{QuizSnapshot, SessionPin, SessionRecord},
        session_store::HostWriter,
        storage::StorageError,
    },
    dto::session::{ActionResponse, LaunchSessionRequest, LaunchSessionResponse, SessionView},
    error::ServiceError,
    services::session_driver,
    state::{CommandOutcome, HostAction, SessionHandle, SharedState},
};

/// Create a lobby document under a fresh PIN and start driving it.
pub async fn launch_session(
    state: &SharedState,
    host_id: &str,
    request: LaunchSessionRequest,
) -> Result<LaunchSessionResponse, ServiceError> {
    let store = state.require_session_store().await?;
    let LaunchSessionRequest { quiz_id, quiz } = request;
    let record = SessionRecord::new_lobby(host_id, quiz_id, QuizSnapshot::from(quiz));
    let status = record.status;

    let attempts = state.config().pin_attempts.max(1);
    for attempt in 1..=attempts {
        let pin = SessionPin::generate(&mut rand::rng());
        let writer = HostWriter::new(store.clone(), pin.clone());

        if writer.read().await?.is_some() {
            warn!(%pin, attempt, "generated PIN already in use");
            continue;
        }
        match writer.create(record.clone()).await {
            Ok(()) => {
                info!(%pin, host_id, quiz_id = %record.quiz_id, "session launched");
                session_driver::spawn(state.clone(), store, pin.clone(), host_id);
                return Ok(LaunchSessionResponse {
                    pin: pin.into(),
                    status,
                });
            }
            // another host grabbed the PIN between the check and the create
            Err(StorageError::Conflict { .. }) => {
                warn!(%pin, attempt, "PIN taken during create");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::InvalidState(format!(
        "no free session PIN after {attempts} attempts"
    )))
}

/// Resume driving an existing session, e.g. after a host restart.
pub async fn attach_session(
    state: &SharedState,
    host_id: &str,
    pin: &str,
) -> Result<ActionResponse, ServiceError> {
    let pin = parse_pin(pin)?;
    if let Some(handle) = state.session(&pin) {
        authorize(&handle, host_id)?;
        return Ok(ActionResponse {
            message: format!("session {pin} already attached"),
            status: handle.view().record.map(|record| record.status),
        });
    }

    let store = state.require_session_store().await?;
    let writer = HostWriter::new(store.clone(), pin.clone());
    let record = writer
        .read()
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{pin}` not found")))?;
    if record.host_id != host_id {
        return Err(ServiceError::Unauthorized(format!(
            "session `{pin}` belongs to another host"
        )));
    }

    session_driver::spawn(state.clone(), store, pin.clone(), host_id);
    info!(%pin, host_id, status = ?record.status, "session re-attached");
    Ok(ActionResponse {
        message: format!("session {pin} attached"),
        status: Some(record.status),
    })
}

/// Current host-screen projection of a live session.
pub fn session_view(
    state: &SharedState,
    host_id: &str,
    pin: &str,
) -> Result<SessionView, ServiceError> {
    let pin = parse_pin(pin)?;
    let handle = live_session(state, &pin)?;
    authorize(&handle, host_id)?;

    SessionView::build(
        pin.as_str(),
        &handle.view(),
        state.clock().now(),
        Instant::now(),
        state.config().suspense_window,
    )
    .ok_or_else(|| ServiceError::InvalidState("session snapshot not received yet".into()))
}

/// Forward a host action to the driver of `pin`.
pub async fn dispatch(
    state: &SharedState,
    host_id: &str,
    pin: &str,
    action: HostAction,
) -> Result<ActionResponse, ServiceError> {
    let pin = parse_pin(pin)?;
    let handle = live_session(state, &pin)?;
    authorize(&handle, host_id)?;

    let outcome = handle.send(action).await?;
    let response = match outcome {
        CommandOutcome::Issued(status) => ActionResponse {
            message: format!("moving session to {status:?}"),
            status: Some(status),
        },
        CommandOutcome::Duplicate(status) => ActionResponse {
            message: format!("move to {status:?} already requested"),
            status: Some(status),
        },
        CommandOutcome::Held => ActionResponse {
            message: "leaderboard auto-advance paused".into(),
            status: None,
        },
        CommandOutcome::Closed => ActionResponse {
            message: format!("session {pin} closed"),
            status: None,
        },
    };
    Ok(response)
}

fn parse_pin(pin: &str) -> Result<SessionPin, ServiceError> {
    Ok(pin.parse::<SessionPin>()?)
}

fn live_session(state: &SharedState, pin: &SessionPin) -> Result<SessionHandle, ServiceError> {
    state
        .session(pin)
        .ok_or_else(|| ServiceError::NotFound(format!("no live session `{pin}`")))
}

fn authorize(handle: &SessionHandle, host_id: &str) -> Result<(), ServiceError> {
    if handle.host_id() != host_id {
        return Err(ServiceError::Unauthorized(
            "session belongs to another host".into(),
        ));
    }
    Ok(())
}
