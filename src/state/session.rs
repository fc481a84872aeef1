//! Registry entry of a live session: the channel into its driver task and the
//! views the driver publishes.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};
use uuid::Uuid;

use crate::{
    dao::models::{SessionRecord, SessionStatus},
    error::ServiceError,
    state::sse::SseHub,
};

/// Actions a host can request from its session driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAction {
    /// Leave the lobby for the first question.
    Start,
    /// End the current question early.
    Skip,
    /// Move past the leaderboard.
    Advance,
    /// Pause the leaderboard auto-advance countdown.
    Hold,
    /// Delete the session document.
    Close,
}

/// What the driver did with an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A transition write landed; the session is moving to this status.
    Issued(SessionStatus),
    /// The same transition was already issued from this phase.
    Duplicate(SessionStatus),
    /// The leaderboard countdown is paused.
    Held,
    /// The session document was deleted.
    Closed,
}

/// Channel the driver answers a command on.
pub type CommandReply = oneshot::Sender<Result<CommandOutcome, ServiceError>>;

/// Action queued for a driver with its reply channel.
#[derive(Debug)]
pub struct HostCommand {
    /// Requested action.
    pub action: HostAction,
    /// Where the outcome is sent.
    pub reply: CommandReply,
}

/// Latest state published by a driver for request handlers.
#[derive(Debug, Clone, Default)]
pub struct LiveView {
    /// Latest observed document; `None` before the first snapshot.
    pub record: Option<Arc<SessionRecord>>,
    /// When the leaderboard will advance by itself, unless held.
    pub auto_advance_at: Option<Instant>,
    /// The host paused the countdown.
    pub auto_advance_held: bool,
    /// Target of a transition whose write is in flight.
    pub pending: Option<SessionStatus>,
    /// Nickname on the "player answered" toast.
    pub notification: Option<String>,
}

/// Handle to a running session driver.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    host_id: Arc<str>,
    commands: mpsc::Sender<HostCommand>,
    view: watch::Receiver<LiveView>,
    hub: Arc<SseHub>,
}

impl SessionHandle {
    /// Wrap the channels of a freshly spawned driver.
    pub fn new(
        host_id: impl Into<Arc<str>>,
        commands: mpsc::Sender<HostCommand>,
        view: watch::Receiver<LiveView>,
        hub: Arc<SseHub>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            host_id: host_id.into(),
            commands,
            view,
            hub,
        }
    }

    /// Distinguishes successive drivers of a reused PIN.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Host that owns the session.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Copy of the latest published view.
    pub fn view(&self) -> LiveView {
        self.view.borrow().clone()
    }

    /// SSE fan-out of this session.
    pub fn hub(&self) -> &Arc<SseHub> {
        &self.hub
    }

    /// Send an action to the driver and wait for its outcome.
    pub async fn send(&self, action: HostAction) -> Result<CommandOutcome, ServiceError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(HostCommand { action, reply })
            .await
            .map_err(|_| ServiceError::NotFound("session has ended".into()))?;
        outcome
            .await
            .map_err(|_| ServiceError::NotFound("session has ended".into()))?
    }
}
