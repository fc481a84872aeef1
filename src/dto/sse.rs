use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dao::models::{EpochMillis, RoundId, SessionStatus},
    dto::session::QuestionView,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    pub pin: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
    /// Status of the latest snapshot, if one was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Broadcast whenever a snapshot shows a new phase.
pub struct PhaseChangedEvent {
    pub status: SessionStatus,
    pub question_index: usize,
    pub question_count: usize,
    pub questions_left: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<EpochMillis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<EpochMillis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionView>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Countdown of the answer window, sent when the displayed second changes.
pub struct TimerEvent {
    pub round_id: RoundId,
    pub remaining_secs: u64,
    pub end_time: EpochMillis,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// "X of N answered" for the current round.
pub struct AnswersEvent {
    pub round_id: RoundId,
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// A participant answered the current question.
pub struct PlayerAnsweredEvent {
    pub round_id: RoundId,
    pub participant: String,
    pub nickname: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// The visible "player answered" toast went away.
pub struct NotificationDismissedEvent {
    pub participant: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Seconds before the leaderboard advances on its own.
pub struct LeaderboardCountdownEvent {
    pub remaining_secs: u64,
    pub held: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Non-fatal failure the host screen should surface.
pub struct WarningEvent {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// The session document is gone; nothing more will be sent.
pub struct SessionEndedEvent {
    pub pin: String,
    pub reason: String,
}
