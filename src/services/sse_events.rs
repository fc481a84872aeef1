use serde::Serialize;
use tracing::warn;

use crate::{
    dao::models::{EpochMillis, RoundId, SessionRecord, SessionStatus},
    dto::{
        session::QuestionView,
        sse::{
            AnswersEvent, Handshake, LeaderboardCountdownEvent, NotificationDismissedEvent,
            PhaseChangedEvent, PlayerAnsweredEvent, ServerEvent, SessionEndedEvent, TimerEvent,
            WarningEvent,
        },
    },
    state::SseHub,
};

const EVENT_HANDSHAKE: &str = "handshake";
const EVENT_PHASE_CHANGED: &str = "phase_changed";
const EVENT_TIMER: &str = "timer";
const EVENT_ANSWERS: &str = "answers";
const EVENT_PLAYER_ANSWERED: &str = "player_answered";
const EVENT_NOTIFICATION_DISMISSED: &str = "notification.dismissed";
const EVENT_LEADERBOARD_COUNTDOWN: &str = "leaderboard.countdown";
const EVENT_WARNING: &str = "warning";
const EVENT_SESSION_ENDED: &str = "session.ended";

/// Handshake delivered to a single client right after it subscribes.
pub fn handshake_event(
    pin: &str,
    degraded: bool,
    status: Option<SessionStatus>,
) -> Option<ServerEvent> {
    let payload = Handshake {
        pin: pin.to_string(),
        message: format!("subscribed to session {pin}"),
        degraded,
        status,
    };
    match ServerEvent::json(Some(EVENT_HANDSHAKE.to_string()), &payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "failed to serialize SSE handshake");
            None
        }
    }
}

/// Broadcast the phase carried by a freshly observed snapshot.
pub fn broadcast_phase_changed(hub: &SseHub, record: &SessionRecord) {
    let payload = PhaseChangedEvent {
        status: record.status,
        question_index: record.current_question_index,
        question_count: record.question_count(),
        questions_left: record.questions_left(),
        round_id: record.round_id,
        start_time: record.start_time,
        end_time: record.end_time,
        question: QuestionView::for_record(record),
    };
    send_event(hub, EVENT_PHASE_CHANGED, &payload);
}

pub fn broadcast_timer(hub: &SseHub, round_id: RoundId, remaining_secs: u64, end_time: EpochMillis) {
    let payload = TimerEvent {
        round_id,
        remaining_secs,
        end_time,
    };
    send_event(hub, EVENT_TIMER, &payload);
}

pub fn broadcast_answers(hub: &SseHub, round_id: RoundId, answered: usize, total: usize) {
    let payload = AnswersEvent {
        round_id,
        answered,
        total,
    };
    send_event(hub, EVENT_ANSWERS, &payload);
}

pub fn broadcast_player_answered(hub: &SseHub, round_id: RoundId, participant: &str, nickname: &str) {
    let payload = PlayerAnsweredEvent {
        round_id,
        participant: participant.to_string(),
        nickname: nickname.to_string(),
    };
    send_event(hub, EVENT_PLAYER_ANSWERED, &payload);
}

pub fn broadcast_notification_dismissed(hub: &SseHub, participant: &str) {
    let payload = NotificationDismissedEvent {
        participant: participant.to_string(),
    };
    send_event(hub, EVENT_NOTIFICATION_DISMISSED, &payload);
}

pub fn broadcast_leaderboard_countdown(hub: &SseHub, remaining_secs: u64, held: bool) {
    let payload = LeaderboardCountdownEvent {
        remaining_secs,
        held,
    };
    send_event(hub, EVENT_LEADERBOARD_COUNTDOWN, &payload);
}

/// Surface a non-fatal failure (store write or subscription error).
pub fn broadcast_warning(hub: &SseHub, message: impl Into<String>) {
    let payload = WarningEvent {
        message: message.into(),
    };
    send_event(hub, EVENT_WARNING, &payload);
}

pub fn broadcast_session_ended(hub: &SseHub, pin: &str, reason: &str) {
    let payload = SessionEndedEvent {
        pin: pin.to_string(),
        reason: reason.to_string(),
    };
    send_event(hub, EVENT_SESSION_ENDED, &payload);
}

fn send_event(hub: &SseHub, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => hub.broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize session SSE payload"),
    }
}
