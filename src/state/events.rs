//! Derivation of answer events from successive session snapshots.

use std::{collections::BTreeSet, time::Duration};

use tokio::time::Instant;

use crate::{
    dao::models::{PlayerRecord, RoundId, SessionRecord, SessionStatus},
    state::rounds::live_answers,
};

/// Event synthesized from the difference between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivedEvent {
    /// A participant's answer for the current round showed up.
    PlayerAnswered {
        /// Round the answer was tagged with.
        round: RoundId,
        /// Attribution key: `uid`, or the nickname when absent.
        participant: String,
        /// Display name on the notification.
        nickname: String,
    },
    /// The "X of N answered" figures changed.
    AnswerCountChanged {
        /// Round being counted.
        round: RoundId,
        /// Participants with a live answer.
        answered: usize,
        /// Participants in the session.
        total: usize,
    },
    /// Every participant has a live answer (rising edge only).
    AllAnswered {
        /// Round every participant answered.
        round: RoundId,
    },
}

/// What the previous snapshot of the current round looked like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerTracker {
    round: Option<RoundId>,
    last_count: usize,
    last_answered: BTreeSet<String>,
    last_total: usize,
    all_answered: bool,
}

impl AnswerTracker {
    /// Tracker that has not seen a question yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Round of the last question snapshot, if any.
    pub fn round(&self) -> Option<RoundId> {
        self.round
    }

    /// Live answers in the last snapshot.
    pub fn answered(&self) -> usize {
        self.last_count
    }

    /// Participants in the last snapshot.
    pub fn total(&self) -> usize {
        self.last_total
    }

    /// Whether every participant had answered in the last snapshot.
    pub fn all_answered(&self) -> bool {
        self.all_answered
    }

    /// Pure reducer: next tracker state and the events separating it from `self`.
    ///
    /// Several participants answering between two snapshots each get a
    /// `PlayerAnswered`, in document order.
    pub fn reduce(&self, record: &SessionRecord) -> (AnswerTracker, Vec<DerivedEvent>) {
        let round = match (record.status, record.round_id) {
            (SessionStatus::Question, Some(round)) => round,
            _ => return (AnswerTracker::default(), Vec::new()),
        };

        let baseline = if self.round == Some(round) {
            self.clone()
        } else {
            AnswerTracker {
                round: Some(round),
                ..AnswerTracker::default()
            }
        };

        // Keyed by participant id; nicknames may collide.
        let live: Vec<(&str, &PlayerRecord)> = live_answers(&record.players, round).collect();
        let answered: BTreeSet<String> = live.iter().map(|(id, _)| id.to_string()).collect();
        let count = answered.len();
        let total = record.players.len();

        let mut events = Vec::new();
        if count > baseline.last_count {
            events.extend(
                live.iter()
                    .filter(|(id, _)| !baseline.last_answered.contains(*id))
                    .map(|(_, player)| DerivedEvent::PlayerAnswered {
                        round,
                        participant: player.attribution_key().to_string(),
                        nickname: player.nickname.clone(),
                    }),
            );
        }
        if count != baseline.last_count || total != baseline.last_total {
            events.push(DerivedEvent::AnswerCountChanged {
                round,
                answered: count,
                total,
            });
        }
        let all_answered = total > 0 && count == total;
        if all_answered && !baseline.all_answered {
            events.push(DerivedEvent::AllAnswered { round });
        }

        let next = AnswerTracker {
            round: Some(round),
            last_count: count,
            last_answered: answered,
            last_total: total,
            all_answered,
        };
        (next, events)
    }

    /// Reduce in place.
    pub fn update(&mut self, record: &SessionRecord) -> Vec<DerivedEvent> {
        let (next, events) = self.reduce(record);
        *self = next;
        events
    }
}

/// "Player answered" toast currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Attribution key of the participant.
    pub participant: String,
    /// Name shown on screen.
    pub nickname: String,
    /// When the notification is dismissed.
    pub expires_at: Instant,
}

/// Single-slot notification area: the newest notification replaces the
/// visible one and each lives for a fixed time.
#[derive(Debug, Clone)]
pub struct NotificationBoard {
    ttl: Duration,
    visible: Option<Notification>,
}

impl NotificationBoard {
    /// Empty board whose notifications live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, visible: None }
    }

    /// Notification currently on screen.
    pub fn visible(&self) -> Option<&Notification> {
        self.visible.as_ref()
    }

    /// Show a notification, returning the one it replaced.
    pub fn show(
        &mut self,
        participant: impl Into<String>,
        nickname: impl Into<String>,
        now: Instant,
    ) -> Option<Notification> {
        self.visible.replace(Notification {
            participant: participant.into(),
            nickname: nickname.into(),
            expires_at: now + self.ttl,
        })
    }

    /// Dismiss the visible notification once its lifetime is over.
    pub fn expire(&mut self, now: Instant) -> Option<Notification> {
        match &self.visible {
            Some(notification) if notification.expires_at <= now => self.visible.take(),
            _ => None,
        }
    }

    /// Dismiss the visible notification right away.
    pub fn clear(&mut self) -> Option<Notification> {
        self.visible.take()
    }
}
