use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    dao::models::{EpochMillis, HostPatch, RoundId, SessionRecord, SessionStatus},
    state::{
        rounds::RoundMinter,
        timing::{AnswerWindow, is_expired},
    },
};

/// Events the host can feed into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// Host starts the quiz from the lobby.
    StartGame,
    /// The expiry poll saw the answer window close.
    Expire,
    /// Host ends the question early.
    SkipQuestion,
    /// Every participant answered the current round; shortens the window.
    AllAnswered,
    /// Host (or the leaderboard auto-timer) moves on.
    Advance,
}

/// Phase fields of a snapshot the machine reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedKey {
    /// Document status.
    pub status: SessionStatus,
    /// Current question index.
    pub index: usize,
    /// Round of the current question, if one was opened.
    pub round: Option<RoundId>,
}

impl ObservedKey {
    /// Phase fields of `record`.
    pub fn of(record: &SessionRecord) -> Self {
        Self {
            status: record.status,
            index: record.current_question_index,
            round: record.round_id,
        }
    }
}

/// Error returned when an event cannot be applied from the observed status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Status observed when the event was received.
    pub from: SessionStatus,
    /// Event that cannot be applied from this status.
    pub event: HostEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the observed status.
    InvalidTransition(InvalidTransition),
    /// The quiz cannot start with an empty lobby.
    NoParticipants,
    /// Expiry was requested while the answer window is still open.
    WindowOpen,
    /// The same transition was already issued from the same observed phase.
    Redundant {
        /// Target status of the duplicate.
        to: SessionStatus,
    },
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// A different phase was observed since the plan was created.
    PhaseMismatch {
        /// Phase when the plan was created.
        expected: ObservedKey,
        /// Phase observed now.
        actual: Option<ObservedKey>,
    },
    /// Observation version changed since the plan was created.
    VersionMismatch {
        /// Version when the plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A validated transition together with the host write that performs it.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase observed when planning.
    pub from: ObservedKey,
    /// Status the write moves the session to.
    pub to: SessionStatus,
    /// Event that triggered this transition.
    pub event: HostEvent,
    /// Host-owned fields to merge into the document.
    pub patch: HostPatch,
    /// Observation version the plan was built against.
    pub version: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the state machine, exposed in the session view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Phase of the latest observed document.
    pub observed: Option<ObservedKey>,
    /// Incremented each time the observed phase changes.
    pub version: usize,
    /// Target status of the pending transition, if any.
    pub pending: Option<SessionStatus>,
}

/// Host-side phase logic of one session.
///
/// The machine never moves on its own: applying a plan only records that its
/// write was issued, and the phase changes when a snapshot reflecting it is
/// observed. Issued targets are remembered per observed phase so duplicate
/// triggers (double clicks, a skip racing the expiry poll, repeated expiry
/// detection) collapse into one write.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    observed: Option<ObservedKey>,
    version: usize,
    pending: Option<Plan>,
    issued_from: Option<ObservedKey>,
    issued: Vec<SessionStatus>,
    minter: RoundMinter,
}

impl SessionStateMachine {
    /// Machine that has observed nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase of the latest observed document.
    pub fn observed(&self) -> Option<ObservedKey> {
        self.observed
    }

    /// Read-only summary for views and logs.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            observed: self.observed,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Feed a snapshot. Returns `true` when the observed phase changed.
    pub fn observe(&mut self, record: &SessionRecord) -> bool {
        if let Some(round) = record.round_id {
            self.minter.seed(round);
        }
        let key = ObservedKey::of(record);
        if self.observed == Some(key) {
            return false;
        }
        self.observed = Some(key);
        self.version += 1;
        true
    }

    /// Validate `event` against `record` (observing it first) and build the
    /// host write. The plan stays pending until applied or aborted.
    pub fn plan(
        &mut self,
        record: &SessionRecord,
        event: HostEvent,
        now: EpochMillis,
        grace: Duration,
    ) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }
        self.observe(record);
        let from = ObservedKey::of(record);

        let to = Self::target(record, event, now)?;
        if self.issued_from == Some(from) && self.issued.contains(&to) {
            return Err(PlanError::Redundant { to });
        }
        let patch = self.build_patch(record, event, to, now, grace);

        let plan = Plan {
            id: Uuid::new_v4(),
            from,
            to,
            event,
            patch,
            version: self.version,
            pending_since: Instant::now(),
        };
        self.pending = Some(plan.clone());
        Ok(plan)
    }

    /// Record the pending plan as issued once its write succeeded.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionStatus, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.observed != Some(plan.from) {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.observed,
            });
        }

        if self.version != plan.version {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version,
                actual: self.version,
            });
        }

        if self.issued_from != Some(plan.from) {
            self.issued_from = Some(plan.from);
            self.issued.clear();
        }
        self.issued.push(plan.to);
        Ok(plan.to)
    }

    /// Drop the pending plan after its write failed.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Target status of `event` from the phase of `record`.
    fn target(
        record: &SessionRecord,
        event: HostEvent,
        now: EpochMillis,
    ) -> Result<SessionStatus, PlanError> {
        let invalid = || {
            PlanError::InvalidTransition(InvalidTransition {
                from: record.status,
                event,
            })
        };

        let next = match (record.status, event) {
            (SessionStatus::Lobby, HostEvent::StartGame) => {
                if record.question_count() == 0 {
                    SessionStatus::Finished
                } else if record.players.is_empty() {
                    return Err(PlanError::NoParticipants);
                } else {
                    SessionStatus::Question
                }
            }
            (SessionStatus::Question, HostEvent::Expire) => {
                if !record.end_time.is_some_and(|end| is_expired(end, now)) {
                    return Err(PlanError::WindowOpen);
                }
                SessionStatus::Leaderboard
            }
            (SessionStatus::Question, HostEvent::SkipQuestion) => SessionStatus::Leaderboard,
            (SessionStatus::Question, HostEvent::AllAnswered) => {
                // Nothing left to shorten.
                if record.end_time.is_some_and(|end| is_expired(end, now)) {
                    return Err(PlanError::Redundant {
                        to: SessionStatus::Question,
                    });
                }
                SessionStatus::Question
            }
            (SessionStatus::Leaderboard, HostEvent::Advance) => {
                if record.current_question_index + 1 < record.question_count() {
                    SessionStatus::Question
                } else {
                    SessionStatus::Finished
                }
            }
            _ => return Err(invalid()),
        };
        Ok(next)
    }

    fn build_patch(
        &mut self,
        record: &SessionRecord,
        event: HostEvent,
        to: SessionStatus,
        now: EpochMillis,
        grace: Duration,
    ) -> HostPatch {
        match (event, to) {
            (HostEvent::StartGame, SessionStatus::Question) => self.enter_question(record, 0, now, grace),
            (HostEvent::Advance, SessionStatus::Question) => {
                self.enter_question(record, record.current_question_index + 1, now, grace)
            }
            (HostEvent::AllAnswered, _) => HostPatch {
                end_time: Some(now),
                ..HostPatch::default()
            },
            (_, status) => HostPatch::status(status),
        }
    }

    fn enter_question(
        &mut self,
        record: &SessionRecord,
        index: usize,
        now: EpochMillis,
        grace: Duration,
    ) -> HostPatch {
        let duration = record
            .quiz_snapshot
            .questions
            .get(index)
            .map(|question| question.duration)
            .unwrap_or_default();
        let window = AnswerWindow::open(now, grace, duration);
        HostPatch {
            status: Some(SessionStatus::Question),
            current_question_index: Some(index),
            round_id: Some(self.minter.mint(now)),
            start_time: Some(window.start_time),
            end_time: Some(window.end_time),
        }
    }
}
