use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{
    dao::models::{EpochMillis, Question, QuizSnapshot, RoundId, SessionRecord, SessionStatus},
    dto::{format_epoch_millis, validation::validate_answer_index},
    state::{
        LiveView,
        leaderboard::{self, Standing},
        timing::remaining_secs,
    },
};

/// Payload launching a new session from a quiz supplied by the quiz repository.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSessionRequest {
    #[validate(length(min = 1, max = 128))]
    pub quiz_id: String,
    #[validate(nested)]
    pub quiz: QuizInput,
}

/// Quiz content frozen into the session at launch.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct QuizInput {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(nested)]
    pub questions: Vec<QuestionInput>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_question"))]
pub struct QuestionInput {
    #[validate(length(min = 1, max = 500))]
    pub text: String,
    #[serde(default)]
    #[validate(url)]
    pub image: Option<String>,
    #[validate(length(min = 2, max = 6))]
    pub answers: Vec<String>,
    /// Index of the correct option.
    pub correct: usize,
    /// Answer window in seconds.
    #[validate(range(min = 1, max = 600))]
    pub duration: u32,
}

fn validate_question(question: &QuestionInput) -> Result<(), ValidationError> {
    validate_answer_index(question.correct, question.answers.len())
}

impl From<QuizInput> for QuizSnapshot {
    fn from(value: QuizInput) -> Self {
        Self {
            title: value.title,
            questions: value
                .questions
                .into_iter()
                .map(|question| Question {
                    text: question.text,
                    image: question.image,
                    answers: question.answers,
                    correct: question.correct,
                    duration: question.duration,
                })
                .collect(),
        }
    }
}

/// Question as shown on the host screen. The correct index is only revealed
/// once the answer window is over.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub answers: Vec<String>,
    pub duration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct: Option<usize>,
}

impl QuestionView {
    pub fn for_record(record: &SessionRecord) -> Option<Self> {
        if matches!(record.status, SessionStatus::Lobby | SessionStatus::Finished) {
            return None;
        }
        let question = record.current_question()?;
        Some(Self {
            text: question.text.clone(),
            image: question.image.clone(),
            answers: question.answers.clone(),
            duration: question.duration,
            correct: (record.status != SessionStatus::Question).then_some(question.correct),
        })
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StandingRow {
    pub rank: usize,
    pub participant: String,
    pub nickname: String,
    pub score: u32,
}

impl From<Standing> for StandingRow {
    fn from(value: Standing) -> Self {
        Self {
            rank: value.rank,
            participant: value.participant,
            nickname: value.nickname,
            score: value.score,
        }
    }
}

/// Everything the host screen needs to render the session.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub pin: String,
    pub quiz_id: String,
    pub title: String,
    pub status: SessionStatus,
    pub question_index: usize,
    pub question_count: usize,
    pub questions_left: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
    /// Live answers for the current round only.
    pub answered: usize,
    pub total: usize,
    /// Ranks 1 to 3 are hidden from `standings` near the end of the quiz.
    pub standings_withheld: bool,
    pub standings: Vec<StandingRow>,
    /// Filled once the quiz is finished.
    pub podium: Vec<StandingRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_advance_secs: Option<u64>,
    pub auto_advance_held: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_transition: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl SessionView {
    /// Project a driver view; `None` until the first snapshot arrived.
    pub fn build(
        pin: &str,
        live: &LiveView,
        now: EpochMillis,
        instant_now: Instant,
        suspense_window: usize,
    ) -> Option<Self> {
        let record = live.record.as_deref()?;
        let withheld = leaderboard::is_final_stretch(
            record.question_count(),
            record.current_question_index,
            suspense_window,
        );
        let remaining = match record.status {
            SessionStatus::Question => record.end_time.map(|end| remaining_secs(end, now)),
            _ => None,
        };
        let podium = match record.status {
            SessionStatus::Finished => leaderboard::podium(record)
                .into_iter()
                .map(Into::into)
                .collect(),
            _ => Vec::new(),
        };

        Some(Self {
            pin: pin.to_string(),
            quiz_id: record.quiz_id.clone(),
            title: record.quiz_snapshot.title.clone(),
            status: record.status,
            question_index: record.current_question_index,
            question_count: record.question_count(),
            questions_left: record.questions_left(),
            round_id: record.round_id,
            question: QuestionView::for_record(record),
            remaining_secs: remaining,
            answered: record.current_answered_count(),
            total: record.players.len(),
            standings_withheld: withheld,
            standings: leaderboard::visible_standings(record, suspense_window)
                .into_iter()
                .map(Into::into)
                .collect(),
            podium,
            auto_advance_secs: live.auto_advance_at.map(|at| {
                (at.saturating_duration_since(instant_now).as_millis() as u64).div_ceil(1_000)
            }),
            auto_advance_held: live.auto_advance_held,
            pending_transition: live.pending,
            notification: live.notification.clone(),
            last_updated: record.last_updated.map(format_epoch_millis),
        })
    }
}

/// Returned by `POST /sessions`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSessionResponse {
    pub pin: String,
    pub status: SessionStatus,
}

/// Generic action acknowledgement used by host endpoints.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
}
