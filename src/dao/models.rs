//! Shape of the shared session document and of the owner-scoped patches that
//! the host and the participants are allowed to write into it.

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Absolute instant expressed as milliseconds since the Unix epoch.
pub type EpochMillis = u64;

/// Lowest PIN handed out to a session.
pub const PIN_MIN: u32 = 100_000;
/// Highest PIN handed out to a session.
pub const PIN_MAX: u32 = 999_999;

/// Six digit numeric identifier of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionPin(String);

/// Error returned when a string is not a valid session PIN.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session pin `{0}`: expected 6 digits between 100000 and 999999")]
pub struct InvalidPin(pub String);

impl SessionPin {
    /// Draw a PIN uniformly in `[100000, 999999]`.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.random_range(PIN_MIN..=PIN_MAX).to_string())
    }

    /// Borrow the decimal representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionPin {
    type Err = InvalidPin;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let valid = value.len() == 6
            && value.chars().all(|c| c.is_ascii_digit())
            && value
                .parse::<u32>()
                .is_ok_and(|n| (PIN_MIN..=PIN_MAX).contains(&n));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidPin(value.to_string()))
        }
    }
}

impl TryFrom<String> for SessionPin {
    type Error = InvalidPin;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionPin> for String {
    fn from(value: SessionPin) -> Self {
        value.0
    }
}

impl fmt::Display for SessionPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token identifying one QUESTION phase. Strictly increasing over a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Phase of a session as stored in the shared document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Waiting for participants to join.
    Lobby,
    /// A question is on screen and its answer window is open or closing.
    Question,
    /// Ranking shown between questions.
    Leaderboard,
    /// Quiz completed; terminal.
    Finished,
}

/// One question of the frozen quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub answers: Vec<String>,
    /// Index of the correct option inside `answers`.
    pub correct: usize,
    /// Length of the answer window in seconds.
    pub duration: u32,
}

/// Copy of the quiz taken at launch; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSnapshot {
    pub title: String,
    pub questions: Vec<Question>,
}

/// Participant-owned sub-record of the session document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub nickname: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_answer_idx: Option<usize>,
    /// Round in which the participant last answered; the only anchor used for attribution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_answered_round_id: Option<RoundId>,
}

impl PlayerRecord {
    /// Identity used to attribute answers: the uid when known, the nickname otherwise.
    pub fn attribution_key(&self) -> &str {
        self.uid.as_deref().unwrap_or(&self.nickname)
    }
}

/// Player entries keyed by participant identifier, in document order.
pub type Players = IndexMap<String, PlayerRecord>;

/// The shared session document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub host_id: String,
    pub quiz_id: String,
    pub quiz_snapshot: QuizSnapshot,
    pub status: SessionStatus,
    pub current_question_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<EpochMillis>,
    #[serde(default)]
    pub players: Players,
    /// Assigned by the store on every write; advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<EpochMillis>,
}

impl SessionRecord {
    /// Fresh lobby document for a newly launched session.
    pub fn new_lobby(
        host_id: impl Into<String>,
        quiz_id: impl Into<String>,
        quiz: QuizSnapshot,
    ) -> Self {
        Self {
            host_id: host_id.into(),
            quiz_id: quiz_id.into(),
            quiz_snapshot: quiz,
            status: SessionStatus::Lobby,
            current_question_index: 0,
            round_id: None,
            start_time: None,
            end_time: None,
            players: Players::new(),
            last_updated: None,
        }
    }

    /// Number of questions in the frozen quiz.
    pub fn question_count(&self) -> usize {
        self.quiz_snapshot.questions.len()
    }

    /// Question at `currentQuestionIndex`, if any.
    pub fn current_question(&self) -> Option<&Question> {
        self.quiz_snapshot
            .questions
            .get(self.current_question_index)
    }

    /// Questions still to be played after the current one.
    pub fn questions_left(&self) -> usize {
        self.question_count()
            .saturating_sub(self.current_question_index + 1)
    }

    /// Answers counted for the current round (zero when no round is running).
    pub fn current_answered_count(&self) -> usize {
        self.round_id
            .map(|round| answered_count(&self.players, round))
            .unwrap_or(0)
    }
}

/// Count players whose last answer belongs to `round`.
pub fn answered_count(players: &Players, round: RoundId) -> usize {
    players
        .values()
        .filter(|player| player.last_answered_round_id == Some(round))
        .count()
}

/// Players ordered by score (descending), ties broken by participant id (ascending).
pub fn sorted_by_score(players: &Players) -> Vec<(&str, &PlayerRecord)> {
    let mut sorted: Vec<(&str, &PlayerRecord)> = players
        .iter()
        .map(|(id, player)| (id.as_str(), player))
        .collect();
    sorted.sort_by(|(a_id, a), (b_id, b)| b.score.cmp(&a.score).then_with(|| a_id.cmp(b_id)));
    sorted
}

/// Partial write over the host-owned fields. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<EpochMillis>,
}

impl HostPatch {
    /// Patch touching only the status field.
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Merge the patch into a record.
    pub fn apply_to(&self, record: &mut SessionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(index) = self.current_question_index {
            record.current_question_index = index;
        }
        if let Some(round) = self.round_id {
            record.round_id = Some(round);
        }
        if let Some(start) = self.start_time {
            record.start_time = Some(start);
        }
        if let Some(end) = self.end_time {
            record.end_time = Some(end);
        }
    }
}

/// Partial write over one participant's own entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_answer_idx: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_answered_round_id: Option<RoundId>,
}

impl PlayerPatch {
    /// Merge the patch into the entry of `participant`, creating it when missing.
    pub fn apply_to(&self, players: &mut Players, participant: &str) {
        let player = players.entry(participant.to_string()).or_default();
        if let Some(uid) = &self.uid {
            player.uid = Some(uid.clone());
        }
        if let Some(nickname) = &self.nickname {
            player.nickname = nickname.clone();
        }
        if let Some(score) = self.score {
            player.score = score;
        }
        if let Some(idx) = self.last_answer_idx {
            player.last_answer_idx = Some(idx);
        }
        if let Some(round) = self.last_answered_round_id {
            player.last_answered_round_id = Some(round);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(nickname: &str, score: u32, round: Option<u64>) -> PlayerRecord {
        PlayerRecord {
            uid: None,
            nickname: nickname.into(),
            score,
            last_answer_idx: round.map(|_| 0),
            last_answered_round_id: round.map(RoundId),
        }
    }

    #[test]
    fn pin_parsing_enforces_six_digit_range() {
        assert!("123456".parse::<SessionPin>().is_ok());
        assert!("999999".parse::<SessionPin>().is_ok());
        assert!("099999".parse::<SessionPin>().is_err());
        assert!("12345".parse::<SessionPin>().is_err());
        assert!("12a456".parse::<SessionPin>().is_err());
        assert!("+12345".parse::<SessionPin>().is_err());
    }

    #[test]
    fn generated_pins_are_always_valid() {
        let mut rng = rand::rng();
        for _ in 0..1_000 {
            let pin = SessionPin::generate(&mut rng);
            assert!(pin.as_str().parse::<SessionPin>().is_ok(), "{pin}");
        }
    }

    #[test]
    fn answered_count_only_counts_the_given_round() {
        let mut players = Players::new();
        players.insert("a".into(), player("A", 0, Some(10)));
        players.insert("b".into(), player("B", 0, Some(9)));
        players.insert("c".into(), player("C", 0, None));

        assert_eq!(answered_count(&players, RoundId(10)), 1);
        assert_eq!(answered_count(&players, RoundId(9)), 1);
        assert_eq!(answered_count(&players, RoundId(11)), 0);
    }

    #[test]
    fn sorted_by_score_breaks_ties_by_participant_id() {
        let mut players = Players::new();
        players.insert("zed".into(), player("Z", 300, None));
        players.insert("amy".into(), player("A", 300, None));
        players.insert("bob".into(), player("B", 500, None));
        players.insert("cat".into(), player("C", 0, None));

        let order: Vec<&str> = sorted_by_score(&players)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(order, vec!["bob", "amy", "zed", "cat"]);
    }

    #[test]
    fn host_patch_leaves_absent_fields_untouched() {
        let quiz = QuizSnapshot {
            title: "Quiz".into(),
            questions: vec![],
        };
        let mut record = SessionRecord::new_lobby("host", "quiz", quiz);
        record.players.insert("p1".into(), player("P1", 10, None));

        HostPatch {
            end_time: Some(42),
            ..HostPatch::default()
        }
        .apply_to(&mut record);

        assert_eq!(record.status, SessionStatus::Lobby);
        assert_eq!(record.end_time, Some(42));
        assert_eq!(record.players.len(), 1);
    }

    #[test]
    fn record_uses_camel_case_wire_names() {
        let quiz = QuizSnapshot {
            title: "Quiz".into(),
            questions: vec![],
        };
        let mut record = SessionRecord::new_lobby("host", "quiz", quiz);
        record.round_id = Some(RoundId(7));
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["status"], "LOBBY");
        assert_eq!(value["hostId"], "host");
        assert_eq!(value["roundId"], 7);
        assert_eq!(value["currentQuestionIndex"], 0);
    }

    #[test]
    fn attribution_prefers_uid_over_nickname() {
        let mut record = player("Nick", 0, None);
        assert_eq!(record.attribution_key(), "Nick");
        record.uid = Some("uid-1".into());
        assert_eq!(record.attribution_key(), "uid-1");
    }
}
