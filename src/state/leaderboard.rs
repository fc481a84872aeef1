//! Rankings shown between questions and at the end of the quiz.

use crate::dao::models::{SessionRecord, sorted_by_score};

/// Ranks withheld from the host screen near the end of the quiz, and the
/// number of questions left below which they are withheld.
pub const SUSPENSE_RANKS: usize = 3;

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    /// 1-based position.
    pub rank: usize,
    pub participant: String,
    pub nickname: String,
    pub score: u32,
}

/// Every participant ranked by score.
pub fn standings(record: &SessionRecord) -> Vec<Standing> {
    sorted_by_score(&record.players)
        .into_iter()
        .enumerate()
        .map(|(position, (participant, player))| Standing {
            rank: position + 1,
            participant: participant.to_string(),
            nickname: player.nickname.clone(),
            score: player.score,
        })
        .collect()
}

/// `true` when fewer than `window` questions remain after `index`.
pub fn is_final_stretch(question_count: usize, index: usize, window: usize) -> bool {
    question_count.saturating_sub(index + 1) < window
}

/// Rows the host screen may show: the top ranks are withheld during the
/// final stretch so the podium stays a surprise.
pub fn visible_standings(record: &SessionRecord, window: usize) -> Vec<Standing> {
    let rows = standings(record);
    if is_final_stretch(record.question_count(), record.current_question_index, window) {
        rows.into_iter().skip(SUSPENSE_RANKS).collect()
    } else {
        rows
    }
}

/// Top three for the final screen.
pub fn podium(record: &SessionRecord) -> Vec<Standing> {
    let mut rows = standings(record);
    rows.truncate(SUSPENSE_RANKS);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{PlayerRecord, Question, QuizSnapshot};

    fn record(questions: usize, index: usize, scores: &[(&str, u32)]) -> SessionRecord {
        let questions = (0..questions)
            .map(|i| Question {
                text: format!("Q{i}"),
                image: None,
                answers: vec!["yes".into(), "no".into()],
                correct: 0,
                duration: 10,
            })
            .collect();
        let mut record = SessionRecord::new_lobby(
            "host",
            "quiz",
            QuizSnapshot {
                title: "Quiz".into(),
                questions,
            },
        );
        record.current_question_index = index;
        for (id, score) in scores {
            record.players.insert(
                id.to_string(),
                PlayerRecord {
                    nickname: id.to_uppercase(),
                    score: *score,
                    ..PlayerRecord::default()
                },
            );
        }
        record
    }

    const SCORES: &[(&str, u32)] = &[
        ("a", 100),
        ("b", 400),
        ("c", 300),
        ("d", 200),
        ("e", 0),
    ];

    #[test]
    fn ranks_are_one_based_by_descending_score() {
        let rows = standings(&record(5, 0, SCORES));
        let order: Vec<(usize, &str)> = rows
            .iter()
            .map(|row| (row.rank, row.participant.as_str()))
            .collect();
        assert_eq!(order, vec![(1, "b"), (2, "c"), (3, "d"), (4, "a"), (5, "e")]);
    }

    #[test]
    fn final_stretch_boundary() {
        // 5 questions: index 1 leaves 3, index 2 leaves 2.
        assert!(!is_final_stretch(5, 0, 3));
        assert!(!is_final_stretch(5, 1, 3));
        assert!(is_final_stretch(5, 2, 3));
        assert!(is_final_stretch(5, 4, 3));
    }

    #[test]
    fn top_three_withheld_only_in_final_stretch() {
        let early = visible_standings(&record(5, 0, SCORES), 3);
        assert_eq!(early.len(), 5);
        assert_eq!(early[0].rank, 1);

        let late = visible_standings(&record(5, 2, SCORES), 3);
        let ranks: Vec<usize> = late.iter().map(|row| row.rank).collect();
        assert_eq!(ranks, vec![4, 5]);
    }

    #[test]
    fn podium_holds_at_most_three() {
        let top = podium(&record(1, 0, SCORES));
        let ids: Vec<&str> = top.iter().map(|row| row.participant.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);

        assert_eq!(podium(&record(1, 0, &[("solo", 10)])).len(), 1);
    }
}
