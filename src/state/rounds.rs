//! Round identifiers and the live-answer filter built on them.

pub use crate::dao::models::answered_count;
use crate::dao::models::{EpochMillis, PlayerRecord, Players, RoundId};

/// Mints strictly increasing round identifiers.
///
/// Rounds are millisecond timestamps bumped past the last issued or observed
/// round, so two rounds minted in the same millisecond still differ.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundMinter {
    last: Option<RoundId>,
}

impl RoundMinter {
    /// Minter that has not issued or seen any round yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next round id: `now`, or one past the last round if that is not later.
    pub fn mint(&mut self, now: EpochMillis) -> RoundId {
        let next = match self.last {
            Some(RoundId(last)) => now.max(last + 1),
            None => now,
        };
        self.last = Some(RoundId(next));
        RoundId(next)
    }

    /// Adopt a round seen in a snapshot (e.g. after re-attaching to a session).
    pub fn seed(&mut self, round: RoundId) {
        if self.last.is_none_or(|last| round > last) {
            self.last = Some(round);
        }
    }

    /// Last issued or observed round.
    pub fn last(&self) -> Option<RoundId> {
        self.last
    }
}

/// An answer counts for `round` only when it was tagged with that round.
pub fn is_live(player: &PlayerRecord, round: RoundId) -> bool {
    player.last_answered_round_id == Some(round)
}

/// Participants with a live answer for `round`, in document order.
pub fn live_answers(players: &Players, round: RoundId) -> impl Iterator<Item = (&str, &PlayerRecord)> {
    players
        .iter()
        .filter(move |(_, player)| is_live(player, round))
        .map(|(id, player)| (id.as_str(), player))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_is_strictly_increasing_within_one_millisecond() {
        let mut minter = RoundMinter::new();
        let a = minter.mint(1_000);
        let b = minter.mint(1_000);
        let c = minter.mint(999);
        let d = minter.mint(5_000);
        assert!(a < b && b < c && c < d);
        assert_eq!(d, RoundId(5_000));
    }

    #[test]
    fn seeded_minter_never_reuses_observed_rounds() {
        let mut minter = RoundMinter::new();
        minter.seed(RoundId(9_000));
        minter.seed(RoundId(4_000));
        assert_eq!(minter.last(), Some(RoundId(9_000)));
        assert_eq!(minter.mint(2_000), RoundId(9_001));
    }

    #[test]
    fn stale_answers_are_not_live() {
        let mut players = Players::new();
        for (id, round) in [("a", Some(2)), ("b", Some(1)), ("c", None), ("d", Some(2))] {
            players.insert(
                id.into(),
                PlayerRecord {
                    nickname: id.to_uppercase(),
                    last_answered_round_id: round.map(RoundId),
                    ..PlayerRecord::default()
                },
            );
        }

        let live: Vec<&str> = live_answers(&players, RoundId(2)).map(|(id, _)| id).collect();
        assert_eq!(live, vec!["a", "d"]);
        assert_eq!(answered_count(&players, RoundId(2)), 2);
        assert_eq!(answered_count(&players, RoundId(3)), 0);
    }
}
