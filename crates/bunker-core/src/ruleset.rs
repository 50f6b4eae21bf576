//! Game-size ruleset and host-adjustable settings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest vote schedule a ruleset may carry
pub const MAX_ROUNDS: usize = 64;

/// Most votes a single round may run
pub const MAX_VOTES_PER_ROUND: u32 = 9;

/// Smallest and largest table the preset covers
pub const MIN_PLAYERS: usize = 4;
pub const MAX_PLAYERS: usize = 16;

/// Vote budget per round, seat capacity and exile target, fixed at session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ruleset {
    pub votes_per_round: Vec<u32>,
    pub bunker_seats: usize,
    pub total_exiles: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesetError {
    #[error("votesPerRound must not be empty")]
    EmptySchedule,

    #[error("votesPerRound may have at most 64 rounds")]
    TooManyRounds,

    #[error("a round may run at most 9 votes")]
    TooManyVotes,

    #[error("bunkerSeats must be positive")]
    NoSeats,
}

impl Ruleset {
    /// Preset table for 4..=16 players. Counts outside the range are clamped.
    pub fn for_player_count(count: usize) -> Self {
        let count = count.clamp(MIN_PLAYERS, MAX_PLAYERS);
        let votes_per_round = match count {
            4 => vec![0, 0, 0, 1, 1],
            5 | 6 => vec![0, 0, 1, 1, 1],
            7 | 8 => vec![0, 1, 1, 1, 1],
            9 | 10 => vec![0, 1, 1, 1, 2],
            11 | 12 => vec![0, 1, 1, 2, 2],
            13 | 14 => vec![0, 1, 2, 2, 2],
            _ => vec![0, 2, 2, 2, 2],
        };
        let total_exiles = votes_per_round.iter().sum();
        Self {
            votes_per_round,
            bunker_seats: count / 2,
            total_exiles,
        }
    }

    pub fn validate(&self) -> Result<(), RulesetError> {
        if self.votes_per_round.is_empty() {
            return Err(RulesetError::EmptySchedule);
        }
        if self.votes_per_round.len() > MAX_ROUNDS {
            return Err(RulesetError::TooManyRounds);
        }
        if self.votes_per_round.iter().any(|v| *v > MAX_VOTES_PER_ROUND) {
            return Err(RulesetError::TooManyVotes);
        }
        if self.bunker_seats == 0 {
            return Err(RulesetError::NoSeats);
        }
        Ok(())
    }

    pub fn rounds(&self) -> u32 {
        self.votes_per_round.len() as u32
    }

    /// Vote budget of a 1-based round; zero past the schedule
    pub fn votes_in_round(&self, round: u32) -> u32 {
        round
            .checked_sub(1)
            .and_then(|i| self.votes_per_round.get(i as usize))
            .copied()
            .unwrap_or(0)
    }

    /// Exiles required by the end of a 1-based round
    pub fn cumulative_through(&self, round: u32) -> u32 {
        self.votes_per_round.iter().take(round as usize).sum()
    }

    /// Round implied by a cumulative exile count.
    ///
    /// Walks the schedule and returns the first round whose cumulative
    /// requirement is not yet met. Past the end this is `rounds() + 1`.
    pub fn round_from_eliminations(&self, exiles: u32) -> u32 {
        if exiles == 0 {
            return 1;
        }
        let mut required = 0;
        for (i, votes) in self.votes_per_round.iter().enumerate() {
            required += votes;
            if exiles < required {
                return i as u32 + 1;
            }
        }
        self.rounds() + 1
    }
}

/// Who may press "continue" during discussion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuePermission {
    HostOnly,
    #[default]
    RevealerOnly,
    Anyone,
}

/// What happens when a reveal turn runs out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealTimeoutAction {
    #[default]
    RandomCard,
    SkipPlayer,
}

/// When active special cards may be played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialUsage {
    #[default]
    Anytime,
    OnlyDuringVoting,
}

/// Who may reveal threat cards after the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalThreatReveal {
    #[default]
    Host,
    Anyone,
}

/// Host-adjustable session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameSettings {
    pub enable_reveal_discussion_timer: bool,
    pub reveal_discussion_seconds: u64,
    pub enable_pre_vote_discussion_timer: bool,
    pub pre_vote_discussion_seconds: u64,
    pub enable_post_vote_discussion_timer: bool,
    pub post_vote_discussion_seconds: u64,
    pub continue_permission: ContinuePermission,
    pub reveal_timeout_action: RevealTimeoutAction,
    pub special_usage: SpecialUsage,
    pub final_threat_reveal: FinalThreatReveal,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            enable_reveal_discussion_timer: false,
            reveal_discussion_seconds: 60,
            enable_pre_vote_discussion_timer: false,
            pre_vote_discussion_seconds: 60,
            enable_post_vote_discussion_timer: false,
            post_vote_discussion_seconds: 45,
            continue_permission: ContinuePermission::default(),
            reveal_timeout_action: RevealTimeoutAction::default(),
            special_usage: SpecialUsage::default(),
            final_threat_reveal: FinalThreatReveal::default(),
        }
    }
}
