//! Voting resolution.
//!
//! A vote opens with every alive player as voter and candidate. Once all
//! records are in, the votes are frozen and a special-condition window
//! opens; effects applied there act on the frozen snapshot. A first tie
//! triggers a revote between the leaders, a second tie is settled at random.

use crate::actions::EventKind;
use crate::game::{GameError, GamePhase, GameSession};
use crate::player::{PlayerId, PlayerTable};
use crate::timer::{TimerKind, RESOLUTION_DELAY};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info};

pub(crate) const REASON_BLOCKED: &str = "Vote blocked.";
pub(crate) const REASON_WASTED: &str = "Vote wasted.";
const REASON_NO_TARGET: &str = "No candidate left to vote for.";
const REASON_REVOTE: &str = "Candidate excluded from this revote.";
const REASON_UNAVAILABLE: &str = "Candidate unavailable.";
const REASON_BANNED: &str = "Voting against this player is banned.";

/// Sub-phase of the voting phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotePhase {
    /// Collecting votes
    #[serde(rename = "voting")]
    Voting,
    /// All votes in, specials may still change the outcome
    #[serde(rename = "voteSpecialWindow")]
    SpecialWindow,
    /// Outcome applied, waiting for the auto-advance
    #[serde(rename = "voteResolve")]
    Resolve,
}

/// One submitted (or forced) vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub target: Option<PlayerId>,
    pub valid: bool,
    pub reason: Option<String>,
    pub submitted_at_ms: u64,
}

/// How a vote counts after every modifier is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    Voted,
    Invalid,
    NotVoted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveVote {
    pub voter: PlayerId,
    pub target: Option<PlayerId>,
    pub status: VoteStatus,
    pub reason: Option<String>,
    pub weight: u32,
    pub submitted_at_ms: Option<u64>,
}

/// Weighted totals per candidate and the leading candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub totals: Vec<(PlayerId, u32)>,
    pub leaders: Vec<PlayerId>,
}

/// State of the vote in progress. Exists only during voting and resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingState {
    pub votes: HashMap<PlayerId, VoteRecord>,
    /// Snapshot taken when the special window opens
    pub base_votes: Option<HashMap<PlayerId, VoteRecord>>,
    /// Eligible targets, in join order
    pub candidates: Vec<PlayerId>,
    pub vote_weights: HashMap<PlayerId, u32>,
    pub disabled_voters: BTreeSet<PlayerId>,
    /// Voters whose vote is re-marked as wasted on every revote
    pub auto_wasted_voters: BTreeSet<PlayerId>,
    pub double_against_target: Option<PlayerId>,
    pub revote_disallow_targets: BTreeSet<PlayerId>,
    pub tie_break_used: bool,
}

fn invalidate(status: &mut VoteStatus, reason: &mut Option<String>, why: &str) {
    *status = VoteStatus::Invalid;
    reason.get_or_insert_with(|| why.to_string());
}

impl VotingState {
    pub fn open(candidates: Vec<PlayerId>) -> Self {
        Self {
            candidates,
            ..Self::default()
        }
    }

    pub fn is_candidate(&self, id: &str) -> bool {
        self.candidates.iter().any(|c| c == id)
    }

    /// Record a wasted vote and keep it wasted through revotes
    pub fn mark_wasted(&mut self, voter: &str, reason: &str, now_ms: u64) {
        self.auto_wasted_voters.insert(voter.to_string());
        self.disabled_voters.insert(voter.to_string());
        self.votes.insert(
            voter.to_string(),
            VoteRecord {
                target: None,
                valid: false,
                reason: Some(reason.to_string()),
                submitted_at_ms: now_ms,
            },
        );
    }

    /// Clear submitted votes for another round of voting
    pub fn reset_for_revote(&mut self, now_ms: u64) {
        self.votes.clear();
        self.base_votes = None;
        let wasted: Vec<PlayerId> = self.auto_wasted_voters.iter().cloned().collect();
        for voter in wasted {
            self.mark_wasted(&voter, REASON_WASTED, now_ms);
        }
    }

    /// Restrict the vote to the tied leaders
    pub fn start_tie_break(&mut self, leaders: Vec<PlayerId>, now_ms: u64) {
        self.tie_break_used = true;
        self.candidates = leaders;
        self.revote_disallow_targets.clear();
        self.reset_for_revote(now_ms);
    }

    pub fn freeze(&mut self) {
        self.base_votes = Some(self.votes.clone());
    }

    /// Forget a player who left mid-vote
    pub fn remove_player(&mut self, id: &str) {
        self.candidates.retain(|c| c != id);
        self.votes.remove(id);
        if let Some(base) = self.base_votes.as_mut() {
            base.remove(id);
        }
        self.vote_weights.remove(id);
        self.disabled_voters.remove(id);
        self.auto_wasted_voters.remove(id);
        self.revote_disallow_targets.remove(id);
        if self.double_against_target.as_deref() == Some(id) {
            self.double_against_target = None;
        }
    }

    /// The records a tally should read: the frozen snapshot once it exists
    pub fn source(&self, phase: Option<VotePhase>) -> &HashMap<PlayerId, VoteRecord> {
        match phase {
            Some(VotePhase::SpecialWindow) | Some(VotePhase::Resolve) => {
                self.base_votes.as_ref().unwrap_or(&self.votes)
            }
            _ => &self.votes,
        }
    }

    /// Apply weights, bans, disabled voters and candidate rules to every
    /// player's record. Output follows join order.
    pub fn effective_votes(&self, players: &PlayerTable, phase: Option<VotePhase>) -> Vec<EffectiveVote> {
        let source = self.source(phase);
        players
            .iter()
            .map(|player| {
                let not_voted = EffectiveVote {
                    voter: player.id.clone(),
                    target: None,
                    status: VoteStatus::NotVoted,
                    reason: None,
                    weight: 0,
                    submitted_at_ms: None,
                };
                if !player.is_alive() {
                    return not_voted;
                }
                let Some(record) = source.get(&player.id) else {
                    return not_voted;
                };

                let mut status = if record.valid {
                    VoteStatus::Voted
                } else {
                    VoteStatus::Invalid
                };
                if record.target.is_none() && record.valid {
                    status = VoteStatus::NotVoted;
                }
                let mut reason = record.reason.clone();

                if self.disabled_voters.contains(&player.id) {
                    invalidate(&mut status, &mut reason, REASON_BLOCKED);
                }
                if let Some(target) = record.target.as_deref() {
                    if self.revote_disallow_targets.contains(target) {
                        invalidate(&mut status, &mut reason, REASON_REVOTE);
                    }
                    if !self.is_candidate(target) {
                        invalidate(&mut status, &mut reason, REASON_UNAVAILABLE);
                    }
                    let banned = players
                        .get(target)
                        .map(|t| t.banned_against.contains(&player.id))
                        .unwrap_or(false);
                    if banned {
                        invalidate(&mut status, &mut reason, REASON_BANNED);
                    }
                }

                let counted = status == VoteStatus::Voted && record.target.is_some();
                let mut weight = 0;
                if counted {
                    weight = self.vote_weights.get(&player.id).copied().unwrap_or(1);
                    if record.target == self.double_against_target {
                        weight *= 2;
                    }
                }
                EffectiveVote {
                    voter: player.id.clone(),
                    target: if counted { record.target.clone() } else { None },
                    status,
                    reason,
                    weight,
                    submitted_at_ms: Some(record.submitted_at_ms),
                }
            })
            .collect()
    }

    /// Weighted totals over the candidates. When nobody has a counted vote
    /// every candidate is a leader.
    pub fn tally(&self, players: &PlayerTable, phase: Option<VotePhase>) -> Tally {
        let mut totals: Vec<(PlayerId, u32)> = self.candidates.iter().map(|c| (c.clone(), 0)).collect();
        for vote in self.effective_votes(players, phase) {
            if vote.status != VoteStatus::Voted {
                continue;
            }
            let Some(target) = vote.target else { continue };
            if let Some(entry) = totals.iter_mut().find(|(c, _)| *c == target) {
                entry.1 += vote.weight;
            }
        }

        let mut best = 0;
        let mut leaders: Vec<PlayerId> = Vec::new();
        for (candidate, total) in &totals {
            if *total > best {
                best = *total;
                leaders = vec![candidate.clone()];
            } else if *total == best {
                leaders.push(candidate.clone());
            }
        }
        if leaders.is_empty() {
            leaders = self.candidates.clone();
        }
        Tally { totals, leaders }
    }
}

impl GameSession {
    /// Open a vote, or move to the next round if the budget is spent
    pub(crate) fn start_voting(&mut self) {
        if self.votes_remaining_in_round == 0 {
            self.start_next_reveal();
            return;
        }
        self.clear_timer();
        let now = self.now_ms();
        let mut voting = VotingState::open(self.players.alive_ids());
        self.round_rules.no_talk_until_voting = false;
        self.current_turn = None;
        self.last_revealer = None;

        for player in self.players.iter_mut() {
            if player.is_alive() && player.forced_wasted_vote_next {
                player.forced_wasted_vote_next = false;
                voting.mark_wasted(&player.id, REASON_WASTED, now);
            }
        }

        self.voting = Some(voting);
        self.phase = GamePhase::Voting;
        self.vote_phase = Some(VotePhase::Voting);
        debug!(round = self.round, "voting opened");
        self.emit(EventKind::VotingStart, format!("Voting has started (round {}).", self.round));
        self.set_stage("Voting");
        self.settle_stuck_voters();
    }

    /// Record a wasted vote for anyone who has no legal target left, then
    /// open the special window if nobody is still to vote
    pub(crate) fn settle_stuck_voters(&mut self) {
        let now = self.now_ms();
        let alive = self.players.alive_ids();
        let Some(voting) = self.voting.as_mut() else {
            return;
        };
        for voter in &alive {
            if voting.votes.contains_key(voter) {
                continue;
            }
            let has_target = voting.candidates.iter().any(|c| {
                c != voter
                    && self.players.is_alive(c)
                    && !voting.revote_disallow_targets.contains(c)
                    && !self
                        .players
                        .get(c)
                        .map(|t| t.banned_against.contains(voter))
                        .unwrap_or(false)
            });
            if voting.disabled_voters.contains(voter) {
                voting.mark_wasted(voter, REASON_BLOCKED, now);
            } else if !has_target {
                voting.votes.insert(
                    voter.clone(),
                    VoteRecord {
                        target: None,
                        valid: false,
                        reason: Some(REASON_NO_TARGET.to_string()),
                        submitted_at_ms: now,
                    },
                );
            }
        }
        let everyone_voted = alive.iter().all(|id| voting.votes.contains_key(id));
        if everyone_voted && self.vote_phase == Some(VotePhase::Voting) {
            self.enter_vote_special_window();
        }
    }

    pub(crate) fn vote(&mut self, voter: &str, target: &str) -> Result<bool, GameError> {
        if self.phase != GamePhase::Voting {
            return Err(GameError::NoVoting);
        }
        let Some(voting) = self.voting.as_ref() else {
            return Err(GameError::NoVoting);
        };
        if self.vote_phase != Some(VotePhase::Voting) {
            return Err(GameError::VotingClosed);
        }
        if voter == target {
            return Err(GameError::SelfVote);
        }
        if !voting.is_candidate(target) {
            return Err(GameError::InvalidCandidate);
        }
        if voting.votes.contains_key(voter) {
            return Err(GameError::AlreadyVoted);
        }
        if voting.revote_disallow_targets.contains(target) {
            return Err(GameError::RevoteDisallowed);
        }
        let Some(target_player) = self.players.get(target).filter(|p| p.is_alive()) else {
            return Err(GameError::TargetNotAlive);
        };
        if target_player.banned_against.contains(voter) {
            return Err(GameError::VoteBanned);
        }
        if voting.disabled_voters.contains(voter) {
            return Err(GameError::VoteDisabled);
        }

        let now = self.now_ms();
        let alive = self.players.alive_ids();
        let Some(voting) = self.voting.as_mut() else {
            return Err(GameError::NoVoting);
        };
        voting.votes.insert(
            voter.to_string(),
            VoteRecord {
                target: Some(target.to_string()),
                valid: true,
                reason: None,
                submitted_at_ms: now,
            },
        );
        if alive.iter().all(|id| voting.votes.contains_key(id)) {
            self.enter_vote_special_window();
        }
        Ok(true)
    }

    /// Freeze the votes and give specials a chance to act
    pub(crate) fn enter_vote_special_window(&mut self) {
        let Some(voting) = self.voting.as_mut() else {
            return;
        };
        voting.freeze();
        self.vote_phase = Some(VotePhase::SpecialWindow);
        self.clear_timer();
        self.emit(EventKind::Info, "All votes are in. Special conditions may be played now.");
        self.set_stage("Special conditions window");
        if self.settings.enable_post_vote_discussion_timer {
            let delay = Duration::from_secs(self.settings.post_vote_discussion_seconds);
            self.schedule_timer(TimerKind::PostVote, delay);
        }
    }

    pub(crate) fn finalize_voting(&mut self, _actor: &str) -> Result<bool, GameError> {
        if self.phase != GamePhase::Voting || self.voting.is_none() {
            return Err(GameError::NoVoting);
        }
        if self.vote_phase != Some(VotePhase::SpecialWindow) {
            return Err(GameError::SpecialWindowNotOpen);
        }
        Ok(self.finalize_resolution())
    }

    /// Tally the frozen votes and either start a tie-break or exile the leader
    pub(crate) fn finalize_resolution(&mut self) -> bool {
        self.clear_timer();
        let now = self.now_ms();
        let Some(voting) = self.voting.as_ref() else {
            return false;
        };
        let tally = voting.tally(&self.players, self.vote_phase);
        let source = voting.source(self.vote_phase).clone();

        if tally.leaders.len() > 1 && !voting.tie_break_used {
            let names = self.names(&tally.leaders);
            if let Some(voting) = self.voting.as_mut() {
                voting.start_tie_break(tally.leaders, now);
            }
            self.vote_phase = Some(VotePhase::Voting);
            debug!(round = self.round, "tie, starting revote");
            self.emit(EventKind::Info, format!("Tie between {names}. Revote between the leaders."));
            self.set_stage("Revote");
            self.settle_stuck_voters();
            return true;
        }

        if tally.leaders.is_empty() {
            self.skip_voting_after_out_of_band("nobody");
            return true;
        }
        let index = self.rng.pick_index(tally.leaders.len());
        let exiled = tally.leaders[index].clone();
        self.apply_elimination(&exiled);

        self.phase = GamePhase::Resolution;
        self.vote_phase = Some(VotePhase::Resolve);
        if let Some(voting) = self.voting.as_mut() {
            voting.base_votes = Some(source);
        }
        let name = self.player_name(&exiled);
        info!(round = self.round, player = %exiled, "vote resolved");
        self.emit(EventKind::Elimination, format!("Vote result: {name} is exiled."));
        self.set_stage("Vote result");

        if !self.check_end_condition(false) {
            self.schedule_timer(TimerKind::Resolution, RESOLUTION_DELAY);
        }
        true
    }

    /// Leave the resolution screen: vote again or start the next round
    pub(crate) fn advance_after_resolution(&mut self) {
        self.clear_timer();
        if self.check_end_condition(false) {
            return;
        }
        self.last_eliminated = None;
        self.resolution_note = None;
        if self.votes_remaining_in_round > 0 {
            self.start_voting();
            return;
        }
        self.voting = None;
        self.start_next_reveal();
    }

    /// Drop a departed player from the vote in progress
    pub(crate) fn remove_from_voting(&mut self, id: &str) {
        let Some(voting) = self.voting.as_mut() else {
            return;
        };
        voting.remove_player(id);
        if self.vote_phase == Some(VotePhase::Voting) {
            self.settle_stuck_voters();
        }
    }

    /// A player left while votes were being collected. The vote is skipped
    /// and the removal counts as its exile.
    pub(crate) fn skip_voting_after_out_of_band(&mut self, name: &str) {
        if self.phase != GamePhase::Voting {
            return;
        }
        self.clear_timer();
        self.voting = None;
        self.phase = GamePhase::Resolution;
        self.vote_phase = Some(VotePhase::Resolve);
        let note = format!("Vote skipped: {name} is already out of the game.");
        self.resolution_note = Some(note.clone());
        self.emit(EventKind::Info, note);
        if !self.check_end_condition(false) {
            self.schedule_timer(TimerKind::Resolution, RESOLUTION_DELAY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerState;
    use pretty_assertions::assert_eq;

    fn table() -> PlayerTable {
        PlayerTable::new(
            ["a", "b", "c", "d"]
                .iter()
                .map(|id| PlayerState::new(*id, id.to_uppercase()))
                .collect(),
        )
    }

    fn ballot(voting: &mut VotingState, voter: &str, target: &str) {
        voting.votes.insert(
            voter.into(),
            VoteRecord {
                target: Some(target.into()),
                valid: true,
                reason: None,
                submitted_at_ms: 0,
            },
        );
    }

    fn open(players: &PlayerTable) -> VotingState {
        VotingState::open(players.alive_ids())
    }

    #[test]
    fn test_plain_majority() {
        let players = table();
        let mut voting = open(&players);
        ballot(&mut voting, "a", "d");
        ballot(&mut voting, "b", "d");
        ballot(&mut voting, "c", "d");
        ballot(&mut voting, "d", "a");

        let tally = voting.tally(&players, Some(VotePhase::Voting));
        assert_eq!(tally.leaders, vec!["d".to_string()]);
        assert_eq!(tally.totals[3], ("d".to_string(), 3));
    }

    #[test]
    fn test_tie_lists_all_leaders() {
        let players = table();
        let mut voting = open(&players);
        ballot(&mut voting, "a", "c");
        ballot(&mut voting, "b", "d");
        ballot(&mut voting, "c", "d");
        ballot(&mut voting, "d", "c");

        let tally = voting.tally(&players, None);
        assert_eq!(tally.leaders, vec!["c".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_no_votes_makes_everyone_a_leader() {
        let players = table();
        let voting = open(&players);
        let tally = voting.tally(&players, None);
        assert_eq!(tally.leaders.len(), 4);
    }

    #[test]
    fn test_weight_and_double_against() {
        let players = table();
        let mut voting = open(&players);
        ballot(&mut voting, "a", "c");
        ballot(&mut voting, "b", "d");
        ballot(&mut voting, "c", "d");
        ballot(&mut voting, "d", "c");
        voting.vote_weights.insert("a".into(), 2);
        voting.double_against_target = Some("c".into());

        let tally = voting.tally(&players, None);
        // a: 2 * 2, d: 1 * 2 against c; b and c: 1 each against d
        assert_eq!(tally.totals[2], ("c".to_string(), 6));
        assert_eq!(tally.totals[3], ("d".to_string(), 2));
        assert_eq!(tally.leaders, vec!["c".to_string()]);
    }

    #[test]
    fn test_banned_vote_never_counts() {
        let mut players = table();
        players.get_mut("d").unwrap().banned_against.insert("a".into());
        let mut voting = open(&players);
        ballot(&mut voting, "a", "d");
        voting.vote_weights.insert("a".into(), 2);
        voting.double_against_target = Some("d".into());

        let effective = voting.effective_votes(&players, None);
        assert_eq!(effective[0].status, VoteStatus::Invalid);
        assert_eq!(effective[0].weight, 0);
        assert_eq!(effective[0].reason.as_deref(), Some(REASON_BANNED));
        assert_eq!(voting.tally(&players, None).totals[3].1, 0);
    }

    #[test]
    fn test_disabled_voter_is_invalid() {
        let players = table();
        let mut voting = open(&players);
        ballot(&mut voting, "b", "c");
        voting.disabled_voters.insert("b".into());
        let effective = voting.effective_votes(&players, None);
        assert_eq!(effective[1].status, VoteStatus::Invalid);
        assert_eq!(effective[1].target, None);
    }

    #[test]
    fn test_frozen_snapshot_is_used_in_window() {
        let players = table();
        let mut voting = open(&players);
        ballot(&mut voting, "a", "b");
        voting.freeze();
        voting.votes.clear();

        let in_window = voting.tally(&players, Some(VotePhase::SpecialWindow));
        assert_eq!(in_window.leaders, vec!["b".to_string()]);
        let collecting = voting.tally(&players, Some(VotePhase::Voting));
        assert_eq!(collecting.leaders.len(), 4);
    }

    #[test]
    fn test_revote_keeps_wasted_voters_wasted() {
        let players = table();
        let mut voting = open(&players);
        voting.mark_wasted("a", REASON_WASTED, 0);
        ballot(&mut voting, "b", "c");

        voting.start_tie_break(vec!["c".into(), "d".into()], 10);
        assert!(voting.tie_break_used);
        assert_eq!(voting.candidates, vec!["c".to_string(), "d".to_string()]);
        assert_eq!(voting.votes.len(), 1);
        assert!(!voting.votes["a"].valid);
    }

    #[test]
    fn test_remove_player_clears_references() {
        let players = table();
        let mut voting = open(&players);
        ballot(&mut voting, "a", "b");
        voting.double_against_target = Some("b".into());
        voting.remove_player("b");
        assert!(!voting.is_candidate("b"));
        assert_eq!(voting.double_against_target, None);
    }
}
