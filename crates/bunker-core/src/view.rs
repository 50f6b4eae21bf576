//! Per-player projection of a session.
//!
//! Views are built from scratch on every call and never touch session
//! state. Hidden cards of other players, hidden world cards and unused
//! specials of other players never appear in a view.

use crate::catalog::Category;
use crate::game::{GamePhase, GameSession, PostGame, RoundRules, WorldEvent};
use crate::player::{CardInstance, PlayerId, PlayerState, PlayerStatus};
use crate::ruleset::Ruleset;
use crate::specials::{ChoiceKind, SpecialInstance, TargetScope, Trigger};
use crate::timer::ActiveTimer;
use crate::voting::{VotePhase, VoteStatus};
use crate::world::{ThreatModifier, WorldState};
use serde::Serialize;

/// Cards a player may reveal per round
pub const REVEAL_LIMIT: u32 = 1;

/// Everything one client needs to render the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub phase: GamePhase,
    pub round: u32,
    pub category_order: Vec<Category>,
    pub last_stage_text: Option<String>,
    pub ruleset: Ruleset,
    pub world: WorldState,
    pub world_event: Option<WorldEvent>,
    pub post_game: Option<PostGame>,
    pub final_threats: Vec<String>,
    pub you: YouView,
    pub public: PublicView,
}

/// The viewer's own seat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YouView {
    pub player_id: PlayerId,
    pub name: String,
    pub hand: Vec<CardInstance>,
    pub categories: Vec<CategoryCards>,
    pub special_conditions: Vec<SpecialView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCards {
    pub category: Category,
    pub cards: Vec<CardInstance>,
}

/// A special card as its owner sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialView {
    pub instance_id: String,
    pub id: String,
    pub title: String,
    pub text: String,
    pub trigger: Trigger,
    pub effect: &'static str,
    pub implemented: bool,
    pub used: bool,
    pub revealed_public: bool,
    pub needs_choice: bool,
    pub choice_kind: ChoiceKind,
    pub allow_self_target: bool,
    pub target_scope: Option<TargetScope>,
}

impl From<&SpecialInstance> for SpecialView {
    fn from(special: &SpecialInstance) -> Self {
        let definition = &special.definition;
        Self {
            instance_id: special.instance_id.clone(),
            id: definition.id.clone(),
            title: definition.title.clone(),
            text: definition.text.clone(),
            trigger: definition.trigger,
            effect: definition.effect.kind(),
            implemented: definition.implemented,
            used: special.used,
            revealed_public: special.revealed_public,
            needs_choice: definition.choice_kind != ChoiceKind::None,
            choice_kind: definition.choice_kind,
            allow_self_target: definition.allows_self_target(),
            target_scope: definition.target_scope,
        }
    }
}

/// Revealed values of one category, as everyone sees them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicCategory {
    pub category: Category,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPlayer {
    pub player_id: PlayerId,
    pub name: String,
    pub status: PlayerStatus,
    pub left_bunker: bool,
    pub revealed_cards: Vec<CardInstance>,
    pub revealed_count: usize,
    pub total_cards: usize,
    pub special_revealed: bool,
    pub categories: Vec<PublicCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingSummary {
    pub has_voted: bool,
}

/// One voter's record as shown to the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicVote {
    pub voter_id: PlayerId,
    pub status: VoteStatus,
    /// Only shown once the votes are frozen
    pub target_id: Option<PlayerId>,
    pub reason: Option<String>,
    pub submitted_at_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingProgress {
    pub voted: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicView {
    pub players: Vec<PublicPlayer>,
    pub revealed_this_round: Vec<PlayerId>,
    pub reveal_limit: u32,
    pub voting: Option<VotingSummary>,
    pub vote_phase: Option<VotePhase>,
    pub votes_public: Vec<PublicVote>,
    pub voting_progress: Option<VotingProgress>,
    pub threat_modifier: ThreatModifier,
    pub can_open_voting_modal: bool,
    pub can_continue: bool,
    pub current_turn_player_id: Option<PlayerId>,
    pub round_revealed_count: usize,
    pub round_total_alive: usize,
    pub votes_remaining_in_round: u32,
    pub votes_total_this_round: u32,
    pub active_timer: Option<ActiveTimer>,
    pub vote_modal_open: bool,
    pub last_eliminated: Option<PlayerId>,
    pub winners: Vec<PlayerId>,
    pub resolution_note: Option<String>,
    pub round_rules: RoundRules,
}

fn public_categories(player: &PlayerState) -> Vec<PublicCategory> {
    Category::ORDER
        .iter()
        .map(|category| {
            let values = match category.key() {
                Some(key) => player.revealed_in(key).map(|c| c.label.clone()).collect(),
                None => player
                    .special_conditions
                    .iter()
                    .filter(|s| s.revealed_public)
                    .map(|s| s.definition.title.clone())
                    .collect(),
            };
            PublicCategory {
                category: *category,
                values,
            }
        })
        .collect()
}

fn public_player(player: &PlayerState) -> PublicPlayer {
    let revealed_cards: Vec<CardInstance> = player.hand.iter().filter(|c| c.revealed).cloned().collect();
    PublicPlayer {
        player_id: player.id.clone(),
        name: player.name.clone(),
        status: player.status,
        left_bunker: player.status == PlayerStatus::LeftBunker,
        revealed_count: revealed_cards.len(),
        revealed_cards,
        total_cards: player.hand.len(),
        special_revealed: player.special_conditions.iter().any(|s| s.revealed_public),
        categories: public_categories(player),
    }
}

fn own_categories(player: &PlayerState) -> Vec<CategoryCards> {
    Category::ORDER
        .iter()
        .filter_map(|category| {
            let key = category.key()?;
            Some(CategoryCards {
                category: *category,
                cards: player.hand.iter().filter(|c| key.matches(c)).cloned().collect(),
            })
        })
        .collect()
}

impl GameSession {
    /// Build the view for one player. Unknown ids get an observer view.
    pub fn get_game_view(&self, player_id: &str) -> GameView {
        let you = match self.players.get(player_id) {
            Some(player) => YouView {
                player_id: player.id.clone(),
                name: player.name.clone(),
                hand: player.hand.clone(),
                categories: own_categories(player),
                special_conditions: player.special_conditions.iter().map(SpecialView::from).collect(),
            },
            None => YouView {
                player_id: player_id.to_string(),
                name: "Unknown".to_string(),
                hand: Vec::new(),
                categories: Vec::new(),
                special_conditions: Vec::new(),
            },
        };

        GameView {
            phase: self.phase,
            round: self.round,
            category_order: Category::ORDER.to_vec(),
            last_stage_text: self.last_stage_text.clone(),
            ruleset: self.ruleset.clone(),
            world: self.world.redacted(),
            world_event: self.world_event.clone(),
            post_game: self.post_game.clone(),
            final_threats: self.final_threats.clone(),
            you,
            public: self.public_view(player_id),
        }
    }

    fn public_view(&self, viewer: &str) -> PublicView {
        let frozen = matches!(self.vote_phase, Some(VotePhase::SpecialWindow | VotePhase::Resolve));
        let votes_public = self
            .voting
            .as_ref()
            .map(|voting| {
                voting
                    .effective_votes(&self.players, self.vote_phase)
                    .into_iter()
                    .filter(|vote| self.players.is_alive(&vote.voter))
                    .map(|vote| PublicVote {
                        voter_id: vote.voter,
                        status: vote.status,
                        target_id: if frozen { vote.target } else { None },
                        reason: vote.reason,
                        submitted_at_ms: vote.submitted_at_ms,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let alive = self.players.alive_count();
        let voting = self.voting.as_ref().map(|v| VotingSummary {
            has_voted: v.votes.contains_key(viewer),
        });
        let voting_progress = self.voting.as_ref().map(|v| VotingProgress {
            voted: v.source(self.vote_phase).len(),
            total: alive,
        });
        let revealed_this_round: Vec<PlayerId> = self
            .players
            .alive()
            .filter(|p| p.revealed_this_round)
            .map(|p| p.id.clone())
            .collect();

        PublicView {
            players: self.players.iter().map(public_player).collect(),
            round_revealed_count: revealed_this_round.len(),
            revealed_this_round,
            reveal_limit: REVEAL_LIMIT,
            voting,
            vote_phase: self.vote_phase,
            votes_public,
            voting_progress,
            threat_modifier: self.world.threat_modifier(),
            can_open_voting_modal: self.voting.is_some(),
            can_continue: self.players.contains(viewer) && self.can_continue(viewer),
            current_turn_player_id: self.current_turn.clone(),
            round_total_alive: alive,
            votes_remaining_in_round: self.votes_remaining_in_round,
            votes_total_this_round: self.ruleset.votes_in_round(self.round),
            active_timer: self.active_timer,
            vote_modal_open: matches!(self.phase, GamePhase::Voting | GamePhase::Resolution),
            last_eliminated: self.last_eliminated.clone(),
            winners: self.winners.clone(),
            resolution_note: self.resolution_note.clone(),
            round_rules: self.round_rules.clone(),
        }
    }
}
