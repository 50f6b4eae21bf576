//! Player state and the alive-player ring.
//!
//! This module contains:
//! - `CardInstance`, one dealt card in a hand
//! - `PlayerState` with status, hand, specials and vote restrictions
//! - `PlayerTable`, join-ordered roster with neighbor and targeting lookups

use crate::catalog::{Category, CategoryKey, Deck, FactSlot};
use crate::specials::{SpecialInstance, TargetScope};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Player identifier as assigned by the host
pub type PlayerId = String;

/// Lowest and highest plausible age read from a biology card
const AGE_RANGE: std::ops::RangeInclusive<u32> = 1..=120;

/// Where a player stands in the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Alive,
    Eliminated,
    LeftBunker,
}

/// One card in a player's hand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInstance {
    /// Assigned at deal time, never reused
    pub instance_id: String,
    /// Catalog card id
    pub card_id: String,
    pub deck: Deck,
    /// Only set for the dual-slot facts deck
    pub slot: Option<FactSlot>,
    pub label: String,
    pub revealed: bool,
    /// Placeholder dealt from an exhausted pool
    pub missing: bool,
}

impl CardInstance {
    /// Public category this card occupies
    pub fn category(&self) -> Category {
        match (self.deck, self.slot) {
            (Deck::Profession, _) => Category::Profession,
            (Deck::Health, _) => Category::Health,
            (Deck::Hobby, _) => Category::Hobby,
            (Deck::Baggage, _) => Category::Baggage,
            (Deck::Facts, Some(FactSlot::Facts2)) => Category::Facts2,
            (Deck::Facts, _) => Category::Facts1,
            (Deck::Biology, _) => Category::Biology,
            // world decks never reach a hand
            (Deck::Disaster | Deck::Bunker | Deck::Threat, _) => Category::Special,
        }
    }
}

/// A seated player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: PlayerId,
    pub name: String,
    pub status: PlayerStatus,
    pub hand: Vec<CardInstance>,
    pub revealed_this_round: bool,
    pub special_conditions: Vec<SpecialInstance>,
    /// Players who may not vote against this player
    pub banned_against: BTreeSet<PlayerId>,
    /// Next vote this player casts is recorded as wasted
    pub forced_wasted_vote_next: bool,
}

impl PlayerState {
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: PlayerStatus::Alive,
            hand: Vec::new(),
            revealed_this_round: false,
            special_conditions: Vec::new(),
            banned_against: BTreeSet::new(),
            forced_wasted_vote_next: false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status == PlayerStatus::Alive
    }

    pub fn card(&self, instance_id: &str) -> Option<&CardInstance> {
        self.hand.iter().find(|c| c.instance_id == instance_id)
    }

    pub fn card_mut(&mut self, instance_id: &str) -> Option<&mut CardInstance> {
        self.hand.iter_mut().find(|c| c.instance_id == instance_id)
    }

    pub fn has_hidden_card(&self) -> bool {
        self.hand.iter().any(|c| !c.revealed)
    }

    pub fn has_hidden_in(&self, key: CategoryKey) -> bool {
        self.hand.iter().any(|c| !c.revealed && key.matches(c))
    }

    /// Revealed cards covered by the selector
    pub fn revealed_in(&self, key: CategoryKey) -> impl Iterator<Item = &CardInstance> {
        self.hand.iter().filter(move |c| c.revealed && key.matches(c))
    }

    pub fn has_revealed_in(&self, key: CategoryKey) -> bool {
        self.revealed_in(key).next().is_some()
    }

    pub fn has_baggage(&self) -> bool {
        self.hand
            .iter()
            .any(|c| c.deck == Deck::Baggage && !c.missing)
    }

    pub fn revealed_count(&self) -> usize {
        self.hand.iter().filter(|c| c.revealed).count()
    }

    pub fn special(&self, instance_id: &str) -> Option<&SpecialInstance> {
        self.special_conditions
            .iter()
            .find(|s| s.instance_id == instance_id)
    }

    pub fn special_mut(&mut self, instance_id: &str) -> Option<&mut SpecialInstance> {
        self.special_conditions
            .iter_mut()
            .find(|s| s.instance_id == instance_id)
    }

    /// Age from the revealed biology card, if any
    pub fn revealed_age(&self) -> Option<u32> {
        self.revealed_in(CategoryKey::Biology)
            .find_map(|c| parse_age(&c.label))
    }
}

/// First run of up to three digits in a label, if it is a plausible age
pub fn parse_age(label: &str) -> Option<u32> {
    let digits: String = label
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() || digits.len() > 3 {
        return None;
    }
    let age = digits.parse().ok()?;
    AGE_RANGE.contains(&age).then_some(age)
}

/// All seated players, kept in join order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerTable {
    order: Vec<PlayerId>,
    players: HashMap<PlayerId, PlayerState>,
}

impl PlayerTable {
    pub fn new(players: Vec<PlayerState>) -> Self {
        let mut table = Self::default();
        for player in players {
            if table.players.contains_key(&player.id) {
                continue;
            }
            table.order.push(player.id.clone());
            table.players.insert(player.id.clone(), player);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PlayerState> {
        self.players.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.players.contains_key(id)
    }

    /// Join order
    pub fn order(&self) -> &[PlayerId] {
        &self.order
    }

    /// Players in join order
    pub fn iter(&self) -> impl Iterator<Item = &PlayerState> {
        self.order.iter().filter_map(|id| self.players.get(id))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerState> {
        self.players.values_mut()
    }

    pub fn alive(&self) -> impl Iterator<Item = &PlayerState> {
        self.iter().filter(|p| p.is_alive())
    }

    pub fn alive_ids(&self) -> Vec<PlayerId> {
        self.alive().map(|p| p.id.clone()).collect()
    }

    pub fn alive_count(&self) -> usize {
        self.alive().count()
    }

    pub fn is_alive(&self, id: &str) -> bool {
        self.get(id).map(PlayerState::is_alive).unwrap_or(false)
    }

    pub fn first_alive(&self) -> Option<PlayerId> {
        self.alive().next().map(|p| p.id.clone())
    }

    /// Next alive player after `from` (wrapping) who has not revealed this
    /// round. Falls back to the first alive player in join order.
    pub fn next_unrevealed_alive_after(&self, from: Option<&str>) -> Option<PlayerId> {
        let len = self.order.len();
        if len == 0 {
            return None;
        }
        let start = from
            .and_then(|id| self.order.iter().position(|o| o == id))
            .map(|i| i + 1)
            .unwrap_or(0);
        (0..len)
            .map(|step| &self.order[(start + step) % len])
            .filter_map(|id| self.players.get(id))
            .find(|p| p.is_alive() && !p.revealed_this_round)
            .map(|p| p.id.clone())
            .or_else(|| self.first_alive())
    }

    /// Nearest ring members on either side of `actor`.
    ///
    /// The ring is the alive players, plus `include` when given (used when
    /// resolving around a player who was just eliminated). Returns
    /// `(left, right)`; both are `None` when the actor is alone.
    pub fn neighbors(&self, actor: &str, include: Option<&str>) -> (Option<PlayerId>, Option<PlayerId>) {
        let ring: Vec<&PlayerId> = self
            .order
            .iter()
            .filter(|id| {
                id.as_str() == actor || Some(id.as_str()) == include || self.is_alive(id)
            })
            .collect();
        let Some(index) = ring.iter().position(|id| id.as_str() == actor) else {
            return (None, None);
        };
        if ring.len() < 2 {
            return (None, None);
        }
        let left = ring[(index + ring.len() - 1) % ring.len()].clone();
        let right = ring[(index + 1) % ring.len()].clone();
        (Some(left), Some(right))
    }

    /// Players a card with the given scope may be aimed at
    pub fn target_candidates(&self, scope: TargetScope, actor: &str) -> Vec<PlayerId> {
        match scope {
            TargetScope::Neighbors => {
                let (left, right) = self.neighbors(actor, None);
                let mut out = Vec::new();
                for id in [left, right].into_iter().flatten() {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
                out
            }
            TargetScope::AnyAlive => self
                .alive()
                .filter(|p| p.id != actor)
                .map(|p| p.id.clone())
                .collect(),
            TargetScope::SelfOnly => vec![actor.to_string()],
            TargetScope::AnyIncludingSelf => self.alive_ids(),
        }
    }
}
