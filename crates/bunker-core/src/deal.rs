//! Deal allocator.
//!
//! Keeps private copies of every hand deck and of the special-condition
//! pool. Draws sample without replacement; an empty pool yields a flagged
//! placeholder instead of an error.

use crate::catalog::{CardCatalog, CatalogCard, Deck, FactSlot};
use crate::player::CardInstance;
use crate::random::RandomSource;
use crate::specials::{SpecialDefinition, SpecialInstance};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

pub const MISSING_LABEL: &str = "No card";

/// Remaining cards and per-owner id counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealAllocator {
    pools: HashMap<Deck, Vec<CatalogCard>>,
    specials: Vec<SpecialDefinition>,
    counters: HashMap<String, u32>,
    special_counters: HashMap<String, u32>,
}

impl DealAllocator {
    /// Copy the hand decks out of the catalog. Only implemented specials
    /// enter the pool.
    pub fn new(catalog: &CardCatalog, specials: Vec<SpecialDefinition>) -> Self {
        let mut pools = HashMap::new();
        for deck in Deck::SINGLE_SLOT.into_iter().chain([Deck::Facts]) {
            pools.insert(deck, catalog.cards(deck).to_vec());
        }
        Self {
            pools,
            specials: specials.into_iter().filter(|d| d.implemented).collect(),
            counters: HashMap::new(),
            special_counters: HashMap::new(),
        }
    }

    pub fn remaining(&self, deck: Deck) -> usize {
        self.pools.get(&deck).map(Vec::len).unwrap_or(0)
    }

    pub fn remaining_specials(&self) -> usize {
        self.specials.len()
    }

    pub(crate) fn next_instance_id(&mut self, owner: &str) -> String {
        let n = self.counters.entry(owner.to_string()).or_insert(0);
        *n += 1;
        format!("{owner}-{n}")
    }

    /// Remove a random catalog card from a pool
    pub(crate) fn take(&mut self, deck: Deck, rng: &mut dyn RandomSource) -> Option<CatalogCard> {
        let pool = self.pools.get_mut(&deck)?;
        if pool.is_empty() {
            return None;
        }
        Some(pool.swap_remove(rng.pick_index(pool.len())))
    }

    /// Draw one card, or `None` when the deck is exhausted
    pub fn try_draw(
        &mut self,
        owner: &str,
        deck: Deck,
        slot: Option<FactSlot>,
        rng: &mut dyn RandomSource,
    ) -> Option<CardInstance> {
        let card = self.take(deck, rng)?;
        Some(CardInstance {
            instance_id: self.next_instance_id(owner),
            card_id: card.id,
            deck,
            slot,
            label: card.label,
            revealed: false,
            missing: false,
        })
    }

    /// Draw one card, falling back to a placeholder
    pub fn draw(
        &mut self,
        owner: &str,
        deck: Deck,
        slot: Option<FactSlot>,
        rng: &mut dyn RandomSource,
    ) -> CardInstance {
        if let Some(card) = self.try_draw(owner, deck, slot, rng) {
            return card;
        }
        warn!(deck = deck.as_str(), owner, "deck exhausted, dealing placeholder");
        CardInstance {
            instance_id: self.next_instance_id(owner),
            card_id: format!("missing-{}", deck.as_str()),
            deck,
            slot,
            label: MISSING_LABEL.to_string(),
            revealed: false,
            missing: true,
        }
    }

    /// A full starting hand: each single-slot deck, then both fact slots
    pub fn deal_hand(&mut self, owner: &str, rng: &mut dyn RandomSource) -> Vec<CardInstance> {
        let mut hand = Vec::with_capacity(7);
        for deck in Deck::SINGLE_SLOT {
            hand.push(self.draw(owner, deck, None, rng));
        }
        for slot in FactSlot::ALL {
            hand.push(self.draw(owner, Deck::Facts, Some(slot), rng));
        }
        hand
    }

    /// Draw one special condition. Each definition leaves the pool for good.
    pub fn deal_special(&mut self, owner: &str, rng: &mut dyn RandomSource) -> SpecialInstance {
        let n = self.special_counters.entry(owner.to_string()).or_insert(0);
        *n += 1;
        let instance_id = format!("special-{owner}-{n}");

        if self.specials.is_empty() {
            warn!(owner, "special pool exhausted, dealing placeholder");
            return SpecialInstance::new(instance_id, SpecialDefinition::missing());
        }
        let index = rng.pick_index(self.specials.len());
        SpecialInstance::new(instance_id, self.specials.swap_remove(index))
    }
}
