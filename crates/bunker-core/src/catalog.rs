//! Read-only card catalog supplied by the host environment.
//!
//! The engine never loads assets. The host hands over a map of
//! `deck -> cards` once at session creation and the engine only draws
//! from private copies of those pools.

use crate::player::CardInstance;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Every deck the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Deck {
    Profession,
    Health,
    Hobby,
    Baggage,
    Facts,
    Biology,
    Disaster,
    Bunker,
    Threat,
}

impl Deck {
    /// Single-slot decks dealt into every hand, in deal order
    pub const SINGLE_SLOT: [Deck; 5] = [
        Deck::Profession,
        Deck::Health,
        Deck::Hobby,
        Deck::Baggage,
        Deck::Biology,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Deck::Profession => "profession",
            Deck::Health => "health",
            Deck::Hobby => "hobby",
            Deck::Baggage => "baggage",
            Deck::Facts => "facts",
            Deck::Biology => "biology",
            Deck::Disaster => "disaster",
            Deck::Bunker => "bunker",
            Deck::Threat => "threat",
        }
    }

    /// World decks never end up in a player's hand
    pub fn is_world(&self) -> bool {
        matches!(self, Deck::Disaster | Deck::Bunker | Deck::Threat)
    }
}

/// The two slots of the dual-slot facts deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FactSlot {
    Facts1,
    Facts2,
}

impl FactSlot {
    pub const ALL: [FactSlot; 2] = [FactSlot::Facts1, FactSlot::Facts2];
}

/// Public category of a hand slot, in the order players see them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Profession,
    Health,
    Hobby,
    Baggage,
    Facts1,
    Facts2,
    Biology,
    Special,
}

impl Category {
    pub const ORDER: [Category; 8] = [
        Category::Profession,
        Category::Health,
        Category::Hobby,
        Category::Baggage,
        Category::Facts1,
        Category::Facts2,
        Category::Biology,
        Category::Special,
    ];

    /// Category selector matching exactly this slot, `None` for specials
    pub fn key(&self) -> Option<CategoryKey> {
        match self {
            Category::Profession => Some(CategoryKey::Profession),
            Category::Health => Some(CategoryKey::Health),
            Category::Hobby => Some(CategoryKey::Hobby),
            Category::Baggage => Some(CategoryKey::Baggage),
            Category::Facts1 => Some(CategoryKey::Facts1),
            Category::Facts2 => Some(CategoryKey::Facts2),
            Category::Biology => Some(CategoryKey::Biology),
            Category::Special => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::Profession => "Profession",
            Category::Health => "Health",
            Category::Hobby => "Hobby",
            Category::Baggage => "Baggage",
            Category::Facts1 => "Fact #1",
            Category::Facts2 => "Fact #2",
            Category::Biology => "Biology",
            Category::Special => "Special conditions",
        }
    }
}

/// Category selector used by special cards and round rules.
///
/// `Facts` covers both fact slots, `Facts1`/`Facts2` only one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CategoryKey {
    Profession,
    Health,
    Hobby,
    Baggage,
    Facts,
    Facts1,
    Facts2,
    Biology,
}

impl CategoryKey {
    pub fn deck(&self) -> Deck {
        match self {
            CategoryKey::Profession => Deck::Profession,
            CategoryKey::Health => Deck::Health,
            CategoryKey::Hobby => Deck::Hobby,
            CategoryKey::Baggage => Deck::Baggage,
            CategoryKey::Facts | CategoryKey::Facts1 | CategoryKey::Facts2 => Deck::Facts,
            CategoryKey::Biology => Deck::Biology,
        }
    }

    pub fn slot(&self) -> Option<FactSlot> {
        match self {
            CategoryKey::Facts1 => Some(FactSlot::Facts1),
            CategoryKey::Facts2 => Some(FactSlot::Facts2),
            _ => None,
        }
    }

    /// Does this selector cover the given hand card?
    pub fn matches(&self, card: &CardInstance) -> bool {
        if card.deck != self.deck() {
            return false;
        }
        match self.slot() {
            Some(slot) => card.slot == Some(slot),
            None => true,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CategoryKey::Profession => "Profession",
            CategoryKey::Health => "Health",
            CategoryKey::Hobby => "Hobby",
            CategoryKey::Baggage => "Baggage",
            CategoryKey::Facts => "Facts",
            CategoryKey::Facts1 => "Fact #1",
            CategoryKey::Facts2 => "Fact #2",
            CategoryKey::Biology => "Biology",
        }
    }
}

/// One card as listed by the host's asset catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCard {
    pub id: String,
    pub deck: Deck,
    pub label: String,
}

impl CatalogCard {
    pub fn new(id: impl Into<String>, deck: Deck, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            deck,
            label: label.into(),
        }
    }
}

/// Available cards per deck
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardCatalog {
    decks: HashMap<Deck, Vec<CatalogCard>>,
}

impl CardCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from its JSON form (`{"profession": [...], ...}`)
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Builder-style helper that replaces the contents of one deck
    pub fn with_deck(mut self, deck: Deck, cards: Vec<CatalogCard>) -> Self {
        self.decks.insert(deck, cards);
        self
    }

    pub fn cards(&self, deck: Deck) -> &[CatalogCard] {
        self.decks.get(&deck).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_cards(&self) -> usize {
        self.decks.values().map(Vec::len).sum()
    }
}
