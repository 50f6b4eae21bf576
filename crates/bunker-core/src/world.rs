//! World state: one disaster, a row of bunker cards and a row of threats.
//!
//! Row sizes are fixed by player count when the session starts. Only reveal
//! flags change afterwards.

use crate::catalog::{CardCatalog, CatalogCard, Deck};
use crate::player::PlayerId;
use crate::random::{shuffle, RandomSource};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Bunker titles that change how many threats apply, keyed by upper-cased title
const THREAT_MODIFIERS: &[(&str, i32)] = &[("ВМЕСТЕ НА 10 ЛЕТ", 1), ("ЗАГАДОЧНЫЙ ЖУРНАЛ", -1)];

const FALLBACK_DISASTER: (&str, &str) = ("Unknown catastrophe", "Something ended the world as we knew it.");

const FALLBACK_BUNKER: &[(&str, &str)] = &[
    ("Water filter", "Clean water for the whole stay."),
    ("Greenhouse", "A small hydroponic farm."),
    ("Workshop", "Tools for basic repairs."),
    ("Medical bay", "First aid and a few medicines."),
    ("Library", "Shelves of practical manuals."),
    ("Radio room", "A receiver that still picks up signals."),
];

const FALLBACK_THREAT: &[(&str, &str)] = &[
    ("Raiders", "Armed strangers look for shelter."),
    ("Flooding", "Ground water seeps through the walls."),
    ("Fire", "Old wiring sparks in the storage room."),
    ("Disease", "An infection spreads among survivors."),
    ("Collapse", "The entrance tunnel gives way."),
    ("Wild animals", "Hungry animals circle the vents."),
    ("Mutiny", "Survivors turn against each other."),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorldCardKind {
    Disaster,
    Bunker,
    Threat,
}

/// One world card with its reveal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldCard {
    pub kind: WorldCardKind,
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_id: Option<String>,
    pub is_revealed: bool,
    pub revealed_at_round: Option<u32>,
    pub revealed_by: Option<PlayerId>,
}

impl WorldCard {
    fn new(kind: WorldCardKind, id: String, title: String, description: String, image_id: Option<String>) -> Self {
        Self {
            kind,
            id,
            title,
            description,
            image_id,
            is_revealed: false,
            revealed_at_round: None,
            revealed_by: None,
        }
    }

    fn from_catalog(kind: WorldCardKind, card: &CatalogCard) -> Self {
        Self::new(
            kind,
            card.id.clone(),
            card.label.clone(),
            String::new(),
            Some(card.id.clone()),
        )
    }

    pub fn reveal(&mut self, round: Option<u32>, by: Option<PlayerId>) {
        self.is_revealed = true;
        self.revealed_at_round = round;
        self.revealed_by = by;
    }

    /// Copy safe to show to players: content is stripped while hidden
    pub fn redacted(&self) -> Self {
        if self.is_revealed {
            return self.clone();
        }
        Self {
            kind: self.kind,
            id: String::new(),
            title: String::new(),
            description: String::new(),
            image_id: None,
            is_revealed: false,
            revealed_at_round: None,
            revealed_by: None,
        }
    }
}

/// Threat count after applying revealed bunker modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatModifier {
    pub base_count: usize,
    pub delta: i32,
    pub final_count: usize,
}

/// The world row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    pub disaster: WorldCard,
    pub bunker: Vec<WorldCard>,
    pub threats: Vec<WorldCard>,
    /// Threats that apply before any modifier
    pub base_threat_count: usize,
}

/// `(bunker cards, base threats)` for a table size
pub fn world_counts(player_count: usize) -> (usize, usize) {
    match player_count {
        0..=4 => (5, 3),
        5 | 6 => (5, 4),
        7..=9 => (5, 5),
        _ => (5, 6),
    }
}

fn draw_row(
    catalog: &CardCatalog,
    deck: Deck,
    kind: WorldCardKind,
    count: usize,
    fallback: &[(&str, &str)],
    rng: &mut dyn RandomSource,
) -> Vec<WorldCard> {
    let mut pool: Vec<&CatalogCard> = catalog.cards(deck).iter().collect();
    shuffle(&mut pool, rng);

    let mut row: Vec<WorldCard> = pool
        .into_iter()
        .take(count)
        .map(|card| WorldCard::from_catalog(kind, card))
        .collect();

    if row.len() < count {
        warn!(deck = deck.as_str(), wanted = count, got = row.len(), "world deck short, using fallback cards");
    }
    let mut index = 0;
    while row.len() < count {
        let (title, description) = fallback[index % fallback.len()];
        row.push(WorldCard::new(
            kind,
            format!("fallback-{}-{}", deck.as_str(), index + 1),
            title.to_string(),
            description.to_string(),
            None,
        ));
        index += 1;
    }
    row
}

impl WorldState {
    /// Roll a fresh world for the given table size
    pub fn roll(catalog: &CardCatalog, player_count: usize, rng: &mut dyn RandomSource) -> Self {
        let (bunker_count, threat_count) = world_counts(player_count);

        let disasters = catalog.cards(Deck::Disaster);
        let mut disaster = if disasters.is_empty() {
            let (title, description) = FALLBACK_DISASTER;
            WorldCard::new(
                WorldCardKind::Disaster,
                "fallback-disaster".into(),
                title.into(),
                description.into(),
                None,
            )
        } else {
            WorldCard::from_catalog(WorldCardKind::Disaster, &disasters[rng.pick_index(disasters.len())])
        };
        disaster.reveal(None, None);

        let bunker = draw_row(catalog, Deck::Bunker, WorldCardKind::Bunker, bunker_count, FALLBACK_BUNKER, rng);
        // one spare threat so a positive modifier has something to reveal
        let threats = draw_row(
            catalog,
            Deck::Threat,
            WorldCardKind::Threat,
            threat_count + 1,
            FALLBACK_THREAT,
            rng,
        );

        Self {
            disaster,
            bunker,
            threats,
            base_threat_count: threat_count,
        }
    }

    /// Reveal the leftmost hidden bunker card. Returns its index.
    pub fn reveal_next_bunker(&mut self, round: u32) -> Option<usize> {
        let index = self.bunker.iter().position(|c| !c.is_revealed)?;
        self.bunker[index].reveal(Some(round), None);
        Some(index)
    }

    pub fn reveal_all_bunker(&mut self, round: u32) {
        for card in self.bunker.iter_mut().filter(|c| !c.is_revealed) {
            card.reveal(Some(round), None);
        }
    }

    pub fn revealed_bunker_count(&self) -> usize {
        self.bunker.iter().filter(|c| c.is_revealed).count()
    }

    pub fn threat_modifier(&self) -> ThreatModifier {
        let delta: i32 = self
            .bunker
            .iter()
            .filter(|c| c.is_revealed)
            .filter_map(|c| {
                let key = c.title.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
                THREAT_MODIFIERS
                    .iter()
                    .find(|(title, _)| *title == key)
                    .map(|(_, d)| *d)
            })
            .sum();
        let final_count = (self.base_threat_count as i64 + delta as i64).clamp(0, self.threats.len() as i64) as usize;
        ThreatModifier {
            base_count: self.base_threat_count,
            delta,
            final_count,
        }
    }

    /// Public copy with hidden cards stripped
    pub fn redacted(&self) -> Self {
        Self {
            disaster: self.disaster.redacted(),
            bunker: self.bunker.iter().map(WorldCard::redacted).collect(),
            threats: self.threats.iter().map(WorldCard::redacted).collect(),
            base_threat_count: self.base_threat_count,
        }
    }
}
