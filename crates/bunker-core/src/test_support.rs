//! Shared fixtures for unit tests.

use crate::actions::{Action, GameEvent};
use crate::catalog::{CardCatalog, CatalogCard, Deck};
use crate::game::{GameSession, PlayerSeat, SessionConfig, SessionContext, SessionObserver};
use crate::ruleset::{GameSettings, Ruleset};
use crate::specials::{standard_catalog, SpecialDefinition, SpecialInstance};
use crate::timer::ManualScheduler;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

/// Observer that keeps everything it is told
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    pub events: Arc<Mutex<Vec<GameEvent>>>,
    pub changes: Arc<Mutex<usize>>,
}

impl Recorder {
    pub fn change_count(&self) -> usize {
        *self.changes.lock().unwrap()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|e| e.message.clone()).collect()
    }
}

impl SessionObserver for Recorder {
    fn on_state_change(&mut self) {
        *self.changes.lock().unwrap() += 1;
    }

    fn on_event(&mut self, event: &GameEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Twenty cards in every hand deck, labels double as ages for biology
pub(crate) fn catalog() -> CardCatalog {
    let mut catalog = CardCatalog::new();
    for deck in Deck::SINGLE_SLOT.into_iter().chain([Deck::Facts]) {
        catalog = catalog.with_deck(
            deck,
            (0..20)
                .map(|i| {
                    let label = match deck {
                        Deck::Biology => format!("Male, {} years", 20 + i),
                        _ => format!("{} {i}", deck.as_str()),
                    };
                    CatalogCard::new(format!("{}/{i}", deck.as_str()), deck, label)
                })
                .collect(),
        );
    }
    catalog
}

/// Session with the first id as host and no specials dealt
pub(crate) fn session_with(
    ids: &[&str],
    ruleset: Option<Ruleset>,
    settings: GameSettings,
) -> (GameSession, ManualScheduler, Recorder) {
    session_with_specials(ids, ruleset, settings, Vec::new())
}

pub(crate) fn session_with_specials(
    ids: &[&str],
    ruleset: Option<Ruleset>,
    settings: GameSettings,
    specials: Vec<SpecialDefinition>,
) -> (GameSession, ManualScheduler, Recorder) {
    let timers = ManualScheduler::new();
    let recorder = Recorder::default();
    let config = SessionConfig {
        room_code: "ROOM".into(),
        host_id: ids[0].into(),
        players: ids.iter().map(|id| PlayerSeat::new(*id, id.to_uppercase())).collect(),
        catalog: catalog(),
        specials,
        settings,
        ruleset,
    };
    let context = SessionContext {
        rng: Box::new(StdRng::seed_from_u64(11)),
        timers: Box::new(timers.clone()),
        observer: Box::new(recorder.clone()),
    };
    (GameSession::new(config, context).unwrap(), timers, recorder)
}

/// Put a built-in special into a player's hand and return its instance id
pub(crate) fn give_special(session: &mut GameSession, owner: &str, definition_id: &str) -> String {
    let definition = standard_catalog()
        .into_iter()
        .find(|d| d.id == definition_id)
        .unwrap();
    let instance_id = format!("test-{owner}-{definition_id}");
    session
        .players
        .get_mut(owner)
        .unwrap()
        .special_conditions
        .push(SpecialInstance::new(instance_id.clone(), definition));
    instance_id
}

pub(crate) fn hidden_card(session: &GameSession, id: &str) -> String {
    session
        .player(id)
        .unwrap()
        .hand
        .iter()
        .find(|c| !c.revealed)
        .unwrap()
        .instance_id
        .clone()
}

pub(crate) fn reveal_and_continue(session: &mut GameSession, id: &str) {
    let card = hidden_card(session, id);
    let outcome = session.handle_action(id, Action::RevealCard { card_id: card });
    assert!(outcome.is_ok(), "{id} reveal: {:?}", outcome.error);
    let outcome = session.handle_action(id, Action::ContinueRound);
    assert!(outcome.is_ok(), "{id} continue: {:?}", outcome.error);
}

/// Play reveal rounds until a vote opens
pub(crate) fn reveal_until_voting(session: &mut GameSession) {
    while session.phase() != crate::game::GamePhase::Voting {
        let turn = session.current_turn().unwrap().to_string();
        reveal_and_continue(session, &turn);
    }
}

pub(crate) fn vote(session: &mut GameSession, voter: &str, target: &str) {
    let outcome = session.handle_action(
        voter,
        Action::Vote {
            target_player_id: target.into(),
        },
    );
    assert!(outcome.is_ok(), "{voter} -> {target}: {:?}", outcome.error);
}
