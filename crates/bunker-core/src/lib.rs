//! Bunker - scenario session engine for a social deduction party game
//!
//! This crate provides the per-room game rules, including:
//! - Dealing trait cards and special conditions from a host-supplied catalog
//! - Round and turn progression with reveal and discussion phases
//! - Weighted voting with tie-break revotes and a special-condition window
//! - Special-condition effects and automatic elimination triggers
//! - World cards (disaster, bunker, threats) and the threat modifier
//!
//! # Architecture
//!
//! The engine does no I/O. Everything it needs (players, catalog, settings,
//! randomness, a timer facility and an observer) is injected when a
//! [`GameSession`] is created. All mutations go through
//! [`GameSession::handle_action`] and [`GameSession::handle_timer`];
//! [`GameSession::get_game_view`] is a pure read.
//!
//! # Modules
//!
//! - [`catalog`]: Decks, categories and the read-only card catalog
//! - [`deal`]: Sampling hands and specials without replacement
//! - [`player`]: Player state and the alive-player ring
//! - [`random`]: Injected randomness
//! - [`world`]: Disaster, bunker and threat cards
//! - [`ruleset`]: Vote schedule presets and host settings
//! - [`specials`]: Special-condition definitions and the built-in deck
//! - [`actions`]: Actions, outcomes and feed events
//! - [`game`]: Session state machine
//! - [`voting`]: Tally and vote resolution
//! - [`effects`]: Special-condition effects
//! - [`timer`]: Cancellable timer interface
//! - [`view`]: Per-player projections

pub mod actions;
pub mod catalog;
pub mod deal;
pub mod effects;
pub mod game;
pub mod player;
pub mod random;
pub mod ruleset;
pub mod specials;
pub mod timer;
pub mod view;
pub mod voting;
pub mod world;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use actions::{Action, ActionOutcome, BunkerOutcome, EventKind, GameEvent};
pub use catalog::{CardCatalog, CatalogCard, Category, CategoryKey, Deck};
pub use game::{
    GameError, GamePhase, GameSession, NoopObserver, PlayerSeat, PostGame, RoundRules, SessionConfig,
    SessionContext, SessionObserver, WorldEvent,
};
pub use player::{CardInstance, PlayerId, PlayerState, PlayerStatus};
pub use random::{FnRandom, RandomSource};
pub use ruleset::{GameSettings, Ruleset, RulesetError};
pub use specials::{standard_catalog, SpecialDefinition, SpecialPayload};
pub use timer::{ManualScheduler, TimerKind, TimerScheduler, TimerToken};
pub use view::GameView;
pub use voting::{VotePhase, VoteStatus};
pub use world::{WorldCard, WorldState};
