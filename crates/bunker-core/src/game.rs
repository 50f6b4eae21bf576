//! Core session state machine.
//!
//! This module contains `GameSession`, which owns all per-room state, the
//! phase/turn logic and the single entry points `handle_action` and
//! `handle_timer`. Voting, special effects and views are further
//! `impl GameSession` blocks in their own modules.

use crate::actions::{Action, ActionOutcome, BunkerOutcome, EventKind, GameEvent};
use crate::catalog::{CardCatalog, CategoryKey, Deck};
use crate::deal::DealAllocator;
use crate::player::{PlayerId, PlayerState, PlayerStatus, PlayerTable};
use crate::random::RandomSource;
use crate::ruleset::{
    ContinuePermission, FinalThreatReveal, GameSettings, RevealTimeoutAction, Ruleset, RulesetError,
};
use crate::specials::SpecialDefinition;
use crate::timer::{ActiveTimer, TimerKind, TimerScheduler, TimerToken};
use crate::voting::{VotePhase, VotingState};
use crate::world::WorldState;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Game phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Turn holder reveals one card
    Reveal,
    /// Table discusses the card just revealed
    RevealDiscussion,
    /// Votes are collected, then specials may act
    Voting,
    /// A vote was resolved, waiting to move on
    Resolution,
    /// Game is over, post-game window open
    Ended,
}

/// Errors that can occur when applying actions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    // ==================== Lookup ====================
    #[error("Player not found")]
    UnknownPlayer,

    #[error("No players to start a game with")]
    NoPlayers,

    #[error("Invalid ruleset: {0}")]
    InvalidRuleset(#[from] RulesetError),

    // ==================== Phase / Turn ====================
    #[error("You are out of the game")]
    NotInGame,

    #[error("Game is over")]
    GameOver,

    #[error("The game has not ended yet")]
    NotEnded,

    #[error("Wrong phase for this action")]
    WrongPhase,

    #[error("Not your turn")]
    NotYourTurn,

    #[error("You already revealed a card this round")]
    AlreadyRevealedThisRound,

    #[error("Card not found")]
    CardNotFound,

    #[error("This card is already revealed")]
    CardAlreadyRevealed,

    #[error("This round you must reveal a card of category \"{0}\"")]
    ForcedCategory(&'static str),

    #[error("You may not continue the round")]
    ContinueNotAllowed,

    #[error("Only the host can do that")]
    HostOnly,

    #[error("Only the host or the player themselves can do that")]
    HostOrSelfOnly,

    #[error("The round cannot be skipped during voting")]
    SkipDuringVoting,

    #[error("Player has already left the bunker")]
    AlreadyLeft,

    // ==================== Voting ====================
    #[error("No vote in progress")]
    NoVoting,

    #[error("Voting is closed")]
    VotingClosed,

    #[error("You cannot vote for yourself")]
    SelfVote,

    #[error("Invalid candidate")]
    InvalidCandidate,

    #[error("You already voted")]
    AlreadyVoted,

    #[error("This candidate cannot be chosen in the revote")]
    RevoteDisallowed,

    #[error("Target not alive")]
    TargetNotAlive,

    #[error("Vote banned: you cannot vote against this player")]
    VoteBanned,

    #[error("Your vote is disabled")]
    VoteDisabled,

    #[error("The special conditions window is not open")]
    SpecialWindowNotOpen,

    // ==================== Special Conditions ====================
    #[error("Special condition not found")]
    SpecialNotFound,

    #[error("This card is not implemented yet")]
    SpecialNotImplemented,

    #[error("This card has already been used")]
    SpecialUsed,

    #[error("Special conditions can only be used during voting")]
    SpecialOnlyDuringVoting,

    #[error("This card triggers automatically")]
    AutomaticSpecial,

    #[error("A choice is required to play this card")]
    ChoiceRequired,

    #[error("No valid targets")]
    NoTargets,

    #[error("Invalid target")]
    InvalidTarget,

    #[error("You cannot target yourself")]
    SelfTarget,

    #[error("Neighbor not found")]
    NeighborNotFound,

    #[error("Requirement not met: {0}")]
    RequirementFailed(&'static str),

    #[error("No cards left in category \"{0}\"")]
    NoCardsLeft(&'static str),

    #[error("No special conditions left in the deck")]
    NoSpecialsLeft,

    #[error("Effect not supported")]
    EffectNotSupported,

    // ==================== Post-game ====================
    #[error("No such threat card")]
    NoSuchThreat,

    #[error("Outcome already chosen")]
    OutcomeAlreadySet,
}

/// Per-round overrides, reset whenever a reveal phase starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRules {
    pub forced_reveal_category: Option<CategoryKey>,
    pub no_talk_until_voting: bool,
}

/// Outcome window opened when the game ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostGame {
    pub is_active: bool,
    pub entered_at_ms: u64,
    pub outcome: Option<BunkerOutcome>,
    pub decided_by: Option<PlayerId>,
    pub decided_at_ms: Option<u64>,
}

/// Most recent world change, for client animations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorldEvent {
    BunkerRevealed { index: usize, round: u32 },
}

/// Receives notifications from a session
pub trait SessionObserver: Send {
    /// Something visible changed; views should be rebuilt
    fn on_state_change(&mut self) {}

    /// A line for the room's event feed
    fn on_event(&mut self, _event: &GameEvent) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// A seat at the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSeat {
    pub id: PlayerId,
    pub name: String,
}

impl PlayerSeat {
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Data a session is created from
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room_code: String,
    pub host_id: PlayerId,
    /// Seats in join order
    pub players: Vec<PlayerSeat>,
    pub catalog: CardCatalog,
    pub specials: Vec<SpecialDefinition>,
    pub settings: GameSettings,
    /// Preset for the table size when `None`
    pub ruleset: Option<Ruleset>,
}

/// Collaborators a session talks to
pub struct SessionContext {
    pub rng: Box<dyn RandomSource + Send>,
    pub timers: Box<dyn TimerScheduler + Send>,
    pub observer: Box<dyn SessionObserver>,
}

/// One room's game
pub struct GameSession {
    pub(crate) room_code: String,
    pub(crate) host_id: PlayerId,
    pub(crate) players: PlayerTable,
    pub(crate) deal: DealAllocator,
    pub(crate) world: WorldState,
    pub(crate) ruleset: Ruleset,
    pub(crate) settings: GameSettings,

    pub(crate) phase: GamePhase,
    pub(crate) round: u32,
    pub(crate) votes_remaining_in_round: u32,
    pub(crate) eliminations_this_round: u32,
    pub(crate) total_exiles: u32,
    pub(crate) voting: Option<VotingState>,
    pub(crate) vote_phase: Option<VotePhase>,
    pub(crate) current_turn: Option<PlayerId>,
    pub(crate) last_revealer: Option<PlayerId>,
    pub(crate) first_health_revealer: Option<PlayerId>,
    pub(crate) round_rules: RoundRules,

    pub(crate) last_eliminated: Option<PlayerId>,
    pub(crate) resolution_note: Option<String>,
    pub(crate) winners: Vec<PlayerId>,
    pub(crate) final_threats: Vec<String>,
    pub(crate) world_event: Option<WorldEvent>,
    pub(crate) post_game: Option<PostGame>,
    pub(crate) last_stage_text: Option<String>,
    pub(crate) active_timer: Option<ActiveTimer>,
    event_counter: u64,

    pub(crate) rng: Box<dyn RandomSource + Send>,
    timers: Box<dyn TimerScheduler + Send>,
    observer: Box<dyn SessionObserver>,
}

impl fmt::Debug for GameSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameSession")
            .field("room_code", &self.room_code)
            .field("phase", &self.phase)
            .field("round", &self.round)
            .field("total_exiles", &self.total_exiles)
            .field("players", &self.players.len())
            .finish_non_exhaustive()
    }
}

impl GameSession {
    /// Deal hands, roll the world and open round 1
    pub fn new(config: SessionConfig, context: SessionContext) -> Result<Self, GameError> {
        let mut seen = HashSet::new();
        let seats: Vec<PlayerSeat> = config
            .players
            .into_iter()
            .filter(|seat| seen.insert(seat.id.clone()))
            .collect();
        if seats.is_empty() {
            return Err(GameError::NoPlayers);
        }

        let ruleset = config
            .ruleset
            .unwrap_or_else(|| Ruleset::for_player_count(seats.len()));
        ruleset.validate()?;

        let SessionContext {
            mut rng,
            timers,
            observer,
        } = context;

        let world = WorldState::roll(&config.catalog, seats.len(), &mut *rng);
        let mut deal = DealAllocator::new(&config.catalog, config.specials);
        let players = seats
            .into_iter()
            .map(|seat| {
                let mut player = PlayerState::new(seat.id, seat.name);
                player.hand = deal.deal_hand(&player.id, &mut *rng);
                let special = deal.deal_special(&player.id, &mut *rng);
                player.special_conditions.push(special);
                player
            })
            .collect();

        let mut session = Self {
            room_code: config.room_code,
            host_id: config.host_id,
            players: PlayerTable::new(players),
            deal,
            world,
            ruleset,
            settings: config.settings,
            phase: GamePhase::Reveal,
            round: 0,
            votes_remaining_in_round: 0,
            eliminations_this_round: 0,
            total_exiles: 0,
            voting: None,
            vote_phase: None,
            current_turn: None,
            last_revealer: None,
            first_health_revealer: None,
            round_rules: RoundRules::default(),
            last_eliminated: None,
            resolution_note: None,
            winners: Vec::new(),
            final_threats: Vec::new(),
            world_event: None,
            post_game: None,
            last_stage_text: None,
            active_timer: None,
            event_counter: 0,
            rng,
            timers,
            observer,
        };
        info!(
            room = %session.room_code,
            players = session.players.len(),
            rounds = session.ruleset.rounds(),
            "session created"
        );
        session.start_reveal_phase(1);
        Ok(session)
    }

    // ==================== Accessors ====================

    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Hand host rights to another player (e.g. the host disconnected)
    pub fn set_host(&mut self, host_id: impl Into<PlayerId>) {
        self.host_id = host_id.into();
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn total_exiles(&self) -> u32 {
        self.total_exiles
    }

    pub fn votes_remaining_in_round(&self) -> u32 {
        self.votes_remaining_in_round
    }

    pub fn players(&self) -> &PlayerTable {
        &self.players
    }

    pub fn player(&self, id: &str) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn voting(&self) -> Option<&VotingState> {
        self.voting.as_ref()
    }

    pub fn vote_phase(&self) -> Option<VotePhase> {
        self.vote_phase
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn current_turn(&self) -> Option<&str> {
        self.current_turn.as_deref()
    }

    pub fn round_rules(&self) -> &RoundRules {
        &self.round_rules
    }

    pub fn winners(&self) -> &[PlayerId] {
        &self.winners
    }

    pub fn final_threats(&self) -> &[String] {
        &self.final_threats
    }

    pub fn post_game(&self) -> Option<&PostGame> {
        self.post_game.as_ref()
    }

    pub fn active_timer(&self) -> Option<ActiveTimer> {
        self.active_timer
    }

    // ==================== Entry Points ====================

    /// Apply one action. Never panics; failures come back as `error`.
    pub fn handle_action(&mut self, player_id: &str, action: Action) -> ActionOutcome {
        let name = action.name();
        match self.dispatch(player_id, action) {
            Ok(changed) => {
                if changed {
                    self.observer.on_state_change();
                }
                ActionOutcome::changed(changed)
            }
            Err(err) => {
                debug!(player = player_id, action = name, error = %err, "action rejected");
                ActionOutcome::error(err.to_string())
            }
        }
    }

    fn dispatch(&mut self, player_id: &str, action: Action) -> Result<bool, GameError> {
        let Some(player) = self.players.get(player_id) else {
            return Err(GameError::UnknownPlayer);
        };
        let post_game_reveal = matches!(action, Action::RevealCard { .. }) && self.phase == GamePhase::Ended;
        if !action.is_control() && !post_game_reveal {
            if !player.is_alive() {
                return Err(GameError::NotInGame);
            }
            if self.phase == GamePhase::Ended {
                return Err(GameError::GameOver);
            }
        }

        match action {
            Action::RevealCard { card_id } => {
                if post_game_reveal {
                    self.reveal_post_game(player_id, &card_id)
                } else {
                    self.reveal_card(player_id, &card_id)
                }
            }
            Action::ContinueRound => self.continue_round(player_id),
            Action::Vote { target_player_id } => self.vote(player_id, &target_player_id),
            Action::FinalizeVoting => self.finalize_voting(player_id),
            Action::ApplySpecial {
                special_instance_id,
                payload,
            } => self.apply_special(player_id, &special_instance_id, payload),
            Action::RevealWorldThreat { index } => self.reveal_world_threat(player_id, index),
            Action::SetBunkerOutcome { outcome } => self.set_bunker_outcome(player_id, outcome),
            Action::MarkLeftBunker { target_player_id } => self.mark_left_bunker(player_id, &target_player_id),
            Action::DevSkipRound => self.dev_skip_round(player_id),
            Action::DevKickPlayer { target_player_id } => self.dev_kick_player(player_id, &target_player_id),
        }
    }

    /// Called by the host when a scheduled timer fires. Stale tokens and
    /// timers whose phase is already gone are ignored.
    pub fn handle_timer(&mut self, token: TimerToken) -> bool {
        let Some(active) = self.active_timer else {
            warn!(?token, "timer fired with nothing scheduled");
            return false;
        };
        if active.token != token {
            warn!(?token, expected = ?active.token, "stale timer ignored");
            return false;
        }
        self.active_timer = None;

        let changed = match active.kind {
            TimerKind::RevealTimeout if self.phase == GamePhase::Reveal => self.on_reveal_timeout(),
            TimerKind::RevealDiscussion | TimerKind::PreVote if self.phase == GamePhase::RevealDiscussion => {
                self.advance_after_discussion();
                true
            }
            TimerKind::PostVote
                if self.phase == GamePhase::Voting && self.vote_phase == Some(VotePhase::SpecialWindow) =>
            {
                self.finalize_resolution()
            }
            TimerKind::Resolution if self.phase == GamePhase::Resolution => {
                self.advance_after_resolution();
                true
            }
            kind => {
                warn!(?kind, phase = ?self.phase, "timer fired in a different phase, ignored");
                false
            }
        };
        if changed {
            self.observer.on_state_change();
        }
        changed
    }

    // ==================== Internal Helpers ====================

    pub(crate) fn now_ms(&self) -> u64 {
        self.timers.now_ms()
    }

    pub(crate) fn emit(&mut self, kind: EventKind, message: impl Into<String>) {
        self.event_counter += 1;
        let now = self.now_ms();
        let event = GameEvent {
            id: format!("{}-{}-{}", self.room_code, now, self.event_counter),
            kind,
            message: message.into(),
            created_at_ms: now,
        };
        self.observer.on_event(&event);
    }

    pub(crate) fn set_stage(&mut self, text: impl Into<String>) {
        self.last_stage_text = Some(text.into());
    }

    pub(crate) fn player_name(&self, id: &str) -> String {
        self.players
            .get(id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub(crate) fn names(&self, ids: &[PlayerId]) -> String {
        ids.iter()
            .map(|id| self.player_name(id))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn is_host(&self, id: &str) -> bool {
        self.host_id == id
    }

    pub(crate) fn clear_timer(&mut self) {
        if let Some(timer) = self.active_timer.take() {
            self.timers.cancel(timer.token);
        }
    }

    /// Replace whatever timer is running with a new one
    pub(crate) fn schedule_timer(&mut self, kind: TimerKind, delay: Duration) {
        self.clear_timer();
        if delay.is_zero() {
            return;
        }
        let token = self.timers.schedule(kind, delay);
        self.active_timer = Some(ActiveTimer {
            kind,
            ends_at_ms: self.now_ms() + delay.as_millis() as u64,
            token,
        });
    }

    fn schedule_reveal_timeout(&mut self) {
        if self.settings.enable_reveal_discussion_timer {
            let delay = Duration::from_secs(self.settings.reveal_discussion_seconds);
            self.schedule_timer(TimerKind::RevealTimeout, delay);
        }
    }

    fn is_round_complete(&self) -> bool {
        self.players.alive().all(|p| p.revealed_this_round)
    }

    // ==================== Rounds ====================

    /// Open the reveal phase of `next_round`, revealing one bunker card for
    /// every round advanced
    pub(crate) fn start_reveal_phase(&mut self, next_round: u32) {
        self.clear_timer();
        let previous = self.round;
        self.round = next_round;
        self.world_event = None;
        let advanced = next_round.saturating_sub(previous).max(1);
        for step in 1..=advanced {
            let round = previous + step;
            if let Some(index) = self.world.reveal_next_bunker(round) {
                self.world_event = Some(WorldEvent::BunkerRevealed { index, round });
            }
        }

        self.votes_remaining_in_round = self.ruleset.votes_in_round(next_round);
        self.eliminations_this_round = 0;
        for player in self.players.iter_mut() {
            player.revealed_this_round = false;
        }
        self.round_rules = RoundRules::default();
        self.voting = None;
        self.vote_phase = None;
        self.last_revealer = None;
        self.phase = GamePhase::Reveal;
        self.current_turn = self.players.first_alive();
        if self.current_turn.is_none() {
            self.check_end_condition(true);
            return;
        }

        debug!(round = next_round, skipped = advanced - 1, "reveal phase started");
        self.emit(EventKind::RoundStart, format!("Round {next_round}: reveals begin."));
        self.set_stage(format!("Round {next_round}"));
        self.begin_turn();
    }

    /// Hand the turn to `current_turn`, passing over players with nothing
    /// left to reveal
    fn begin_turn(&mut self) {
        while let Some(id) = self.current_turn.clone() {
            let has_hidden = self
                .players
                .get(&id)
                .map(PlayerState::has_hidden_card)
                .unwrap_or(false);
            if has_hidden {
                self.phase = GamePhase::Reveal;
                self.schedule_reveal_timeout();
                return;
            }
            if let Some(player) = self.players.get_mut(&id) {
                player.revealed_this_round = true;
            }
            if self.is_round_complete() {
                self.after_round_complete();
                return;
            }
            self.current_turn = self.players.next_unrevealed_alive_after(Some(&id));
        }
        self.check_end_condition(true);
    }

    fn after_round_complete(&mut self) {
        if self.votes_remaining_in_round > 0 {
            self.start_voting();
        } else {
            self.start_next_reveal();
        }
    }

    /// Next round, fast-forwarded past rounds whose exiles already happened
    pub(crate) fn start_next_reveal(&mut self) {
        let next = (self.round + 1).max(self.ruleset.round_from_eliminations(self.total_exiles));
        if next > self.ruleset.rounds() {
            self.check_end_condition(true);
            return;
        }
        self.start_reveal_phase(next);
    }

    fn enter_reveal_discussion(&mut self) {
        self.clear_timer();
        self.phase = GamePhase::RevealDiscussion;
        self.vote_phase = None;
        let vote_next = self.is_round_complete() && self.votes_remaining_in_round > 0;
        if vote_next && self.settings.enable_pre_vote_discussion_timer {
            let delay = Duration::from_secs(self.settings.pre_vote_discussion_seconds);
            self.schedule_timer(TimerKind::PreVote, delay);
        } else if self.settings.enable_reveal_discussion_timer {
            let delay = Duration::from_secs(self.settings.reveal_discussion_seconds);
            self.schedule_timer(TimerKind::RevealDiscussion, delay);
        }
    }

    pub(crate) fn advance_after_discussion(&mut self) {
        self.clear_timer();
        if self.is_round_complete() {
            self.after_round_complete();
            return;
        }
        self.current_turn = self
            .players
            .next_unrevealed_alive_after(self.current_turn.as_deref());
        self.begin_turn();
    }

    /// Jump ahead when exiles outside voting already cover later rounds
    fn try_advance_round_by_eliminations(&mut self) -> bool {
        if !matches!(self.phase, GamePhase::Reveal | GamePhase::RevealDiscussion) {
            return false;
        }
        let target = self.ruleset.round_from_eliminations(self.total_exiles);
        if target <= self.round {
            return false;
        }
        if target > self.ruleset.rounds() {
            self.check_end_condition(true);
            return true;
        }
        debug!(from = self.round, to = target, "fast-forwarding rounds");
        self.start_reveal_phase(target);
        true
    }

    // ==================== Reveals ====================

    fn reveal_card(&mut self, actor: &str, card_id: &str) -> Result<bool, GameError> {
        if self.phase != GamePhase::Reveal {
            return Err(GameError::WrongPhase);
        }
        if self.current_turn.as_deref().is_some_and(|turn| turn != actor) {
            return Err(GameError::NotYourTurn);
        }
        let forced = self.round_rules.forced_reveal_category;
        let player = self.players.get_mut(actor).ok_or(GameError::UnknownPlayer)?;
        if player.revealed_this_round {
            return Err(GameError::AlreadyRevealedThisRound);
        }
        let card = player.card(card_id).ok_or(GameError::CardNotFound)?;
        if card.revealed {
            return Err(GameError::CardAlreadyRevealed);
        }
        if let Some(key) = forced {
            if player.has_hidden_in(key) && !key.matches(card) {
                return Err(GameError::ForcedCategory(key.label()));
            }
        }

        let deck = card.deck;
        if let Some(card) = player.card_mut(card_id) {
            card.revealed = true;
        }
        player.revealed_this_round = true;
        let name = player.name.clone();
        self.last_revealer = Some(actor.to_string());
        if deck == Deck::Health && self.first_health_revealer.is_none() {
            self.first_health_revealer = Some(actor.to_string());
        }
        self.emit(EventKind::Info, format!("{name} reveals a card."));
        self.enter_reveal_discussion();
        Ok(true)
    }

    /// After the game any remaining player may show the rest of their hand
    fn reveal_post_game(&mut self, actor: &str, card_id: &str) -> Result<bool, GameError> {
        let player = self.players.get_mut(actor).ok_or(GameError::UnknownPlayer)?;
        if player.status == PlayerStatus::LeftBunker {
            return Err(GameError::NotInGame);
        }
        let card = player.card_mut(card_id).ok_or(GameError::CardNotFound)?;
        if card.revealed {
            return Err(GameError::CardAlreadyRevealed);
        }
        card.revealed = true;
        Ok(true)
    }

    fn on_reveal_timeout(&mut self) -> bool {
        let Some(id) = self.current_turn.clone() else {
            return false;
        };
        let Some(player) = self.players.get(&id) else {
            return false;
        };
        let name = player.name.clone();

        if self.settings.reveal_timeout_action == RevealTimeoutAction::RandomCard {
            let forced = self
                .round_rules
                .forced_reveal_category
                .filter(|key| player.has_hidden_in(*key));
            let hidden: Vec<String> = player
                .hand
                .iter()
                .filter(|c| !c.revealed && forced.map_or(true, |key| key.matches(c)))
                .map(|c| c.instance_id.clone())
                .collect();
            if !hidden.is_empty() {
                let pick = hidden[self.rng.pick_index(hidden.len())].clone();
                if self.reveal_card(&id, &pick).is_ok() {
                    self.emit(
                        EventKind::Info,
                        format!("{name} ran out of time; a random card was revealed."),
                    );
                    return true;
                }
            }
        }

        if let Some(player) = self.players.get_mut(&id) {
            player.revealed_this_round = true;
        }
        self.last_revealer = Some(id);
        self.emit(EventKind::Info, format!("{name} ran out of time and is skipped."));
        self.advance_after_discussion();
        true
    }

    pub(crate) fn can_continue(&self, actor: &str) -> bool {
        if self.phase != GamePhase::RevealDiscussion {
            return false;
        }
        match self.settings.continue_permission {
            ContinuePermission::Anyone => true,
            ContinuePermission::HostOnly => self.is_host(actor),
            ContinuePermission::RevealerOnly => self.last_revealer.as_deref() == Some(actor),
        }
    }

    fn continue_round(&mut self, actor: &str) -> Result<bool, GameError> {
        if self.phase != GamePhase::RevealDiscussion {
            return Err(GameError::WrongPhase);
        }
        if !self.can_continue(actor) {
            return Err(GameError::ContinueNotAllowed);
        }
        self.advance_after_discussion();
        Ok(true)
    }

    // ==================== Eliminations ====================

    fn consume_round_elimination(&mut self) {
        self.eliminations_this_round += 1;
        self.votes_remaining_in_round = self.votes_remaining_in_round.saturating_sub(1);
    }

    /// Flip an alive player to eliminated and fire elimination triggers
    pub(crate) fn apply_elimination(&mut self, target: &str) -> bool {
        let Some(player) = self.players.get_mut(target).filter(|p| p.is_alive()) else {
            return false;
        };
        player.status = PlayerStatus::Eliminated;
        let name = player.name.clone();
        self.consume_round_elimination();
        self.total_exiles += 1;
        self.last_eliminated = Some(target.to_string());
        self.resolution_note = Some(format!("{name} is exiled."));
        info!(player = target, total_exiles = self.total_exiles, "player eliminated");
        self.fire_owner_eliminated_triggers(target);
        self.fire_secret_triggers(target);
        true
    }

    /// Shared tail of every removal that happens outside a resolved vote
    fn after_out_of_band_removal(&mut self, target: &str, name: &str, was_alive: bool) {
        self.remove_from_voting(target);
        if was_alive && self.phase == GamePhase::Voting {
            self.skip_voting_after_out_of_band(name);
            return;
        }
        if self.phase == GamePhase::Ended {
            return;
        }
        if was_alive && (self.check_end_condition(false) || self.try_advance_round_by_eliminations()) {
            return;
        }
        if self.phase == GamePhase::Reveal && self.current_turn.as_deref() == Some(target) {
            self.current_turn = self.players.next_unrevealed_alive_after(Some(target));
            if self.is_round_complete() {
                self.after_round_complete();
            } else {
                self.begin_turn();
            }
        }
    }

    fn mark_left_bunker(&mut self, actor: &str, target: &str) -> Result<bool, GameError> {
        if !self.is_host(actor) && actor != target {
            return Err(GameError::HostOrSelfOnly);
        }
        let player = self.players.get_mut(target).ok_or(GameError::UnknownPlayer)?;
        if player.status == PlayerStatus::LeftBunker {
            return Err(GameError::AlreadyLeft);
        }
        let was_alive = player.is_alive();
        player.status = PlayerStatus::LeftBunker;
        player.revealed_this_round = false;
        let name = player.name.clone();
        if was_alive {
            self.consume_round_elimination();
            self.total_exiles += 1;
        }
        info!(player = target, was_alive, "player left the bunker");
        self.emit(EventKind::PlayerLeftBunker, format!("{name} left the bunker."));
        self.after_out_of_band_removal(target, &name, was_alive);
        Ok(true)
    }

    fn dev_kick_player(&mut self, actor: &str, target: &str) -> Result<bool, GameError> {
        if !self.is_host(actor) {
            return Err(GameError::HostOnly);
        }
        if self.phase == GamePhase::Ended {
            return Err(GameError::GameOver);
        }
        let player = self.players.get(target).ok_or(GameError::UnknownPlayer)?;
        if !player.is_alive() {
            return Err(GameError::TargetNotAlive);
        }
        let name = player.name.clone();
        self.apply_elimination(target);
        self.emit(EventKind::Elimination, format!("{name} was removed by the host."));
        self.after_out_of_band_removal(target, &name, true);
        Ok(true)
    }

    fn dev_skip_round(&mut self, actor: &str) -> Result<bool, GameError> {
        if !self.is_host(actor) {
            return Err(GameError::HostOnly);
        }
        match self.phase {
            GamePhase::Voting | GamePhase::Resolution => return Err(GameError::SkipDuringVoting),
            GamePhase::Ended => return Err(GameError::GameOver),
            GamePhase::Reveal | GamePhase::RevealDiscussion => {}
        }
        for player in self.players.iter_mut() {
            if player.is_alive() {
                player.revealed_this_round = true;
            }
        }
        self.advance_after_discussion();
        Ok(true)
    }

    // ==================== End of Game ====================

    /// End the game when exiles or seats say so, or unconditionally when
    /// `force` is set. Returns whether the game ended.
    pub(crate) fn check_end_condition(&mut self, force: bool) -> bool {
        if self.phase == GamePhase::Ended {
            return true;
        }
        let exiles_reached = self.total_exiles >= self.ruleset.total_exiles;
        let seats_reached = self.players.alive_count() <= self.ruleset.bunker_seats;
        if !force && !exiles_reached && !seats_reached {
            return false;
        }
        self.finish_game();
        true
    }

    fn finish_game(&mut self) {
        self.clear_timer();
        self.world.reveal_all_bunker(self.round);
        self.phase = GamePhase::Ended;
        self.vote_phase = None;
        self.voting = None;
        self.current_turn = None;
        self.winners = self.players.alive_ids();
        self.post_game = Some(PostGame {
            is_active: true,
            entered_at_ms: self.now_ms(),
            outcome: None,
            decided_by: None,
            decided_at_ms: None,
        });

        let survivors = self.names(&self.winners);
        let mut message = if survivors.is_empty() {
            "Game over. Nobody made it into the bunker.".to_string()
        } else {
            format!("Game over. In the bunker: {survivors}.")
        };
        if !self.final_threats.is_empty() {
            message.push_str(&format!(" Final threats: {}.", self.final_threats.join(", ")));
        }
        info!(round = self.round, total_exiles = self.total_exiles, winners = ?self.winners, "game over");
        self.emit(EventKind::GameEnd, message);
        self.set_stage("Game over");
    }

    fn reveal_world_threat(&mut self, actor: &str, index: usize) -> Result<bool, GameError> {
        if self.phase != GamePhase::Ended {
            return Err(GameError::NotEnded);
        }
        if index >= self.world.threat_modifier().final_count {
            return Err(GameError::NoSuchThreat);
        }
        if self.settings.final_threat_reveal == FinalThreatReveal::Host && !self.is_host(actor) {
            return Err(GameError::HostOnly);
        }
        let round = self.round;
        let Some(card) = self.world.threats.get_mut(index) else {
            return Err(GameError::NoSuchThreat);
        };
        if card.is_revealed {
            return Ok(false);
        }
        card.reveal(Some(round), Some(actor.to_string()));
        Ok(true)
    }

    fn set_bunker_outcome(&mut self, actor: &str, outcome: BunkerOutcome) -> Result<bool, GameError> {
        let now = self.now_ms();
        let is_host = self.is_host(actor);
        let Some(post_game) = self.post_game.as_mut().filter(|p| p.is_active) else {
            return Err(GameError::NotEnded);
        };
        if self.phase != GamePhase::Ended {
            return Err(GameError::NotEnded);
        }
        if !is_host {
            return Err(GameError::HostOnly);
        }
        if post_game.outcome.is_some() {
            return Err(GameError::OutcomeAlreadySet);
        }
        post_game.outcome = Some(outcome);
        post_game.decided_by = Some(actor.to_string());
        post_game.decided_at_ms = Some(now);
        let message = match outcome {
            BunkerOutcome::Survived => "Finale: the bunker survived.",
            BunkerOutcome::Failed => "Finale: the bunker did not survive.",
        };
        self.emit(EventKind::Info, message);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{hidden_card, reveal_and_continue, session_with};
    use crate::timer::ManualScheduler;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_session_opens_round_one() {
        let (session, _, recorder) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        assert_eq!(session.phase(), GamePhase::Reveal);
        assert_eq!(session.round(), 1);
        assert_eq!(session.current_turn(), Some("a"));
        assert_eq!(session.world().revealed_bunker_count(), 1);
        assert_eq!(session.player("a").unwrap().hand.len(), 7);
        let events = recorder.events.lock().unwrap();
        assert_eq!(events[0].kind, EventKind::RoundStart);
        assert_eq!(events[0].id, "ROOM-0-1");
    }

    #[test]
    fn test_empty_table_is_rejected() {
        let config = SessionConfig {
            room_code: "R".into(),
            host_id: "a".into(),
            players: Vec::new(),
            catalog: CardCatalog::new(),
            specials: Vec::new(),
            settings: GameSettings::default(),
            ruleset: None,
        };
        let context = SessionContext {
            rng: Box::new(StdRng::seed_from_u64(1)),
            timers: Box::new(ManualScheduler::new()),
            observer: Box::new(NoopObserver),
        };
        assert_eq!(GameSession::new(config, context).unwrap_err(), GameError::NoPlayers);
    }

    #[test]
    fn test_invalid_ruleset_is_rejected() {
        let ruleset = Ruleset {
            votes_per_round: Vec::new(),
            bunker_seats: 2,
            total_exiles: 0,
        };
        let config = SessionConfig {
            room_code: "R".into(),
            host_id: "a".into(),
            players: vec![PlayerSeat::new("a", "A")],
            catalog: CardCatalog::new(),
            specials: Vec::new(),
            settings: GameSettings::default(),
            ruleset: Some(ruleset),
        };
        let context = SessionContext {
            rng: Box::new(StdRng::seed_from_u64(1)),
            timers: Box::new(ManualScheduler::new()),
            observer: Box::new(NoopObserver),
        };
        assert!(matches!(
            GameSession::new(config, context),
            Err(GameError::InvalidRuleset(RulesetError::EmptySchedule))
        ));
    }

    #[test]
    fn test_only_turn_holder_reveals() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let card = hidden_card(&session, "b");
        let outcome = session.handle_action("b", Action::RevealCard { card_id: card });
        assert_eq!(outcome.error.as_deref(), Some("Not your turn"));
        assert!(!outcome.state_changed);
    }

    #[test]
    fn test_reveal_moves_to_discussion_and_turn_passes() {
        let (mut session, _, recorder) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let card = hidden_card(&session, "a");
        let outcome = session.handle_action("a", Action::RevealCard { card_id: card.clone() });
        assert!(outcome.state_changed);
        assert_eq!(session.phase(), GamePhase::RevealDiscussion);
        assert!(session.player("a").unwrap().card(&card).unwrap().revealed);

        // default policy lets only the revealer continue
        assert!(session.handle_action("b", Action::ContinueRound).error.is_some());
        assert!(session.handle_action("a", Action::ContinueRound).is_ok());
        assert_eq!(session.phase(), GamePhase::Reveal);
        assert_eq!(session.current_turn(), Some("b"));
        assert_eq!(recorder.change_count(), 2);
    }

    #[test]
    fn test_host_only_continue() {
        let settings = GameSettings {
            continue_permission: ContinuePermission::HostOnly,
            ..GameSettings::default()
        };
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, settings);
        reveal_and_continue(&mut session, "a");

        let card = hidden_card(&session, "b");
        session.handle_action("b", Action::RevealCard { card_id: card });
        assert!(!session.can_continue("b"));
        assert_eq!(
            session.handle_action("b", Action::ContinueRound).error.as_deref(),
            Some("You may not continue the round")
        );
        assert!(session.handle_action("a", Action::ContinueRound).is_ok());
        assert_eq!(session.current_turn(), Some("c"));
    }

    #[test]
    fn test_round_without_votes_goes_to_next_round() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        for id in ["a", "b", "c", "d"] {
            reveal_and_continue(&mut session, id);
        }
        assert_eq!(session.round(), 2);
        assert_eq!(session.phase(), GamePhase::Reveal);
        assert_eq!(session.world().revealed_bunker_count(), 2);
        assert!(session.players().iter().all(|p| !p.revealed_this_round));
    }

    #[test]
    fn test_complete_round_with_budget_opens_voting() {
        let ruleset = Ruleset {
            votes_per_round: vec![1, 1],
            bunker_seats: 2,
            total_exiles: 2,
        };
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], Some(ruleset), GameSettings::default());
        for id in ["a", "b", "c", "d"] {
            reveal_and_continue(&mut session, id);
        }
        assert_eq!(session.phase(), GamePhase::Voting);
        assert_eq!(session.vote_phase(), Some(VotePhase::Voting));
        assert_eq!(session.voting().unwrap().candidates.len(), 4);
    }

    #[test]
    fn test_out_of_band_exile_fast_forwards() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d", "e"], None, GameSettings::default());
        assert_eq!(session.ruleset().votes_per_round, vec![0, 0, 1, 1, 1]);
        assert!(session
            .handle_action("a", Action::DevKickPlayer { target_player_id: "e".into() })
            .is_ok());

        assert_eq!(session.total_exiles(), 1);
        assert_eq!(session.round(), 4);
        assert_eq!(session.phase(), GamePhase::Reveal);
        assert_eq!(session.world().revealed_bunker_count(), 4);
    }

    #[test]
    fn test_dev_skip_round_is_host_only() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        assert_eq!(
            session.handle_action("b", Action::DevSkipRound).error.as_deref(),
            Some("Only the host can do that")
        );
        assert!(session.handle_action("a", Action::DevSkipRound).is_ok());
        assert_eq!(session.round(), 2);
    }

    #[test]
    fn test_mark_left_bunker_by_self() {
        let (mut session, _, recorder) = session_with(&["a", "b", "c", "d", "e"], None, GameSettings::default());
        assert!(session
            .handle_action("c", Action::MarkLeftBunker { target_player_id: "d".into() })
            .error
            .is_some());
        assert!(session
            .handle_action("d", Action::MarkLeftBunker { target_player_id: "d".into() })
            .is_ok());
        assert_eq!(session.player("d").unwrap().status, PlayerStatus::LeftBunker);
        assert!(recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.kind == EventKind::PlayerLeftBunker));

        let again = session.handle_action("a", Action::MarkLeftBunker { target_player_id: "d".into() });
        assert_eq!(again.error.as_deref(), Some("Player has already left the bunker"));
    }

    #[test]
    fn test_leaving_turn_holder_passes_the_turn() {
        let ruleset = Ruleset {
            votes_per_round: vec![2, 1],
            bunker_seats: 1,
            total_exiles: 3,
        };
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], Some(ruleset), GameSettings::default());
        // one exile is still inside round 1's budget
        assert!(session
            .handle_action("a", Action::MarkLeftBunker { target_player_id: "a".into() })
            .is_ok());
        assert_eq!(session.round(), 1);
        assert_eq!(session.current_turn(), Some("b"));
        assert_eq!(session.phase(), GamePhase::Reveal);
    }

    #[test]
    fn test_eliminated_player_cannot_act() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d", "e"], None, GameSettings::default());
        session.handle_action("a", Action::DevKickPlayer { target_player_id: "b".into() });
        let outcome = session.handle_action("b", Action::ContinueRound);
        assert_eq!(outcome.error.as_deref(), Some("You are out of the game"));
    }

    #[test]
    fn test_unknown_player_gets_error() {
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], None, GameSettings::default());
        let outcome = session.handle_action("zzz", Action::ContinueRound);
        assert_eq!(outcome.error.as_deref(), Some("Player not found"));
    }

    #[test]
    fn test_reveal_timeout_reveals_random_card() {
        let settings = GameSettings {
            enable_reveal_discussion_timer: true,
            reveal_discussion_seconds: 30,
            ..GameSettings::default()
        };
        let (mut session, timers, _) = session_with(&["a", "b", "c", "d"], None, settings);
        assert_eq!(session.active_timer().unwrap().kind, TimerKind::RevealTimeout);

        let due = timers.advance(Duration::from_secs(30));
        assert_eq!(due.len(), 1);
        assert!(session.handle_timer(due[0]));
        assert_eq!(session.phase(), GamePhase::RevealDiscussion);
        assert_eq!(session.player("a").unwrap().revealed_count(), 1);
        assert_eq!(session.active_timer().unwrap().kind, TimerKind::RevealDiscussion);

        // the discussion timer moves the turn on
        let due = timers.advance(Duration::from_secs(30));
        assert!(session.handle_timer(due[0]));
        assert_eq!(session.current_turn(), Some("b"));
    }

    #[test]
    fn test_reveal_timeout_can_skip_player() {
        let settings = GameSettings {
            enable_reveal_discussion_timer: true,
            reveal_timeout_action: RevealTimeoutAction::SkipPlayer,
            ..GameSettings::default()
        };
        let (mut session, timers, _) = session_with(&["a", "b", "c", "d"], None, settings);
        let due = timers.advance(Duration::from_secs(60));
        assert!(session.handle_timer(due[0]));
        assert_eq!(session.player("a").unwrap().revealed_count(), 0);
        assert_eq!(session.current_turn(), Some("b"));
        assert_eq!(session.phase(), GamePhase::Reveal);
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let settings = GameSettings {
            enable_reveal_discussion_timer: true,
            ..GameSettings::default()
        };
        let (mut session, timers, recorder) = session_with(&["a", "b", "c", "d"], None, settings);
        let first = session.active_timer().unwrap().token;

        let card = hidden_card(&session, "a");
        session.handle_action("a", Action::RevealCard { card_id: card });
        assert_ne!(session.active_timer().unwrap().token, first);
        assert!(!timers.pending().iter().any(|(t, _)| *t == first));

        let before = recorder.change_count();
        assert!(!session.handle_timer(first));
        assert_eq!(recorder.change_count(), before);
        assert_eq!(session.phase(), GamePhase::RevealDiscussion);
    }

    #[test]
    fn test_post_game_reveal_and_outcome() {
        let ruleset = Ruleset {
            votes_per_round: vec![0],
            bunker_seats: 2,
            total_exiles: 1,
        };
        let (mut session, _, recorder) = session_with(&["a", "b", "c", "d"], Some(ruleset), GameSettings::default());
        session.handle_action("a", Action::DevKickPlayer { target_player_id: "d".into() });
        assert_eq!(session.phase(), GamePhase::Ended);
        assert_eq!(session.winners(), &["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(session.world().revealed_bunker_count(), session.world().bunker.len());
        assert!(recorder.events.lock().unwrap().iter().any(|e| e.kind == EventKind::GameEnd));

        // anyone still at the table may show the rest of their hand
        let card = hidden_card(&session, "c");
        assert!(session.handle_action("c", Action::RevealCard { card_id: card }).is_ok());
        assert_eq!(session.handle_action("c", Action::ContinueRound).error.as_deref(), Some("Game is over"));

        let outcome = Action::SetBunkerOutcome {
            outcome: BunkerOutcome::Survived,
        };
        assert!(session.handle_action("b", outcome.clone()).error.is_some());
        assert!(session.handle_action("a", outcome.clone()).is_ok());
        assert_eq!(
            session.handle_action("a", outcome).error.as_deref(),
            Some("Outcome already chosen")
        );
        assert_eq!(session.post_game().unwrap().outcome, Some(BunkerOutcome::Survived));
    }

    #[test]
    fn test_world_threat_reveal_policy() {
        let ruleset = Ruleset {
            votes_per_round: vec![0],
            bunker_seats: 2,
            total_exiles: 1,
        };
        let (mut session, _, _) = session_with(&["a", "b", "c", "d"], Some(ruleset), GameSettings::default());
        assert_eq!(
            session.handle_action("a", Action::RevealWorldThreat { index: 0 }).error.as_deref(),
            Some("The game has not ended yet")
        );
        session.handle_action("a", Action::DevKickPlayer { target_player_id: "d".into() });

        assert!(session.handle_action("b", Action::RevealWorldThreat { index: 0 }).error.is_some());
        assert!(session.handle_action("a", Action::RevealWorldThreat { index: 0 }).state_changed);
        assert!(!session.handle_action("a", Action::RevealWorldThreat { index: 0 }).state_changed);
        assert_eq!(session.world().threats[0].revealed_by.as_deref(), Some("a"));

        let past_end = session.world().threat_modifier().final_count;
        assert_eq!(
            session.handle_action("a", Action::RevealWorldThreat { index: past_end }).error.as_deref(),
            Some("No such threat card")
        );
    }
}
