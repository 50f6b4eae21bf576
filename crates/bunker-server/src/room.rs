//! Game room management.

use bunker_core::ruleset::{MAX_PLAYERS, MIN_PLAYERS};
use bunker_core::{
    standard_catalog, Action, ActionOutcome, CardCatalog, GameError, GamePhase, GameSession, GameSettings,
    GameView, PlayerSeat, Ruleset, SessionConfig, SessionContext, TimerToken,
};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::protocol::{PlayerInfo, RoomInfo, RoomStatus};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room is full")]
    RoomFull,

    #[error("Player not in room")]
    PlayerNotInRoom,

    #[error("Not the host")]
    NotHost,

    #[error("Game already started")]
    GameAlreadyStarted,

    #[error("Need at least {0} players")]
    NotEnoughPlayers(usize),

    #[error("Game not started")]
    GameNotStarted,

    #[error(transparent)]
    Game(#[from] GameError),
}

/// A player in a game room.
#[derive(Debug, Clone)]
pub struct RoomPlayer {
    pub id: Uuid,
    pub name: String,
    pub connected: bool,
}

impl RoomPlayer {
    pub fn new(id: Uuid, name: String) -> Self {
        Self {
            id,
            name,
            connected: true,
        }
    }

    pub fn to_info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            connected: self.connected,
        }
    }
}

/// Host choices for a new game
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub settings: Option<GameSettings>,
    pub ruleset: Option<Ruleset>,
}

/// A lobby that turns into one engine session once the host starts.
pub struct GameRoom {
    pub code: String,
    pub host_id: Uuid,
    pub status: RoomStatus,
    pub players: HashMap<Uuid, RoomPlayer>,
    /// Join order, which becomes seat order
    pub player_order: Vec<Uuid>,
    session: Option<Mutex<GameSession>>,
}

impl GameRoom {
    pub fn new(code: String, host_id: Uuid, host_name: String) -> Self {
        let mut players = HashMap::new();
        players.insert(host_id, RoomPlayer::new(host_id, host_name));

        Self {
            code,
            host_id,
            status: RoomStatus::Waiting,
            players,
            player_order: vec![host_id],
            session: None,
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    pub fn add_player(&mut self, player_id: Uuid, name: String) -> Result<(), RoomError> {
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::GameAlreadyStarted);
        }
        if self.is_full() {
            return Err(RoomError::RoomFull);
        }

        self.players.insert(player_id, RoomPlayer::new(player_id, name));
        self.player_order.push(player_id);
        Ok(())
    }

    /// Remove a player from the lobby. Once a game runs the seat stays and
    /// the player is only flagged as disconnected.
    ///
    /// Returns true when nobody is left.
    pub fn remove_player(&mut self, player_id: Uuid) -> Result<bool, RoomError> {
        if !self.players.contains_key(&player_id) {
            return Err(RoomError::PlayerNotInRoom);
        }

        if self.session.is_some() {
            self.set_player_connected(player_id, false);
        } else {
            self.players.remove(&player_id);
            self.player_order.retain(|&id| id != player_id);
        }

        if player_id == self.host_id {
            self.reassign_host();
        }

        Ok(self.players.values().all(|p| !p.connected))
    }

    pub fn set_player_connected(&mut self, player_id: Uuid, connected: bool) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.connected = connected;
        }
    }

    fn reassign_host(&mut self) {
        let next = self
            .player_order
            .iter()
            .find(|id| self.players.get(id).map_or(false, |p| p.connected))
            .copied();
        let Some(next) = next else {
            return;
        };
        self.host_id = next;
        if let Some(session) = self.session.as_mut() {
            session
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .set_host(next.to_string());
        }
        info!(room = %self.code, host = %next, "host reassigned");
    }

    pub fn start_game(
        &mut self,
        requester_id: Uuid,
        options: StartOptions,
        catalog: CardCatalog,
        context: SessionContext,
    ) -> Result<(), RoomError> {
        if requester_id != self.host_id {
            return Err(RoomError::NotHost);
        }
        if self.status != RoomStatus::Waiting {
            return Err(RoomError::GameAlreadyStarted);
        }
        if self.players.len() < MIN_PLAYERS {
            return Err(RoomError::NotEnoughPlayers(MIN_PLAYERS));
        }

        let seats = self
            .player_order
            .iter()
            .filter_map(|id| self.players.get(id))
            .map(|p| PlayerSeat::new(p.id.to_string(), p.name.clone()))
            .collect();
        let config = SessionConfig {
            room_code: self.code.clone(),
            host_id: self.host_id.to_string(),
            players: seats,
            catalog,
            specials: standard_catalog(),
            settings: options.settings.unwrap_or_default(),
            ruleset: options.ruleset,
        };

        let session = GameSession::new(config, context)?;
        info!(room = %self.code, players = self.players.len(), "game started");
        self.session = Some(Mutex::new(session));
        self.status = RoomStatus::InGame;
        Ok(())
    }

    fn session_mut(&mut self) -> Result<&mut GameSession, RoomError> {
        let session = self.session.as_mut().ok_or(RoomError::GameNotStarted)?;
        Ok(session.get_mut().unwrap_or_else(PoisonError::into_inner))
    }

    fn refresh_status(&mut self) {
        let ended = self
            .session_mut()
            .map(|s| s.phase() == GamePhase::Ended)
            .unwrap_or(false);
        if ended {
            self.status = RoomStatus::Finished;
        }
    }

    pub fn apply_action(&mut self, player_id: Uuid, action: Action) -> Result<ActionOutcome, RoomError> {
        if !self.players.contains_key(&player_id) {
            return Err(RoomError::PlayerNotInRoom);
        }
        let outcome = self.session_mut()?.handle_action(&player_id.to_string(), action);
        self.refresh_status();
        Ok(outcome)
    }

    pub fn handle_timer(&mut self, token: TimerToken) -> bool {
        let Ok(session) = self.session_mut() else {
            return false;
        };
        let changed = session.handle_timer(token);
        self.refresh_status();
        changed
    }

    /// Each member's view, in seat order
    pub fn views(&mut self) -> Vec<(Uuid, GameView)> {
        let order = self.player_order.clone();
        let Ok(session) = self.session_mut() else {
            return Vec::new();
        };
        order
            .into_iter()
            .map(|id| (id, session.get_game_view(&id.to_string())))
            .collect()
    }

    pub fn to_info(&self) -> RoomInfo {
        RoomInfo {
            code: self.code.clone(),
            players: self
                .player_order
                .iter()
                .filter_map(|id| self.players.get(id).map(|p| p.to_info()))
                .collect(),
            max_players: MAX_PLAYERS,
            host_id: self.host_id,
            status: self.status,
        }
    }
}
