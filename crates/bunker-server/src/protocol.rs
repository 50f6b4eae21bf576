//! WebSocket protocol messages for Bunker rooms.

use bunker_core::{Action, ActionOutcome, GameEvent, GameSettings, GameView, Ruleset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Create a new room and join it as host
    CreateRoom { player_name: String },

    /// Join an existing room by its code
    JoinRoom { room_code: String, player_name: String },

    /// Leave current room
    LeaveRoom,

    /// Start the game (host only)
    StartGame {
        #[serde(default)]
        settings: Option<GameSettings>,
        #[serde(default)]
        ruleset: Option<Ruleset>,
    },

    /// Submit a game action
    GameAction { action: Action },

    /// Request room list
    ListRooms,

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Welcome message with assigned player ID
    Welcome { player_id: Uuid },

    /// Room created successfully
    RoomCreated { room_code: String },

    /// Joined room successfully
    JoinedRoom { room: RoomInfo },

    /// Left room successfully
    LeftRoom,

    /// Room membership or status changed
    RoomUpdated { room: RoomInfo },

    /// The host started the game
    GameStarted { room_code: String },

    /// This player's projection of the session
    GameView { view: Box<GameView> },

    /// Result of the player's last action
    ActionResult { outcome: ActionOutcome },

    /// A line for the room's event feed
    Event { event: GameEvent },

    /// List of rooms still in the lobby
    RoomList { rooms: Vec<RoomInfo> },

    /// Error occurred
    Error { message: String },

    /// Pong response
    Pong,
}

/// Room information for clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub code: String,
    pub players: Vec<PlayerInfo>,
    pub max_players: usize,
    pub host_id: Uuid,
    pub status: RoomStatus,
}

/// Player information in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: Uuid,
    pub name: String,
    pub connected: bool,
}

/// Room status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Waiting,
    InGame,
    Finished,
}
