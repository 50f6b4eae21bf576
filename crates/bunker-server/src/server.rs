//! WebSocket server and connection handling.

use crate::protocol::{ClientMessage, RoomInfo, RoomStatus, ServerMessage};
use crate::room::{GameRoom, StartOptions};
use crate::timers::{ChannelObserver, RoomSignal, TokioTimers};
use bunker_core::{CardCatalog, SessionContext};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Server state shared across all connections.
pub struct ServerState {
    /// All active rooms by code
    pub rooms: DashMap<String, GameRoom>,
    /// Mapping from player ID to their room code
    pub player_rooms: DashMap<Uuid, String>,
    /// Mapping from player ID to their message sender
    pub player_senders: DashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>,
    /// Cards every new session is dealt from
    pub catalog: CardCatalog,
}

impl ServerState {
    pub fn new(catalog: CardCatalog) -> Self {
        Self {
            rooms: DashMap::new(),
            player_rooms: DashMap::new(),
            player_senders: DashMap::new(),
            catalog,
        }
    }

    /// Send a message to a specific player.
    pub fn send_to_player(&self, player_id: Uuid, msg: ServerMessage) {
        if let Some(sender) = self.player_senders.get(&player_id) {
            let _ = sender.send(msg);
        }
    }

    fn send_error(&self, player_id: Uuid, message: impl ToString) {
        self.send_to_player(
            player_id,
            ServerMessage::Error {
                message: message.to_string(),
            },
        );
    }

    /// Broadcast a message to all players in a room.
    pub fn broadcast_to_room(&self, code: &str, msg: ServerMessage) {
        let members: Vec<Uuid> = match self.rooms.get(code) {
            Some(room) => room.player_order.clone(),
            None => return,
        };
        for player_id in members {
            self.send_to_player(player_id, msg.clone());
        }
    }

    /// Broadcast a message to all players in a room except one.
    pub fn broadcast_to_room_except(&self, code: &str, except: Uuid, msg: ServerMessage) {
        let members: Vec<Uuid> = match self.rooms.get(code) {
            Some(room) => room.player_order.clone(),
            None => return,
        };
        for player_id in members.into_iter().filter(|id| *id != except) {
            self.send_to_player(player_id, msg.clone());
        }
    }

    /// Push every member their own view of the session.
    pub fn push_views(&self, code: &str) {
        let views = match self.rooms.get_mut(code) {
            Some(mut room) => room.views(),
            None => return,
        };
        for (player_id, view) in views {
            self.send_to_player(player_id, ServerMessage::GameView { view: Box::new(view) });
        }
    }

    /// Get list of waiting rooms.
    pub fn get_waiting_rooms(&self) -> Vec<RoomInfo> {
        self.rooms
            .iter()
            .filter(|r| r.status == RoomStatus::Waiting)
            .map(|r| r.to_info())
            .collect()
    }

    fn unused_room_code(&self) -> String {
        loop {
            let code: String = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

/// Run the WebSocket server.
pub async fn run_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Bunker server listening on {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New WebSocket connection from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Assign a player ID
    let player_id = Uuid::new_v4();

    // Create channel for outgoing messages
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.player_senders.insert(player_id, tx);

    let welcome = ServerMessage::Welcome { player_id };
    ws_sender.send(Message::Text(serde_json::to_string(&welcome)?)).await?;

    // Forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to encode message: {}", e),
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_message(player_id, client_msg, &state),
                Err(e) => {
                    warn!("Invalid message from {}: {}", player_id, e);
                    state.send_error(player_id, format!("Invalid message: {e}"));
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client {} closing connection", player_id);
                break;
            }
            Ok(Message::Ping(_)) => {
                state.send_to_player(player_id, ServerMessage::Pong);
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", player_id, e);
                break;
            }
            _ => {}
        }
    }

    // Clean up on disconnect
    leave_room(player_id, &state);
    state.player_senders.remove(&player_id);
    send_task.abort();

    info!("Connection closed for {}", player_id);
    Ok(())
}

/// Apply session signals for one room until its session is dropped.
async fn drive_room(code: String, mut signals: mpsc::UnboundedReceiver<RoomSignal>, state: Arc<ServerState>) {
    while let Some(signal) = signals.recv().await {
        match signal {
            RoomSignal::TimerFired(token) => {
                let Some(mut room) = state.rooms.get_mut(&code) else {
                    break;
                };
                room.handle_timer(token);
            }
            RoomSignal::Event(event) => {
                state.broadcast_to_room(&code, ServerMessage::Event { event });
            }
            RoomSignal::StateChanged => state.push_views(&code),
        }
    }
    debug!(room = %code, "room driver stopped");
}

/// Handle a client message.
fn handle_message(player_id: Uuid, msg: ClientMessage, state: &Arc<ServerState>) {
    match msg {
        ClientMessage::CreateRoom { player_name } => {
            if state.player_rooms.contains_key(&player_id) {
                state.send_error(player_id, "Already in a room");
                return;
            }
            let code = state.unused_room_code();
            let room = GameRoom::new(code.clone(), player_id, player_name);
            let room_info = room.to_info();

            state.rooms.insert(code.clone(), room);
            state.player_rooms.insert(player_id, code.clone());
            info!(room = %code, host = %player_id, "room created");

            state.send_to_player(player_id, ServerMessage::RoomCreated { room_code: code });
            state.send_to_player(player_id, ServerMessage::JoinedRoom { room: room_info });
        }

        ClientMessage::JoinRoom { room_code, player_name } => {
            if state.player_rooms.contains_key(&player_id) {
                state.send_error(player_id, "Already in a room");
                return;
            }
            let code = room_code.to_uppercase();
            let Some(mut room) = state.rooms.get_mut(&code) else {
                state.send_error(player_id, "Room not found");
                return;
            };
            match room.add_player(player_id, player_name) {
                Ok(()) => {
                    let room_info = room.to_info();
                    drop(room); // Release lock before broadcasting
                    state.player_rooms.insert(player_id, code.clone());

                    state.send_to_player(player_id, ServerMessage::JoinedRoom { room: room_info.clone() });
                    state.broadcast_to_room_except(&code, player_id, ServerMessage::RoomUpdated { room: room_info });
                }
                Err(e) => {
                    drop(room);
                    state.send_error(player_id, e);
                }
            }
        }

        ClientMessage::LeaveRoom => {
            leave_room(player_id, state);
            state.send_to_player(player_id, ServerMessage::LeftRoom);
        }

        ClientMessage::StartGame { settings, ruleset } => {
            let Some(code) = state.player_rooms.get(&player_id).map(|c| c.clone()) else {
                state.send_error(player_id, "Not in a room");
                return;
            };
            let Some(mut room) = state.rooms.get_mut(&code) else {
                return;
            };

            let (tx, rx) = mpsc::unbounded_channel();
            let context = SessionContext {
                rng: Box::new(StdRng::from_entropy()),
                timers: Box::new(TokioTimers::new(tx.clone())),
                observer: Box::new(ChannelObserver::new(tx)),
            };
            let options = StartOptions { settings, ruleset };
            match room.start_game(player_id, options, state.catalog.clone(), context) {
                Ok(()) => {
                    let room_info = room.to_info();
                    drop(room);
                    tokio::spawn(drive_room(code.clone(), rx, Arc::clone(state)));
                    state.broadcast_to_room(&code, ServerMessage::GameStarted { room_code: code.clone() });
                    state.broadcast_to_room(&code, ServerMessage::RoomUpdated { room: room_info });
                }
                Err(e) => {
                    drop(room);
                    warn!(room = %code, "start failed: {}", e);
                    state.send_error(player_id, e);
                }
            }
        }

        ClientMessage::GameAction { action } => {
            let Some(code) = state.player_rooms.get(&player_id).map(|c| c.clone()) else {
                state.send_error(player_id, "Not in a room");
                return;
            };
            let Some(mut room) = state.rooms.get_mut(&code) else {
                return;
            };
            debug!(room = %code, player = %player_id, action = action.name(), "game action");
            let result = room.apply_action(player_id, action);
            drop(room);

            // Views and events follow through the room driver
            match result {
                Ok(outcome) => state.send_to_player(player_id, ServerMessage::ActionResult { outcome }),
                Err(e) => state.send_error(player_id, e),
            }
        }

        ClientMessage::ListRooms => {
            let rooms = state.get_waiting_rooms();
            state.send_to_player(player_id, ServerMessage::RoomList { rooms });
        }

        ClientMessage::Ping => {
            state.send_to_player(player_id, ServerMessage::Pong);
        }
    }
}

/// Take a player out of their room, dropping the room once nobody is left.
///
/// During a game the seat is kept and only flagged as disconnected.
fn leave_room(player_id: Uuid, state: &Arc<ServerState>) {
    let Some((_, code)) = state.player_rooms.remove(&player_id) else {
        return;
    };
    let outcome = state.rooms.get_mut(&code).map(|mut room| {
        let empty = room.remove_player(player_id).unwrap_or(false);
        (empty, room.to_info())
    });
    match outcome {
        Some((true, _)) => {
            state.rooms.remove(&code);
            info!(room = %code, "room closed");
        }
        Some((false, room_info)) => {
            state.broadcast_to_room(&code, ServerMessage::RoomUpdated { room: room_info });
            state.push_views(&code);
        }
        None => {}
    }
}

