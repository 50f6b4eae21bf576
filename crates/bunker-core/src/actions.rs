//! Actions players submit and the events they produce.
//!
//! Actions arrive as `{"type": "...", "payload": {...}}`. Events are the
//! human-readable feed shown to the room; they are not logs.

use crate::player::PlayerId;
use crate::specials::SpecialPayload;
use serde::{Deserialize, Serialize};

/// Outcome a host may record once the game is over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BunkerOutcome {
    Survived,
    Failed,
}

/// Everything a player can ask the session to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Action {
    // ==================== Turn Actions ====================
    /// Reveal one hidden card from your own hand
    #[serde(rename_all = "camelCase")]
    RevealCard { card_id: String },
    /// Move on from discussion
    ContinueRound,

    // ==================== Voting ====================
    /// Vote to exile another player
    #[serde(rename_all = "camelCase")]
    Vote { target_player_id: PlayerId },
    /// Close the special-condition window and resolve the vote
    FinalizeVoting,

    // ==================== Special Conditions ====================
    /// Play one of your special-condition cards
    #[serde(rename_all = "camelCase")]
    ApplySpecial {
        special_instance_id: String,
        #[serde(default)]
        payload: SpecialPayload,
    },

    // ==================== After the Game ====================
    /// Turn over a threat card
    RevealWorldThreat { index: usize },
    /// Record whether the bunker survived
    SetBunkerOutcome { outcome: BunkerOutcome },

    // ==================== Host Controls ====================
    /// Remove a player from the game without counting them as a survivor
    #[serde(rename_all = "camelCase")]
    MarkLeftBunker { target_player_id: PlayerId },
    /// Jump straight to the next round
    DevSkipRound,
    /// Eliminate a player outside of voting
    #[serde(rename_all = "camelCase")]
    DevKickPlayer { target_player_id: PlayerId },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::RevealCard { .. } => "revealCard",
            Action::ContinueRound => "continueRound",
            Action::Vote { .. } => "vote",
            Action::FinalizeVoting => "finalizeVoting",
            Action::ApplySpecial { .. } => "applySpecial",
            Action::RevealWorldThreat { .. } => "revealWorldThreat",
            Action::SetBunkerOutcome { .. } => "setBunkerOutcome",
            Action::MarkLeftBunker { .. } => "markLeftBunker",
            Action::DevSkipRound => "devSkipRound",
            Action::DevKickPlayer { .. } => "devKickPlayer",
        }
    }

    /// Actions allowed regardless of the caller's status or the phase
    pub(crate) fn is_control(&self) -> bool {
        matches!(
            self,
            Action::MarkLeftBunker { .. }
                | Action::RevealWorldThreat { .. }
                | Action::SetBunkerOutcome { .. }
                | Action::DevSkipRound
                | Action::DevKickPlayer { .. }
        )
    }
}

/// Result of `GameSession::handle_action`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub state_changed: bool,
}

impl ActionOutcome {
    pub fn changed(state_changed: bool) -> Self {
        Self {
            error: None,
            state_changed,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            state_changed: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Tag for the event feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    RoundStart,
    VotingStart,
    Elimination,
    GameEnd,
    PlayerLeftBunker,
}

/// One line of the room's event feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    pub id: String,
    pub kind: EventKind,
    pub message: String,
    pub created_at_ms: u64,
}
