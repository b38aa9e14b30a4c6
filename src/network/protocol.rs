//! Protocol Messages
//!
//! Wire format between host and clients. Every message is a JSON object
//! with a `type` discriminator; field names are camelCase.

use std::fmt;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::game::input::TurnIntent;
use crate::game::lifecycle::Transition;
use crate::game::state::{ControlSource, GameConfig, GameState, PlayerId, RoundOutcome};

// =============================================================================
// PEER ID
// =============================================================================

/// Transport-level identity of a connected peer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Every message exchanged between host and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NetMessage {
    /// Client → host: current intent of the client's slot.
    Input(InputMessage),

    /// Host → clients: full authoritative player set.
    State(StateMessage),

    /// Host → clients: round over.
    GameEnd(GameEndMessage),

    /// Host → clients: restart countdown began.
    StartCountdown,

    /// Host → clients: fresh round started.
    RestartGame,

    /// Host → clients: session over.
    BackToLobby,

    /// Client → host: request to join the lobby.
    PlayerJoin(PlayerJoin),

    /// Client → host: ready toggle.
    PlayerReady(PlayerReady),

    /// Host → clients: current lobby roster.
    PlayerList(PlayerList),

    /// Host → clients: slot assignments, first round begins.
    StartGame(StartGame),
}

/// Turn intent of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMessage {
    /// Sender's slot
    pub player_id: PlayerId,
    /// Steer left
    pub turn_left: bool,
    /// Steer right
    pub turn_right: bool,
    /// Sender's clock (informational)
    pub timestamp: u64,
}

impl InputMessage {
    /// Build from an intent.
    pub fn new(player_id: PlayerId, intent: TurnIntent, timestamp: u64) -> Self {
        Self {
            player_id,
            turn_left: intent.turn_left,
            turn_right: intent.turn_right,
            timestamp,
        }
    }

    /// Extract the intent.
    pub fn intent(&self) -> TurnIntent {
        TurnIntent::new(self.turn_left, self.turn_right)
    }
}

/// Snapshot wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    /// Complete player set
    pub state: GameState,
}

/// Round result. `winnerId` is absent on a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndMessage {
    /// Surviving slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<PlayerId>,
}

/// Lobby join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoin {
    /// Display name
    pub player_name: String,
    /// Sender's peer id
    pub peer_id: PeerId,
    /// Input device the player will use
    pub control_type: ControlSource,
}

/// Lobby ready toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReady {
    /// Sender's peer id
    pub peer_id: PeerId,
    /// New ready state
    pub ready: bool,
}

/// One lobby member as shown to everyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyMember {
    /// Member's peer id
    pub peer_id: PeerId,
    /// Display name
    pub player_name: String,
    /// Ready toggle
    pub ready: bool,
    /// Slot, once assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    /// Input device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<ControlSource>,
}

/// Lobby roster broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerList {
    /// Members in join order
    pub players: Vec<LobbyMember>,
}

/// Slot given to one peer for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAssignment {
    /// Peer the slot belongs to
    pub peer_id: PeerId,
    /// Assigned slot
    pub player_id: PlayerId,
    /// Display name
    pub player_name: String,
    /// Input device
    pub control_type: ControlSource,
}

/// Session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGame {
    /// Round configuration
    pub config: GameConfig,
    /// One entry per member, join order
    pub player_assignments: Vec<PlayerAssignment>,
}

impl StartGame {
    /// Assignment of a peer.
    pub fn assignment_for(&self, peer: &PeerId) -> Option<&PlayerAssignment> {
        self.player_assignments.iter().find(|a| &a.peer_id == peer)
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl NetMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Deserialize from UTF-8 JSON bytes (binary frames).
    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Lifecycle transition carried by this message, if any.
    pub fn transition(&self) -> Option<Transition> {
        match self {
            NetMessage::GameEnd(end) => Some(Transition::RoundEnded(
                end.winner_id.map(RoundOutcome::Winner).unwrap_or(RoundOutcome::Draw),
            )),
            NetMessage::StartCountdown => Some(Transition::CountdownStarted),
            NetMessage::RestartGame => Some(Transition::RoundRestarted),
            NetMessage::BackToLobby => Some(Transition::ReturnedToLobby),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NetMessage::Input(_) => "input",
            NetMessage::State(_) => "state",
            NetMessage::GameEnd(_) => "game-end",
            NetMessage::StartCountdown => "start-countdown",
            NetMessage::RestartGame => "restart-game",
            NetMessage::BackToLobby => "back-to-lobby",
            NetMessage::PlayerJoin(_) => "player-join",
            NetMessage::PlayerReady(_) => "player-ready",
            NetMessage::PlayerList(_) => "player-list",
            NetMessage::StartGame(_) => "start-game",
        }
    }
}

impl From<Transition> for NetMessage {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::RoundEnded(outcome) => {
                NetMessage::GameEnd(GameEndMessage { winner_id: outcome.winner() })
            }
            Transition::CountdownStarted => NetMessage::StartCountdown,
            Transition::RoundRestarted => NetMessage::RestartGame,
            Transition::ReturnedToLobby => NetMessage::BackToLobby,
        }
    }
}

impl From<GameState> for NetMessage {
    fn from(state: GameState) -> Self {
        NetMessage::State(StateMessage { state })
    }
}

// =============================================================================
// TESTS
// =============================================================================
