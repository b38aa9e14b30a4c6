//! Game Events
//!
//! Events generated during simulation for renderers, replay and verification.

use serde::{Serialize, Deserialize};
use crate::game::state::{PlayerId, RoundOutcome};

/// Priority for event processing order.
///
/// Lower value = processed first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventPriority {
    /// Deaths first
    PlayerElimination = 0,
    /// Survival-mode resets
    PlayerRespawn = 1,
    /// Round end is always last in its tick
    RoundEnd = 255,
}

/// Why a player died.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EliminationCause {
    /// Head came within reach of a solid trail
    TrailCollision,
    /// Position or heading stopped being finite
    InvalidState,
}

/// Game event data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GameEventData {
    /// Player was eliminated
    PlayerEliminated {
        /// Player that died
        player_id: PlayerId,
        /// Owner of the trail that was hit
        killer_id: Option<PlayerId>,
        /// Death position X
        x: f64,
        /// Death position Y
        y: f64,
        /// What killed it
        cause: EliminationCause,
    },

    /// Single player hit a trail and went back to spawn
    PlayerRespawned {
        /// Player sent back to spawn
        player_id: PlayerId,
    },

    /// At most one player left alive
    RoundEnded {
        /// Winner or draw
        outcome: RoundOutcome,
        /// Ticks the round lasted
        duration_ticks: u32,
    },
}

/// A game event with timing and priority.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when event occurred
    pub tick: u32,

    /// Processing priority
    pub priority: EventPriority,

    /// Player involved (for tie-breaking)
    pub player_id: Option<PlayerId>,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u32, priority: EventPriority, data: GameEventData) -> Self {
        let player_id = match &data {
            GameEventData::PlayerEliminated { player_id, .. } => Some(*player_id),
            GameEventData::PlayerRespawned { player_id } => Some(*player_id),
            GameEventData::RoundEnded { outcome, .. } => outcome.winner(),
        };

        Self {
            tick,
            priority,
            player_id,
            data,
        }
    }

    /// Create player eliminated event.
    pub fn player_eliminated(
        tick: u32,
        player_id: PlayerId,
        killer_id: Option<PlayerId>,
        position: (f64, f64),
        cause: EliminationCause,
    ) -> Self {
        Self::new(
            tick,
            EventPriority::PlayerElimination,
            GameEventData::PlayerEliminated {
                player_id,
                killer_id,
                x: position.0,
                y: position.1,
                cause,
            },
        )
    }

    /// Create player respawned event.
    pub fn player_respawned(tick: u32, player_id: PlayerId) -> Self {
        Self::new(
            tick,
            EventPriority::PlayerRespawn,
            GameEventData::PlayerRespawned { player_id },
        )
    }

    /// Create round ended event.
    pub fn round_ended(tick: u32, outcome: RoundOutcome) -> Self {
        Self::new(
            tick,
            EventPriority::RoundEnd,
            GameEventData::RoundEnded {
                outcome,
                duration_ticks: tick,
            },
        )
    }
}

impl PartialEq for GameEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick
            && self.priority == other.priority
            && self.player_id == other.player_id
    }
}

impl Eq for GameEvent {}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Sort by: tick, then priority, then player_id
        self.tick
            .cmp(&other.tick)
            .then(self.priority.cmp(&other.priority))
            .then(self.player_id.cmp(&other.player_id))
    }
}
