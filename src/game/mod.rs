//! Game Logic Module
//!
//! All round simulation code. Deterministic given state, intents and clock.
//!
//! ## Module Structure
//!
//! - `state`: Players, configuration, roster, round state
//! - `input`: Turn intents, local controls, intent cache and log
//! - `collision`: Head-vs-trail tests
//! - `tick`: Authoritative simulation step
//! - `lifecycle`: Round end, countdown and restart
//! - `arena`: Owner of rounds across a session
//! - `events`: Game events for renderers and replay

pub mod state;
pub mod input;
pub mod collision;
pub mod tick;
pub mod lifecycle;
pub mod arena;
pub mod events;

// Re-export key types
pub use state::{
    ConfigError, ControlSource, GameConfig, GameState, Player, PlayerId, Roster, RoundOutcome,
    RoundState, TrailPoint, WorldSize,
};
pub use input::{ControlEvent, IntentCache, IntentLog, LocalControls, TurnIntent};
pub use collision::{check_collision, CollisionConfig};
pub use tick::{tick, replay_round, TickResult};
pub use lifecycle::{Lifecycle, Phase, Transition};
pub use arena::{Arena, ArenaUpdate};
pub use events::GameEvent;
