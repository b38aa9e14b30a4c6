//! # Kurve
//!
//! Real-time trail arena: every player steers a point that never stops
//! and leaves a trail. Touching any trail kills; the last player alive
//! wins the round.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          KURVE                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── geometry.rs - Distances and toroidal wrap               │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for verification            │
//! │                                                              │
//! │  game/           - Game logic (deterministic)                │
//! │  ├── state.rs    - Config, players, round state              │
//! │  ├── input.rs    - Turn intents and local controls           │
//! │  ├── collision.rs- Head vs trail tests                       │
//! │  ├── tick.rs     - Authoritative simulation step             │
//! │  ├── lifecycle.rs- Round end, countdown, restart             │
//! │  └── arena.rs    - Rounds across a session                   │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── protocol.rs - JSON messages                             │
//! │  ├── transport.rs- Transport trait, in-memory transport      │
//! │  ├── server.rs   - WebSocket host                            │
//! │  ├── client.rs   - WebSocket client                          │
//! │  ├── lobby.rs    - Room membership                           │
//! │  ├── session.rs  - Host and client sessions                  │
//! │  └── driver.rs   - Tokio session loops                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are deterministic:
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - The clock is an input, never read inside a tick
//! - All randomness from a per-round seeded Xorshift128+
//!
//! Given the same round state, intents and clock values, a tick produces
//! the same players on every run.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::arena::Arena;
pub use game::input::{ControlEvent, TurnIntent};
pub use game::state::{ControlSource, GameConfig, GameState, Player, PlayerId, WorldSize};
pub use game::tick::{TICK_RATE, TURN_SPEED};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
