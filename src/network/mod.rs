//! Network Layer
//!
//! Host-authoritative online play over any reliable, ordered transport.
//! This layer is **non-deterministic** - all game logic runs through `game/`.
//!
//! ## Module Structure
//!
//! - `protocol`: JSON wire messages
//! - `transport`: Transport trait and in-memory transport
//! - `server`: WebSocket host
//! - `client`: WebSocket client
//! - `lobby`: Membership, ready state and slot assignment
//! - `session`: Host and client session logic
//! - `driver`: Tokio loops owning running sessions

pub mod protocol;
pub mod transport;
pub mod server;
pub mod client;
pub mod lobby;
pub mod session;
pub mod driver;

pub use protocol::{NetMessage, PeerId, StartGame};
pub use transport::{MemoryTransport, SharedTransport, Transport, TransportError, TransportEvent};
pub use server::{NetError, ServerConfig, WsHost};
pub use client::{WsClient, HOST_PEER};
pub use lobby::{generate_room_code, ClientLobby, Lobby, LobbyError};
pub use session::{ClientSession, HostSession, SessionConfig, SessionError};
pub use driver::{spawn_client, spawn_host, spawn_local, Command, RoundHandle, SessionEvent, StartTrigger};
