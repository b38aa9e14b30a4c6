//! Online Lobby
//!
//! Membership before the first round: joins, ready toggles and slot
//! assignment. The host owns the authoritative [`Lobby`]; clients keep
//! a [`ClientLobby`] mirror that is replaced by every `player-list`.

use tracing::{info, debug};
use uuid::Uuid;

use crate::game::state::{ConfigError, ControlSource, GameConfig, PlayerId, MAX_PLAYERS};
use crate::network::protocol::{
    LobbyMember, NetMessage, PeerId, PlayerAssignment, PlayerJoin, PlayerList, PlayerReady,
    StartGame,
};

/// Prefix of every room code.
pub const ROOM_CODE_PREFIX: &str = "KURVE-";

/// Random characters after the prefix.
pub const ROOM_CODE_LEN: usize = 6;

const ROOM_CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Minimum members for an online session.
pub const MIN_MEMBERS: usize = 2;

/// Fresh room code, e.g. `KURVE-7QX2KD`.
pub fn generate_room_code() -> String {
    let random = Uuid::new_v4();
    let suffix: String = random
        .as_bytes()
        .iter()
        .take(ROOM_CODE_LEN)
        .map(|b| ROOM_CODE_ALPHABET[*b as usize % ROOM_CODE_ALPHABET.len()] as char)
        .collect();
    format!("{ROOM_CODE_PREFIX}{suffix}")
}

/// Lobby errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LobbyError {
    /// Four members already.
    #[error("lobby is full")]
    RoomFull,

    /// Peer joined twice.
    #[error("peer {0} already joined")]
    AlreadyJoined(PeerId),

    /// Peer never joined.
    #[error("peer {0} is not in the lobby")]
    UnknownPeer(PeerId),

    /// Claimed peer id does not match the connection.
    #[error("peer {actual} sent a message for {claimed}")]
    Impersonation {
        /// Connection the message came from
        actual: PeerId,
        /// Peer id inside the message
        claimed: PeerId,
    },

    /// Not enough members to start.
    #[error("need at least 2 members, have {0}")]
    NotEnoughPlayers(usize),

    /// Someone is not ready.
    #[error("not every member is ready")]
    NotAllReady,

    /// Invalid round configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Lobby closed (host left or session started).
    #[error("lobby closed")]
    Closed,
}

// =============================================================================
// HOST LOBBY
// =============================================================================

/// Authoritative lobby, owned by the host. The host is member 0.
#[derive(Debug, Clone)]
pub struct Lobby {
    room_code: String,
    host: PeerId,
    config: GameConfig,
    members: Vec<LobbyMember>,
}

impl Lobby {
    /// Open a lobby with the host as its first member.
    pub fn open(
        room_code: String,
        host: PeerId,
        host_name: String,
        host_control: ControlSource,
        config: GameConfig,
    ) -> Self {
        info!("Lobby {} opened", room_code);
        let members = vec![LobbyMember {
            peer_id: host.clone(),
            player_name: host_name,
            ready: false,
            player_id: None,
            control_type: Some(host_control),
        }];
        Self { room_code, host, config, members }
    }

    /// Room code for sharing.
    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    /// Host's peer id.
    pub fn host(&self) -> &PeerId {
        &self.host
    }

    /// Members in join order.
    pub fn members(&self) -> &[LobbyMember] {
        &self.members
    }

    /// Update the round configuration (player count follows membership).
    pub fn set_config(&mut self, config: GameConfig) {
        self.config = config;
    }

    /// Add a member. Names and control types come from the request; the
    /// peer id comes from the connection.
    pub fn join(&mut self, from: &PeerId, join: PlayerJoin) -> Result<NetMessage, LobbyError> {
        if &join.peer_id != from {
            return Err(LobbyError::Impersonation { actual: from.clone(), claimed: join.peer_id });
        }
        if self.member(from).is_some() {
            return Err(LobbyError::AlreadyJoined(from.clone()));
        }
        if self.members.len() >= MAX_PLAYERS as usize {
            return Err(LobbyError::RoomFull);
        }

        info!("{} joined lobby {} as {}", from, self.room_code, join.player_name);
        self.members.push(LobbyMember {
            peer_id: from.clone(),
            player_name: join.player_name,
            ready: false,
            player_id: None,
            control_type: Some(join.control_type),
        });
        Ok(self.player_list())
    }

    /// Set a member's ready flag.
    pub fn set_ready(&mut self, from: &PeerId, ready: PlayerReady) -> Result<NetMessage, LobbyError> {
        if &ready.peer_id != from {
            return Err(LobbyError::Impersonation { actual: from.clone(), claimed: ready.peer_id });
        }
        let member = self
            .members
            .iter_mut()
            .find(|m| &m.peer_id == from)
            .ok_or_else(|| LobbyError::UnknownPeer(from.clone()))?;
        member.ready = ready.ready;
        debug!("{} ready = {}", from, ready.ready);
        Ok(self.player_list())
    }

    /// Set the host's own ready flag.
    pub fn set_host_ready(&mut self, ready: bool) -> NetMessage {
        if let Some(host) = self.members.first_mut() {
            host.ready = ready;
        }
        self.player_list()
    }

    /// Remove a member. Returns the updated list if it changed.
    pub fn leave(&mut self, peer: &PeerId) -> Option<NetMessage> {
        if peer == &self.host {
            return None;
        }
        let before = self.members.len();
        self.members.retain(|m| &m.peer_id != peer);
        (self.members.len() != before).then(|| {
            info!("{} left lobby {}", peer, self.room_code);
            self.player_list()
        })
    }

    /// Route a lobby message from a peer.
    ///
    /// Returns the player list to broadcast when membership changed.
    /// Non-lobby messages are ignored.
    pub fn handle(&mut self, from: &PeerId, message: NetMessage) -> Result<Option<NetMessage>, LobbyError> {
        match message {
            NetMessage::PlayerJoin(join) => self.join(from, join).map(Some),
            NetMessage::PlayerReady(ready) => self.set_ready(from, ready).map(Some),
            other => {
                debug!("Ignoring {} in lobby", other.kind());
                Ok(None)
            }
        }
    }

    /// Current roster as a broadcastable message.
    pub fn player_list(&self) -> NetMessage {
        NetMessage::PlayerList(PlayerList { players: self.members.clone() })
    }

    /// Can the host start now?
    pub fn can_start(&self) -> bool {
        self.members.len() >= MIN_MEMBERS && self.members.iter().all(|m| m.ready)
    }

    /// Assign slots in join order and build the start message.
    pub fn start(&self) -> Result<StartGame, LobbyError> {
        if self.members.len() < MIN_MEMBERS {
            return Err(LobbyError::NotEnoughPlayers(self.members.len()));
        }
        if !self.members.iter().all(|m| m.ready) {
            return Err(LobbyError::NotAllReady);
        }

        let config = GameConfig {
            player_count: self.members.len() as u8,
            ..self.config
        };
        config.validate()?;

        let player_assignments = self
            .members
            .iter()
            .enumerate()
            .map(|(slot, m)| PlayerAssignment {
                peer_id: m.peer_id.clone(),
                player_id: PlayerId(slot as u8),
                player_name: m.player_name.clone(),
                control_type: m.control_type.unwrap_or(ControlSource::Keyboard),
            })
            .collect();

        info!("Lobby {} starting with {} players", self.room_code, self.members.len());
        Ok(StartGame { config, player_assignments })
    }

    fn member(&self, peer: &PeerId) -> Option<&LobbyMember> {
        self.members.iter().find(|m| &m.peer_id == peer)
    }
}

// =============================================================================
// CLIENT LOBBY
// =============================================================================

/// What a client lobby learned from a message.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyUpdate {
    /// Roster changed
    Members,
    /// Session started; this client plays `me`
    Started {
        /// Full start message
        start: StartGame,
        /// This client's slot
        me: PlayerId,
        /// This client's input device
        control: ControlSource,
    },
}

/// Client-side lobby mirror.
#[derive(Debug, Clone)]
pub struct ClientLobby {
    me: PeerId,
    name: String,
    control: ControlSource,
    ready: bool,
    members: Vec<LobbyMember>,
}

impl ClientLobby {
    /// Mirror for this client.
    pub fn new(me: PeerId, name: String, control: ControlSource) -> Self {
        Self { me, name, control, ready: false, members: Vec::new() }
    }

    /// Join request to send to the host.
    pub fn join_message(&self) -> NetMessage {
        NetMessage::PlayerJoin(PlayerJoin {
            player_name: self.name.clone(),
            peer_id: self.me.clone(),
            control_type: self.control,
        })
    }

    /// Toggle ready and build the message to send.
    pub fn toggle_ready(&mut self) -> NetMessage {
        self.set_ready(!self.ready)
    }

    /// Set ready and build the message to send.
    pub fn set_ready(&mut self, ready: bool) -> NetMessage {
        self.ready = ready;
        NetMessage::PlayerReady(PlayerReady { peer_id: self.me.clone(), ready })
    }

    /// Members as last announced.
    pub fn members(&self) -> &[LobbyMember] {
        &self.members
    }

    /// Apply a message from the host.
    pub fn handle(&mut self, message: NetMessage) -> Result<Option<LobbyUpdate>, LobbyError> {
        match message {
            NetMessage::PlayerList(list) => {
                self.members = list.players;
                Ok(Some(LobbyUpdate::Members))
            }
            NetMessage::StartGame(start) => {
                let assignment = start
                    .assignment_for(&self.me)
                    .ok_or_else(|| LobbyError::UnknownPeer(self.me.clone()))?;
                let me = assignment.player_id;
                let control = assignment.control_type;
                Ok(Some(LobbyUpdate::Started { start, me, control }))
            }
            NetMessage::BackToLobby => Err(LobbyError::Closed),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby() -> Lobby {
        Lobby::open(
            "KURVE-TEST01".into(),
            PeerId::from("host"),
            "Host".into(),
            ControlSource::Keyboard,
            GameConfig::default(),
        )
    }

    fn join(peer: &str, name: &str) -> PlayerJoin {
        PlayerJoin {
            player_name: name.into(),
            peer_id: PeerId::from(peer),
            control_type: ControlSource::Mouse,
        }
    }

    fn ready(peer: &str) -> PlayerReady {
        PlayerReady { peer_id: PeerId::from(peer), ready: true }
    }

    #[test]
    fn test_room_code_format() {
        let code = generate_room_code();
        assert!(code.starts_with(ROOM_CODE_PREFIX));
        let suffix = &code[ROOM_CODE_PREFIX.len()..];
        assert_eq!(suffix.len(), ROOM_CODE_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_join_order_assignment() {
        let mut lobby = lobby();
        lobby.join(&PeerId::from("b"), join("b", "Bea")).unwrap();
        lobby.join(&PeerId::from("a"), join("a", "Al")).unwrap();
        lobby.set_host_ready(true);
        lobby.set_ready(&PeerId::from("a"), ready("a")).unwrap();
        lobby.set_ready(&PeerId::from("b"), ready("b")).unwrap();

        let start = lobby.start().unwrap();
        assert_eq!(start.config.player_count, 3);

        let slots: Vec<_> = start
            .player_assignments
            .iter()
            .map(|a| (a.peer_id.as_str().to_string(), a.player_id))
            .collect();
        assert_eq!(
            slots,
            vec![
                ("host".to_string(), PlayerId(0)),
                ("b".to_string(), PlayerId(1)),
                ("a".to_string(), PlayerId(2)),
            ]
        );
        assert_eq!(start.player_assignments[1].control_type, ControlSource::Mouse);
    }

    #[test]
    fn test_start_requires_two_ready_members() {
        let mut lobby = lobby();
        lobby.set_host_ready(true);
        assert_eq!(lobby.start().unwrap_err(), LobbyError::NotEnoughPlayers(1));

        lobby.join(&PeerId::from("a"), join("a", "Al")).unwrap();
        assert_eq!(lobby.start().unwrap_err(), LobbyError::NotAllReady);
        assert!(!lobby.can_start());

        lobby.set_ready(&PeerId::from("a"), ready("a")).unwrap();
        assert!(lobby.can_start());
        assert!(lobby.start().is_ok());
    }

    #[test]
    fn test_room_full() {
        let mut lobby = lobby();
        for peer in ["a", "b", "c"] {
            lobby.join(&PeerId::from(peer), join(peer, peer)).unwrap();
        }
        assert_eq!(lobby.join(&PeerId::from("d"), join("d", "d")).unwrap_err(), LobbyError::RoomFull);
    }

    #[test]
    fn test_rejects_duplicates_and_impersonation() {
        let mut lobby = lobby();
        lobby.join(&PeerId::from("a"), join("a", "Al")).unwrap();
        assert_eq!(
            lobby.join(&PeerId::from("a"), join("a", "Al")).unwrap_err(),
            LobbyError::AlreadyJoined(PeerId::from("a"))
        );

        let err = lobby.set_ready(&PeerId::from("a"), ready("host")).unwrap_err();
        assert!(matches!(err, LobbyError::Impersonation { .. }));

        let err = lobby.set_ready(&PeerId::from("z"), ready("z")).unwrap_err();
        assert_eq!(err, LobbyError::UnknownPeer(PeerId::from("z")));
    }

    #[test]
    fn test_leave() {
        let mut lobby = lobby();
        lobby.join(&PeerId::from("a"), join("a", "Al")).unwrap();
        assert!(lobby.leave(&PeerId::from("a")).is_some());
        assert!(lobby.leave(&PeerId::from("a")).is_none());
        assert!(lobby.leave(&PeerId::from("host")).is_none(), "host never leaves its own lobby");
        assert_eq!(lobby.members().len(), 1);
    }

    #[test]
    fn test_handle_routes_lobby_messages() {
        let mut lobby = lobby();
        let update = lobby
            .handle(&PeerId::from("a"), NetMessage::PlayerJoin(join("a", "Al")))
            .unwrap();
        assert!(matches!(update, Some(NetMessage::PlayerList(ref list)) if list.players.len() == 2));

        assert_eq!(lobby.handle(&PeerId::from("a"), NetMessage::RestartGame).unwrap(), None);
    }

    #[test]
    fn test_client_lobby_learns_its_slot() {
        let mut host = lobby();
        let mut client = ClientLobby::new(PeerId::from("a"), "Al".into(), ControlSource::Touch);

        let list = host.handle(&PeerId::from("a"), client.join_message()).unwrap().unwrap();
        assert_eq!(client.handle(list).unwrap(), Some(LobbyUpdate::Members));
        assert_eq!(client.members().len(), 2);

        host.handle(&PeerId::from("a"), client.toggle_ready()).unwrap();
        host.set_host_ready(true);
        let start = host.start().unwrap();

        match client.handle(NetMessage::StartGame(start)).unwrap() {
            Some(LobbyUpdate::Started { me, control, .. }) => {
                assert_eq!(me, PlayerId(1));
                assert_eq!(control, ControlSource::Touch);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
