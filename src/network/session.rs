//! Online Sessions
//!
//! The host side owns an [`Arena`], feeds it the local intent plus the
//! latest remote intent per slot, and broadcasts whole-state snapshots
//! and lifecycle transitions. The client side never simulates: it sends
//! its intent and mirrors what the host tells it.

use std::collections::BTreeMap;
use tracing::{info, warn, debug};

use crate::game::arena::Arena;
use crate::game::input::{IntentCache, TurnIntent};
use crate::game::lifecycle::{Lifecycle, Phase, Transition};
use crate::game::state::{
    ConfigError, ControlSource, GameConfig, Player, PlayerId, Roster, WorldSize,
};
use crate::game::tick::{TickResult, TICK_RATE};
use crate::network::protocol::{InputMessage, NetMessage, PeerId, StartGame, StateMessage};
use crate::network::transport::{SharedTransport, TransportEvent};

/// Online session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Simulation rate (Hz).
    pub tick_rate: u32,
    /// Minimum time between snapshots (ms).
    pub broadcast_interval_ms: u64,
    /// Logical world shared by every participant.
    pub world: WorldSize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate: TICK_RATE,
            // ≈30 snapshots per second
            broadcast_interval_ms: 33,
            world: WorldSize::ONLINE,
        }
    }
}

impl SessionConfig {
    /// Tick period in milliseconds.
    pub fn tick_period_ms(&self) -> u64 {
        1000 / self.tick_rate.max(1) as u64
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The start message does not assign this peer a slot.
    #[error("peer {0} has no slot in this session")]
    NotAssigned(PeerId),

    /// Invalid round setup.
    #[error("invalid session setup: {0}")]
    Config(#[from] ConfigError),
}

/// What one host update did.
#[derive(Debug, Default)]
pub struct HostUpdate {
    /// Tick result, when the simulation ran
    pub tick: Option<TickResult>,
    /// Lifecycle transitions, in order
    pub transitions: Vec<Transition>,
    /// Whether a snapshot went out
    pub broadcast: bool,
}

// =============================================================================
// HOST
// =============================================================================

/// Authoritative online session.
pub struct HostSession {
    arena: Arena,
    transport: SharedTransport,
    config: SessionConfig,
    me: PlayerId,
    /// Remote peers and the slots they drive
    slots: BTreeMap<PeerId, PlayerId>,
    intents: IntentCache,
    last_broadcast: Option<u64>,
}

impl HostSession {
    /// Build the session from the start message the host broadcast.
    pub fn new(
        start: &StartGame,
        transport: SharedTransport,
        seed: u64,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let host_peer = transport.local_id().clone();
        let me = start
            .assignment_for(&host_peer)
            .map(|a| a.player_id)
            .ok_or_else(|| SessionError::NotAssigned(host_peer.clone()))?;

        let roster = Roster::from_slots(start.player_assignments.iter().map(|a| {
            let control = if a.peer_id == host_peer { a.control_type } else { ControlSource::Remote };
            (a.player_id, control)
        }));
        let slots = start
            .player_assignments
            .iter()
            .filter(|a| a.peer_id != host_peer)
            .map(|a| (a.peer_id.clone(), a.player_id))
            .collect();

        let arena = Arena::new(start.config, config.world, roster, seed)?;

        Ok(Self {
            arena,
            transport,
            config,
            me,
            slots,
            intents: IntentCache::new(),
            last_broadcast: None,
        })
    }

    /// Start the first round and send its opening snapshot.
    pub fn start(&mut self, now: u64) -> Result<(), SessionError> {
        if self.arena.start(now)? {
            info!("Online session started with {} slots", self.arena.roster().len());
            self.broadcast_state(now);
        }
        Ok(())
    }

    /// Handle one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message { from, message: NetMessage::Input(input) } => {
                self.handle_input(&from, input);
            }
            TransportEvent::Message { from, message } => {
                debug!("Ignoring {} from {} during session", message.kind(), from);
            }
            TransportEvent::Disconnected(peer) => self.handle_disconnect(&peer),
            TransportEvent::Connected(peer) => {
                debug!("Late connection from {} ignored", peer);
            }
        }
    }

    fn handle_input(&mut self, from: &PeerId, input: InputMessage) {
        match self.slots.get(from) {
            Some(&slot) if slot == input.player_id => {
                self.intents.record(slot, input.intent(), input.timestamp);
            }
            Some(&slot) => {
                warn!("{} (slot {}) sent input for {}", from, slot, input.player_id);
            }
            None => debug!("Input from unassigned peer {}", from),
        }
    }

    fn handle_disconnect(&mut self, peer: &PeerId) {
        let Some(slot) = self.slots.remove(peer) else {
            return;
        };
        // The player keeps flying straight this round and is gone after it
        self.intents.reset(slot);
        self.arena.retire_slot(slot);
        warn!("{} ({}) disconnected, {} slots remain", peer, slot, self.arena.roster().len());
    }

    /// Run one frame: tick or advance timers, then broadcast.
    pub fn update(&mut self, now: u64, local: TurnIntent) -> HostUpdate {
        let local = BTreeMap::from([(self.me, local)]);
        let intents = self.intents.merged_with(&local);
        let arena_update = self.arena.update(now, &intents);

        let mut update = HostUpdate {
            tick: arena_update.tick,
            transitions: arena_update.transitions,
            broadcast: false,
        };

        // The final positions go out before the result
        let round_changed = update
            .transitions
            .iter()
            .any(|t| matches!(t, Transition::RoundEnded(_) | Transition::RoundRestarted));
        if round_changed || (self.snapshot_due(now) && self.arena.phase() == Phase::RoundActive) {
            self.broadcast_state(now);
            update.broadcast = true;
        }

        for transition in &update.transitions {
            self.announce(*transition);
        }
        update
    }

    /// Skip the result pause or countdown.
    pub fn skip(&mut self, now: u64) -> Vec<Transition> {
        let transitions = self.arena.skip(now);
        if transitions.contains(&Transition::RoundRestarted) {
            self.broadcast_state(now);
        }
        for transition in &transitions {
            self.announce(*transition);
        }
        transitions
    }

    /// Send everyone back to the lobby (between rounds only).
    pub fn cancel(&mut self) -> Vec<Transition> {
        let transitions = self.arena.cancel();
        for transition in &transitions {
            self.announce(*transition);
        }
        transitions
    }

    /// Tear down from any phase.
    pub fn abort(&mut self) -> Vec<Transition> {
        let transitions = self.arena.abort();
        for transition in &transitions {
            self.announce(*transition);
        }
        transitions
    }

    /// Frames land on whole-millisecond periods (16 ms at 60 Hz), so half a
    /// period of slack keeps the cadence at every second frame.
    fn snapshot_due(&self, now: u64) -> bool {
        match self.last_broadcast {
            Some(last) => {
                let slack = self.config.tick_period_ms() / 2;
                now.saturating_sub(last) + slack >= self.config.broadcast_interval_ms
            }
            None => true,
        }
    }

    fn broadcast_state(&mut self, now: u64) {
        let message = NetMessage::State(StateMessage { state: self.arena.snapshot(now) });
        for (peer, e) in self.transport.broadcast(&message) {
            debug!("Snapshot not queued for {}: {}", peer, e);
        }
        self.last_broadcast = Some(now);
    }

    fn announce(&self, transition: Transition) {
        let message = NetMessage::from(transition);
        info!("Host: {}", message.kind());
        for (peer, e) in self.transport.broadcast(&message) {
            warn!("Failed to send {} to {}: {}", message.kind(), peer, e);
        }
    }

    /// Host's own slot.
    pub fn me(&self) -> PlayerId {
        self.me
    }

    /// Canonical players.
    pub fn players(&self) -> &[Player] {
        self.arena.players()
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.arena.phase()
    }

    /// Seconds left on the restart countdown.
    pub fn countdown_remaining_secs(&self, now: u64) -> Option<u64> {
        self.arena.countdown_remaining_secs(now)
    }

    /// Remote peers still in the session.
    pub fn remote_slots(&self) -> &BTreeMap<PeerId, PlayerId> {
        &self.slots
    }

    /// Underlying arena.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// What a client learned from one host message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The mirror was replaced
    Snapshot,
    /// The host announced a lifecycle transition
    Transition(Transition),
}

/// Non-authoritative online participant.
#[derive(Debug, Clone)]
pub struct ClientSession {
    me: PlayerId,
    control: ControlSource,
    config: GameConfig,
    lifecycle: Lifecycle,
    players: Vec<Player>,
    last_snapshot: Option<u64>,
}

impl ClientSession {
    /// Join the round the host just started.
    pub fn new(me: PlayerId, control: ControlSource, config: GameConfig) -> Self {
        let mut lifecycle = Lifecycle::new();
        lifecycle.begin();
        Self {
            me,
            control,
            config,
            lifecycle,
            players: Vec::new(),
            last_snapshot: None,
        }
    }

    /// Build the session from the host's start message.
    pub fn from_start(start: &StartGame, me: &PeerId) -> Result<Self, SessionError> {
        let assignment = start
            .assignment_for(me)
            .ok_or_else(|| SessionError::NotAssigned(me.clone()))?;
        Ok(Self::new(assignment.player_id, assignment.control_type, start.config))
    }

    /// Input message for this tick. `None` once the session is over.
    pub fn input_message(&self, intent: TurnIntent, timestamp: u64) -> Option<NetMessage> {
        if self.lifecycle.is_exited() {
            return None;
        }
        Some(NetMessage::Input(InputMessage::new(self.me, intent, timestamp)))
    }

    /// Apply one message from the host.
    pub fn handle_message(&mut self, message: NetMessage, now: u64) -> Option<ClientEvent> {
        if let Some(transition) = message.transition() {
            if self.lifecycle.follow(transition, now) {
                return Some(ClientEvent::Transition(transition));
            }
            debug!("Ignoring out-of-order {}", message.kind());
            return None;
        }

        match message {
            NetMessage::State(StateMessage { state }) => {
                if self.lifecycle.is_exited() {
                    return None;
                }
                self.players = state.players;
                self.last_snapshot = Some(state.timestamp);
                Some(ClientEvent::Snapshot)
            }
            other => {
                debug!("Ignoring {} during session", other.kind());
                None
            }
        }
    }

    /// Host went away: the session is over.
    pub fn host_lost(&mut self) -> Option<Transition> {
        self.lifecycle.abort()
    }

    /// This client's slot.
    pub fn me(&self) -> PlayerId {
        self.me
    }

    /// This client's input device.
    pub fn control(&self) -> ControlSource {
        self.control
    }

    /// Round configuration.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Mirrored players, as of the last snapshot.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Host timestamp of the last snapshot.
    pub fn last_snapshot(&self) -> Option<u64> {
        self.last_snapshot
    }

    /// Mirrored lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Seconds left on the restart countdown (local clock).
    pub fn countdown_remaining_secs(&self, now: u64) -> Option<u64> {
        self.lifecycle.countdown_remaining_secs(now)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use crate::game::lifecycle::{COUNTDOWN_MS, ROUND_END_PAUSE_MS};
    use crate::game::state::{GameState, RoundOutcome};
    use crate::network::protocol::PlayerAssignment;
    use crate::network::transport::{MemoryTransport, Transport};

    fn assignment(peer: &str, slot: u8, control: ControlSource) -> PlayerAssignment {
        PlayerAssignment {
            peer_id: PeerId::from(peer),
            player_id: PlayerId(slot),
            player_name: peer.to_string(),
            control_type: control,
        }
    }

    fn start_game(peers: &[&str]) -> StartGame {
        StartGame {
            config: GameConfig { player_count: peers.len() as u8, ..GameConfig::default() },
            player_assignments: peers
                .iter()
                .enumerate()
                .map(|(slot, peer)| assignment(peer, slot as u8, ControlSource::Keyboard))
                .collect(),
        }
    }

    struct Fixture {
        host: HostSession,
        host_rx: mpsc::Receiver<TransportEvent>,
        clients: Vec<(MemoryTransport, mpsc::Receiver<TransportEvent>)>,
    }

    async fn fixture(peers: &[&str]) -> Fixture {
        let (host_transport, mut host_rx) = MemoryTransport::new(peers[0], 1024);
        let mut clients = Vec::new();
        for peer in &peers[1..] {
            let (transport, mut rx) = MemoryTransport::new(*peer, 1024);
            MemoryTransport::connect(&host_transport, &transport);
            assert!(matches!(rx.recv().await, Some(TransportEvent::Connected(_))));
            assert!(matches!(host_rx.recv().await, Some(TransportEvent::Connected(_))));
            clients.push((transport, rx));
        }

        let host = HostSession::new(
            &start_game(peers),
            Arc::new(host_transport),
            42,
            SessionConfig::default(),
        )
        .unwrap();

        Fixture { host, host_rx, clients }
    }

    fn drain(rx: &mut mpsc::Receiver<TransportEvent>) -> Vec<NetMessage> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TransportEvent::Message { message, .. } = event {
                out.push(message);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_host_slots_and_roster() {
        let f = fixture(&["host", "a", "b"]).await;
        assert_eq!(f.host.me(), PlayerId(0));
        assert_eq!(f.host.remote_slots().len(), 2);
        assert_eq!(f.host.arena().roster().control(PlayerId(0)), Some(ControlSource::Keyboard));
        assert_eq!(f.host.arena().roster().control(PlayerId(1)), Some(ControlSource::Remote));
        assert_eq!(f.host.arena().world(), WorldSize::ONLINE);
    }

    #[tokio::test]
    async fn test_host_not_assigned() {
        let (transport, _rx) = MemoryTransport::new("stranger", 4);
        let result = HostSession::new(&start_game(&["host", "a"]), Arc::new(transport), 1, SessionConfig::default());
        assert_eq!(result.err(), Some(SessionError::NotAssigned(PeerId::from("stranger"))));
    }

    #[tokio::test]
    async fn test_snapshot_cadence() {
        let mut f = fixture(&["host", "a"]).await;
        f.host.start(0).unwrap();
        let (_, rx) = &mut f.clients[0];
        assert!(matches!(drain(rx).as_slice(), [NetMessage::State(_)]));

        // 16 ms frames, 33 ms interval: a snapshot every second frame
        let mut sent = 0;
        for frame in 1..=30u64 {
            if f.host.update(frame * 16, TurnIntent::STRAIGHT).broadcast {
                sent += 1;
            }
        }
        assert_eq!(sent, 15);
        assert_eq!(drain(rx).len(), 15);
    }

    #[tokio::test]
    async fn test_snapshot_rate_per_second() {
        let mut f = fixture(&["host", "a"]).await;
        let period = f.host.config().tick_period_ms();
        f.host.start(0).unwrap();

        let mut sent = 0;
        let mut now = period;
        while now <= 1000 {
            if f.host.update(now, TurnIntent::STRAIGHT).broadcast {
                sent += 1;
            }
            if f.host.phase() != Phase::RoundActive {
                break;
            }
            now += period;
        }
        assert!(f.host.phase() == Phase::RoundActive, "round ended early");
        assert!((27..=33).contains(&sent), "{sent} snapshots in one second");
    }

    #[tokio::test]
    async fn test_remote_input_steers_remote_slot() {
        let mut f = fixture(&["host", "a"]).await;
        f.host.start(0).unwrap();

        let (client, _) = &f.clients[0];
        let input = NetMessage::Input(InputMessage::new(PlayerId(1), TurnIntent::new(true, false), 5));
        client.send_to(&PeerId::from("host"), &input).unwrap();

        let event = f.host_rx.recv().await.unwrap();
        f.host.handle_event(event);

        let before = f.host.players()[1].angle;
        f.host.update(16, TurnIntent::STRAIGHT);
        let after = f.host.players()[1].angle;
        assert!((before - after - crate::game::tick::TURN_SPEED).abs() < 1e-12);

        // Last value wins: the intent persists without new messages
        f.host.update(32, TurnIntent::STRAIGHT);
        assert!(f.host.players()[1].angle < after);
    }

    #[tokio::test]
    async fn test_input_for_foreign_slot_is_ignored() {
        let mut f = fixture(&["host", "a", "b"]).await;
        f.host.start(0).unwrap();

        // "a" owns slot 1 but claims slot 2
        f.host.handle_event(TransportEvent::Message {
            from: PeerId::from("a"),
            message: NetMessage::Input(InputMessage::new(PlayerId(2), TurnIntent::new(true, false), 0)),
        });

        let before = f.host.players()[2].angle;
        f.host.update(16, TurnIntent::STRAIGHT);
        assert_eq!(f.host.players()[2].angle, before);
    }

    #[tokio::test]
    async fn test_disconnect_retires_slot() {
        let mut f = fixture(&["host", "a", "b"]).await;
        f.host.start(0).unwrap();

        f.host.handle_event(TransportEvent::Message {
            from: PeerId::from("b"),
            message: NetMessage::Input(InputMessage::new(PlayerId(2), TurnIntent::new(false, true), 0)),
        });
        f.host.handle_event(TransportEvent::Disconnected(PeerId::from("b")));

        assert!(!f.host.arena().roster().contains(PlayerId(2)));
        assert!(!f.host.remote_slots().contains_key(&PeerId::from("b")));

        // Still in the current round, flying straight
        let before = f.host.players()[2].angle;
        f.host.update(16, TurnIntent::STRAIGHT);
        assert_eq!(f.host.players().len(), 3);
        assert_eq!(f.host.players()[2].angle, before);
    }

    #[tokio::test]
    async fn test_client_mirror_follows_host() {
        let mut f = fixture(&["host", "a"]).await;
        let start = start_game(&["host", "a"]);
        let mut client = ClientSession::from_start(&start, &PeerId::from("a")).unwrap();
        assert_eq!(client.me(), PlayerId(1));

        f.host.start(0).unwrap();
        for frame in 1..=10u64 {
            f.host.update(frame * 16, TurnIntent::new(true, false));
        }

        let (_, rx) = &mut f.clients[0];
        for message in drain(rx) {
            client.handle_message(message, 0);
        }
        // The latest snapshot is the last one broadcast
        assert_eq!(client.players().len(), 2);
        assert!(client.last_snapshot().is_some());
        assert_eq!(client.phase(), Phase::RoundActive);
    }

    #[tokio::test]
    async fn test_round_end_restart_and_lobby() {
        let mut f = fixture(&["host", "a"]).await;
        let mut client = ClientSession::from_start(&start_game(&["host", "a"]), &PeerId::from("a")).unwrap();
        f.host.start(0).unwrap();

        // The remote slot vanishes and steers straight; the host circles until one dies
        let mut now = 0;
        let mut ended = None;
        for _ in 0..5_000 {
            now += 16;
            let update = f.host.update(now, TurnIntent::new(true, false));
            if let Some(Transition::RoundEnded(outcome)) = update.transitions.first() {
                ended = Some(*outcome);
                break;
            }
        }
        let outcome = ended.expect("round should end");
        assert!(matches!(outcome, RoundOutcome::Winner(_) | RoundOutcome::Draw));

        now += ROUND_END_PAUSE_MS;
        assert_eq!(f.host.update(now, TurnIntent::STRAIGHT).transitions, vec![Transition::CountdownStarted]);
        now += COUNTDOWN_MS;
        let update = f.host.update(now, TurnIntent::STRAIGHT);
        assert_eq!(update.transitions, vec![Transition::RoundRestarted]);
        assert!(update.broadcast);
        assert!(f.host.players().iter().all(|p| p.alive && p.trail.is_empty()));

        let (_, rx) = &mut f.clients[0];
        let events: Vec<_> = drain(rx).into_iter().filter_map(|m| client.handle_message(m, now)).collect();
        assert!(events.contains(&ClientEvent::Transition(Transition::RoundEnded(outcome))));
        assert!(events.contains(&ClientEvent::Transition(Transition::CountdownStarted)));
        assert!(events.contains(&ClientEvent::Transition(Transition::RoundRestarted)));
        assert_eq!(client.phase(), Phase::RoundActive);
    }

    #[tokio::test]
    async fn test_restart_without_opponents_returns_to_lobby() {
        let mut f = fixture(&["host", "a"]).await;
        f.host.start(0).unwrap();
        f.host.handle_event(TransportEvent::Disconnected(PeerId::from("a")));

        let mut now = 0;
        loop {
            now += 16;
            if !f.host.update(now, TurnIntent::new(true, false)).transitions.is_empty() {
                break;
            }
            assert!(now < 200_000, "round never ended");
        }

        assert_eq!(f.host.skip(now), vec![Transition::ReturnedToLobby]);
        assert_eq!(f.host.phase(), Phase::Exited);
    }

    #[tokio::test]
    async fn test_cancel_broadcasts_back_to_lobby() {
        let mut f = fixture(&["host", "a"]).await;
        f.host.start(0).unwrap();
        assert!(f.host.cancel().is_empty(), "cannot cancel a running round");
        assert_eq!(f.host.abort(), vec![Transition::ReturnedToLobby]);

        let (_, rx) = &mut f.clients[0];
        assert!(drain(rx).contains(&NetMessage::BackToLobby));
    }

    #[test]
    fn test_client_replaces_mirror_wholesale() {
        let mut client = ClientSession::new(PlayerId(1), ControlSource::Touch, GameConfig::default());
        let world = WorldSize::ONLINE;
        let first = GameState {
            players: PlayerId::all(3).map(|id| Player::spawn(id, world, ControlSource::Remote)).collect(),
            timestamp: 200,
        };
        let second = GameState {
            players: vec![Player::spawn(PlayerId(0), world, ControlSource::Remote)],
            timestamp: 100,
        };

        assert_eq!(client.handle_message(NetMessage::from(first), 0), Some(ClientEvent::Snapshot));
        assert_eq!(client.players().len(), 3);

        // An older timestamp still replaces everything
        assert_eq!(client.handle_message(NetMessage::from(second), 0), Some(ClientEvent::Snapshot));
        assert_eq!(client.players().len(), 1);
        assert_eq!(client.last_snapshot(), Some(100));
    }

    #[test]
    fn test_client_ignores_out_of_order_transitions() {
        let mut client = ClientSession::new(PlayerId(1), ControlSource::Keyboard, GameConfig::default());
        assert_eq!(client.handle_message(NetMessage::StartCountdown, 0), None);
        assert_eq!(client.phase(), Phase::RoundActive);

        assert!(client.input_message(TurnIntent::STRAIGHT, 0).is_some());
        assert_eq!(
            client.handle_message(NetMessage::BackToLobby, 0),
            Some(ClientEvent::Transition(Transition::ReturnedToLobby))
        );
        assert!(client.input_message(TurnIntent::STRAIGHT, 0).is_none());
        assert_eq!(client.host_lost(), None);
    }
}
