//! Session Drivers
//!
//! Async loops that run local, host and client sessions at the tick rate.
//! Each loop is a single tokio task that owns all mutable session state:
//! ticks, transport events and commands are handled one at a time inside
//! one `select!`, so nothing else ever touches the players.
//!
//! A [`RoundHandle`] owns the task. Renderers read the latest player set
//! from a `watch` channel and lifecycle/game events from an `mpsc` one.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{info, warn, debug};

use crate::game::arena::Arena;
use crate::game::events::GameEvent;
use crate::game::input::{ControlEvent, LocalControls};
use crate::game::lifecycle::{Phase, Transition};
use crate::game::state::{ControlSource, PlayerId, Player};
use crate::network::lobby::{ClientLobby, Lobby, LobbyError, LobbyUpdate};
use crate::network::protocol::{NetMessage, PeerId, StartGame};
use crate::network::session::{ClientEvent, ClientSession, HostSession, SessionError};
use crate::network::transport::{SharedTransport, TransportEvent};

/// Capacity of the command and event channels.
const CHANNEL_CAPACITY: usize = 256;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Requests from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Skip the result pause or countdown
    Skip,
    /// Leave to the lobby (between rounds)
    Cancel,
    /// Raw device event
    Control(ControlEvent),
}

/// Events for the presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Lifecycle transition
    Transition(Transition),
    /// Simulation event (authoritative side only)
    Game(GameEvent),
    /// Whole seconds left on the restart countdown, on change
    Countdown(u64),
}

// =============================================================================
// HANDLE
// =============================================================================

/// Owner of a running session loop.
///
/// Dropping the handle cancels the loop.
pub struct RoundHandle {
    commands: mpsc::Sender<Command>,
    players: watch::Receiver<Vec<Player>>,
    events: mpsc::Receiver<SessionEvent>,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl RoundHandle {
    /// Queue a command. Returns false if the loop is gone or busy.
    pub fn send(&self, command: Command) -> bool {
        self.commands.try_send(command).is_ok()
    }

    /// Skip the result pause or countdown.
    pub fn skip(&self) -> bool {
        self.send(Command::Skip)
    }

    /// Leave to the lobby.
    pub fn cancel(&self) -> bool {
        self.send(Command::Cancel)
    }

    /// Forward a device event.
    pub fn control(&self, event: ControlEvent) -> bool {
        self.send(Command::Control(event))
    }

    /// Subscribe to the player set.
    pub fn players(&self) -> watch::Receiver<Vec<Player>> {
        self.players.clone()
    }

    /// Next session event. `None` once the loop has finished and the
    /// queue is drained.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Has the loop finished?
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Stop the loop and wait for it to release its resources.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session loop ended abnormally: {}", e);
            }
        }
    }

    /// Wait for the loop to finish on its own.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Session loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for RoundHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Everything a loop needs besides its session.
struct LoopContext {
    period: Duration,
    commands: mpsc::Receiver<Command>,
    shutdown: broadcast::Receiver<()>,
    outputs: Outputs,
}

struct Outputs {
    players: watch::Sender<Vec<Player>>,
    events: mpsc::Sender<SessionEvent>,
    countdown: Option<u64>,
}

impl Outputs {
    fn publish(&self, players: &[Player]) {
        self.players.send_replace(players.to_vec());
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.try_send(event).is_err() {
            debug!("Session event dropped, nobody is reading");
        }
    }

    fn transitions(&self, transitions: &[Transition]) {
        for transition in transitions {
            self.emit(SessionEvent::Transition(*transition));
        }
    }

    fn countdown(&mut self, remaining: Option<u64>) {
        if remaining != self.countdown {
            self.countdown = remaining;
            if let Some(secs) = remaining {
                self.emit(SessionEvent::Countdown(secs));
            }
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn launch<F, Fut>(period: Duration, body: F) -> RoundHandle
where
    F: FnOnce(LoopContext) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (commands_tx, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (players_tx, players_rx) = watch::channel(Vec::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let ctx = LoopContext {
        period,
        commands: commands_rx,
        shutdown: shutdown_rx,
        outputs: Outputs { players: players_tx, events: events_tx, countdown: None },
    };
    let task = tokio::spawn(body(ctx));

    RoundHandle {
        commands: commands_tx,
        players: players_rx,
        events: events_rx,
        shutdown_tx,
        task: Some(task),
    }
}

// =============================================================================
// LOCAL
// =============================================================================

/// Run a local (same-device) session. The arena must not be started.
pub fn spawn_local(mut arena: Arena, period: Duration) -> Result<RoundHandle, SessionError> {
    arena.start(now_ms())?;
    info!("Local session started with {} players", arena.roster().len());
    Ok(launch(period, move |ctx| local_loop(arena, ctx)))
}

async fn local_loop(mut arena: Arena, mut ctx: LoopContext) {
    let mut controls = LocalControls::new();
    let mut ticker = ticker(ctx.period);
    ctx.outputs.publish(arena.players());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = now_ms();
                let intents = controls.intents(arena.roster());
                let update = arena.update(now, &intents);

                if let Some(result) = update.tick {
                    #[cfg(feature = "debug-tracing")]
                    tracing::trace!(alive = arena.round().map_or(0, |r| r.alive_count()), "local tick");
                    for event in result.events {
                        ctx.outputs.emit(SessionEvent::Game(event));
                    }
                }
                ctx.outputs.publish(arena.players());
                ctx.outputs.transitions(&update.transitions);
                ctx.outputs.countdown(arena.countdown_remaining_secs(now));

                if arena.phase() == Phase::Exited {
                    break;
                }
            }
            command = ctx.commands.recv() => {
                let Some(command) = command else { break };
                let transitions = match command {
                    Command::Skip => arena.skip(now_ms()),
                    Command::Cancel => arena.cancel(),
                    Command::Control(event) => {
                        controls.apply(event);
                        Vec::new()
                    }
                };
                ctx.outputs.transitions(&transitions);
                if arena.phase() == Phase::Exited {
                    break;
                }
            }
            _ = ctx.shutdown.recv() => {
                ctx.outputs.transitions(&arena.abort());
                break;
            }
        }
    }
    info!("Local session ended after {} rounds", arena.rounds_started());
}

// =============================================================================
// HOST
// =============================================================================

/// Run the authoritative side of an online session.
///
/// `events` is the transport's inbound queue; the loop drains it between
/// ticks.
pub fn spawn_host(
    mut session: HostSession,
    events: mpsc::Receiver<TransportEvent>,
    control: ControlSource,
    period: Duration,
) -> Result<RoundHandle, SessionError> {
    session.start(now_ms())?;
    Ok(launch(period, move |ctx| host_loop(session, events, control, ctx)))
}

async fn host_loop(
    mut session: HostSession,
    mut events: mpsc::Receiver<TransportEvent>,
    control: ControlSource,
    mut ctx: LoopContext,
) {
    let mut controls = LocalControls::new();
    let mut ticker = ticker(ctx.period);
    let me = session.me();
    ctx.outputs.publish(session.players());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = now_ms();
                let update = session.update(now, controls.intent(me, control));

                if let Some(result) = update.tick {
                    for event in result.events {
                        ctx.outputs.emit(SessionEvent::Game(event));
                    }
                }
                ctx.outputs.publish(session.players());
                ctx.outputs.transitions(&update.transitions);
                ctx.outputs.countdown(session.countdown_remaining_secs(now));

                if session.phase() == Phase::Exited {
                    break;
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => session.handle_event(event),
                    None => {
                        warn!("Transport closed, ending session");
                        ctx.outputs.transitions(&session.abort());
                        break;
                    }
                }
            }
            command = ctx.commands.recv() => {
                let Some(command) = command else { break };
                let transitions = match command {
                    Command::Skip => session.skip(now_ms()),
                    Command::Cancel => session.cancel(),
                    Command::Control(event) => {
                        controls.apply(event);
                        Vec::new()
                    }
                };
                ctx.outputs.transitions(&transitions);
                if session.phase() == Phase::Exited {
                    break;
                }
            }
            _ = ctx.shutdown.recv() => {
                ctx.outputs.transitions(&session.abort());
                break;
            }
        }
    }
    info!("Host session ended after {} rounds", session.arena().rounds_started());
}

// =============================================================================
// CLIENT
// =============================================================================

/// Run a client of an online session.
pub fn spawn_client(
    session: ClientSession,
    transport: SharedTransport,
    host: PeerId,
    events: mpsc::Receiver<TransportEvent>,
    period: Duration,
) -> RoundHandle {
    launch(period, move |ctx| client_loop(session, transport, host, events, ctx))
}

async fn client_loop(
    mut session: ClientSession,
    transport: SharedTransport,
    host: PeerId,
    mut events: mpsc::Receiver<TransportEvent>,
    mut ctx: LoopContext,
) {
    let mut controls = LocalControls::new();
    let mut ticker = ticker(ctx.period);
    let (me, control) = (session.me(), session.control());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = now_ms();
                if let Some(message) = session.input_message(controls.intent(me, control), now) {
                    if let Err(e) = transport.send_to(&host, &message) {
                        debug!("Input not sent: {}", e);
                    }
                }
                ctx.outputs.countdown(session.countdown_remaining_secs(now));
            }
            event = events.recv() => {
                match event {
                    Some(TransportEvent::Message { message, .. }) => {
                        match session.handle_message(message, now_ms()) {
                            Some(ClientEvent::Snapshot) => ctx.outputs.publish(session.players()),
                            Some(ClientEvent::Transition(transition)) => {
                                ctx.outputs.transitions(&[transition]);
                            }
                            None => {}
                        }
                    }
                    Some(TransportEvent::Connected(_)) => {}
                    Some(TransportEvent::Disconnected(peer)) if peer == host => {
                        warn!("Lost connection to host");
                        ctx.outputs.transitions(session.host_lost().as_slice());
                    }
                    Some(TransportEvent::Disconnected(_)) => {}
                    None => {
                        ctx.outputs.transitions(session.host_lost().as_slice());
                    }
                }
                if session.phase() == Phase::Exited {
                    break;
                }
            }
            command = ctx.commands.recv() => {
                match command {
                    Some(Command::Control(event)) => controls.apply(event),
                    Some(other) => debug!("{:?} ignored, the host drives the session", other),
                    None => break,
                }
            }
            _ = ctx.shutdown.recv() => {
                ctx.outputs.transitions(session.host_lost().as_slice());
                break;
            }
        }
    }
    info!("Client session for {} ended", me);
}

// =============================================================================
// LOBBY LOOPS
// =============================================================================

/// What makes the host lobby start the session.
#[derive(Debug)]
pub enum StartTrigger {
    /// Start once this many members are in and everyone is ready
    Members(usize),
    /// Start on each host request, if everyone is ready by then
    Signal(mpsc::Receiver<()>),
}

impl StartTrigger {
    /// Next host request. Never resolves for [`StartTrigger::Members`].
    async fn requested(&mut self) -> Option<()> {
        match self {
            StartTrigger::Members(_) => std::future::pending().await,
            StartTrigger::Signal(rx) => rx.recv().await,
        }
    }

    fn is_met(&self, lobby: &Lobby) -> bool {
        match self {
            StartTrigger::Members(count) => lobby.members().len() >= *count && lobby.can_start(),
            StartTrigger::Signal(_) => false,
        }
    }
}

/// Run the host lobby until `trigger` starts the session.
///
/// New connections get the member list; membership changes are broadcast.
/// Returns the start message, already sent to every client. A closed
/// signal channel closes the lobby.
pub async fn run_host_lobby(
    lobby: &mut Lobby,
    transport: &SharedTransport,
    events: &mut mpsc::Receiver<TransportEvent>,
    mut trigger: StartTrigger,
) -> Result<StartGame, LobbyError> {
    info!("Waiting for players in room {}", lobby.room_code());

    loop {
        let start_requested = tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_lobby_event(lobby, transport, event);
                trigger.is_met(lobby)
            }
            request = trigger.requested() => {
                if request.is_none() {
                    break;
                }
                if !lobby.can_start() {
                    warn!("Cannot start with {} members until everyone is ready", lobby.members().len());
                }
                lobby.can_start()
            }
        };

        if start_requested {
            let start = lobby.start()?;
            for (peer, e) in transport.broadcast(&NetMessage::StartGame(start.clone())) {
                warn!("Start not sent to {}: {}", peer, e);
            }
            return Ok(start);
        }
    }

    Err(LobbyError::Closed)
}

fn handle_lobby_event(lobby: &mut Lobby, transport: &SharedTransport, event: TransportEvent) {
    let update = match event {
        TransportEvent::Connected(peer) => {
            if let Err(e) = transport.send_to(&peer, &lobby.player_list()) {
                warn!("Could not greet {}: {}", peer, e);
            }
            None
        }
        TransportEvent::Message { from, message } => match lobby.handle(&from, message) {
            Ok(update) => update,
            Err(e) => {
                warn!("Lobby request from {} rejected: {}", from, e);
                None
            }
        },
        TransportEvent::Disconnected(peer) => lobby.leave(&peer),
    };

    if let Some(list) = update {
        for (peer, e) in transport.broadcast(&list) {
            warn!("Player list not sent to {}: {}", peer, e);
        }
    }
}

/// Run a client lobby until the host starts the session.
///
/// Joins once the host connection is up and, with `auto_ready`, marks
/// itself ready as soon as it appears in the member list.
pub async fn run_client_lobby(
    lobby: &mut ClientLobby,
    transport: &SharedTransport,
    host: &PeerId,
    events: &mut mpsc::Receiver<TransportEvent>,
    auto_ready: bool,
) -> Result<(StartGame, PlayerId, ControlSource), LobbyError> {
    let me = transport.local_id().clone();
    let mut ready_sent = false;

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected(peer) if &peer == host => {
                if let Err(e) = transport.send_to(host, &lobby.join_message()) {
                    warn!("Join request not sent: {}", e);
                }
            }
            TransportEvent::Message { message, .. } => match lobby.handle(message)? {
                Some(LobbyUpdate::Started { start, me, control }) => {
                    info!("Session starting as {}", me);
                    return Ok((start, me, control));
                }
                Some(LobbyUpdate::Members) => {
                    let listed = lobby.members().iter().any(|m| m.peer_id == me);
                    if auto_ready && listed && !ready_sent {
                        ready_sent = true;
                        if let Err(e) = transport.send_to(host, &lobby.set_ready(true)) {
                            warn!("Ready toggle not sent: {}", e);
                        }
                    }
                }
                None => {}
            },
            TransportEvent::Disconnected(peer) if &peer == host => return Err(LobbyError::Closed),
            _ => {}
        }
    }

    Err(LobbyError::Closed)
}
