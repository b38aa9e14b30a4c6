//! Kurve
//!
//! Headless front end: a deterministic local demo with replay
//! verification, and online host/join commands over WebSocket.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use kurve::{
    TICK_RATE, VERSION,
    game::{
        events::GameEventData,
        input::{IntentLog, TurnIntent},
        state::{ControlSource, GameConfig, PlayerId, Roster, RoundState, WorldSize},
        tick::{replay_round, scheduled_time, tick},
    },
    network::{
        driver::{run_client_lobby, run_host_lobby},
        generate_room_code, spawn_client, spawn_host, ClientLobby, ClientSession, HostSession,
        Lobby, PeerId, RoundHandle, ServerConfig, SessionConfig, SessionEvent, SharedTransport,
        StartTrigger, WsClient, WsHost, HOST_PEER,
    },
};

#[derive(Parser)]
#[command(name = "kurve")]
#[command(version, about = "Trail arena game: local demo, host and join")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate one local round headlessly and verify it replays identically
    Local(LocalArgs),
    /// Open a room and host an online session
    Host(HostArgs),
    /// Join a hosted session
    Join(JoinArgs),
}

#[derive(Args)]
struct RoundArgs {
    /// Movement per tick
    #[arg(long, default_value_t = 2.0)]
    speed: f64,

    /// Mean milliseconds between trail gaps
    #[arg(long, default_value_t = 3000)]
    gap_interval: u64,
}

#[derive(Args)]
struct LocalArgs {
    #[arg(short, long, default_value_t = 4)]
    players: u8,

    #[arg(long, default_value_t = 12345)]
    seed: u64,

    /// Stop after this many ticks if the round is still running
    #[arg(long, default_value_t = 60 * 120)]
    max_ticks: u32,

    #[command(flatten)]
    round: RoundArgs,
}

#[derive(Args)]
struct HostArgs {
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    bind: SocketAddr,

    #[arg(short, long, default_value = "Host")]
    name: String,

    /// Session seed (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Start once this many players (host included) are in and ready.
    /// Without it the session starts when Enter is pressed; closing
    /// stdin closes the room.
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(2..=4))]
    players: Option<u8>,

    #[command(flatten)]
    round: RoundArgs,
}

#[derive(Args)]
struct JoinArgs {
    /// Host address, e.g. ws://127.0.0.1:9000
    #[arg(short, long)]
    url: String,

    #[arg(short, long, default_value = "Guest")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Kurve v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);

    match Cli::parse().command {
        Command::Local(args) => demo_round(args),
        Command::Host(args) => host(args).await,
        Command::Join(args) => join(args).await,
    }
}

/// Scripted steering: each slot cycles straight, left, right at its own pace.
fn scripted_intent(id: PlayerId, tick: u32) -> TurnIntent {
    let period = 40 + 25 * id.0 as u32;
    match (tick / period) % 3 {
        0 => TurnIntent::STRAIGHT,
        1 => TurnIntent::new(true, false),
        _ => TurnIntent::new(false, true),
    }
}

/// Run a round to completion, then replay it from the recorded intents.
fn demo_round(args: LocalArgs) -> Result<()> {
    info!("=== Starting Demo Round ===");

    let config = GameConfig {
        player_count: args.players,
        speed: args.round.speed,
        gap_interval: args.round.gap_interval,
    };
    let roster = Roster::local(args.players, false);
    let initial = RoundState::new(1, config, WorldSize::ONLINE, &roster, args.seed, 0)
        .context("invalid round configuration")?;
    info!("RNG Seed: {}", args.seed);

    let mut state = initial.clone();
    let mut logs: BTreeMap<PlayerId, IntentLog> = BTreeMap::new();
    let mut clock = Vec::new();

    for t in 1..=args.max_ticks {
        let now = scheduled_time(0, t);
        let intents: BTreeMap<PlayerId, TurnIntent> = state
            .players
            .iter()
            .map(|p| (p.id, scripted_intent(p.id, t)))
            .collect();
        for (id, intent) in &intents {
            logs.entry(*id).or_default().record(t, *intent);
        }
        clock.push(now);

        let result = tick(&mut state, &intents, now);
        for event in &result.events {
            match &event.data {
                GameEventData::PlayerEliminated { player_id, killer_id, x, y, .. } => {
                    let killer = killer_id.map(|k| k.to_string()).unwrap_or_else(|| "nobody".into());
                    info!("Tick {}: {} hit the trail of {} at ({:.1}, {:.1})", event.tick, player_id, killer, x, y);
                }
                GameEventData::PlayerRespawned { player_id } => {
                    info!("Tick {}: {} respawned", event.tick, player_id);
                }
                GameEventData::RoundEnded { outcome, duration_ticks } => match outcome.winner() {
                    Some(winner) => info!("Round over after {} ticks, {} wins", duration_ticks, winner),
                    None => info!("Round over after {} ticks, draw", duration_ticks),
                },
            }
        }

        if result.round_over {
            break;
        }
    }

    let hash = state.compute_hash();
    info!("Final State Hash: {}", hex::encode(hash));

    info!("=== Verifying Determinism ===");
    let (replayed, _) = replay_round(initial, &logs, &clock);
    let replay_hash = replayed.compute_hash();
    info!("Replay State Hash: {}", hex::encode(replay_hash));

    if hash != replay_hash {
        bail!("determinism failure: replay diverged at tick {}", replayed.tick);
    }
    info!("DETERMINISM VERIFIED: Hashes match!");
    Ok(())
}

fn random_seed() -> u64 {
    let bytes = Uuid::new_v4().into_bytes();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(seed)
}

fn tick_period() -> Duration {
    Duration::from_millis(SessionConfig::default().tick_period_ms())
}

async fn host(args: HostArgs) -> Result<()> {
    let host_peer = PeerId::from(HOST_PEER);
    let server_config = ServerConfig { bind_addr: args.bind, ..Default::default() };
    let (server, mut events) = WsHost::bind(server_config, host_peer.clone()).await?;
    let transport: SharedTransport = Arc::new(server);

    let config = GameConfig {
        speed: args.round.speed,
        gap_interval: args.round.gap_interval,
        ..GameConfig::default()
    };
    let mut lobby = Lobby::open(generate_room_code(), host_peer, args.name, ControlSource::Keyboard, config);
    lobby.set_host_ready(true);

    let trigger = match args.players {
        Some(count) => {
            info!("Room {} open, starting with {} ready players", lobby.room_code(), count);
            StartTrigger::Members(count as usize)
        }
        None => {
            info!("Room {} open, press Enter to start once everyone is ready", lobby.room_code());
            let (signal_tx, signal_rx) = mpsc::channel(4);
            forward_enter(signal_tx);
            StartTrigger::Signal(signal_rx)
        }
    };

    let start = run_host_lobby(&mut lobby, &transport, &mut events, trigger).await?;
    let seed = args.seed.unwrap_or_else(random_seed);
    let session = HostSession::new(&start, transport, seed, SessionConfig::default())?;
    let handle = spawn_host(session, events, ControlSource::Keyboard, tick_period())?;

    follow(handle).await
}

async fn join(args: JoinArgs) -> Result<()> {
    let me = PeerId::generate();
    let (client, mut events) = WsClient::connect(&args.url, me.clone(), 256)
        .await
        .with_context(|| format!("could not reach {}", args.url))?;
    let host_peer = client.host_id().clone();
    let transport: SharedTransport = Arc::new(client);

    let mut lobby = ClientLobby::new(me, args.name, ControlSource::Keyboard);
    let (start, slot, _) = run_client_lobby(&mut lobby, &transport, &host_peer, &mut events, true).await?;
    info!("Playing as {}", slot);

    let session = ClientSession::from_start(&start, transport.local_id())?;
    let handle = spawn_client(session, transport, host_peer, events, tick_period());

    follow(handle).await
}

/// Send a start request for every line read from stdin.
///
/// Runs on its own thread: a pending console read must not hold up
/// runtime shutdown.
fn forward_enter(signal: mpsc::Sender<()>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            if let Err(e) = line {
                warn!("Reading stdin failed: {}", e);
                break;
            }
            if signal.blocking_send(()).is_err() {
                break;
            }
        }
    });
}

/// Log session events until the session ends or Ctrl-C.
async fn follow(mut handle: RoundHandle) -> Result<()> {
    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(SessionEvent::Transition(transition)) => info!("{:?}", transition),
                Some(SessionEvent::Countdown(secs)) => info!("Next round in {}", secs),
                Some(SessionEvent::Game(event)) => {
                    if let GameEventData::RoundEnded { outcome, .. } = event.data {
                        info!("Round result: {:?}", outcome);
                    }
                }
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Ctrl-C handler failed: {}", e);
                }
                info!("Shutting down");
                handle.stop().await;
                return Ok(());
            }
        }
    }
    handle.join().await;
    Ok(())
}
