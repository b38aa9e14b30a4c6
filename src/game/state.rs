//! Round State Definitions
//!
//! Player entities, round configuration and the per-round canonical state.
//! Players are kept in a `Vec` sorted by id so iteration order is fixed.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::geometry::wrap_position;
use crate::core::rng::DeterministicRng;
use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::game::events::GameEvent;
use crate::game::input::ControlScheme;

/// Maximum number of player slots in a round.
pub const MAX_PLAYERS: u8 = 4;

/// Distance of every spawn point from its edge of the world.
pub const SPAWN_PADDING: f64 = 100.0;

/// Length of a trail gap, in 60 Hz ticks.
pub const GAP_LENGTH_TICKS: u64 = 15;

/// Length of a trail gap in milliseconds (15 ticks at 60 Hz).
pub const GAP_DURATION_MS: u64 = GAP_LENGTH_TICKS * 1000 / 60;

/// Upper bound for `GameConfig::speed`.
///
/// Must stay below the collision wrap threshold, otherwise every real
/// segment would be mistaken for a wrap-around.
pub const MAX_SPEED: f64 = 10.0;

/// Upper bound for `GameConfig::gap_interval` (one hour).
pub const MAX_GAP_INTERVAL_MS: u64 = 60 * 60 * 1000;

/// Player colors by id (CSS color strings for the renderer).
pub const PLAYER_COLORS: [&str; MAX_PLAYERS as usize] = [
    "oklch(0.65 0.25 25)",
    "oklch(0.70 0.20 145)",
    "oklch(0.65 0.20 240)",
    "oklch(0.75 0.18 70)",
];

// =============================================================================
// ERRORS
// =============================================================================

/// Invalid round setup. Raised at construction, never mid-tick.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Player count outside `1..=4`.
    #[error("player count must be between 1 and {max}, got {0}", max = MAX_PLAYERS)]
    InvalidPlayerCount(u8),

    /// Speed is not a finite value in `(0, MAX_SPEED]`.
    #[error("speed must be finite and in (0, {max}], got {0}", max = MAX_SPEED)]
    InvalidSpeed(f64),

    /// Gap interval not longer than a gap, or above `MAX_GAP_INTERVAL_MS`.
    #[error("gap interval must be in ({min}, {max}] ms, got {0}", min = GAP_DURATION_MS, max = MAX_GAP_INTERVAL_MS)]
    InvalidGapInterval(u64),

    /// World with a non-positive or non-finite dimension.
    #[error("world size must be positive and finite, got {width}x{height}")]
    InvalidWorld {
        /// Requested width
        width: f64,
        /// Requested height
        height: f64,
    },

    /// No slot to spawn.
    #[error("roster is empty")]
    EmptyRoster,

    /// Roster slot outside the configured player count.
    #[error("slot {0} is outside the configured player count")]
    UnknownSlot(PlayerId),
}

// =============================================================================
// PLAYER ID
// =============================================================================

/// 0-based player slot. Determines spawn, color and control binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u8);

impl PlayerId {
    /// Create from a slot index.
    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    /// Slot index for table lookups.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Ids `0..count` in order.
    pub fn all(count: u8) -> impl Iterator<Item = PlayerId> {
        (0..count).map(PlayerId)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player {}", self.0 + 1)
    }
}

// =============================================================================
// CONTROL SOURCE
// =============================================================================

/// Where a player's turn intents come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlSource {
    /// Two keys of the shared keyboard
    Keyboard,
    /// Left/right pointer buttons
    Mouse,
    /// On-screen touch buttons
    Touch,
    /// Intents received over the network
    Remote,
}

// =============================================================================
// GAME CONFIG / WORLD
// =============================================================================

/// Round configuration. Supplied once at round start, never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    /// Number of player slots (1 = endless survival)
    pub player_count: u8,
    /// World units travelled per tick
    pub speed: f64,
    /// Mean base interval between trail gaps (ms)
    pub gap_interval: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            player_count: 2,
            speed: 2.0,
            gap_interval: 3000,
        }
    }
}

impl GameConfig {
    /// Check every field. Called before any round is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.player_count == 0 || self.player_count > MAX_PLAYERS {
            return Err(ConfigError::InvalidPlayerCount(self.player_count));
        }
        if !self.speed.is_finite() || self.speed <= 0.0 || self.speed > MAX_SPEED {
            return Err(ConfigError::InvalidSpeed(self.speed));
        }
        if self.gap_interval <= GAP_DURATION_MS || self.gap_interval > MAX_GAP_INTERVAL_MS {
            return Err(ConfigError::InvalidGapInterval(self.gap_interval));
        }
        Ok(())
    }

    /// Single-player rounds respawn instead of ending.
    #[inline]
    pub fn is_survival(&self) -> bool {
        self.player_count == 1
    }
}

/// Logical world dimensions. Positions wrap at these bounds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSize {
    /// Width in world units
    pub width: f64,
    /// Height in world units
    pub height: f64,
}

impl WorldSize {
    /// Fixed world for online rounds. Renderers scale it to their canvas.
    pub const ONLINE: Self = Self { width: 1600.0, height: 900.0 };

    /// Create a world of the given size.
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Check dimensions are positive and finite.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if ok(self.width) && ok(self.height) {
            Ok(())
        } else {
            Err(ConfigError::InvalidWorld { width: self.width, height: self.height })
        }
    }
}

// =============================================================================
// ROSTER
// =============================================================================

/// Slots that take part in rounds, with their control source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Roster {
    slots: BTreeMap<PlayerId, ControlSource>,
}

impl Roster {
    /// Every slot on one device, bound by the control-scheme table.
    ///
    /// On touch devices every player uses on-screen buttons.
    pub fn local(player_count: u8, touch: bool) -> Self {
        let slots = PlayerId::all(player_count.min(MAX_PLAYERS))
            .map(|id| {
                let source = if touch {
                    ControlSource::Touch
                } else {
                    ControlScheme::for_player(id).source
                };
                (id, source)
            })
            .collect();
        Self { slots }
    }

    /// One local slot, everything else remote.
    pub fn online(player_count: u8, me: PlayerId, my_control: ControlSource) -> Self {
        let slots = PlayerId::all(player_count.min(MAX_PLAYERS))
            .map(|id| {
                let source = if id == me { my_control } else { ControlSource::Remote };
                (id, source)
            })
            .collect();
        Self { slots }
    }

    /// Build from explicit slots.
    pub fn from_slots(slots: impl IntoIterator<Item = (PlayerId, ControlSource)>) -> Self {
        Self { slots: slots.into_iter().collect() }
    }

    /// Remove a slot from future rounds. Returns whether it was present.
    pub fn retire(&mut self, id: PlayerId) -> bool {
        self.slots.remove(&id).is_some()
    }

    /// Control source of a slot.
    pub fn control(&self, id: PlayerId) -> Option<ControlSource> {
        self.slots.get(&id).copied()
    }

    /// Is the slot active?
    pub fn contains(&self, id: PlayerId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Number of active slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No active slot left.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Active slots in id order.
    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, ControlSource)> + '_ {
        self.slots.iter().map(|(id, source)| (*id, *source))
    }

    /// Active ids in order, as raw bytes (for seed derivation).
    pub fn id_bytes(&self) -> Vec<u8> {
        self.slots.keys().map(|id| id.0).collect()
    }
}

// =============================================================================
// PLAYER
// =============================================================================

/// One recorded trail position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailPoint {
    /// World x
    pub x: f64,
    /// World y
    pub y: f64,
    /// Recorded while a gap was open (never a hazard)
    #[serde(default)]
    pub is_gap: bool,
}

/// A player entity. Wire format of snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Slot id
    pub id: PlayerId,
    /// World x
    pub x: f64,
    /// World y
    pub y: f64,
    /// Heading in radians
    pub angle: f64,
    /// Render color
    pub color: String,
    /// One-way true→false per round
    pub alive: bool,
    /// Append-only within a round
    pub trail: Vec<TrailPoint>,
    /// Bound control source
    pub control_source: ControlSource,
    /// When the next gap opens (ms)
    pub next_gap_time: u64,
    /// Gap currently open
    pub gap_active: bool,
    /// When the open gap closes (ms)
    pub gap_end_time: u64,
    /// Touch button state, for drawing pressed buttons
    #[serde(default)]
    pub touch_left_active: bool,
    /// Touch button state, for drawing pressed buttons
    #[serde(default)]
    pub touch_right_active: bool,
}

impl Player {
    /// Spawn a player at the fixed spawn point of its slot.
    ///
    /// Slots 0-3 start at the left, right, top and bottom edges, each
    /// heading toward the centre.
    pub fn spawn(id: PlayerId, world: WorldSize, control_source: ControlSource) -> Self {
        let (x, y, angle) = Self::spawn_point(id, world);
        Self {
            id,
            x,
            y,
            angle,
            color: PLAYER_COLORS[id.index() % PLAYER_COLORS.len()].to_string(),
            alive: true,
            trail: Vec::new(),
            control_source,
            next_gap_time: 0,
            gap_active: false,
            gap_end_time: 0,
            touch_left_active: false,
            touch_right_active: false,
        }
    }

    /// Spawn position and heading of a slot.
    pub fn spawn_point(id: PlayerId, world: WorldSize) -> (f64, f64, f64) {
        use std::f64::consts::{FRAC_PI_2, PI};

        match id.0 % MAX_PLAYERS {
            0 => (SPAWN_PADDING, world.height / 2.0, 0.0),
            1 => (world.width - SPAWN_PADDING, world.height / 2.0, PI),
            2 => (world.width / 2.0, SPAWN_PADDING, FRAC_PI_2),
            _ => (world.width / 2.0, world.height - SPAWN_PADDING, -FRAC_PI_2),
        }
    }

    /// Current position.
    #[inline]
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Position and heading are all finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.angle.is_finite()
    }

    /// Move `speed` units along the heading, wrapping both axes.
    pub fn advance(&mut self, speed: f64, world: WorldSize) {
        self.x = wrap_position(self.x + self.angle.cos() * speed, world.width);
        self.y = wrap_position(self.y + self.angle.sin() * speed, world.height);
    }

    /// Schedule the first gap of a round: `now + uniform(0, interval)`.
    pub fn schedule_first_gap(&mut self, now: u64, gap_interval: u64, rng: &mut DeterministicRng) {
        self.next_gap_time = now.saturating_add((rng.next_f64() * gap_interval as f64) as u64);
        self.gap_active = false;
        self.gap_end_time = 0;
    }

    /// Open or close the gap for this tick.
    ///
    /// A gap lasts `GAP_DURATION_MS`; the next one is scheduled at
    /// `now + interval + uniform(0, interval)`.
    pub fn update_gap(&mut self, now: u64, gap_interval: u64, rng: &mut DeterministicRng) {
        if !self.gap_active && now >= self.next_gap_time {
            self.gap_active = true;
            self.gap_end_time = now.saturating_add(GAP_DURATION_MS);
            let jitter = (rng.next_f64() * gap_interval as f64) as u64;
            self.next_gap_time = now.saturating_add(gap_interval).saturating_add(jitter);
        }

        if self.gap_active && now >= self.gap_end_time {
            self.gap_active = false;
        }
    }

    /// Record the current position.
    #[inline]
    pub fn push_trail(&mut self) {
        self.trail.push(TrailPoint { x: self.x, y: self.y, is_gap: self.gap_active });
    }

    /// Mark dead and seal the trail with a solid point at the fatal position.
    pub fn eliminate(&mut self) {
        self.alive = false;
        self.trail.push(TrailPoint { x: self.x, y: self.y, is_gap: false });
    }

    /// Survival-mode reset: back to the slot's spawn with an empty trail.
    pub fn respawn(&mut self, world: WorldSize) {
        let (x, y, angle) = Self::spawn_point(self.id, world);
        self.x = x;
        self.y = y;
        self.angle = angle;
        self.alive = true;
        self.trail.clear();
        self.gap_active = false;
    }

    /// Hash this player's state for verification.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u8(self.id.0);
        hasher.update_f64(self.x);
        hasher.update_f64(self.y);
        hasher.update_f64(self.angle);
        hasher.update_bool(self.alive);
        hasher.update_u64(self.next_gap_time);
        hasher.update_bool(self.gap_active);
        hasher.update_u64(self.gap_end_time);
        hasher.update_u32(self.trail.len() as u32);
        for point in &self.trail {
            hasher.update_f64(point.x);
            hasher.update_f64(point.y);
            hasher.update_bool(point.is_gap);
        }
    }
}

// =============================================================================
// WIRE SNAPSHOT
// =============================================================================

/// Authoritative broadcast unit. Always a complete player set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Every player of the round, id order
    pub players: Vec<Player>,
    /// Host wall-clock time of the snapshot (ms since epoch)
    pub timestamp: u64,
}

// =============================================================================
// ROUND OUTCOME
// =============================================================================

/// How a multiplayer round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// Exactly one survivor
    Winner(PlayerId),
    /// Nobody survived the final tick
    Draw,
}

impl RoundOutcome {
    /// Winner, if any.
    pub fn winner(self) -> Option<PlayerId> {
        match self {
            RoundOutcome::Winner(id) => Some(id),
            RoundOutcome::Draw => None,
        }
    }
}

// =============================================================================
// ROUND STATE
// =============================================================================

/// Complete canonical state of one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundState {
    /// Round number within the session (1-based)
    pub round: u32,

    /// Configuration for this round
    pub config: GameConfig,

    /// World the round is simulated in
    pub world: WorldSize,

    /// Ticks simulated so far
    pub tick: u32,

    /// Clock value the round was created at (ms)
    pub started_at: u64,

    /// RNG seed (for verification)
    pub rng_seed: u64,

    /// Gap scheduling RNG
    pub rng: DeterministicRng,

    /// Players sorted by id
    pub players: Vec<Player>,

    /// Set once the round is over
    pub outcome: Option<RoundOutcome>,

    /// Events generated this tick (cleared each tick)
    #[serde(skip)]
    pub pending_events: Vec<GameEvent>,
}

impl RoundState {
    /// Spawn a fresh round for every roster slot.
    pub fn new(
        round: u32,
        config: GameConfig,
        world: WorldSize,
        roster: &Roster,
        rng_seed: u64,
        now: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        world.validate()?;
        if roster.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }

        let mut rng = DeterministicRng::new(rng_seed);
        let mut players = Vec::with_capacity(roster.len());

        for (id, source) in roster.iter() {
            if id.0 >= config.player_count {
                return Err(ConfigError::UnknownSlot(id));
            }
            let mut player = Player::spawn(id, world, source);
            player.schedule_first_gap(now, config.gap_interval, &mut rng);
            players.push(player);
        }

        Ok(Self {
            round,
            config,
            world,
            tick: 0,
            started_at: now,
            rng_seed,
            rng,
            players,
            outcome: None,
            pending_events: Vec::new(),
        })
    }

    /// Get a player by id.
    pub fn get_player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Get a player mutably by id.
    pub fn get_player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// Number of players still alive.
    pub fn alive_count(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    /// Has the round ended?
    pub fn is_over(&self) -> bool {
        self.outcome.is_some()
    }

    /// Wire snapshot of the current player set.
    pub fn snapshot(&self, timestamp: u64) -> GameState {
        GameState {
            players: self.players.clone(),
            timestamp,
        }
    }

    /// Compute hash of current state for verification.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.tick, self.rng_seed, |hasher| {
            hasher.update_u32(self.round);
            let [s0, s1] = self.rng.state();
            hasher.update_u64(s0);
            hasher.update_u64(s1);
            for player in &self.players {
                player.hash_into(hasher);
            }
            match self.outcome {
                None => hasher.update_u8(0),
                Some(RoundOutcome::Draw) => hasher.update_u8(1),
                Some(RoundOutcome::Winner(id)) => {
                    hasher.update_u8(2);
                    hasher.update_u8(id.0);
                }
            }
        })
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Push a game event.
    pub fn push_event(&mut self, event: GameEvent) {
        self.pending_events.push(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const WORLD: WorldSize = WorldSize::new(800.0, 600.0);

    #[test]
    fn test_spawn_geometry() {
        let left = Player::spawn(PlayerId(0), WORLD, ControlSource::Keyboard);
        assert_eq!((left.x, left.y, left.angle), (100.0, 300.0, 0.0));

        let right = Player::spawn(PlayerId(1), WORLD, ControlSource::Keyboard);
        assert_eq!((right.x, right.y, right.angle), (700.0, 300.0, PI));

        let top = Player::spawn(PlayerId(2), WORLD, ControlSource::Keyboard);
        assert_eq!((top.x, top.y), (400.0, 100.0));
        assert!(top.angle.sin() > 0.99, "top spawn heads down");

        let bottom = Player::spawn(PlayerId(3), WORLD, ControlSource::Mouse);
        assert_eq!((bottom.x, bottom.y), (400.0, 500.0));
        assert!(bottom.angle.sin() < -0.99, "bottom spawn heads up");

        assert!(bottom.alive);
        assert!(bottom.trail.is_empty());
        assert!(!bottom.gap_active);
    }

    #[test]
    fn test_config_validation() {
        assert!(GameConfig::default().validate().is_ok());

        let bad_count = GameConfig { player_count: 0, ..Default::default() };
        assert_eq!(bad_count.validate(), Err(ConfigError::InvalidPlayerCount(0)));

        let too_many = GameConfig { player_count: 5, ..Default::default() };
        assert_eq!(too_many.validate(), Err(ConfigError::InvalidPlayerCount(5)));

        let nan_speed = GameConfig { speed: f64::NAN, ..Default::default() };
        assert!(matches!(nan_speed.validate(), Err(ConfigError::InvalidSpeed(_))));

        let short_gap = GameConfig { gap_interval: 100, ..Default::default() };
        assert_eq!(short_gap.validate(), Err(ConfigError::InvalidGapInterval(100)));

        let huge_gap = GameConfig { gap_interval: 18_446_744_073_709_551_000, ..Default::default() };
        assert!(matches!(huge_gap.validate(), Err(ConfigError::InvalidGapInterval(_))));

        let longest = GameConfig { gap_interval: MAX_GAP_INTERVAL_MS, ..Default::default() };
        assert_eq!(longest.validate(), Ok(()));
    }

    #[test]
    fn test_gap_schedule_saturates() {
        let mut rng = DeterministicRng::new(9);
        let mut player = Player::spawn(PlayerId(0), WORLD, ControlSource::Keyboard);
        player.next_gap_time = 0;

        player.update_gap(u64::MAX - 10, u64::MAX, &mut rng);
        assert!(player.gap_active);
        assert_eq!(player.gap_end_time, u64::MAX);
        assert_eq!(player.next_gap_time, u64::MAX);

        player.schedule_first_gap(u64::MAX, u64::MAX, &mut rng);
        assert_eq!(player.next_gap_time, u64::MAX);
    }

    #[test]
    fn test_gap_opens_and_closes() {
        let mut rng = DeterministicRng::new(1);
        let mut player = Player::spawn(PlayerId(0), WORLD, ControlSource::Keyboard);
        player.next_gap_time = 1000;

        player.update_gap(999, 3000, &mut rng);
        assert!(!player.gap_active);

        player.update_gap(1000, 3000, &mut rng);
        assert!(player.gap_active);
        assert_eq!(player.gap_end_time, 1000 + GAP_DURATION_MS);

        // Next gap lands in [now + interval, now + 2 * interval)
        assert!(player.next_gap_time >= 4000 && player.next_gap_time < 7000);

        player.update_gap(1000 + GAP_DURATION_MS - 1, 3000, &mut rng);
        assert!(player.gap_active);

        player.update_gap(1000 + GAP_DURATION_MS, 3000, &mut rng);
        assert!(!player.gap_active);
    }

    #[test]
    fn test_eliminate_seals_trail() {
        let mut player = Player::spawn(PlayerId(1), WORLD, ControlSource::Remote);
        player.gap_active = true;
        player.push_trail();
        player.eliminate();

        assert!(!player.alive);
        assert_eq!(player.trail.len(), 2);
        let last = player.trail[1];
        assert!(!last.is_gap, "fatal position is never a gap");
        assert_eq!((last.x, last.y), (player.x, player.y));
    }

    #[test]
    fn test_round_spawns_roster_in_order() {
        let config = GameConfig { player_count: 3, ..Default::default() };
        let roster = Roster::local(3, false);
        let state = RoundState::new(1, config, WORLD, &roster, 42, 0).unwrap();

        let ids: Vec<_> = state.players.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![PlayerId(0), PlayerId(1), PlayerId(2)]);
        for player in &state.players {
            assert!(player.next_gap_time < config.gap_interval);
        }
    }

    #[test]
    fn test_round_rejects_bad_roster() {
        let config = GameConfig { player_count: 2, ..Default::default() };

        let empty = Roster::default();
        assert_eq!(
            RoundState::new(1, config, WORLD, &empty, 0, 0).unwrap_err(),
            ConfigError::EmptyRoster,
        );

        let outside = Roster::from_slots([(PlayerId(3), ControlSource::Remote)]);
        assert_eq!(
            RoundState::new(1, config, WORLD, &outside, 0, 0).unwrap_err(),
            ConfigError::UnknownSlot(PlayerId(3)),
        );

        let flat = WorldSize::new(800.0, 0.0);
        assert!(matches!(
            RoundState::new(1, config, flat, &Roster::local(2, false), 0, 0),
            Err(ConfigError::InvalidWorld { .. }),
        ));
    }

    #[test]
    fn test_round_state_determinism() {
        let config = GameConfig { player_count: 4, ..Default::default() };
        let roster = Roster::local(4, false);
        let state1 = RoundState::new(1, config, WORLD, &roster, 12345, 500).unwrap();
        let state2 = RoundState::new(1, config, WORLD, &roster, 12345, 500).unwrap();

        assert_eq!(state1.players, state2.players);
        assert_eq!(state1.compute_hash(), state2.compute_hash());
    }

    #[test]
    fn test_online_roster() {
        let roster = Roster::online(3, PlayerId(1), ControlSource::Touch);
        assert_eq!(roster.control(PlayerId(0)), Some(ControlSource::Remote));
        assert_eq!(roster.control(PlayerId(1)), Some(ControlSource::Touch));
        assert_eq!(roster.control(PlayerId(2)), Some(ControlSource::Remote));

        let mut roster = roster;
        assert!(roster.retire(PlayerId(2)));
        assert!(!roster.retire(PlayerId(2)));
        assert_eq!(roster.id_bytes(), vec![0, 1]);
    }

    #[test]
    fn test_player_wire_format() {
        let mut player = Player::spawn(PlayerId(0), WORLD, ControlSource::Keyboard);
        player.push_trail();
        let json = serde_json::to_value(&player).unwrap();

        assert_eq!(json["id"], 0);
        assert_eq!(json["controlSource"], "keyboard");
        assert_eq!(json["trail"][0]["isGap"], false);
        assert!(json.get("nextGapTime").is_some());
        assert!(json.get("gapActive").is_some());
    }
}
