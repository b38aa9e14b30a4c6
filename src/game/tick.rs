//! Authoritative Simulation Tick
//!
//! The core round loop. Given the same state, the same intents and the
//! same clock values it always produces the same result.

use std::collections::BTreeMap;

use crate::game::collision::{find_collision, CollisionConfig};
use crate::game::events::{EliminationCause, GameEvent};
use crate::game::input::{IntentLog, TurnIntent};
use crate::game::state::{ControlSource, PlayerId, RoundOutcome, RoundState};

/// Heading change per tick while turning (radians).
pub const TURN_SPEED: f64 = 0.08;

/// Simulation rate.
pub const TICK_RATE: u32 = 60;

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Whether the round is over after this tick
    pub round_over: bool,
    /// Outcome, once the round is over
    pub outcome: Option<RoundOutcome>,
}

/// Clock value of a tick when the simulation runs exactly on schedule.
pub fn scheduled_time(started_at: u64, tick: u32) -> u64 {
    started_at + tick as u64 * 1000 / TICK_RATE as u64
}

/// Run one simulation tick.
///
/// # Arguments
///
/// * `state` - The round state (will be mutated)
/// * `intents` - Turn intents for this tick. Missing slots steer straight.
/// * `now` - Monotonic clock in milliseconds, drives gap timing
///
/// Players are processed in slot order. Each one turns, moves, updates
/// its gap, records a trail point and then tests for collision against
/// the trails as they stand at that moment, so a slot sees the
/// already-updated trails of every lower slot.
///
/// Once the round is over further calls are no-ops.
pub fn tick(
    state: &mut RoundState,
    intents: &BTreeMap<PlayerId, TurnIntent>,
    now: u64,
) -> TickResult {
    let mut result = TickResult::default();

    if let Some(outcome) = state.outcome {
        result.round_over = true;
        result.outcome = Some(outcome);
        return result;
    }

    // 0. Advance tick counter
    state.tick += 1;

    let collision = CollisionConfig::for_speed(state.config.speed);

    // 1. Move, gap, trail and collide, slot by slot
    for idx in 0..state.players.len() {
        advance_player(state, idx, intents, now, &collision);
    }

    // 2. Check end conditions
    check_round_end(state, &mut result);

    // Collect events
    result.events = state.take_events();

    result
}

/// Steer, move and collide one player.
fn advance_player(
    state: &mut RoundState,
    idx: usize,
    intents: &BTreeMap<PlayerId, TurnIntent>,
    now: u64,
    collision: &CollisionConfig,
) {
    let speed = state.config.speed;
    let gap_interval = state.config.gap_interval;
    let world = state.world;

    let player = &mut state.players[idx];
    if !player.alive {
        return;
    }

    let intent = intents.get(&player.id).copied().unwrap_or_default();
    let previous = (player.x, player.y, player.angle);

    player.angle += intent.heading_delta(TURN_SPEED);
    player.advance(speed, world);

    if !player.is_finite() {
        // Keep the last good pose so the sealing point stays finite
        (player.x, player.y, player.angle) = previous;
        handle_death(state, idx, None, EliminationCause::InvalidState);
        return;
    }

    player.update_gap(now, gap_interval, &mut state.rng);
    if player.control_source == ControlSource::Touch {
        player.touch_left_active = intent.turn_left;
        player.touch_right_active = intent.turn_right;
    }
    player.push_trail();

    // An open gap makes the head immune as well
    if player.gap_active {
        return;
    }

    let (id, x, y) = (player.id, player.x, player.y);
    if let Some(owner) = find_collision(x, y, &state.players, id, collision) {
        handle_death(state, idx, Some(owner), EliminationCause::TrailCollision);
    }
}

/// Eliminate a player, or send it back to spawn in survival mode.
fn handle_death(
    state: &mut RoundState,
    idx: usize,
    killer: Option<PlayerId>,
    cause: EliminationCause,
) {
    let tick = state.tick;
    let world = state.world;
    let survival = state.config.is_survival();

    let player = &mut state.players[idx];
    let id = player.id;

    let event = if survival {
        player.respawn(world);
        GameEvent::player_respawned(tick, id)
    } else {
        player.eliminate();
        GameEvent::player_eliminated(tick, id, killer, player.position(), cause)
    };

    state.push_event(event);
}

/// End a multiplayer round once at most one player is alive.
fn check_round_end(state: &mut RoundState, result: &mut TickResult) {
    if state.config.is_survival() {
        return;
    }

    if state.alive_count() > 1 {
        return;
    }

    let outcome = state
        .players
        .iter()
        .find(|p| p.alive)
        .map(|p| RoundOutcome::Winner(p.id))
        .unwrap_or(RoundOutcome::Draw);

    state.outcome = Some(outcome);
    result.round_over = true;
    result.outcome = Some(outcome);

    state.push_event(GameEvent::round_ended(state.tick, outcome));
}

/// Replay a round from recorded intents and clock values.
///
/// `clock[i]` is the `now` passed to tick `i + 1`. Stops early once the
/// round is over.
pub fn replay_round(
    initial_state: RoundState,
    intents: &BTreeMap<PlayerId, IntentLog>,
    clock: &[u64],
) -> (RoundState, Vec<GameEvent>) {
    let mut state = initial_state;
    let mut all_events = Vec::new();

    for &now in clock {
        let next_tick = state.tick + 1;
        let tick_intents: BTreeMap<PlayerId, TurnIntent> = intents
            .iter()
            .map(|(id, log)| (*id, log.intent_at(next_tick)))
            .collect();

        let result = tick(&mut state, &tick_intents, now);
        all_events.extend(result.events);

        if result.round_over {
            break;
        }
    }

    (state, all_events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::GameEventData;
    use crate::game::state::{GameConfig, Roster, TrailPoint, WorldSize};
    use proptest::prelude::*;

    const WORLD: WorldSize = WorldSize::new(800.0, 600.0);

    fn round(player_count: u8, speed: f64, seed: u64) -> RoundState {
        let config = GameConfig { player_count, speed, gap_interval: 3000 };
        RoundState::new(1, config, WORLD, &Roster::local(player_count, false), seed, 0).unwrap()
    }

    fn disable_gaps(state: &mut RoundState) {
        for player in &mut state.players {
            player.next_gap_time = u64::MAX;
        }
    }

    fn steer_all(state: &RoundState, intent: TurnIntent) -> BTreeMap<PlayerId, TurnIntent> {
        state.players.iter().map(|p| (p.id, intent)).collect()
    }

    /// Vertical wall at x = 500 from y = 100 to y = 500.
    fn wall() -> Vec<TrailPoint> {
        (0..=200)
            .map(|i| TrailPoint { x: 500.0, y: 100.0 + 2.0 * i as f64, is_gap: false })
            .collect()
    }

    fn place(state: &mut RoundState, id: u8, x: f64, y: f64, angle: f64) {
        let player = state.get_player_mut(PlayerId(id)).unwrap();
        player.x = x;
        player.y = y;
        player.angle = angle;
    }

    #[test]
    fn test_touch_flags_only_for_touch_slots() {
        let config = GameConfig { player_count: 2, speed: 2.0, gap_interval: 3000 };
        let roster = Roster::online(2, PlayerId(0), ControlSource::Touch);
        let mut state = RoundState::new(1, config, WORLD, &roster, 3, 0).unwrap();

        let left = steer_all(&state, TurnIntent::new(true, false));
        tick(&mut state, &left, scheduled_time(0, 1));

        assert!(state.players[0].touch_left_active);
        assert!(!state.players[0].touch_right_active);
        // The remote slot turns but shows no buttons
        assert!(!state.players[1].touch_left_active);
        assert!(!state.players[1].touch_right_active);

        let keyboard = Roster::local(2, false);
        let mut state = RoundState::new(1, config, WORLD, &keyboard, 3, 0).unwrap();
        let left = steer_all(&state, TurnIntent::new(true, false));
        tick(&mut state, &left, scheduled_time(0, 1));
        assert!(state.players.iter().all(|p| !p.touch_left_active));
    }

    #[test]
    fn test_tick_determinism() {
        let mut state1 = round(4, 2.0, 12345);
        let mut state2 = round(4, 2.0, 12345);

        for t in 0..600u32 {
            let intent = TurnIntent::new(t % 90 < 30, t % 90 >= 60);
            let now = scheduled_time(0, t + 1);
            let intents1 = steer_all(&state1, intent);
            tick(&mut state1, &intents1, now);
            let intents2 = steer_all(&state2, intent);
            tick(&mut state2, &intents2, now);
        }

        assert_eq!(state1.tick, state2.tick);
        assert_eq!(state1.players, state2.players);
        assert_eq!(state1.compute_hash(), state2.compute_hash());
    }

    #[test]
    fn test_player_movement() {
        let mut state = round(2, 2.0, 1);
        disable_gaps(&mut state);

        tick(&mut state, &BTreeMap::new(), 16);

        let p0 = &state.players[0];
        assert_eq!((p0.x, p0.y), (102.0, 300.0));
        assert_eq!(p0.trail.len(), 1);

        let p1 = &state.players[1];
        assert!((p1.x - 698.0).abs() < 1e-9);
    }

    #[test]
    fn test_turning_changes_heading() {
        let mut state = round(2, 2.0, 1);
        let intents = BTreeMap::from([
            (PlayerId(0), TurnIntent::new(true, false)),
            (PlayerId(1), TurnIntent::new(false, true)),
        ]);

        tick(&mut state, &intents, 16);

        assert!((state.players[0].angle + TURN_SPEED).abs() < 1e-12);
        assert!((state.players[1].angle - (std::f64::consts::PI + TURN_SPEED)).abs() < 1e-12);
    }

    #[test]
    fn test_no_self_collision_at_start() {
        let mut state = round(4, 5.0, 7);
        let left = steer_all(&state, TurnIntent::new(true, false));

        for t in 1..=40 {
            let result = tick(&mut state, &left, scheduled_time(0, t));
            assert!(result.events.is_empty(), "unexpected event at tick {t}");
        }
        assert_eq!(state.alive_count(), 4);
    }

    #[test]
    fn test_full_loop_hits_own_trail() {
        let mut state = round(1, 2.0, 3);
        disable_gaps(&mut state);
        let left = steer_all(&state, TurnIntent::new(true, false));

        // A full circle takes 2π / 0.08 ≈ 79 ticks
        let mut respawned_at = None;
        for t in 1..=200 {
            let result = tick(&mut state, &left, scheduled_time(0, t));
            if !result.events.is_empty() {
                respawned_at = Some(t);
                break;
            }
        }

        let t = respawned_at.expect("circle never closed");
        assert!(t > 70 && t < 100, "closed at tick {t}");
    }

    #[test]
    fn test_gap_head_is_immune() {
        let mut state = round(2, 2.0, 1);
        disable_gaps(&mut state);
        state.players[1].trail = wall();
        place(&mut state, 0, 494.0, 300.0, 0.0);
        place(&mut state, 1, 700.0, 550.0, 0.0);

        let player = &mut state.players[0];
        player.gap_active = true;
        player.gap_end_time = 1000;

        let result = tick(&mut state, &BTreeMap::new(), 16);

        assert!(result.events.is_empty());
        assert!(state.players[0].alive);
        assert!(state.players[0].trail[0].is_gap);
    }

    #[test]
    fn test_gap_hole_is_passable() {
        let mut state = round(2, 2.0, 1);
        disable_gaps(&mut state);

        // Wall with a 40 unit hole around y = 300
        let mut wall = wall();
        for point in wall.iter_mut().filter(|p| (p.y - 300.0).abs() <= 20.0) {
            point.is_gap = true;
        }
        state.players[1].trail = wall;
        place(&mut state, 0, 480.0, 300.0, 0.0);
        place(&mut state, 1, 700.0, 550.0, 0.0);

        for t in 1..=20 {
            let result = tick(&mut state, &BTreeMap::new(), scheduled_time(0, t));
            assert!(result.events.is_empty());
        }
        assert!(state.players[0].x > 500.0, "passed through the hole");
    }

    #[test]
    fn test_three_players_winner() {
        let mut state = round(3, 2.0, 1);
        disable_gaps(&mut state);
        state.players[2].trail = wall();
        place(&mut state, 0, 494.0, 200.0, 0.0);
        place(&mut state, 1, 494.0, 400.0, 0.0);
        place(&mut state, 2, 100.0, 550.0, 0.0);

        let result = tick(&mut state, &BTreeMap::new(), 16);

        assert!(result.round_over);
        assert_eq!(result.outcome, Some(RoundOutcome::Winner(PlayerId(2))));
        assert!(!state.players[0].alive);
        assert!(!state.players[1].alive);

        // Two eliminations then the round end
        assert_eq!(result.events.len(), 3);
        match &result.events[0].data {
            GameEventData::PlayerEliminated { player_id, killer_id, cause, .. } => {
                assert_eq!(*player_id, PlayerId(0));
                assert_eq!(*killer_id, Some(PlayerId(2)));
                assert_eq!(*cause, EliminationCause::TrailCollision);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            result.events[2].data,
            GameEventData::RoundEnded { outcome: RoundOutcome::Winner(PlayerId(2)), .. }
        ));

        // Eliminated trails are sealed with a solid point
        let sealed = state.players[0].trail.last().unwrap();
        assert!(!sealed.is_gap);
    }

    #[test]
    fn test_simultaneous_death_is_draw() {
        let mut state = round(3, 2.0, 1);
        disable_gaps(&mut state);
        state.players[2].trail = wall();
        place(&mut state, 0, 494.0, 200.0, 0.0);
        place(&mut state, 1, 494.0, 400.0, 0.0);
        place(&mut state, 2, 494.0, 300.0, 0.0);

        let result = tick(&mut state, &BTreeMap::new(), 16);

        assert!(result.round_over);
        assert_eq!(result.outcome, Some(RoundOutcome::Draw));
        assert_eq!(state.alive_count(), 0);
    }

    #[test]
    fn test_round_over_is_terminal() {
        let mut state = round(3, 2.0, 1);
        disable_gaps(&mut state);
        state.players[2].trail = wall();
        place(&mut state, 0, 494.0, 200.0, 0.0);
        place(&mut state, 1, 494.0, 400.0, 0.0);
        tick(&mut state, &BTreeMap::new(), 16);

        let before = state.compute_hash();
        let result = tick(&mut state, &BTreeMap::new(), 32);

        assert!(result.round_over);
        assert!(result.events.is_empty());
        assert_eq!(state.compute_hash(), before);
    }

    #[test]
    fn test_single_player_respawns() {
        let mut state = round(1, 2.0, 1);
        disable_gaps(&mut state);
        state.players[0].trail = wall();
        place(&mut state, 0, 494.0, 300.0, 0.0);

        let result = tick(&mut state, &BTreeMap::new(), 16);

        assert!(!result.round_over);
        assert_eq!(result.events.len(), 1);
        assert!(matches!(result.events[0].data, GameEventData::PlayerRespawned { player_id: PlayerId(0) }));

        let player = &state.players[0];
        assert!(player.alive);
        assert!(player.trail.is_empty());
        assert_eq!((player.x, player.y, player.angle), (100.0, 300.0, 0.0));
    }

    #[test]
    fn test_non_finite_position_eliminates() {
        let mut state = round(2, 2.0, 1);
        disable_gaps(&mut state);
        state.players[0].angle = f64::NAN;

        let result = tick(&mut state, &BTreeMap::new(), 16);

        assert!(!state.players[0].alive);
        assert!(state.players[0].trail.iter().all(|p| p.x.is_finite() && p.y.is_finite()));
        assert!(matches!(
            result.events[0].data,
            GameEventData::PlayerEliminated { cause: EliminationCause::InvalidState, .. }
        ));
        assert_eq!(result.outcome, Some(RoundOutcome::Winner(PlayerId(1))));
    }

    #[test]
    fn test_head_on_lower_slot_wins() {
        // Slot 0 at x = 100 heading right, slot 1 at x = 700 heading left.
        // With a 600 unit gap, slot 1 is the first to move within reach.
        let mut state = round(2, 2.0, 9);
        disable_gaps(&mut state);

        let mut outcome = None;
        for t in 1..=400 {
            let result = tick(&mut state, &BTreeMap::new(), scheduled_time(0, t));
            if result.round_over {
                outcome = result.outcome;
                break;
            }
        }

        assert_eq!(outcome, Some(RoundOutcome::Winner(PlayerId(0))));
        assert_eq!(state.tick, 149);
        assert!(state.players[0].alive);
        assert!(!state.players[1].alive);
    }

    #[test]
    fn test_wrap_crossing_is_not_a_collision() {
        let mut state = round(2, 2.0, 1);
        disable_gaps(&mut state);
        place(&mut state, 0, 795.0, 300.0, 0.0);
        place(&mut state, 1, 400.0, 550.0, 0.0);

        for t in 1..=20 {
            let result = tick(&mut state, &BTreeMap::new(), scheduled_time(0, t));
            assert!(result.events.is_empty(), "event at tick {t}");
        }
        assert!(state.players[0].x < 100.0, "wrapped to the left edge");
    }

    #[test]
    fn test_replay_determinism() {
        let initial = round(4, 3.0, 99999);

        let mut logs: BTreeMap<PlayerId, IntentLog> = BTreeMap::new();
        for id in PlayerId::all(4) {
            let log = logs.entry(id).or_default();
            for t in 1..=300u32 {
                let phase = (t + id.0 as u32 * 17) % 100;
                log.record(t, TurnIntent::new(phase < 25, phase > 75));
            }
        }
        let clock: Vec<u64> = (1..=300).map(|t| scheduled_time(0, t)).collect();

        let (final1, events1) = replay_round(initial.clone(), &logs, &clock);
        let (final2, events2) = replay_round(initial, &logs, &clock);

        assert_eq!(final1.compute_hash(), final2.compute_hash());
        assert_eq!(events1, events2);
    }

    #[test]
    fn test_replay_matches_live_run() {
        let mut live = round(2, 2.0, 4242);
        let initial = live.clone();

        let mut logs: BTreeMap<PlayerId, IntentLog> = BTreeMap::new();
        let mut clock = Vec::new();
        for t in 1..=240u32 {
            let intents = BTreeMap::from([
                (PlayerId(0), TurnIntent::new(t % 50 < 10, false)),
                (PlayerId(1), TurnIntent::new(false, t % 70 < 20)),
            ]);
            for (id, intent) in &intents {
                logs.entry(*id).or_default().record(t, *intent);
            }
            // Irregular frame timing
            let now = t as u64 * 16 + (t as u64 % 3);
            clock.push(now);
            if tick(&mut live, &intents, now).round_over {
                break;
            }
        }

        let (replayed, _) = replay_round(initial, &logs, &clock);
        assert_eq!(replayed.compute_hash(), live.compute_hash());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn positions_stay_in_world(seed in any::<u64>(), speed in 1.0f64..5.0, pattern in any::<u32>()) {
            let mut state = round(4, speed, seed);
            for t in 1..=300u32 {
                let bits = pattern.rotate_left(t % 32);
                let intents = steer_all(&state, TurnIntent::new(bits & 1 == 1, bits & 2 == 2));
                tick(&mut state, &intents, scheduled_time(0, t));
                for player in &state.players {
                    prop_assert!((0.0..=WORLD.width).contains(&player.x));
                    prop_assert!((0.0..=WORLD.height).contains(&player.y));
                }
            }
        }

        #[test]
        fn trails_only_grow_and_dead_stay_dead(seed in any::<u64>(), pattern in any::<u32>()) {
            let mut state = round(3, 3.0, seed);
            let mut dead = vec![false; 3];
            let mut lengths = vec![0usize; 3];
            for t in 1..=400u32 {
                let bits = pattern.rotate_left(t % 32);
                let intents = steer_all(&state, TurnIntent::new(bits & 1 == 1, bits & 4 == 4));
                tick(&mut state, &intents, scheduled_time(0, t));
                for (i, player) in state.players.iter().enumerate() {
                    prop_assert!(player.trail.len() >= lengths[i]);
                    lengths[i] = player.trail.len();
                    if dead[i] {
                        prop_assert!(!player.alive);
                    }
                    dead[i] = !player.alive;
                }
            }
        }
    }
}
