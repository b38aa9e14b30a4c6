//! Arena
//!
//! The authoritative owner of a play session: configuration, roster,
//! the current round and the lifecycle around it. Local play drives an
//! `Arena` directly; an online host wraps one.

use std::collections::BTreeMap;

use crate::core::rng::derive_round_seed;
use crate::game::input::TurnIntent;
use crate::game::lifecycle::{Lifecycle, Phase, Transition};
use crate::game::state::{
    ConfigError, GameConfig, GameState, Player, PlayerId, Roster, RoundState, WorldSize,
};
use crate::game::tick::{tick, TickResult};

/// What one `Arena::update` did.
#[derive(Debug, Default)]
pub struct ArenaUpdate {
    /// Tick result, when the simulation ran
    pub tick: Option<TickResult>,
    /// Lifecycle transitions, in order
    pub transitions: Vec<Transition>,
}

/// Authoritative session owner.
#[derive(Debug)]
pub struct Arena {
    config: GameConfig,
    world: WorldSize,
    roster: Roster,
    session_seed: u64,
    rounds_started: u32,
    round: Option<RoundState>,
    lifecycle: Lifecycle,
}

impl Arena {
    /// Validate the setup. No round exists until [`Arena::start`].
    pub fn new(
        config: GameConfig,
        world: WorldSize,
        roster: Roster,
        session_seed: u64,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        world.validate()?;
        if roster.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        if let Some((id, _)) = roster.iter().find(|(id, _)| id.0 >= config.player_count) {
            return Err(ConfigError::UnknownSlot(id));
        }

        Ok(Self {
            config,
            world,
            roster,
            session_seed,
            rounds_started: 0,
            round: None,
            lifecycle: Lifecycle::new(),
        })
    }

    /// Spawn the first round. Only valid while idle.
    pub fn start(&mut self, now: u64) -> Result<bool, ConfigError> {
        if self.lifecycle.phase() != Phase::Idle {
            return Ok(false);
        }
        self.new_round(now)?;
        Ok(self.lifecycle.begin())
    }

    fn new_round(&mut self, now: u64) -> Result<(), ConfigError> {
        self.rounds_started += 1;
        let seed = derive_round_seed(self.session_seed, self.rounds_started, &self.roster.id_bytes());
        let round = RoundState::new(
            self.rounds_started,
            self.config,
            self.world,
            &self.roster,
            seed,
            now,
        )?;
        self.round = Some(round);
        Ok(())
    }

    /// Advance one frame.
    ///
    /// While a round is active this runs one tick with `intents`; between
    /// rounds it advances the pause and countdown timers.
    pub fn update(&mut self, now: u64, intents: &BTreeMap<PlayerId, TurnIntent>) -> ArenaUpdate {
        let mut update = ArenaUpdate::default();

        if self.lifecycle.is_active() {
            if let Some(round) = self.round.as_mut() {
                let result = tick(round, intents, now);
                if let Some(outcome) = result.outcome {
                    update.transitions.extend(self.lifecycle.round_over(outcome, now));
                }
                update.tick = Some(result);
            }
            return update;
        }

        if let Some(transition) = self.lifecycle.poll(now) {
            self.apply(transition, now, &mut update.transitions);
        }
        update
    }

    /// Start the next round immediately (between rounds only).
    pub fn skip(&mut self, now: u64) -> Vec<Transition> {
        let mut transitions = Vec::new();
        if let Some(transition) = self.lifecycle.skip() {
            self.apply(transition, now, &mut transitions);
        }
        transitions
    }

    /// Leave to the lobby (between rounds only).
    pub fn cancel(&mut self) -> Vec<Transition> {
        self.lifecycle.cancel().into_iter().collect()
    }

    /// Leave from any phase.
    pub fn abort(&mut self) -> Vec<Transition> {
        self.lifecycle.abort().into_iter().collect()
    }

    fn apply(&mut self, transition: Transition, now: u64, out: &mut Vec<Transition>) {
        if transition != Transition::RoundRestarted {
            out.push(transition);
            return;
        }

        // A multiplayer session needs two slots to go on
        let enough = self.config.is_survival() || self.roster.len() >= 2;
        if enough && self.new_round(now).is_ok() {
            out.push(transition);
        } else {
            out.extend(self.lifecycle.abort());
        }
    }

    /// Retire a slot from future rounds.
    ///
    /// The player stays in the current round and steers straight.
    pub fn retire_slot(&mut self, id: PlayerId) -> bool {
        self.roster.retire(id)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Whole seconds left on the restart countdown.
    pub fn countdown_remaining_secs(&self, now: u64) -> Option<u64> {
        self.lifecycle.countdown_remaining_secs(now)
    }

    /// Current round, once started.
    pub fn round(&self) -> Option<&RoundState> {
        self.round.as_ref()
    }

    /// Players of the current round (empty before the first).
    pub fn players(&self) -> &[Player] {
        self.round.as_ref().map(|r| r.players.as_slice()).unwrap_or_default()
    }

    /// Wire snapshot of the current player set.
    pub fn snapshot(&self, timestamp: u64) -> GameState {
        GameState { players: self.players().to_vec(), timestamp }
    }

    /// Round configuration.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// World size.
    pub fn world(&self) -> WorldSize {
        self.world
    }

    /// Active slots.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Rounds started so far.
    pub fn rounds_started(&self) -> u32 {
        self.rounds_started
    }
}
