//! Session Lifecycle
//!
//! Idle → RoundActive → RoundEnded → Countdown → RoundActive … and finally
//! Exited. Time only enters through the `now` arguments, so the machine
//! is as deterministic as the simulation.
//!
//! The authoritative side drives every transition. A follower (online
//! client) never advances on its own; it applies the transitions it is
//! told about with [`Lifecycle::follow`].

use serde::{Serialize, Deserialize};
use crate::game::state::RoundOutcome;

/// Pause between a round ending and the countdown starting (ms).
pub const ROUND_END_PAUSE_MS: u64 = 2_000;

/// Length of the restart countdown (ms).
pub const COUNTDOWN_MS: u64 = 5_000;

/// Lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Configured, no round yet
    Idle,
    /// Simulation running
    RoundActive,
    /// Round over, result on screen
    RoundEnded {
        /// How it ended
        outcome: RoundOutcome,
        /// When it ended (ms)
        since: u64,
    },
    /// Counting down to the next round
    Countdown {
        /// When the next round starts (ms)
        deadline: u64,
    },
    /// Left to the menu or lobby. Terminal.
    Exited,
}

/// A phase change worth telling peers and renderers about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// A multiplayer round just ended
    RoundEnded(RoundOutcome),
    /// Restart countdown began
    CountdownStarted,
    /// A fresh round replaced the old one
    RoundRestarted,
    /// The session is over
    ReturnedToLobby,
}

/// Lifecycle state machine.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    phase: Phase,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Start idle.
    pub fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Is the simulation supposed to tick?
    pub fn is_active(&self) -> bool {
        self.phase == Phase::RoundActive
    }

    /// Has the session been left?
    pub fn is_exited(&self) -> bool {
        self.phase == Phase::Exited
    }

    /// Idle → RoundActive. Returns false from any other phase.
    pub fn begin(&mut self) -> bool {
        if self.phase == Phase::Idle {
            self.phase = Phase::RoundActive;
            true
        } else {
            false
        }
    }

    /// RoundActive → RoundEnded.
    pub fn round_over(&mut self, outcome: RoundOutcome, now: u64) -> Option<Transition> {
        if self.phase != Phase::RoundActive {
            return None;
        }
        self.phase = Phase::RoundEnded { outcome, since: now };
        Some(Transition::RoundEnded(outcome))
    }

    /// Advance timed phases.
    ///
    /// RoundEnded becomes Countdown after the pause, Countdown becomes
    /// RoundActive at its deadline. At most one transition per call.
    pub fn poll(&mut self, now: u64) -> Option<Transition> {
        match self.phase {
            Phase::RoundEnded { since, .. } if now >= since + ROUND_END_PAUSE_MS => {
                self.phase = Phase::Countdown { deadline: now + COUNTDOWN_MS };
                Some(Transition::CountdownStarted)
            }
            Phase::Countdown { deadline } if now >= deadline => {
                self.phase = Phase::RoundActive;
                Some(Transition::RoundRestarted)
            }
            _ => None,
        }
    }

    /// Start the next round now, from RoundEnded or Countdown.
    pub fn skip(&mut self) -> Option<Transition> {
        match self.phase {
            Phase::RoundEnded { .. } | Phase::Countdown { .. } => {
                self.phase = Phase::RoundActive;
                Some(Transition::RoundRestarted)
            }
            _ => None,
        }
    }

    /// Leave from RoundEnded or Countdown.
    pub fn cancel(&mut self) -> Option<Transition> {
        match self.phase {
            Phase::RoundEnded { .. } | Phase::Countdown { .. } => self.abort(),
            _ => None,
        }
    }

    /// Leave from any phase (teardown).
    pub fn abort(&mut self) -> Option<Transition> {
        if self.phase == Phase::Exited {
            return None;
        }
        self.phase = Phase::Exited;
        Some(Transition::ReturnedToLobby)
    }

    /// Apply a transition announced by the authoritative side.
    ///
    /// Returns false when the transition does not apply to the current
    /// phase (duplicate or out of order) and leaves the phase unchanged.
    pub fn follow(&mut self, transition: Transition, now: u64) -> bool {
        let next = match (self.phase, transition) {
            (Phase::Exited, _) => return false,
            (_, Transition::ReturnedToLobby) => Phase::Exited,
            (Phase::RoundActive, Transition::RoundEnded(outcome)) => {
                Phase::RoundEnded { outcome, since: now }
            }
            (Phase::RoundEnded { .. }, Transition::CountdownStarted) => {
                Phase::Countdown { deadline: now + COUNTDOWN_MS }
            }
            (Phase::Idle | Phase::RoundEnded { .. } | Phase::Countdown { .. }, Transition::RoundRestarted) => {
                Phase::RoundActive
            }
            _ => return false,
        };
        self.phase = next;
        true
    }

    /// Whole seconds left on the countdown, rounded up.
    pub fn countdown_remaining_secs(&self, now: u64) -> Option<u64> {
        match self.phase {
            Phase::Countdown { deadline } => Some(deadline.saturating_sub(now).div_ceil(1000)),
            _ => None,
        }
    }
}
