//! Input Capture and Normalization
//!
//! Turns device events into per-player turn intents, caches remote
//! intents on the host and records intent changes for replay.

use std::collections::{BTreeMap, BTreeSet};
use serde::{Serialize, Deserialize};
use crate::game::state::{ControlSource, PlayerId, Roster};

// =============================================================================
// TURN INTENT
// =============================================================================

/// Steering input of one player for one tick.
///
/// Both flags set cancel out, as does neither.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnIntent {
    /// Steer counter-clockwise (heading decreases)
    pub turn_left: bool,
    /// Steer clockwise (heading increases)
    pub turn_right: bool,
}

impl TurnIntent {
    /// No steering.
    pub const STRAIGHT: Self = Self { turn_left: false, turn_right: false };

    /// Create from both flags.
    pub const fn new(turn_left: bool, turn_right: bool) -> Self {
        Self { turn_left, turn_right }
    }

    /// Heading change for this tick.
    #[inline]
    pub fn heading_delta(self, turn_speed: f64) -> f64 {
        match (self.turn_left, self.turn_right) {
            (true, false) => -turn_speed,
            (false, true) => turn_speed,
            _ => 0.0,
        }
    }

    /// No net steering.
    #[inline]
    pub fn is_straight(self) -> bool {
        self.turn_left == self.turn_right
    }
}

// =============================================================================
// CONTROL SCHEMES
// =============================================================================

/// Pointer button.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    /// Primary button
    Left,
    /// Secondary button
    Right,
}

/// Side of an on-screen touch control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchSide {
    /// Turn-left button
    Left,
    /// Turn-right button
    Right,
}

/// One physical control bound to a turn direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// Keyboard key by its `KeyboardEvent.key` name
    Key(&'static str),
    /// Pointer button
    Pointer(PointerButton),
}

/// Left/right bindings of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlScheme {
    /// Turn left binding
    pub turn_left: Binding,
    /// Turn right binding
    pub turn_right: Binding,
    /// Source reported for the slot
    pub source: ControlSource,
}

/// Default bindings by slot id.
pub const CONTROL_SCHEMES: [ControlScheme; 4] = [
    ControlScheme {
        turn_left: Binding::Key("a"),
        turn_right: Binding::Key("d"),
        source: ControlSource::Keyboard,
    },
    ControlScheme {
        turn_left: Binding::Key("j"),
        turn_right: Binding::Key("l"),
        source: ControlSource::Keyboard,
    },
    ControlScheme {
        turn_left: Binding::Key("ArrowLeft"),
        turn_right: Binding::Key("ArrowRight"),
        source: ControlSource::Keyboard,
    },
    ControlScheme {
        turn_left: Binding::Pointer(PointerButton::Left),
        turn_right: Binding::Pointer(PointerButton::Right),
        source: ControlSource::Mouse,
    },
];

impl ControlScheme {
    /// Bindings of a slot.
    pub fn for_player(id: PlayerId) -> &'static ControlScheme {
        &CONTROL_SCHEMES[id.index() % CONTROL_SCHEMES.len()]
    }
}

// =============================================================================
// LOCAL CONTROLS
// =============================================================================

/// A raw device event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    /// Key pressed (`KeyboardEvent.key` naming)
    KeyDown(String),
    /// Key released
    KeyUp(String),
    /// Pointer button pressed
    PointerDown(PointerButton),
    /// Pointer button released
    PointerUp(PointerButton),
    /// On-screen turn button of a slot pressed
    TouchStart {
        /// Slot the button belongs to
        player: PlayerId,
        /// Which button
        side: TouchSide,
    },
    /// On-screen turn button of a slot released
    TouchEnd {
        /// Slot the button belongs to
        player: PlayerId,
        /// Which button
        side: TouchSide,
    },
    /// Window lost focus: everything is released
    ReleaseAll,
}

/// Held-state of every local control.
///
/// Single-character keys are matched case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct LocalControls {
    keys: BTreeSet<String>,
    pointer: BTreeSet<PointerButton>,
    touches: BTreeMap<PlayerId, TurnIntent>,
}

fn normalize_key(key: &str) -> String {
    if key.chars().count() == 1 {
        key.to_lowercase()
    } else {
        key.to_string()
    }
}

impl LocalControls {
    /// All controls released.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a device event.
    pub fn apply(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::KeyDown(key) => {
                self.keys.insert(normalize_key(&key));
            }
            ControlEvent::KeyUp(key) => {
                self.keys.remove(&normalize_key(&key));
            }
            ControlEvent::PointerDown(button) => {
                self.pointer.insert(button);
            }
            ControlEvent::PointerUp(button) => {
                self.pointer.remove(&button);
            }
            ControlEvent::TouchStart { player, side } => self.set_touch(player, side, true),
            ControlEvent::TouchEnd { player, side } => self.set_touch(player, side, false),
            ControlEvent::ReleaseAll => {
                self.keys.clear();
                self.pointer.clear();
                self.touches.clear();
            }
        }
    }

    fn set_touch(&mut self, player: PlayerId, side: TouchSide, held: bool) {
        let intent = self.touches.entry(player).or_default();
        match side {
            TouchSide::Left => intent.turn_left = held,
            TouchSide::Right => intent.turn_right = held,
        }
    }

    fn is_held(&self, binding: Binding) -> bool {
        match binding {
            Binding::Key(key) => self.keys.contains(&normalize_key(key)),
            Binding::Pointer(button) => self.pointer.contains(&button),
        }
    }

    /// Current intent of a slot.
    ///
    /// Keyboard and mouse slots read their scheme bindings, touch slots
    /// their own on-screen buttons. Remote slots have no local input.
    pub fn intent(&self, id: PlayerId, source: ControlSource) -> TurnIntent {
        match source {
            ControlSource::Keyboard | ControlSource::Mouse => {
                let scheme = ControlScheme::for_player(id);
                TurnIntent::new(self.is_held(scheme.turn_left), self.is_held(scheme.turn_right))
            }
            ControlSource::Touch => self.touches.get(&id).copied().unwrap_or_default(),
            ControlSource::Remote => TurnIntent::STRAIGHT,
        }
    }

    /// Intents of every locally controlled slot of the roster.
    pub fn intents(&self, roster: &Roster) -> BTreeMap<PlayerId, TurnIntent> {
        roster
            .iter()
            .filter(|(_, source)| *source != ControlSource::Remote)
            .map(|(id, source)| (id, self.intent(id, source)))
            .collect()
    }
}

// =============================================================================
// INTENT CACHE
// =============================================================================

/// Last intent received from one remote slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachedIntent {
    /// The intent
    pub intent: TurnIntent,
    /// Sender's timestamp (informational)
    pub timestamp: u64,
}

/// Host-side cache of remote intents.
///
/// Last received wins regardless of timestamp. Slots with no entry
/// steer straight.
#[derive(Clone, Debug, Default)]
pub struct IntentCache {
    entries: BTreeMap<PlayerId, CachedIntent>,
}

impl IntentCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest intent of a slot.
    pub fn record(&mut self, id: PlayerId, intent: TurnIntent, timestamp: u64) {
        self.entries.insert(id, CachedIntent { intent, timestamp });
    }

    /// Latest intent of a slot.
    pub fn get(&self, id: PlayerId) -> TurnIntent {
        self.entries.get(&id).map(|e| e.intent).unwrap_or_default()
    }

    /// Forget a slot (disconnect). It steers straight from now on.
    pub fn reset(&mut self, id: PlayerId) {
        self.entries.remove(&id);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Cached intents overlaid with local ones.
    pub fn merged_with(&self, local: &BTreeMap<PlayerId, TurnIntent>) -> BTreeMap<PlayerId, TurnIntent> {
        let mut merged: BTreeMap<_, _> = self.entries.iter().map(|(id, e)| (*id, e.intent)).collect();
        merged.extend(local.iter().map(|(id, intent)| (*id, *intent)));
        merged
    }
}

// =============================================================================
// INTENT LOG
// =============================================================================

/// Intent change at a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentDelta {
    /// First tick with this intent
    pub tick: u32,
    /// The new intent
    pub intent: TurnIntent,
}

/// Delta-compressed intent recording of one slot for one round.
///
/// Only stores ticks where the intent changed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IntentLog {
    /// Last recorded tick
    pub end_tick: u32,

    deltas: Vec<IntentDelta>,

    #[serde(skip)]
    last: TurnIntent,
}

impl IntentLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the intent applied at `tick`.
    pub fn record(&mut self, tick: u32, intent: TurnIntent) {
        self.end_tick = self.end_tick.max(tick);

        if intent != self.last {
            self.deltas.push(IntentDelta { tick, intent });
            self.last = intent;
        }
    }

    /// Intent in effect at `tick`.
    pub fn intent_at(&self, tick: u32) -> TurnIntent {
        let idx = self.deltas.partition_point(|d| d.tick <= tick);
        if idx == 0 {
            TurnIntent::STRAIGHT
        } else {
            self.deltas[idx - 1].intent
        }
    }

    /// All recorded changes.
    pub fn deltas(&self) -> &[IntentDelta] {
        &self.deltas
    }
}

// =============================================================================
// TESTS
// =============================================================================
