//! Collision Detection
//!
//! Head-vs-trail tests. A trail is a polyline of recorded points; gap
//! points are never hazards and neither is any segment touching one.
//! Segments longer than the wrap threshold join points on opposite edges
//! of the world and are skipped too.

use crate::core::geometry::{distance, point_to_segment_distance};
use crate::game::state::{Player, PlayerId, TrailPoint};

/// Half-width of a drawn trail. Heads collide below twice this distance.
pub const TRAIL_WIDTH: f64 = 3.0;

/// Longest segment treated as solid. Longer ones crossed a world edge.
pub const MAX_SEGMENT_LENGTH: f64 = 20.0;

/// Lower bound for the self-grace window, in trail points.
pub const MIN_SELF_GRACE_POINTS: usize = 5;

/// Tunables for one round's collision tests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionConfig {
    /// Half-width of a trail
    pub trail_width: f64,
    /// Most recent own trail points ignored
    pub self_grace_points: usize,
    /// Wrap-around threshold for segments
    pub max_segment_length: f64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self::for_speed(2.0)
    }
}

impl CollisionConfig {
    /// Grace window sized for the given speed.
    ///
    /// The head must travel `2 * TRAIL_WIDTH` before its own points fall
    /// out of reach; two extra points cover the segment joining them.
    pub fn for_speed(speed: f64) -> Self {
        let reach = TRAIL_WIDTH * 2.0;
        let grace = if speed.is_finite() && speed > 0.0 {
            ((reach / speed).ceil() as usize + 2).max(MIN_SELF_GRACE_POINTS)
        } else {
            MIN_SELF_GRACE_POINTS
        };

        Self {
            trail_width: TRAIL_WIDTH,
            self_grace_points: grace,
            max_segment_length: MAX_SEGMENT_LENGTH,
        }
    }

    /// Distance below which a head hits a trail.
    #[inline]
    pub fn hit_radius(&self) -> f64 {
        self.trail_width * 2.0
    }
}

/// A solid piece of trail.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Hazard {
    /// A single solid point
    Point {
        /// X coordinate
        x: f64,
        /// Y coordinate
        y: f64,
    },
    /// A solid segment between two consecutive solid points
    Segment {
        /// Start X
        ax: f64,
        /// Start Y
        ay: f64,
        /// End X
        bx: f64,
        /// End Y
        by: f64,
    },
}

impl Hazard {
    /// Distance from `(x, y)` to this hazard.
    #[inline]
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        match *self {
            Hazard::Point { x: px, y: py } => distance(x, y, px, py),
            Hazard::Segment { ax, ay, bx, by } => point_to_segment_distance(x, y, ax, ay, bx, by),
        }
    }
}

/// Solid hazards of a trail, oldest first, ignoring the last `skip_recent` points.
pub fn hazards(
    trail: &[TrailPoint],
    skip_recent: usize,
    max_segment_length: f64,
) -> impl Iterator<Item = Hazard> + '_ {
    let end = trail.len().saturating_sub(skip_recent);

    (0..end)
        .flat_map(move |i| {
            let point = trail[i];
            if point.is_gap {
                return [None, None];
            }

            let solid = Some(Hazard::Point { x: point.x, y: point.y });

            let segment = i
                .checked_sub(1)
                .map(|prev| trail[prev])
                .filter(|prev| !prev.is_gap)
                .filter(|prev| distance(prev.x, prev.y, point.x, point.y) <= max_segment_length)
                .map(|prev| Hazard::Segment { ax: prev.x, ay: prev.y, bx: point.x, by: point.y });

            [solid, segment]
        })
        .flatten()
}

/// Owner of the first trail within reach of `(x, y)`, if any.
///
/// Players are tested in slot order. Dead players' trails stay solid.
/// Only `self_id`'s own trail gets the grace window.
pub fn find_collision(
    x: f64,
    y: f64,
    players: &[Player],
    self_id: PlayerId,
    config: &CollisionConfig,
) -> Option<PlayerId> {
    let radius = config.hit_radius();

    players
        .iter()
        .find(|player| {
            let skip = if player.id == self_id { config.self_grace_points } else { 0 };
            hazards(&player.trail, skip, config.max_segment_length)
                .any(|hazard| hazard.distance_to(x, y) < radius)
        })
        .map(|player| player.id)
}

/// Does `(x, y)` hit any solid trail?
#[inline]
pub fn check_collision(
    x: f64,
    y: f64,
    players: &[Player],
    self_id: PlayerId,
    config: &CollisionConfig,
) -> bool {
    find_collision(x, y, players, self_id, config).is_some()
}
