//! Planar Geometry
//!
//! Pure functions over world-space floats. The simulation runs on one
//! host, so `f64` arithmetic is deterministic for a given build.

/// Euclidean distance between two points.
#[inline]
pub fn distance(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = ax - bx;
    let dy = ay - by;
    (dx * dx + dy * dy).sqrt()
}

/// Distance from point `p` to the segment `a`–`b`.
///
/// The projection of `p` onto the line is clamped to the segment ends.
/// A zero-length segment degrades to the point distance to `a`.
pub fn point_to_segment_distance(
    px: f64, py: f64,
    ax: f64, ay: f64,
    bx: f64, by: f64,
) -> f64 {
    let seg_x = bx - ax;
    let seg_y = by - ay;
    let len_sq = seg_x * seg_x + seg_y * seg_y;

    if len_sq == 0.0 {
        return distance(px, py, ax, ay);
    }

    let t = ((px - ax) * seg_x + (py - ay) * seg_y) / len_sq;
    let t = t.clamp(0.0, 1.0);

    distance(px, py, ax + t * seg_x, ay + t * seg_y)
}

/// Wrap one coordinate of the toroidal world.
///
/// Leaving through one edge re-enters at the opposite edge:
/// `pos < 0` maps to `max`, `pos > max` maps to `0`.
#[inline]
pub fn wrap_position(pos: f64, max: f64) -> f64 {
    if pos < 0.0 {
        max
    } else if pos > max {
        0.0
    } else {
        pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wrap_examples() {
        assert_eq!(wrap_position(-1.0, 100.0), 100.0);
        assert_eq!(wrap_position(101.0, 100.0), 0.0);
        assert_eq!(wrap_position(50.0, 100.0), 50.0);
        assert_eq!(wrap_position(0.0, 100.0), 0.0);
        assert_eq!(wrap_position(100.0, 100.0), 100.0);
    }

    #[test]
    fn test_segment_distance_projection() {
        // Perpendicular foot inside the segment
        let d = point_to_segment_distance(5.0, 3.0, 0.0, 0.0, 10.0, 0.0);
        assert!((d - 3.0).abs() < 1e-12);

        // Beyond the end: clamped to b
        let d = point_to_segment_distance(13.0, 4.0, 0.0, 0.0, 10.0, 0.0);
        assert!((d - 5.0).abs() < 1e-12);

        // Before the start: clamped to a
        let d = point_to_segment_distance(-3.0, -4.0, 0.0, 0.0, 10.0, 0.0);
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_length_segment() {
        let d = point_to_segment_distance(3.0, 4.0, 0.0, 0.0, 0.0, 0.0);
        assert!((d - 5.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn wrap_twice_stays_in_world(pos in -1.0e6f64..1.0e6, eps in 0.0f64..50.0, max in 1.0f64..4000.0) {
            let once = wrap_position(pos, max);
            let twice = wrap_position(once + eps, max);
            prop_assert!((0.0..=max).contains(&once));
            prop_assert!((0.0..=max).contains(&twice));
        }

        #[test]
        fn segment_distance_never_exceeds_endpoint_distance(
            px in -500.0f64..500.0, py in -500.0f64..500.0,
            ax in -500.0f64..500.0, ay in -500.0f64..500.0,
            bx in -500.0f64..500.0, by in -500.0f64..500.0,
        ) {
            let d = point_to_segment_distance(px, py, ax, ay, bx, by);
            let to_a = distance(px, py, ax, ay);
            let to_b = distance(px, py, bx, by);
            prop_assert!(d >= 0.0);
            prop_assert!(d <= to_a + 1e-9);
            prop_assert!(d <= to_b + 1e-9);
        }
    }
}
