//! Swept-circle item gathering detector.
//!
//! A gatherer is the segment a dog swept over one tick together with its
//! collection radius; an item is a stationary circle (loot has radius zero,
//! deposit bases 0.5). An item is gathered when the closest point of the
//! sweep passes within the combined radius, and every hit is reported with
//! the normalized time `t ∈ [0, 1]` along the sweep so the caller can apply
//! pickups in the order they actually happened.

use crate::geom::Point2D;

/// A stationary collectible: position plus collection radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Item {
    pub position: Point2D,
    pub width: f64,
}

/// One dog's movement over a tick: swept segment plus collection radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gatherer {
    pub start_pos: Point2D,
    pub end_pos: Point2D,
    pub width: f64,
}

/// Projection of an item onto a sweep segment.
#[derive(Debug, Clone, Copy)]
pub struct CollectionResult {
    /// Squared distance from the item to the closest point of the segment's
    /// supporting line.
    pub sq_distance: f64,
    /// Position of that closest point along the segment, 0 at start, 1 at
    /// end. Values outside [0, 1] mean the closest approach lies beyond an
    /// endpoint.
    pub proj_ratio: f64,
}

impl CollectionResult {
    pub fn is_collected(&self, collect_radius: f64) -> bool {
        self.proj_ratio >= 0.0
            && self.proj_ratio <= 1.0
            && self.sq_distance <= collect_radius * collect_radius
    }
}

/// A detected gathering: which item, which gatherer, and when along the
/// sweep the pickup happened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatheringEvent {
    pub item_index: usize,
    pub gatherer_index: usize,
    pub sq_distance: f64,
    pub time: f64,
}

/// Projects point `c` onto the segment `a -> b`.
///
/// The caller must ensure `a != b`; a degenerate segment has no defined
/// direction and is filtered out by [`find_gather_events`].
pub fn try_collect_point(a: Point2D, b: Point2D, c: Point2D) -> CollectionResult {
    let u_x = c.x - a.x;
    let u_y = c.y - a.y;
    let v_x = b.x - a.x;
    let v_y = b.y - a.y;
    let u_dot_v = u_x * v_x + u_y * v_y;
    let u_len2 = u_x * u_x + u_y * u_y;
    let v_len2 = v_x * v_x + v_y * v_y;

    CollectionResult {
        sq_distance: u_len2 - (u_dot_v * u_dot_v) / v_len2,
        proj_ratio: u_dot_v / v_len2,
    }
}

/// Finds every (item, gatherer) pair whose sweep passes within collection
/// range this tick.
///
/// Gatherers with zero displacement are skipped. Events are sorted ascending
/// by `time`; ties keep the order the pairs were examined in, so the result
/// is deterministic for a fixed input ordering.
pub fn find_gather_events(items: &[Item], gatherers: &[Gatherer]) -> Vec<GatheringEvent> {
    let mut events = Vec::new();

    for (g, gatherer) in gatherers.iter().enumerate() {
        if gatherer.start_pos == gatherer.end_pos {
            continue;
        }

        for (i, item) in items.iter().enumerate() {
            let result = try_collect_point(gatherer.start_pos, gatherer.end_pos, item.position);
            let collect_radius = gatherer.width + item.width;
            if result.is_collected(collect_radius) {
                events.push(GatheringEvent {
                    item_index: i,
                    gatherer_index: g,
                    sq_distance: result.sq_distance,
                    time: result.proj_ratio,
                });
            }
        }
    }

    events.sort_by(|a, b| a.time.total_cmp(&b.time));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn gatherer(start: (f64, f64), end: (f64, f64), width: f64) -> Gatherer {
        Gatherer {
            start_pos: Point2D::new(start.0, start.1),
            end_pos: Point2D::new(end.0, end.1),
            width,
        }
    }

    fn item(pos: (f64, f64), width: f64) -> Item {
        Item {
            position: Point2D::new(pos.0, pos.1),
            width,
        }
    }

    #[test]
    fn test_point_on_segment_midpoint() {
        let result = try_collect_point(
            Point2D::new(4.0, 0.0),
            Point2D::new(6.0, 0.0),
            Point2D::new(5.0, 0.0),
        );
        assert_approx_eq!(result.proj_ratio, 0.5, 1e-10);
        assert_approx_eq!(result.sq_distance, 0.0, 1e-10);
        assert!(result.is_collected(0.6));
    }

    #[test]
    fn test_point_beyond_segment_end_not_collected() {
        let result = try_collect_point(
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.0),
            Point2D::new(2.0, 0.0),
        );
        assert!(result.proj_ratio > 1.0);
        assert!(!result.is_collected(0.6));
    }

    #[test]
    fn test_lateral_distance_respects_radius() {
        // Item sits 0.5 off the sweep line: inside radius 0.6, outside 0.4.
        let result = try_collect_point(
            Point2D::new(0.0, 0.0),
            Point2D::new(2.0, 0.0),
            Point2D::new(1.0, 0.5),
        );
        assert!(result.is_collected(0.6));
        assert!(!result.is_collected(0.4));
    }

    #[test]
    fn test_stationary_gatherer_produces_no_events() {
        let items = vec![item((0.0, 0.0), 0.0)];
        let gatherers = vec![gatherer((0.0, 0.0), (0.0, 0.0), 0.6)];
        assert!(find_gather_events(&items, &gatherers).is_empty());
    }

    #[test]
    fn test_events_sorted_by_time() {
        // Two items along one sweep: the nearer one must come first even
        // though it is listed second.
        let items = vec![item((8.0, 0.0), 0.0), item((2.0, 0.0), 0.0)];
        let gatherers = vec![gatherer((0.0, 0.0), (10.0, 0.0), 0.6)];

        let events = find_gather_events(&items, &gatherers);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].item_index, 1);
        assert_eq!(events[1].item_index, 0);
        assert!(events[0].time < events[1].time);
        assert_approx_eq!(events[0].time, 0.2, 1e-10);
        assert_approx_eq!(events[1].time, 0.8, 1e-10);
    }

    #[test]
    fn test_tie_keeps_examination_order() {
        // Both gatherers cross the same item at the same ratio; insertion
        // order must be preserved.
        let items = vec![item((5.0, 0.0), 0.0)];
        let gatherers = vec![
            gatherer((4.0, 0.0), (6.0, 0.0), 0.6),
            gatherer((4.0, 0.1), (6.0, 0.1), 0.6),
        ];

        let events = find_gather_events(&items, &gatherers);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].gatherer_index, 0);
        assert_eq!(events[1].gatherer_index, 1);
    }

    #[test]
    fn test_wide_item_collected_by_passing_sweep() {
        // A base (radius 0.5) half a cell off the road is still gathered.
        let items = vec![item((3.0, 3.0), 0.5)];
        let gatherers = vec![gatherer((2.0, 3.9), (4.0, 3.9), 0.6)];

        let events = find_gather_events(&items, &gatherers);
        assert_eq!(events.len(), 1);
        assert_approx_eq!(events[0].time, 0.5, 1e-10);
    }

    #[test]
    fn test_item_behind_sweep_ignored() {
        let items = vec![item((-1.0, 0.0), 0.0)];
        let gatherers = vec![gatherer((0.0, 0.0), (5.0, 0.0), 0.6)];
        assert!(find_gather_events(&items, &gatherers).is_empty());
    }
}
