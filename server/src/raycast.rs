//! Stepped ray marching through the tile grid.

use crate::tilemap::TileMap;
use shared::Vec2;
use std::f32::consts::TAU;

/// Distance between consecutive solidity samples along a ray.
pub const RAY_STEP: f32 = 4.0;
pub const AVOIDANCE_RAYS: usize = 12;
pub const AVOIDANCE_RAY_LENGTH: f32 = 8.0;

/// Marches from `origin` along `angle`, testing a point every `step` pixels up to `max_distance`
/// (inclusive). Returns true as soon as a sample lands in a solid tile.
pub fn raycast_hits(map: &TileMap, origin: Vec2, angle: f32, max_distance: f32, step: f32) -> bool {
    let advance = Vec2::from_angle(angle, step);
    let mut sample = origin;
    let mut travelled = 0.0;
    while travelled <= max_distance {
        if map.is_solid(sample) {
            return true;
        }
        sample += advance;
        travelled += step;
    }
    false
}

/// True when no solid tile lies between `from` and `to`. The march stops one step short of
/// `to` so a target standing against a wall is still visible.
pub fn line_of_sight(map: &TileMap, from: Vec2, to: Vec2) -> bool {
    let distance = from.distance(to);
    let heading = (to - from).angle();
    !raycast_hits(map, from, heading, distance - RAY_STEP, RAY_STEP)
}

/// Sum of unit vectors pointing away from every nearby wall. Zero in open space.
pub fn wall_avoidance(map: &TileMap, origin: Vec2) -> Vec2 {
    let mut push = Vec2::ZERO;
    for i in 0..AVOIDANCE_RAYS {
        let angle = i as f32 * TAU / AVOIDANCE_RAYS as f32;
        if raycast_hits(map, origin, angle, AVOIDANCE_RAY_LENGTH, RAY_STEP) {
            push += Vec2::from_angle(angle + std::f32::consts::PI, 1.0);
        }
    }
    push
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tilemap::TileKind;
    use assert_approx_eq::assert_approx_eq;

    fn wall_at_col(col: i32) -> TileMap {
        let mut map = TileMap::new(16.0);
        for row in -4..4 {
            map.insert(col, row, TileKind::Solid);
        }
        map
    }

    #[test]
    fn test_line_of_sight_open_space() {
        let map = TileMap::new(16.0);
        assert!(line_of_sight(&map, Vec2::new(0.0, 0.0), Vec2::new(100.0, 40.0)));
    }

    #[test]
    fn test_line_of_sight_blocked_by_wall() {
        let map = wall_at_col(3);
        assert!(!line_of_sight(&map, Vec2::new(8.0, 8.0), Vec2::new(100.0, 8.0)));
        assert!(!line_of_sight(&map, Vec2::new(100.0, 8.0), Vec2::new(8.0, 8.0)));
    }

    #[test]
    fn test_target_against_wall_is_visible() {
        let map = wall_at_col(3);
        // Target centre sits 2px in front of the wall at x = 48.
        assert!(line_of_sight(&map, Vec2::new(8.0, 8.0), Vec2::new(46.0, 8.0)));
    }

    #[test]
    fn test_adjacent_points_always_visible() {
        let map = wall_at_col(3);
        assert!(line_of_sight(&map, Vec2::new(40.0, 8.0), Vec2::new(42.0, 8.0)));
    }

    #[test]
    fn test_raycast_range_is_inclusive() {
        let map = wall_at_col(1);
        // Wall starts at x = 16; samples at 0, 4, 8, 12, 16.
        assert!(raycast_hits(&map, Vec2::new(0.0, 0.0), 0.0, 16.0, 4.0));
        assert!(!raycast_hits(&map, Vec2::new(0.0, 0.0), 0.0, 15.0, 4.0));
    }

    #[test]
    fn test_wall_avoidance_points_away() {
        let map = wall_at_col(1);
        let push = wall_avoidance(&map, Vec2::new(12.0, 8.0));
        assert!(push.x < 0.0, "push should point away from the wall, got {:?}", push);
        assert_approx_eq!(push.y, 0.0, 1e-4);
    }

    #[test]
    fn test_wall_avoidance_open_space() {
        let map = TileMap::new(16.0);
        assert!(wall_avoidance(&map, Vec2::new(12.0, 8.0)).is_zero());
    }
}
