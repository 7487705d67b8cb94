//! Sparse tile grid answering collision queries for the enemy simulation.
//!
//! Tiles are keyed by integer grid coordinate. Absent keys are empty space. A grid is built once per
//! level and never mutated afterwards; level changes swap in a whole new `TileMap`.

use shared::{Vec2, DEFAULT_TILE_SIZE};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    /// Blocks movement and line of sight.
    Solid,
    Decorative,
}

impl TileKind {
    /// Maps a level file tile type to its collision behaviour.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "grass" | "stone" => TileKind::Solid,
            _ => TileKind::Decorative,
        }
    }
}

/// Axis-aligned box in world pixels, anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Aabb {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Strict overlap; boxes that only share an edge do not intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        !(self.right() <= other.x
            || other.right() <= self.x
            || self.bottom() <= other.y
            || other.bottom() <= self.y)
    }
}

/// Which axes were blocked during one movement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collisions {
    pub x: bool,
    pub y: bool,
}

impl Collisions {
    pub fn any(&self) -> bool {
        self.x || self.y
    }

    pub fn both(&self) -> bool {
        self.x && self.y
    }
}

#[derive(Debug, Clone)]
pub struct TileMap {
    tile_size: f32,
    tiles: HashMap<(i32, i32), TileKind>,
}

impl Default for TileMap {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

impl TileMap {
    pub fn new(tile_size: f32) -> Self {
        Self {
            tile_size,
            tiles: HashMap::new(),
        }
    }

    pub fn insert(&mut self, col: i32, row: i32, kind: TileKind) {
        self.tiles.insert((col, row), kind);
    }

    pub fn tile_size(&self) -> f32 {
        self.tile_size
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Grid cell containing a pixel-space point. Uses floor division so negative
    /// coordinates land in negative cells.
    pub fn tile_coord(&self, point: Vec2) -> (i32, i32) {
        (
            (point.x / self.tile_size).floor() as i32,
            (point.y / self.tile_size).floor() as i32,
        )
    }

    pub fn is_solid_tile(&self, col: i32, row: i32) -> bool {
        matches!(self.tiles.get(&(col, row)), Some(TileKind::Solid))
    }

    pub fn is_solid(&self, point: Vec2) -> bool {
        let (col, row) = self.tile_coord(point);
        self.is_solid_tile(col, row)
    }

    /// Solid tiles in the 3x3 neighbourhood of the cell containing `point`.
    pub fn boxes_around(&self, point: Vec2) -> Vec<Aabb> {
        let (col, row) = self.tile_coord(point);
        let mut boxes = Vec::new();
        for c in col - 1..=col + 1 {
            for r in row - 1..=row + 1 {
                if self.is_solid_tile(c, r) {
                    boxes.push(Aabb::new(
                        c as f32 * self.tile_size,
                        r as f32 * self.tile_size,
                        self.tile_size,
                        self.tile_size,
                    ));
                }
            }
        }
        boxes
    }

    /// Moves `body` by `delta`, resolving X first and then Y against the surrounding solid tiles.
    /// The body is clamped flush against whatever it hit. Returns the new top-left corner and the
    /// axes that collided.
    pub fn move_and_collide(&self, body: Aabb, delta: Vec2) -> (Vec2, Collisions) {
        let mut rect = body;
        let mut collisions = Collisions::default();

        rect.x += delta.x;
        for tile in self.boxes_around(rect.center()) {
            if rect.intersects(&tile) {
                if delta.x > 0.0 {
                    rect.x = tile.x - rect.w;
                } else if delta.x < 0.0 {
                    rect.x = tile.right();
                }
                collisions.x = true;
            }
        }

        rect.y += delta.y;
        for tile in self.boxes_around(rect.center()) {
            if rect.intersects(&tile) {
                if delta.y > 0.0 {
                    rect.y = tile.y - rect.h;
                } else if delta.y < 0.0 {
                    rect.y = tile.bottom();
                }
                collisions.y = true;
            }
        }

        (Vec2::new(rect.x, rect.y), collisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn floor_map() -> TileMap {
        let mut map = TileMap::new(16.0);
        for col in -2..6 {
            map.insert(col, 4, TileKind::Solid);
        }
        map.insert(1, 3, TileKind::Decorative);
        map
    }

    #[test]
    fn test_tile_kind_from_type_name() {
        assert_eq!(TileKind::from_type_name("grass"), TileKind::Solid);
        assert_eq!(TileKind::from_type_name("stone"), TileKind::Solid);
        assert_eq!(TileKind::from_type_name("decor"), TileKind::Decorative);
        assert_eq!(TileKind::from_type_name("spawners"), TileKind::Decorative);
    }

    #[test]
    fn test_is_solid() {
        let map = floor_map();
        assert!(map.is_solid(Vec2::new(0.0, 64.0)));
        assert!(map.is_solid(Vec2::new(95.9, 79.9)));
        assert!(!map.is_solid(Vec2::new(0.0, 63.9)));
        assert!(!map.is_solid(Vec2::new(20.0, 50.0)), "decorative tiles are not solid");
        assert!(!map.is_solid(Vec2::new(500.0, 500.0)), "absent tiles are empty");
    }

    #[test]
    fn test_negative_coordinates_use_floor() {
        let map = floor_map();
        assert_eq!(map.tile_coord(Vec2::new(-0.5, -0.5)), (-1, -1));
        assert!(map.is_solid(Vec2::new(-1.0, 70.0)));
        assert!(map.is_solid(Vec2::new(-32.0, 64.0)));
        assert!(!map.is_solid(Vec2::new(-33.0, 64.0)));
    }

    #[test]
    fn test_boxes_around_neighbourhood() {
        let map = floor_map();
        let boxes = map.boxes_around(Vec2::new(24.0, 56.0));
        assert_eq!(boxes.len(), 3);
        for b in &boxes {
            assert_eq!(b.y, 64.0);
            assert_eq!(b.w, 16.0);
        }

        assert!(map.boxes_around(Vec2::new(24.0, 8.0)).is_empty());
    }

    #[test]
    fn test_aabb_edge_contact_is_not_overlap() {
        let a = Aabb::new(0.0, 0.0, 8.0, 15.0);
        assert!(!a.intersects(&Aabb::new(8.0, 0.0, 16.0, 16.0)));
        assert!(a.intersects(&Aabb::new(7.9, 0.0, 16.0, 16.0)));
    }

    #[test]
    fn test_move_and_collide_lands_on_floor() {
        let map = floor_map();
        let body = Aabb::new(20.0, 45.0, 8.0, 15.0);
        let (pos, hit) = map.move_and_collide(body, Vec2::new(2.0, 10.0));

        assert!(!hit.x);
        assert!(hit.y);
        assert_approx_eq!(pos.x, 22.0);
        assert_approx_eq!(pos.y, 64.0 - 15.0);
    }

    #[test]
    fn test_move_and_collide_against_wall() {
        let mut map = TileMap::new(16.0);
        map.insert(2, 0, TileKind::Solid);
        let body = Aabb::new(20.0, 0.0, 8.0, 15.0);
        let (pos, hit) = map.move_and_collide(body, Vec2::new(6.0, 1.0));

        assert!(hit.x);
        assert!(!hit.y);
        assert_approx_eq!(pos.x, 24.0);
        assert_approx_eq!(pos.y, 1.0);
    }

    #[test]
    fn test_move_in_open_space() {
        let map = TileMap::default();
        let body = Aabb::new(0.0, 0.0, 8.0, 15.0);
        let (pos, hit) = map.move_and_collide(body, Vec2::new(-3.0, 4.0));
        assert!(!hit.any());
        assert_eq!(pos, Vec2::new(-3.0, 4.0));
    }
}
