//! Owns every live enemy and drives them once per tick in ascending id order.

use crate::enemy::{Enemy, EnemyKind, SpawnRequest, TickContext};
use crate::level::Level;
use crate::tilemap::TileMap;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{EnemySnapshot, Vec2};
use std::collections::{BTreeMap, HashMap};

pub struct EnemyManager {
    enemies: BTreeMap<u32, Enemy>,
    /// Never reset, so ids stay unique across level changes.
    next_enemy_id: u32,
    rng: StdRng,
}

impl EnemyManager {
    /// A fixed seed makes wander behaviour reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            enemies: BTreeMap::new(),
            next_enemy_id: 1,
            rng,
        }
    }

    /// Replaces the population with one enemy per spawner marker of `level`.
    pub fn reset_from_level(&mut self, level: &Level) {
        self.enemies.clear();
        for (kind, position) in level.enemy_spawns() {
            self.spawn(kind, position, None);
        }
        info!(
            "Level {} populated with {} enemies",
            level.id,
            self.enemies.len()
        );
    }

    pub fn spawn(&mut self, kind: EnemyKind, position: Vec2, parent: Option<u32>) -> u32 {
        let id = self.next_enemy_id;
        self.next_enemy_id += 1;

        let mut enemy = Enemy::new(id, kind, position);
        enemy.parent = parent;
        self.enemies.insert(id, enemy);
        id
    }

    pub fn tick(&mut self, map: &TileMap, players: &BTreeMap<u32, Vec2>, dt: f32) {
        let ctx = TickContext { map, players, dt };

        let mut children: HashMap<u32, usize> = HashMap::new();
        for parent in self.enemies.values().filter_map(|e| e.parent) {
            *children.entry(parent).or_default() += 1;
        }

        let mut requests: Vec<SpawnRequest> = Vec::new();
        for enemy in self.enemies.values_mut() {
            let live = children.get(&enemy.id).copied().unwrap_or(0);
            if let Some(request) = enemy.update(&ctx, live, &mut self.rng) {
                requests.push(request);
            }
        }

        for request in requests {
            let id = self.spawn(request.kind, request.position, Some(request.parent));
            debug!("Enemy {} spawned enemy {}", request.parent, id);
        }
    }

    pub fn remove(&mut self, enemy_id: u32) -> bool {
        self.enemies.remove(&enemy_id).is_some()
    }

    /// Clears every reference to a departed player within the current tick.
    pub fn forget_player(&mut self, player_id: u32) {
        for enemy in self.enemies.values_mut() {
            enemy.forget_player(player_id);
        }
    }

    pub fn get(&self, enemy_id: u32) -> Option<&Enemy> {
        self.enemies.get(&enemy_id)
    }

    pub fn get_mut(&mut self, enemy_id: u32) -> Option<&mut Enemy> {
        self.enemies.get_mut(&enemy_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Enemy> {
        self.enemies.values()
    }

    pub fn snapshots(&self) -> Vec<EnemySnapshot> {
        self.enemies.values().map(Enemy::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.enemies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enemies.is_empty()
    }
}
