//! Per-enemy behaviour: a two-mode state machine (wander / chase) driven once per server tick.
//!
//! Chasing always steers toward the *remembered* position of the target, refreshed only while the
//! target is visible. Breaking line of sight therefore sends the enemy to the last place it saw the
//! player, after which it gives up and wanders again.

use crate::raycast::{line_of_sight, wall_avoidance};
use crate::tilemap::{Aabb, TileMap};
use rand::Rng;
use shared::{EnemySnapshot, EnemyState, Vec2, ENTITY_HEIGHT, ENTITY_WIDTH};
use std::collections::BTreeMap;
use std::f32::consts::{FRAC_PI_2, PI};

/// Remembered points closer than this count as reached.
pub const ARRIVAL_RADIUS: f32 = 4.0;
/// Multiplicative wander speed decay applied every wander tick.
pub const WANDER_DECAY: f32 = 0.98;
/// Maximum random heading change when a new wander leg is chosen, in radians.
pub const WANDER_JITTER: f32 = 0.6;
pub const WANDER_MIN_DISTANCE: f32 = 24.0;
pub const WANDER_MAX_DISTANCE: f32 = 64.0;
/// Weight of the wall-avoidance push relative to the unit chase direction.
pub const AVOIDANCE_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnemyKind {
    Blob,
    Stalker,
    BroodMother,
}

/// Tuning for one enemy kind. Speeds are px/s, distances px, times seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KindProfile {
    pub chase_speed: f32,
    pub wander_speed: f32,
    pub wander_floor: f32,
    pub vision: f32,
    pub tether: f32,
    pub spawn_interval: Option<f32>,
    pub max_children: usize,
}

impl EnemyKind {
    /// Spawner variant ids used by level files.
    pub fn from_variant(variant: i64) -> Option<Self> {
        match variant {
            1 => Some(EnemyKind::Blob),
            2 => Some(EnemyKind::Stalker),
            3 => Some(EnemyKind::BroodMother),
            _ => None,
        }
    }

    pub fn profile(self) -> KindProfile {
        match self {
            EnemyKind::Blob => KindProfile {
                chase_speed: 30.0,
                wander_speed: 20.0,
                wander_floor: 6.0,
                vision: 120.0,
                tether: 96.0,
                spawn_interval: None,
                max_children: 0,
            },
            EnemyKind::Stalker => KindProfile {
                chase_speed: 55.0,
                wander_speed: 28.0,
                wander_floor: 10.0,
                vision: 180.0,
                tether: 128.0,
                spawn_interval: None,
                max_children: 0,
            },
            EnemyKind::BroodMother => KindProfile {
                chase_speed: 20.0,
                wander_speed: 14.0,
                wander_floor: 5.0,
                vision: 150.0,
                tether: 64.0,
                spawn_interval: Some(4.0),
                max_children: 3,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiMode {
    Wander,
    Chase,
}

/// Read-only world view handed to every enemy during a tick.
pub struct TickContext<'a> {
    pub map: &'a TileMap,
    /// Connected players by id, top-left positions.
    pub players: &'a BTreeMap<u32, Vec2>,
    pub dt: f32,
}

/// Asks the manager to create a new enemy. Ids are assigned by the manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnRequest {
    pub kind: EnemyKind,
    pub position: Vec2,
    pub parent: u32,
}

#[derive(Debug, Clone)]
pub struct Enemy {
    pub id: u32,
    pub kind: EnemyKind,
    pub position: Vec2,
    pub velocity: Vec2,
    pub flip: bool,
    pub state: EnemyState,
    pub spawn: Vec2,
    pub target: Option<u32>,
    pub mode: AiMode,
    /// Enemy that spawned this one, if any.
    pub parent: Option<u32>,
    wander_angle: f32,
    wander_remaining: f32,
    wander_speed: f32,
    last_seen: BTreeMap<u32, Vec2>,
    spawn_cooldown: f32,
}

fn entity_center(position: Vec2) -> Vec2 {
    Vec2::new(
        position.x + ENTITY_WIDTH / 2.0,
        position.y + ENTITY_HEIGHT / 2.0,
    )
}

impl Enemy {
    pub fn new(id: u32, kind: EnemyKind, spawn: Vec2) -> Self {
        let profile = kind.profile();
        Self {
            id,
            kind,
            position: spawn,
            velocity: Vec2::ZERO,
            flip: false,
            state: EnemyState::Idle,
            spawn,
            target: None,
            mode: AiMode::Wander,
            parent: None,
            wander_angle: 0.0,
            wander_remaining: 0.0,
            wander_speed: profile.wander_speed,
            last_seen: BTreeMap::new(),
            spawn_cooldown: profile.spawn_interval.unwrap_or(0.0),
        }
    }

    pub fn hitbox(&self) -> Aabb {
        Aabb::new(self.position.x, self.position.y, ENTITY_WIDTH, ENTITY_HEIGHT)
    }

    pub fn center(&self) -> Vec2 {
        entity_center(self.position)
    }

    pub fn wander_heading(&self) -> f32 {
        self.wander_angle
    }

    pub fn wander_speed(&self) -> f32 {
        self.wander_speed
    }

    pub fn last_seen(&self, player_id: u32) -> Option<Vec2> {
        self.last_seen.get(&player_id).copied()
    }

    /// Drops every reference to a player that left. Falls back to wandering if it was the target.
    pub fn forget_player(&mut self, player_id: u32) {
        self.last_seen.remove(&player_id);
        if self.target == Some(player_id) {
            self.target = None;
            self.mode = AiMode::Wander;
            self.state = EnemyState::Idle;
        }
    }

    /// Nearest visible player within vision range. Ties go to the lowest id.
    fn acquire_target(&self, ctx: &TickContext<'_>) -> Option<(u32, Vec2)> {
        let vision = self.kind.profile().vision;
        let center = self.center();
        let mut best: Option<(f32, u32, Vec2)> = None;

        for (&id, &position) in ctx.players {
            let player_center = entity_center(position);
            let dist_sq = center.distance_squared(player_center);
            if dist_sq > vision * vision {
                continue;
            }
            if best.map_or(false, |(d, _, _)| d <= dist_sq) {
                continue;
            }
            if line_of_sight(ctx.map, center, player_center) {
                best = Some((dist_sq, id, position));
            }
        }

        best.map(|(_, id, position)| (id, position))
    }

    /// Advances this enemy by one tick. `live_children` is the number of enemies currently alive
    /// that were spawned by this one.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        ctx: &TickContext<'_>,
        live_children: usize,
        rng: &mut R,
    ) -> Option<SpawnRequest> {
        let profile = self.kind.profile();

        self.last_seen.retain(|id, _| ctx.players.contains_key(id));
        if self.target.map_or(false, |id| !ctx.players.contains_key(&id)) {
            self.target = None;
        }

        let visible = self.acquire_target(ctx);
        if let Some((id, position)) = visible {
            if self.mode != AiMode::Chase {
                self.wander_speed = profile.wander_speed;
                self.spawn_cooldown = profile.spawn_interval.unwrap_or(0.0);
            }
            self.mode = AiMode::Chase;
            self.target = Some(id);
            self.last_seen.insert(id, position);
        }

        let goal = self.target.and_then(|id| self.last_seen(id));
        let still_chasing = match goal {
            Some(goal) => self.chase(ctx, goal, visible.is_some()),
            None => false,
        };

        if still_chasing {
            self.mode = AiMode::Chase;
            self.state = match self.kind {
                EnemyKind::BroodMother => EnemyState::Rage,
                _ => EnemyState::Chase,
            };
        } else {
            self.mode = AiMode::Wander;
            self.target = None;
            self.state = EnemyState::Idle;
            self.wander(ctx, rng);
        }

        self.spawn_reinforcement(ctx.dt, live_children)
    }

    /// Steps toward `goal`. Returns false once the chase is over: the remembered point was reached
    /// without seeing the player, or it cannot be approached at all.
    fn chase(&mut self, ctx: &TickContext<'_>, goal: Vec2, visible: bool) -> bool {
        let profile = self.kind.profile();
        let to_goal = goal - self.position;
        let distance = to_goal.magnitude();

        if !visible && distance <= ARRIVAL_RADIUS {
            self.drop_target_memory();
            return false;
        }

        let mut direction = if distance > 1.0 {
            to_goal.normalize()
        } else {
            Vec2::ZERO
        };
        if !direction.is_zero() {
            let push = wall_avoidance(ctx.map, self.center());
            direction = (direction + push.normalize() * AVOIDANCE_WEIGHT).normalize();
        }

        let step = profile.chase_speed * ctx.dt;
        let delta = if distance < step {
            to_goal
        } else {
            direction * step
        };

        let (position, hit) = ctx.map.move_and_collide(self.hitbox(), delta);
        self.velocity = if ctx.dt > 0.0 {
            delta * (1.0 / ctx.dt)
        } else {
            Vec2::ZERO
        };
        if hit.x {
            self.velocity.x = 0.0;
        }
        if hit.y {
            self.velocity.y = 0.0;
        }
        self.position = position;
        if self.velocity.x != 0.0 {
            self.flip = self.velocity.x < 0.0;
        }

        if hit.both() && !visible {
            self.drop_target_memory();
            return false;
        }
        true
    }

    fn drop_target_memory(&mut self) {
        if let Some(id) = self.target.take() {
            self.last_seen.remove(&id);
        }
    }

    fn wander<R: Rng + ?Sized>(&mut self, ctx: &TickContext<'_>, rng: &mut R) {
        let profile = self.kind.profile();
        if self.wander_remaining <= 0.0 {
            self.choose_wander_heading(rng);
        }

        self.wander_speed = (self.wander_speed * WANDER_DECAY).max(profile.wander_floor);
        let mut velocity = Vec2::from_angle(self.wander_angle, self.wander_speed);
        let (position, hit) = ctx.map.move_and_collide(self.hitbox(), velocity * ctx.dt);
        self.position = position;
        self.wander_remaining -= self.wander_speed * ctx.dt;

        if hit.x {
            velocity.x = 0.0;
        }
        if hit.y {
            velocity.y = 0.0;
        }
        self.velocity = velocity;
        if velocity.x != 0.0 {
            self.flip = velocity.x < 0.0;
        }

        if hit.both() {
            self.wander_angle += PI;
        } else if hit.x {
            self.wander_angle = if self.wander_angle.sin() < 0.0 {
                -FRAC_PI_2
            } else {
                FRAC_PI_2
            };
        } else if hit.y {
            self.wander_angle = if self.wander_angle.cos() < 0.0 { PI } else { 0.0 };
        }
    }

    /// Starts a new wander leg. Beyond the tether the heading points home; otherwise the previous
    /// heading is perturbed.
    fn choose_wander_heading<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let home = self.spawn - self.position;
        if home.magnitude() > self.kind.profile().tether {
            self.wander_angle = home.angle();
        } else {
            self.wander_angle += rng.gen_range(-WANDER_JITTER..=WANDER_JITTER);
        }
        self.wander_remaining = rng.gen_range(WANDER_MIN_DISTANCE..=WANDER_MAX_DISTANCE);
    }

    fn spawn_reinforcement(&mut self, dt: f32, live_children: usize) -> Option<SpawnRequest> {
        let profile = self.kind.profile();
        let interval = profile.spawn_interval?;
        if self.mode != AiMode::Chase {
            return None;
        }

        self.spawn_cooldown -= dt;
        if self.spawn_cooldown > 0.0 {
            return None;
        }
        self.spawn_cooldown = interval;

        if live_children >= profile.max_children {
            return None;
        }
        Some(SpawnRequest {
            kind: EnemyKind::Blob,
            position: self.position,
            parent: self.id,
        })
    }

    pub fn snapshot(&self) -> EnemySnapshot {
        EnemySnapshot {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            flip: self.flip,
            state: self.state,
        }
    }
}
