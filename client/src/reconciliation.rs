//! Client-side smoothing of remote players and enemies
//!
//! Every remote entity keeps two positions: the latest authoritative one from the server and
//! the one actually shown. Between snapshots the shown position is dead-reckoned along the
//! last known velocity; on top of that it is pulled exponentially toward the server position
//! projected forward by the time since that position arrived.

use crate::network::RemoteState;
use shared::{Action, EnemyState, Vec2};
use std::collections::HashMap;

/// Default pull toward the authoritative position, per second
pub const DEFAULT_SMOOTHING_RATE: f32 = 10.0;

/// Locally held view of one remote entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteEntityView {
    pub display: Vec2,
    pub server: Vec2,
    pub velocity: Vec2,
    /// Seconds since `server` was last observed
    pub since_update: f32,
}

impl RemoteEntityView {
    /// First sighting: shown exactly where the server says
    pub fn new(server: Vec2, velocity: Vec2) -> Self {
        Self {
            display: server,
            server,
            velocity,
            since_update: 0.0,
        }
    }

    pub fn observe(&mut self, server: Vec2, velocity: Vec2) {
        self.server = server;
        self.velocity = velocity;
        self.since_update = 0.0;
    }

    /// Advances the shown position by `dt` seconds
    pub fn advance(&mut self, dt: f32, rate: f32) {
        if dt <= 0.0 {
            return;
        }
        self.since_update += dt;
        self.display += self.velocity * dt;

        let target = self.server + self.velocity * self.since_update;
        let blend = (rate * dt).clamp(0.0, 1.0);
        self.display += (target - self.display) * blend;
    }

    /// Distance between shown and projected authoritative position
    pub fn error(&self) -> f32 {
        let target = self.server + self.velocity * self.since_update;
        self.display.distance(target)
    }
}

/// Remote player as the renderer needs it
#[derive(Debug, Clone, Copy)]
pub struct RemotePlayer {
    pub view: RemoteEntityView,
    pub action: Action,
    pub flip: bool,
    pub weapon_id: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct RemoteEnemy {
    pub view: RemoteEntityView,
    pub flip: bool,
    pub state: EnemyState,
    /// Snapshot clock value when `view.server` was taken, for velocity estimation
    observed_at: f32,
}

/// All remote views, fed by snapshots and advanced once per frame
#[derive(Debug, Clone)]
pub struct Reconciler {
    rate: f32,
    local_id: Option<u32>,
    players: HashMap<u32, RemotePlayer>,
    enemies: HashMap<u32, RemoteEnemy>,
    /// Seconds advanced so far
    clock: f32,
    /// Level epoch of the last applied snapshot
    level_epoch: u64,
}

impl Reconciler {
    pub fn new(rate: f32) -> Self {
        Self {
            rate: rate.max(0.0),
            local_id: None,
            players: HashMap::new(),
            enemies: HashMap::new(),
            clock: 0.0,
            level_epoch: 0,
        }
    }

    /// The local player is simulated locally and never reconciled
    pub fn set_local_id(&mut self, id: u32) {
        self.local_id = Some(id);
        self.players.remove(&id);
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Folds a snapshot into the views. A snapshot from a newer level epoch discards every
    /// view first, so a level-change teleport is never smoothed.
    pub fn apply_snapshot(&mut self, state: &RemoteState) {
        if state.level_epoch != self.level_epoch {
            self.reset();
            self.level_epoch = state.level_epoch;
        }

        let local_id = self.local_id;
        self.players.retain(|id, _| state.players.contains_key(id));
        self.enemies.retain(|id, _| state.enemies.contains_key(id));

        for player in state.players.values().filter(|p| Some(p.id) != local_id) {
            let position = Vec2::new(player.x, player.y);
            let velocity = Vec2::new(player.vx, player.vy);

            self.players
                .entry(player.id)
                .and_modify(|remote| {
                    remote.view.observe(position, velocity);
                    remote.action = player.action;
                    remote.flip = player.flip;
                    remote.weapon_id = player.weapon_id;
                })
                .or_insert(RemotePlayer {
                    view: RemoteEntityView::new(position, velocity),
                    action: player.action,
                    flip: player.flip,
                    weapon_id: player.weapon_id,
                });
        }

        let now = self.clock;
        for enemy in state.enemies.values() {
            let position = Vec2::new(enemy.x, enemy.y);

            match self.enemies.get_mut(&enemy.id) {
                Some(remote) => {
                    let elapsed = now - remote.observed_at;
                    let velocity = if elapsed > 0.0 {
                        (position - remote.view.server) * (1.0 / elapsed)
                    } else {
                        remote.view.velocity
                    };
                    remote.view.observe(position, velocity);
                    remote.flip = enemy.flip;
                    remote.state = enemy.state;
                    if elapsed > 0.0 {
                        remote.observed_at = now;
                    }
                }
                None => {
                    self.enemies.insert(
                        enemy.id,
                        RemoteEnemy {
                            view: RemoteEntityView::new(position, Vec2::ZERO),
                            flip: enemy.flip,
                            state: enemy.state,
                            observed_at: now,
                        },
                    );
                }
            }
        }
    }

    /// Level change: everything teleported. Views are rebuilt from the next snapshot,
    /// which places them without smoothing.
    pub fn reset(&mut self) {
        self.players.clear();
        self.enemies.clear();
    }

    pub fn advance(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.clock += dt;
        for remote in self.players.values_mut() {
            remote.view.advance(dt, self.rate);
        }
        for remote in self.enemies.values_mut() {
            remote.view.advance(dt, self.rate);
        }
    }

    pub fn player(&self, id: u32) -> Option<&RemotePlayer> {
        self.players.get(&id)
    }

    pub fn enemy(&self, id: u32) -> Option<&RemoteEnemy> {
        self.enemies.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = (&u32, &RemotePlayer)> {
        self.players.iter()
    }

    pub fn enemies(&self) -> impl Iterator<Item = (&u32, &RemoteEnemy)> {
        self.enemies.iter()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_RATE)
    }
}
