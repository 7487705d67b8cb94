//! Authoritative world state and the rules that mutate it.
//!
//! `World` knows nothing about sockets. Every inbound message and every tick returns the datagrams
//! that should go out, already encoded, so the whole protocol can be driven from tests.

use crate::ai::EnemyManager;
use crate::level::{Level, LevelError, LevelSource};
use crate::session_manager::SessionManager;
use log::{debug, error, info, warn};
use shared::{ClientMessage, ServerMessage, WorldSnapshot};
use std::net::SocketAddr;
use std::time::Duration;

/// Encoded datagrams produced by the world.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    SendTo {
        addr: SocketAddr,
        payload: Vec<u8>,
    },
    /// The same payload unicast to every listed endpoint.
    Broadcast {
        addrs: Vec<SocketAddr>,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct WorldConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub start_level: u32,
    pub seed: Option<u64>,
    /// Sessions silent for longer than this are dropped. None keeps them until they disconnect.
    pub idle_timeout: Option<Duration>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_rate: shared::DEFAULT_TICK_RATE,
            max_clients: 32,
            start_level: 0,
            seed: None,
            idle_timeout: None,
        }
    }
}

pub struct World {
    levels: Box<dyn LevelSource>,
    level: Level,
    sessions: SessionManager,
    enemies: EnemyManager,
    tick: u64,
    dt: f32,
    idle_timeout: Option<Duration>,
    level_change_pending: bool,
    /// Whether the active level started with enemies. Levels without any never auto-advance.
    level_had_enemies: bool,
    auto_change_attempted: bool,
}

fn encode(message: &ServerMessage) -> Option<Vec<u8>> {
    match message.encode() {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!("Failed to encode {:?}: {}", message, e);
            None
        }
    }
}

impl World {
    /// Loads the start level. Failing to load it is fatal.
    pub fn new(levels: Box<dyn LevelSource>, config: &WorldConfig) -> Result<Self, LevelError> {
        let level = levels.load(config.start_level)?;
        let mut enemies = EnemyManager::new(config.seed);
        enemies.reset_from_level(&level);
        info!(
            "Loaded level {} ({} tiles, {} levels available)",
            level.id,
            level.tiles.len(),
            levels.level_count()
        );

        Ok(Self {
            levels,
            level_had_enemies: !enemies.is_empty(),
            level,
            sessions: SessionManager::new(config.max_clients),
            enemies,
            tick: 0,
            dt: 1.0 / config.tick_rate.max(1) as f32,
            idle_timeout: config.idle_timeout,
            level_change_pending: false,
            auto_change_attempted: false,
        })
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn level_id(&self) -> u32 {
        self.level.id
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn enemies(&self) -> &EnemyManager {
        &self.enemies
    }

    pub fn enemies_mut(&mut self) -> &mut EnemyManager {
        &mut self.enemies
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn level_change_pending(&self) -> bool {
        self.level_change_pending
    }

    /// Applies one decoded client message.
    pub fn handle_message(&mut self, message: ClientMessage, addr: SocketAddr) -> Vec<Outbound> {
        let mut out = Vec::new();

        match message {
            ClientMessage::Connect => {
                let spawn = self.level.player_start();
                match self.sessions.connect(addr, spawn) {
                    Some(player_id) => {
                        if let Some(payload) = encode(&ServerMessage::Assigned { player_id }) {
                            out.push(Outbound::SendTo { addr, payload });
                        }
                    }
                    None => warn!("Rejected connect from {}: server full", addr),
                }
            }

            ClientMessage::Disconnect => {
                if let Some(player_id) = self.sessions.disconnect(addr) {
                    self.enemies.forget_player(player_id);
                }
            }

            ClientMessage::PlayerReport(report) => {
                if !self.sessions.apply_report(addr, &report) {
                    debug!("Ignoring report from unknown endpoint {}", addr);
                }
            }

            ClientMessage::Ping { timestamp } => {
                self.sessions.touch(addr);
                if let Some(payload) = encode(&ServerMessage::Pong { timestamp }) {
                    out.push(Outbound::SendTo { addr, payload });
                }
            }

            ClientMessage::RemoveEnemy { enemy_id } => {
                let Some(player_id) = self.sessions.find_by_addr(addr) else {
                    debug!("Ignoring enemy removal from unknown endpoint {}", addr);
                    return out;
                };
                self.sessions.touch(addr);
                if self.enemies.remove(enemy_id) {
                    info!("Player {} killed enemy {}", player_id, enemy_id);
                }
            }

            ClientMessage::RequestLevelChange => {
                let Some(player_id) = self.sessions.find_by_addr(addr) else {
                    debug!("Ignoring level change request from unknown endpoint {}", addr);
                    return out;
                };
                self.sessions.touch(addr);
                info!("Player {} requested a level change", player_id);
                self.level_change_pending = true;
            }
        }

        out
    }

    /// Queues a switch to the next level. It takes effect at the start of the next tick.
    pub fn request_level_change(&mut self) {
        self.level_change_pending = true;
    }

    /// Advances the world by one fixed step and produces this tick's broadcasts.
    pub fn tick(&mut self) -> Vec<Outbound> {
        self.tick += 1;
        let mut out = Vec::new();

        if let Some(timeout) = self.idle_timeout {
            for (player_id, _) in self.sessions.evict_idle(timeout) {
                self.enemies.forget_player(player_id);
            }
        }

        if self.level_had_enemies && self.enemies.is_empty() && !self.auto_change_attempted {
            info!("Level {} cleared", self.level.id);
            self.auto_change_attempted = true;
            self.level_change_pending = true;
        }

        if self.level_change_pending {
            self.level_change_pending = false;
            out.extend(self.change_level());
        }

        let players = self.sessions.positions();
        self.enemies.tick(&self.level.tiles, &players, self.dt);

        let addrs = self.addrs();
        if !addrs.is_empty() {
            if let Some(payload) = encode(&ServerMessage::Snapshot(self.snapshot())) {
                out.push(Outbound::Broadcast { addrs, payload });
            }
        }

        if self.tick % 300 == 0 {
            debug!(
                "Tick {}: {} players, {} enemies on level {}",
                self.tick,
                self.sessions.len(),
                self.enemies.len(),
                self.level.id
            );
        }

        out
    }

    /// Swaps in the next level: new grid, fresh enemies, every session at the new start.
    /// A level that fails to load leaves the current one untouched.
    fn change_level(&mut self) -> Option<Outbound> {
        let next_id = self.levels.next_id(self.level.id);
        let level = match self.levels.load(next_id) {
            Ok(level) => level,
            Err(e) => {
                warn!("Level change to {} aborted: {}", next_id, e);
                return None;
            }
        };

        self.enemies.reset_from_level(&level);
        self.sessions.relocate_all(level.player_start());
        self.level_had_enemies = !self.enemies.is_empty();
        self.auto_change_attempted = false;
        self.level = level;
        info!("Changed to level {}", self.level.id);

        let addrs = self.addrs();
        let payload = encode(&ServerMessage::LevelChanged {
            level_id: self.level.id,
        })?;
        if addrs.is_empty() {
            return None;
        }
        Some(Outbound::Broadcast { addrs, payload })
    }

    fn addrs(&self) -> Vec<SocketAddr> {
        self.sessions
            .endpoints()
            .into_iter()
            .map(|(_, addr)| addr)
            .collect()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            players: self.sessions.snapshots(),
            enemies: self.enemies.snapshots(),
        }
    }
}
