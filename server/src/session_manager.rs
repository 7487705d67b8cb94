//! Player session management for the multiplayer server
//!
//! This module binds transport endpoints to stable player ids, including:
//! - Session lifecycle (connect, disconnect, optional idle eviction)
//! - Storage of each player's last reported transform, action and weapon
//! - Capacity management and endpoint lookup for snapshot fan-out
//!
//! Players simulate their own movement; the server only stores what they report.
//! Sessions are never created implicitly: a report from an unknown endpoint is ignored.

use log::{debug, info};
use shared::{Action, PlayerReport, PlayerSnapshot, Vec2};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Represents a connected player and their latest reported state
#[derive(Debug, Clone)]
pub struct PlayerSession {
    /// Unique player identifier assigned by the server
    pub id: u32,
    /// Network address for sending snapshots
    pub addr: SocketAddr,
    pub position: Vec2,
    pub velocity: Vec2,
    pub action: Action,
    pub flip: bool,
    pub weapon_id: u8,
    /// Last time we received any datagram from this endpoint
    pub last_seen: Instant,
}

impl PlayerSession {
    /// Creates a new session standing idle at `spawn`
    pub fn new(id: u32, addr: SocketAddr, spawn: Vec2) -> Self {
        Self {
            id,
            addr,
            position: spawn,
            velocity: Vec2::ZERO,
            action: Action::Idle,
            flip: false,
            weapon_id: 0,
            last_seen: Instant::now(),
        }
    }

    /// Overwrites the stored transform with a client report and marks the session active
    pub fn apply_report(&mut self, report: &PlayerReport) {
        self.position = Vec2::new(report.x, report.y);
        self.velocity = Vec2::new(report.vx, report.vy);
        self.action = report.action;
        self.flip = report.flip;
        self.weapon_id = report.weapon_id;
        self.last_seen = Instant::now();
    }

    /// Checks if the session has been silent for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            x: self.position.x,
            y: self.position.y,
            vx: self.velocity.x,
            vy: self.velocity.y,
            action: self.action,
            flip: self.flip,
            weapon_id: self.weapon_id,
        }
    }
}

/// Manages all connected players
///
/// Exactly one session exists per endpoint and ids increase monotonically, so an id is
/// never handed to a second endpoint while anything might still reference it. Sessions
/// are kept in id order to give the AI a deterministic iteration order.
pub struct SessionManager {
    /// Live sessions indexed by player id
    sessions: BTreeMap<u32, PlayerSession>,
    /// Reverse index from endpoint to player id
    endpoints: HashMap<SocketAddr, u32>,
    /// Next id for a new connection
    next_player_id: u32,
    /// Maximum number of concurrent sessions allowed
    max_clients: usize,
}

impl SessionManager {
    /// Creates an empty session table. Ids start from 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            endpoints: HashMap::new(),
            next_player_id: 1,
            max_clients,
        }
    }

    /// Returns the id for `addr`, creating a session at `spawn` if the endpoint is new
    ///
    /// Reconnecting from a known endpoint returns the existing id without touching the
    /// stored transform. Returns None when the server is at capacity.
    pub fn connect(&mut self, addr: SocketAddr, spawn: Vec2) -> Option<u32> {
        if let Some(&id) = self.endpoints.get(&addr) {
            self.touch(addr);
            debug!("Player {} re-sent connect from {}", id, addr);
            return Some(id);
        }

        if self.sessions.len() >= self.max_clients {
            return None;
        }

        let id = self.next_player_id;
        self.next_player_id += 1;

        info!("Player {} connected from {}", id, addr);
        self.sessions.insert(id, PlayerSession::new(id, addr, spawn));
        self.endpoints.insert(addr, id);
        Some(id)
    }

    /// Removes the session bound to `addr`
    ///
    /// Returns the removed id, or None if there was no session (disconnecting twice is a no-op).
    pub fn disconnect(&mut self, addr: SocketAddr) -> Option<u32> {
        let id = self.endpoints.remove(&addr)?;
        self.sessions.remove(&id);
        info!("Player {} disconnected", id);
        Some(id)
    }

    /// Stores a report for the session bound to `addr`. Returns false for unknown endpoints.
    pub fn apply_report(&mut self, addr: SocketAddr, report: &PlayerReport) -> bool {
        match self.session_by_addr_mut(addr) {
            Some(session) => {
                session.apply_report(report);
                true
            }
            None => false,
        }
    }

    /// Refreshes the activity timestamp for `addr`. Returns false for unknown endpoints.
    pub fn touch(&mut self, addr: SocketAddr) -> bool {
        match self.session_by_addr_mut(addr) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    fn session_by_addr_mut(&mut self, addr: SocketAddr) -> Option<&mut PlayerSession> {
        let id = self.endpoints.get(&addr)?;
        self.sessions.get_mut(id)
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.endpoints.get(&addr).copied()
    }

    pub fn get(&self, id: u32) -> Option<&PlayerSession> {
        self.sessions.get(&id)
    }

    /// Moves every session to `position` and stops it. Used on level change.
    pub fn relocate_all(&mut self, position: Vec2) {
        for session in self.sessions.values_mut() {
            session.position = position;
            session.velocity = Vec2::ZERO;
        }
    }

    /// Removes sessions silent for longer than `timeout`
    ///
    /// Returns the evicted ids and endpoints so the caller can clean up enemy targets
    /// exactly as for an explicit disconnect.
    pub fn evict_idle(&mut self, timeout: Duration) -> Vec<(u32, SocketAddr)> {
        let idle: Vec<(u32, SocketAddr)> = self
            .sessions
            .values()
            .filter(|s| s.is_timed_out(timeout))
            .map(|s| (s.id, s.addr))
            .collect();

        for (id, addr) in &idle {
            self.endpoints.remove(addr);
            self.sessions.remove(id);
            info!("Player {} timed out", id);
        }

        idle
    }

    /// All player ids and their network addresses, in id order
    pub fn endpoints(&self) -> Vec<(u32, SocketAddr)> {
        self.sessions.values().map(|s| (s.id, s.addr)).collect()
    }

    /// Current player positions keyed by id, as seen by the enemy AI
    pub fn positions(&self) -> BTreeMap<u32, Vec2> {
        self.sessions
            .values()
            .map(|s| (s.id, s.position))
            .collect()
    }

    pub fn snapshots(&self) -> Vec<PlayerSnapshot> {
        self.sessions.values().map(PlayerSession::snapshot).collect()
    }

    /// Returns the number of connected players
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
