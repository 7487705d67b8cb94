//! Binary datagram protocol shared by the server and the client.
//!
//! Every datagram starts with a one-byte kind discriminator, except the connect reply which is a
//! bare 4-byte player id. Fixed-size records are plain serde structs; bincode's legacy
//! configuration (fixed-width integers, little-endian, no padding) lays them out byte-for-byte as
//! they appear on the wire. Count and kind bytes are written by hand.

use crate::{Action, EnemyState, TEXT_FIELD_WIDTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const KIND_PLAYER_REPORT: u8 = 0;
pub const KIND_DISCONNECT: u8 = 1;
pub const KIND_SNAPSHOT: u8 = 2;
pub const KIND_REMOVE_ENEMY: u8 = 3;
pub const KIND_LEVEL_CHANGE: u8 = 4;
pub const KIND_REQUEST_LEVEL_CHANGE: u8 = 5;
pub const KIND_PING: u8 = 9;
pub const KIND_CONNECT: u8 = 10;

pub const PLAYER_REPORT_LEN: usize = 20;
pub const PING_LEN: usize = 9;
pub const REMOVE_ENEMY_LEN: usize = 5;
pub const LEVEL_CHANGE_LEN: usize = 5;
pub const ASSIGNED_ID_LEN: usize = 4;
pub const PLAYER_RECORD_LEN: usize = 37;
pub const ENEMY_RECORD_LEN: usize = 28;

/// Upper bound on records per snapshot section, imposed by the one-byte counts.
pub const MAX_RECORDS: usize = u8::MAX as usize;

/// Largest datagram either side can legitimately send: a snapshot with both sections full.
pub const MAX_DATAGRAM_LEN: usize =
    3 + MAX_RECORDS * PLAYER_RECORD_LEN + MAX_RECORDS * ENEMY_RECORD_LEN;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("message kind {kind}: expected {expected} bytes, got {actual}")]
    Length {
        kind: u8,
        expected: usize,
        actual: usize,
    },
    #[error("message kind {kind} is truncated")]
    Truncated { kind: u8 },
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for ProtocolError {
    fn from(e: bincode::Error) -> Self {
        ProtocolError::Codec(e.to_string())
    }
}

/// Latest transform a client reports for its own player.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerReport {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub action: Action,
    pub flip: bool,
    pub weapon_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSnapshot {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub action: Action,
    pub flip: bool,
    pub weapon_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnemySnapshot {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub flip: bool,
    pub state: EnemyState,
}

/// Full observable world state broadcast once per tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldSnapshot {
    pub players: Vec<PlayerSnapshot>,
    pub enemies: Vec<EnemySnapshot>,
}

#[derive(Serialize, Deserialize)]
struct ReportRecord {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    action: u8,
    flip: u8,
    weapon_id: u8,
}

#[derive(Serialize, Deserialize)]
struct PlayerRecord {
    id: u32,
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    action: [u8; TEXT_FIELD_WIDTH],
    flip: u8,
    weapon_id: u8,
}

#[derive(Serialize, Deserialize)]
struct EnemyRecord {
    id: u32,
    x: f32,
    y: f32,
    flip: u8,
    state: [u8; TEXT_FIELD_WIDTH],
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Connect,
    Disconnect,
    PlayerReport(PlayerReport),
    Ping { timestamp: u64 },
    RemoveEnemy { enemy_id: u32 },
    RequestLevelChange,
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Assigned { player_id: u32 },
    Pong { timestamp: u64 },
    Snapshot(WorldSnapshot),
    LevelChanged { level_id: u32 },
}

/// Zero-padded, truncated fixed-width text field.
pub fn encode_text(text: &str) -> [u8; TEXT_FIELD_WIDTH] {
    let mut field = [0u8; TEXT_FIELD_WIDTH];
    let bytes = text.as_bytes();
    let len = bytes.len().min(TEXT_FIELD_WIDTH);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

/// Inverse of [`encode_text`]. Invalid UTF-8 decodes as an empty string.
pub fn decode_text(field: &[u8; TEXT_FIELD_WIDTH]) -> &str {
    let end = field
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    std::str::from_utf8(&field[..end]).unwrap_or("")
}

fn expect_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() != expected {
        return Err(ProtocolError::Length {
            kind: data[0],
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn read_u32(bytes: &[u8]) -> Result<u32, ProtocolError> {
    Ok(bincode::deserialize::<u32>(bytes)?)
}

impl ClientMessage {
    pub fn kind(&self) -> u8 {
        match self {
            ClientMessage::Connect => KIND_CONNECT,
            ClientMessage::Disconnect => KIND_DISCONNECT,
            ClientMessage::PlayerReport(_) => KIND_PLAYER_REPORT,
            ClientMessage::Ping { .. } => KIND_PING,
            ClientMessage::RemoveEnemy { .. } => KIND_REMOVE_ENEMY,
            ClientMessage::RequestLevelChange => KIND_REQUEST_LEVEL_CHANGE,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![self.kind()];
        match self {
            ClientMessage::Connect
            | ClientMessage::Disconnect
            | ClientMessage::RequestLevelChange => {}
            ClientMessage::PlayerReport(report) => {
                let record = ReportRecord {
                    x: report.x,
                    y: report.y,
                    vx: report.vx,
                    vy: report.vy,
                    action: report.action.code(),
                    flip: report.flip as u8,
                    weapon_id: report.weapon_id,
                };
                bincode::serialize_into(&mut buf, &record)?;
            }
            ClientMessage::Ping { timestamp } => bincode::serialize_into(&mut buf, timestamp)?,
            ClientMessage::RemoveEnemy { enemy_id } => {
                bincode::serialize_into(&mut buf, enemy_id)?
            }
        }
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let kind = *data.first().ok_or(ProtocolError::Empty)?;
        match kind {
            KIND_CONNECT => {
                expect_len(data, 1)?;
                Ok(ClientMessage::Connect)
            }
            KIND_DISCONNECT => {
                expect_len(data, 1)?;
                Ok(ClientMessage::Disconnect)
            }
            KIND_REQUEST_LEVEL_CHANGE => {
                expect_len(data, 1)?;
                Ok(ClientMessage::RequestLevelChange)
            }
            KIND_PLAYER_REPORT => {
                expect_len(data, PLAYER_REPORT_LEN)?;
                let record: ReportRecord = bincode::deserialize(&data[1..])?;
                Ok(ClientMessage::PlayerReport(PlayerReport {
                    x: record.x,
                    y: record.y,
                    vx: record.vx,
                    vy: record.vy,
                    action: Action::from_code(record.action),
                    flip: record.flip != 0,
                    weapon_id: record.weapon_id,
                }))
            }
            KIND_PING => {
                expect_len(data, PING_LEN)?;
                let timestamp: u64 = bincode::deserialize(&data[1..])?;
                Ok(ClientMessage::Ping { timestamp })
            }
            KIND_REMOVE_ENEMY => {
                expect_len(data, REMOVE_ENEMY_LEN)?;
                Ok(ClientMessage::RemoveEnemy {
                    enemy_id: read_u32(&data[1..])?,
                })
            }
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            ServerMessage::Assigned { player_id } => Ok(bincode::serialize(player_id)?),
            ServerMessage::Pong { timestamp } => {
                let mut buf = vec![KIND_PING];
                bincode::serialize_into(&mut buf, timestamp)?;
                Ok(buf)
            }
            ServerMessage::LevelChanged { level_id } => {
                let mut buf = vec![KIND_LEVEL_CHANGE];
                bincode::serialize_into(&mut buf, level_id)?;
                Ok(buf)
            }
            ServerMessage::Snapshot(snapshot) => snapshot.encode(),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() == ASSIGNED_ID_LEN {
            return Ok(ServerMessage::Assigned {
                player_id: read_u32(data)?,
            });
        }

        let kind = *data.first().ok_or(ProtocolError::Empty)?;
        match kind {
            KIND_PING => {
                expect_len(data, PING_LEN)?;
                let timestamp: u64 = bincode::deserialize(&data[1..])?;
                Ok(ServerMessage::Pong { timestamp })
            }
            KIND_LEVEL_CHANGE => {
                expect_len(data, LEVEL_CHANGE_LEN)?;
                Ok(ServerMessage::LevelChanged {
                    level_id: read_u32(&data[1..])?,
                })
            }
            KIND_SNAPSHOT => Ok(ServerMessage::Snapshot(WorldSnapshot::decode(data)?)),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

impl WorldSnapshot {
    /// Exact encoded size for the given record counts.
    pub fn encoded_len(players: usize, enemies: usize) -> usize {
        3 + players * PLAYER_RECORD_LEN + enemies * ENEMY_RECORD_LEN
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let players = &self.players[..self.players.len().min(MAX_RECORDS)];
        let enemies = &self.enemies[..self.enemies.len().min(MAX_RECORDS)];

        let mut buf = Vec::with_capacity(Self::encoded_len(players.len(), enemies.len()));
        buf.push(KIND_SNAPSHOT);

        buf.push(players.len() as u8);
        for player in players {
            let record = PlayerRecord {
                id: player.id,
                x: player.x,
                y: player.y,
                vx: player.vx,
                vy: player.vy,
                action: encode_text(player.action.as_str()),
                flip: player.flip as u8,
                weapon_id: player.weapon_id,
            };
            bincode::serialize_into(&mut buf, &record)?;
        }

        buf.push(enemies.len() as u8);
        for enemy in enemies {
            let record = EnemyRecord {
                id: enemy.id,
                x: enemy.x,
                y: enemy.y,
                flip: enemy.flip as u8,
                state: encode_text(enemy.state.as_str()),
            };
            bincode::serialize_into(&mut buf, &record)?;
        }

        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let truncated = ProtocolError::Truncated {
            kind: KIND_SNAPSHOT,
        };
        if data.len() < 3 || data[0] != KIND_SNAPSHOT {
            return Err(truncated);
        }

        let player_count = data[1] as usize;
        let enemy_count_at = 2 + player_count * PLAYER_RECORD_LEN;
        if data.len() <= enemy_count_at {
            return Err(truncated);
        }
        let enemy_count = data[enemy_count_at] as usize;

        let expected = Self::encoded_len(player_count, enemy_count);
        if data.len() != expected {
            return Err(ProtocolError::Length {
                kind: KIND_SNAPSHOT,
                expected,
                actual: data.len(),
            });
        }

        let mut players = Vec::with_capacity(player_count);
        for chunk in data[2..enemy_count_at].chunks_exact(PLAYER_RECORD_LEN) {
            let record: PlayerRecord = bincode::deserialize(chunk)?;
            players.push(PlayerSnapshot {
                id: record.id,
                x: record.x,
                y: record.y,
                vx: record.vx,
                vy: record.vy,
                action: Action::from_text(decode_text(&record.action)),
                flip: record.flip != 0,
                weapon_id: record.weapon_id,
            });
        }

        let mut enemies = Vec::with_capacity(enemy_count);
        for chunk in data[enemy_count_at + 1..].chunks_exact(ENEMY_RECORD_LEN) {
            let record: EnemyRecord = bincode::deserialize(chunk)?;
            enemies.push(EnemySnapshot {
                id: record.id,
                x: record.x,
                y: record.y,
                flip: record.flip != 0,
                state: EnemyState::from_text(decode_text(&record.state)),
            });
        }

        Ok(WorldSnapshot { players, enemies })
    }
}
