//! Level files and the sources they are loaded from.
//!
//! A level is a JSON document holding a sparse tile grid plus spawner markers. Grid entries are
//! keyed `"<col>;<row>"`; off-grid entries carry pixel positions. Entries of type `spawners` are
//! markers rather than collision tiles.

use crate::enemy::EnemyKind;
use crate::tilemap::{TileKind, TileMap};
use serde::Deserialize;
use shared::{Vec2, DEFAULT_SPAWN, DEFAULT_TILE_SIZE};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SPAWNER_TYPE: &str = "spawners";

#[derive(Debug, Error)]
pub enum LevelError {
    #[error("level {0} not found")]
    NotFound(u32),
    #[error("failed to read level: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse level: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid tile size {0}")]
    InvalidTileSize(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpawnerVariant {
    PlayerStart,
    Enemy(EnemyKind),
    Other(i64),
}

impl SpawnerVariant {
    pub fn from_variant(variant: i64) -> Self {
        match variant {
            0 => SpawnerVariant::PlayerStart,
            v => EnemyKind::from_variant(v)
                .map(SpawnerVariant::Enemy)
                .unwrap_or(SpawnerVariant::Other(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spawner {
    pub position: Vec2,
    pub variant: SpawnerVariant,
}

/// A fully parsed level. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Level {
    pub id: u32,
    pub tiles: TileMap,
    pub spawners: Vec<Spawner>,
}

#[derive(Debug, Deserialize)]
struct LevelFile {
    #[serde(default = "default_tile_size")]
    tile_size: f32,
    #[serde(default)]
    tilemap: BTreeMap<String, TileEntry>,
    #[serde(default)]
    offgrid: Vec<TileEntry>,
}

#[derive(Debug, Deserialize)]
struct TileEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    variant: i64,
    pos: [f32; 2],
}

fn default_tile_size() -> f32 {
    DEFAULT_TILE_SIZE
}

fn parse_grid_key(key: &str) -> Option<(i32, i32)> {
    let (col, row) = key.split_once(';')?;
    Some((col.trim().parse().ok()?, row.trim().parse().ok()?))
}

impl Level {
    pub fn from_json(id: u32, json: &str) -> Result<Self, LevelError> {
        let file: LevelFile = serde_json::from_str(json)?;
        let tile_size = file.tile_size;
        // Also rejects NaN; grid lookups divide by the tile size
        if !(tile_size > 0.0 && tile_size.is_finite()) {
            return Err(LevelError::InvalidTileSize(tile_size));
        }
        let mut tiles = TileMap::new(tile_size);
        let mut spawners = Vec::new();

        for (key, entry) in &file.tilemap {
            let (col, row) = parse_grid_key(key).unwrap_or((
                entry.pos[0].floor() as i32,
                entry.pos[1].floor() as i32,
            ));

            if entry.kind == SPAWNER_TYPE {
                spawners.push(Spawner {
                    position: Vec2::new(col as f32 * tile_size, row as f32 * tile_size),
                    variant: SpawnerVariant::from_variant(entry.variant),
                });
            } else {
                tiles.insert(col, row, TileKind::from_type_name(&entry.kind));
            }
        }

        // Off-grid decor never collides; only its spawner markers matter.
        for entry in file.offgrid.iter().filter(|e| e.kind == SPAWNER_TYPE) {
            spawners.push(Spawner {
                position: Vec2::new(entry.pos[0], entry.pos[1]),
                variant: SpawnerVariant::from_variant(entry.variant),
            });
        }

        Ok(Level {
            id,
            tiles,
            spawners,
        })
    }

    /// First player-start marker, or the fallback spawn point.
    pub fn player_start(&self) -> Vec2 {
        self.spawners
            .iter()
            .find(|s| s.variant == SpawnerVariant::PlayerStart)
            .map(|s| s.position)
            .unwrap_or(DEFAULT_SPAWN)
    }

    pub fn enemy_spawns(&self) -> impl Iterator<Item = (EnemyKind, Vec2)> + '_ {
        self.spawners.iter().filter_map(|s| match s.variant {
            SpawnerVariant::Enemy(kind) => Some((kind, s.position)),
            _ => None,
        })
    }
}

/// Where levels come from. Ids are sequential from zero; the next level after `id` is
/// `(id + 1) % level_count()`.
pub trait LevelSource: Send {
    fn level_count(&self) -> usize;

    fn load(&self, id: u32) -> Result<Level, LevelError>;

    fn next_id(&self, current: u32) -> u32 {
        match self.level_count() {
            0 => current,
            count => ((current as usize + 1) % count) as u32,
        }
    }
}

/// Levels stored as `<id>.json` files in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryLevels {
    dir: PathBuf,
}

impl DirectoryLevels {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl LevelSource for DirectoryLevels {
    fn level_count(&self) -> usize {
        std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0)
    }

    fn load(&self, id: u32) -> Result<Level, LevelError> {
        let path = self.dir.join(format!("{}.json", id));
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LevelError::NotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        Level::from_json(id, &json)
    }
}

/// Level JSON held in memory, keyed by id. Gaps in the ids behave like missing files.
#[derive(Debug, Clone, Default)]
pub struct MemoryLevels {
    levels: HashMap<u32, String>,
}

impl MemoryLevels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, id: u32, json: impl Into<String>) -> Self {
        self.levels.insert(id, json.into());
        self
    }
}

impl LevelSource for MemoryLevels {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn load(&self, id: u32) -> Result<Level, LevelError> {
        let json = self.levels.get(&id).ok_or(LevelError::NotFound(id))?;
        Level::from_json(id, json)
    }
}
