//! Game assets: map, spawn points and entity stats
//!
//! Everything is read from `<assets>/map.json` at startup. Any problem with
//! the assets is fatal; the server never starts on a half-valid map.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::entity::{BuildingStats, BuildingType, MobileStats, MobileType, ObjectType};
use super::math::Vec2;
use super::world::{Bitmap, World, WorldError};

pub const MAP_FILE: &str = "map.json";

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse map: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid world: {0}")]
    World(#[from] WorldError),

    #[error("map matrix row {row} has {len} cells, expected {expected}")]
    RaggedMatrix {
        row: usize,
        len: usize,
        expected: usize,
    },

    #[error("{kind} spawn point ({x}, {y}) is out of bounds or not walkable")]
    BadSpawn { kind: &'static str, x: f32, y: f32 },

    #[error("map declares no {0} spawn point")]
    NoSpawn(&'static str),

    #[error("object at ({x}, {y}) is out of bounds")]
    BadObject { x: f32, y: f32 },
}

/// Built-in stats, overridable per map
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EntityStats {
    pub tank: MobileStats,
    pub programmer: MobileStats,
    pub engineer: MobileStats,
    pub zombie: MobileStats,
    pub barricade: BuildingStats,
    pub mg_turret: BuildingStats,
}

impl Default for EntityStats {
    fn default() -> Self {
        Self {
            tank: MobileStats {
                speed: 3.0,
                total_hp: 200.0,
                combat_power: 20.0,
                build_power: 0.0,
            },
            programmer: MobileStats {
                speed: 4.0,
                total_hp: 100.0,
                combat_power: 10.0,
                build_power: 0.0,
            },
            engineer: MobileStats {
                speed: 3.5,
                total_hp: 120.0,
                combat_power: 10.0,
                build_power: 10.0,
            },
            zombie: MobileStats {
                speed: 1.0,
                total_hp: 50.0,
                combat_power: 5.0,
                build_power: 0.0,
            },
            barricade: BuildingStats {
                total_hp: 100.0,
                required_bp: 50.0,
            },
            mg_turret: BuildingStats {
                total_hp: 200.0,
                required_bp: 100.0,
            },
        }
    }
}

impl EntityStats {
    pub fn mobile(&self, mobile_type: MobileType) -> MobileStats {
        match mobile_type {
            MobileType::Tank => self.tank,
            MobileType::Programmer => self.programmer,
            MobileType::Engineer => self.engineer,
            MobileType::Zombie => self.zombie,
        }
    }

    pub fn building(&self, building_type: BuildingType) -> BuildingStats {
        match building_type {
            BuildingType::Barricade => self.barricade,
            BuildingType::MgTurret => self.mg_turret,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpawnFile {
    #[serde(default)]
    players: Vec<[f32; 2]>,
    #[serde(default)]
    enemies: Vec<[f32; 2]>,
}

#[derive(Debug, Deserialize)]
struct ObjectFile {
    r#type: ObjectType,
    pos: [f32; 2],
}

#[derive(Debug, Deserialize)]
struct MapFile {
    scale_factor: f32,
    /// Red channel values, one row per grid line
    matrix: Vec<Vec<u8>>,
    spawn: SpawnFile,
    #[serde(default)]
    objects: Vec<ObjectFile>,
    #[serde(default)]
    stats: EntityStats,
}

/// Validated game assets
#[derive(Debug, Clone)]
pub struct GameData {
    pub bitmap: Bitmap,
    pub scale_factor: f32,
    pub player_spawns: Vec<Vec2>,
    pub enemy_spawns: Vec<Vec2>,
    pub objects: Vec<(ObjectType, Vec2)>,
    pub stats: EntityStats,
}

impl GameData {
    /// Load and validate `<dir>/map.json`
    pub fn load(dir: &Path) -> Result<Self, AssetError> {
        let path = dir.join(MAP_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|source| AssetError::Io {
            path: path.clone(),
            source,
        })?;
        let data = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            width = data.bitmap.width,
            height = data.bitmap.height,
            scale = data.scale_factor,
            "Assets loaded"
        );
        Ok(data)
    }

    pub fn from_json(raw: &str) -> Result<Self, AssetError> {
        let file: MapFile = serde_json::from_str(raw)?;

        let height = file.matrix.len();
        let width = file.matrix.first().map(Vec::len).unwrap_or(0);
        let mut red = Vec::with_capacity(width * height);
        for (row, cells) in file.matrix.iter().enumerate() {
            if cells.len() != width {
                return Err(AssetError::RaggedMatrix {
                    row,
                    len: cells.len(),
                    expected: width,
                });
            }
            red.extend_from_slice(cells);
        }

        let to_vec = |p: &[f32; 2]| Vec2::new(p[0], p[1]);
        let data = Self {
            bitmap: Bitmap::new(width, height, red),
            scale_factor: file.scale_factor,
            player_spawns: file.spawn.players.iter().map(to_vec).collect(),
            enemy_spawns: file.spawn.enemies.iter().map(to_vec).collect(),
            objects: file
                .objects
                .iter()
                .map(|o| (o.r#type, to_vec(&o.pos)))
                .collect(),
            stats: file.stats,
        };
        data.validate()?;
        Ok(data)
    }

    /// Build the tile world described by the assets
    pub fn build_world(&self) -> Result<World, WorldError> {
        World::new(&self.bitmap, self.scale_factor)
    }

    fn validate(&self) -> Result<(), AssetError> {
        let world = self.build_world()?;

        let check_spawns = |kind: &'static str, points: &[Vec2]| {
            if points.is_empty() {
                return Err(AssetError::NoSpawn(kind));
            }
            for p in points {
                let walkable = world
                    .tile_from_world(*p)
                    .map(|t| t.is_walkable())
                    .unwrap_or(false);
                if !walkable {
                    return Err(AssetError::BadSpawn {
                        kind,
                        x: p.x,
                        y: p.y,
                    });
                }
            }
            Ok(())
        };
        check_spawns("player", &self.player_spawns)?;
        check_spawns("enemy", &self.enemy_spawns)?;

        for (_, pos) in &self.objects {
            if !world.point_in_bounds(*pos) {
                return Err(AssetError::BadObject { x: pos.x, y: pos.y });
            }
        }
        Ok(())
    }
}
