//! Tile grid and spatial index
//!
//! The world is a `grid_w × grid_h` tile grid built from a bitmap. World
//! coordinates map to grid coordinates through `grid_scale`
//! (`grid = world * grid_scale`); tile `(x, y)` covers the world rectangle
//! `[x, x+1] × [y, y+1]` divided by the scale.
//!
//! Entities are referenced by id only. Each tile keeps the ids of the
//! entities whose bounding box overlaps it and the world remembers, per
//! entity, its box and the tiles it was attached to.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use super::math::{Aabb, Vec2};

/// Tile kind bitmask
pub type TileKind = u8;

pub const KIND_NOT_WALKABLE: TileKind = 0;
pub const KIND_WALKABLE: TileKind = 1;
pub const KIND_TURRET: TileKind = 0x10;

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("grid scale must be positive, got {0}")]
    InvalidScale(f32),

    #[error("bitmap is empty")]
    EmptyBitmap,

    #[error("bitmap holds {actual} cells, expected {width}x{height}")]
    BitmapSize {
        width: usize,
        height: usize,
        actual: usize,
    },
}

/// Red channel of the walkability bitmap, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub width: usize,
    pub height: usize,
    pub red: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: usize, height: usize, red: Vec<u8>) -> Self {
        Self { width, height, red }
    }

    /// Bitmap where every cell is walkable
    pub fn open(width: usize, height: usize) -> Self {
        Self::new(width, height, vec![255; width * height])
    }

    /// Build from rows of `.` (walkable) and `#` (wall), top row first
    pub fn from_rows(rows: &[&str]) -> Self {
        let height = rows.len();
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let red = rows
            .iter()
            .flat_map(|row| row.bytes().map(|b| if b == b'#' { 0 } else { 255 }))
            .collect();
        Self::new(width, height, red)
    }
}

/// Walkability of each cell, shared with the pathfinder
#[derive(Debug, Clone)]
pub struct NavGrid {
    width: i32,
    height: i32,
    kinds: Vec<TileKind>,
}

impl NavGrid {
    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    pub fn kind(&self, x: i32, y: i32) -> Option<TileKind> {
        self.in_bounds(x, y)
            .then(|| self.kinds[(y * self.width + x) as usize])
    }

    pub fn is_walkable(&self, x: i32, y: i32) -> bool {
        self.kind(x, y)
            .map(|k| k & KIND_WALKABLE != 0)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct Tile {
    pub kind: TileKind,
    pub x: i32,
    pub y: i32,
    pub aabb: Aabb,
    pub entities: BTreeSet<u32>,
}

impl Tile {
    pub fn is_walkable(&self) -> bool {
        self.kind & KIND_WALKABLE != 0
    }

    /// World position of the tile center
    pub fn center(&self) -> Vec2 {
        self.aabb.center()
    }
}

#[derive(Debug, Clone)]
struct Attachment {
    aabb: Aabb,
    tiles: Vec<usize>,
}

pub struct World {
    grid_w: i32,
    grid_h: i32,
    world_w: f32,
    world_h: f32,
    grid_scale: f32,
    tiles: Vec<Tile>,
    nav: Arc<NavGrid>,
    entity_tiles: HashMap<u32, Attachment>,
}

impl World {
    /// Build the grid: a cell is walkable iff its red channel is non-zero
    pub fn new(bitmap: &Bitmap, grid_scale: f32) -> Result<Self, WorldError> {
        if !(grid_scale > 0.0) {
            return Err(WorldError::InvalidScale(grid_scale));
        }
        if bitmap.width == 0 || bitmap.height == 0 {
            return Err(WorldError::EmptyBitmap);
        }
        if bitmap.red.len() != bitmap.width * bitmap.height {
            return Err(WorldError::BitmapSize {
                width: bitmap.width,
                height: bitmap.height,
                actual: bitmap.red.len(),
            });
        }

        let grid_w = bitmap.width as i32;
        let grid_h = bitmap.height as i32;
        let mut tiles = Vec::with_capacity(bitmap.red.len());
        for y in 0..grid_h {
            for x in 0..grid_w {
                let red = bitmap.red[(y * grid_w + x) as usize];
                let kind = if red != 0 { KIND_WALKABLE } else { KIND_NOT_WALKABLE };
                let aabb = Aabb::new(
                    Vec2::new(x as f32 / grid_scale, y as f32 / grid_scale),
                    Vec2::new((x + 1) as f32 / grid_scale, (y + 1) as f32 / grid_scale),
                );
                tiles.push(Tile {
                    kind,
                    x,
                    y,
                    aabb,
                    entities: BTreeSet::new(),
                });
            }
        }
        let nav = Arc::new(NavGrid {
            width: grid_w,
            height: grid_h,
            kinds: tiles.iter().map(|t| t.kind).collect(),
        });

        Ok(Self {
            grid_w,
            grid_h,
            world_w: grid_w as f32 / grid_scale,
            world_h: grid_h as f32 / grid_scale,
            grid_scale,
            tiles,
            nav,
            entity_tiles: HashMap::new(),
        })
    }

    pub fn grid_size(&self) -> (i32, i32) {
        (self.grid_w, self.grid_h)
    }

    pub fn world_size(&self) -> (f32, f32) {
        (self.world_w, self.world_h)
    }

    pub fn grid_scale(&self) -> f32 {
        self.grid_scale
    }

    pub fn nav_grid(&self) -> Arc<NavGrid> {
        Arc::clone(&self.nav)
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        self.nav.in_bounds(x, y).then(|| (y * self.grid_w + x) as usize)
    }

    pub fn tile(&self, x: i32, y: i32) -> Option<&Tile> {
        self.index(x, y).map(|i| &self.tiles[i])
    }

    fn grid_coords(&self, pt: Vec2) -> (i32, i32) {
        (
            (pt.x * self.grid_scale).floor() as i32,
            (pt.y * self.grid_scale).floor() as i32,
        )
    }

    /// Tile holding a world-space point
    pub fn tile_from_world(&self, pt: Vec2) -> Option<&Tile> {
        let (x, y) = self.grid_coords(pt);
        self.tile(x, y)
    }

    pub fn point_in_bounds(&self, pt: Vec2) -> bool {
        pt.x >= 0.0 && pt.y >= 0.0 && pt.x <= self.world_w && pt.y <= self.world_h
    }

    /// Indices of the tiles overlapping `aabb`
    ///
    /// Scans the grid rectangle under the box, clipped to the world; edges
    /// that only touch a tile do not count. For a box no larger than a tile
    /// the rectangle lies within the tile holding the centre and its eight
    /// neighbours, so this finds the same tiles as testing those nine, and
    /// it stays correct for larger boxes.
    fn intersecting_indices(&self, aabb: &Aabb) -> Vec<usize> {
        let (x0, y0) = self.grid_coords(aabb.min);
        let (x1, y1) = self.grid_coords(aabb.max);
        let (x0, y0) = (x0.max(0), y0.max(0));
        let (x1, y1) = (x1.min(self.grid_w - 1), y1.min(self.grid_h - 1));

        let mut found = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                if let Some(i) = self.index(x, y) {
                    if self.tiles[i].aabb.intersects(aabb) {
                        found.push(i);
                    }
                }
            }
        }
        found
    }

    pub fn intersecting_tiles(&self, aabb: &Aabb) -> Vec<&Tile> {
        self.intersecting_indices(aabb)
            .into_iter()
            .map(|i| &self.tiles[i])
            .collect()
    }

    /// Add an entity to every tile its box overlaps
    pub fn attach_entity(&mut self, id: u32, aabb: Aabb) {
        let tiles = self.intersecting_indices(&aabb);
        for &i in &tiles {
            self.tiles[i].entities.insert(id);
        }
        self.entity_tiles.insert(id, Attachment { aabb, tiles });
    }

    pub fn detach_entity(&mut self, id: u32) {
        if let Some(attachment) = self.entity_tiles.remove(&id) {
            for i in attachment.tiles {
                self.tiles[i].entities.remove(&id);
            }
        }
    }

    /// Re-attach an entity after it moved
    pub fn update_entity(&mut self, id: u32, aabb: Aabb) {
        self.detach_entity(id);
        self.attach_entity(id, aabb);
    }

    pub fn is_attached(&self, id: u32) -> bool {
        self.entity_tiles.contains_key(&id)
    }

    /// Tiles an entity is currently attached to, as grid coordinates
    pub fn entity_tile_coords(&self, id: u32) -> Vec<(i32, i32)> {
        self.entity_tiles
            .get(&id)
            .map(|a| {
                a.tiles
                    .iter()
                    .map(|&i| (self.tiles[i].x, self.tiles[i].y))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of the entities whose box overlaps `aabb`
    ///
    /// An entity querying with its own box finds itself.
    pub fn query_aabb(&self, aabb: &Aabb) -> BTreeSet<u32> {
        let mut result = BTreeSet::new();
        for i in self.intersecting_indices(aabb) {
            for id in &self.tiles[i].entities {
                let overlapping = self
                    .entity_tiles
                    .get(id)
                    .map(|a| a.aabb.intersects(aabb))
                    .unwrap_or(false);
                if overlapping {
                    result.insert(*id);
                }
            }
        }
        result
    }

    /// Entities overlapping the attached entity `id`, itself excluded
    pub fn entity_query(&self, id: u32) -> BTreeSet<u32> {
        match self.entity_tiles.get(&id) {
            Some(attachment) => {
                let mut result = self.query_aabb(&attachment.aabb);
                result.remove(&id);
                result
            }
            None => BTreeSet::new(),
        }
    }

    /// Text rendering of the grid: `#` wall, `.` free, digit = entity count
    pub fn dump_grid(&self) -> String {
        let mut out = String::with_capacity(((self.grid_w + 1) * self.grid_h) as usize);
        for y in 0..self.grid_h {
            for x in 0..self.grid_w {
                let tile = &self.tiles[(y * self.grid_w + x) as usize];
                let c = match tile.entities.len() {
                    0 if tile.is_walkable() => '.',
                    0 => '#',
                    n => char::from_digit(n.min(9) as u32, 10).unwrap_or('+'),
                };
                out.push(c);
            }
            let _ = writeln!(out);
        }
        out
    }
}
