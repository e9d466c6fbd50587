//! A* search on the tile grid

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use super::math::{Path, Vec2};
use super::world::NavGrid;

/// Cost of stepping onto a walkable tile
pub const WALKABLE_COST: f32 = 10.0;
/// Cost of stepping onto a wall; keeps the graph connected without ever being chosen over a detour
pub const NOT_WALKABLE_COST: f32 = 1e6;

const ORTHOGONAL: [(i32, i32); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const DIAGONAL: [(i32, i32); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

#[derive(Debug, Clone, Copy, PartialEq)]
struct Node {
    f: f32,
    g: f32,
    cell: (i32, i32),
}

impl Eq for Node {}

impl Ord for Node {
    // reversed so BinaryHeap pops the lowest f first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| self.g.total_cmp(&other.g))
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Finds paths on an immutable copy of the world walkability
#[derive(Clone)]
pub struct Pathfinder {
    nav: Arc<NavGrid>,
    grid_scale: f32,
}

impl Pathfinder {
    pub fn new(nav: Arc<NavGrid>, grid_scale: f32) -> Self {
        Self { nav, grid_scale }
    }

    fn step_cost(&self, x: i32, y: i32) -> f32 {
        if self.nav.is_walkable(x, y) {
            WALKABLE_COST
        } else {
            NOT_WALKABLE_COST
        }
    }

    /// Neighbours of a cell with the cost of moving there
    ///
    /// Diagonals are only offered when both orthogonal cells they cut past
    /// are walkable, so paths never clip wall corners.
    fn neighbors(&self, (x, y): (i32, i32)) -> Vec<((i32, i32), f32)> {
        let mut out = Vec::with_capacity(8);
        for (dx, dy) in ORTHOGONAL {
            let (nx, ny) = (x + dx, y + dy);
            if self.nav.in_bounds(nx, ny) {
                out.push(((nx, ny), self.step_cost(nx, ny)));
            }
        }
        for (dx, dy) in DIAGONAL {
            let (nx, ny) = (x + dx, y + dy);
            if self.nav.is_walkable(nx, ny)
                && self.nav.is_walkable(x + dx, y)
                && self.nav.is_walkable(x, y + dy)
            {
                out.push(((nx, ny), self.step_cost(nx, ny) * std::f32::consts::SQRT_2));
            }
        }
        out
    }

    /// Octile distance scaled by the walkable step cost
    fn heuristic(a: (i32, i32), b: (i32, i32)) -> f32 {
        let dx = (a.0 - b.0).abs() as f32;
        let dy = (a.1 - b.1).abs() as f32;
        let (min, max) = if dx < dy { (dx, dy) } else { (dy, dx) };
        WALKABLE_COST * (max - min + min * std::f32::consts::SQRT_2)
    }

    /// Raw A* over grid cells, origin first
    fn search(&self, from: (i32, i32), to: (i32, i32)) -> Option<(Vec<(i32, i32)>, f32)> {
        let mut open = BinaryHeap::new();
        let mut came_from: HashMap<(i32, i32), (i32, i32)> = HashMap::new();
        let mut best: HashMap<(i32, i32), f32> = HashMap::new();

        best.insert(from, 0.0);
        open.push(Node {
            f: Self::heuristic(from, to),
            g: 0.0,
            cell: from,
        });

        while let Some(Node { g, cell, .. }) = open.pop() {
            if cell == to {
                let mut cells = vec![cell];
                let mut cur = cell;
                while let Some(&prev) = came_from.get(&cur) {
                    cells.push(prev);
                    cur = prev;
                }
                cells.reverse();
                return Some((cells, g));
            }
            if best.get(&cell).is_some_and(|&known| g > known) {
                continue;
            }
            for (next, cost) in self.neighbors(cell) {
                let tentative = g + cost;
                if best.get(&next).map_or(true, |&known| tentative < known) {
                    best.insert(next, tentative);
                    came_from.insert(next, cell);
                    open.push(Node {
                        f: tentative + Self::heuristic(next, to),
                        g: tentative,
                        cell: next,
                    });
                }
            }
        }
        None
    }

    fn grid_cell(&self, pt: Vec2) -> Option<(i32, i32)> {
        let cell = (
            (pt.x * self.grid_scale).floor() as i32,
            (pt.y * self.grid_scale).floor() as i32,
        );
        self.nav.in_bounds(cell.0, cell.1).then_some(cell)
    }

    fn tile_center(&self, (x, y): (i32, i32)) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.grid_scale,
            (y as f32 + 0.5) / self.grid_scale,
        )
    }

    /// Find a world-space path from `org` to `dst`
    ///
    /// The path is ordered destination first, origin last, so it can be used
    /// directly as a waypoint stack. Its first point is exactly `dst`, its
    /// last exactly `org` (when they lie on different tiles); in between are
    /// tile centers with collinear runs collapsed. Returns the path and its
    /// cost, or `None` when either end is out of bounds.
    pub fn find_path(&self, org: Vec2, dst: Vec2) -> Option<(Path, f32)> {
        let from = self.grid_cell(org)?;
        let to = self.grid_cell(dst)?;
        let (cells, cost) = self.search(from, to)?;

        if cells.len() == 1 {
            return Some((vec![dst], cost));
        }

        // destination first
        let raw: Vec<(i32, i32)> = cells.into_iter().rev().collect();
        let last = raw.len() - 1;
        let mut path = Vec::with_capacity(raw.len());
        path.push(dst);
        for i in 1..last {
            let (prev, cur, next) = (raw[i - 1], raw[i], raw[i + 1]);
            let incoming = (prev.0 - cur.0, prev.1 - cur.1);
            let outgoing = (cur.0 - next.0, cur.1 - next.1);
            if incoming != outgoing {
                path.push(self.tile_center(cur));
            }
        }
        path.push(org);
        Some((path, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::{Bitmap, World};

    fn pathfinder(rows: &[&str], scale: f32) -> Pathfinder {
        let world = World::new(&Bitmap::from_rows(rows), scale).unwrap();
        Pathfinder::new(world.nav_grid(), world.grid_scale())
    }

    fn cells_of(pf: &Pathfinder, path: &[Vec2]) -> Vec<(i32, i32)> {
        path.iter().map(|p| pf.grid_cell(*p).unwrap()).collect()
    }

    fn assert_no_collinear_segments(path: &[Vec2]) {
        for w in path.windows(3) {
            let a = w[0] - w[1];
            let b = w[1] - w[2];
            let cross = a.x * b.y - a.y * b.x;
            let same_dir = a.x * b.x + a.y * b.y > 0.0;
            assert!(
                !(cross.abs() < 1e-6 && same_dir && a.approx_eq(b, 1e-6)),
                "collinear run in {path:?}"
            );
        }
    }

    #[test]
    fn path_runs_from_destination_to_origin() {
        let pf = pathfinder(&["....", "....", "....", "...."], 1.0);
        let org = Vec2::new(0.2, 0.3);
        let dst = Vec2::new(3.7, 0.6);
        let (path, cost) = pf.find_path(org, dst).unwrap();
        assert_eq!(path[0], dst);
        assert_eq!(*path.last().unwrap(), org);
        // a straight corridor collapses to its endpoints
        assert_eq!(path.len(), 2);
        assert_eq!(cost, 3.0 * WALKABLE_COST);
    }

    #[test]
    fn same_tile_gives_single_point() {
        let pf = pathfinder(&["..", ".."], 1.0);
        let (path, cost) = pf.find_path(Vec2::new(0.2, 0.2), Vec2::new(0.8, 0.7)).unwrap();
        assert_eq!(path, vec![Vec2::new(0.8, 0.7)]);
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn out_of_bounds_ends_are_not_found() {
        let pf = pathfinder(&["..", ".."], 1.0);
        assert!(pf.find_path(Vec2::new(0.5, 0.5), Vec2::new(5.0, 0.5)).is_none());
        assert!(pf.find_path(Vec2::new(-1.0, 0.5), Vec2::new(1.5, 0.5)).is_none());
    }

    #[test]
    fn path_goes_around_walls() {
        let pf = pathfinder(
            &[
                ".....", //
                ".###.", //
                ".#...", //
                ".#.#.", //
                "...#.", //
            ],
            1.0,
        );
        let org = Vec2::new(2.5, 2.5);
        let dst = Vec2::new(0.5, 4.5);
        let (path, cost) = pf.find_path(org, dst).unwrap();
        assert!(cost < NOT_WALKABLE_COST);
        for (x, y) in cells_of(&pf, &path) {
            assert!(pf.nav.is_walkable(x, y), "path crosses wall at ({x}, {y})");
        }
        assert_no_collinear_segments(&path);
        assert_eq!(path[0], dst);
        assert_eq!(*path.last().unwrap(), org);
    }

    #[test]
    fn diagonal_corner_cutting_is_forbidden() {
        // from (0,0) to (1,1) with (1,0) blocked: the diagonal must not be taken
        let pf = pathfinder(&[".#", ".."], 1.0);
        let (path, cost) = pf.find_path(Vec2::new(0.5, 0.5), Vec2::new(1.5, 1.5)).unwrap();
        assert_eq!(cost, 2.0 * WALKABLE_COST);
        assert_eq!(path.len(), 3);
        assert_eq!(cells_of(&pf, &path), vec![(1, 1), (0, 1), (0, 0)]);
    }

    #[test]
    fn open_diagonal_is_taken() {
        let pf = pathfinder(&["..", ".."], 1.0);
        let (path, cost) = pf.find_path(Vec2::new(0.5, 0.5), Vec2::new(1.5, 1.5)).unwrap();
        assert_eq!(path.len(), 2);
        assert!((cost - WALKABLE_COST * std::f32::consts::SQRT_2).abs() < 1e-4);
    }

    #[test]
    fn walled_off_target_is_reached_through_the_wall_cost() {
        let pf = pathfinder(&[".#."], 1.0);
        let (path, cost) = pf.find_path(Vec2::new(0.5, 0.5), Vec2::new(2.5, 0.5)).unwrap();
        assert!(cost >= NOT_WALKABLE_COST);
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn intermediate_waypoints_are_tile_centers() {
        let pf = pathfinder(
            &[
                "...", //
                "##.", //
                "...", //
            ],
            2.0,
        );
        let org = Vec2::new(0.1, 0.1);
        let dst = Vec2::new(0.1, 1.4);
        let (path, _) = pf.find_path(org, dst).unwrap();
        assert_eq!(path[0], dst);
        assert_eq!(*path.last().unwrap(), org);
        for p in &path[1..path.len() - 1] {
            let cell = pf.grid_cell(*p).unwrap();
            assert!(p.approx_eq(pf.tile_center(cell), 1e-6));
        }
        assert_no_collinear_segments(&path);
    }
}
