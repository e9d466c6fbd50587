//! Waypoint stepping and path requests

use std::time::Duration;

use super::math::Vec2;

/// Below this distance a waypoint counts as reached
pub const WAYPOINT_EPSILON: f32 = 1e-3;

/// Ask the movement planner for a path
///
/// `seq` identifies the request among those of the same entity; only the
/// result carrying the entity's latest `seq` gets installed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathRequest {
    pub entity_id: u32,
    pub seq: u32,
    pub org: Vec2,
    pub dst: Vec2,
}

impl PathRequest {
    pub fn new(entity_id: u32, seq: u32, org: Vec2, dst: Vec2) -> Self {
        Self {
            entity_id,
            seq,
            org,
            dst,
        }
    }
}

/// Position after walking `dt` at `speed` from `pos` toward `waypoint`
///
/// Returns exactly `waypoint` when the step would overshoot it, when the
/// direction is undefined or when it is already within [`WAYPOINT_EPSILON`].
pub fn compute_move(pos: Vec2, waypoint: Vec2, speed: f32, dt: Duration) -> Vec2 {
    let to_waypoint = waypoint - pos;
    let remaining = to_waypoint.len();
    if remaining < WAYPOINT_EPSILON {
        return waypoint;
    }
    let dir = to_waypoint.normalize();
    if dir.x.is_nan() || dir.y.is_nan() {
        return waypoint;
    }
    let step = speed * dt.as_secs_f32();
    if step > remaining {
        return waypoint;
    }
    pos + dir * step
}
