//! Snapshot building

use std::collections::BTreeMap;

use crate::net::protocol::{ActionData, BuildingState, GameState, MobileEntityState, ObjectState};

use super::action::{Action, ActionType};
use super::entity::{Entity, EntityKind, Mobile};

/// Waypoints sent along with a moving entity
pub const SNAPSHOT_PATH_LEN: usize = 3;

/// Builds snapshots for network transmission
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    path_len: usize,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            path_len: SNAPSHOT_PATH_LEN,
        }
    }

    /// Build a snapshot message, entities partitioned by kind
    pub fn build<'a, I>(&self, entities: I, time: i16, tstamp: i64) -> GameState
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let mut snapshot = GameState {
            tstamp,
            time,
            entities: BTreeMap::new(),
            buildings: BTreeMap::new(),
            objects: BTreeMap::new(),
        };

        for entity in entities {
            let hp = hit_points(entity.cur_hp);
            match &entity.kind {
                EntityKind::Mobile(mobile) => {
                    let (action_type, action) = self.action_of(entity, mobile);
                    snapshot.entities.insert(
                        entity.id,
                        MobileEntityState {
                            r#type: mobile.mobile_type as u8,
                            xpos: entity.pos.x,
                            ypos: entity.pos.y,
                            cur_hit_points: hp,
                            action_type: action_type as u8,
                            action,
                        },
                    );
                }
                EntityKind::Building(building) => {
                    snapshot.buildings.insert(
                        entity.id,
                        BuildingState {
                            r#type: building.building_type as u8,
                            xpos: entity.pos.x,
                            ypos: entity.pos.y,
                            cur_hit_points: hp,
                            completed: building.is_built,
                        },
                    );
                }
                EntityKind::Object(object) => {
                    snapshot.objects.insert(
                        entity.id,
                        ObjectState {
                            r#type: object.object_type as u8,
                            xpos: entity.pos.x,
                            ypos: entity.pos.y,
                            operated_by: object.operated_by,
                        },
                    );
                }
            }
        }
        snapshot
    }

    fn action_of(&self, entity: &Entity, mobile: &Mobile) -> (ActionType, ActionData) {
        let action_type = entity.reported_action().unwrap_or(ActionType::Idle);
        let data = match (action_type, mobile.actions.top()) {
            (ActionType::Move, _) => ActionData::Move {
                speed: mobile.speed,
                path: mobile
                    .waypoints
                    .iter()
                    .rev()
                    .take(self.path_len)
                    .map(|p| p.to_array())
                    .collect(),
            },
            (_, Action::Build { building_id }) | (_, Action::Repair { building_id }) => {
                ActionData::Target { id: building_id }
            }
            (_, Action::Attack { target_id }) => ActionData::Target { id: target_id },
            _ => ActionData::Idle {},
        };
        (action_type, data)
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn hit_points(hp: f32) -> u16 {
    hp.round().clamp(0.0, u16::MAX as f32) as u16
}

/// Snapshot size stats for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_entities_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, entity_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // running average
        let n = self.total_snapshots as f32;
        self.avg_entities_per_snapshot =
            self.avg_entities_per_snapshot * ((n - 1.0) / n) + (entity_count as f32 / n);
    }
}
