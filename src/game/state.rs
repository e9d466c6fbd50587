//! Authoritative game state, owned by the tick loop

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::net::registry::ClientRegistry;
use crate::util::ids::IdAllocator;
use crate::util::time::{is_night, MINUTES_PER_DAY};

use super::data::GameData;
use super::entity::{Entity, MobileType, UpdateCtx};
use super::events::EventSender;
use super::math::Vec2;
use super::movement::PathRequest;
use super::world::{World, WorldError};

pub struct GameState {
    pub world: World,
    pub entities: BTreeMap<u32, Entity>,
    pub data: Arc<GameData>,
    pub config: GameConfig,
    /// Shared with the client registry, client ids double as player entity ids
    pub ids: Arc<IdAllocator>,
    pub clients: Arc<ClientRegistry>,
    pub events: EventSender,
    /// In-game minute of the day
    pub game_time: i16,
    pub rng: ChaCha8Rng,
    /// Requests produced since the last logic tick
    pub path_requests: Vec<PathRequest>,
}

impl GameState {
    pub fn new(
        data: Arc<GameData>,
        config: GameConfig,
        ids: Arc<IdAllocator>,
        clients: Arc<ClientRegistry>,
        events: EventSender,
        seed: Option<u64>,
    ) -> Result<Self, WorldError> {
        let world = data.build_world()?;
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut state = Self {
            world,
            entities: BTreeMap::new(),
            game_time: config.game_starting_time,
            data,
            config,
            ids,
            clients,
            events,
            rng,
            path_requests: Vec::new(),
        };

        let objects = state.data.objects.clone();
        for (object_type, pos) in objects {
            if let Some(id) = state.add_entity(Entity::new_object(object_type, pos)) {
                debug!(entity_id = id, ?object_type, "Object placed");
            }
        }
        Ok(state)
    }

    /// Insert an entity under a fresh id
    pub fn add_entity(&mut self, entity: Entity) -> Option<u32> {
        let Some(id) = self.ids.next() else {
            warn!("Entity ids exhausted");
            return None;
        };
        self.insert_entity(id, entity);
        Some(id)
    }

    /// Insert an entity under a known id, replacing any previous one
    pub fn insert_entity(&mut self, id: u32, mut entity: Entity) {
        entity.id = id;
        self.world.update_entity(id, entity.aabb());
        self.entities.insert(id, entity);
    }

    pub fn remove_entity(&mut self, id: u32) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        self.world.detach_entity(id);
        // release whatever it was operating
        for other in self.entities.values_mut() {
            if let Some(object) = other.as_object_mut() {
                if object.operated_by == id {
                    object.operated_by = crate::util::ids::INVALID_ID;
                }
            }
        }
        Some(entity)
    }

    pub fn get(&self, id: u32) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Move an entity without pathing
    pub fn teleport(&mut self, id: u32, pos: Vec2) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        entity.pos = pos;
        if let Some(mobile) = entity.as_mobile_mut() {
            mobile.waypoints.clear();
            mobile.actions.reset();
        }
        let aabb = entity.aabb();
        self.world.update_entity(id, aabb);
        true
    }

    pub fn random_player_spawn(&mut self) -> Option<Vec2> {
        self.data.player_spawns.choose(&mut self.rng).copied()
    }

    pub fn random_enemy_spawn(&mut self) -> Option<Vec2> {
        self.data.enemy_spawns.choose(&mut self.rng).copied()
    }

    /// Create the entity of a joining player under its client id
    pub fn spawn_player(&mut self, id: u32, mobile_type: MobileType) -> Option<Vec2> {
        let pos = self.random_player_spawn()?;
        let stats = self.data.stats.mobile(mobile_type);
        self.insert_entity(id, Entity::new_mobile(mobile_type, pos, stats));
        info!(entity_id = id, ?mobile_type, x = pos.x, y = pos.y, "Player spawned");
        Some(pos)
    }

    /// Summon a zombie at a random enemy spawn point
    pub fn spawn_zombie(&mut self) -> Option<u32> {
        let pos = self.random_enemy_spawn()?;
        let stats = self.data.stats.mobile(MobileType::Zombie);
        let id = self.add_entity(Entity::new_mobile(MobileType::Zombie, pos, stats))?;
        debug!(entity_id = id, x = pos.x, y = pos.y, "Zombie summoned");
        Some(id)
    }

    pub fn is_night(&self) -> bool {
        is_night(
            self.game_time,
            self.config.night_starting_time,
            self.config.night_ending_time,
        )
    }

    /// Advance the clock by one in-game minute
    pub fn advance_game_time(&mut self) {
        self.game_time = (self.game_time + 1) % MINUTES_PER_DAY;
    }

    /// Run one update on every entity
    ///
    /// Each entity is taken out of the map while it updates so it can
    /// mutate the others. Path requests it produces are queued in
    /// `path_requests`.
    pub fn update_entities(&mut self, dt: Duration) {
        let ids: Vec<u32> = self.entities.keys().copied().collect();
        for id in ids {
            let Some(mut entity) = self.entities.remove(&id) else {
                continue;
            };
            let mut ctx = UpdateCtx {
                world: &mut self.world,
                others: &mut self.entities,
                events: &self.events,
                path_requests: &mut self.path_requests,
            };
            entity.update(dt, &mut ctx);
            self.entities.insert(id, entity);
        }
    }

    pub fn count_by_kind(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for entity in self.entities.values() {
            match entity.kind {
                super::entity::EntityKind::Mobile(_) => counts.0 += 1,
                super::entity::EntityKind::Building(_) => counts.1 += 1,
                super::entity::EntityKind::Object(_) => counts.2 += 1,
            }
        }
        counts
    }
}
