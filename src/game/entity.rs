//! Game entities: mobiles, buildings and objects
//!
//! All entities share a base (id, position, hit points) and carry their
//! variant-specific state in [`EntityKind`]. Entities refer to each other by
//! id only; the game state owns them all.

use std::collections::BTreeMap;
use std::time::Duration;

use super::action::{Action, ActionStack, ActionType};
use super::events::{Event, EventSender};
use super::math::{Aabb, Path, Vec2};
use super::movement::{compute_move, PathRequest};
use super::world::World;
use crate::util::ids::INVALID_ID;

/// Period between two build power inductions
pub const BP_INDUCTION_PERIOD: Duration = Duration::from_secs(1);
/// Max distance between a player and its melee target
pub const PLAYER_ATTACK_DISTANCE: f32 = 1.0;
/// Period between two hits
pub const ATTACK_PERIOD: Duration = Duration::from_millis(500);
/// Period between two path refreshes while chasing a target
pub const PATH_FIND_PERIOD: Duration = Duration::from_secs(1);
/// Period between two coffee machine heals
pub const HEALING_PERIOD: Duration = Duration::from_millis(500);
/// Max distance between a coffee machine and its operator
pub const HEALING_DISTANCE: f32 = 1.5;
/// Hit points restored per heal
pub const HEALING_POWER: f32 = 5.0;

pub const MOBILE_HALF_EXTENT: f32 = 0.5;
pub const BUILDING_HALF_EXTENT: f32 = 0.25;
pub const OBJECT_HALF_EXTENT: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MobileType {
    Tank = 0,
    Programmer = 1,
    Engineer = 2,
    Zombie = 3,
}

impl MobileType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Tank),
            1 => Some(Self::Programmer),
            2 => Some(Self::Engineer),
            3 => Some(Self::Zombie),
            _ => None,
        }
    }

    pub fn is_player(self) -> bool {
        self != MobileType::Zombie
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BuildingType {
    Barricade = 0,
    MgTurret = 1,
}

impl BuildingType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Barricade),
            1 => Some(Self::MgTurret),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ObjectType {
    CoffeeMachine = 0,
    Computer = 1,
}

/// Tunables of a mobile entity type
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct MobileStats {
    pub speed: f32,
    pub total_hp: f32,
    pub combat_power: f32,
    pub build_power: f32,
}

/// Tunables of a building type
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct BuildingStats {
    pub total_hp: f32,
    pub required_bp: f32,
}

#[derive(Debug, Clone)]
pub struct Mobile {
    pub mobile_type: MobileType,
    pub speed: f32,
    pub combat_power: f32,
    pub build_power: f32,
    /// Remaining waypoints, next one last
    pub waypoints: Path,
    pub actions: ActionStack,
    time_acc: Duration,
    repath_acc: Duration,
    /// Sequence number of the latest path request
    path_seq: u32,
}

impl Mobile {
    fn next_path_seq(&mut self) -> u32 {
        self.path_seq = self.path_seq.wrapping_add(1);
        self.path_seq
    }
}

#[derive(Debug, Clone)]
pub struct Building {
    pub building_type: BuildingType,
    pub required_bp: f32,
    pub cur_bp: f32,
    pub is_built: bool,
}

#[derive(Debug, Clone)]
pub struct Object {
    pub object_type: ObjectType,
    pub operated_by: u32,
    time_acc: Duration,
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    Mobile(Mobile),
    Building(Building),
    Object(Object),
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: u32,
    pub pos: Vec2,
    pub cur_hp: f32,
    pub total_hp: f32,
    pub kind: EntityKind,
}

/// What an entity update may touch besides the entity itself
pub struct UpdateCtx<'a> {
    pub world: &'a mut World,
    /// Every other entity; the updated one is temporarily out of the map
    pub others: &'a mut BTreeMap<u32, Entity>,
    pub events: &'a EventSender,
    pub path_requests: &'a mut Vec<PathRequest>,
}

impl Entity {
    pub fn new_mobile(mobile_type: MobileType, pos: Vec2, stats: MobileStats) -> Self {
        Self {
            id: INVALID_ID,
            pos,
            cur_hp: stats.total_hp,
            total_hp: stats.total_hp,
            kind: EntityKind::Mobile(Mobile {
                mobile_type,
                speed: stats.speed,
                combat_power: stats.combat_power,
                build_power: stats.build_power,
                waypoints: Vec::new(),
                actions: ActionStack::new(),
                time_acc: Duration::ZERO,
                repath_acc: Duration::ZERO,
                path_seq: 0,
            }),
        }
    }

    /// A construction site: one hit point, no build power yet
    pub fn new_building(building_type: BuildingType, pos: Vec2, stats: BuildingStats) -> Self {
        Self {
            id: INVALID_ID,
            pos,
            cur_hp: 1.0,
            total_hp: stats.total_hp,
            kind: EntityKind::Building(Building {
                building_type,
                required_bp: stats.required_bp.max(1.0),
                cur_bp: 0.0,
                is_built: false,
            }),
        }
    }

    pub fn new_object(object_type: ObjectType, pos: Vec2) -> Self {
        Self {
            id: INVALID_ID,
            pos,
            cur_hp: 1.0,
            total_hp: 1.0,
            kind: EntityKind::Object(Object {
                object_type,
                operated_by: INVALID_ID,
                time_acc: Duration::ZERO,
            }),
        }
    }

    pub fn half_extent(&self) -> f32 {
        match self.kind {
            EntityKind::Mobile(_) => MOBILE_HALF_EXTENT,
            EntityKind::Building(_) => BUILDING_HALF_EXTENT,
            EntityKind::Object(_) => OBJECT_HALF_EXTENT,
        }
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::from_center(self.pos, self.half_extent())
    }

    pub fn as_mobile(&self) -> Option<&Mobile> {
        match &self.kind {
            EntityKind::Mobile(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mobile_mut(&mut self) -> Option<&mut Mobile> {
        match &mut self.kind {
            EntityKind::Mobile(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_building(&self) -> Option<&Building> {
        match &self.kind {
            EntityKind::Building(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_building_mut(&mut self) -> Option<&mut Building> {
        match &mut self.kind {
            EntityKind::Building(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match &self.kind {
            EntityKind::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match &mut self.kind {
            EntityKind::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_player(&self) -> bool {
        self.as_mobile()
            .map(|m| m.mobile_type.is_player())
            .unwrap_or(false)
    }

    pub fn is_zombie(&self) -> bool {
        self.as_mobile()
            .map(|m| m.mobile_type == MobileType::Zombie)
            .unwrap_or(false)
    }

    /// Remove hit points, returns true when the entity died
    ///
    /// Objects cannot be damaged.
    pub fn deal_damage(&mut self, damage: f32) -> bool {
        if matches!(self.kind, EntityKind::Object(_)) {
            return false;
        }
        self.cur_hp = (self.cur_hp - damage).max(0.0);
        self.cur_hp <= 0.0
    }

    /// Restore hit points, returns true when back at full health
    pub fn heal(&mut self, amount: f32) -> bool {
        self.cur_hp = (self.cur_hp + amount).min(self.total_hp);
        self.cur_hp >= self.total_hp
    }

    /// Event announcing this entity's death
    pub fn death_event(&self) -> Option<Event> {
        match &self.kind {
            EntityKind::Mobile(m) if m.mobile_type == MobileType::Zombie => {
                Some(Event::ZombieDeath { id: self.id })
            }
            EntityKind::Mobile(_) => Some(Event::PlayerDeath { id: self.id }),
            EntityKind::Building(_) => Some(Event::BuildingDestroy { id: self.id }),
            EntityKind::Object(_) => None,
        }
    }

    /// Walk to `dst`: the stack becomes `[Idle, Move, WaitingForPath]`
    pub fn move_to(&mut self, dst: Vec2) -> Option<PathRequest> {
        self.start_task(None, dst)
    }

    /// Walk to a building and construct it
    pub fn build(&mut self, building_id: u32, at: Vec2) -> Option<PathRequest> {
        self.start_task(Some(Action::Build { building_id }), at)
    }

    /// Walk to a building and repair it
    pub fn repair(&mut self, building_id: u32, at: Vec2) -> Option<PathRequest> {
        self.start_task(Some(Action::Repair { building_id }), at)
    }

    /// Walk to an object and operate it
    pub fn operate(&mut self, object_id: u32, at: Vec2) -> Option<PathRequest> {
        self.start_task(Some(Action::DrinkCoffee { object_id }), at)
    }

    /// Chase and hit a target
    pub fn attack(&mut self, target_id: u32, at: Vec2) -> Option<PathRequest> {
        let (id, pos) = (self.id, self.pos);
        let mobile = self.as_mobile_mut()?;
        mobile.waypoints.clear();
        mobile.time_acc = Duration::ZERO;
        mobile.repath_acc = Duration::ZERO;
        mobile
            .actions
            .replace(&[Action::Attack { target_id }, Action::WaitingForPath]);
        Some(PathRequest::new(id, mobile.next_path_seq(), pos, at))
    }

    fn start_task(&mut self, task: Option<Action>, dst: Vec2) -> Option<PathRequest> {
        let (id, pos) = (self.id, self.pos);
        let mobile = self.as_mobile_mut()?;
        mobile.waypoints.clear();
        mobile.time_acc = Duration::ZERO;
        let mut stack: Vec<Action> = task.into_iter().collect();
        stack.push(Action::Move { dst });
        stack.push(Action::WaitingForPath);
        mobile.actions.replace(&stack);
        Some(PathRequest::new(id, mobile.next_path_seq(), pos, dst))
    }

    /// Install the result of path request `seq`
    ///
    /// Only accepted while waiting for the latest request; a result for an
    /// older request, or arriving after the entity switched to something
    /// else, is dropped untouched. `None` (no path) cancels the pending task.
    /// Returns whether the path was installed.
    pub fn set_path(&mut self, seq: u32, path: Option<Path>) -> bool {
        let Some(mobile) = self.as_mobile_mut() else {
            return false;
        };
        if seq != mobile.path_seq || mobile.actions.top() != Action::WaitingForPath {
            return false;
        }
        match path {
            Some(path) if !path.is_empty() => {
                mobile.actions.pop();
                mobile.waypoints = path;
                true
            }
            _ => {
                mobile.actions.reset();
                mobile.waypoints.clear();
                false
            }
        }
    }

    /// Action descriptor reported in snapshots
    pub fn reported_action(&self) -> Option<ActionType> {
        let mobile = self.as_mobile()?;
        Some(match mobile.actions.top() {
            Action::DrinkCoffee { .. } => ActionType::Idle,
            Action::Attack { .. } if !mobile.waypoints.is_empty() => ActionType::Move,
            action => action.action_type(),
        })
    }

    /// Advance the entity by `dt`
    pub fn update(&mut self, dt: Duration, ctx: &mut UpdateCtx<'_>) {
        match self.kind {
            EntityKind::Mobile(_) => self.update_mobile(dt, ctx),
            EntityKind::Object(_) => self.update_object(dt, ctx),
            EntityKind::Building(_) => {}
        }
    }

    fn update_mobile(&mut self, dt: Duration, ctx: &mut UpdateCtx<'_>) {
        let Some(top) = self.as_mobile().map(|m| m.actions.top()) else {
            return;
        };
        match top {
            Action::Idle | Action::WaitingForPath => {}
            Action::Move { .. } => self.on_move(dt, ctx),
            Action::Build { building_id } => self.induce_build_power(building_id, dt, ctx, false),
            Action::Repair { building_id } => self.induce_build_power(building_id, dt, ctx, true),
            Action::Attack { target_id } => self.on_attack(target_id, dt, ctx),
            Action::DrinkCoffee { object_id } => self.on_drink_coffee(object_id, ctx),
        }
    }

    fn pop_action(&mut self) {
        if let Some(mobile) = self.as_mobile_mut() {
            mobile.actions.pop();
            mobile.time_acc = Duration::ZERO;
        }
    }

    /// Step along the waypoints, returns true once the last one is reached
    fn follow_waypoints(&mut self, dt: Duration, ctx: &mut UpdateCtx<'_>) -> bool {
        let pos = self.pos;
        let Some(mobile) = self.as_mobile_mut() else {
            return true;
        };
        let Some(&waypoint) = mobile.waypoints.last() else {
            return true;
        };
        let next = compute_move(pos, waypoint, mobile.speed, dt);
        if next == waypoint {
            mobile.waypoints.pop();
        }
        let done = mobile.waypoints.is_empty();
        if next != pos {
            self.pos = next;
            ctx.world.update_entity(self.id, self.aabb());
        }
        done
    }

    fn on_move(&mut self, dt: Duration, ctx: &mut UpdateCtx<'_>) {
        let Some(mobile) = self.as_mobile() else {
            return;
        };
        if mobile.waypoints.is_empty() {
            self.pop_action();
            return;
        }

        // a Move under a task ends as soon as the target is touched
        let target = match mobile.actions.below_top() {
            Some(Action::Build { building_id }) | Some(Action::Repair { building_id }) => {
                Some(building_id)
            }
            Some(Action::DrinkCoffee { object_id }) => Some(object_id),
            _ => None,
        };
        if let Some(target) = target {
            let waypoint = mobile.waypoints.last().copied().unwrap_or(self.pos);
            let candidate = compute_move(self.pos, waypoint, mobile.speed, dt);
            let candidate_box = Aabb::from_center(candidate, MOBILE_HALF_EXTENT);
            if ctx.world.query_aabb(&candidate_box).contains(&target) {
                if let Some(mobile) = self.as_mobile_mut() {
                    mobile.waypoints.clear();
                }
                self.pop_action();
                return;
            }
        }

        if self.follow_waypoints(dt, ctx) {
            self.pop_action();
        }
    }

    fn induce_build_power(
        &mut self,
        building_id: u32,
        dt: Duration,
        ctx: &mut UpdateCtx<'_>,
        repair: bool,
    ) {
        let Some(building) = ctx.others.get_mut(&building_id) else {
            self.pop_action();
            return;
        };
        let done = match &building.kind {
            EntityKind::Building(b) if repair => b.is_built && building.cur_hp >= building.total_hp,
            EntityKind::Building(b) => b.is_built,
            _ => true,
        };
        if done {
            self.pop_action();
            return;
        }

        let Some(mobile) = self.as_mobile_mut() else {
            return;
        };
        mobile.time_acc += dt;
        if mobile.time_acc < BP_INDUCTION_PERIOD {
            return;
        }
        mobile.time_acc -= BP_INDUCTION_PERIOD;
        let power = mobile.build_power;

        let finished = if repair {
            building.heal(power)
        } else {
            building.add_build_power(power)
        };
        if finished {
            self.pop_action();
        }
    }

    fn on_attack(&mut self, target_id: u32, dt: Duration, ctx: &mut UpdateCtx<'_>) {
        let Some(target) = ctx.others.get_mut(&target_id) else {
            self.pop_action();
            return;
        };
        let target_pos = target.pos;

        if self.pos.dist(target_pos) <= PLAYER_ATTACK_DISTANCE {
            let Some(mobile) = self.as_mobile_mut() else {
                return;
            };
            mobile.waypoints.clear();
            mobile.time_acc += dt;
            if mobile.time_acc < ATTACK_PERIOD {
                return;
            }
            mobile.time_acc -= ATTACK_PERIOD;
            if target.deal_damage(mobile.combat_power) {
                if let Some(event) = target.death_event() {
                    ctx.events.post(event);
                }
                self.pop_action();
            }
            return;
        }

        // out of range: chase, refreshing the path now and then
        let (id, pos) = (self.id, self.pos);
        let Some(mobile) = self.as_mobile_mut() else {
            return;
        };
        mobile.repath_acc += dt;
        if mobile.waypoints.is_empty() || mobile.repath_acc >= PATH_FIND_PERIOD {
            mobile.repath_acc = Duration::ZERO;
            mobile.actions.push(Action::WaitingForPath);
            let seq = mobile.next_path_seq();
            ctx.path_requests.push(PathRequest::new(id, seq, pos, target_pos));
            return;
        }
        self.follow_waypoints(dt, ctx);
    }

    fn on_drink_coffee(&mut self, object_id: u32, ctx: &mut UpdateCtx<'_>) {
        if let Some(object) = ctx.others.get_mut(&object_id) {
            object.operate_by(self.id);
        }
        self.pop_action();
    }

    /// Put a building's construction forward, returns true once built
    pub fn add_build_power(&mut self, power: f32) -> bool {
        let total_hp = self.total_hp;
        let Some(building) = self.as_building_mut() else {
            return false;
        };
        if building.is_built {
            return true;
        }
        building.cur_bp = (building.cur_bp + power).min(building.required_bp);
        let built = building.cur_bp >= building.required_bp;
        let progress = building.cur_bp / building.required_bp;
        if built {
            building.is_built = true;
            self.cur_hp = total_hp;
        } else {
            self.cur_hp = (total_hp * progress).max(1.0);
        }
        built
    }

    /// Start operating an object, false if someone else already does
    pub fn operate_by(&mut self, operator: u32) -> bool {
        let Some(object) = self.as_object_mut() else {
            return false;
        };
        if object.operated_by != INVALID_ID && object.operated_by != operator {
            return false;
        }
        object.operated_by = operator;
        object.time_acc = HEALING_PERIOD;
        true
    }

    fn update_object(&mut self, dt: Duration, ctx: &mut UpdateCtx<'_>) {
        let pos = self.pos;
        let Some(object) = self.as_object_mut() else {
            return;
        };
        if object.object_type != ObjectType::CoffeeMachine || object.operated_by == INVALID_ID {
            return;
        }
        let Some(operator) = ctx.others.get_mut(&object.operated_by) else {
            object.operated_by = INVALID_ID;
            return;
        };
        if operator.pos.dist(pos) > HEALING_DISTANCE {
            object.operated_by = INVALID_ID;
            return;
        }
        object.time_acc += dt;
        if object.time_acc >= HEALING_PERIOD {
            object.time_acc = Duration::ZERO;
            operator.heal(HEALING_POWER);
        }
    }
}
