//! Command and event handlers
//!
//! Commands arriving from clients are turned into events by the command
//! table; the event subscribers registered here apply them to the game
//! state. Both run on the tick loop.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::net::protocol::{Message, MsgType};
use crate::net::registry::ClientRegistry;

use super::entity::{BuildingType, Entity, EntityKind, MobileType};
use super::events::{Event, EventBus, EventKind, EventSender};
use super::math::Vec2;
use super::state::GameState;

pub const REASON_ONLY_ENGINEERS_BUILD: &str = "illegal action: only engineers can build!";
pub const REASON_PLAYER_KILLED: &str = "player got killed";
pub const REASON_INVALID_ENTITY_TYPE: &str = "invalid entity type";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandError {
    #[error("message type {0:?} is not a game command")]
    NotACommand(MsgType),

    #[error("no handler for message type {0:?}")]
    NoHandler(MsgType),
}

/// Turns a client command into an event
pub type CommandHandler = fn(&EventSender, u32, &Message) -> Result<(), CommandError>;

/// Table of command handlers by message type
pub fn command_table() -> HashMap<MsgType, CommandHandler> {
    let mut table: HashMap<MsgType, CommandHandler> = HashMap::new();
    table.insert(MsgType::Move, handle_move);
    table.insert(MsgType::Build, handle_build);
    table.insert(MsgType::Repair, handle_repair);
    table.insert(MsgType::Attack, handle_attack);
    table.insert(MsgType::Operate, handle_operate);
    table
}

/// Dispatch a command through the table
pub fn dispatch_command(
    table: &HashMap<MsgType, CommandHandler>,
    events: &EventSender,
    client_id: u32,
    msg: &Message,
) -> Result<(), CommandError> {
    let msg_type = msg.msg_type();
    if !msg.is_command() {
        return Err(CommandError::NotACommand(msg_type));
    }
    let handler = table.get(&msg_type).ok_or(CommandError::NoHandler(msg_type))?;
    handler(events, client_id, msg)
}

fn handle_move(events: &EventSender, id: u32, msg: &Message) -> Result<(), CommandError> {
    if let Message::Move(m) = msg {
        events.post(Event::PlayerMove {
            id,
            x: m.xpos,
            y: m.ypos,
        });
    }
    Ok(())
}

fn handle_build(events: &EventSender, id: u32, msg: &Message) -> Result<(), CommandError> {
    if let Message::Build(b) = msg {
        events.post(Event::PlayerBuild {
            id,
            building_type: b.r#type,
            x: b.xpos,
            y: b.ypos,
        });
    }
    Ok(())
}

fn handle_repair(events: &EventSender, id: u32, msg: &Message) -> Result<(), CommandError> {
    if let Message::Repair(r) = msg {
        events.post(Event::PlayerRepair {
            id,
            building_id: r.id,
        });
    }
    Ok(())
}

fn handle_attack(events: &EventSender, id: u32, msg: &Message) -> Result<(), CommandError> {
    if let Message::Attack(a) = msg {
        events.post(Event::PlayerAttack { id, entity_id: a.id });
    }
    Ok(())
}

fn handle_operate(events: &EventSender, id: u32, msg: &Message) -> Result<(), CommandError> {
    if let Message::Operate(o) = msg {
        events.post(Event::PlayerOperate { id, entity_id: o.id });
    }
    Ok(())
}

/// Register every game event subscriber on the bus
pub fn register(bus: &mut EventBus<GameState>) {
    bus.subscribe(EventKind::PlayerJoin, on_player_join);
    bus.subscribe(EventKind::PlayerLeave, on_player_leave);
    bus.subscribe(EventKind::PlayerMove, on_player_move);
    bus.subscribe(EventKind::PlayerBuild, on_player_build);
    bus.subscribe(EventKind::PlayerRepair, on_player_repair);
    bus.subscribe(EventKind::PlayerAttack, on_player_attack);
    bus.subscribe(EventKind::PlayerOperate, on_player_operate);
    bus.subscribe(EventKind::PlayerDeath, on_player_death);
    bus.subscribe(EventKind::ZombieDeath, on_entity_gone);
    bus.subscribe(EventKind::BuildingDestroy, on_entity_gone);
    bus.subscribe(EventKind::PathReady, on_path_ready);
}

/// Kick a client from the loop without waiting on its socket
fn kick_later(clients: &Arc<ClientRegistry>, id: u32, reason: &'static str) {
    let clients = Arc::clone(clients);
    tokio::spawn(async move {
        if let Err(e) = clients.kick(id, reason).await {
            debug!(client_id = id, error = %e, "Kick target already gone");
        }
    });
}

fn disconnect_later(clients: &Arc<ClientRegistry>, id: u32, reason: &'static str) {
    let clients = Arc::clone(clients);
    tokio::spawn(async move {
        if let Err(e) = clients.disconnect(id, reason).await {
            debug!(client_id = id, error = %e, "Disconnect target already gone");
        }
    });
}

/// The acting player's entity, if it still exists
fn player_mut(state: &mut GameState, id: u32) -> Option<&mut Entity> {
    match state.entities.get_mut(&id) {
        Some(entity) if entity.is_player() => Some(entity),
        _ => {
            debug!(client_id = id, "Command from a client without player entity");
            None
        }
    }
}

fn on_player_join(state: &mut GameState, event: &Event) {
    let Event::PlayerJoin { id, entity_type } = *event else {
        return;
    };
    let mobile_type = match MobileType::from_u8(entity_type) {
        Some(t) if t.is_player() => t,
        _ => {
            warn!(client_id = id, entity_type, "Join with invalid entity type");
            kick_later(&state.clients, id, REASON_INVALID_ENTITY_TYPE);
            return;
        }
    };
    if state.entities.contains_key(&id) {
        warn!(client_id = id, "Player entity already exists");
        return;
    }
    if state.spawn_player(id, mobile_type).is_none() {
        warn!(client_id = id, "No player spawn point available");
    }
}

fn on_player_leave(state: &mut GameState, event: &Event) {
    let Event::PlayerLeave { id } = *event else {
        return;
    };
    if state.remove_entity(id).is_some() {
        info!(client_id = id, "Player entity removed");
    }
}

fn on_player_move(state: &mut GameState, event: &Event) {
    let Event::PlayerMove { id, x, y } = *event else {
        return;
    };
    let dst = Vec2::new(x, y);
    if !state.world.point_in_bounds(dst) {
        warn!(client_id = id, x, y, "Move destination out of bounds");
        return;
    }
    let Some(player) = player_mut(state, id) else {
        return;
    };
    if let Some(request) = player.move_to(dst) {
        state.path_requests.push(request);
    }
}

fn on_player_build(state: &mut GameState, event: &Event) {
    let Event::PlayerBuild {
        id,
        building_type,
        x,
        y,
    } = *event
    else {
        return;
    };
    let is_engineer = match state.entities.get(&id) {
        Some(entity) => entity
            .as_mobile()
            .map(|m| m.mobile_type == MobileType::Engineer)
            .unwrap_or(false),
        None => return,
    };
    if !is_engineer {
        kick_later(&state.clients, id, REASON_ONLY_ENGINEERS_BUILD);
        return;
    }
    let Some(building_type) = BuildingType::from_u8(building_type) else {
        warn!(client_id = id, building_type, "Unknown building type");
        return;
    };

    // the building sits at the center of a free walkable tile
    let Some(tile) = state.world.tile_from_world(Vec2::new(x, y)) else {
        warn!(client_id = id, x, y, "Build position out of bounds");
        return;
    };
    if !tile.is_walkable() {
        debug!(client_id = id, x, y, "Build position not walkable");
        return;
    }
    let occupied = tile.entities.iter().any(|other| {
        state
            .entities
            .get(other)
            .map(|e| matches!(e.kind, EntityKind::Building(_)))
            .unwrap_or(false)
    });
    if occupied {
        debug!(client_id = id, x, y, "Build position already occupied");
        return;
    }
    let pos = tile.center();

    let stats = state.data.stats.building(building_type);
    let Some(building_id) = state.add_entity(Entity::new_building(building_type, pos, stats))
    else {
        return;
    };
    info!(client_id = id, building_id, ?building_type, x = pos.x, y = pos.y, "Building placed");

    if let Some(request) = state
        .entities
        .get_mut(&id)
        .and_then(|player| player.build(building_id, pos))
    {
        state.path_requests.push(request);
    }
}

fn on_player_repair(state: &mut GameState, event: &Event) {
    let Event::PlayerRepair { id, building_id } = *event else {
        return;
    };
    let Some(pos) = state
        .get(building_id)
        .filter(|e| e.as_building().is_some())
        .map(|e| e.pos)
    else {
        warn!(client_id = id, building_id, "Repair target is not a building");
        return;
    };
    let Some(player) = player_mut(state, id) else {
        return;
    };
    if let Some(request) = player.repair(building_id, pos) {
        state.path_requests.push(request);
    }
}

fn on_player_attack(state: &mut GameState, event: &Event) {
    let Event::PlayerAttack { id, entity_id } = *event else {
        return;
    };
    let Some(pos) = state.get(entity_id).filter(|e| e.is_zombie()).map(|e| e.pos) else {
        warn!(client_id = id, entity_id, "Attack target is not a zombie");
        return;
    };
    let Some(player) = player_mut(state, id) else {
        return;
    };
    if let Some(request) = player.attack(entity_id, pos) {
        state.path_requests.push(request);
    }
}

fn on_player_operate(state: &mut GameState, event: &Event) {
    let Event::PlayerOperate { id, entity_id } = *event else {
        return;
    };
    let Some(pos) = state
        .get(entity_id)
        .filter(|e| e.as_object().is_some())
        .map(|e| e.pos)
    else {
        warn!(client_id = id, entity_id, "Operate target is not an object");
        return;
    };
    let Some(player) = player_mut(state, id) else {
        return;
    };
    if let Some(request) = player.operate(entity_id, pos) {
        state.path_requests.push(request);
    }
}

fn on_player_death(state: &mut GameState, event: &Event) {
    let Event::PlayerDeath { id } = *event else {
        return;
    };
    info!(client_id = id, "Player died");
    state.remove_entity(id);
    disconnect_later(&state.clients, id, REASON_PLAYER_KILLED);
}

fn on_entity_gone(state: &mut GameState, event: &Event) {
    let id = match *event {
        Event::ZombieDeath { id } | Event::BuildingDestroy { id } => id,
        _ => return,
    };
    if state.remove_entity(id).is_some() {
        debug!(entity_id = id, kind = ?event.kind(), "Entity removed");
    }
}

fn on_path_ready(state: &mut GameState, event: &Event) {
    let Event::PathReady { id, seq, path } = event else {
        return;
    };
    let id = *id;
    let Some(entity) = state.get_mut(id) else {
        return;
    };
    if !entity.set_path(*seq, path.clone()) && path.is_none() {
        debug!(entity_id = id, seq, "No path");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::action::Action;
    use crate::game::entity::ObjectType;
    use crate::game::state::tests::test_state;
    use crate::net::protocol::{Build, Move, Ping};

    fn setup() -> (EventBus<GameState>, GameState) {
        let mut bus = EventBus::new();
        register(&mut bus);
        let state = test_state(&bus);
        (bus, state)
    }

    fn top(state: &GameState, id: u32) -> Action {
        state.get(id).unwrap().as_mobile().unwrap().actions.top()
    }

    #[test]
    fn commands_become_events() {
        let (mut bus, mut state) = setup();
        let table = command_table();
        let events = bus.sender();
        state.spawn_player(10, MobileType::Tank);

        dispatch_command(
            &table,
            &events,
            10,
            &Message::Move(Move {
                xpos: 4.5,
                ypos: 0.5,
            }),
        )
        .unwrap();
        assert_eq!(bus.process_all(&mut state), 1);
        assert_eq!(top(&state, 10), Action::WaitingForPath);
        assert_eq!(state.path_requests.len(), 1);
        assert_eq!(state.path_requests[0].dst, Vec2::new(4.5, 0.5));

        assert_eq!(
            dispatch_command(&table, &events, 10, &Message::Ping(Ping { id: 1, tstamp: 0 })),
            Err(CommandError::NotACommand(MsgType::Ping))
        );
    }

    #[tokio::test]
    async fn join_spawns_and_leave_removes() {
        let (mut bus, mut state) = setup();
        bus.post(Event::PlayerJoin {
            id: 20,
            entity_type: MobileType::Programmer as u8,
        });
        bus.process_all(&mut state);
        assert_eq!(state.get(20).unwrap().pos, Vec2::new(0.5, 0.5));

        bus.post(Event::PlayerLeave { id: 20 });
        bus.process_all(&mut state);
        assert!(state.get(20).is_none());
        assert!(!state.world.is_attached(20));
    }

    #[tokio::test]
    async fn zombie_type_cannot_be_joined() {
        let (mut bus, mut state) = setup();
        bus.post(Event::PlayerJoin {
            id: 21,
            entity_type: MobileType::Zombie as u8,
        });
        bus.process_all(&mut state);
        assert!(state.get(21).is_none());
    }

    #[test]
    fn out_of_bounds_move_is_ignored() {
        let (mut bus, mut state) = setup();
        state.spawn_player(10, MobileType::Tank);
        bus.post(Event::PlayerMove {
            id: 10,
            x: 60.0,
            y: 0.5,
        });
        bus.process_all(&mut state);
        assert_eq!(top(&state, 10), Action::Idle);
        assert!(state.path_requests.is_empty());
    }

    #[test]
    fn engineer_places_building_on_tile_center() {
        let (mut bus, mut state) = setup();
        state.spawn_player(10, MobileType::Engineer);
        let table = command_table();
        dispatch_command(
            &table,
            &bus.sender(),
            10,
            &Message::Build(Build {
                r#type: BuildingType::Barricade as u8,
                xpos: 1.2,
                ypos: 3.9,
            }),
        )
        .unwrap();
        bus.process_all(&mut state);

        let (bid, building) = state
            .entities
            .iter()
            .find(|(_, e)| e.as_building().is_some())
            .unwrap();
        assert_eq!(building.pos, Vec2::new(1.5, 3.5));
        assert_eq!(building.cur_hp, 1.0);
        assert_eq!(
            state.get(10).unwrap().as_mobile().unwrap().actions.below_top(),
            Some(Action::Move {
                dst: Vec2::new(1.5, 3.5)
            })
        );
        let bid = *bid;
        assert!(state
            .get(10)
            .unwrap()
            .as_mobile()
            .unwrap()
            .actions
            .iter()
            .any(|a| *a == Action::Build { building_id: bid }));

        // second building on the same tile is refused
        bus.post(Event::PlayerBuild {
            id: 10,
            building_type: 1,
            x: 1.7,
            y: 3.2,
        });
        bus.process_all(&mut state);
        assert_eq!(state.count_by_kind().1, 1);
    }

    #[test]
    fn building_on_a_wall_is_refused() {
        let (mut bus, mut state) = setup();
        state.spawn_player(10, MobileType::Engineer);
        bus.post(Event::PlayerBuild {
            id: 10,
            building_type: 0,
            x: 2.5,
            y: 2.5,
        });
        bus.process_all(&mut state);
        assert_eq!(state.count_by_kind().1, 0);
        assert_eq!(top(&state, 10), Action::Idle);
    }

    #[tokio::test]
    async fn non_engineer_build_places_nothing() {
        let (mut bus, mut state) = setup();
        state.spawn_player(10, MobileType::Tank);
        bus.post(Event::PlayerBuild {
            id: 10,
            building_type: 0,
            x: 1.5,
            y: 0.5,
        });
        bus.process_all(&mut state);
        assert_eq!(state.count_by_kind().1, 0);
    }

    #[test]
    fn targets_must_have_the_right_kind() {
        let (mut bus, mut state) = setup();
        state.spawn_player(10, MobileType::Tank);
        let machine = *state.entities.keys().find(|id| **id != 10).unwrap();
        let zombie = state.spawn_zombie().unwrap();

        // attacking the machine or operating the zombie does nothing
        bus.post(Event::PlayerAttack {
            id: 10,
            entity_id: machine,
        });
        bus.post(Event::PlayerOperate {
            id: 10,
            entity_id: zombie,
        });
        bus.post(Event::PlayerRepair {
            id: 10,
            building_id: zombie,
        });
        bus.process_all(&mut state);
        assert_eq!(top(&state, 10), Action::Idle);

        bus.post(Event::PlayerOperate {
            id: 10,
            entity_id: machine,
        });
        bus.process_all(&mut state);
        assert_eq!(
            state.get(10).unwrap().as_mobile().unwrap().actions.len(),
            4
        );
        assert_eq!(
            state.get(machine).unwrap().as_object().unwrap().object_type,
            ObjectType::CoffeeMachine
        );

        bus.post(Event::PlayerAttack {
            id: 10,
            entity_id: zombie,
        });
        bus.process_all(&mut state);
        assert_eq!(top(&state, 10), Action::WaitingForPath);
    }

    #[test]
    fn path_results_are_installed_or_reset() {
        let (mut bus, mut state) = setup();
        state.spawn_player(10, MobileType::Tank);
        let req = state.get_mut(10).unwrap().move_to(Vec2::new(4.5, 0.5)).unwrap();
        bus.post(Event::PathReady {
            id: 10,
            seq: req.seq,
            path: Some(vec![Vec2::new(4.5, 0.5), Vec2::new(0.5, 0.5)]),
        });
        bus.process_all(&mut state);
        assert!(matches!(top(&state, 10), Action::Move { .. }));

        let req = state.get_mut(10).unwrap().move_to(Vec2::new(5.5, 0.5)).unwrap();
        bus.post(Event::PathReady {
            id: 10,
            seq: req.seq,
            path: None,
        });
        bus.process_all(&mut state);
        assert_eq!(top(&state, 10), Action::Idle);

        // results for vanished entities are dropped
        bus.post(Event::PathReady {
            id: 999,
            seq: 1,
            path: None,
        });
        assert_eq!(bus.process_all(&mut state), 1);
    }

    #[test]
    fn late_path_results_do_not_override_newer_moves() {
        let (mut bus, mut state) = setup();
        state.spawn_player(10, MobileType::Tank);
        let first = state.get_mut(10).unwrap().move_to(Vec2::new(4.5, 0.5)).unwrap();
        let second = state.get_mut(10).unwrap().move_to(Vec2::new(0.5, 2.5)).unwrap();
        bus.post(Event::PathReady {
            id: 10,
            seq: first.seq,
            path: None,
        });
        bus.post(Event::PathReady {
            id: 10,
            seq: first.seq,
            path: Some(vec![Vec2::new(4.5, 0.5), Vec2::new(0.5, 0.5)]),
        });
        bus.process_all(&mut state);
        assert_eq!(top(&state, 10), Action::WaitingForPath);

        bus.post(Event::PathReady {
            id: 10,
            seq: second.seq,
            path: Some(vec![Vec2::new(0.5, 2.5), Vec2::new(0.5, 0.5)]),
        });
        bus.process_all(&mut state);
        assert_eq!(
            top(&state, 10),
            Action::Move {
                dst: Vec2::new(0.5, 2.5)
            }
        );
    }

    #[tokio::test]
    async fn dead_entities_are_removed() {
        let (mut bus, mut state) = setup();
        state.spawn_player(10, MobileType::Tank);
        let zombie = state.spawn_zombie().unwrap();
        bus.post(Event::ZombieDeath { id: zombie });
        bus.post(Event::PlayerDeath { id: 10 });
        bus.process_all(&mut state);
        assert!(state.get(zombie).is_none());
        assert!(state.get(10).is_none());
    }
}
