//! Admin command parsing and execution
//!
//! Commands are single lines: a verb followed by `key=value` arguments.
//! Keys may also be written `-key=value` or `-key value`.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::game::entity::BuildingType;
use crate::game::events::Event;
use crate::game::math::Vec2;
use crate::game::snapshot::SnapshotBuilder;
use crate::game::state::GameState;
use crate::net::registry::ClientRegistry;
use crate::util::time::unix_millis;

pub const HELP: &str = "\
commands:
  gamestate [short]                    dump the game state
  move id=<u32> pos=<x,y>              walk an entity to a point
  teleport id=<u32> pos=<x,y>          put an entity on a point
  build id=<u32> type=<u8> pos=<x,y>   have an engineer build
  repair id=<u32> bid=<u32>            have a player repair a building
  destroy id=<u32>                     remove an entity
  summon                               summon a zombie
  kick id=<u32> [reason=<text>]        disconnect a client
  clients                              list connected clients
  help                                 show this help
  quit                                 close the console";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AdminError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing argument: {0}")]
    MissingArg(&'static str),

    #[error("invalid {key}: {value}")]
    InvalidArg { key: &'static str, value: String },

    #[error("unknown entity id: {0}")]
    UnknownEntity(u32),

    #[error("{0}")]
    Rejected(&'static str),

    #[error("game loop is not running")]
    LoopStopped,
}

/// Requests executed on the tick loop
#[derive(Debug, Clone, PartialEq)]
pub enum AdminRequest {
    GameState { short: bool },
    Move { id: u32, pos: Vec2 },
    Teleport { id: u32, pos: Vec2 },
    Build { id: u32, building_type: u8, pos: Vec2 },
    Repair { id: u32, building_id: u32 },
    Destroy { id: u32 },
    Summon,
    Kick { id: u32, reason: String },
    Clients,
}

/// A parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Game(AdminRequest),
    Help,
    Quit,
}

/// Arguments of a command line
struct Args {
    values: HashMap<String, String>,
    flags: Vec<String>,
}

impl Args {
    fn parse<'a>(tokens: impl Iterator<Item = &'a str>) -> Self {
        let mut values = HashMap::new();
        let mut flags = Vec::new();
        let mut tokens = tokens.peekable();
        while let Some(token) = tokens.next() {
            let dashed = token.starts_with('-');
            let token = token.trim_start_matches('-');
            if let Some((key, value)) = token.split_once('=') {
                values.insert(key.to_string(), value.to_string());
            } else if dashed {
                match tokens.peek() {
                    Some(next) if !next.starts_with('-') && !next.contains('=') => {
                        values.insert(token.to_string(), next.to_string());
                        tokens.next();
                    }
                    _ => flags.push(token.to_string()),
                }
            } else {
                flags.push(token.to_string());
            }
        }
        Self { values, flags }
    }

    fn raw(&self, key: &'static str) -> Result<&str, AdminError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or(AdminError::MissingArg(key))
    }

    fn num<T: std::str::FromStr>(&self, key: &'static str) -> Result<T, AdminError> {
        let raw = self.raw(key)?;
        raw.parse().map_err(|_| AdminError::InvalidArg {
            key,
            value: raw.to_string(),
        })
    }

    fn vec2(&self, key: &'static str) -> Result<Vec2, AdminError> {
        let raw = self.raw(key)?;
        parse_vec2(raw).ok_or_else(|| AdminError::InvalidArg {
            key,
            value: raw.to_string(),
        })
    }
}

/// Parse `x,y`
fn parse_vec2(raw: &str) -> Option<Vec2> {
    let (x, y) = raw.split_once(',')?;
    let x: f32 = x.trim().parse().ok()?;
    let y: f32 = y.trim().parse().ok()?;
    (x.is_finite() && y.is_finite()).then(|| Vec2::new(x, y))
}

/// Parse a console line, `None` for a blank one
pub fn parse_line(line: &str) -> Result<Option<AdminCommand>, AdminError> {
    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Ok(None);
    };
    let args = Args::parse(tokens);

    let request = match verb {
        "help" => return Ok(Some(AdminCommand::Help)),
        "quit" | "exit" => return Ok(Some(AdminCommand::Quit)),
        "gamestate" => AdminRequest::GameState {
            short: args.flags.iter().any(|f| f == "short"),
        },
        "move" => AdminRequest::Move {
            id: args.num("id")?,
            pos: args.vec2("pos")?,
        },
        "teleport" => AdminRequest::Teleport {
            id: args.num("id")?,
            pos: args.vec2("pos")?,
        },
        "build" => AdminRequest::Build {
            id: args.num("id")?,
            building_type: args.num("type")?,
            pos: args.vec2("pos")?,
        },
        "repair" => AdminRequest::Repair {
            id: args.num("id")?,
            building_id: args.num("bid")?,
        },
        "destroy" => AdminRequest::Destroy { id: args.num("id")? },
        "summon" => AdminRequest::Summon,
        "kick" => AdminRequest::Kick {
            id: args.num("id")?,
            reason: args
                .values
                .get("reason")
                .cloned()
                .unwrap_or_else(|| "kicked by admin".to_string()),
        },
        "clients" => AdminRequest::Clients,
        other => return Err(AdminError::UnknownCommand(other.to_string())),
    };
    Ok(Some(AdminCommand::Game(request)))
}

pub const SUCCESS: &str = "success!";

impl AdminRequest {
    /// Run the request against the game state, on the tick loop
    pub fn execute(self, state: &mut GameState) -> Result<String, AdminError> {
        match self {
            AdminRequest::GameState { short } => game_state_dump(state, short),
            AdminRequest::Move { id, pos } => {
                require_player(state, id)?;
                if !state.world.point_in_bounds(pos) {
                    return Err(AdminError::Rejected("position out of bounds"));
                }
                state.events.post(Event::PlayerMove {
                    id,
                    x: pos.x,
                    y: pos.y,
                });
                Ok(SUCCESS.to_string())
            }
            AdminRequest::Teleport { id, pos } => {
                let walkable = state
                    .world
                    .tile_from_world(pos)
                    .map(|t| t.is_walkable())
                    .unwrap_or(false);
                if !walkable {
                    return Err(AdminError::Rejected("position is not walkable"));
                }
                if !state.teleport(id, pos) {
                    return Err(AdminError::UnknownEntity(id));
                }
                Ok(SUCCESS.to_string())
            }
            AdminRequest::Build {
                id,
                building_type,
                pos,
            } => {
                require_player(state, id)?;
                if BuildingType::from_u8(building_type).is_none() {
                    return Err(AdminError::InvalidArg {
                        key: "type",
                        value: building_type.to_string(),
                    });
                }
                state.events.post(Event::PlayerBuild {
                    id,
                    building_type,
                    x: pos.x,
                    y: pos.y,
                });
                Ok(SUCCESS.to_string())
            }
            AdminRequest::Repair { id, building_id } => {
                require_player(state, id)?;
                if state.get(building_id).and_then(|e| e.as_building()).is_none() {
                    return Err(AdminError::Rejected("repair target is not a building"));
                }
                state.events.post(Event::PlayerRepair { id, building_id });
                Ok(SUCCESS.to_string())
            }
            AdminRequest::Destroy { id } => {
                let entity = state.get(id).ok_or(AdminError::UnknownEntity(id))?;
                match entity.death_event() {
                    Some(event) => state.events.post(event),
                    None => {
                        state.remove_entity(id);
                    }
                }
                Ok(SUCCESS.to_string())
            }
            AdminRequest::Summon => match state.spawn_zombie() {
                Some(id) => Ok(format!("summoned zombie {id}")),
                None => Err(AdminError::Rejected("no zombie could be summoned")),
            },
            AdminRequest::Kick { id, reason } => {
                if state.clients.get(id).is_none() {
                    return Err(AdminError::UnknownEntity(id));
                }
                tokio::spawn(kick_client(Arc::clone(&state.clients), id, reason));
                Ok(SUCCESS.to_string())
            }
            AdminRequest::Clients => {
                let clients = state.clients.clients();
                if clients.is_empty() {
                    return Ok("no clients".to_string());
                }
                let lines: Vec<String> = clients
                    .iter()
                    .map(|c| {
                        format!(
                            "{:>6}  {:<16}  {:<6}  {}",
                            c.id,
                            c.name,
                            if c.joined { "joined" } else { "-" },
                            c.peer
                        )
                    })
                    .collect();
                Ok(lines.join("\n"))
            }
        }
    }
}

fn require_player(state: &GameState, id: u32) -> Result<(), AdminError> {
    match state.get(id) {
        Some(e) if e.is_player() => Ok(()),
        Some(_) => Err(AdminError::Rejected("entity is not a player")),
        None => Err(AdminError::UnknownEntity(id)),
    }
}

fn game_state_dump(state: &GameState, short: bool) -> Result<String, AdminError> {
    if short {
        let (mobiles, buildings, objects) = state.count_by_kind();
        return Ok(format!(
            "time: {} ({})\nclients: {}\nmobiles: {mobiles}\nbuildings: {buildings}\nobjects: {objects}",
            state.game_time,
            if state.is_night() { "night" } else { "day" },
            state.clients.len(),
        ));
    }
    let snapshot =
        SnapshotBuilder::new().build(state.entities.values(), state.game_time, unix_millis());
    serde_json::to_string_pretty(&snapshot)
        .map_err(|_| AdminError::Rejected("game state could not be serialized"))
}

/// The client may leave between the request and the kick
async fn kick_client(clients: Arc<ClientRegistry>, id: u32, reason: String) {
    if let Err(e) = clients.kick(id, &reason).await {
        warn!(client_id = id, error = %e, "Admin kick failed");
    }
}
