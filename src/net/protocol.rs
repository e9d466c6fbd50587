//! Wire protocol message definitions
//! These are the payload types carried inside binary frames

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message type codes, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum MsgType {
    Ping = 0,
    Pong = 1,
    Join = 2,
    Joined = 3,
    Stay = 4,
    Leave = 5,
    GameState = 6,
    Move = 7,
    Build = 8,
    Repair = 9,
    Attack = 10,
    Operate = 11,
}

impl MsgType {
    pub const ALL: [MsgType; 12] = [
        MsgType::Ping,
        MsgType::Pong,
        MsgType::Join,
        MsgType::Joined,
        MsgType::Stay,
        MsgType::Leave,
        MsgType::GameState,
        MsgType::Move,
        MsgType::Build,
        MsgType::Repair,
        MsgType::Attack,
        MsgType::Operate,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            MsgType::Ping => "Ping",
            MsgType::Pong => "Pong",
            MsgType::Join => "Join",
            MsgType::Joined => "Joined",
            MsgType::Stay => "Stay",
            MsgType::Leave => "Leave",
            MsgType::GameState => "GameState",
            MsgType::Move => "Move",
            MsgType::Build => "Build",
            MsgType::Repair => "Repair",
            MsgType::Attack => "Attack",
            MsgType::Operate => "Operate",
        }
    }
}

/// Latency probe, echoed back as a [`Pong`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ping {
    pub id: u32,
    pub tstamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Pong {
    pub id: u32,
    /// Server wall clock in milliseconds
    pub tstamp: i64,
}

/// Handshake request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Join {
    pub name: String,
    /// Requested mobile entity type
    #[serde(default)]
    pub r#type: u8,
}

/// Broadcast once a client completed its handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Joined {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub r#type: u8,
}

/// Handshake acceptance, lists the other players already in game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stay {
    pub id: u32,
    pub players: BTreeMap<u32, String>,
}

/// Sent to a client being disconnected, and broadcast when a client leaves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Leave {
    pub id: u32,
    pub reason: String,
}

/// Periodic world snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameState {
    pub tstamp: i64,
    /// In-game minute of the day, 0..1440
    pub time: i16,
    pub entities: BTreeMap<u32, MobileEntityState>,
    pub buildings: BTreeMap<u32, BuildingState>,
    pub objects: BTreeMap<u32, ObjectState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MobileEntityState {
    pub r#type: u8,
    pub xpos: f32,
    pub ypos: f32,
    pub cur_hit_points: u16,
    pub action_type: u8,
    pub action: ActionData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BuildingState {
    pub r#type: u8,
    pub xpos: f32,
    pub ypos: f32,
    pub cur_hit_points: u16,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectState {
    pub r#type: u8,
    pub xpos: f32,
    pub ypos: f32,
    /// Operating entity, or `INVALID_ID`
    pub operated_by: u32,
}

/// Payload describing the current action of a mobile entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionData {
    #[serde(rename_all = "PascalCase")]
    Move {
        speed: f32,
        /// Next waypoints, nearest first
        path: Vec<[f32; 2]>,
    },
    #[serde(rename_all = "PascalCase")]
    Target { id: u32 },
    Idle {},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Move {
    pub xpos: f32,
    pub ypos: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Build {
    pub r#type: u8,
    pub xpos: f32,
    pub ypos: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Repair {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attack {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Operate {
    pub id: u32,
}

/// Every message of the protocol, one variant per type code
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping(Ping),
    Pong(Pong),
    Join(Join),
    Joined(Joined),
    Stay(Stay),
    Leave(Leave),
    GameState(GameState),
    Move(Move),
    Build(Build),
    Repair(Repair),
    Attack(Attack),
    Operate(Operate),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Ping(_) => MsgType::Ping,
            Message::Pong(_) => MsgType::Pong,
            Message::Join(_) => MsgType::Join,
            Message::Joined(_) => MsgType::Joined,
            Message::Stay(_) => MsgType::Stay,
            Message::Leave(_) => MsgType::Leave,
            Message::GameState(_) => MsgType::GameState,
            Message::Move(_) => MsgType::Move,
            Message::Build(_) => MsgType::Build,
            Message::Repair(_) => MsgType::Repair,
            Message::Attack(_) => MsgType::Attack,
            Message::Operate(_) => MsgType::Operate,
        }
    }

    /// Whether the message is a game command forwarded to the tick loop
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Message::Move(_)
                | Message::Build(_)
                | Message::Repair(_)
                | Message::Attack(_)
                | Message::Operate(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_are_stable() {
        for (i, t) in MsgType::ALL.iter().enumerate() {
            assert_eq!(t.code() as usize, i);
            assert_eq!(MsgType::from_code(i as u16), Some(*t));
        }
        assert_eq!(MsgType::from_code(12), None);
        assert_eq!(MsgType::GameState.code(), 6);
    }

    #[test]
    fn fields_are_encoded_by_name() {
        let bytes = rmp_serde::to_vec_named(&Ping { id: 42, tstamp: 1000 }).unwrap();
        let value: BTreeMap<String, i64> = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(value.get("Id"), Some(&42));
        assert_eq!(value.get("Tstamp"), Some(&1000));
    }

    #[test]
    fn action_data_variants_decode_back() {
        for action in [
            ActionData::Idle {},
            ActionData::Target { id: 7 },
            ActionData::Move {
                speed: 2.0,
                path: vec![[1.5, 0.5]],
            },
        ] {
            let bytes = rmp_serde::to_vec_named(&action).unwrap();
            let decoded: ActionData = rmp_serde::from_slice(&bytes).unwrap();
            assert_eq!(decoded, action);
        }
    }

    #[test]
    fn only_gameplay_messages_are_commands() {
        assert!(Message::Move(Move { xpos: 1.0, ypos: 2.0 }).is_command());
        assert!(Message::Operate(Operate { id: 3 }).is_command());
        assert!(!Message::Ping(Ping { id: 1, tstamp: 0 }).is_command());
        assert!(!Message::Join(Join {
            name: "alice".into(),
            r#type: 0
        })
        .is_command());
    }
}
