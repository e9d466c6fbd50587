//! Game simulation modules

pub mod action;
pub mod ai;
pub mod data;
pub mod entity;
pub mod events;
pub mod handlers;
pub mod math;
pub mod movement;
pub mod pathfinder;
pub mod planner;
pub mod snapshot;
pub mod state;
pub mod tick;
pub mod world;

pub use state::GameState;
pub use tick::GameLoop;

use crate::net::protocol::Message;

/// Game command received from a joined client
#[derive(Debug, Clone)]
pub struct ClientCommand {
    pub client_id: u32,
    pub msg: Message,
}
