//! Surviveler game server
//!
//! Authoritative server for a cooperative survival game. Clients connect
//! over TCP and speak a framed MessagePack protocol; a single game loop owns
//! the world and broadcasts periodic snapshots.

pub mod admin;
pub mod config;
pub mod game;
pub mod net;
pub mod util;

use anyhow::{anyhow, Context};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::admin::AdminHandle;
use crate::config::Config;
use crate::game::ai::NightSpawner;
use crate::game::data::GameData;
use crate::game::events::EventBus;
use crate::game::pathfinder::Pathfinder;
use crate::game::planner::MovementPlanner;
use crate::game::{GameLoop, GameState};
use crate::net::{Acceptor, ClientRegistry, ProtocolHandler};
use crate::util::ids::IdAllocator;
use crate::util::shutdown::{Shutdown, TaskGuard};

/// Capacity of the queue carrying client commands to the game loop
pub const COMMAND_QUEUE_CAPACITY: usize = 100;
/// Longest wait for tracked tasks once the exit signal is raised
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the server on already bound listeners until `shutdown_signal` fires
pub async fn run<F>(
    config: Config,
    data: GameData,
    listener: TcpListener,
    admin_listener: Option<TcpListener>,
    shutdown_signal: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let ids = Arc::new(IdAllocator::new());
    let clients = Arc::new(ClientRegistry::new(Arc::clone(&ids)));
    let bus: EventBus<GameState> = EventBus::new();
    let events = bus.sender();

    let state = GameState::new(
        Arc::new(data),
        config.game.clone(),
        ids,
        Arc::clone(&clients),
        events.clone(),
        config.seed,
    )
    .context("Failed to build the game world")?;

    let mut shutdown = Shutdown::new();

    let pathfinder = Pathfinder::new(state.world.nav_grid(), state.world.grid_scale());
    let (planner, planner_handle) = MovementPlanner::new(pathfinder, events.clone());
    tokio::spawn(planner.run(shutdown.signal(), guard(&shutdown)?));

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (admin, admin_rx) = AdminHandle::channel();
    let game = GameLoop::new(
        state,
        bus,
        cmd_rx,
        admin_rx,
        planner_handle,
        Box::new(NightSpawner::new()),
    );
    let mut game_task = tokio::spawn(game.run(shutdown.signal(), guard(&shutdown)?));

    let handler = Arc::new(ProtocolHandler::new(clients, cmd_tx, events));
    Acceptor::from_listener(listener, handler).start(&shutdown);

    match admin_listener {
        Some(admin_listener) => admin::serve(admin_listener, admin, &shutdown).await,
        None => info!("Admin console disabled"),
    }

    tokio::select! {
        _ = shutdown_signal => info!("Shutdown requested"),
        res = &mut game_task => match res {
            Ok(_) => warn!("Game loop returned on its own"),
            Err(e) => error!(error = %e, "Game loop task failed"),
        },
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown.stop())
        .await
        .is_err()
    {
        warn!(
            timeout_s = SHUTDOWN_TIMEOUT.as_secs(),
            "Some tasks did not stop in time"
        );
    }
    info!("Server shutdown complete");
    Ok(())
}

fn guard(shutdown: &Shutdown) -> anyhow::Result<TaskGuard> {
    shutdown
        .guard()
        .ok_or_else(|| anyhow!("shutdown already in progress"))
}
