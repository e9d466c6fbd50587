//! The game loop
//!
//! A single task owns the [`GameState`] and is the only writer of it. It
//! multiplexes client commands, admin requests and four timers: snapshot
//! send, logic update, in-game clock and the exit signal. Timers are polled
//! before the queues, so commands wait at most one tick and never stall
//! the simulation.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::ai::AiDirector;
use super::events::EventBus;
use super::handlers::{self, dispatch_command, CommandHandler};
use super::planner::PlannerHandle;
use super::snapshot::{SnapshotBuilder, SnapshotStats};
use super::state::GameState;
use super::ClientCommand;
use crate::admin::AdminEnvelope;
use crate::net::codec::encode_frame;
use crate::net::protocol::{Message, MsgType};
use crate::util::shutdown::{ExitSignal, TaskGuard};
use crate::util::time::{game_minute_period, unix_millis, Timer};

/// Longest step fed to a single entity update
pub const MAX_FRAME_DT: Duration = Duration::from_millis(250);

pub struct GameLoop {
    state: GameState,
    bus: EventBus<GameState>,
    commands: HashMap<MsgType, CommandHandler>,
    msg_rx: mpsc::Receiver<ClientCommand>,
    admin_rx: mpsc::Receiver<AdminEnvelope>,
    planner: PlannerHandle,
    ai: Box<dyn AiDirector>,
    snapshots: SnapshotBuilder,
    stats: SnapshotStats,
}

impl GameLoop {
    /// `bus` must be the bus whose sender `state` posts to
    pub fn new(
        state: GameState,
        mut bus: EventBus<GameState>,
        msg_rx: mpsc::Receiver<ClientCommand>,
        admin_rx: mpsc::Receiver<AdminEnvelope>,
        planner: PlannerHandle,
        ai: Box<dyn AiDirector>,
    ) -> Self {
        handlers::register(&mut bus);
        Self {
            state,
            bus,
            commands: handlers::command_table(),
            msg_rx,
            admin_rx,
            planner,
            ai,
            snapshots: SnapshotBuilder::new(),
            stats: SnapshotStats::default(),
        }
    }

    /// Run until the exit signal, returning the final state
    pub async fn run(mut self, mut exit: ExitSignal, _guard: TaskGuard) -> GameState {
        let config = self.state.config.clone();
        let mut send_tick = ticker(config.send_tick_period);
        let mut logic_tick = ticker(config.logic_tick_period);
        let mut time_tick = ticker(game_minute_period(config.time_factor));
        let mut timer = Timer::new();

        info!(
            logic_ms = config.logic_tick_period.as_millis() as u64,
            send_ms = config.send_tick_period.as_millis() as u64,
            time_factor = config.time_factor,
            game_time = self.state.game_time,
            "Game loop started"
        );

        loop {
            tokio::select! {
                biased;

                _ = exit.recv() => break,

                _ = send_tick.tick() => self.send_snapshot().await,

                _ = logic_tick.tick() => {
                    let dt = timer.lap().min(MAX_FRAME_DT);
                    self.update(dt);
                }

                _ = time_tick.tick() => {
                    self.state.advance_game_time();
                    trace!(game_time = self.state.game_time, "Game minute");
                }

                Some(command) = self.msg_rx.recv() => self.on_command(command),

                Some((request, done)) = self.admin_rx.recv() => {
                    debug!(request = ?request, "Admin request");
                    let result = request.execute(&mut self.state);
                    if done.send(result).is_err() {
                        debug!("Admin console gone before the reply");
                    }
                }
            }
        }

        let (mobiles, buildings, objects) = self.state.count_by_kind();
        info!(
            snapshots = self.stats.total_snapshots,
            snapshot_bytes = self.stats.total_bytes,
            avg_entities = self.stats.avg_entities_per_snapshot,
            mobiles,
            buildings,
            objects,
            "Game loop stopped"
        );
        self.state
    }

    fn on_command(&mut self, command: ClientCommand) {
        let ClientCommand { client_id, msg } = command;
        if let Err(e) = dispatch_command(&self.commands, &self.state.events, client_id, &msg) {
            warn!(client_id, error = %e, "Command rejected");
        }
    }

    /// One logic step: events, AI, entities, then path requests
    fn update(&mut self, dt: Duration) {
        self.bus.process_all(&mut self.state);
        self.ai.update(dt, &mut self.state);
        self.state.update_entities(dt);
        for request in self.state.path_requests.drain(..) {
            self.planner.plan(request, &self.state.events);
        }
    }

    async fn send_snapshot(&mut self) {
        if self.state.clients.is_empty() {
            return;
        }
        let snapshot = self.snapshots.build(
            self.state.entities.values(),
            self.state.game_time,
            unix_millis(),
        );
        let frame = match encode_frame(&Message::GameState(snapshot)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode snapshot");
                return;
            }
        };
        self.stats.record(self.state.entities.len(), frame.len());
        self.state.clients.broadcast_frame(frame).await;
    }
}

fn ticker(period: Duration) -> Interval {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tick
}
