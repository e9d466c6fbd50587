//! Movement planner
//!
//! Path searches run on their own task so the tick loop never waits on A*.
//! Results come back through the event bus as `PathReady`.
//!
//! Searches for one entity are at least [`PATHFINDER_MIN_PERIOD`] apart.
//! Requests arriving in between wait, and a newer request for the same
//! entity replaces the waiting one.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use super::events::{Event, EventSender};
use super::math::Path;
use super::movement::PathRequest;
use super::pathfinder::Pathfinder;
use crate::util::shutdown::{ExitSignal, TaskGuard};
use crate::util::time::Timer;

/// Shortest delay between two searches for the same entity
pub const PATHFINDER_MIN_PERIOD: Duration = Duration::from_millis(400);

/// Sending side held by the tick loop
#[derive(Clone, Debug)]
pub struct PlannerHandle {
    tx: mpsc::UnboundedSender<PathRequest>,
}

impl PlannerHandle {
    /// Queue a request; fails back to `Idle` right away if the planner is gone
    pub fn plan(&self, request: PathRequest, events: &EventSender) {
        if self.tx.send(request).is_err() {
            debug!(entity_id = request.entity_id, "Movement planner stopped, request dropped");
            events.post(Event::PathReady {
                id: request.entity_id,
                seq: request.seq,
                path: None,
            });
        }
    }
}

pub struct MovementPlanner {
    pathfinder: Pathfinder,
    rx: mpsc::UnboundedReceiver<PathRequest>,
    events: EventSender,
    min_period: Duration,
    /// Latest waiting request per entity
    pending: BTreeMap<u32, PathRequest>,
    last_run: HashMap<u32, Instant>,
}

impl MovementPlanner {
    pub fn new(pathfinder: Pathfinder, events: EventSender) -> (Self, PlannerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                pathfinder,
                rx,
                events,
                min_period: PATHFINDER_MIN_PERIOD,
                pending: BTreeMap::new(),
                last_run: HashMap::new(),
            },
            PlannerHandle { tx },
        )
    }

    pub fn with_min_period(mut self, min_period: Duration) -> Self {
        self.min_period = min_period;
        self
    }

    /// Serve requests until the exit signal or until every handle is dropped
    pub async fn run(mut self, mut exit: ExitSignal, _guard: TaskGuard) {
        info!(min_period_ms = self.min_period.as_millis() as u64, "Movement planner started");
        let mut closed = false;
        loop {
            if exit.is_set() {
                break;
            }
            while let Ok(request) = self.rx.try_recv() {
                self.enqueue(request);
            }

            let now = Instant::now();
            let min_period = self.min_period;
            self.last_run
                .retain(|_, last| now.duration_since(*last) < min_period);
            let next = self.next_due(now);

            if let Some((id, due)) = next {
                if due <= now {
                    if let Some(request) = self.pending.remove(&id) {
                        self.last_run.insert(id, now);
                        let path = self.search(request).await;
                        self.events.post(Event::PathReady {
                            id: request.entity_id,
                            seq: request.seq,
                            path,
                        });
                    }
                    continue;
                }
            }
            if closed && self.pending.is_empty() {
                break;
            }

            tokio::select! {
                _ = exit.recv() => break,
                req = self.rx.recv(), if !closed => match req {
                    Some(req) => self.enqueue(req),
                    None => closed = true,
                },
                _ = sleep_until(next.map_or(now, |(_, due)| due)), if next.is_some() => {}
            }
        }
        info!(waiting = self.pending.len(), "Movement planner stopped");
    }

    fn enqueue(&mut self, request: PathRequest) {
        if let Some(old) = self.pending.insert(request.entity_id, request) {
            trace!(
                entity_id = request.entity_id,
                old_seq = old.seq,
                seq = request.seq,
                "Path request superseded"
            );
        }
    }

    /// Waiting entity that may be searched first, with the instant it may be
    fn next_due(&self, now: Instant) -> Option<(u32, Instant)> {
        self.pending
            .keys()
            .map(|id| {
                let due = self
                    .last_run
                    .get(id)
                    .map_or(now, |last| *last + self.min_period);
                (*id, due)
            })
            .min_by_key(|(_, due)| *due)
    }

    async fn search(&self, request: PathRequest) -> Option<Path> {
        let pathfinder = self.pathfinder.clone();
        let timer = Timer::new();
        let found =
            tokio::task::spawn_blocking(move || pathfinder.find_path(request.org, request.dst))
                .await;
        match found {
            Ok(Some((path, cost))) => {
                trace!(
                    entity_id = request.entity_id,
                    seq = request.seq,
                    waypoints = path.len(),
                    cost,
                    elapsed_ms = timer.elapsed_ms(),
                    "Path found"
                );
                Some(path)
            }
            Ok(None) => {
                debug!(
                    entity_id = request.entity_id,
                    org = ?request.org,
                    dst = ?request.dst,
                    "No path found"
                );
                None
            }
            Err(e) => {
                warn!(entity_id = request.entity_id, error = %e, "Path search failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::{EventBus, EventKind};
    use crate::game::math::Vec2;
    use crate::game::world::{Bitmap, World};
    use crate::util::shutdown::Shutdown;

    type Results = Vec<(u32, u32, bool)>;

    fn start(min_period: Duration) -> (Shutdown, PlannerHandle, EventBus<Results>) {
        let world = World::new(&Bitmap::from_rows(&["....", "....", "...."]), 1.0).unwrap();
        let mut bus: EventBus<Results> = EventBus::new();
        bus.subscribe(EventKind::PathReady, |results, ev| {
            if let Event::PathReady { id, seq, path } = ev {
                results.push((*id, *seq, path.is_some()));
            }
        });

        let shutdown = Shutdown::new();
        let (planner, handle) = MovementPlanner::new(
            Pathfinder::new(world.nav_grid(), world.grid_scale()),
            bus.sender(),
        );
        let planner = planner.with_min_period(min_period);
        tokio::spawn(planner.run(shutdown.signal(), shutdown.guard().unwrap()));
        (shutdown, handle, bus)
    }

    async fn collect(bus: &mut EventBus<Results>, results: &mut Results, count: usize) {
        for _ in 0..100 {
            bus.process_all(results);
            if results.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn request(id: u32, seq: u32, dst: Vec2) -> PathRequest {
        PathRequest::new(id, seq, Vec2::new(0.5, 0.5), dst)
    }

    #[tokio::test]
    async fn results_come_back_as_events() {
        let (mut shutdown, handle, mut bus) = start(PATHFINDER_MIN_PERIOD);
        let events = bus.sender();
        handle.plan(request(1, 1, Vec2::new(3.5, 2.5)), &events);
        handle.plan(request(2, 1, Vec2::new(30.0, 2.5)), &events);

        let mut results = Vec::new();
        collect(&mut bus, &mut results, 2).await;
        results.sort_unstable();
        assert_eq!(results, vec![(1, 1, true), (2, 1, false)]);

        tokio::time::timeout(Duration::from_secs(1), shutdown.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bursts_for_one_entity_collapse_to_the_latest() {
        let period = Duration::from_millis(150);
        let (mut shutdown, handle, mut bus) = start(period);
        let events = bus.sender();
        let started = std::time::Instant::now();

        handle.plan(request(1, 1, Vec2::new(3.5, 2.5)), &events);
        let mut results = Vec::new();
        collect(&mut bus, &mut results, 1).await;
        assert_eq!(results, vec![(1, 1, true)]);

        for seq in 2..=5 {
            handle.plan(request(1, seq, Vec2::new(2.5, 1.5)), &events);
        }
        // other entities are not held back
        handle.plan(request(2, 1, Vec2::new(1.5, 2.5)), &events);
        collect(&mut bus, &mut results, 2).await;
        assert_eq!(results[1], (2, 1, true));

        collect(&mut bus, &mut results, 3).await;
        assert_eq!(results[2], (1, 5, true));
        assert!(started.elapsed() >= period);

        tokio::time::sleep(period * 2).await;
        bus.process_all(&mut results);
        assert_eq!(results.len(), 3);

        tokio::time::timeout(Duration::from_secs(1), shutdown.stop())
            .await
            .unwrap();
    }
}
