//! Game events and the loop-confined event bus
//!
//! Producers on any task post through a cloneable [`EventSender`]. The bus
//! itself lives on the game loop, which drains it once per logic tick and
//! hands each event to the subscribers of its kind.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::math::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventKind {
    PlayerJoin = 0,
    PlayerLeave = 1,
    PlayerMove = 2,
    PlayerBuild = 3,
    PlayerRepair = 4,
    PlayerAttack = 5,
    PlayerOperate = 6,
    PlayerDeath = 7,
    ZombieDeath = 8,
    BuildingDestroy = 9,
    PathReady = 10,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PlayerJoin { id: u32, entity_type: u8 },
    PlayerLeave { id: u32 },
    PlayerMove { id: u32, x: f32, y: f32 },
    PlayerBuild { id: u32, building_type: u8, x: f32, y: f32 },
    PlayerRepair { id: u32, building_id: u32 },
    PlayerAttack { id: u32, entity_id: u32 },
    PlayerOperate { id: u32, entity_id: u32 },
    PlayerDeath { id: u32 },
    ZombieDeath { id: u32 },
    BuildingDestroy { id: u32 },
    /// Result of path request `seq`, `None` when no path exists
    PathReady {
        id: u32,
        seq: u32,
        path: Option<Path>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::PlayerJoin { .. } => EventKind::PlayerJoin,
            Event::PlayerLeave { .. } => EventKind::PlayerLeave,
            Event::PlayerMove { .. } => EventKind::PlayerMove,
            Event::PlayerBuild { .. } => EventKind::PlayerBuild,
            Event::PlayerRepair { .. } => EventKind::PlayerRepair,
            Event::PlayerAttack { .. } => EventKind::PlayerAttack,
            Event::PlayerOperate { .. } => EventKind::PlayerOperate,
            Event::PlayerDeath { .. } => EventKind::PlayerDeath,
            Event::ZombieDeath { .. } => EventKind::ZombieDeath,
            Event::BuildingDestroy { .. } => EventKind::BuildingDestroy,
            Event::PathReady { .. } => EventKind::PathReady,
        }
    }
}

/// Posting side of the bus, usable from any task
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Enqueue an event; dropped silently once the loop is gone
    pub fn post(&self, event: Event) {
        trace!(kind = ?event.kind(), "Event posted");
        if self.tx.send(event).is_err() {
            debug!("Event posted after the game loop stopped");
        }
    }
}

pub type Subscriber<C> = Box<dyn FnMut(&mut C, &Event) + Send>;

/// FIFO event queue with per-kind subscribers
pub struct EventBus<C> {
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    subscribers: HashMap<EventKind, Vec<Subscriber<C>>>,
}

impl<C> EventBus<C> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            subscribers: HashMap::new(),
        }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    pub fn post(&self, event: Event) {
        // the bus holds a receiver, so this cannot fail
        let _ = self.tx.send(event);
    }

    /// Add a subscriber; subscribers of a kind run in registration order
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&mut C, &Event) + Send + 'static,
    {
        self.subscribers
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Dispatch queued events until the queue is empty
    ///
    /// Events posted by subscribers during the drain are dispatched in the
    /// same call. Returns the number of events processed.
    pub fn process_all(&mut self, ctx: &mut C) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.rx.try_recv() {
            processed += 1;
            if let Some(handlers) = self.subscribers.get_mut(&event.kind()) {
                for handler in handlers.iter_mut() {
                    handler(ctx, &event);
                }
            } else {
                trace!(kind = ?event.kind(), "Event without subscriber");
            }
        }
        processed
    }
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        seen: Vec<String>,
        sender: Option<EventSender>,
    }

    #[test]
    fn events_are_dispatched_in_fifo_order() {
        let mut bus: EventBus<Log> = EventBus::new();
        bus.subscribe(EventKind::PlayerJoin, |log, ev| {
            if let Event::PlayerJoin { id, .. } = ev {
                log.seen.push(format!("join {id}"));
            }
        });
        bus.subscribe(EventKind::PlayerLeave, |log, ev| {
            if let Event::PlayerLeave { id } = ev {
                log.seen.push(format!("leave {id}"));
            }
        });

        let sender = bus.sender();
        sender.post(Event::PlayerJoin { id: 1, entity_type: 0 });
        sender.post(Event::PlayerLeave { id: 1 });
        sender.post(Event::PlayerJoin { id: 2, entity_type: 0 });

        let mut log = Log::default();
        assert_eq!(bus.process_all(&mut log), 3);
        assert_eq!(log.seen, vec!["join 1", "leave 1", "join 2"]);
        assert_eq!(bus.process_all(&mut log), 0);
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let mut bus: EventBus<Log> = EventBus::new();
        bus.subscribe(EventKind::ZombieDeath, |log, _| log.seen.push("first".into()));
        bus.subscribe(EventKind::ZombieDeath, |log, _| log.seen.push("second".into()));
        bus.post(Event::ZombieDeath { id: 3 });

        let mut log = Log::default();
        bus.process_all(&mut log);
        assert_eq!(log.seen, vec!["first", "second"]);
    }

    #[test]
    fn events_posted_while_draining_are_processed() {
        let mut bus: EventBus<Log> = EventBus::new();
        bus.subscribe(EventKind::PlayerDeath, |log, ev| {
            if let (Event::PlayerDeath { id }, Some(sender)) = (ev, &log.sender) {
                sender.post(Event::PlayerLeave { id: *id });
            }
            log.seen.push("death".into());
        });
        bus.subscribe(EventKind::PlayerLeave, |log, _| log.seen.push("leave".into()));

        let mut log = Log {
            sender: Some(bus.sender()),
            ..Log::default()
        };
        bus.post(Event::PlayerDeath { id: 4 });
        assert_eq!(bus.process_all(&mut log), 2);
        assert_eq!(log.seen, vec!["death", "leave"]);
    }

    #[test]
    fn kinds_match_variants() {
        let ready = Event::PathReady {
            id: 1,
            seq: 1,
            path: None,
        };
        assert_eq!(ready.kind(), EventKind::PathReady);
        assert_eq!(
            Event::PlayerBuild {
                id: 1,
                building_type: 0,
                x: 0.0,
                y: 0.0
            }
            .kind() as u16,
            3
        );
    }
}
