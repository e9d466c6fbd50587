//! Game protocol session handler
//!
//! Bridges sessions to the game: runs the join handshake, answers pings,
//! and forwards game commands of joined clients to the tick loop.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{Leave, Message, Pong};
use super::registry::{send_leave, ClientRegistry};
use super::session::{Session, SessionHandler};
use crate::game::events::{Event, EventSender};
use crate::game::ClientCommand;
use crate::util::time::unix_millis;

pub const PONG_TIMEOUT: Duration = Duration::from_secs(1);
pub const REASON_DISCONNECTION: &str = "client disconnection";

pub struct ProtocolHandler {
    clients: Arc<ClientRegistry>,
    commands: mpsc::Sender<ClientCommand>,
    events: EventSender,
}

impl ProtocolHandler {
    pub fn new(
        clients: Arc<ClientRegistry>,
        commands: mpsc::Sender<ClientCommand>,
        events: EventSender,
    ) -> Self {
        Self {
            clients,
            commands,
            events,
        }
    }
}

impl SessionHandler for ProtocolHandler {
    fn on_connect(&self, session: &Arc<Session>) -> bool {
        match self.clients.register(session) {
            Ok(id) => {
                info!(client_id = id, peer = %session.peer(), "Client connected");
                true
            }
            Err(e) => {
                warn!(peer = %session.peer(), error = %e, "Cannot register client");
                false
            }
        }
    }

    fn on_incoming(&self, session: Arc<Session>, msg: Message) -> BoxFuture<'static, bool> {
        let clients = Arc::clone(&self.clients);
        let commands = self.commands.clone();
        let events = self.events.clone();

        Box::pin(async move {
            match msg {
                Message::Ping(ping) => {
                    let pong = Message::Pong(Pong {
                        id: ping.id,
                        tstamp: unix_millis(),
                    });
                    if let Err(e) = session.send_async(&pong, PONG_TIMEOUT).await {
                        debug!(client_id = session.id(), error = %e, "Pong not sent");
                    }
                    true
                }
                Message::Join(join) => {
                    match clients.join(&session, &join).await {
                        Ok(()) => {
                            let id = session.id();
                            events.post(Event::PlayerJoin {
                                id,
                                entity_type: join.r#type,
                            });
                            // closed while the join was broadcast: on_close may
                            // have posted its leave ahead of our join
                            if clients.get(id).is_none() {
                                debug!(client_id = id, "Client gone during join");
                                events.post(Event::PlayerLeave { id });
                            }
                        }
                        Err(e) => {
                            info!(client_id = session.id(), reason = %e, "Join refused");
                            send_leave(&session, &e.to_string()).await;
                        }
                    }
                    true
                }
                msg if msg.is_command() => {
                    if !session.is_joined() {
                        debug!(client_id = session.id(), msg_type = msg.msg_type().name(), "Command before join ignored");
                        return true;
                    }
                    if !session.allow_command() {
                        warn!(client_id = session.id(), msg_type = msg.msg_type().name(), "Command rate exceeded, dropped");
                        return true;
                    }
                    let command = ClientCommand {
                        client_id: session.id(),
                        msg,
                    };
                    // the loop is gone only on shutdown
                    commands.send(command).await.is_ok()
                }
                other => {
                    debug!(client_id = session.id(), msg_type = other.msg_type().name(), "Unexpected message ignored");
                    true
                }
            }
        })
    }

    fn on_close(&self, session: &Session) {
        let id = session.id();
        self.clients.unregister(id);
        if !session.is_joined() {
            return;
        }
        info!(client_id = id, "Client left");
        self.events.post(Event::PlayerLeave { id });

        let clients = Arc::clone(&self.clients);
        let leave = Message::Leave(Leave {
            id,
            reason: REASON_DISCONNECTION.to_string(),
        });
        tokio::spawn(async move {
            clients.broadcast(&leave).await;
        });
    }
}
