//! Connected client registry and join handshake

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::codec::encode_frame;
use super::protocol::{Join, Joined, Leave, Message, Stay};
use super::session::Session;
use crate::util::ids::IdAllocator;

/// Timeout for each per-client send of a broadcast
pub const BROADCAST_TIMEOUT: Duration = Duration::from_millis(10);
/// Timeout for the `Leave` frame sent to a departing client
pub const LEAVE_TIMEOUT: Duration = Duration::from_millis(5);
/// Delay between sending `Leave` and closing the session
pub const LEAVE_LINGER: Duration = Duration::from_millis(100);
/// Timeout for the `Stay` handshake response
pub const STAY_TIMEOUT: Duration = Duration::from_secs(1);
/// Shortest accepted player name, in characters
pub const MIN_NAME_LEN: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("client id space exhausted")]
    IdsExhausted,

    #[error("unknown client id {0}")]
    UnknownClient(u32),
}

/// Reasons a join request is refused; the text is sent to the client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("Joined already received")]
    AlreadyJoined,

    #[error("Name is too short!")]
    NameTooShort,

    #[error("Name is already taken")]
    NameTaken,

    #[error("Couldn't finish handshaking")]
    Incomplete,
}

/// Summary of a registered client, for the admin console
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: u32,
    pub name: String,
    pub joined: bool,
    pub peer: std::net::SocketAddr,
}

/// Map of live sessions by client id
pub struct ClientRegistry {
    clients: RwLock<HashMap<u32, Arc<Session>>>,
    ids: Arc<IdAllocator>,
}

impl ClientRegistry {
    pub fn new(ids: Arc<IdAllocator>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            ids,
        }
    }

    /// Allocate an id for the session and store it
    pub fn register(&self, session: &Arc<Session>) -> Result<u32, RegistryError> {
        let mut clients = self.clients.write();
        let id = self.ids.next().ok_or(RegistryError::IdsExhausted)?;
        session.set_id(id);
        clients.insert(id, Arc::clone(session));
        debug!(client_id = id, peer = %session.peer(), "Client registered");
        Ok(id)
    }

    pub fn unregister(&self, id: u32) -> Option<Arc<Session>> {
        let removed = self.clients.write().remove(&id);
        if removed.is_some() {
            debug!(client_id = id, "Client unregistered");
        }
        removed
    }

    pub fn get(&self, id: u32) -> Option<Arc<Session>> {
        self.clients.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut list: Vec<ClientInfo> = self
            .clients
            .read()
            .values()
            .map(|s| ClientInfo {
                id: s.id(),
                name: s.name(),
                joined: s.is_joined(),
                peer: s.peer(),
            })
            .collect();
        list.sort_by_key(|c| c.id);
        list
    }

    fn joined_sessions(&self) -> Vec<Arc<Session>> {
        self.clients
            .read()
            .values()
            .filter(|s| s.is_joined() && !s.is_closed())
            .cloned()
            .collect()
    }

    /// Send a message to every joined client
    ///
    /// The message is encoded once. Clients whose queue stays full past
    /// [`BROADCAST_TIMEOUT`] miss it.
    pub async fn broadcast(&self, msg: &Message) {
        let frame = match encode_frame(msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, msg_type = msg.msg_type().name(), "Failed to encode broadcast");
                return;
            }
        };

        self.broadcast_frame(frame).await;
    }

    /// Send an already encoded frame to every joined client
    pub async fn broadcast_frame(&self, frame: Bytes) {
        let targets = self.joined_sessions();
        let sends = targets.iter().map(|session| {
            let frame = frame.clone();
            async move {
                if let Err(e) = session.send_frame_async(frame, BROADCAST_TIMEOUT).await {
                    debug!(client_id = session.id(), error = %e, "Broadcast skipped client");
                }
            }
        });
        join_all(sends).await;
    }

    /// Send `Leave` to a client and close its session shortly after
    pub async fn disconnect(&self, id: u32, reason: &str) -> Result<(), RegistryError> {
        let session = self.get(id).ok_or(RegistryError::UnknownClient(id))?;
        send_leave(&session, reason).await;
        Ok(())
    }

    /// Disconnect a client for misbehaving
    pub async fn kick(&self, id: u32, reason: &str) -> Result<(), RegistryError> {
        warn!(client_id = id, reason, "Kicking client");
        self.disconnect(id, reason).await
    }

    /// Run the join handshake for a registered session
    ///
    /// On success the client has received `Stay`, is marked joined and every
    /// joined client (itself included) has been sent `Joined`.
    pub async fn join(&self, session: &Arc<Session>, join: &Join) -> Result<(), HandshakeError> {
        if session.is_joined() {
            return Err(HandshakeError::AlreadyJoined);
        }
        if join.name.chars().count() < MIN_NAME_LEN {
            return Err(HandshakeError::NameTooShort);
        }

        let id = session.id();
        let players: BTreeMap<u32, String> = {
            let clients = self.clients.read();
            if clients
                .values()
                .any(|s| s.is_joined() && s.name() == join.name)
            {
                return Err(HandshakeError::NameTaken);
            }
            clients
                .values()
                .filter(|s| s.is_joined() && s.id() != id)
                .map(|s| (s.id(), s.name()))
                .collect()
        };

        let stay = Message::Stay(Stay { id, players });
        if let Err(e) = session.send_async(&stay, STAY_TIMEOUT).await {
            debug!(client_id = id, error = %e, "Failed to send Stay");
            return Err(HandshakeError::Incomplete);
        }

        session.mark_joined(&join.name);
        info!(client_id = id, name = %join.name, "Client joined");

        self.broadcast(&Message::Joined(Joined {
            id,
            name: join.name.clone(),
            r#type: join.r#type,
        }))
        .await;
        Ok(())
    }
}

/// Send `Leave{id, reason}` then close after [`LEAVE_LINGER`]
pub async fn send_leave(session: &Arc<Session>, reason: &str) {
    let leave = Message::Leave(Leave {
        id: session.id(),
        reason: reason.to_string(),
    });
    if let Err(e) = session.send_async(&leave, LEAVE_TIMEOUT).await {
        debug!(client_id = session.id(), error = %e, "Failed to send Leave");
    }
    session.close_after(LEAVE_LINGER);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::session::{SessionHandler, SessionQueues};
    use futures::future::BoxFuture;

    struct NoopHandler;

    impl SessionHandler for NoopHandler {
        fn on_connect(&self, _session: &Arc<Session>) -> bool {
            true
        }
        fn on_incoming(&self, _session: Arc<Session>, _msg: Message) -> BoxFuture<'static, bool> {
            Box::pin(async { true })
        }
        fn on_close(&self, _session: &Session) {}
    }

    fn new_session() -> (Arc<Session>, SessionQueues) {
        Session::new("127.0.0.1:9".parse().unwrap(), Arc::new(NoopHandler))
    }

    fn registry() -> ClientRegistry {
        ClientRegistry::new(Arc::new(IdAllocator::new()))
    }

    fn join(name: &str) -> Join {
        Join {
            name: name.to_string(),
            r#type: 0,
        }
    }

    #[test]
    fn register_assigns_increasing_ids() {
        let registry = registry();
        let (a, _qa) = new_session();
        let (b, _qb) = new_session();
        assert_eq!(registry.register(&a).unwrap(), 1);
        assert_eq!(registry.register(&b).unwrap(), 2);
        assert_eq!(a.id(), 1);
        assert_eq!(registry.len(), 2);

        registry.unregister(1);
        assert!(registry.get(1).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn join_rejects_short_names() {
        let registry = registry();
        let (session, _queues) = new_session();
        registry.register(&session).unwrap();
        let err = registry.join(&session, &join("al")).await.unwrap_err();
        assert_eq!(err, HandshakeError::NameTooShort);
        assert_eq!(err.to_string(), "Name is too short!");
        assert!(!session.is_joined());
    }

    #[tokio::test]
    async fn join_rejects_taken_names_and_double_joins() {
        let registry = registry();
        let (a, _qa) = new_session();
        let (b, _qb) = new_session();
        registry.register(&a).unwrap();
        registry.register(&b).unwrap();

        tokio_test::assert_ok!(registry.join(&a, &join("alice")).await);
        assert_eq!(
            registry.join(&b, &join("alice")).await,
            Err(HandshakeError::NameTaken)
        );
        assert_eq!(
            registry.join(&a, &join("alice2")).await,
            Err(HandshakeError::AlreadyJoined)
        );
    }

    #[tokio::test]
    async fn stay_lists_other_joined_players() {
        let registry = registry();
        let (a, _qa) = new_session();
        let (b, mut qb) = new_session();
        registry.register(&a).unwrap();
        registry.register(&b).unwrap();
        registry.join(&a, &join("alice")).await.unwrap();
        registry.join(&b, &join("bobby")).await.unwrap();

        let codec = crate::net::codec::MessageRegistry::standard();
        let frame = qb.out_rx_mut().recv().await.unwrap();
        let mut reader = &frame[..];
        match codec.read_message(&mut reader).await.unwrap() {
            Message::Stay(stay) => {
                assert_eq!(stay.id, 2);
                assert_eq!(stay.players.len(), 1);
                assert_eq!(stay.players.get(&1).map(String::as_str), Some("alice"));
            }
            other => panic!("expected Stay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_only_reaches_joined_clients() {
        let registry = registry();
        let (a, mut qa) = new_session();
        let (b, mut qb) = new_session();
        registry.register(&a).unwrap();
        registry.register(&b).unwrap();
        registry.join(&a, &join("alice")).await.unwrap();
        // drain Stay and Joined
        qa.out_rx_mut().recv().await.unwrap();
        qa.out_rx_mut().recv().await.unwrap();

        registry
            .broadcast(&Message::Leave(Leave {
                id: 9,
                reason: "test".into(),
            }))
            .await;
        assert!(qa.out_rx_mut().try_recv().is_ok());
        assert!(qb.out_rx_mut().try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_unknown_client_fails() {
        let registry = registry();
        let res = registry.disconnect(77, "bye").await;
        assert!(matches!(res, Err(RegistryError::UnknownClient(77))));
    }

    #[tokio::test]
    async fn disconnect_sends_leave_then_closes() {
        let registry = registry();
        let (a, mut qa) = new_session();
        registry.register(&a).unwrap();
        registry.disconnect(1, "bye").await.unwrap();
        assert!(qa.out_rx_mut().try_recv().is_ok());
        assert!(!a.is_closed());
        tokio::time::sleep(LEAVE_LINGER * 2).await;
        assert!(a.is_closed());
    }
}
