//! Client session: one TCP connection and its reader, writer and handler tasks

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::codec::{encode_frame, CodecError, MessageRegistry};
use super::protocol::Message;
use crate::util::ids::INVALID_ID;
use crate::util::rate_limit::CommandRateLimiter;
use crate::util::shutdown::{ExitSignal, TaskGuard};

/// Capacity of the outbound frame queue
pub const OUT_QUEUE_CAPACITY: usize = 100;
/// Capacity of the inbound message queue
pub const IN_QUEUE_CAPACITY: usize = 100;

/// Outcome of a failed send
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue is full")]
    Blocked,

    #[error("session is closed")]
    Closed,

    #[error(transparent)]
    Encode(#[from] CodecError),
}

/// Callbacks driving a session
///
/// `on_incoming` runs on the session's handler task; returning `false`
/// closes the session.
pub trait SessionHandler: Send + Sync + 'static {
    /// Called once before the tasks start; `false` rejects the connection
    fn on_connect(&self, session: &Arc<Session>) -> bool;

    fn on_incoming(&self, session: Arc<Session>, msg: Message) -> BoxFuture<'static, bool>;

    /// Called exactly once, by whoever closes the session first
    fn on_close(&self, session: &Session);
}

/// Per-client state attached to a session
#[derive(Debug, Default)]
struct ClientData {
    joined: AtomicBool,
    name: Mutex<String>,
}

/// A live client connection
pub struct Session {
    id: AtomicU32,
    peer: SocketAddr,
    out_tx: mpsc::Sender<Bytes>,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    client: ClientData,
    limiter: CommandRateLimiter,
    handler: Arc<dyn SessionHandler>,
}

/// Receiving ends owned by the session tasks
pub struct SessionQueues {
    out_rx: mpsc::Receiver<Bytes>,
}

impl SessionQueues {
    #[cfg(test)]
    pub(crate) fn out_rx_mut(&mut self) -> &mut mpsc::Receiver<Bytes> {
        &mut self.out_rx
    }
}

impl Session {
    pub fn new(peer: SocketAddr, handler: Arc<dyn SessionHandler>) -> (Arc<Self>, SessionQueues) {
        let (out_tx, out_rx) = mpsc::channel(OUT_QUEUE_CAPACITY);
        let (close_tx, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: AtomicU32::new(INVALID_ID),
            peer,
            out_tx,
            closed: AtomicBool::new(false),
            close_tx,
            client: ClientData::default(),
            limiter: CommandRateLimiter::new(),
            handler,
        });
        (session, SessionQueues { out_rx })
    }

    /// Client id, `INVALID_ID` until registered
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: u32) {
        self.id.store(id, Ordering::Release);
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_joined(&self) -> bool {
        self.client.joined.load(Ordering::Acquire)
    }

    pub fn name(&self) -> String {
        self.client.name.lock().clone()
    }

    pub(crate) fn mark_joined(&self, name: &str) {
        *self.client.name.lock() = name.to_string();
        self.client.joined.store(true, Ordering::Release);
    }

    /// Whether another game command fits in this client's quota
    pub fn allow_command(&self) -> bool {
        self.limiter.check()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queue a message for the writer task
    ///
    /// A zero timeout never waits: the message is queued only if there is
    /// room right now.
    pub async fn send_async(&self, msg: &Message, timeout: Duration) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let frame = encode_frame(msg)?;
        self.send_frame_async(frame, timeout).await
    }

    /// Queue an already encoded frame
    pub async fn send_frame_async(&self, frame: Bytes, timeout: Duration) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        if timeout.is_zero() {
            return match self.out_tx.try_send(frame) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(SendError::Blocked),
                Err(TrySendError::Closed(_)) => Err(SendError::Closed),
            };
        }

        let mut close_rx = self.close_tx.subscribe();
        tokio::select! {
            res = self.out_tx.send_timeout(frame, timeout) => match res {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => Err(SendError::Blocked),
                Err(SendTimeoutError::Closed(_)) => Err(SendError::Closed),
            },
            _ = close_rx.wait_for(|closed| *closed) => Err(SendError::Closed),
        }
    }

    /// Close the session
    ///
    /// Only the first call has an effect. The tasks observe the close signal
    /// and drop their socket halves; queued frames are not flushed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.close_tx.send_replace(true);
        debug!(client_id = self.id(), peer = %self.peer, "Session closed");
        self.handler.on_close(self);
    }

    /// Close after a delay, giving the writer a chance to flush a last frame
    pub fn close_after(self: &Arc<Self>, delay: Duration) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut close_rx = session.close_tx.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(delay) => session.close(),
                _ = close_rx.wait_for(|closed| *closed) => {}
            }
        });
    }

    fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Spawn the reader, writer and handler tasks
    pub fn start(
        self: &Arc<Self>,
        stream: TcpStream,
        queues: SessionQueues,
        registry: Arc<MessageRegistry>,
        exit: ExitSignal,
        guard: TaskGuard,
    ) {
        let (read_half, write_half) = stream.into_split();
        let (in_tx, in_rx) = mpsc::channel(IN_QUEUE_CAPACITY);

        tokio::spawn(read_loop(
            Arc::clone(self),
            read_half,
            in_tx,
            registry,
            exit.clone(),
            guard.clone(),
        ));
        tokio::spawn(write_loop(
            Arc::clone(self),
            write_half,
            queues.out_rx,
            exit.clone(),
            guard.clone(),
        ));
        tokio::spawn(handle_loop(Arc::clone(self), in_rx, exit, guard));
    }
}

async fn wait_closed(mut close_rx: watch::Receiver<bool>) {
    let _ = close_rx.wait_for(|closed| *closed).await;
}

async fn read_loop(
    session: Arc<Session>,
    mut reader: OwnedReadHalf,
    in_tx: mpsc::Sender<Message>,
    registry: Arc<MessageRegistry>,
    mut exit: ExitSignal,
    _guard: TaskGuard,
) {
    let closed = wait_closed(session.close_signal());
    tokio::pin!(closed);

    loop {
        let msg = tokio::select! {
            _ = exit.recv() => break,
            _ = &mut closed => break,
            res = registry.read_message(&mut reader) => res,
        };
        match msg {
            Ok(msg) => {
                if in_tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e) if e.is_disconnect() => {
                debug!(client_id = session.id(), "Peer disconnected");
                break;
            }
            Err(e) => {
                warn!(client_id = session.id(), peer = %session.peer, error = %e, "Protocol error, closing session");
                break;
            }
        }
    }
    session.close();
}

async fn write_loop(
    session: Arc<Session>,
    mut writer: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Bytes>,
    mut exit: ExitSignal,
    _guard: TaskGuard,
) {
    let closed = wait_closed(session.close_signal());
    tokio::pin!(closed);

    loop {
        let frame = tokio::select! {
            _ = exit.recv() => break,
            _ = &mut closed => break,
            frame = out_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = writer.write_all(&frame).await {
            debug!(client_id = session.id(), error = %e, "Socket write failed");
            break;
        }
    }
    session.close();
    let _ = writer.shutdown().await;
}

async fn handle_loop(
    session: Arc<Session>,
    mut in_rx: mpsc::Receiver<Message>,
    mut exit: ExitSignal,
    _guard: TaskGuard,
) {
    let closed = wait_closed(session.close_signal());
    tokio::pin!(closed);

    loop {
        let msg = tokio::select! {
            _ = exit.recv() => break,
            _ = &mut closed => break,
            msg = in_rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        if !session.handler.on_incoming(Arc::clone(&session), msg).await {
            break;
        }
    }
    session.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::Ping;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingHandler {
        closes: AtomicUsize,
    }

    impl SessionHandler for CountingHandler {
        fn on_connect(&self, _session: &Arc<Session>) -> bool {
            true
        }

        fn on_incoming(&self, _session: Arc<Session>, _msg: Message) -> BoxFuture<'static, bool> {
            Box::pin(async { true })
        }

        fn on_close(&self, _session: &Session) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ping() -> Message {
        Message::Ping(Ping { id: 1, tstamp: 0 })
    }

    fn session() -> (Arc<CountingHandler>, Arc<Session>, SessionQueues) {
        let handler = Arc::new(CountingHandler::default());
        let (session, queues) = Session::new("127.0.0.1:9".parse().unwrap(), handler.clone());
        (handler, session, queues)
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (handler, session, _queues) = session();
        session.close();
        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(handler.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_after_close_reports_closed() {
        let (_handler, session, _queues) = session();
        session.close();
        let res = session.send_async(&ping(), Duration::ZERO).await;
        assert!(matches!(res, Err(SendError::Closed)));
        let res = session.send_async(&ping(), Duration::from_millis(5)).await;
        assert!(matches!(res, Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn non_blocking_send_reports_full_queue() {
        let (_handler, session, mut queues) = session();
        for _ in 0..OUT_QUEUE_CAPACITY {
            tokio_test::assert_ok!(session.send_async(&ping(), Duration::ZERO).await);
        }
        let res = session.send_async(&ping(), Duration::ZERO).await;
        assert!(matches!(res, Err(SendError::Blocked)));

        // a timed send gives up after its deadline
        let res = session.send_async(&ping(), Duration::from_millis(10)).await;
        assert!(matches!(res, Err(SendError::Blocked)));

        // draining makes room again
        assert!(queues.out_rx.recv().await.is_some());
        tokio_test::assert_ok!(session.send_async(&ping(), Duration::ZERO).await);
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_sender() {
        let (_handler, session, _queues) = session();
        for _ in 0..OUT_QUEUE_CAPACITY {
            session.send_async(&ping(), Duration::ZERO).await.unwrap();
        }
        let sender = Arc::clone(&session);
        let pending =
            tokio::spawn(async move { sender.send_async(&ping(), Duration::from_secs(10)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close();
        let res = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(res, Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn close_after_delay_closes_once() {
        let (handler, session, _queues) = session();
        session.close_after(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.is_closed());
        assert_eq!(handler.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn client_data_starts_unjoined() {
        let (_handler, session, _queues) = session();
        assert_eq!(session.id(), INVALID_ID);
        assert!(!session.is_joined());
        session.mark_joined("alice");
        assert!(session.is_joined());
        assert_eq!(session.name(), "alice");
    }
}
