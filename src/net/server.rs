//! TCP acceptor
//!
//! Accepts game connections, wraps each socket in a [`Session`] and starts
//! its tasks. The accept loop watches the server exit signal, so stopping
//! the [`Shutdown`] stops accepting and tears down every session.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::codec::MessageRegistry;
use super::session::{Session, SessionHandler};
use crate::util::shutdown::Shutdown;

/// Game server front end
pub struct Acceptor {
    listener: TcpListener,
    registry: Arc<MessageRegistry>,
    handler: Arc<dyn SessionHandler>,
}

impl Acceptor {
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn SessionHandler>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, handler))
    }

    pub fn from_listener(listener: TcpListener, handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            listener,
            registry: Arc::new(MessageRegistry::standard()),
            handler,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawn the accept loop, tracked by `shutdown`
    pub fn start(self, shutdown: &Shutdown) {
        let Some(guard) = shutdown.guard() else {
            warn!("Acceptor started after shutdown, ignoring");
            return;
        };
        let mut exit = shutdown.signal();
        let session_exit = shutdown.signal();
        let session_guard = guard.clone();

        tokio::spawn(async move {
            let _guard = guard;
            match self.listener.local_addr() {
                Ok(addr) => info!(addr = %addr, "Game server listening"),
                Err(e) => warn!(error = %e, "Game server listening on unknown address"),
            }
            loop {
                let accepted = tokio::select! {
                    _ = exit.recv() => break,
                    res = self.listener.accept() => res,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        self.on_accept(stream, peer, &session_exit, &session_guard);
                    }
                    Err(e) => {
                        // transient (e.g. too many open files), keep serving
                        warn!(error = %e, "Accept failed");
                    }
                }
            }
            info!("Game server stopped accepting");
        });
    }

    fn on_accept(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        exit: &crate::util::shutdown::ExitSignal,
        guard: &crate::util::shutdown::TaskGuard,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to disable Nagle");
        }
        let (session, queues) = Session::new(peer, Arc::clone(&self.handler));
        if !self.handler.on_connect(&session) {
            info!(peer = %peer, "Connection refused");
            return;
        }
        debug!(client_id = session.id(), peer = %peer, "Connection accepted");
        session.start(
            stream,
            queues,
            Arc::clone(&self.registry),
            exit.clone(),
            guard.clone(),
        );
    }
}
