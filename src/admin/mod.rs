//! Admin console
//!
//! A line-oriented TCP console. Each parsed request is shipped to the tick
//! loop together with a oneshot reply channel and executed there, so admin
//! commands never race with the simulation.

pub mod command;

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::util::shutdown::{ExitSignal, Shutdown};

pub use command::{parse_line, AdminCommand, AdminError, AdminRequest, HELP};

pub const PROMPT: &str = "surviveler> ";
/// Capacity of the request channel to the tick loop
pub const ADMIN_QUEUE_CAPACITY: usize = 16;
/// Longest a console waits on the loop before giving up
pub const ADMIN_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest accepted console line
pub const MAX_LINE_LEN: usize = 1024;

/// A request and the channel its result goes back on
pub type AdminEnvelope = (AdminRequest, oneshot::Sender<Result<String, AdminError>>);

/// Console side of the admin channel
#[derive(Clone, Debug)]
pub struct AdminHandle {
    tx: mpsc::Sender<AdminEnvelope>,
}

impl AdminHandle {
    pub fn channel() -> (Self, mpsc::Receiver<AdminEnvelope>) {
        let (tx, rx) = mpsc::channel(ADMIN_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Execute a request on the loop and wait for its result
    pub async fn request(&self, req: AdminRequest) -> Result<String, AdminError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send((req, done_tx))
            .await
            .map_err(|_| AdminError::LoopStopped)?;
        match tokio::time::timeout(ADMIN_REPLY_TIMEOUT, done_rx).await {
            Ok(Ok(result)) => result,
            _ => Err(AdminError::LoopStopped),
        }
    }
}

/// Accept console connections until the exit signal
pub async fn serve(listener: TcpListener, handle: AdminHandle, shutdown: &Shutdown) {
    let Some(guard) = shutdown.guard() else {
        return;
    };
    let mut exit = shutdown.signal();
    let session_exit = shutdown.signal();
    let session_guard = guard.clone();

    tokio::spawn(async move {
        let _guard = guard;
        info!(addr = ?listener.local_addr().ok(), "Admin console listening");
        loop {
            let accepted = tokio::select! {
                _ = exit.recv() => break,
                res = listener.accept() => res,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let handle = handle.clone();
                    let exit = session_exit.clone();
                    let guard = session_guard.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Err(e) = console(stream, peer, handle, exit).await {
                            debug!(peer = %peer, error = %e, "Admin console closed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Admin accept failed"),
            }
        }
        info!("Admin console stopped");
    });
}

async fn console(
    stream: TcpStream,
    peer: SocketAddr,
    handle: AdminHandle,
    mut exit: ExitSignal,
) -> std::io::Result<()> {
    info!(peer = %peer, "Admin console connected");
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    writer.write_all(PROMPT.as_bytes()).await?;
    loop {
        let line = tokio::select! {
            _ = exit.recv() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        if line.len() > MAX_LINE_LEN {
            writer.write_all(b"error: line too long\n").await?;
            writer.write_all(PROMPT.as_bytes()).await?;
            continue;
        }

        let reply = match parse_line(&line) {
            Ok(None) => None,
            Ok(Some(AdminCommand::Quit)) => break,
            Ok(Some(AdminCommand::Help)) => Some(HELP.to_string()),
            Ok(Some(AdminCommand::Game(req))) => {
                debug!(peer = %peer, request = ?req, "Admin request");
                Some(match handle.request(req).await {
                    Ok(text) => text,
                    Err(e) => format!("error: {e}"),
                })
            }
            Err(e) => Some(format!("error: {e}")),
        };
        if let Some(mut reply) = reply {
            reply.push('\n');
            writer.write_all(reply.as_bytes()).await?;
        }
        writer.write_all(PROMPT.as_bytes()).await?;
    }
    writer.shutdown().await
}
