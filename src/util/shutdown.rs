//! Server-wide exit signal and task tracking

use tokio::sync::{mpsc, watch};

/// Broadcasts the exit signal and waits for tracked tasks to finish
///
/// Every tracked task holds a [`TaskGuard`]; `wait` returns once all of them
/// have been dropped.
pub struct Shutdown {
    exit_tx: watch::Sender<bool>,
    done_tx: Option<mpsc::Sender<()>>,
    done_rx: mpsc::Receiver<()>,
}

/// Held by a running task; dropping it marks the task as finished
#[derive(Clone)]
pub struct TaskGuard {
    _done: mpsc::Sender<()>,
}

/// Receiving end of the exit signal
#[derive(Clone)]
pub struct ExitSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (exit_tx, _) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            exit_tx,
            done_tx: Some(done_tx),
            done_rx,
        }
    }

    pub fn signal(&self) -> ExitSignal {
        ExitSignal {
            rx: self.exit_tx.subscribe(),
        }
    }

    /// Guard for a new tracked task, `None` once shutdown has begun
    pub fn guard(&self) -> Option<TaskGuard> {
        self.done_tx.as_ref().map(|tx| TaskGuard { _done: tx.clone() })
    }

    /// Raise the exit signal
    pub fn trigger(&self) {
        self.exit_tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.exit_tx.borrow()
    }

    /// Raise the exit signal and wait for every tracked task
    pub async fn stop(&mut self) {
        self.trigger();
        self.done_tx.take();
        // resolves with None when the last guard is dropped
        let _ = self.done_rx.recv().await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ExitSignal {
    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the exit signal is raised
    pub async fn recv(&mut self) {
        // an error means the sender is gone, which is an exit too
        let _ = self.rx.wait_for(|exit| *exit).await;
    }
}
