use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Handle to stop and join a cache's background sweeper.
#[derive(Debug)]
pub(crate) struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the sweeper thread to exit.
    pub(crate) fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            if j.thread().id() == thread::current().id() {
                return;
            }
            let _ = j.join();
        }
    }
}

/// Spawn a thread that calls `sweep` every `interval` until shut down.
///
/// Returns `None` when the OS refuses a new thread; the cache then relies on
/// lazy expiry alone.
pub(crate) fn spawn<F>(name: &str, interval: Duration, mut sweep: F) -> Option<SweeperHandle>
where
    F: FnMut() + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
        loop {
            match shutdown_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => sweep(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    match spawned {
        Ok(join) => Some(SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }),
        Err(err) => {
            warn!(sweeper = name, error = %err, "failed to spawn cache sweeper; falling back to lazy expiry");
            None
        }
    }
}
