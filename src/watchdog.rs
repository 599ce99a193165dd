//! Per-attempt stall detection
//!
//! The reader side of a transfer owns a [`Heartbeat`] and calls
//! [`Heartbeat::beat`] whenever bytes arrive. A separate task owned by the
//! [`StallWatchdog`] keeps the deadline: when no beat arrives for the idle
//! threshold it cancels the attempt's [`CancellationToken`]. The two sides
//! share nothing but a `watch` channel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Sender half used by the transfer loop to report progress
///
/// Cheap to clone; usable from blocking worker threads.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    tx: Arc<watch::Sender<Instant>>,
}

impl Heartbeat {
    /// Record that data was just received
    pub fn beat(&self) {
        self.tx.send_replace(Instant::now());
    }
}

/// Watchdog for a single transfer attempt
///
/// Dropping the watchdog stops its task; it never outlives the attempt.
#[derive(Debug)]
pub struct StallWatchdog {
    token: CancellationToken,
    heartbeat: Heartbeat,
    idle: Duration,
    handle: JoinHandle<()>,
}

impl StallWatchdog {
    /// Start watching; the idle clock starts now
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(idle: Duration) -> Self {
        let (tx, rx) = watch::channel(Instant::now());
        let token = CancellationToken::new();
        let handle = tokio::spawn(watch_deadline(rx, idle, token.clone()));

        Self {
            token,
            heartbeat: Heartbeat { tx: Arc::new(tx) },
            idle,
            handle,
        }
    }

    /// Heartbeat sender for the reader
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    /// Token cancelled when the attempt stalls
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the stall deadline has fired
    pub fn stalled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The configured idle threshold
    pub fn idle(&self) -> Duration {
        self.idle
    }
}

impl Drop for StallWatchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn watch_deadline(
    mut rx: watch::Receiver<Instant>,
    idle: Duration,
    token: CancellationToken,
) {
    loop {
        let last = *rx.borrow_and_update();
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    // All heartbeats dropped, attempt is over
                    return;
                }
            }
            _ = tokio::time::sleep_until(last + idle) => {
                tracing::warn!(idle_secs = idle.as_secs_f64(), "no data received within idle timeout");
                token.cancel();
                return;
            }
        }
    }
}
