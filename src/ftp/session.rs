//! Transfer session state and the stall monitor.
//!
//! The monitor runs as a tokio task next to the transfer loop. It only reads
//! the shared byte counter and the session state; when it decides the
//! transfer is stalled it sends a message, and the transfer loop drops its
//! connection in response.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Transferring,
    Stalled,
    Complete,
    Failed,
}

/// Byte counter shared between the transfer loop and the monitor.
///
/// Only the transfer loop advances it, and only forwards.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU64>);

impl Progress {
    pub fn new(initial: u64) -> Self {
        Self(Arc::new(AtomicU64::new(initial)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Records `n` more bytes as flushed and returns the new total.
    pub fn advance(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::AcqRel) + n
    }
}

/// Handle on a running monitor. Dropping it stops the task, so every exit
/// path of the transfer loop cancels the monitor.
pub struct StallMonitor {
    handle: JoinHandle<()>,
}

impl StallMonitor {
    /// Spawns a monitor ticking every `period`. A stall notice is sent on
    /// `stall_tx` when a tick sees no progress while the session is
    /// transferring.
    pub fn spawn(
        period: Duration,
        progress: Progress,
        state: watch::Receiver<SessionState>,
        stall_tx: mpsc::Sender<()>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = progress.get();

            loop {
                ticker.tick().await;
                let current = progress.get();
                let transferring = *state.borrow() == SessionState::Transferring;

                if transferring && current == last {
                    warn!(
                        bytes = current,
                        secs = period.as_secs_f64(),
                        "no progress, forcing disconnect"
                    );
                    // A notice already pending covers this tick too.
                    if let Err(mpsc::error::TrySendError::Closed(_)) = stall_tx.try_send(()) {
                        break;
                    }
                }
                last = current;
            }
        });

        Self { handle }
    }

    pub fn stop(self) {
        // Drop does the work.
    }
}

impl Drop for StallMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
