//! Heartbeat watchdog
//!
//! Detects silence on an otherwise idle hub connection. One instance guards
//! one session: `run()` blocks until either `stop()` is called or no
//! `reset()` has been seen for longer than the timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const UNSET: u64 = u64::MAX;

/// Why `run()` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogExit {
    Stopped,
    TimedOut { silent_for: Duration },
}

#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<Inner>,
}

struct Inner {
    timeout: Duration,
    poll_interval: Duration,
    origin: Instant,
    /// Millis since `origin` of the last reset, UNSET until the first one
    last_alive_ms: AtomicU64,
    stop_tx: watch::Sender<bool>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self::with_poll_interval(timeout, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(timeout: Duration, poll_interval: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                timeout,
                poll_interval,
                origin: Instant::now(),
                last_alive_ms: AtomicU64::new(UNSET),
                stop_tx,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Mark the connection alive now
    pub fn reset(&self) {
        self.inner
            .last_alive_ms
            .store(self.elapsed_ms(), Ordering::SeqCst);
    }

    /// Wake `run()` and make it return `Stopped`. Idempotent.
    pub fn stop(&self) {
        self.inner.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }

    /// Resolves once `stop()` has been called
    pub async fn stopped(&self) {
        let mut rx = self.inner.stop_tx.subscribe();
        // the sender lives as long as `self`
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Time since the last reset, or None before the first one
    pub fn silent_for(&self) -> Option<Duration> {
        match self.inner.last_alive_ms.load(Ordering::SeqCst) {
            UNSET => None,
            last => Some(Duration::from_millis(self.elapsed_ms().saturating_sub(last))),
        }
    }

    pub async fn run(&self) -> WatchdogExit {
        let _ = self.inner.last_alive_ms.compare_exchange(
            UNSET,
            self.elapsed_ms(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        debug!(timeout = ?self.inner.timeout, "Watchdog started");

        loop {
            tokio::select! {
                biased;
                _ = self.stopped() => {
                    debug!("Watchdog stopped");
                    return WatchdogExit::Stopped;
                }
                _ = tokio::time::sleep(self.inner.poll_interval) => {
                    if let Some(silent_for) = self.silent_for() {
                        if silent_for > self.inner.timeout {
                            warn!(?silent_for, timeout = ?self.inner.timeout, "Watchdog timed out");
                            return WatchdogExit::TimedOut { silent_for };
                        }
                    }
                }
            }
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.inner.origin.elapsed().as_millis() as u64
    }
}
