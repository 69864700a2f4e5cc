//! Debounced reconnection supervisor
//!
//! All recovery triggers funnel through one supervisor holding a single
//! pending timer and the timestamp of the last attempt. A trigger while a
//! timer is pending is a no-op; a timer firing inside the debounce window
//! reschedules itself instead of acting. The decision of *what* to recover
//! stays with the orchestrator, which receives a [`RecoveryDue`] signal
//! whenever a scheduled check fires.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Minimum interval between two effective recovery attempts
pub const RECONNECT_DEBOUNCE: Duration = Duration::from_millis(3000);

/// Effective delay floor for immediate-class triggers
pub const IMMEDIATE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Delay before re-checking when a firing lands inside the debounce window
pub const DEBOUNCE_RECHECK_DELAY: Duration = Duration::from_millis(1000);

/// Settle delay between closing a session and reissuing its command
pub const RECOVERY_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// A scheduled recovery check has fired
#[derive(Debug, Clone, Copy)]
pub struct RecoveryDue {
    /// Bypass the debounce window and the active-connection check
    pub force: bool,
}

/// Global recovery scheduling state
pub struct ReconnectionSupervisor {
    enabled: bool,
    last_attempt: parking_lot::Mutex<Option<Instant>>,
    pending: parking_lot::Mutex<Option<JoinHandle<()>>>,
    tx: mpsc::UnboundedSender<RecoveryDue>,
}

impl ReconnectionSupervisor {
    pub fn new(enabled: bool, tx: mpsc::UnboundedSender<RecoveryDue>) -> Self {
        Self {
            enabled,
            last_attempt: parking_lot::Mutex::new(None),
            pending: parking_lot::Mutex::new(None),
            tx,
        }
    }

    /// Request a recovery check after `delay`.
    ///
    /// A zero delay means an immediate-class trigger: any pending timer is
    /// cancelled and the effective delay floor applies. Otherwise a request
    /// while a timer is pending is a no-op; the already-scheduled check
    /// will re-evaluate.
    pub fn schedule(&self, delay: Duration, force: bool) {
        if !self.enabled {
            return;
        }

        let delay = if delay.is_zero() {
            if let Some(timer) = self.pending.lock().take() {
                timer.abort();
            }
            IMMEDIATE_RETRY_DELAY
        } else {
            delay
        };

        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|timer| !timer.is_finished()) {
            return;
        }

        let tx = self.tx.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RecoveryDue { force });
        }));
    }

    /// Release the pending-timer slot once its signal is being processed
    pub fn acknowledge(&self) {
        self.pending.lock().take();
    }

    /// Gate one recovery attempt against the debounce window.
    ///
    /// Returns true when the attempt may proceed, recording it as the last
    /// attempt. Inside the window (and unforced) the check is silently
    /// rescheduled and false is returned.
    pub fn begin_attempt(&self, force: bool) -> bool {
        let now = Instant::now();
        let mut last = self.last_attempt.lock();

        if let Some(previous) = *last {
            let elapsed = now.duration_since(previous);
            if elapsed < RECONNECT_DEBOUNCE && !force {
                debug!(
                    "Reconnection request received after {:?}. It should be at least {:?}; \
                     checking again after {:?}",
                    elapsed, RECONNECT_DEBOUNCE, DEBOUNCE_RECHECK_DELAY
                );
                drop(last);
                self.schedule(DEBOUNCE_RECHECK_DELAY, force);
                return false;
            }
        }

        *last = Some(now);
        true
    }

    /// Whether a recovery check is currently scheduled
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for ReconnectionSupervisor {
    fn drop(&mut self) {
        if let Some(timer) = self.pending.lock().take() {
            timer.abort();
        }
    }
}
