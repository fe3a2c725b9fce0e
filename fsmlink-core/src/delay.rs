//! Interruptible delays and the engine stop signal.
//!
//! A delayed transition waits on a [`DelayController`]. The wait ends early
//! when a variable is written while the delay is pending (the interrupt) or
//! when the engine is stopped. Both wakeups are event driven: the waiter
//! races a `sleep_until` against a `Notify` and a `watch` channel, so there
//! is no polling interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

/// How a delay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    /// The full duration elapsed.
    Expired,
    /// A variable write interrupted the wait.
    Interrupted,
    /// The engine was stopped.
    Stopped,
}

/// Owns the stop flag and the interrupt signal for one engine.
pub struct DelayController {
    /// Monotonic stop flag; once `true` it is never cleared.
    stop: watch::Sender<bool>,
    /// Set while a delay wait is in progress.
    pending: AtomicBool,
    /// Edge-triggered interrupt, cleared by whoever consumes it.
    interrupted: AtomicBool,
    wake: Notify,
}

impl DelayController {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            stop,
            pending: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Sets the stop flag and wakes every waiter.
    ///
    /// Returns `true` for the call that actually flipped the flag.
    pub fn request_stop(&self) -> bool {
        let mut first = false;
        self.stop.send_if_modified(|stopped| {
            first = !*stopped;
            *stopped = true;
            first
        });
        first
    }

    /// Returns whether the stop flag is set.
    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once the stop flag is set.
    pub async fn stopped(&self) {
        let mut rx = self.stop.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Returns whether a delay wait is in progress.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Signals the pending delay, if any, to abort.
    ///
    /// Returns `false` when no delay is pending or the engine is stopping;
    /// writes outside a delay have no abort effect. A delay counts as
    /// pending only once [`DelayController::wait`] has been entered, which
    /// is after the run loop reports the transition and runs its action. A
    /// controller reacting to `TRANSITION_TAKEN` can therefore write before
    /// the wait starts; such a write is applied but does not abort the delay.
    pub fn interrupt(&self) -> bool {
        if !self.is_pending() || self.is_stopped() {
            return false;
        }
        self.interrupted.store(true, Ordering::Release);
        self.wake.notify_one();
        true
    }

    /// Discards an interrupt that nobody consumed.
    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::Release);
    }

    /// Waits up to `duration`, aborting early on interrupt or stop.
    ///
    /// Stop takes priority over interrupt when both are signalled.
    pub async fn wait(&self, duration: Duration) -> DelayOutcome {
        let deadline = Instant::now() + duration;
        self.pending.store(true, Ordering::Release);
        let _pending = PendingGuard(&self.pending);

        loop {
            if self.is_stopped() {
                return DelayOutcome::Stopped;
            }
            if self.interrupted.swap(false, Ordering::AcqRel) {
                return DelayOutcome::Interrupted;
            }

            tokio::select! {
                biased;
                _ = self.stopped() => return DelayOutcome::Stopped,
                // A stale permit from an earlier interrupt just loops back to
                // the flag checks above.
                _ = self.wake.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => return DelayOutcome::Expired,
            }
        }
    }
}

impl Default for DelayController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DelayController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayController")
            .field("stopped", &self.is_stopped())
            .field("pending", &self.is_pending())
            .field("interrupted", &self.interrupted.load(Ordering::Relaxed))
            .finish()
    }
}

/// Clears the pending flag when the wait returns or is dropped.
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_wait_expires() {
        let delay = DelayController::new();
        let started = Instant::now();

        assert_eq!(delay.wait(Duration::from_secs(5)).await, DelayOutcome::Expired);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(!delay.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_aborts_wait() {
        let delay = Arc::new(DelayController::new());
        let waiter = {
            let delay = delay.clone();
            tokio::spawn(async move { delay.wait(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(delay.is_pending());
        assert!(delay.interrupt());

        let started = Instant::now();
        assert_eq!(waiter.await.unwrap(), DelayOutcome::Interrupted);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_outside_wait_is_ignored() {
        let delay = DelayController::new();
        assert!(!delay.interrupt());

        // The ignored interrupt must not abort the next wait.
        assert_eq!(delay.wait(Duration::from_millis(100)).await, DelayOutcome::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_is_consumed_once() {
        let delay = Arc::new(DelayController::new());
        let waiter = {
            let delay = delay.clone();
            tokio::spawn(async move {
                let first = delay.wait(Duration::from_secs(5)).await;
                let second = delay.wait(Duration::from_secs(1)).await;
                (first, second)
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        delay.interrupt();

        assert_eq!(
            waiter.await.unwrap(),
            (DelayOutcome::Interrupted, DelayOutcome::Expired)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_wait() {
        let delay = Arc::new(DelayController::new());
        let waiter = {
            let delay = delay.clone();
            tokio::spawn(async move { delay.wait(Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(delay.request_stop());
        assert_eq!(waiter.await.unwrap(), DelayOutcome::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_beats_interrupt() {
        let delay = Arc::new(DelayController::new());
        let waiter = {
            let delay = delay.clone();
            tokio::spawn(async move { delay.wait(Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        delay.interrupt();
        delay.request_stop();
        assert_eq!(waiter.await.unwrap(), DelayOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_stop_is_monotonic() {
        let delay = DelayController::new();
        assert!(!delay.is_stopped());
        assert!(delay.request_stop());
        assert!(!delay.request_stop());
        assert!(delay.is_stopped());

        // Already stopped: resolves immediately, and so does any later wait.
        delay.stopped().await;
        assert_eq!(delay.wait(Duration::from_secs(1)).await, DelayOutcome::Stopped);
    }

    #[test]
    fn test_clear_interrupt() {
        let delay = DelayController::new();
        delay.pending.store(true, Ordering::Release);
        assert!(delay.interrupt());
        delay.clear_interrupt();
        assert!(!delay.interrupted.load(Ordering::Acquire));
    }
}
