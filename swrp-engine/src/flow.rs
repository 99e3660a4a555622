//! Credit-based flow control.
//!
//! One credit is permission to send one segment. The sink grants the initial
//! pool in START_ACK and returns credits in FRAME_ACK; the source consumes
//! one per FRAME packet. `acquire` is the sole backpressure point on the
//! source side.

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct FlowState {
    current: u16,
    maximum: u16,
}

/// Shared credit pool. Safe for concurrent use by the send task (consume)
/// and the receive task (return).
#[derive(Debug)]
pub struct FlowController {
    state: Mutex<FlowState>,
    notify: Notify,
}

impl FlowController {
    /// Starts empty; [`set_initial`](Self::set_initial) installs the pool
    /// once START_ACK arrives.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FlowState {
                current: 0,
                maximum: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Installs `n` as both the current count and the ceiling, waking any
    /// blocked waiters.
    pub fn set_initial(&self, n: u16) {
        {
            let mut state = self.state.lock();
            state.current = n;
            state.maximum = n;
        }
        self.notify.notify_waiters();
    }

    /// Takes one credit if at least one is available.
    pub fn try_consume(&self) -> bool {
        let mut state = self.state.lock();
        if state.current >= 1 {
            state.current -= 1;
            true
        } else {
            false
        }
    }

    /// Suspends until a credit is available, without taking it.
    ///
    /// Consuming is a separate call so the sender can sequence acquisition
    /// and the packet write as it needs. Returns `false` when the pool has
    /// been [`reset`](Self::reset): the waiter holds no credit and should
    /// shut down. Cancellable at task cancellation.
    pub async fn acquire(&self) -> bool {
        loop {
            // Register before checking, so a wakeup between the check and
            // the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock();
                if state.maximum == 0 {
                    return false;
                }
                if state.current >= 1 {
                    return true;
                }
            }

            notified.await;
        }
    }

    /// Returns `n` credits, clamped to the ceiling, waking waiters.
    pub fn return_credits(&self, n: u16) {
        {
            let mut state = self.state.lock();
            state.current = state.current.saturating_add(n).min(state.maximum);
        }
        self.notify.notify_waiters();
    }

    /// Zeroes the pool and the ceiling, releasing every waiter empty-handed.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.current = 0;
            state.maximum = 0;
        }
        self.notify.notify_waiters();
    }

    pub fn available(&self) -> u16 {
        self.state.lock().current
    }

    pub fn maximum(&self) -> u16 {
        self.state.lock().maximum
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new()
    }
}
