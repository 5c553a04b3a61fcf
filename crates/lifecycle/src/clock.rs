//! Clock & Timer Service
//!
//! Every time-dependent component in this crate obtains timing exclusively
//! through a [`Clock`] implementation. Production code uses [`SystemClock`];
//! tests use [`VirtualClock`] to drive timer-ordered scenarios deterministically
//! without real sleeps.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A cancellable handle to a scheduled timer.
///
/// Dropping the handle does not cancel the timer; call [`TimerHandle::cancel`]
/// explicitly. This mirrors the teacher's `ConnectionGuard`-style explicit
/// capability objects rather than relying on `Drop` for control flow that
/// needs to be observable.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    fn new() -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            Self {
                cancelled: flag.clone(),
            },
            flag,
        )
    }

    /// Cancel the timer. A no-op if it already fired or was already cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the timer has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Monotonic clock plus non-retaining, cancellable one-shot timers.
///
/// "Non-retaining" means scheduling a callback never keeps the process alive
/// on its own; only the shutdown sequencer's force-exit timer has authority
/// to terminate the process, per the design notes.
pub trait Clock: Send + Sync {
    /// Current monotonic time, as this clock sees it.
    fn now(&self) -> Instant;

    /// Schedule `callback` to run after `delay`. Returns a handle that can
    /// cancel the timer before it fires.
    fn schedule(
        &self,
        delay: Duration,
        callback: Box<dyn FnOnce() + Send + 'static>,
    ) -> TimerHandle;

    /// Await `delay` against this clock. Components that need to suspend
    /// (rather than fire a detached callback) use this instead of
    /// `tokio::time::sleep` directly, so tests can drive them with
    /// [`VirtualClock`].
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real-time clock backed by the Tokio runtime.
#[derive(Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(
        &self,
        delay: Duration,
        callback: Box<dyn FnOnce() + Send + 'static>,
    ) -> TimerHandle {
        let (handle, cancelled) = TimerHandle::new();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancelled.load(Ordering::SeqCst) {
                callback();
            }
        });
        handle
    }

    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(delay))
    }
}

struct VirtualClockInner {
    now: Instant,
    waiters: Vec<(Instant, tokio::sync::oneshot::Sender<()>)>,
}

/// Deterministic, manually-advanced clock for tests.
///
/// `advance` fires any scheduled callback (and wakes any `sleep` waiter)
/// whose deadline has passed, in deadline order.
#[derive(Clone)]
pub struct VirtualClock {
    inner: Arc<Mutex<VirtualClockInner>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VirtualClockInner {
                now: Instant::now(),
                waiters: Vec::new(),
            })),
        }
    }

    /// Advance virtual time by `delta`, firing any timers/waiters whose
    /// deadline is now in the past, in deadline order.
    pub fn advance(&self, delta: Duration) {
        let mut inner = self.inner.lock();
        inner.now += delta;
        let now = inner.now;
        inner.waiters.sort_by_key(|(deadline, _)| *deadline);
        let mut remaining = Vec::new();
        for (deadline, tx) in inner.waiters.drain(..) {
            if deadline <= now {
                let _ = tx.send(());
            } else {
                remaining.push((deadline, tx));
            }
        }
        inner.waiters = remaining;
    }

    async fn wait_until(&self, deadline: Instant) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        {
            let mut inner = self.inner.lock();
            if inner.now >= deadline {
                let _ = tx.send(());
            } else {
                inner.waiters.push((deadline, tx));
            }
        }
        let _ = rx.await;
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.inner.lock().now
    }

    fn schedule(
        &self,
        delay: Duration,
        callback: Box<dyn FnOnce() + Send + 'static>,
    ) -> TimerHandle {
        let (handle, cancelled) = TimerHandle::new();
        let deadline = self.now() + delay;
        let this = self.clone();
        tokio::spawn(async move {
            this.wait_until(deadline).await;
            if !cancelled.load(Ordering::SeqCst) {
                callback();
            }
        });
        handle
    }

    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let deadline = self.now() + delay;
        Box::pin(self.wait_until(deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn system_clock_schedule_fires() {
        let clock = SystemClock::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        clock.schedule(Duration::from_millis(5), Box::new(move || {
            let _ = tx.send(());
        }));
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn system_clock_cancel_prevents_callback() {
        let clock = SystemClock::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let handle = clock.schedule(
            Duration::from_millis(20),
            Box::new(move || fired_clone.store(true, Ordering::SeqCst)),
        );
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn virtual_clock_fires_in_deadline_order() {
        let clock = VirtualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (id, delay_ms) in [(1u32, 300u64), (2, 100), (3, 200)] {
            let order = order.clone();
            clock.schedule(
                Duration::from_millis(delay_ms),
                Box::new(move || order.lock().push(id)),
            );
        }

        // Let the spawned wait_until tasks register themselves first.
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(350));
        tokio::task::yield_now().await;

        assert_eq!(*order.lock(), vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn virtual_clock_cancel_suppresses_callback() {
        let clock = VirtualClock::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let handle = clock.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(200));
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn virtual_clock_sleep_resumes_after_advance() {
        let clock = VirtualClock::new();
        let clock_for_task = clock.clone();
        let handle = tokio::spawn(async move {
            clock_for_task.sleep(Duration::from_millis(50)).await;
        });
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(50));
        handle.await.unwrap();
    }
}
