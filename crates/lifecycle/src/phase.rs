//! Phase State Machine
//!
//! The single source of truth for the orchestrator's lifecycle phase.
//! Transitions only ever move forward; see [`Phase`]'s `Ord` derive.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::exception::{ExceptionEvent, ExceptionSink, HandlerKind};

/// A lifecycle phase. Ordinally monotonic: `Startup < Running <
/// ShutdownRequested < Draining < Final`, and the orchestrator never moves
/// backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    Startup = 0,
    Running = 1,
    ShutdownRequested = 2,
    Draining = 3,
    Final = 4,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Startup => "startup",
            Self::Running => "running",
            Self::ShutdownRequested => "shutdown_requested",
            Self::Draining => "draining",
            Self::Final => "final",
        };
        write!(f, "{s}")
    }
}

type StateChangeListener =
    Arc<dyn Fn(Phase, Phase) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Owns the current [`Phase`] and the ordered list of state-change listeners.
///
/// `update_phase` is a no-op when the target equals the current phase;
/// otherwise it swaps the phase under a short lock, then fans the transition
/// out to every listener concurrently and awaits all of them (an "all-settle"
/// discipline: one listener failing never prevents its peers from running).
pub struct PhaseMachine {
    phase: Mutex<Phase>,
    listeners: Mutex<Vec<StateChangeListener>>,
    exceptions: ExceptionSink,
}

impl PhaseMachine {
    pub fn new(exceptions: ExceptionSink) -> Self {
        Self {
            phase: Mutex::new(Phase::Startup),
            listeners: Mutex::new(Vec::new()),
            exceptions,
        }
    }

    pub fn current(&self) -> Phase {
        *self.phase.lock()
    }

    /// Register a listener invoked `(new, old)` on every distinct transition
    /// from this point forward, in registration order.
    pub fn on_state_change<F, Fut>(&self, listener: F)
    where
        F: Fn(Phase, Phase) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.listeners
            .lock()
            .push(Arc::new(move |new, old| Box::pin(listener(new, old))));
    }

    /// Move to `target`. No-op if already in `target`. Panics in debug
    /// builds if `target` is not ordinally ahead of the current phase — the
    /// sequencer is the only caller and must never request a backward move.
    pub async fn update_phase(&self, target: Phase) {
        let old = {
            let mut phase = self.phase.lock();
            if *phase == target {
                return;
            }
            debug_assert!(
                target > *phase,
                "phase transitions must move forward: {} -> {}",
                *phase,
                target
            );
            let old = *phase;
            *phase = target;
            old
        };

        debug!(from = %old, to = %target, "phase transition");
        crate::metrics::set_phase(target as u8);

        let listeners: Vec<StateChangeListener> = self.listeners.lock().clone();
        let futures = listeners
            .into_iter()
            .enumerate()
            .map(|(index, listener)| {
                let exceptions = self.exceptions.clone();
                async move {
                    // Listeners are plain futures, not fallible by signature,
                    // so "failure" here means the listener's own internal
                    // error handling chose to report through the exception
                    // sink itself; we still guard with catch_unwind semantics
                    // by running it to completion rather than letting a panic
                    // here bring down the whole fan-out (AssertUnwindSafe is
                    // acceptable: listeners carry no borrowed state across the
                    // boundary).
                    let result = std::panic::AssertUnwindSafe(listener(target, old))
                        .catch_unwind()
                        .await;
                    if let Err(panic) = result {
                        let message = panic_message(&panic);
                        exceptions.emit(ExceptionEvent::new(
                            HandlerKind::StateChangeListener,
                            index,
                            message,
                        ));
                    }
                }
            });

        futures_util::future::join_all(futures).await;
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}

use futures_util::FutureExt;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ExceptionSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn update_phase_noop_for_same_phase() {
        let calls = Arc::new(AtomicUsize::new(0));
        let machine = PhaseMachine::new(ExceptionSink::default());
        let calls_clone = calls.clone();
        machine.on_state_change(move |_, _| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        machine.update_phase(Phase::Startup).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        machine.update_phase(Phase::Running).await;
        machine.update_phase(Phase::Running).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listeners_observe_new_and_old() {
        let machine = PhaseMachine::new(ExceptionSink::default());
        let seen: Arc<Mutex<Vec<(Phase, Phase)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        machine.on_state_change(move |new, old| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().push((new, old));
            }
        });

        machine.update_phase(Phase::Running).await;
        machine.update_phase(Phase::ShutdownRequested).await;

        assert_eq!(
            *seen.lock(),
            vec![
                (Phase::Running, Phase::Startup),
                (Phase::ShutdownRequested, Phase::Running),
            ]
        );
    }

    #[tokio::test]
    async fn one_listener_panicking_does_not_block_peers() {
        let machine = PhaseMachine::new(ExceptionSink::default());
        let second_ran = Arc::new(AtomicUsize::new(0));

        machine.on_state_change(|_, _| async {
            panic!("boom");
        });

        let second_ran_clone = second_ran.clone();
        machine.on_state_change(move |_, _| {
            let second_ran = second_ran_clone.clone();
            async move {
                second_ran.fetch_add(1, Ordering::SeqCst);
            }
        });

        machine.update_phase(Phase::Running).await;
        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn phase_ordering_is_monotonic() {
        assert!(Phase::Startup < Phase::Running);
        assert!(Phase::Running < Phase::ShutdownRequested);
        assert!(Phase::ShutdownRequested < Phase::Draining);
        assert!(Phase::Draining < Phase::Final);
    }
}
