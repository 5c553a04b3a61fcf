//! Shutdown Sequencer
//!
//! Drives Phase 1 -> 2 -> 3, enforces the drain timeout, invokes user
//! shutdown hooks, and watches trackers and user-supplied shutdown-ready
//! gates. See spec §4.5 for the exact per-phase algorithm; this module is a
//! direct restatement of it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::clock::{Clock, TimerHandle};
use crate::config::Config;
use crate::connection::ServerTracker;
use crate::exception::{ExceptionEvent, ExceptionSink, HandlerKind};
use crate::phase::{Phase, PhaseMachine};
use crate::probe::{AsyncCheck, all_checks_pass};

/// A registered shutdown handler, e.g. "flush the outbound queue".
pub type ShutdownCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// How the process is actually terminated. Production code uses
/// [`std::process::exit`]; tests substitute a closure that records the
/// requested exit code instead of ending the test process.
pub type ExitFn = Arc<dyn Fn(i32) + Send + Sync>;

fn default_exit_fn() -> ExitFn {
    Arc::new(|code| std::process::exit(code))
}

/// Drives the three shutdown phases described in spec §4.5.
pub struct ShutdownSequencer {
    config: Config,
    clock: Arc<dyn Clock>,
    phase: Arc<PhaseMachine>,
    shutdown_requested: Arc<AtomicBool>,
    servers: Arc<Mutex<Vec<Arc<ServerTracker>>>>,
    shutdown_callbacks: Arc<Mutex<Vec<ShutdownCallback>>>,
    shutdown_ready_checks: Arc<Mutex<Vec<AsyncCheck>>>,
    exceptions: ExceptionSink,
    exit_fn: ExitFn,
    drain_poll_handle: Mutex<Option<TimerHandle>>,
    finishing: AtomicBool,
}

impl ShutdownSequencer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        phase: Arc<PhaseMachine>,
        shutdown_requested: Arc<AtomicBool>,
        servers: Arc<Mutex<Vec<Arc<ServerTracker>>>>,
        shutdown_callbacks: Arc<Mutex<Vec<ShutdownCallback>>>,
        shutdown_ready_checks: Arc<Mutex<Vec<AsyncCheck>>>,
        exceptions: ExceptionSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            phase,
            shutdown_requested,
            servers,
            shutdown_callbacks,
            shutdown_ready_checks,
            exceptions,
            exit_fn: default_exit_fn(),
            drain_poll_handle: Mutex::new(None),
            finishing: AtomicBool::new(false),
        })
    }

    /// Override how the process is terminated; intended for tests only.
    #[cfg(test)]
    pub fn with_exit_fn(mut self, exit_fn: ExitFn) -> Self {
        self.exit_fn = exit_fn;
        self
    }

    /// Entry point. A second call after the first one forces the process to
    /// exit immediately with code `-127` instead of re-entering phase 1.
    pub async fn start_shutdown(self: &Arc<Self>) {
        if self
            .shutdown_requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("startShutdown invoked a second time, forcing exit");
            (self.exit_fn)(-127);
            return;
        }

        info!("shutdown requested, readiness now failing");
        crate::metrics::record_shutdown_started();
        self.phase.update_phase(Phase::ShutdownRequested).await;

        let this = self.clone();
        self.clock.schedule(
            self.config.phase1_duration(),
            Box::new(move || {
                tokio::spawn(async move {
                    this.enter_draining().await;
                });
            }),
        );
    }

    /// Phase 2: start failing non-health requests, stop accepting idle
    /// keepalive reuse, and begin polling for drain completion.
    async fn enter_draining(self: Arc<Self>) {
        self.phase.update_phase(Phase::Draining).await;

        for server in self.servers.lock().iter() {
            server.request_shutdown();
        }

        let poll_self = self.clone();
        self.clock.schedule(
            self.config.connection_poll(),
            Box::new(move || {
                tokio::spawn(async move {
                    poll_self.drain_poll().await;
                });
            }),
        );

        let deadline_self = self.clone();
        self.clock.schedule(
            self.config.drain_timeout(),
            Box::new(move || {
                tokio::spawn(async move {
                    warn!("Close timeout reached, forcing to close");
                    deadline_self.finish_shutdown().await;
                });
            }),
        );
    }

    /// One iteration of the drain poll: sum active connections, run every
    /// shutdown-ready check, and either finish or reschedule.
    async fn drain_poll(self: Arc<Self>) {
        let active: usize = self
            .servers
            .lock()
            .iter()
            .map(|s| s.active_connection_count())
            .sum();

        let checks = self.shutdown_ready_checks.lock().clone();
        let any_gate_failed = !all_checks_pass(&checks).await;

        if active == 0 && !any_gate_failed {
            self.finish_shutdown().await;
            return;
        }

        if active > 0 {
            tracing::debug!(active_connections = active, "drain poll: still draining");
        }
        if any_gate_failed {
            tracing::debug!("drain poll: a shutdown-ready check still holds the gate");
        }

        let next_self = self.clone();
        let handle = self.clock.schedule(
            self.config.connection_poll(),
            Box::new(move || {
                tokio::spawn(async move {
                    next_self.drain_poll().await;
                });
            }),
        );
        *self.drain_poll_handle.lock() = Some(handle);
    }

    /// Phase 3: safe to call from either the drain poll or the hard
    /// deadline timer — the `finishing` guard makes only the first call
    /// take effect.
    async fn finish_shutdown(self: Arc<Self>) {
        if self
            .finishing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Some(handle) = self.drain_poll_handle.lock().take() {
            handle.cancel();
        }

        self.phase.update_phase(Phase::Final).await;

        for server in self.servers.lock().iter() {
            server.force_close();
        }

        let callbacks = self.shutdown_callbacks.lock().clone();
        let futures = callbacks.into_iter().enumerate().map(|(index, cb)| {
            let exceptions = self.exceptions.clone();
            async move {
                use futures_util::FutureExt;
                let result = std::panic::AssertUnwindSafe(cb()).catch_unwind().await;
                if let Err(panic) = result {
                    let message = panic_message(&panic);
                    exceptions.emit(ExceptionEvent::new(
                        HandlerKind::ShutdownHandler,
                        index,
                        message,
                    ));
                }
            }
        });
        futures_util::future::join_all(futures).await;
        crate::metrics::record_shutdown_completed();

        let this = self.clone();
        self.clock.schedule(
            self.config.force_exit_grace(),
            Box::new(move || {
                warn!("force-exit grace period elapsed, terminating process");
                (this.exit_fn)(0);
            }),
        );
    }

    /// Exposed so tests can drive `finish_shutdown` without a timer firing
    /// (e.g. asserting idempotence when called from two code paths).
    #[cfg(test)]
    pub async fn finish_shutdown_for_test(self: &Arc<Self>) {
        self.clone().finish_shutdown().await;
    }

    #[cfg(test)]
    pub fn is_finishing(&self) -> bool {
        self.finishing.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "shutdown handler panicked".to_string()
    }
}
