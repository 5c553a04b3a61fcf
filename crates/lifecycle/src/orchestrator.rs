//! Orchestrator handle
//!
//! The single entry point an embedding application talks to: register
//! servers and hooks on it, then either call `start_shutdown` directly or
//! hand it to `install_signal_handler`. Internally it's a thin `Arc`-backed
//! wrapper gluing the five components in this crate (clock, phase machine,
//! connection trackers, probe evaluator, shutdown sequencer) together —
//! cloning an `Orchestrator` is cheap and every clone shares the same state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::connection::{ConnectionHandle, RequestDecision, ServerHandle, ServerTracker, SocketKey};
use crate::exception::ExceptionSink;
use crate::phase::{Phase, PhaseMachine};
use crate::probe::{AsyncCheck, Fault, ProbeEvaluator, ProbeResult};
use crate::shutdown::{ShutdownCallback, ShutdownSequencer};

/// Errors produced by this crate's own logic, distinct from user-callback
/// failures (which are recovered from internally and never surface here).
/// Currently only ever raised by [`crate::http::serve_probe_http`]'s bind/
/// serve I/O, wrapping the shared `aegis-common` error type.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("probe HTTP surface failed: {0}")]
    ProbeServe(#[from] aegis_common::AegisError),
}

/// Process-wide lifecycle orchestrator handle. Construct one with
/// [`Orchestrator::new`] and clone it into every task/handler that needs to
/// register hooks or query phase.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    clock: Arc<dyn Clock>,
    phase: Arc<PhaseMachine>,
    fault: Arc<Fault>,
    shutdown_requested: Arc<AtomicBool>,
    servers: Arc<Mutex<Vec<Arc<ServerTracker>>>>,
    ready_checks: Arc<Mutex<Vec<AsyncCheck>>>,
    shutdown_ready_checks: Arc<Mutex<Vec<AsyncCheck>>>,
    shutdown_callbacks: Arc<Mutex<Vec<ShutdownCallback>>>,
    exceptions: ExceptionSink,
    probe: ProbeEvaluator,
    sequencer: Arc<ShutdownSequencer>,
}

impl Orchestrator {
    /// Build a new orchestrator with the real system clock and the given
    /// configuration. Most callers want `Orchestrator::new(Config::from_env())`.
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Build with an explicit clock; used by tests to inject a [`crate::clock::VirtualClock`].
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let exceptions = ExceptionSink::default();
        let phase = Arc::new(PhaseMachine::new(exceptions.clone()));
        let fault = Arc::new(Fault::default());
        let shutdown_requested = Arc::new(AtomicBool::new(false));
        let servers: Arc<Mutex<Vec<Arc<ServerTracker>>>> = Arc::new(Mutex::new(Vec::new()));
        let ready_checks: Arc<Mutex<Vec<AsyncCheck>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown_ready_checks: Arc<Mutex<Vec<AsyncCheck>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown_callbacks: Arc<Mutex<Vec<ShutdownCallback>>> = Arc::new(Mutex::new(Vec::new()));

        let probe = ProbeEvaluator::new(
            phase.clone(),
            fault.clone(),
            shutdown_requested.clone(),
            servers.clone(),
            ready_checks.clone(),
        );

        let sequencer = ShutdownSequencer::new(
            config.clone(),
            clock.clone(),
            phase.clone(),
            shutdown_requested.clone(),
            servers.clone(),
            shutdown_callbacks.clone(),
            shutdown_ready_checks.clone(),
            exceptions.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                phase,
                fault,
                shutdown_requested,
                servers,
                ready_checks,
                shutdown_ready_checks,
                shutdown_callbacks,
                exceptions,
                probe,
                sequencer,
            }),
        }
    }

    /// Register an HTTP server's tracker. `health_check_urls` are request
    /// paths that never count toward the active-connection drain total.
    pub fn add_http_server(
        &self,
        server: Arc<dyn ServerHandle>,
        health_check_urls: impl IntoIterator<Item = String>,
    ) -> Arc<ServerTracker> {
        let tracker = Arc::new(ServerTracker::new(
            server,
            health_check_urls.into_iter().collect(),
            self.inner.exceptions.clone(),
        ));
        self.inner.servers.lock().push(tracker.clone());
        tracker
    }

    /// Register a readiness predicate, consulted by both `is_ready` and
    /// `check_readiness` under the all-settle discipline.
    pub fn on_ready_check<F, Fut>(&self, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.inner
            .ready_checks
            .lock()
            .push(Arc::new(move || Box::pin(check())));
    }

    /// Register a gate consulted by the drain poll: while any gate reports
    /// `false`, the drain poll reschedules instead of finishing shutdown
    /// even with zero active connections.
    pub fn add_shutdown_ready_check<F, Fut>(&self, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.inner
            .shutdown_ready_checks
            .lock()
            .push(Arc::new(move || Box::pin(check())));
    }

    /// Register a handler invoked once, in registration order, when phase 3
    /// begins. Handlers run under the all-settle discipline: one failing
    /// never blocks its peers.
    pub fn on_shutdown<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .shutdown_callbacks
            .lock()
            .push(Arc::new(move || Box::pin(callback())));
    }

    /// Register a listener invoked `(new, old)` on every phase transition.
    pub fn on_state_change<F, Fut>(&self, listener: F)
    where
        F: Fn(Phase, Phase) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.phase.on_state_change(listener);
    }

    /// Install an additional exception handler, replacing any previously
    /// installed one. Every component already holding a clone of the
    /// internal sink (server trackers, phase machine, sequencer) observes
    /// the new handler on its next emitted event.
    pub fn set_on_exception<F>(&self, handler: F)
    where
        F: Fn(&crate::exception::ExceptionEvent) + Send + Sync + 'static,
    {
        self.inner.exceptions.set_handler(handler);
    }

    /// Latch an unrecoverable fault: liveness fails from this point on and
    /// never recovers. In `dev_mode`, exits the process immediately with
    /// code 1 so the failure is impossible to miss locally; in production
    /// the liveness probe is left to report it to the orchestrator so a
    /// supervised restart happens on its own schedule.
    pub fn set_unrecoverable_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(message = %message, "unrecoverable error, liveness will fail");
        self.inner.fault.set(message);
        if self.inner.config.dev_mode {
            std::process::exit(1);
        }
    }

    /// Begin graceful shutdown. A second call forces an immediate exit with
    /// code `-127` instead of re-running phase 1.
    pub async fn start_shutdown(&self) {
        self.inner.sequencer.start_shutdown().await;
    }

    pub fn current_phase(&self) -> Phase {
        self.inner.phase.current()
    }

    pub async fn is_ready(&self) -> bool {
        self.inner.probe.is_ready().await
    }

    pub async fn check_readiness(&self) -> (ProbeResult, &'static str) {
        self.inner.probe.check_readiness().await
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.probe.is_healthy()
    }

    pub fn check_liveness(&self) -> (ProbeResult, String) {
        self.inner.probe.check_liveness()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The clock backing this orchestrator's timers, so adapters (e.g. the
    /// probe HTTP surface's `/api/probe/test` endpoint) can suspend through
    /// the same abstraction rather than calling `tokio::time::sleep` directly.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    /// Forward a transport-level accept event to the named server's tracker.
    pub fn on_connection(
        &self,
        tracker: &Arc<ServerTracker>,
        socket: SocketKey,
        handle: Arc<dyn ConnectionHandle>,
    ) {
        tracker.on_connection(socket, handle);
    }

    /// Forward a request-begin event to the named server's tracker.
    pub fn on_request_begin(
        &self,
        tracker: &Arc<ServerTracker>,
        socket: SocketKey,
        url: &str,
        register_if_absent: Option<Arc<dyn ConnectionHandle>>,
    ) -> RequestDecision {
        tracker.on_request_begin(socket, url, register_if_absent)
    }
}
