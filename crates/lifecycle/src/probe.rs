//! Probe Evaluator
//!
//! Pure-ish functions (state + trackers + user checks + fault flag) →
//! readiness/liveness result. Both operations are safe to call
//! concurrently with each other and with a phase transition.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::connection::ServerTracker;
use crate::phase::{Phase, PhaseMachine};

/// A user-supplied async predicate, e.g. "are my database connections
/// warmed up". Registered via `Orchestrator::on_ready_check` /
/// `add_shutdown_ready_check`.
pub type AsyncCheck = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// Wraps a fallible user check so a panic is treated the same as `false`
/// (the all-settle discipline: a check throwing is downgraded to a failed
/// result, never propagated). Shared with the shutdown sequencer's drain
/// poll, which runs shutdown-ready checks under the same discipline.
pub(crate) async fn run_check_settled(check: &AsyncCheck) -> bool {
    use futures_util::FutureExt;
    match std::panic::AssertUnwindSafe(check()).catch_unwind().await {
        Ok(value) => value,
        Err(_) => false,
    }
}

/// Runs every check in `checks` concurrently and waits for all of them
/// (all-settle), returning `true` iff every one resolved `true`. Unlike a
/// short-circuiting `for` loop, this never skips a check just because an
/// earlier one already failed — matching spec's "run every readyCheck
/// concurrently, all-settle" wording for both the readiness gate and the
/// shutdown-ready gate.
pub(crate) async fn all_checks_pass(checks: &[AsyncCheck]) -> bool {
    let futures = checks.iter().map(run_check_settled);
    futures_util::future::join_all(futures)
        .await
        .into_iter()
        .all(|passed| passed)
}

/// The readiness/liveness decision shape fixed by the probe HTTP surface,
/// so framework adapters need no translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub ready_or_healthy: bool,
    pub status_code: u16,
}

impl ProbeResult {
    pub fn ok_200() -> Self {
        Self {
            ready_or_healthy: true,
            status_code: 200,
        }
    }

    pub fn unavailable_503() -> Self {
        Self {
            ready_or_healthy: false,
            status_code: 503,
        }
    }
}

/// A one-way latch: once set, never cleared. `fault.is_some()` makes
/// liveness fail forever after.
#[derive(Default)]
pub struct Fault {
    message: Mutex<Option<String>>,
}

impl Fault {
    pub fn set(&self, message: impl Into<String>) {
        let mut guard = self.message.lock();
        if guard.is_none() {
            *guard = Some(message.into());
        }
    }

    pub fn get(&self) -> Option<String> {
        self.message.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.message.lock().is_some()
    }
}

/// Derives readiness/liveness answers from current orchestrator state. Holds
/// only references to the state it reads; it owns no state of its own
/// beyond the bookkeeping required to run user checks concurrently.
pub struct ProbeEvaluator {
    phase: Arc<PhaseMachine>,
    fault: Arc<Fault>,
    shutdown_requested: Arc<AtomicBool>,
    servers: Arc<Mutex<Vec<Arc<ServerTracker>>>>,
    ready_checks: Arc<Mutex<Vec<AsyncCheck>>>,
}

impl ProbeEvaluator {
    pub fn new(
        phase: Arc<PhaseMachine>,
        fault: Arc<Fault>,
        shutdown_requested: Arc<AtomicBool>,
        servers: Arc<Mutex<Vec<Arc<ServerTracker>>>>,
        ready_checks: Arc<Mutex<Vec<AsyncCheck>>>,
    ) -> Self {
        Self {
            phase,
            fault,
            shutdown_requested,
            servers,
            ready_checks,
        }
    }

    /// Boolean readiness decision. Has the side effect of advancing
    /// `Startup -> Running` on a successful evaluation, which is safe
    /// because a true result already implies `!shutdown_requested`.
    pub async fn is_ready(&self) -> bool {
        if self.fault.is_set() || self.shutdown_requested.load(Ordering::SeqCst) {
            return false;
        }

        let servers = self.servers.lock().clone();
        if servers.is_empty() {
            return false;
        }

        let checks = self.ready_checks.lock().clone();
        if !all_checks_pass(&checks).await {
            return false;
        }

        if servers.iter().any(|s| !s.is_listening()) {
            return false;
        }

        if self.phase.current() == Phase::Startup {
            self.phase.update_phase(Phase::Running).await;
        }

        true
    }

    /// Readiness decision plus the fixed reason/status-code shape the HTTP
    /// surface needs, without re-deriving the decision twice.
    pub async fn check_readiness(&self) -> (ProbeResult, &'static str) {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return (ProbeResult::unavailable_503(), "Service is closing");
        }
        if self.fault.is_set() {
            return (ProbeResult::unavailable_503(), "Server not ready");
        }

        let servers = self.servers.lock().clone();
        if servers.is_empty() {
            return (ProbeResult::unavailable_503(), "Server not ready");
        }

        let checks = self.ready_checks.lock().clone();
        if !all_checks_pass(&checks).await {
            return (ProbeResult::unavailable_503(), "Ready check(s) failed");
        }

        if servers.iter().any(|s| !s.is_listening()) {
            return (ProbeResult::unavailable_503(), "HTTP server not ready");
        }

        if self.phase.current() == Phase::Startup {
            self.phase.update_phase(Phase::Running).await;
        }

        (ProbeResult::ok_200(), "ready")
    }

    /// Boolean liveness decision: healthy iff no fault has ever been set.
    pub fn is_healthy(&self) -> bool {
        !self.fault.is_set()
    }

    /// Liveness decision plus message.
    pub fn check_liveness(&self) -> (ProbeResult, String) {
        match self.fault.get() {
            None => (ProbeResult::ok_200(), "alive".to_string()),
            Some(message) => (
                ProbeResult::unavailable_503(),
                format!("Unrecoverable error: {message}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::MockServer;
    use crate::connection::ServerTracker;
    use crate::exception::ExceptionSink;
    use std::collections::HashSet;

    fn make_evaluator() -> (
        ProbeEvaluator,
        Arc<AtomicBool>,
        Arc<Fault>,
        Arc<Mutex<Vec<Arc<ServerTracker>>>>,
        Arc<Mutex<Vec<AsyncCheck>>>,
    ) {
        let phase = Arc::new(PhaseMachine::new(ExceptionSink::default()));
        let fault = Arc::new(Fault::default());
        let shutdown_requested = Arc::new(AtomicBool::new(false));
        let servers = Arc::new(Mutex::new(Vec::new()));
        let ready_checks = Arc::new(Mutex::new(Vec::new()));
        let evaluator = ProbeEvaluator::new(
            phase,
            fault.clone(),
            shutdown_requested.clone(),
            servers.clone(),
            ready_checks.clone(),
        );
        (evaluator, shutdown_requested, fault, servers, ready_checks)
    }

    #[tokio::test]
    async fn not_ready_with_no_servers() {
        let (eval, ..) = make_evaluator();
        assert!(!eval.is_ready().await);
    }

    #[tokio::test]
    async fn ready_when_server_listening_and_checks_pass() {
        let (eval, _, _, servers, ready_checks) = make_evaluator();
        servers.lock().push(Arc::new(ServerTracker::new(
            MockServer::new(),
            HashSet::new(),
            ExceptionSink::default(),
        )));
        ready_checks
            .lock()
            .push(Arc::new(|| Box::pin(async { true })));

        assert!(eval.is_ready().await);
    }

    #[tokio::test]
    async fn shutdown_requested_forces_not_ready() {
        let (eval, shutdown_requested, _, servers, _) = make_evaluator();
        servers.lock().push(Arc::new(ServerTracker::new(
            MockServer::new(),
            HashSet::new(),
            ExceptionSink::default(),
        )));
        shutdown_requested.store(true, Ordering::SeqCst);

        assert!(!eval.is_ready().await);
        let (result, reason) = eval.check_readiness().await;
        assert_eq!(result.status_code, 503);
        assert_eq!(reason, "Service is closing");
    }

    #[tokio::test]
    async fn failing_ready_check_yields_503_with_reason() {
        let (eval, _, _, servers, ready_checks) = make_evaluator();
        servers.lock().push(Arc::new(ServerTracker::new(
            MockServer::new(),
            HashSet::new(),
            ExceptionSink::default(),
        )));
        ready_checks
            .lock()
            .push(Arc::new(|| Box::pin(async { false })));

        let (result, reason) = eval.check_readiness().await;
        assert_eq!(result.status_code, 503);
        assert_eq!(reason, "Ready check(s) failed");
    }

    #[tokio::test]
    async fn panicking_ready_check_is_downgraded_to_failure() {
        let (eval, _, _, servers, ready_checks) = make_evaluator();
        servers.lock().push(Arc::new(ServerTracker::new(
            MockServer::new(),
            HashSet::new(),
            ExceptionSink::default(),
        )));
        ready_checks
            .lock()
            .push(Arc::new(|| Box::pin(async { panic!("boom") })));

        assert!(!eval.is_ready().await);
    }

    #[tokio::test]
    async fn server_not_listening_yields_not_ready() {
        let (eval, _, _, servers, _) = make_evaluator();
        let server = MockServer::new();
        server.listening.store(false, Ordering::SeqCst);
        servers
            .lock()
            .push(Arc::new(ServerTracker::new(
                server,
                HashSet::new(),
                ExceptionSink::default(),
            )));

        let (result, reason) = eval.check_readiness().await;
        assert_eq!(result.status_code, 503);
        assert_eq!(reason, "HTTP server not ready");
    }

    #[test]
    fn fault_latches_and_liveness_never_recovers() {
        let (eval, .., fault, _, _) = make_evaluator();
        assert!(eval.is_healthy());
        fault.set("db connection pool exhausted");
        assert!(!eval.is_healthy());
        fault.set("a different later error");
        let (result, message) = eval.check_liveness();
        assert_eq!(result.status_code, 503);
        assert_eq!(message, "Unrecoverable error: db connection pool exhausted");
    }
}
