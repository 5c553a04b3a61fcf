//! Exception sink
//!
//! User-registered callbacks (ready-checks, shutdown-ready-checks, shutdown
//! handlers, state-change listeners) are invoked under an "all-settle"
//! discipline: run every entry in a list, wait for all, log per-entry
//! failures, never let one failure abort its peers. This module is the
//! shared logging surface those call sites report through.

use std::sync::Arc;

use parking_lot::RwLock;

/// Which registered handler list an [`ExceptionEvent`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    ReadyCheck,
    ShutdownReadyCheck,
    ShutdownHandler,
    StateChangeListener,
    ConnectionEvent,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadyCheck => "ready_check",
            Self::ShutdownReadyCheck => "shutdown_ready_check",
            Self::ShutdownHandler => "shutdown_handler",
            Self::StateChangeListener => "state_change_listener",
            Self::ConnectionEvent => "connection_event",
        }
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single handler failure, tagged with which list and index it came from.
#[derive(Debug, Clone)]
pub struct ExceptionEvent {
    pub kind: HandlerKind,
    pub index: usize,
    pub message: String,
}

impl ExceptionEvent {
    pub fn new(kind: HandlerKind, index: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            message: message.into(),
        }
    }
}

type SinkFn = dyn Fn(&ExceptionEvent) + Send + Sync;

/// Pluggable exception sink. The default emits a `tracing::error!`; callers
/// may layer additional behavior on top via [`ExceptionSink::set_handler`]
/// without losing the structured-logging default. Cloning an `ExceptionSink`
/// shares the same installed handler — every component the orchestrator
/// hands a clone to (server trackers, the phase machine, the sequencer)
/// observes a later `set_handler` call immediately, which is what lets
/// `Orchestrator::set_on_exception` replace the sink after those components
/// already hold their own clone.
#[derive(Clone)]
pub struct ExceptionSink {
    extra: Arc<RwLock<Option<Arc<SinkFn>>>>,
}

impl Default for ExceptionSink {
    fn default() -> Self {
        Self {
            extra: Arc::new(RwLock::new(None)),
        }
    }
}

impl ExceptionSink {
    /// Install an additional handler, invoked after the default log emission.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&ExceptionEvent) + Send + Sync + 'static,
    {
        let sink = Self::default();
        sink.set_handler(handler);
        sink
    }

    /// Replace the additional handler. Every clone of this sink observes
    /// the new handler on its next `emit`.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&ExceptionEvent) + Send + Sync + 'static,
    {
        *self.extra.write() = Some(Arc::new(handler));
    }

    pub fn emit(&self, event: ExceptionEvent) {
        tracing::error!(
            handler_kind = %event.kind,
            index = event.index,
            message = %event.message,
            "registered handler failed"
        );
        crate::metrics::record_handler_failure(event.kind.as_str());
        if let Some(extra) = self.extra.read().as_ref() {
            extra(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_sink_does_not_panic() {
        let sink = ExceptionSink::default();
        sink.emit(ExceptionEvent::new(HandlerKind::ReadyCheck, 0, "boom"));
    }

    #[test]
    fn custom_handler_receives_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let sink = ExceptionSink::with_handler(move |event| {
            assert_eq!(event.index, 2);
            assert_eq!(event.kind, HandlerKind::ShutdownHandler);
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        sink.emit(ExceptionEvent::new(HandlerKind::ShutdownHandler, 2, "db"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_handler_is_observed_by_existing_clones() {
        let sink = ExceptionSink::default();
        let clone = sink.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        sink.set_handler(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        clone.emit(ExceptionEvent::new(HandlerKind::ReadyCheck, 0, "x"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
