//! Connection Tracker
//!
//! Per-server registry of live connections, each tagged idle, active, or
//! health-check. Gives the shutdown sequencer a reliable count of
//! connections that must drain before shutdown can complete, and enforces
//! graceful behavior on in-flight traffic once shutdown starts.
//!
//! The hosted server itself (the transport acceptor, the request/response
//! objects) is an external collaborator out of this crate's scope; this
//! module only requires two small capabilities of it, expressed as traits:
//! [`ServerHandle`] (is this server still listening, stop listening) and
//! [`ConnectionHandle`] (force-close this connection, optionally reject and
//! close it in response to an incoming request).

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::exception::{ExceptionEvent, ExceptionSink, HandlerKind};

/// Internal, tracker-scoped identifier for a tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// The caller's own identity for a socket (e.g. a file descriptor, or a
/// pointer-derived key) — distinct from [`ConnectionId`] so that a duplicate
/// `on_connection` call for the same underlying socket is idempotent: the
/// socket is looked up by `SocketKey`, and if already tracked its existing
/// `ConnectionId` is reused rather than reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketKey(pub u64);

/// Capability to force-close a tracked connection, and optionally to
/// reject-and-close it in response to an incoming request during shutdown.
pub trait ConnectionHandle: Send + Sync {
    /// Force-close the underlying connection immediately, regardless of
    /// in-flight state.
    fn destroy(&self);

    /// Write a synchronous `503` rejection with `body` and a hop-close
    /// directive, then destroy the connection once the response has
    /// flushed. The default just destroys immediately; adapters for a real
    /// server should override this to let the response flush first.
    fn reject_and_close(&self, body: &str) {
        let _ = body;
        self.destroy();
    }
}

/// Capability to query and stop a hosted server's listening socket.
pub trait ServerHandle: Send + Sync {
    fn is_listening(&self) -> bool;
    fn stop_listening(&self);
}

struct ConnectionRecord {
    id: ConnectionId,
    idle: bool,
    is_health_check: bool,
    handle: Arc<dyn ConnectionHandle>,
}

/// Outcome of a request-begin event, for callers that need to know whether
/// a request was admitted, rejected (shutdown in progress), or dropped
/// (socket unknown and no handle supplied to register it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Admitted,
    Rejected,
    Dropped,
}

/// Process-wide counter handing out the tracker ids used to label the
/// active-connections gauge, so each registered server reports separately.
static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(0);

/// Per-server registry of live connections.
pub struct ServerTracker {
    id: String,
    server: Arc<dyn ServerHandle>,
    health_check_urls: HashSet<String>,
    connections: Mutex<HashMap<SocketKey, ConnectionRecord>>,
    next_id: AtomicU64,
    is_shutting_down: AtomicBool,
    exceptions: ExceptionSink,
}

impl ServerTracker {
    pub fn new(
        server: Arc<dyn ServerHandle>,
        health_check_urls: HashSet<String>,
        exceptions: ExceptionSink,
    ) -> Self {
        let id = NEXT_TRACKER_ID.fetch_add(1, Ordering::SeqCst).to_string();
        Self {
            id,
            server,
            health_check_urls,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            is_shutting_down: AtomicBool::new(false),
            exceptions,
        }
    }

    /// Publish this tracker's current `active_connection_count` to the
    /// labeled Prometheus gauge. Called after every mutation that could
    /// change it; cheap relative to the lock already taken to mutate.
    fn publish_active_metric(&self) {
        crate::metrics::set_active_connections(&self.id, self.active_connection_count() as f64);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.server.is_listening()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn active_connection_count(&self) -> usize {
        self.connections
            .lock()
            .values()
            .filter(|r| !r.idle && !r.is_health_check)
            .count()
    }

    /// A new transport-level connection was accepted. Idempotent: calling
    /// this twice for the same `socket` reuses the id assigned the first
    /// time.
    pub fn on_connection(&self, socket: SocketKey, handle: Arc<dyn ConnectionHandle>) -> ConnectionId {
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(&socket) {
            return existing.id;
        }
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        connections.insert(
            socket,
            ConnectionRecord {
                id,
                idle: true,
                is_health_check: false,
                handle,
            },
        );
        id
    }

    /// An application request began on `socket`. `register_if_absent`, when
    /// supplied, is used to create a record on the fly if the socket has no
    /// existing one (mirrors "creating one if somehow absent"); if the
    /// socket is unknown and no handle is supplied, the event is logged and
    /// dropped.
    pub fn on_request_begin(
        &self,
        socket: SocketKey,
        url: &str,
        register_if_absent: Option<Arc<dyn ConnectionHandle>>,
    ) -> RequestDecision {
        let mut connections = self.connections.lock();
        if !connections.contains_key(&socket) {
            match register_if_absent {
                Some(handle) => {
                    let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
                    connections.insert(
                        socket,
                        ConnectionRecord {
                            id,
                            idle: true,
                            is_health_check: false,
                            handle,
                        },
                    );
                }
                None => {
                    self.exceptions.emit(ExceptionEvent::new(
                        HandlerKind::ConnectionEvent,
                        0,
                        format!("request begin for unknown socket {:?}, dropping", socket),
                    ));
                    return RequestDecision::Dropped;
                }
            }
        }

        let record = connections.get_mut(&socket).expect("just inserted or present");
        record.is_health_check = self.health_check_urls.contains(url);

        if self.is_shutting_down() && !record.is_health_check {
            let handle = record.handle.clone();
            connections.remove(&socket);
            drop(connections);
            handle.reject_and_close("Closing");
            self.publish_active_metric();
            return RequestDecision::Rejected;
        }

        record.idle = false;
        drop(connections);
        self.publish_active_metric();
        RequestDecision::Admitted
    }

    /// The in-flight request on `socket` finished. Marks the connection
    /// idle again; if shutdown is in progress, destroys it immediately to
    /// deny keepalive reuse.
    pub fn on_response_finish(&self, socket: SocketKey) {
        let handle = {
            let mut connections = self.connections.lock();
            let Some(record) = connections.get_mut(&socket) else {
                return;
            };
            record.idle = true;
            if self.is_shutting_down() {
                let handle = record.handle.clone();
                connections.remove(&socket);
                Some(handle)
            } else {
                None
            }
        };
        if let Some(handle) = handle {
            handle.destroy();
        }
        self.publish_active_metric();
    }

    /// `socket`'s close event fired; remove its record if present.
    pub fn on_close(&self, socket: SocketKey) {
        self.connections.lock().remove(&socket);
        self.publish_active_metric();
    }

    /// Enter phase 2: mark shutting down, then destroy and remove every
    /// currently-idle connection. Active connections are left to finish and
    /// will be destroyed on response-finish or force-close.
    pub fn request_shutdown(&self) {
        self.is_shutting_down.store(true, Ordering::SeqCst);
        let idle: Vec<(SocketKey, Arc<dyn ConnectionHandle>)> = {
            let mut connections = self.connections.lock();
            let idle_keys: Vec<SocketKey> = connections
                .iter()
                .filter(|(_, r)| r.idle)
                .map(|(k, _)| *k)
                .collect();
            idle_keys
                .into_iter()
                .map(|k| {
                    let record = connections.remove(&k).expect("key from this map");
                    (k, record.handle)
                })
                .collect()
        };
        debug!(count = idle.len(), "closing idle connections for drain");
        for (_, handle) in idle {
            handle.destroy();
        }
        self.publish_active_metric();
    }

    /// Enter phase 3: mark shutting down, stop listening if still
    /// listening, destroy every remaining connection unconditionally, and
    /// clear the registry.
    pub fn force_close(&self) {
        self.is_shutting_down.store(true, Ordering::SeqCst);
        if self.server.is_listening() {
            self.server.stop_listening();
        }
        let remaining: Vec<Arc<dyn ConnectionHandle>> = {
            let mut connections = self.connections.lock();
            let handles = connections.values().map(|r| r.handle.clone()).collect();
            connections.clear();
            handles
        };
        debug!(count = remaining.len(), "force-closing remaining connections");
        for handle in remaining {
            handle.destroy();
        }
        self.publish_active_metric();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    pub struct MockConnection {
        pub destroyed: Arc<StdAtomicBool>,
        pub rejected: Arc<StdAtomicBool>,
    }

    impl MockConnection {
        pub fn new() -> (Arc<dyn ConnectionHandle>, Arc<StdAtomicBool>, Arc<StdAtomicBool>) {
            let destroyed = Arc::new(StdAtomicBool::new(false));
            let rejected = Arc::new(StdAtomicBool::new(false));
            let handle: Arc<dyn ConnectionHandle> = Arc::new(Self {
                destroyed: destroyed.clone(),
                rejected: rejected.clone(),
            });
            (handle, destroyed, rejected)
        }
    }

    impl ConnectionHandle for MockConnection {
        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }

        fn reject_and_close(&self, _body: &str) {
            self.rejected.store(true, Ordering::SeqCst);
            self.destroy();
        }
    }

    pub struct MockServer {
        pub listening: Arc<StdAtomicBool>,
    }

    impl MockServer {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                listening: Arc::new(StdAtomicBool::new(true)),
            })
        }
    }

    impl ServerHandle for MockServer {
        fn is_listening(&self) -> bool {
            self.listening.load(Ordering::SeqCst)
        }

        fn stop_listening(&self) {
            self.listening.store(false, Ordering::SeqCst);
        }
    }
}
