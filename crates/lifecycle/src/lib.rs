//! Aegis-Lifecycle
//!
//! Lifecycle orchestration for container-orchestrated network services:
//! startup/readiness/liveness probes, graceful shutdown, and connection
//! draining. This is the library crate that provides all public APIs; the
//! binary in `main.rs` is a thin demo wiring it up.

pub mod clock;
pub mod config;
pub mod connection;
pub mod exception;
pub mod http;
pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod probe;
pub mod shutdown;
pub mod signal;

pub use clock::{Clock, SystemClock, TimerHandle, VirtualClock};
pub use config::{Config, ProbeHttpConfig};
pub use connection::{ConnectionHandle, ConnectionId, RequestDecision, ServerHandle, ServerTracker, SocketKey};
pub use exception::{ExceptionEvent, ExceptionSink, HandlerKind};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use phase::Phase;
pub use probe::{Fault, ProbeResult};
pub use signal::install_signal_handler;
