//! Orchestrator configuration
//!
//! Read from environment variables per spec §6, with defaults matching the
//! original source. `connection_poll_ms` and `force_exit_grace_ms` have no
//! environment-variable surface upstream; they are exposed as plain struct
//! fields so an embedder can override them programmatically (e.g. in tests)
//! without environment variables.

use std::time::Duration;

/// Default readiness-probe interval, in seconds, used to derive
/// `phase1_duration_ms` when `READYPROBE_INTERVAL` is unset.
const DEFAULT_READYPROBE_INTERVAL_SECS: u64 = 30;
/// Default drain timeout, in seconds, used when `SHUTDOWN_TIMEOUT` is unset.
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 540;

/// Orchestrator-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Phase 1 (`ShutdownRequested`) duration: `1.5 * READYPROBE_INTERVAL * 1000`.
    pub phase1_duration_ms: u64,
    /// Hard deadline for phase 2 (`Draining`): `SHUTDOWN_TIMEOUT * 1000`.
    pub drain_timeout_ms: u64,
    /// How often the drain poll re-checks active connections and gates.
    pub connection_poll_ms: u64,
    /// Grace period between entering `Final` and the unconditional process exit.
    pub force_exit_grace_ms: u64,
    /// Whether an unrecoverable fault should exit the process immediately.
    pub dev_mode: bool,
}

impl Config {
    /// Build from environment variables, with the spec's defaults for any
    /// that are unset or unparsable.
    pub fn from_env() -> Self {
        let readyprobe_interval_secs = std::env::var("READYPROBE_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_READYPROBE_INTERVAL_SECS);

        let shutdown_timeout_secs = std::env::var("SHUTDOWN_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        let dev_mode = std::env::var("NODE_ENV")
            .map(|v| v != "production")
            .unwrap_or(true);

        Self {
            phase1_duration_ms: (readyprobe_interval_secs as f64 * 1.5 * 1000.0) as u64,
            drain_timeout_ms: shutdown_timeout_secs * 1000,
            connection_poll_ms: 1000,
            force_exit_grace_ms: 5000,
            dev_mode,
        }
    }

    pub fn phase1_duration(&self) -> Duration {
        Duration::from_millis(self.phase1_duration_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn connection_poll(&self) -> Duration {
        Duration::from_millis(self.connection_poll_ms)
    }

    pub fn force_exit_grace(&self) -> Duration {
        Duration::from_millis(self.force_exit_grace_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            phase1_duration_ms: (DEFAULT_READYPROBE_INTERVAL_SECS as f64 * 1.5 * 1000.0) as u64,
            drain_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_SECS * 1000,
            connection_poll_ms: 1000,
            force_exit_grace_ms: 5000,
            dev_mode: true,
        }
    }
}

/// Probe HTTP surface configuration: each path defaults per spec §6 and can
/// be set to an empty string to disable that endpoint entirely. `metrics_path`
/// is a supplement (not named in spec.md's probe table) exposing the
/// Prometheus text format the same way the teacher's `/metrics` route does.
#[derive(Debug, Clone)]
pub struct ProbeHttpConfig {
    pub port: u16,
    pub ready_path: String,
    pub live_path: String,
    pub test_path: String,
    pub metrics_path: String,
}

impl Default for ProbeHttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            ready_path: "/api/probe/ready".to_string(),
            live_path: "/api/probe/live".to_string(),
            test_path: "/api/probe/test".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}
