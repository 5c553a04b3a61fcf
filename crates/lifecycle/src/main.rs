//! Aegis-Lifecycle: standalone probe-server demo
//!
//! Wires an [`Orchestrator`] up to the probe HTTP surface and a signal
//! handler. A real embedder registers its own HTTP server(s) via
//! `add_http_server`; this binary stands in a single always-listening
//! server so the probe endpoints have something to report on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use aegis_lifecycle::connection::ServerHandle;
use aegis_lifecycle::{Config, Orchestrator, ProbeHttpConfig};
use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Stand-in for the embedder's real acceptor loop: reports itself as
/// perpetually listening until `stop_listening` is called by the shutdown
/// sequencer's `force_close`.
struct DemoServer {
    listening: AtomicBool,
}

impl ServerHandle for DemoServer {
    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("aegis-lifecycle starting");
    info!(version = env!("CARGO_PKG_VERSION"), "version");

    let _metrics_handle = aegis_lifecycle::metrics::init_metrics();

    let config = Config::from_env();
    let orchestrator = Orchestrator::new(config);

    orchestrator.add_http_server(
        Arc::new(DemoServer {
            listening: AtomicBool::new(true),
        }),
        vec!["/api/probe/live".to_string()],
    );

    aegis_lifecycle::install_signal_handler(orchestrator.clone());

    let probe_config = ProbeHttpConfig::default();
    info!(port = probe_config.port, "probe HTTP surface listening");
    aegis_lifecycle::http::serve_probe_http(orchestrator, &probe_config).await?;

    Ok(())
}
