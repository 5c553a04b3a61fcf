//! Probe HTTP surface
//!
//! A small `axum::Router` exposing readiness, liveness, and a manual test
//! endpoint over the orchestrator's [`crate::probe::ProbeEvaluator`]. Each
//! path is independently configurable via [`crate::config::ProbeHttpConfig`]
//! and can be disabled by setting it to an empty string.

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use bytes::Bytes;
use futures_util::{FutureExt, stream};
use serde::Deserialize;

use crate::config::ProbeHttpConfig;
use crate::orchestrator::{Orchestrator, OrchestratorError};

/// Default wait, in milliseconds, for `/api/probe/test` when `t` is absent.
const DEFAULT_TEST_WAIT_MS: u64 = 10_000;

fn status_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "probe evaluation panicked".to_string()
    }
}

/// Plain-text body per spec §6: `200` carries exactly `"ready"`; any other
/// status carries one of the fixed reason strings, or — if evaluating
/// readiness itself panics — a `500 "Unexpected error: <detail>"` body. The
/// panic path is unreachable today (nothing in `ProbeEvaluator` can panic)
/// but is wired up for contract parity with spec §6's table.
async fn ready_handler(State(orch): State<Orchestrator>) -> (StatusCode, String) {
    match std::panic::AssertUnwindSafe(orch.check_readiness())
        .catch_unwind()
        .await
    {
        Ok((result, reason)) => (status_code(result.status_code), reason.to_string()),
        Err(panic) => {
            let detail = panic_message(&panic);
            tracing::error!(detail = %detail, "readiness evaluation panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Unexpected error: {detail}"),
            )
        }
    }
}

/// Plain-text body per spec §6: `200` carries exactly `"alive"`; `503`
/// carries `"Unrecoverable error: <msg>"`.
async fn live_handler(State(orch): State<Orchestrator>) -> (StatusCode, String) {
    let (result, message) = orch.check_liveness();
    (status_code(result.status_code), message)
}

#[derive(Deserialize)]
struct TestQuery {
    t: Option<u64>,
}

/// Manual long-poll endpoint operators use to exercise in-flight request
/// behaviour during a drain by hand: waits `t` ms (default 10s), streaming
/// a `Waiting for N ...` line up front and a `Done` line once the wait
/// elapses, so the response is only complete once the wait is over.
async fn test_handler(
    State(orch): State<Orchestrator>,
    Query(query): Query<TestQuery>,
) -> (StatusCode, Body) {
    let wait_ms = query.t.unwrap_or(DEFAULT_TEST_WAIT_MS);
    let clock = orch.clock();
    let waiting_line = format!("Waiting for {wait_ms} ...\n");

    let body_stream = stream::once(async move { Ok::<_, std::convert::Infallible>(Bytes::from(waiting_line)) })
        .chain(stream::once(async move {
            clock.sleep(Duration::from_millis(wait_ms)).await;
            Ok::<_, std::convert::Infallible>(Bytes::from_static(b"Done"))
        }));

    (StatusCode::OK, Body::from_stream(body_stream))
}

/// Renders the installed Prometheus recorder's text exposition, mirroring
/// the teacher's own `/metrics` route in `http_proxy.rs`.
async fn metrics_handler() -> (StatusCode, String) {
    match crate::metrics::get_metrics_handle() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::OK, "# metrics not initialized\n".to_string()),
    }
}

/// Build the probe router from `config`, wiring only the routes whose path
/// is non-empty.
pub fn probe_router(orchestrator: Orchestrator, config: &ProbeHttpConfig) -> Router {
    let mut router = Router::new();
    if !config.ready_path.is_empty() {
        router = router.route(&config.ready_path, get(ready_handler));
    }
    if !config.live_path.is_empty() {
        router = router.route(&config.live_path, get(live_handler));
    }
    if !config.test_path.is_empty() {
        router = router.route(&config.test_path, get(test_handler));
    }
    if !config.metrics_path.is_empty() {
        router = router.route(&config.metrics_path, get(metrics_handler));
    }
    router.with_state(orchestrator)
}

/// Bind `config.port` and serve the probe router until the listener errors
/// or the process exits. A bind/serve I/O failure is routed through
/// `aegis_common::AegisError` into `OrchestratorError::ProbeServe`, rather
/// than the adapter swallowing or re-stringifying it.
pub async fn serve_probe_http(
    orchestrator: Orchestrator,
    config: &ProbeHttpConfig,
) -> Result<(), OrchestratorError> {
    let router = probe_router(orchestrator, config);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(aegis_common::AegisError::from)?;
    axum::serve(listener, router)
        .await
        .map_err(aegis_common::AegisError::from)?;
    Ok(())
}
