//! Drain Poll Benchmark
//!
//! Measures the cost of the per-tick work the shutdown sequencer's drain
//! poll performs: summing active connections across registered server
//! trackers, and the connection-tracker bookkeeping that feeds it.

use aegis_lifecycle::{ConnectionHandle, ExceptionSink, ServerHandle, ServerTracker, SocketKey};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct NullConnection;
impl ConnectionHandle for NullConnection {
    fn destroy(&self) {}
}

struct NullServer {
    listening: AtomicBool,
}
impl ServerHandle for NullServer {
    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
    fn stop_listening(&self) {
        self.listening.store(false, Ordering::SeqCst);
    }
}

fn tracker_with_connections(active: usize, idle: usize, health_check: usize) -> ServerTracker {
    let server = Arc::new(NullServer {
        listening: AtomicBool::new(true),
    });
    let tracker = ServerTracker::new(server, HashSet::from(["/healthz".to_string()]), ExceptionSink::default());

    let mut socket = 0u64;
    for _ in 0..active {
        socket += 1;
        tracker.on_connection(SocketKey(socket), Arc::new(NullConnection));
        tracker.on_request_begin(SocketKey(socket), "/work", None);
    }
    for _ in 0..idle {
        socket += 1;
        tracker.on_connection(SocketKey(socket), Arc::new(NullConnection));
    }
    for _ in 0..health_check {
        socket += 1;
        tracker.on_connection(SocketKey(socket), Arc::new(NullConnection));
        tracker.on_request_begin(SocketKey(socket), "/healthz", None);
    }

    tracker
}

/// Benchmark counting active connections on a single, moderately busy tracker.
fn bench_active_connection_count(c: &mut Criterion) {
    let tracker = tracker_with_connections(200, 800, 50);

    c.bench_function("drain_poll/active_connection_count", |b| {
        b.iter(|| black_box(tracker.active_connection_count()))
    });
}

/// Benchmark summing active connections across many trackers, the exact
/// operation the drain poll performs once per tick.
fn bench_drain_poll_sum_across_trackers(c: &mut Criterion) {
    let trackers: Vec<ServerTracker> = (0..8)
        .map(|_| tracker_with_connections(25, 100, 5))
        .collect();

    let mut group = c.benchmark_group("drain_poll/sum_across_trackers");
    group.throughput(Throughput::Elements(trackers.len() as u64));
    group.bench_function("eight_trackers", |b| {
        b.iter(|| {
            let total: usize = trackers.iter().map(|t| t.active_connection_count()).sum();
            black_box(total)
        })
    });
    group.finish();
}

/// Benchmark the request-begin/finish pair under steady load, the hot path
/// while a tracker is neither shutting down nor draining.
fn bench_request_begin_finish_cycle(c: &mut Criterion) {
    let tracker = tracker_with_connections(0, 0, 0);
    tracker.on_connection(SocketKey(1), Arc::new(NullConnection));

    c.bench_function("drain_poll/request_begin_finish_cycle", |b| {
        b.iter(|| {
            tracker.on_request_begin(black_box(SocketKey(1)), "/work", None);
            tracker.on_response_finish(black_box(SocketKey(1)));
        })
    });
}

criterion_group!(
    benches,
    bench_active_connection_count,
    bench_drain_poll_sum_across_trackers,
    bench_request_begin_finish_cycle,
);

criterion_main!(benches);
