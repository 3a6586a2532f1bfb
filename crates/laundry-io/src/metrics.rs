//! Prometheus metrics for the laundry board.
//!
//! Status gauges mirror the registry; transition counters are fed from the
//! board's event stream.

use laundry_core::{tags, Change, ChangeCause, MachineStatus, StatusCounts};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Machine Status Metrics
// ============================================================================

pub static MACHINES_AVAILABLE: LazyLock<IntGauge> =
    LazyLock::new(|| status_gauge(tags::MACHINES_AVAILABLE));

pub static MACHINES_RUNNING: LazyLock<IntGauge> =
    LazyLock::new(|| status_gauge(tags::MACHINES_RUNNING));

pub static MACHINES_BROKEN: LazyLock<IntGauge> =
    LazyLock::new(|| status_gauge(tags::MACHINES_BROKEN));

fn status_gauge(tag: tags::Tag) -> IntGauge {
    let gauge = IntGauge::new(tag.metric, tag.help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
}

// ============================================================================
// Transition Metrics
// ============================================================================

/// Status transitions by cause and machine kind
pub static TRANSITIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "laundry_transitions_total",
            "Machine status transitions by cause and kind",
        ),
        &["cause", "kind"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Minutes counted down across all machines
pub static COUNTDOWN_MINUTES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "laundry_countdown_minutes_total",
        "Simulated cycle minutes counted down across all machines",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

// ============================================================================
// Bridge Metrics
// ============================================================================

/// Connected bridge clients
pub static BRIDGE_CLIENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("laundry_bridge_clients", "Connected bridge clients").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Commands forwarded to the board
pub static BRIDGE_COMMANDS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "laundry_bridge_commands_total",
        "Start/cancel/toggle commands forwarded to the board",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Lines that were not valid protocol messages
pub static BRIDGE_INVALID_MESSAGES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "laundry_bridge_invalid_messages_total",
        "Bridge lines dropped as malformed or unsupported",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// 1 once the board has published its first status counts
pub static BOARD_UP: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new("laundry_board_up", "Board status published (1=up)").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

fn gauge_for(status: MachineStatus) -> &'static IntGauge {
    match status {
        MachineStatus::Available => &MACHINES_AVAILABLE,
        MachineStatus::Running => &MACHINES_RUNNING,
        MachineStatus::Broken => &MACHINES_BROKEN,
    }
}

/// Reset the status gauges from a full snapshot.
pub fn set_status_counts(counts: StatusCounts) {
    for status in [
        MachineStatus::Available,
        MachineStatus::Running,
        MachineStatus::Broken,
    ] {
        gauge_for(status).set(counts.get(status) as i64);
    }
    BOARD_UP.set(1);
}

/// Apply one change to the gauges and counters.
pub fn record_change(change: &Change) {
    if change.cause == ChangeCause::Countdown {
        COUNTDOWN_MINUTES.inc();
        return;
    }
    if change.cause == ChangeCause::CycleFinished {
        COUNTDOWN_MINUTES.inc();
    }
    TRANSITIONS
        .with_label_values(&[change.cause.as_str(), change.kind().as_str()])
        .inc();

    let (from, to) = (change.from.status(), change.to.status());
    if from != to {
        gauge_for(from).dec();
        gauge_for(to).inc();
    }
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            let response = match request.url() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        Response::from_string("Internal Server Error").with_status_code(500)
                    } else {
                        let mut response = Response::from_data(buffer);
                        if let Ok(header) = tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/plain; version=0.0.4"[..],
                        ) {
                            response.add_header(header);
                        }
                        response
                    }
                }
                "/health" => Response::from_string("OK").with_status_code(200),
                "/ready" if BOARD_UP.get() > 0 => {
                    Response::from_string("Ready").with_status_code(200)
                }
                "/ready" => Response::from_string("Not Ready").with_status_code(503),
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = MACHINES_AVAILABLE.get();
    let _ = MACHINES_RUNNING.get();
    let _ = MACHINES_BROKEN.get();
    let _ = COUNTDOWN_MINUTES.get();
    let _ = BRIDGE_CLIENTS.get();
    let _ = BRIDGE_COMMANDS.get();
    let _ = BRIDGE_INVALID_MESSAGES.get();
    let _ = BOARD_UP.get();
    LazyLock::force(&TRANSITIONS);
}
