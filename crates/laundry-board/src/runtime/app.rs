use crate::infra::audit::{AuditEventType, AuditLogger};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use laundry_core::{Board, BoardConfig, BoardStats, MachineRegistry};
use laundry_io::bridge::{run_bridge, BridgeConfig};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

pub fn run_from_args() {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return;
    }
    run(config);
}

pub fn run(config: RuntimeConfig) {
    // Initialize tracing
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());

    // Initialize metrics
    telemetry::init();

    // Start metrics server if enabled
    let metrics_enabled = config.metrics_addr.is_some();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let audit_logger = match config.audit_path.as_deref().map(init_audit_logger) {
        Some(Ok(logger)) => Some(logger),
        Some(Err(e)) => {
            error!(error = %e, "Audit logging requested but failed to initialize");
            return;
        }
        None => None,
    };

    let layout = config.layout();
    info!(
        dryers = layout.dryers,
        washers = layout.washers,
        tick_ms = config.tick_ms,
        "Starting laundry board"
    );

    let registry = MachineRegistry::new(layout);
    let (board, board_thread) = Board::new(
        registry,
        BoardConfig {
            tick_interval: config.tick_interval(),
        },
    )
    .spawn();

    if let Some(ref logger) = audit_logger {
        let _ = logger.log_lifecycle(
            AuditEventType::SystemStart,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "dryers": layout.dryers,
                "washers": layout.washers,
                "tick_ms": config.tick_ms,
                "bridge_enabled": config.bridge_enabled,
                "metrics_enabled": metrics_enabled,
            }),
        );
    }

    let recorder = match telemetry::start_event_recorder(&board, audit_logger.clone()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Event recorder not started");
            None
        }
    };

    let clock = if config.clock_enabled {
        match board.start_clock() {
            Ok(guard) => guard,
            Err(e) => {
                error!(error = %e, "Failed to start countdown clock");
                None
            }
        }
    } else {
        info!("Countdown clock disabled");
        None
    };

    let stop = Arc::new(AtomicBool::new(false));

    let bridge_handle = if config.bridge_enabled {
        let board_bridge = board.clone();
        let stop_bridge = Arc::clone(&stop);
        let bridge_config = BridgeConfig {
            bind_addr: config.bind_addr.clone(),
            ..Default::default()
        };
        info!(addr = %bridge_config.bind_addr, "Starting bridge");
        Some(thread::spawn(move || {
            if let Err(e) = run_bridge(board_bridge, bridge_config, stop_bridge) {
                error!(error = %e, "Bridge failed");
            }
        }))
    } else {
        info!("Bridge disabled");
        None
    };

    info!("Laundry board running. Connect a client to the bridge to follow machines.");

    match (config.run_seconds, bridge_handle) {
        (Some(seconds), bridge_handle) => {
            info!(seconds, "Running for limited duration");
            thread::sleep(Duration::from_secs(seconds));
            stop.store(true, Ordering::Relaxed);
            if let Some(handle) = bridge_handle {
                let _ = handle.join();
            }
        }
        // The bridge only returns on failure; shut the board down with it.
        (None, Some(handle)) => {
            let _ = handle.join();
            warn!("Bridge exited, shutting down");
            stop.store(true, Ordering::Relaxed);
        }
        // Serves until the process is killed.
        (None, None) => loop {
            thread::park();
        },
    }

    if let Some(guard) = clock {
        if let Err(e) = guard.stop() {
            warn!(error = %e, "Countdown clock already gone");
        }
    }
    board.shutdown();

    let stats = board_thread.join().unwrap_or_else(|_| {
        error!("Board thread panicked");
        BoardStats::default()
    });
    let recorded = recorder
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default();

    info!(
        ticks = stats.ticks,
        late_ticks = stats.late_ticks,
        changes = stats.changes,
        rejected_requests = stats.rejected_requests,
        recorded,
        "Run complete"
    );

    // Log shutdown
    if let Some(ref logger) = audit_logger {
        let _ = logger.log_lifecycle(
            AuditEventType::SystemShutdown,
            serde_json::json!({
                "ticks": stats.ticks,
                "changes": stats.changes,
                "rejected_requests": stats.rejected_requests,
            }),
        );
    }
}

fn init_audit_logger(path: &Path) -> std::io::Result<Arc<AuditLogger>> {
    let logger = AuditLogger::new(path)?;
    info!(path = %path.display(), "Audit logging enabled");
    Ok(Arc::new(logger))
}
