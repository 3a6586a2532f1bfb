use crate::infra::audit::AuditLogger;
use laundry_core::{BoardError, BoardHandle, StatusCounts};
use laundry_io::metrics::{init_metrics, record_change, serve_metrics, set_status_counts};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Follows the board's event stream into metrics and the audit trail.
/// The thread ends when the board shuts down.
pub fn start_event_recorder(
    board: &BoardHandle,
    audit: Option<Arc<AuditLogger>>,
) -> Result<thread::JoinHandle<u64>, BoardError> {
    let subscription = board.subscribe()?;
    set_status_counts(StatusCounts::tally(&subscription.snapshot));

    Ok(thread::spawn(move || {
        let mut recorded = 0u64;
        while let Some(event) = subscription.recv() {
            let change = &event.change;
            record_change(change);
            if change.cause.is_status_change() {
                info!(
                    sequence = event.sequence,
                    machine_id = %change.id,
                    cause = change.cause.as_str(),
                    from = %change.from.status(),
                    to = %change.to.status(),
                    remaining_minutes = change.to.remaining_minutes(),
                    "Machine status changed"
                );
            }
            if let Some(logger) = &audit {
                if let Err(e) = logger.log_board_event(&event) {
                    warn!(error = %e, "Failed to write audit entry");
                }
            }
            recorded += 1;
        }
        recorded
    }))
}
