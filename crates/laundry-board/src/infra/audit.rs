//! Audit trail of machine status transitions.
//!
//! One JSON object per line. Countdown minutes are not recorded; every
//! status change and the process lifecycle are.

use laundry_core::{unix_ms, BoardEvent, ChangeCause, MachineId, MachineKind, MachineStatus};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Types of events that are logged in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A user started a cycle
    CycleStarted,
    /// A user cancelled a running cycle
    CycleCancelled,
    /// The countdown reached zero
    CycleFinished,
    MarkedBroken,
    Repaired,
    SystemStart,
    SystemShutdown,
}

impl AuditEventType {
    /// `None` for changes that are not audited.
    pub fn for_cause(cause: ChangeCause) -> Option<Self> {
        match cause {
            ChangeCause::CycleStarted => Some(Self::CycleStarted),
            ChangeCause::CycleCancelled => Some(Self::CycleCancelled),
            ChangeCause::CycleFinished => Some(Self::CycleFinished),
            ChangeCause::MarkedBroken => Some(Self::MarkedBroken),
            ChangeCause::Repaired => Some(Self::Repaired),
            ChangeCause::Countdown => None,
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Board event sequence, 0 for lifecycle entries
    pub sequence: u64,
    pub unix_ms: u64,
    pub event_type: AuditEventType,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionDetails {
    pub machine_id: MachineId,
    pub kind: MachineKind,
    pub from: MachineStatus,
    pub to: MachineStatus,
    pub remaining_minutes: u32,
}

/// Thread-safe audit logger that writes to a JSONL file
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLogger {
    /// The file is opened in append mode to preserve existing logs.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
        })
    }

    pub fn log(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("audit writer poisoned"))?;
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn log_lifecycle(
        &self,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> std::io::Result<()> {
        self.log(&AuditEntry {
            sequence: 0,
            unix_ms: unix_ms(),
            event_type,
            details,
        })
    }

    /// Returns `Ok(false)` when the event is not audited.
    pub fn log_board_event(&self, event: &BoardEvent) -> std::io::Result<bool> {
        let change = &event.change;
        let Some(event_type) = AuditEventType::for_cause(change.cause) else {
            return Ok(false);
        };
        let details = TransitionDetails {
            machine_id: change.id,
            kind: change.kind(),
            from: change.from.status(),
            to: change.to.status(),
            remaining_minutes: change.to.remaining_minutes(),
        };
        self.log(&AuditEntry {
            sequence: event.sequence,
            unix_ms: event.unix_ms,
            event_type,
            details: serde_json::to_value(details)?,
        })?;
        Ok(true)
    }
}
