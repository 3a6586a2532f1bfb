pub mod bridge;
pub mod metrics;
pub mod protocol;

pub use bridge::{run_bridge, serve, BridgeConfig, BridgeError};
pub use metrics::{init_metrics, record_change, serve_metrics, set_status_counts};
pub use protocol::{
    CommandMsg, EventMsg, HelloMsg, IncomingMessage, MachineView, ProtocolVersion, SnapshotMsg,
};
