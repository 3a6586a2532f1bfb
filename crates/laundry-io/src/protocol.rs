use laundry_core::{
    unix_ms, Action, BoardEvent, ChangeCause, Machine, MachineId, MachineKind, MachineStatus,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::v1()
    }
}

/// One machine as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineView {
    pub id: MachineId,
    pub kind: MachineKind,
    pub status: MachineStatus,
    pub remaining_minutes: u32,
    pub label: String,
    pub offered_action: Option<Action>,
}

impl From<&Machine> for MachineView {
    fn from(machine: &Machine) -> Self {
        Self {
            id: machine.id(),
            kind: machine.kind(),
            status: machine.status(),
            remaining_minutes: machine.remaining_minutes(),
            label: machine.label(),
            offered_action: machine.offered_action(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SnapshotMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    /// Sequence of the last event already reflected in `machines`.
    pub sequence: u64,
    pub unix_ms: u64,
    pub machines: Vec<MachineView>,
}

impl SnapshotMsg {
    pub fn new(sequence: u64, machines: &[Machine]) -> Self {
        Self {
            msg_type: "snapshot",
            protocol_version: ProtocolVersion::v1(),
            sequence,
            unix_ms: unix_ms(),
            machines: machines.iter().map(MachineView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub sequence: u64,
    pub unix_ms: u64,
    pub machine_id: MachineId,
    pub kind: MachineKind,
    pub cause: ChangeCause,
    pub from: MachineStatus,
    pub to: MachineStatus,
    pub remaining_minutes: u32,
}

impl From<&BoardEvent> for EventMsg {
    fn from(event: &BoardEvent) -> Self {
        let change = &event.change;
        Self {
            msg_type: "event",
            sequence: event.sequence,
            unix_ms: event.unix_ms,
            machine_id: change.id,
            kind: change.kind(),
            cause: change.cause,
            from: change.from.status(),
            to: change.to.status(),
            remaining_minutes: change.to.remaining_minutes(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HelloMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// A start / cancel / toggle_broken request. The id stays raw so a bad one
/// can be logged before it is dropped.
#[derive(Debug, Deserialize)]
pub struct CommandMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    pub machine_id: String,
}

impl CommandMsg {
    pub fn action(&self) -> Option<Action> {
        match self.msg_type.as_str() {
            "start" => Some(Action::Start),
            "cancel" => Some(Action::Cancel),
            "toggle_broken" => Some(Action::ToggleBroken),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum IncomingMessage {
    Hello(HelloMsg),
    Command(CommandMsg),
    List,
}

impl IncomingMessage {
    pub fn parse(line: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let msg_type = value.get("type")?.as_str()?;
        match msg_type {
            "hello" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::Hello),
            "start" | "cancel" | "toggle_broken" => serde_json::from_value(value)
                .ok()
                .map(IncomingMessage::Command),
            "list" => Some(IncomingMessage::List),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use laundry_core::MachineRegistry;

    #[test]
    fn snapshot_lists_machines_in_board_order() {
        let mut registry = MachineRegistry::default();
        registry.request_start(MachineId::washer(1).unwrap());
        let msg = SnapshotMsg::new(4, registry.list());
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["sequence"], 4);
        let machines = json["machines"].as_array().unwrap();
        assert_eq!(machines.len(), 7);
        assert_eq!(machines[0]["id"], "d1");
        assert_eq!(machines[3]["id"], "w1");
        assert_eq!(machines[3]["status"], "running");
        assert_eq!(machines[3]["remaining_minutes"], 50);
        assert_eq!(machines[3]["label"], "Washer 1");
        assert_eq!(machines[3]["offered_action"], "cancel");
        assert_eq!(machines[0]["offered_action"], "start");
    }

    #[test]
    fn command_maps_type_to_action() {
        match IncomingMessage::parse(r#"{"type":"toggle_broken","machine_id":"w3"}"#) {
            Some(IncomingMessage::Command(cmd)) => {
                assert_eq!(cmd.action(), Some(Action::ToggleBroken));
                assert!(cmd.protocol_version.is_supported());
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn ignores_garbage() {
        assert!(IncomingMessage::parse("not json").is_none());
        assert!(IncomingMessage::parse(r#"{"type":"reboot"}"#).is_none());
        assert!(IncomingMessage::parse(r#"{"type":"start"}"#).is_none());
        assert!(IncomingMessage::parse(r#"{"machine_id":"w1"}"#).is_none());
    }
}
