use laundry_core::{Action, Board, BoardConfig, MachineId, MachineRegistry};
use laundry_io::protocol::{EventMsg, IncomingMessage, ProtocolVersion, SnapshotMsg};

#[test]
fn parses_hello_message() {
    let raw = r#"{
        "type":"hello",
        "protocol_version":{"major":1,"minor":0},
        "client_id":"lobby-screen"
    }"#;

    let msg = IncomingMessage::parse(raw).expect("hello should parse");
    match msg {
        IncomingMessage::Hello(hello) => {
            assert!(hello.protocol_version.is_supported());
            assert_eq!(hello.client_id.as_deref(), Some("lobby-screen"));
        }
        _ => panic!("expected hello message"),
    }
}

#[test]
fn parses_start_command() {
    let raw = r#"{
        "type":"start",
        "protocol_version":{"major":1,"minor":2},
        "machine_id":"w2"
    }"#;

    let msg = IncomingMessage::parse(raw).expect("start should parse");
    match msg {
        IncomingMessage::Command(cmd) => {
            assert_eq!(cmd.action(), Some(Action::Start));
            assert_eq!(cmd.machine_id.parse::<MachineId>().ok(), MachineId::washer(2));
            assert!(cmd.protocol_version.is_supported());
        }
        _ => panic!("expected command message"),
    }
}

#[test]
fn missing_version_defaults_to_v1() {
    let msg = IncomingMessage::parse(r#"{"type":"cancel","machine_id":"d1"}"#).unwrap();
    match msg {
        IncomingMessage::Command(cmd) => {
            assert_eq!(cmd.protocol_version, ProtocolVersion::v1());
            assert_eq!(cmd.action(), Some(Action::Cancel));
        }
        _ => panic!("expected command message"),
    }
}

#[test]
fn parses_list_request() {
    assert!(matches!(
        IncomingMessage::parse(r#"{"type":"list"}"#),
        Some(IncomingMessage::List)
    ));
}

#[test]
fn event_message_shape() {
    let (board, _join) = Board::new(MachineRegistry::default(), BoardConfig::default()).spawn();
    let sub = board.subscribe().unwrap();
    board.request_start(MachineId::dryer(1).unwrap());
    let event = sub
        .recv_timeout(std::time::Duration::from_secs(5))
        .expect("start should publish");

    let json = serde_json::to_value(EventMsg::from(&event)).unwrap();
    assert_eq!(json["type"], "event");
    assert_eq!(json["sequence"], 1);
    assert_eq!(json["machine_id"], "d1");
    assert_eq!(json["kind"], "dryer");
    assert_eq!(json["cause"], "cycle_started");
    assert_eq!(json["from"], "available");
    assert_eq!(json["to"], "running");
    assert_eq!(json["remaining_minutes"], 55);
}

#[test]
fn snapshot_machine_fields() {
    let mut registry = MachineRegistry::default();
    let w1 = MachineId::washer(1).unwrap();
    registry.toggle_broken(w1);

    let msg = serde_json::to_value(SnapshotMsg::new(1, registry.list())).unwrap();
    let w1_view = msg["machines"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"] == "w1")
        .unwrap();

    let mut keys: Vec<&str> = w1_view
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        ["id", "kind", "label", "offered_action", "remaining_minutes", "status"]
    );
    assert_eq!(w1_view["label"], "Washer 1");
    assert!(w1_view["offered_action"].is_null());
}
