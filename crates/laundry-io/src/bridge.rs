use crate::metrics::{BRIDGE_CLIENTS, BRIDGE_COMMANDS, BRIDGE_INVALID_MESSAGES};
use crate::protocol::{EventMsg, IncomingMessage, SnapshotMsg};
use laundry_core::{BoardError, BoardEvent, BoardHandle, Machine, MachineId};
use serde::Serialize;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind_addr: String,
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7000".to_string(),
            poll_interval: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listener setup failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Board(#[from] BoardError),
}

/// Binds the listener and serves clients until `stop` is set.
pub fn run_bridge(
    board: BoardHandle,
    config: BridgeConfig,
    stop: Arc<AtomicBool>,
) -> Result<(), BridgeError> {
    let listener = TcpListener::bind(&config.bind_addr).map_err(|source| BridgeError::Bind {
        addr: config.bind_addr.clone(),
        source,
    })?;
    serve(listener, board, config, stop)
}

/// Serves clients on an already bound listener until `stop` is set.
pub fn serve(
    listener: TcpListener,
    board: BoardHandle,
    config: BridgeConfig,
    stop: Arc<AtomicBool>,
) -> Result<(), BridgeError> {
    listener.set_nonblocking(true)?;
    info!(addr = %listener.local_addr()?, "Bridge listening");

    let mut clients: Vec<thread::JoinHandle<()>> = Vec::new();
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!(client_addr = %addr, "Bridge client connected");
                let board = board.clone();
                let stop = Arc::clone(&stop);
                let poll_interval = config.poll_interval;
                clients.push(thread::spawn(move || {
                    BRIDGE_CLIENTS.inc();
                    if let Err(e) = serve_client(stream, addr, board, poll_interval, &stop) {
                        debug!(client_addr = %addr, error = %e, "Bridge client ended");
                    }
                    BRIDGE_CLIENTS.dec();
                    info!(client_addr = %addr, "Bridge client disconnected");
                }));
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(config.poll_interval);
            }
            Err(err) => {
                warn!(error = %err, "Bridge accept error");
                thread::sleep(config.poll_interval);
            }
        }
        clients.retain(|handle| !handle.is_finished());
    }

    for handle in clients {
        let _ = handle.join();
    }
    info!("Bridge stopped");
    Ok(())
}

struct ClientSession {
    addr: SocketAddr,
    client_id: Option<String>,
    outbox: Vec<u8>,
    /// Highest sequence the client has already seen, via snapshot or event.
    sent_through: u64,
}

impl ClientSession {
    fn queue<T: Serialize>(&mut self, msg: &T) {
        match serde_json::to_vec(msg) {
            Ok(line) => {
                self.outbox.extend_from_slice(&line);
                self.outbox.push(b'\n');
            }
            Err(e) => warn!(error = %e, "Failed to encode bridge message"),
        }
    }

    fn queue_snapshot(&mut self, sequence: u64, machines: &[Machine]) {
        self.queue(&SnapshotMsg::new(sequence, machines));
        self.sent_through = self.sent_through.max(sequence);
    }

    /// Queues an event unless an earlier snapshot already covers it.
    fn queue_event(&mut self, event: &BoardEvent) -> bool {
        if event.sequence <= self.sent_through {
            return false;
        }
        self.queue(&EventMsg::from(event));
        self.sent_through = event.sequence;
        true
    }
}

fn serve_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    board: BoardHandle,
    poll_interval: Duration,
    stop: &AtomicBool,
) -> Result<(), BridgeError> {
    stream.set_nonblocking(true)?;
    let subscription = board.subscribe()?;
    let mut session = ClientSession {
        addr,
        client_id: None,
        outbox: Vec::with_capacity(4096),
        sent_through: 0,
    };
    session.queue_snapshot(subscription.sequence, &subscription.snapshot);

    let mut recv_buf: Vec<u8> = Vec::with_capacity(4096);
    let mut temp = [0u8; 1024];

    while !stop.load(Ordering::Relaxed) {
        // Receive commands
        match stream.read(&mut temp) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                recv_buf.extend_from_slice(&temp[..n]);
                while let Some(pos) = recv_buf.iter().position(|b| *b == b'\n') {
                    let line = recv_buf.drain(..=pos).collect::<Vec<u8>>();
                    let Ok(text) = std::str::from_utf8(&line) else {
                        BRIDGE_INVALID_MESSAGES.inc();
                        continue;
                    };
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match IncomingMessage::parse(trimmed) {
                        Some(msg) => handle_incoming(msg, &board, &mut session)?,
                        None => {
                            BRIDGE_INVALID_MESSAGES.inc();
                            debug!(line = trimmed, "Ignoring unrecognized bridge line");
                        }
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }

        // Forward every change in order
        while let Some(event) = subscription.try_recv()? {
            session.queue_event(&event);
        }

        if !session.outbox.is_empty() {
            match stream.write(&session.outbox) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    session.outbox.drain(..n);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        }

        if session.outbox.is_empty() {
            thread::sleep(poll_interval);
        }
    }
    Ok(())
}

#[instrument(skip(msg, board, session), fields(client_addr = %session.addr, client_id))]
fn handle_incoming(
    msg: IncomingMessage,
    board: &BoardHandle,
    session: &mut ClientSession,
) -> Result<(), BridgeError> {
    if let Some(id) = &session.client_id {
        tracing::Span::current().record("client_id", id.as_str());
    }

    match msg {
        IncomingMessage::Hello(hello) => {
            if !hello.protocol_version.is_supported() {
                warn!(
                    major = hello.protocol_version.major,
                    minor = hello.protocol_version.minor,
                    "Unsupported protocol version"
                );
                return Ok(());
            }
            info!(client_id = ?hello.client_id, "Bridge handshake received");
            session.client_id = hello.client_id;
        }
        IncomingMessage::Command(cmd) => {
            if !cmd.protocol_version.is_supported() {
                warn!(
                    major = cmd.protocol_version.major,
                    minor = cmd.protocol_version.minor,
                    "Unsupported protocol version"
                );
                BRIDGE_INVALID_MESSAGES.inc();
                return Ok(());
            }
            let Some(action) = cmd.action() else {
                BRIDGE_INVALID_MESSAGES.inc();
                return Ok(());
            };
            let id = match cmd.machine_id.parse::<MachineId>() {
                Ok(id) => id,
                Err(e) => {
                    warn!(machine_id = %cmd.machine_id, error = %e, "Ignoring command for malformed id");
                    BRIDGE_INVALID_MESSAGES.inc();
                    return Ok(());
                }
            };
            debug!(%id, %action, "Forwarding command");
            BRIDGE_COMMANDS.inc();
            board.act(id, action);
        }
        IncomingMessage::List => {
            let (sequence, machines) = board.snapshot_with_sequence()?;
            session.queue_snapshot(sequence, &machines);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use laundry_core::{Board, BoardConfig, Change, ChangeCause, MachineRegistry, MachineState};
    use std::io::{BufRead, BufReader};
    use std::num::NonZeroU32;

    struct TestBridge {
        addr: SocketAddr,
        stop: Arc<AtomicBool>,
        join: Option<thread::JoinHandle<Result<(), BridgeError>>>,
    }

    impl TestBridge {
        fn start(board: BoardHandle) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let stop = Arc::new(AtomicBool::new(false));
            let stop_bridge = Arc::clone(&stop);
            let join = thread::spawn(move || {
                serve(listener, board, BridgeConfig::default(), stop_bridge)
            });
            Self {
                addr,
                stop,
                join: Some(join),
            }
        }
    }

    impl Drop for TestBridge {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Some(join) = self.join.take() {
                let _ = join.join();
            }
        }
    }

    fn read_json(reader: &mut BufReader<TcpStream>) -> serde_json::Value {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn streams_snapshot_then_events() {
        let (board, _join) = Board::new(MachineRegistry::default(), BoardConfig::default()).spawn();
        let bridge = TestBridge::start(board.clone());

        let mut stream = TcpStream::connect(bridge.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let snapshot = read_json(&mut reader);
        assert_eq!(snapshot["type"], "snapshot");
        assert_eq!(snapshot["machines"].as_array().unwrap().len(), 7);

        writeln!(stream, r#"{{"type":"hello","client_id":"front-desk"}}"#).unwrap();
        writeln!(stream, r#"{{"type":"start","machine_id":"d2"}}"#).unwrap();
        writeln!(stream, r#"{{"type":"start","machine_id":"zz"}}"#).unwrap();
        writeln!(stream, r#"{{"type":"toggle_broken","machine_id":"d2"}}"#).unwrap();
        writeln!(stream, r#"{{"type":"cancel","machine_id":"d2"}}"#).unwrap();

        let started = read_json(&mut reader);
        assert_eq!(started["type"], "event");
        assert_eq!(started["machine_id"], "d2");
        assert_eq!(started["cause"], "cycle_started");
        assert_eq!(started["remaining_minutes"], 55);

        // toggle_broken on a running dryer is ignored, so cancel comes next
        let cancelled = read_json(&mut reader);
        assert_eq!(cancelled["cause"], "cycle_cancelled");
        assert_eq!(cancelled["sequence"], started["sequence"].as_u64().unwrap() + 1);
        assert_eq!(cancelled["to"], "available");
    }

    #[test]
    fn list_returns_current_state() {
        let (board, _join) = Board::new(MachineRegistry::default(), BoardConfig::default()).spawn();
        board.toggle_broken(MachineId::washer(4).unwrap());
        let bridge = TestBridge::start(board.clone());

        let mut stream = TcpStream::connect(bridge.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let first = read_json(&mut reader);
        assert_eq!(first["machines"][6]["status"], "broken");

        writeln!(stream, r#"{{"type":"list"}}"#).unwrap();
        let again = read_json(&mut reader);
        assert_eq!(again["type"], "snapshot");
        assert_eq!(again["sequence"], 1);
        assert_eq!(again["machines"][6]["id"], "w4");
        assert!(again["machines"][6]["offered_action"].is_null());
    }

    fn countdown(sequence: u64, remaining: u32) -> BoardEvent {
        let running = |minutes| MachineState::Running {
            remaining_minutes: NonZeroU32::new(minutes).unwrap(),
        };
        BoardEvent {
            sequence,
            unix_ms: 0,
            change: Change {
                id: MachineId::washer(1).unwrap(),
                from: running(remaining + 1),
                to: running(remaining),
                cause: ChangeCause::Countdown,
            },
        }
    }

    fn sequences(outbox: &[u8]) -> Vec<u64> {
        outbox
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| {
                let value: serde_json::Value = serde_json::from_slice(line).unwrap();
                value["sequence"].as_u64().unwrap()
            })
            .collect()
    }

    #[test]
    fn events_covered_by_a_snapshot_are_skipped() {
        let mut session = ClientSession {
            addr: "127.0.0.1:9".parse().unwrap(),
            client_id: None,
            outbox: Vec::new(),
            sent_through: 0,
        };
        let registry = MachineRegistry::default();

        assert!(session.queue_event(&countdown(3, 40)));
        session.queue_snapshot(5, registry.list());
        assert!(!session.queue_event(&countdown(4, 39)));
        assert!(!session.queue_event(&countdown(5, 38)));
        assert!(session.queue_event(&countdown(6, 37)));

        assert_eq!(sequences(&session.outbox), [3, 5, 6]);
    }

    #[test]
    fn repeated_list_keeps_the_stream_monotonic() {
        let (board, _join) = Board::new(MachineRegistry::default(), BoardConfig::default()).spawn();
        let bridge = TestBridge::start(board.clone());

        let mut stream = TcpStream::connect(bridge.addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut last = read_json(&mut reader)["sequence"].as_u64().unwrap();

        for n in 1..=4u8 {
            writeln!(stream, r#"{{"type":"start","machine_id":"w{n}"}}"#).unwrap();
            writeln!(stream, r#"{{"type":"list"}}"#).unwrap();
        }

        let mut snapshots = 0;
        while snapshots < 4 {
            let msg = read_json(&mut reader);
            let sequence = msg["sequence"].as_u64().unwrap();
            if msg["type"] == "snapshot" {
                assert!(sequence >= last);
                snapshots += 1;
            } else {
                assert!(sequence > last);
            }
            last = sequence;
        }
        assert_eq!(last, 4);
    }
}
