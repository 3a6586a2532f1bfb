use crate::clock::{unix_ms, CycleClock, DEFAULT_TICK_INTERVAL};
use crate::machine::{Action, Change, Machine, MachineId};
use crate::registry::MachineRegistry;
use log::{debug, info};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct BoardConfig {
    pub tick_interval: Duration,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct BoardStats {
    pub ticks: u64,
    pub late_ticks: u64,
    pub changes: u64,
    pub rejected_requests: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("board is no longer running")]
    Disconnected,
}

/// One published change. Sequence numbers start at 1 and have no gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardEvent {
    pub sequence: u64,
    pub unix_ms: u64,
    pub change: Change,
}

/// A snapshot plus every change published after it, in order.
pub struct Subscription {
    pub snapshot: Vec<Machine>,
    /// Sequence of the last event already reflected in `snapshot`.
    pub sequence: u64,
    events: Receiver<BoardEvent>,
}

impl Subscription {
    /// Blocks until the next event; `None` once the board has shut down.
    pub fn recv(&self) -> Option<BoardEvent> {
        self.events.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<BoardEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// `Ok(None)` when nothing is pending, `Err` once the board is gone.
    pub fn try_recv(&self) -> Result<Option<BoardEvent>, BoardError> {
        match self.events.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BoardError::Disconnected),
        }
    }
}

enum Command {
    Act { id: MachineId, action: Action },
    Snapshot(Sender<(u64, Vec<Machine>)>),
    Subscribe(Sender<Subscription>),
    StartClock(Sender<bool>),
    StopClock(Sender<bool>),
    Shutdown,
}

/// Cloneable front door to a running board.
///
/// Commands from one handle are applied in the order they were sent, so a
/// `snapshot` issued after `request_start` always reflects it.
#[derive(Clone)]
pub struct BoardHandle {
    tx: Sender<Command>,
}

impl BoardHandle {
    pub fn request_start(&self, id: MachineId) {
        self.act(id, Action::Start);
    }

    pub fn request_cancel(&self, id: MachineId) {
        self.act(id, Action::Cancel);
    }

    pub fn toggle_broken(&self, id: MachineId) {
        self.act(id, Action::ToggleBroken);
    }

    /// Fire-and-forget; a stopped board drops the request like any other no-op.
    pub fn act(&self, id: MachineId, action: Action) {
        let _ = self.tx.send(Command::Act { id, action });
    }

    pub fn snapshot(&self) -> Result<Vec<Machine>, BoardError> {
        self.snapshot_with_sequence().map(|(_, machines)| machines)
    }

    /// Current machines plus the sequence of the last change they reflect.
    /// Registers nothing on the board, unlike `subscribe`.
    pub fn snapshot_with_sequence(&self) -> Result<(u64, Vec<Machine>), BoardError> {
        self.call(Command::Snapshot)
    }

    pub fn subscribe(&self) -> Result<Subscription, BoardError> {
        self.call(Command::Subscribe)
    }

    /// Starts the countdown. `Ok(None)` when it is already running, so the
    /// tick rate never doubles.
    pub fn start_clock(&self) -> Result<Option<ClockGuard>, BoardError> {
        let started = self.call(Command::StartClock)?;
        Ok(started.then(|| ClockGuard {
            handle: self.clone(),
            active: true,
        }))
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    fn stop_clock(&self) -> Result<bool, BoardError> {
        self.call(Command::StopClock)
    }

    fn call<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, BoardError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| BoardError::Disconnected)?;
        reply_rx.recv().map_err(|_| BoardError::Disconnected)
    }
}

/// Keeps the countdown running. Stopping or dropping it returns only after
/// the board has stopped the clock, so no tick is observed afterwards.
#[must_use = "dropping the guard stops the clock"]
pub struct ClockGuard {
    handle: BoardHandle,
    active: bool,
}

impl ClockGuard {
    pub fn stop(mut self) -> Result<(), BoardError> {
        self.active = false;
        self.handle.stop_clock().map(|_| ())
    }
}

impl Drop for ClockGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = self.handle.stop_clock();
        }
    }
}

/// Serialized event loop owning the registry and the clock.
pub struct Board {
    registry: MachineRegistry,
    clock: CycleClock,
    subscribers: Vec<Sender<BoardEvent>>,
    sequence: u64,
    stats: BoardStats,
}

impl Board {
    pub fn new(registry: MachineRegistry, config: BoardConfig) -> Self {
        Self {
            registry,
            clock: CycleClock::new(config.tick_interval),
            subscribers: Vec::new(),
            sequence: 0,
            stats: BoardStats::default(),
        }
    }

    /// Runs the board on its own thread. The thread exits on `shutdown` or
    /// once every handle is dropped.
    pub fn spawn(self) -> (BoardHandle, thread::JoinHandle<BoardStats>) {
        let (tx, rx) = mpsc::channel();
        let join = thread::spawn(move || self.run(rx));
        (BoardHandle { tx }, join)
    }

    fn run(mut self, rx: Receiver<Command>) -> BoardStats {
        info!(
            "board running with {} machines, tick every {:?}",
            self.registry.len(),
            self.clock.interval()
        );

        loop {
            if self.clock.poll(Instant::now()) {
                self.tick();
            }

            let next = match self.clock.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Ok(cmd) => cmd,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };

            if !self.handle(next) {
                break;
            }
        }

        self.clock.stop();
        self.subscribers.clear();
        self.stats.late_ticks = self.clock.stats().late_ticks;
        info!("board stopped: {:?}", self.stats);
        self.stats
    }

    /// Returns false when the loop should exit.
    fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Act { id, action } => match self.registry.request(id, action) {
                Some(change) => self.publish(change),
                None => self.stats.rejected_requests += 1,
            },
            Command::Snapshot(reply) => {
                let _ = reply.send((self.sequence, self.registry.snapshot()));
            }
            Command::Subscribe(reply) => {
                let (tx, rx) = mpsc::channel();
                let subscription = Subscription {
                    snapshot: self.registry.snapshot(),
                    sequence: self.sequence,
                    events: rx,
                };
                if reply.send(subscription).is_ok() {
                    self.subscribers.push(tx);
                }
            }
            Command::StartClock(reply) => {
                let started = self.clock.start(Instant::now());
                if started {
                    info!("cycle clock started");
                }
                let _ = reply.send(started);
            }
            Command::StopClock(reply) => {
                if self.clock.stop() {
                    info!("cycle clock stopped");
                }
                let _ = reply.send(true);
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn tick(&mut self) {
        self.stats.ticks += 1;
        for change in self.registry.tick() {
            self.publish(change);
        }
    }

    fn publish(&mut self, change: Change) {
        self.sequence += 1;
        self.stats.changes += 1;
        debug!(
            "#{} {} {:?}: {} -> {} ({} min left)",
            self.sequence,
            change.id,
            change.cause,
            change.from.status(),
            change.to.status(),
            change.to.remaining_minutes()
        );

        let event = BoardEvent {
            sequence: self.sequence,
            unix_ms: unix_ms(),
            change,
        };
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{ChangeCause, MachineStatus};
    use crate::registry::FleetLayout;

    const WAIT: Duration = Duration::from_secs(5);

    fn w(n: u8) -> MachineId {
        MachineId::washer(n).unwrap()
    }

    fn d(n: u8) -> MachineId {
        MachineId::dryer(n).unwrap()
    }

    fn spawn(tick_interval: Duration) -> (BoardHandle, thread::JoinHandle<BoardStats>) {
        Board::new(MachineRegistry::default(), BoardConfig { tick_interval }).spawn()
    }

    fn status(handle: &BoardHandle, id: MachineId) -> (MachineStatus, u32) {
        let snapshot = handle.snapshot().unwrap();
        let m = snapshot.iter().find(|m| m.id() == id).unwrap();
        (m.status(), m.remaining_minutes())
    }

    #[test]
    fn requests_are_visible_to_the_next_read() {
        let (handle, join) = spawn(DEFAULT_TICK_INTERVAL);
        handle.request_start(w(1));
        handle.toggle_broken(w(2));
        handle.request_start(w(2));
        assert_eq!(status(&handle, w(1)), (MachineStatus::Running, 50));
        assert_eq!(status(&handle, w(2)), (MachineStatus::Broken, 0));

        handle.shutdown();
        let stats = join.join().unwrap();
        assert_eq!(stats.changes, 2);
        assert_eq!(stats.rejected_requests, 1);
        assert_eq!(stats.ticks, 0);
    }

    #[test]
    fn subscribers_see_every_change_in_order() {
        let (handle, _join) = spawn(DEFAULT_TICK_INTERVAL);
        handle.request_start(d(1));
        let sub = handle.subscribe().unwrap();
        assert_eq!(sub.sequence, 1);
        assert_eq!(sub.snapshot[0].status(), MachineStatus::Running);

        handle.request_cancel(d(1));
        handle.request_cancel(d(1));
        handle.toggle_broken(d(1));

        let first = sub.recv_timeout(WAIT).unwrap();
        assert_eq!(first.sequence, 2);
        assert_eq!(first.change.cause, ChangeCause::CycleCancelled);
        let second = sub.recv_timeout(WAIT).unwrap();
        assert_eq!(second.sequence, 3);
        assert_eq!(second.change.cause, ChangeCause::MarkedBroken);
        assert_eq!(sub.try_recv(), Ok(None));
    }

    #[test]
    fn clock_counts_a_cycle_down_to_available() {
        let board = Board::new(
            MachineRegistry::new(FleetLayout {
                dryers: 0,
                washers: 1,
            }),
            BoardConfig {
                tick_interval: Duration::from_millis(2),
            },
        );
        let (handle, _join) = board.spawn();
        let sub = handle.subscribe().unwrap();
        handle.request_start(w(1));
        let _clock = handle.start_clock().unwrap().expect("clock was idle");

        let mut expected_sequence = 1;
        let mut remaining = Vec::new();
        loop {
            let event = sub.recv_timeout(WAIT).expect("countdown stalled");
            assert_eq!(event.sequence, expected_sequence);
            expected_sequence += 1;
            remaining.push(event.change.to.remaining_minutes());
            if event.change.cause == ChangeCause::CycleFinished {
                break;
            }
        }
        let expected: Vec<u32> = (0..=50).rev().collect();
        assert_eq!(remaining, expected);
        assert_eq!(status(&handle, w(1)), (MachineStatus::Available, 0));
    }

    #[test]
    fn starting_twice_does_not_double_the_clock() {
        let (handle, _join) = spawn(DEFAULT_TICK_INTERVAL);
        let guard = handle.start_clock().unwrap();
        assert!(guard.is_some());
        assert!(handle.start_clock().unwrap().is_none());
        drop(guard);
        assert!(handle.start_clock().unwrap().is_some());
    }

    #[test]
    fn no_tick_after_stop() {
        let interval = Duration::from_millis(5);
        let (handle, _join) = spawn(interval);
        handle.request_start(d(2));
        let guard = handle.start_clock().unwrap().unwrap();
        thread::sleep(interval * 4);
        guard.stop().unwrap();

        let frozen = status(&handle, d(2));
        let sub = handle.subscribe().unwrap();
        thread::sleep(interval * 10);
        assert_eq!(status(&handle, d(2)), frozen);
        assert_eq!(sub.try_recv(), Ok(None));

        let _guard = handle.start_clock().unwrap().unwrap();
        let resumed = sub.recv_timeout(WAIT).expect("ticks resume after restart");
        assert_eq!(resumed.change.cause, ChangeCause::Countdown);
        assert_eq!(resumed.change.to.remaining_minutes(), frozen.1 - 1);
    }

    #[test]
    fn board_exits_when_handles_are_dropped() {
        let (handle, join) = spawn(DEFAULT_TICK_INTERVAL);
        let sub = handle.subscribe().unwrap();
        drop(handle);
        let stats = join.join().unwrap();
        assert_eq!(stats, BoardStats::default());
        assert!(sub.recv().is_none());
        assert_eq!(sub.try_recv(), Err(BoardError::Disconnected));
    }

    #[test]
    fn snapshots_do_not_register_subscribers() {
        let mut board = Board::new(MachineRegistry::default(), BoardConfig::default());
        board.handle(Command::Act {
            id: w(3),
            action: Action::Start,
        });
        for _ in 0..1000 {
            let (tx, rx) = mpsc::channel();
            assert!(board.handle(Command::Snapshot(tx)));
            let (sequence, machines) = rx.recv().unwrap();
            assert_eq!(sequence, 1);
            assert_eq!(machines.len(), 7);
        }
        assert!(board.subscribers.is_empty());

        let (tx, rx) = mpsc::channel();
        board.handle(Command::Subscribe(tx));
        let sub = rx.recv().unwrap();
        assert_eq!(sub.sequence, 1);
        assert_eq!(board.subscribers.len(), 1);
    }

    #[test]
    fn snapshot_sequence_tracks_published_changes() {
        let (handle, _join) = spawn(DEFAULT_TICK_INTERVAL);
        assert_eq!(handle.snapshot_with_sequence().unwrap().0, 0);
        handle.request_start(w(1));
        handle.request_start(w(1));
        handle.toggle_broken(d(3));
        let (sequence, machines) = handle.snapshot_with_sequence().unwrap();
        assert_eq!(sequence, 2);
        assert_eq!(machines[2].status(), MachineStatus::Broken);
    }

    #[test]
    fn dead_board_reports_disconnected() {
        let (handle, join) = spawn(DEFAULT_TICK_INTERVAL);
        handle.shutdown();
        join.join().unwrap();
        assert_eq!(handle.snapshot().unwrap_err(), BoardError::Disconnected);
        assert!(handle.start_clock().is_err());
        handle.request_start(w(1));
    }
}
