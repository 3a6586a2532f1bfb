pub mod board;
pub mod clock;
pub mod machine;
pub mod registry;
pub mod tags;

pub use board::{
    Board, BoardConfig, BoardError, BoardEvent, BoardHandle, BoardStats, ClockGuard, Subscription,
};
pub use clock::{unix_ms, ClockStats, CycleClock, DEFAULT_TICK_INTERVAL};
pub use machine::{
    Action, Change, ChangeCause, Machine, MachineId, MachineIdError, MachineKind, MachineState,
    MachineStatus, TransitionError,
};
pub use registry::{FleetLayout, MachineRegistry, RegistryError, StatusCounts};
