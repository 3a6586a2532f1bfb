use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    Washer,
    Dryer,
}

impl MachineKind {
    /// Length of one full cycle in minutes.
    pub const fn cycle_minutes(self) -> NonZeroU32 {
        match self {
            MachineKind::Washer => match NonZeroU32::new(50) {
                Some(m) => m,
                None => unreachable!(),
            },
            MachineKind::Dryer => match NonZeroU32::new(55) {
                Some(m) => m,
                None => unreachable!(),
            },
        }
    }

    pub const fn prefix(self) -> char {
        match self {
            MachineKind::Washer => 'w',
            MachineKind::Dryer => 'd',
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MachineKind::Washer => "washer",
            MachineKind::Dryer => "dryer",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            MachineKind::Washer => "Washer",
            MachineKind::Dryer => "Dryer",
        }
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineIdError {
    #[error("machine id is empty")]
    Empty,
    #[error("unknown machine kind prefix {0:?}")]
    UnknownPrefix(char),
    #[error("invalid machine ordinal {0:?}")]
    InvalidOrdinal(String),
}

/// Stable machine identifier, rendered as `d1`, `w3`, ...
///
/// The ordinal is 1-based and doubles as the number shown to occupants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MachineId {
    kind: MachineKind,
    ordinal: u8,
}

impl MachineId {
    /// Returns `None` for ordinal 0.
    pub fn new(kind: MachineKind, ordinal: u8) -> Option<Self> {
        (ordinal > 0).then_some(Self { kind, ordinal })
    }

    pub fn washer(ordinal: u8) -> Option<Self> {
        Self::new(MachineKind::Washer, ordinal)
    }

    pub fn dryer(ordinal: u8) -> Option<Self> {
        Self::new(MachineKind::Dryer, ordinal)
    }

    pub fn kind(&self) -> MachineKind {
        self.kind
    }

    pub fn ordinal(&self) -> u8 {
        self.ordinal
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.ordinal)
    }
}

impl FromStr for MachineId {
    type Err = MachineIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let prefix = chars.next().ok_or(MachineIdError::Empty)?;
        let kind = match prefix {
            'w' => MachineKind::Washer,
            'd' => MachineKind::Dryer,
            other => return Err(MachineIdError::UnknownPrefix(other)),
        };
        let digits = chars.as_str();
        // Reject "+1", "01" and friends so every id has exactly one spelling.
        if digits.is_empty()
            || digits.starts_with('0')
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(MachineIdError::InvalidOrdinal(digits.to_string()));
        }
        let ordinal = digits
            .parse::<u8>()
            .map_err(|_| MachineIdError::InvalidOrdinal(digits.to_string()))?;
        Ok(Self { kind, ordinal })
    }
}

impl TryFrom<String> for MachineId {
    type Error = MachineIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MachineId> for String {
    fn from(id: MachineId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Available,
    Running,
    Broken,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Available => "available",
            MachineStatus::Running => "running",
            MachineStatus::Broken => "broken",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-initiated requests against a single machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Cancel,
    ToggleBroken,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Start => "start",
            Action::Cancel => "cancel",
            Action::ToggleBroken => "toggle_broken",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot start a machine that is {found}")]
    NotAvailable { found: MachineStatus },
    #[error("cannot cancel a machine that is {found}")]
    NotRunning { found: MachineStatus },
    #[error("a running machine cannot be marked broken")]
    BreakWhileRunning,
}

/// Why a machine's state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    CycleStarted,
    CycleCancelled,
    MarkedBroken,
    Repaired,
    Countdown,
    CycleFinished,
}

impl ChangeCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeCause::CycleStarted => "cycle_started",
            ChangeCause::CycleCancelled => "cycle_cancelled",
            ChangeCause::MarkedBroken => "marked_broken",
            ChangeCause::Repaired => "repaired",
            ChangeCause::Countdown => "countdown",
            ChangeCause::CycleFinished => "cycle_finished",
        }
    }

    /// True when the status itself changed, not just the countdown.
    pub fn is_status_change(&self) -> bool {
        !matches!(self, ChangeCause::Countdown)
    }
}

/// Per-machine state. A running machine always has at least one minute left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MachineState {
    #[default]
    Available,
    Running {
        remaining_minutes: NonZeroU32,
    },
    Broken,
}

impl MachineState {
    pub fn status(&self) -> MachineStatus {
        match self {
            MachineState::Available => MachineStatus::Available,
            MachineState::Running { .. } => MachineStatus::Running,
            MachineState::Broken => MachineStatus::Broken,
        }
    }

    pub fn remaining_minutes(&self) -> u32 {
        match self {
            MachineState::Running { remaining_minutes } => remaining_minutes.get(),
            MachineState::Available | MachineState::Broken => 0,
        }
    }

    /// Applies a user action. Illegal transitions are reported, never applied.
    pub fn apply(
        self,
        action: Action,
        kind: MachineKind,
    ) -> Result<(MachineState, ChangeCause), TransitionError> {
        use MachineState::*;

        match (self, action) {
            (Available, Action::Start) => Ok((
                Running {
                    remaining_minutes: kind.cycle_minutes(),
                },
                ChangeCause::CycleStarted,
            )),
            (state, Action::Start) => Err(TransitionError::NotAvailable {
                found: state.status(),
            }),

            (Running { .. }, Action::Cancel) => Ok((Available, ChangeCause::CycleCancelled)),
            (state, Action::Cancel) => Err(TransitionError::NotRunning {
                found: state.status(),
            }),

            (Available, Action::ToggleBroken) => Ok((Broken, ChangeCause::MarkedBroken)),
            (Broken, Action::ToggleBroken) => Ok((Available, ChangeCause::Repaired)),
            (Running { .. }, Action::ToggleBroken) => Err(TransitionError::BreakWhileRunning),
        }
    }

    /// One minute of simulated time. `None` when the state is not counting down.
    pub fn advance(self) -> Option<(MachineState, ChangeCause)> {
        match self {
            MachineState::Running { remaining_minutes } => {
                Some(match NonZeroU32::new(remaining_minutes.get() - 1) {
                    Some(left) => (
                        MachineState::Running {
                            remaining_minutes: left,
                        },
                        ChangeCause::Countdown,
                    ),
                    None => (MachineState::Available, ChangeCause::CycleFinished),
                })
            }
            MachineState::Available | MachineState::Broken => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Machine {
    id: MachineId,
    state: MachineState,
}

impl Machine {
    pub fn new(id: MachineId) -> Self {
        Self {
            id,
            state: MachineState::Available,
        }
    }

    pub fn id(&self) -> MachineId {
        self.id
    }

    pub fn kind(&self) -> MachineKind {
        self.id.kind()
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn status(&self) -> MachineStatus {
        self.state.status()
    }

    pub fn remaining_minutes(&self) -> u32 {
        self.state.remaining_minutes()
    }

    /// Human-readable name, e.g. "Washer 2".
    pub fn label(&self) -> String {
        format!("{} {}", self.kind().display_name(), self.id.ordinal())
    }

    /// The action a click on this machine should offer. Broken machines offer
    /// nothing; repairing goes through the separate broken toggle.
    pub fn offered_action(&self) -> Option<Action> {
        match self.state {
            MachineState::Available => Some(Action::Start),
            MachineState::Running { .. } => Some(Action::Cancel),
            MachineState::Broken => None,
        }
    }

    pub fn invariant_holds(&self) -> bool {
        (self.status() == MachineStatus::Running) == (self.remaining_minutes() > 0)
    }

    pub(crate) fn set_state(&mut self, state: MachineState) {
        self.state = state;
    }
}

/// A state change that actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change {
    pub id: MachineId,
    pub from: MachineState,
    pub to: MachineState,
    pub cause: ChangeCause,
}

impl Change {
    pub fn kind(&self) -> MachineKind {
        self.id.kind()
    }
}
