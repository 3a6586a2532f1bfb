use crate::machine::{
    Action, Change, Machine, MachineId, MachineKind, MachineStatus, TransitionError,
};
use log::{debug, trace};
use thiserror::Error;

/// How many machines of each kind the room has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetLayout {
    pub dryers: u8,
    pub washers: u8,
}

impl Default for FleetLayout {
    fn default() -> Self {
        Self {
            dryers: 3,
            washers: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no machine with id {0}")]
    UnknownMachine(MachineId),
    #[error("machine {id}: {source}")]
    Transition {
        id: MachineId,
        #[source]
        source: TransitionError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub available: usize,
    pub running: usize,
    pub broken: usize,
}

impl StatusCounts {
    pub fn get(&self, status: MachineStatus) -> usize {
        match status {
            MachineStatus::Available => self.available,
            MachineStatus::Running => self.running,
            MachineStatus::Broken => self.broken,
        }
    }

    pub fn tally<'a>(machines: impl IntoIterator<Item = &'a Machine>) -> Self {
        machines
            .into_iter()
            .fold(StatusCounts::default(), |mut counts, m| {
                match m.status() {
                    MachineStatus::Available => counts.available += 1,
                    MachineStatus::Running => counts.running += 1,
                    MachineStatus::Broken => counts.broken += 1,
                }
                counts
            })
    }

    pub fn total(&self) -> usize {
        self.available + self.running + self.broken
    }
}

/// Authoritative in-memory collection of machine states.
///
/// The machine set is fixed at construction; only per-machine state mutates.
/// Every mutation is total: unknown ids and requests that make no sense for
/// the current state are no-ops and return `None`.
#[derive(Debug, Clone)]
pub struct MachineRegistry {
    machines: Vec<Machine>,
}

impl MachineRegistry {
    /// Dryers first, then washers, each in ascending ordinal order.
    pub fn new(layout: FleetLayout) -> Self {
        let dryers = (1..=layout.dryers).filter_map(MachineId::dryer);
        let washers = (1..=layout.washers).filter_map(MachineId::washer);
        Self {
            machines: dryers.chain(washers).map(Machine::new).collect(),
        }
    }

    pub fn list(&self) -> &[Machine] {
        &self.machines
    }

    pub fn snapshot(&self) -> Vec<Machine> {
        self.machines.clone()
    }

    pub fn get(&self, id: MachineId) -> Option<&Machine> {
        self.machines.iter().find(|m| m.id() == id)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::tally(&self.machines)
    }

    pub fn count_kind(&self, kind: MachineKind) -> usize {
        self.machines.iter().filter(|m| m.kind() == kind).count()
    }

    pub fn offered_action(&self, id: MachineId) -> Option<Action> {
        self.get(id).and_then(Machine::offered_action)
    }

    pub fn request_start(&mut self, id: MachineId) -> Option<Change> {
        self.request(id, Action::Start)
    }

    pub fn request_cancel(&mut self, id: MachineId) -> Option<Change> {
        self.request(id, Action::Cancel)
    }

    pub fn toggle_broken(&mut self, id: MachineId) -> Option<Change> {
        self.request(id, Action::ToggleBroken)
    }

    /// Applies `action` and discards the reason when it is refused.
    pub fn request(&mut self, id: MachineId, action: Action) -> Option<Change> {
        match self.try_apply(id, action) {
            Ok(change) => Some(change),
            Err(err) => {
                debug!("ignored {action} request: {err}");
                None
            }
        }
    }

    pub fn try_apply(&mut self, id: MachineId, action: Action) -> Result<Change, RegistryError> {
        let machine = self
            .machines
            .iter_mut()
            .find(|m| m.id() == id)
            .ok_or(RegistryError::UnknownMachine(id))?;

        let from = machine.state();
        let (to, cause) = from
            .apply(action, machine.kind())
            .map_err(|source| RegistryError::Transition { id, source })?;
        machine.set_state(to);
        self.check_invariants();

        Ok(Change {
            id,
            from,
            to,
            cause,
        })
    }

    /// Advances every running machine by one minute.
    pub fn tick(&mut self) -> Vec<Change> {
        let mut changes = Vec::new();
        for machine in &mut self.machines {
            let from = machine.state();
            if let Some((to, cause)) = from.advance() {
                machine.set_state(to);
                changes.push(Change {
                    id: machine.id(),
                    from,
                    to,
                    cause,
                });
            }
        }
        self.check_invariants();
        trace!("tick advanced {} machines", changes.len());
        changes
    }

    fn check_invariants(&self) {
        debug_assert!(
            self.machines.iter().all(Machine::invariant_holds),
            "machine state invariant violated: {:?}",
            self.machines
        );
    }
}

impl Default for MachineRegistry {
    fn default() -> Self {
        Self::new(FleetLayout::default())
    }
}
