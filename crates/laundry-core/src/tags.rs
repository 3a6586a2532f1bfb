/// Naming for values exported per machine status.
#[derive(Debug, Clone, Copy)]
pub struct Tag {
    pub metric: &'static str,
    pub help: &'static str,
}

pub const MACHINES_AVAILABLE: Tag = Tag {
    metric: "laundry_machines_available",
    help: "Machines currently available",
};

pub const MACHINES_RUNNING: Tag = Tag {
    metric: "laundry_machines_running",
    help: "Machines currently running a cycle",
};

pub const MACHINES_BROKEN: Tag = Tag {
    metric: "laundry_machines_broken",
    help: "Machines currently marked broken",
};
