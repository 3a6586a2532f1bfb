use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct ClockStats {
    pub ticks_fired: u64,
    pub late_ticks: u64,
}

/// Deadline scheduler for the countdown.
///
/// The clock never calls anything itself; its owner polls it and runs one
/// tick each time `poll` returns true. A stopped clock has no deadline, so
/// nothing scheduled before `stop` can fire afterwards.
#[derive(Debug, Clone)]
pub struct CycleClock {
    interval: Duration,
    next_due: Option<Instant>,
    stats: ClockStats,
}

impl CycleClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            next_due: None,
            stats: ClockStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_due
    }

    /// Returns false (and keeps the current schedule) if already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.next_due.is_some() {
            return false;
        }
        self.next_due = Some(now + self.interval);
        true
    }

    /// Returns false if the clock was not running.
    pub fn stop(&mut self) -> bool {
        self.next_due.take().is_some()
    }

    /// True when a tick is due at `now`. At most one tick per call.
    pub fn poll(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }

        let mut next = due + self.interval;
        if now >= next {
            // A whole interval behind: re-anchor instead of bursting.
            self.stats.late_ticks += 1;
            next = now + self.interval;
        }
        self.next_due = Some(next);
        self.stats.ticks_fired += 1;
        true
    }

    pub fn stats(&self) -> &ClockStats {
        &self.stats
    }
}

impl Default for CycleClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

/// Wall-clock milliseconds since the Unix epoch, for event stamps.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
