/// Running totals for a scheduler instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickStats {
    started: u64,
    completed: u64,
    failed: u64,
    skipped: u64,
    preempted: u64,
    early_wakes: u64,
}

impl TickStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_started(&mut self) {
        self.started += 1;
    }

    pub(crate) fn record_completed(&mut self) {
        self.completed += 1;
    }

    pub(crate) fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub(crate) fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub(crate) fn record_preempted(&mut self) {
        self.preempted += 1;
    }

    pub(crate) fn record_early_wake(&mut self) {
        self.early_wakes += 1;
    }

    /// Turns that actually ran (skipped ticks are not counted).
    pub fn started(&self) -> u64 {
        self.started
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn preempted(&self) -> u64 {
        self.preempted
    }

    pub fn early_wakes(&self) -> u64 {
        self.early_wakes
    }
}
