use std::str::FromStr;
use std::time::Duration;

/// Used when the configured interval is zero.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
/// Used when the configured tick timeout is zero.
pub const FALLBACK_TICK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// What to do when a tick fires while the previous turn is still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Leave the running turn alone and make the new tick a no-op.
    #[default]
    Skip,
    /// Cancel the running turn and start a new one.
    Preempt,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown overlap policy `{0}`, expected `skip` or `preempt`")]
pub struct ParseOverlapPolicyError(String);

impl FromStr for OverlapPolicy {
    type Err = ParseOverlapPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(OverlapPolicy::Skip),
            "preempt" => Ok(OverlapPolicy::Preempt),
            other => Err(ParseOverlapPolicyError(other.to_string())),
        }
    }
}

impl std::fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlapPolicy::Skip => f.write_str("skip"),
            OverlapPolicy::Preempt => f.write_str("preempt"),
        }
    }
}

/// Timing and failure-budget settings for the [`Scheduler`](super::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    interval: Duration,
    tick_timeout: Duration,
    overlap: OverlapPolicy,
    max_consecutive_errors: u32,
    early_wake: bool,
}

pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl SchedulerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.config.tick_timeout = timeout;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.config.overlap = overlap;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.config.max_consecutive_errors = max;
        self
    }

    pub fn with_early_wake(mut self, enabled: bool) -> Self {
        self.config.early_wake = enabled;
        self
    }

    /// Finishes the config, replacing unusable values with their fallbacks.
    pub fn build(self) -> SchedulerConfig {
        let mut config = self.config;
        if config.interval.is_zero() {
            config.interval = DEFAULT_INTERVAL;
        }
        if config.tick_timeout.is_zero() {
            config.tick_timeout = FALLBACK_TICK_TIMEOUT;
        }
        config.max_consecutive_errors = config.max_consecutive_errors.max(1);
        config
    }
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            tick_timeout: DEFAULT_TICK_TIMEOUT,
            overlap: OverlapPolicy::Skip,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            early_wake: true,
        }
    }
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::new()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn tick_timeout(&self) -> Duration {
        self.tick_timeout
    }

    pub fn overlap(&self) -> OverlapPolicy {
        self.overlap
    }

    pub fn max_consecutive_errors(&self) -> u32 {
        self.max_consecutive_errors
    }

    pub fn early_wake(&self) -> bool {
        self.early_wake
    }
}
