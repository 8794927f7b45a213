//! Periodic tick driver.
//!
//! The [`Scheduler`] fires a tick every interval (or earlier, when the
//! early-wake queue receives something), runs one turn per tick through a
//! [`TurnExecutor`], and stops the whole loop once too many turns fail in a row.

use crate::queue::NotifyQueue;
use crate::turn::TurnExecutor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

mod config;
mod scope;
mod stats;

pub use config::{
    DEFAULT_INTERVAL, DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_TICK_TIMEOUT, FALLBACK_TICK_TIMEOUT,
    OverlapPolicy, ParseOverlapPolicyError, SchedulerConfig, SchedulerConfigBuilder,
};
pub use scope::{CancelCause, TurnError, TurnScope};
pub use stats::TickStats;

/// How a single tick ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The turn ran to completion.
    Completed,
    /// Another turn was running and the overlap policy is `skip`.
    Skipped,
    /// A newer tick cancelled this turn before it finished.
    Preempted,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Too many turns failed in a row. Carries the last turn error.
    #[error("stopped after {consecutive} consecutive failed ticks: {source}")]
    ErrorBudgetExhausted {
        consecutive: u32,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Default)]
struct Current {
    generation: u64,
    running: bool,
    scope: Option<TurnScope>,
}

struct Shared {
    config: SchedulerConfig,
    executor: Arc<dyn TurnExecutor>,
    early_wake: Option<Arc<NotifyQueue>>,
    // Held only for short bookkeeping sections, never across a turn.
    current: Mutex<Current>,
    stats: Mutex<TickStats>,
}

/// Cheaply cloneable handle; clones drive the same scheduler state.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, executor: Arc<dyn TurnExecutor>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                executor,
                early_wake: None,
                current: Mutex::new(Current::default()),
                stats: Mutex::new(TickStats::new()),
            }),
        }
    }

    /// Wakes the loop ahead of the interval whenever `queue` receives a message.
    ///
    /// Has no effect when early wake is disabled in the config.
    pub fn with_early_wake(
        config: SchedulerConfig,
        executor: Arc<dyn TurnExecutor>,
        queue: Arc<NotifyQueue>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                executor,
                early_wake: Some(queue),
                current: Mutex::new(Current::default()),
                stats: Mutex::new(TickStats::new()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> TickStats {
        lock(&self.shared.stats).clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.current).running
    }

    /// Generation of the turn whose scope is currently recorded, if any.
    pub fn current_generation(&self) -> Option<u64> {
        lock(&self.shared.current)
            .scope
            .as_ref()
            .map(TurnScope::generation)
    }

    /// Runs the tick loop until `root` is cancelled or the error budget runs out.
    ///
    /// Returns `Ok(())` on cancellation. The first tick fires one interval after
    /// the call. Turns run inside the loop one at a time, so the overlap policy
    /// only applies against [`Scheduler::run_tick`] calls made from elsewhere.
    pub async fn run(&self, root: CancellationToken) -> Result<(), SchedulerError> {
        let config = &self.shared.config;
        let interval = config.interval();
        let early_wake = if config.early_wake() {
            self.shared.early_wake.clone()
        } else {
            None
        };

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            overlap = %config.overlap(),
            early_wake = early_wake.is_some(),
            "scheduler started"
        );

        let mut consecutive_errors: u32 = 0;

        loop {
            // Armed fresh every iteration; dropping it when another branch wins
            // discards the deadline, so it cannot fire later.
            let timer = tokio::time::sleep(interval);
            let wake = async {
                match &early_wake {
                    Some(queue) => queue.notified().await,
                    None => std::future::pending().await,
                }
            };

            let early = tokio::select! {
                biased;
                _ = root.cancelled() => {
                    tracing::info!("scheduler cancelled, stopping");
                    self.stop_current(CancelCause::Shutdown);
                    return Ok(());
                }
                _ = timer => false,
                _ = wake => {
                    tracing::debug!("early wake");
                    lock(&self.shared.stats).record_early_wake();
                    true
                }
            };

            // Speech arriving while the turn runs leaves a pending permit, so the
            // next wait returns at once.
            let result = tokio::select! {
                biased;
                _ = root.cancelled() => {
                    tracing::info!("scheduler cancelled, stopping");
                    self.stop_current(CancelCause::Shutdown);
                    return Ok(());
                }
                result = self.run_tick(&root) => result,
            };

            match result {
                Ok(TickOutcome::Completed) => consecutive_errors = 0,
                Ok(TickOutcome::Skipped | TickOutcome::Preempted) => {}
                Err(e) => {
                    consecutive_errors += 1;
                    if early {
                        tracing::error!(consecutive_errors, error = %e, "early tick failed");
                    } else {
                        tracing::error!(consecutive_errors, error = %e, "tick failed");
                    }
                    if consecutive_errors >= config.max_consecutive_errors() {
                        tracing::error!(
                            threshold = config.max_consecutive_errors(),
                            "stopping due to consecutive errors threshold"
                        );
                        self.stop_current(CancelCause::Shutdown);
                        return Err(SchedulerError::ErrorBudgetExhausted {
                            consecutive: consecutive_errors,
                            source: e,
                        });
                    }
                }
            }
        }
    }

    /// Runs one turn under `parent`, applying the overlap policy and tick timeout.
    ///
    /// May be called concurrently with itself and with [`Scheduler::run`].
    pub async fn run_tick(&self, parent: &CancellationToken) -> anyhow::Result<TickOutcome> {
        let shared = &self.shared;
        let scope = {
            let mut current = lock(&shared.current);
            if current.running {
                match shared.config.overlap() {
                    OverlapPolicy::Skip => {
                        drop(current);
                        tracing::info!("skipping tick due to overlap");
                        lock(&shared.stats).record_skipped();
                        return Ok(TickOutcome::Skipped);
                    }
                    OverlapPolicy::Preempt => {
                        tracing::info!("preempting previous tick");
                        if let Some(previous) = current.scope.take() {
                            previous.cancel(CancelCause::Preempted);
                        }
                    }
                }
            }

            current.generation += 1;
            let scope = TurnScope::new(parent, current.generation, shared.config.tick_timeout());
            current.scope = Some(scope.clone());
            current.running = true;
            scope
        };
        let _guard = TickGuard {
            shared: shared.clone(),
            scope: scope.clone(),
        };

        lock(&shared.stats).record_started();
        let generation = scope.generation();
        let start = Instant::now();
        tracing::info!(generation, "tick start");

        let result = shared.executor.execute(scope.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                tracing::info!(generation, duration_ms, "tick done");
                lock(&shared.stats).record_completed();
                Ok(TickOutcome::Completed)
            }
            Err(_) if scope.cause() == Some(CancelCause::Preempted) => {
                tracing::info!(generation, duration_ms, "preempted tick stopped");
                lock(&shared.stats).record_preempted();
                Ok(TickOutcome::Preempted)
            }
            Err(e) => {
                tracing::warn!(generation, duration_ms, error = %e, "turn failed");
                lock(&shared.stats).record_failed();
                Err(e)
            }
        }
    }

    fn stop_current(&self, cause: CancelCause) {
        if let Some(scope) = lock(&self.shared.current).scope.take() {
            scope.cancel(cause);
        }
    }
}

// Cleanup for one turn; runs on every exit path, including task abort.
struct TickGuard {
    shared: Arc<Shared>,
    scope: TurnScope,
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.scope.release();
        let mut current = lock(&self.shared.current);
        // A preempted turn finishing late must not clear the newer turn's state.
        if current.generation == self.scope.generation() {
            current.running = false;
            current.scope = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
