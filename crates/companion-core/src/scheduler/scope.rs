use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a turn's scope was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The per-turn deadline elapsed.
    Timeout,
    /// A newer turn took over under the `preempt` overlap policy.
    Preempted,
    /// The root scope was cancelled or the scheduler is stopping.
    Shutdown,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelCause::Timeout => f.write_str("tick timeout"),
            CancelCause::Preempted => f.write_str("preempted by a newer tick"),
            CancelCause::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Raised by a turn that stopped because its scope was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error("turn cancelled: {0}")]
    Cancelled(CancelCause),
}

/// The time-bounded cancellation scope handed to one turn.
///
/// Cloning is cheap and every clone observes the same cancellation. The scope is
/// a child of the scheduler's root token, so shutting down the root cancels
/// every running turn.
#[derive(Debug, Clone)]
pub struct TurnScope {
    generation: u64,
    token: CancellationToken,
    deadline: Instant,
    cause: Arc<OnceLock<CancelCause>>,
}

impl TurnScope {
    /// Derives a scope from `parent` that cancels itself after `timeout`.
    ///
    /// Must be called from within a tokio runtime; the deadline is enforced by a
    /// small watchdog task that exits as soon as the scope is cancelled.
    pub fn new(parent: &CancellationToken, generation: u64, timeout: Duration) -> Self {
        let scope = Self {
            generation,
            token: parent.child_token(),
            deadline: Instant::now() + timeout,
            cause: Arc::new(OnceLock::new()),
        };

        let watchdog = scope.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watchdog.token.cancelled() => {}
                _ = tokio::time::sleep_until(watchdog.deadline) => {
                    watchdog.cancel(CancelCause::Timeout);
                }
            }
        });

        scope
    }

    /// A scope with no parent, for callers that drive a turn by hand.
    pub fn detached(generation: u64, timeout: Duration) -> Self {
        Self::new(&CancellationToken::new(), generation, timeout)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns why the scope was cancelled, or `None` while it is still live.
    ///
    /// Cancellation inherited from the parent token is reported as
    /// [`CancelCause::Shutdown`].
    pub fn cause(&self) -> Option<CancelCause> {
        match self.cause.get() {
            Some(cause) => Some(*cause),
            None if self.token.is_cancelled() => Some(CancelCause::Shutdown),
            None => None,
        }
    }

    /// Cancels the scope. The first recorded cause wins.
    pub fn cancel(&self, cause: CancelCause) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    /// Resolves once the scope is cancelled for any reason.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Runs `fut` until it completes or the scope is cancelled, whichever comes
    /// first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, TurnError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TurnError::Cancelled(
                self.cause().unwrap_or(CancelCause::Shutdown),
            )),
            out = fut => Ok(out),
        }
    }

    // Tears the scope down after the turn has returned, without recording a cause.
    pub(crate) fn release(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scope_times_out_at_deadline() {
        let scope = TurnScope::detached(1, Duration::from_secs(5));
        assert_eq!(scope.cause(), None);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!scope.is_cancelled());

        scope.cancelled().await;
        assert_eq!(scope.cause(), Some(CancelCause::Timeout));
        assert!(Instant::now() >= scope.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cause_wins() {
        let scope = TurnScope::detached(1, Duration::from_secs(60));
        scope.cancel(CancelCause::Preempted);
        scope.cancel(CancelCause::Shutdown);

        assert_eq!(scope.cause(), Some(CancelCause::Preempted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_reads_as_shutdown() {
        let root = CancellationToken::new();
        let scope = TurnScope::new(&root, 7, Duration::from_secs(60));

        root.cancel();
        scope.cancelled().await;

        assert_eq!(scope.cause(), Some(CancelCause::Shutdown));
        assert_eq!(scope.generation(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_cancel_cause() {
        let scope = TurnScope::detached(1, Duration::from_secs(1));

        let result = scope.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(TurnError::Cancelled(CancelCause::Timeout)));

        let live = TurnScope::detached(2, Duration::from_secs(1));
        assert_eq!(live.run(async { 42 }).await, Ok(42));
    }
}
