pub mod correlator;
pub mod history;
pub mod queue;
pub mod scheduler;
pub mod turn;

pub use correlator::{Correlator, CorrelatorConfig, CorrelatorHandle, SignalEvent, SignalKind};
pub use queue::NotifyQueue;
pub use scheduler::{
    CancelCause, OverlapPolicy, Scheduler, SchedulerConfig, SchedulerError, TickOutcome,
    TickStats, TurnError, TurnScope,
};
pub use turn::{
    CompanionTurn, PromptSettings, Responder, ResponseRequest, Synthesizer, TurnExecutor,
    TurnSources,
};
