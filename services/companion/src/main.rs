use anyhow::{Context, Result};
use clap::Parser;
use companion_core::scheduler::OverlapPolicy;
use companion_core::{
    CompanionTurn, Correlator, NotifyQueue, Responder, Scheduler, SignalKind, TurnSources,
};
use companion_service::config::Config;
use companion_service::listener::ConsoleListener;
use companion_service::prompt_loader;
use companion_service::responder::{ChatResponder, StubResponder};
use companion_service::synthesizer::LogSynthesizer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Game companion: periodically comments on what the player says.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Seconds between ticks
    #[arg(long)]
    interval: Option<u64>,
    /// Per-turn timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// What to do when a tick fires while a turn is still running
    #[arg(long)]
    overlap: Option<OverlapPolicy>,
    /// Failed ticks in a row before the companion stops
    #[arg(long)]
    max_errors: Option<u32>,
    /// Disable ticking early when new speech arrives
    #[arg(long)]
    no_early_tick: bool,
    /// Directory of character prompt files
    #[arg(long)]
    characters: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(secs) = self.interval {
            config.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeout {
            config.tick_timeout = Duration::from_secs(secs);
        }
        if let Some(overlap) = self.overlap {
            config.overlap = overlap;
        }
        if let Some(max) = self.max_errors {
            config.max_consecutive_errors = max;
        }
        if self.no_early_tick {
            config.early_wake = false;
        }
        if let Some(dir) = self.characters {
            config.characters_dir = dir;
        }
    }
}

fn main() -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(run());
    // A pending stdin read cannot be cancelled; don't wait for it.
    runtime.shutdown_background();
    result
}

async fn run() -> Result<()> {
    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;
    Cli::parse().apply(&mut config);

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting companion...");

    // --- 3. Load Characters ---
    let characters = prompt_loader::load_characters(&config.characters_dir)
        .context("Failed to load character prompts")?;
    tracing::info!("Loaded {} characters.", characters.len());

    // --- 4. Queues and Signal Correlation ---
    let speech = Arc::new(NotifyQueue::new(config.speech_capacity));
    let chat = Arc::new(NotifyQueue::new(config.chat_capacity));
    let state = Arc::new(NotifyQueue::new(config.state_capacity));

    let root = CancellationToken::new();

    let (correlator, handle, mut events) = Correlator::new(config.correlator());
    tokio::spawn(correlator.run(root.clone()));

    let speech_sink = speech.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.kind {
                SignalKind::Confirmed => {
                    tracing::info!("Heard: {}", event.text);
                    speech_sink.add(event.text);
                }
                kind => tracing::debug!(?kind, "{}", event.text),
            }
        }
    });

    let listener = ConsoleListener::new(handle, chat.clone(), state.clone());
    let listener_cancel = root.clone();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        if let Err(e) = listener.run(stdin, listener_cancel).await {
            tracing::error!("Console listener failed: {:?}", e);
        }
    });

    // --- 5. Initialize API Clients ---
    let responder: Arc<dyn Responder> = match config.openai_api_key.clone() {
        Some(key) => {
            tracing::info!("Using chat model {}", config.chat_model);
            Arc::new(ChatResponder::new(key, config.chat_model.clone()))
        }
        None => {
            tracing::warn!("OPENAI_API_KEY not set, replies come from the stub responder.");
            Arc::new(StubResponder::default())
        }
    };

    let turn = Arc::new(CompanionTurn::new(
        TurnSources {
            speech: speech.clone(),
            chat: Some(chat),
            state: Some(state),
        },
        config.prompts(characters),
        responder,
        Arc::new(LogSynthesizer),
    ));

    // --- 6. Run Until Ctrl-C ---
    let scheduler = Scheduler::with_early_wake(config.scheduler(), turn, speech);

    let shutdown = root.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, shutting down.");
                shutdown.cancel();
            }
            Err(e) => tracing::error!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    let result = scheduler.run(root.clone()).await;
    root.cancel();

    let stats = scheduler.stats();
    tracing::info!(
        started = stats.started(),
        completed = stats.completed(),
        failed = stats.failed(),
        skipped = stats.skipped(),
        preempted = stats.preempted(),
        "Companion stopped."
    );

    if let Err(e) = result {
        tracing::error!("Companion terminated: {:?}", e);
        return Err(e.into());
    }
    Ok(())
}
