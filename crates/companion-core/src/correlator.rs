//! Merges "content changed" and "trigger" signals into confirmed text.
//!
//! A platform listener reports two unrelated streams: the latest observed text
//! (for example the clipboard after a dictation tool pasted into it) and a bare
//! confirm action (for example a hotkey). The two arrive in no guaranteed
//! order, so a trigger is judged after a short settle delay against whatever
//! content was seen most recently.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Buffer size of the input and output channels.
pub const CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Observed content changed. Carries the new text.
    ContentChanged,
    /// The confirm action fired. Carries no text.
    Trigger,
    /// Content and trigger were judged related. Carries the confirmed text.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEvent {
    pub kind: SignalKind,
    pub text: String,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorConfig {
    /// Maximum distance between content and trigger, before adding the settle delay.
    pub window: Duration,
    /// How long to wait after a trigger before deciding.
    pub settle_delay: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl CorrelatorConfig {
    fn normalized(self) -> Self {
        Self {
            window: if self.window.is_zero() {
                DEFAULT_WINDOW
            } else {
                self.window
            },
            settle_delay: self.settle_delay,
        }
    }
}

// Latest distinct content. `at` is None until the first content event.
#[derive(Debug, Clone, Default)]
struct Observed {
    text: String,
    at: Option<Instant>,
}

/// Producer side, handed to the platform listener. Sends never block; events
/// are dropped when the input buffer is full.
#[derive(Debug, Clone)]
pub struct CorrelatorHandle {
    content_tx: mpsc::Sender<SignalEvent>,
    trigger_tx: mpsc::Sender<SignalEvent>,
}

impl CorrelatorHandle {
    pub fn content(&self, text: impl Into<String>) {
        self.content_at(text, Instant::now());
    }

    pub fn content_at(&self, text: impl Into<String>, at: Instant) {
        let event = SignalEvent {
            kind: SignalKind::ContentChanged,
            text: text.into(),
            at,
        };
        if let Err(e) = self.content_tx.try_send(event) {
            tracing::warn!("Failed to queue content event: {}", e);
        }
    }

    pub fn trigger(&self) {
        self.trigger_at(Instant::now());
    }

    pub fn trigger_at(&self, at: Instant) {
        let event = SignalEvent {
            kind: SignalKind::Trigger,
            text: String::new(),
            at,
        };
        if let Err(e) = self.trigger_tx.try_send(event) {
            tracing::warn!("Failed to queue trigger event: {}", e);
        }
    }
}

pub struct Correlator {
    config: CorrelatorConfig,
    content_rx: mpsc::Receiver<SignalEvent>,
    trigger_rx: mpsc::Receiver<SignalEvent>,
    out_tx: mpsc::Sender<SignalEvent>,
}

impl Correlator {
    /// Creates the correlator together with its input handle and output stream.
    ///
    /// The output stream carries republished raw events as well as `Confirmed`
    /// events; a full output buffer drops events rather than stalling inputs.
    pub fn new(
        config: CorrelatorConfig,
    ) -> (Self, CorrelatorHandle, mpsc::Receiver<SignalEvent>) {
        let (content_tx, content_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (trigger_tx, trigger_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let correlator = Self {
            config: config.normalized(),
            content_rx,
            trigger_rx,
            out_tx,
        };
        let handle = CorrelatorHandle {
            content_tx,
            trigger_tx,
        };
        (correlator, handle, out_rx)
    }

    /// Runs the coordination loop until `cancel` fires or every handle is dropped.
    ///
    /// Each trigger spawns its own settle check; checks run independently and
    /// abandon without emitting once `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let (state_tx, state_rx) = watch::channel(Observed::default());
        let mut content_open = true;
        let mut trigger_open = true;

        while content_open || trigger_open {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.content_rx.recv(), if content_open => match event {
                    Some(event) => {
                        let changed = state_tx.send_if_modified(|observed| {
                            if observed.text == event.text {
                                return false;
                            }
                            observed.text = event.text.clone();
                            observed.at = Some(event.at);
                            true
                        });
                        if changed {
                            emit(&self.out_tx, event);
                        }
                    }
                    None => content_open = false,
                },
                event = self.trigger_rx.recv(), if trigger_open => match event {
                    Some(event) => {
                        let triggered_at = event.at;
                        emit(&self.out_tx, event);
                        tokio::spawn(settle_check(
                            self.config,
                            triggered_at,
                            state_rx.clone(),
                            self.out_tx.clone(),
                            cancel.clone(),
                        ));
                    }
                    None => trigger_open = false,
                },
            }
        }
        tracing::debug!("correlator stopped");
    }
}

async fn settle_check(
    config: CorrelatorConfig,
    triggered_at: Instant,
    state: watch::Receiver<Observed>,
    out_tx: mpsc::Sender<SignalEvent>,
    cancel: CancellationToken,
) {
    if !config.settle_delay.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.settle_delay) => {}
        }
    }
    if cancel.is_cancelled() {
        return;
    }

    let observed = state.borrow().clone();
    let Some(observed_at) = observed.at else {
        return;
    };
    if observed.text.is_empty() {
        return;
    }

    let distance = triggered_at
        .saturating_duration_since(observed_at)
        .max(observed_at.saturating_duration_since(triggered_at));
    if distance < config.window + config.settle_delay {
        emit(
            &out_tx,
            SignalEvent {
                kind: SignalKind::Confirmed,
                text: observed.text,
                at: Instant::now(),
            },
        );
    } else {
        tracing::debug!(
            distance_ms = distance.as_millis() as u64,
            "trigger outside correlation window"
        );
    }
}

fn emit(out_tx: &mpsc::Sender<SignalEvent>, event: SignalEvent) {
    if let Err(e) = out_tx.try_send(event) {
        tracing::debug!("Dropping correlator event: {}", e);
    }
}
