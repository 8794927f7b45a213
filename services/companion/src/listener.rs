use anyhow::Result;
use companion_core::{CorrelatorHandle, NotifyQueue};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

/// Where one line of console input goes.
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    Chat(&'a str),
    State(&'a str),
    Speech(&'a str),
    Blank,
}

pub fn classify(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Blank;
    }
    if let Some(rest) = line.strip_prefix("/chat ") {
        return Line::Chat(rest.trim());
    }
    if let Some(rest) = line.strip_prefix("/state ") {
        return Line::State(rest.trim());
    }
    Line::Speech(line)
}

/// Console stand-in for the platform listeners.
///
/// Plain lines are treated as transcribed speech: the text is published as
/// content and immediately followed by a trigger, so the correlator confirms
/// it after the settle delay. `/chat <text>` and `/state <text>` go straight
/// into their queues.
pub struct ConsoleListener {
    correlator: CorrelatorHandle,
    chat: Arc<NotifyQueue>,
    state: Arc<NotifyQueue>,
}

impl ConsoleListener {
    pub fn new(correlator: CorrelatorHandle, chat: Arc<NotifyQueue>, state: Arc<NotifyQueue>) -> Self {
        Self {
            correlator,
            chat,
            state,
        }
    }

    pub async fn run<R>(self, reader: R, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                tracing::info!("Console input closed.");
                break;
            };
            match classify(&line) {
                Line::Chat(text) => self.chat.add(text),
                Line::State(text) => self.state.add(text),
                Line::Speech(text) => {
                    self.correlator.content(text);
                    self.correlator.trigger();
                }
                Line::Blank => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::{Correlator, CorrelatorConfig, SignalKind};
    use std::time::Duration;

    #[test]
    fn test_classify_routes_prefixes() {
        assert_eq!(classify("  /chat gg wp "), Line::Chat("gg wp"));
        assert_eq!(classify("/state hp=10"), Line::State("hp=10"));
        assert_eq!(classify("where is the boss"), Line::Speech("where is the boss"));
        assert_eq!(classify("   "), Line::Blank);
        // Without the trailing space it is ordinary speech.
        assert_eq!(classify("/chat"), Line::Speech("/chat"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_lines_feed_queues_and_correlator() {
        let (correlator, handle, mut events) = Correlator::new(CorrelatorConfig {
            window: Duration::from_secs(1),
            settle_delay: Duration::from_millis(100),
        });
        let cancel = CancellationToken::new();
        tokio::spawn(correlator.run(cancel.clone()));

        let chat = Arc::new(NotifyQueue::new(5));
        let state = Arc::new(NotifyQueue::new(5));
        let listener = ConsoleListener::new(handle, chat.clone(), state.clone());

        let input: &[u8] = b"/chat hello\n/state hp=3\nlook left\n\n";
        listener.run(input, cancel.clone()).await.unwrap();

        assert_eq!(chat.drain(), vec!["hello"]);
        assert_eq!(state.drain(), vec!["hp=3"]);

        let mut confirmed = None;
        while let Some(event) = events.recv().await {
            if event.kind == SignalKind::Confirmed {
                confirmed = Some(event.text);
                break;
            }
        }
        assert_eq!(confirmed.as_deref(), Some("look left"));
        cancel.cancel();
    }
}
