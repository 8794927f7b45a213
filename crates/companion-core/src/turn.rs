//! The unit of work run once per tick.
//!
//! The scheduler only knows [`TurnExecutor`]. [`CompanionTurn`] is the default
//! executor: it drains the input queues into a prompt, asks a [`Responder`] for
//! a reply and hands the reply to a [`Synthesizer`].

use crate::history::ResponseHistory;
use crate::queue::NotifyQueue;
use crate::scheduler::TurnScope;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Line placed between prompt sections.
pub const SECTION_SEPARATOR: &str = "----";
/// Used when no fallback prompts are configured.
pub const DEFAULT_FALLBACK_PROMPT: &str = "report status";
pub const DEFAULT_HISTORY_HEADER: &str = "Previous AI replies:";
pub const DEFAULT_CHAT_HEADER: &str = "Chat messages";
pub const DEFAULT_STATE_HEADER: &str = "Game state";
pub const DEFAULT_SPEECH_HEADER: &str = "Player said";

/// Runs one turn. Implementations must stop promptly once `scope` is cancelled;
/// any error counts as a failed tick.
#[async_trait]
pub trait TurnExecutor: Send + Sync {
    async fn execute(&self, scope: TurnScope) -> Result<()>;
}

/// Everything the AI provider needs for one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRequest {
    /// Character prompt, sent as system instructions. May be empty.
    pub system: String,
    /// Assistant instruction. May be empty.
    pub assistant: String,
    /// Prompt assembled from speech, history, game state and chat.
    pub user: String,
}

/// Produces the text to speak. An empty reply means "nothing to say".
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, scope: TurnScope, request: ResponseRequest) -> Result<String>;
}

/// Speaks a reply out loud.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn speak(&self, scope: TurnScope, text: String) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub speech_header: String,
    pub history_header: String,
    pub state_header: String,
    pub chat_header: String,
    /// One is picked at random when no speech arrived since the last turn.
    pub fallback_prompts: Vec<String>,
    pub assistant_prompt: String,
    /// Character prompts; one is active at a time.
    pub characters: Vec<String>,
    /// Pick a new character after this many replies. Zero keeps the first one.
    pub rotate_each: u32,
    pub max_history_records: usize,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            speech_header: DEFAULT_SPEECH_HEADER.to_string(),
            history_header: DEFAULT_HISTORY_HEADER.to_string(),
            state_header: DEFAULT_STATE_HEADER.to_string(),
            chat_header: DEFAULT_CHAT_HEADER.to_string(),
            fallback_prompts: vec![DEFAULT_FALLBACK_PROMPT.to_string()],
            assistant_prompt: String::new(),
            characters: Vec::new(),
            rotate_each: 3,
            max_history_records: 10,
        }
    }
}

/// The queues a turn reads from. Only speech is mandatory.
#[derive(Debug, Clone)]
pub struct TurnSources {
    pub speech: Arc<NotifyQueue>,
    pub chat: Option<Arc<NotifyQueue>>,
    pub state: Option<Arc<NotifyQueue>>,
}

struct Session {
    history: ResponseHistory,
    character: String,
    replies_since_rotation: u32,
    rng: StdRng,
}

pub struct CompanionTurn {
    sources: TurnSources,
    settings: PromptSettings,
    responder: Arc<dyn Responder>,
    synthesizer: Arc<dyn Synthesizer>,
    // Held for a whole turn; overlapping turns take it one after another.
    session: Mutex<Session>,
}

impl CompanionTurn {
    pub fn new(
        sources: TurnSources,
        settings: PromptSettings,
        responder: Arc<dyn Responder>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        let mut rng = StdRng::from_entropy();
        let character = settings
            .characters
            .choose(&mut rng)
            .cloned()
            .unwrap_or_default();
        let session = Session {
            history: ResponseHistory::new(settings.max_history_records),
            character,
            replies_since_rotation: 0,
            rng,
        };
        Self {
            sources,
            settings,
            responder,
            synthesizer,
            session: Mutex::new(session),
        }
    }

    /// Replies recorded so far, oldest first.
    pub async fn history(&self) -> Vec<String> {
        let session = self.session.lock().await;
        session.history.iter().map(str::to_string).collect()
    }

    fn build_request(&self, session: &mut Session) -> ResponseRequest {
        let settings = &self.settings;

        let mut user = settings.speech_header.clone();
        let speech = self.sources.speech.drain();
        if speech.is_empty() {
            let fallback = settings
                .fallback_prompts
                .choose(&mut session.rng)
                .map(String::as_str)
                .unwrap_or(DEFAULT_FALLBACK_PROMPT);
            user.push_str("\n- ");
            user.push_str(fallback);
        } else {
            for message in &speech {
                user.push_str("\n- ");
                user.push_str(message);
            }
        }

        if settings.rotate_each > 0 && session.replies_since_rotation >= settings.rotate_each {
            if let Some(character) = settings.characters.choose(&mut session.rng) {
                session.character = character.clone();
            }
            session.replies_since_rotation = 0;
            tracing::debug!("rotated character prompt");
        }

        if !session.history.is_empty() {
            let header = non_blank_or(&settings.history_header, DEFAULT_HISTORY_HEADER);
            let mut block = String::new();
            append_section(&mut block, header, session.history.iter());
            user = format!("{block}\n{user}");
        }

        if let Some(state) = &self.sources.state {
            let snapshots = state.drain();
            if !snapshots.is_empty() {
                let header = non_blank_or(&settings.state_header, DEFAULT_STATE_HEADER);
                append_section(&mut user, header, snapshots.iter().map(String::as_str));
            }
        }

        if let Some(chat) = &self.sources.chat {
            let lines = chat.drain();
            if !lines.is_empty() {
                let header = non_blank_or(&settings.chat_header, DEFAULT_CHAT_HEADER);
                append_section(&mut user, header, lines.iter().map(String::as_str));
            }
        }

        ResponseRequest {
            system: session.character.clone(),
            assistant: settings.assistant_prompt.clone(),
            user,
        }
    }
}

#[async_trait]
impl TurnExecutor for CompanionTurn {
    async fn execute(&self, scope: TurnScope) -> Result<()> {
        let mut session = scope.run(self.session.lock()).await?;

        let request = self.build_request(&mut session);
        tracing::info!(generation = scope.generation(), "sending request");
        tracing::debug!("user prompt: {}", request.user);

        let reply = scope
            .run(self.responder.respond(scope.clone(), request))
            .await??;
        let reply = reply.trim();
        if reply.is_empty() {
            tracing::debug!("nothing to say this turn");
            return Ok(());
        }

        session.history.push(reply);
        session.replies_since_rotation += 1;
        tracing::info!("AI said: {}", reply);

        scope
            .run(self.synthesizer.speak(scope.clone(), reply.to_string()))
            .await??;
        Ok(())
    }
}

fn non_blank_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

fn append_section<'a>(out: &mut String, header: &str, lines: impl Iterator<Item = &'a str>) {
    out.push('\n');
    out.push_str(SECTION_SEPARATOR);
    out.push('\n');
    out.push_str(header);
    for line in lines {
        out.push('\n');
        out.push_str(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{CancelCause, TurnError};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn sources() -> TurnSources {
        TurnSources {
            speech: Arc::new(NotifyQueue::new(10)),
            chat: Some(Arc::new(NotifyQueue::new(30))),
            state: Some(Arc::new(NotifyQueue::new(3))),
        }
    }

    fn settings() -> PromptSettings {
        PromptSettings {
            speech_header: "Player said".to_string(),
            history_header: "Earlier".to_string(),
            state_header: "State".to_string(),
            chat_header: "Chat".to_string(),
            fallback_prompts: vec!["report status".to_string()],
            assistant_prompt: "Comment on the game".to_string(),
            characters: vec!["grumpy pirate".to_string()],
            rotate_each: 3,
            max_history_records: 10,
        }
    }

    fn scope() -> TurnScope {
        TurnScope::detached(1, Duration::from_secs(30))
    }

    /// A responder that records every request and answers from a script.
    fn recording_responder(
        replies: Vec<&'static str>,
    ) -> (MockResponder, Arc<StdMutex<Vec<ResponseRequest>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let recorded = seen.clone();
        let mut replies = replies.into_iter();
        let mut responder = MockResponder::new();
        responder.expect_respond().returning(move |_scope, request| {
            recorded.lock().unwrap().push(request);
            Ok(replies.next().unwrap_or_default().to_string())
        });
        (responder, seen)
    }

    #[tokio::test]
    async fn test_speech_is_sent_and_reply_spoken() {
        let sources = sources();
        sources.speech.add("did you see that?");
        sources.speech.add("push mid");

        let (responder, seen) = recording_responder(vec!["  Nice shot  "]);
        let mut synthesizer = MockSynthesizer::new();
        synthesizer
            .expect_speak()
            .withf(|_scope, text| text == "Nice shot")
            .times(1)
            .returning(|_, _| Ok(()));

        let turn = CompanionTurn::new(
            sources.clone(),
            settings(),
            Arc::new(responder),
            Arc::new(synthesizer),
        );
        turn.execute(scope()).await.unwrap();

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].user,
            "Player said\n- did you see that?\n- push mid"
        );
        assert_eq!(requests[0].system, "grumpy pirate");
        assert_eq!(requests[0].assistant, "Comment on the game");
        assert!(sources.speech.is_empty());
        assert_eq!(turn.history().await, vec!["Nice shot"]);
    }

    #[tokio::test]
    async fn test_empty_speech_uses_fallback_prompt() {
        let (responder, seen) = recording_responder(vec![""]);
        let mut synthesizer = MockSynthesizer::new();
        synthesizer.expect_speak().times(0);

        let turn = CompanionTurn::new(sources(), settings(), Arc::new(responder), Arc::new(synthesizer));
        turn.execute(scope()).await.unwrap();

        assert_eq!(seen.lock().unwrap()[0].user, "Player said\n- report status");
        assert!(turn.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_state_and_chat_sections() {
        let sources = sources();
        let (responder, seen) = recording_responder(vec!["first reply", "second reply"]);
        let mut synthesizer = MockSynthesizer::new();
        synthesizer.expect_speak().times(2).returning(|_, _| Ok(()));

        let turn = CompanionTurn::new(
            sources.clone(),
            settings(),
            Arc::new(responder),
            Arc::new(synthesizer),
        );
        turn.execute(scope()).await.unwrap();

        sources.speech.add("what now?");
        sources.state.as_ref().unwrap().add("hp 40%");
        sources.chat.as_ref().unwrap().add("viewer: gg");
        turn.execute(scope()).await.unwrap();

        let requests = seen.lock().unwrap();
        assert_eq!(
            requests[1].user,
            "\n----\nEarlier\nfirst reply\nPlayer said\n- what now?\n----\nState\nhp 40%\n----\nChat\nviewer: gg"
        );
        assert_eq!(turn.history().await, vec!["first reply", "second reply"]);
    }

    #[tokio::test]
    async fn test_responder_error_fails_turn() {
        let mut responder = MockResponder::new();
        responder
            .expect_respond()
            .returning(|_, _| Err(anyhow::anyhow!("provider unavailable")));
        let mut synthesizer = MockSynthesizer::new();
        synthesizer.expect_speak().times(0);

        let turn = CompanionTurn::new(sources(), settings(), Arc::new(responder), Arc::new(synthesizer));
        let err = turn.execute(scope()).await.unwrap_err();

        assert_eq!(err.to_string(), "provider unavailable");
        assert!(turn.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_speech_failure_fails_turn_but_keeps_reply() {
        let (responder, _seen) = recording_responder(vec!["hello"]);
        let mut synthesizer = MockSynthesizer::new();
        synthesizer
            .expect_speak()
            .returning(|_, _| Err(anyhow::anyhow!("audio device busy")));

        let turn = CompanionTurn::new(sources(), settings(), Arc::new(responder), Arc::new(synthesizer));

        assert!(turn.execute(scope()).await.is_err());
        assert_eq!(turn.history().await, vec!["hello"]);
    }

    #[tokio::test]
    async fn test_cancelled_scope_skips_provider() {
        let mut responder = MockResponder::new();
        responder.expect_respond().times(0);
        let mut synthesizer = MockSynthesizer::new();
        synthesizer.expect_speak().times(0);

        let turn = CompanionTurn::new(sources(), settings(), Arc::new(responder), Arc::new(synthesizer));
        let scope = scope();
        scope.cancel(CancelCause::Preempted);

        let err = turn.execute(scope).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<TurnError>(),
            Some(&TurnError::Cancelled(CancelCause::Preempted))
        );
    }
}
