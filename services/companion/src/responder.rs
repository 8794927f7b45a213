use anyhow::{Context, Result};
use async_trait::async_trait;
use companion_core::{Responder, ResponseRequest, TurnScope};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

pub const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Option<String>,
}

/// Chat-completions backed responder.
pub struct ChatResponder {
    client: Client,
    api_key: SecretString,
    model: String,
    url: String,
}

impl ChatResponder {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key: SecretString::from(api_key),
            model,
            url: CHAT_COMPLETIONS_URL.to_string(),
        }
    }
}

/// Empty system or assistant prompts are left out of the message list.
pub fn build_messages(request: &ResponseRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(3);
    if !request.system.trim().is_empty() {
        messages.push(json!({ "role": "system", "content": request.system }));
    }
    if !request.assistant.trim().is_empty() {
        messages.push(json!({ "role": "assistant", "content": request.assistant }));
    }
    messages.push(json!({ "role": "user", "content": request.user }));
    messages
}

#[async_trait]
impl Responder for ChatResponder {
    async fn respond(&self, scope: TurnScope, request: ResponseRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": build_messages(&request),
        });

        tracing::debug!(generation = scope.generation(), "Requesting reply from {}", self.model);

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Chat completion request failed")?
            .error_for_status()?
            .json::<LlmResponse>()
            .await
            .context("Malformed chat completion response")?;

        let answer = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message
            .content
            .unwrap_or_default();
        Ok(answer)
    }
}

/// Offline responder that always replies with the same line.
pub struct StubResponder {
    reply: String,
}

impl StubResponder {
    pub const DEFAULT_REPLY: &'static str = "I'm watching. Keep going!";

    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Default for StubResponder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_REPLY)
    }
}

#[async_trait]
impl Responder for StubResponder {
    async fn respond(&self, _scope: TurnScope, request: ResponseRequest) -> Result<String> {
        tracing::debug!("Stub responder got prompt:\n{}", request.user);
        Ok(self.reply.clone())
    }
}
