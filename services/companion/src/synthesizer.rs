use anyhow::Result;
use async_trait::async_trait;
use companion_core::{Synthesizer, TurnScope};

/// Writes replies to the log instead of a voice backend.
#[derive(Debug, Default)]
pub struct LogSynthesizer;

#[async_trait]
impl Synthesizer for LogSynthesizer {
    async fn speak(&self, scope: TurnScope, text: String) -> Result<()> {
        tracing::info!(generation = scope.generation(), "Speaking: {}", text);
        Ok(())
    }
}
