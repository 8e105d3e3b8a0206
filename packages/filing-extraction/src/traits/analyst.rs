//! Remote structured-extraction service.

use async_trait::async_trait;

use crate::error::AnalystResult;

/// Prompt used to check that a model answers at all.
pub const PROBE_PROMPT: &str = "Return the word OK.";

/// A text generation service that can be asked for JSON.
///
/// Implementations classify their failures into [`AnalystError`] variants
/// so the caller can choose a backoff; they do not retry themselves.
///
/// [`AnalystError`]: crate::error::AnalystError
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Generate a response from `model` for the given system and user prompt.
    async fn generate(&self, model: &str, system: &str, prompt: &str) -> AnalystResult<String>;

    /// Check that `model` is reachable and answers.
    async fn probe(&self, model: &str) -> AnalystResult<()> {
        self.generate(model, "", PROBE_PROMPT).await.map(|_| ())
    }
}
