//! Gemini implementation of the [`Analyst`] trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use filing_extraction::ai::GeminiAnalyst;
//!
//! let analyst = GeminiAnalyst::from_env()?;
//! let extractor = InsightExtractor::connect(Arc::new(analyst), &models, RetryPolicy::default()).await?;
//! ```

use async_trait::async_trait;
use gemini_client::{GeminiClient, GeminiError, GenerateContentRequest, GenerationConfig};

use crate::error::{AnalystError, AnalystResult, PipelineError, Result};
use crate::traits::analyst::{Analyst, PROBE_PROMPT};

/// Output budget for extraction responses.
const MAX_OUTPUT_TOKENS: u32 = 2048;

/// Output budget for the capability probe.
const PROBE_OUTPUT_TOKENS: u32 = 5;

/// Gemini-backed analyst requesting JSON output.
#[derive(Clone)]
pub struct GeminiAnalyst {
    client: GeminiClient,
    max_output_tokens: u32,
}

impl GeminiAnalyst {
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            max_output_tokens: MAX_OUTPUT_TOKENS,
        }
    }

    /// Create from environment variable `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let client = GeminiClient::from_env().map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self::new(client))
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// Map a client error onto the retry classification.
pub fn classify(err: GeminiError) -> AnalystError {
    if err.is_rate_limited() {
        AnalystError::RateLimited(err.to_string())
    } else if err.is_unavailable() {
        AnalystError::Unavailable(err.to_string())
    } else if matches!(err, GeminiError::Parse(_)) {
        AnalystError::Malformed(err.to_string())
    } else {
        AnalystError::Other(err.to_string())
    }
}

#[async_trait]
impl Analyst for GeminiAnalyst {
    async fn generate(&self, model: &str, system: &str, prompt: &str) -> AnalystResult<String> {
        let mut request = GenerateContentRequest::user(prompt)
            .config(GenerationConfig::json(self.max_output_tokens));
        if !system.is_empty() {
            request = request.system(system);
        }

        self.client
            .generate_text(model, request)
            .await
            .map_err(classify)
    }

    async fn probe(&self, model: &str) -> AnalystResult<()> {
        let request =
            GenerateContentRequest::user(PROBE_PROMPT).config(GenerationConfig::text(PROBE_OUTPUT_TOKENS));
        let reply = self
            .client
            .generate_text(model, request)
            .await
            .map_err(classify)?;
        tracing::debug!(model, reply = %reply.trim(), "Probe reply");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let rate = GeminiError::Api {
            status: 429,
            message: "RESOURCE_EXHAUSTED".into(),
        };
        assert!(matches!(classify(rate), AnalystError::RateLimited(_)));

        let down = GeminiError::Api {
            status: 503,
            message: "The model is overloaded".into(),
        };
        assert!(matches!(classify(down), AnalystError::Unavailable(_)));

        let parse = GeminiError::Parse("No candidate text".into());
        assert!(matches!(classify(parse), AnalystError::Malformed(_)));

        let bad = GeminiError::Api {
            status: 400,
            message: "invalid argument".into(),
        };
        assert!(matches!(classify(bad), AnalystError::Other(_)));
    }
}
