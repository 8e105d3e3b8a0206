//! Resilient insight extraction.
//!
//! Wraps a single [`Analyst`] call per attempt with response validation,
//! classified backoff, and a null-skeleton fallback once retries run out.
//! [`InsightExtractor::extract`] never fails.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::{AnalystError, AnalystResult, PipelineError, Result};
use crate::pipeline::prompts;
use crate::sections::has_ai_exposure;
use crate::traits::Analyst;
use crate::types::{
    CapexTone, FormType, InsightRecord, SectionPair, WorkUnit, MACRO_CONCERN_SLOTS,
    SENTIMENT_MAX, SENTIMENT_MIDPOINT, SENTIMENT_MIN,
};

/// Fields every response must carry, even when null.
pub const REQUIRED_FIELDS: [&str; 11] = [
    "ai_investment_focus",
    "ai_monetization_status",
    "capex_guidance_tone",
    "china_exposure_risk",
    "supply_chain_bottlenecks",
    "restructuring_plans",
    "efficiency_initiatives",
    "mda_sentiment_score",
    "macro_concerns",
    "growing_segments",
    "shrinking_segments",
];

/// Attempt budget and backoff schedule for one extraction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first
    pub max_attempts: u32,

    /// Rate limits wait `base * 2^attempt` plus up to `base` of jitter
    pub rate_limit_base: Duration,

    /// Unavailability waits `step * (attempt + 1)`
    pub unavailable_step: Duration,

    pub malformed_delay: Duration,
    pub other_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            rate_limit_base: Duration::from_secs(1),
            unavailable_step: Duration::from_secs(5),
            malformed_delay: Duration::from_secs(2),
            other_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// A policy with the default attempt budget and no waiting.
    pub fn immediate() -> Self {
        Self {
            rate_limit_base: Duration::ZERO,
            unavailable_step: Duration::ZERO,
            malformed_delay: Duration::ZERO,
            other_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Wait before retrying after `err` on zero-based `attempt`.
    pub fn backoff(&self, err: &AnalystError, attempt: u32) -> Duration {
        match err {
            AnalystError::RateLimited(_) => {
                let exp = self
                    .rate_limit_base
                    .saturating_mul(2u32.saturating_pow(attempt));
                exp + jitter(self.rate_limit_base)
            }
            AnalystError::Unavailable(_) => self.unavailable_step.saturating_mul(attempt + 1),
            AnalystError::Malformed(_) => self.malformed_delay,
            AnalystError::Other(_) => self.other_delay,
        }
    }
}

fn jitter(upper: Duration) -> Duration {
    let upper_ms = upper.as_millis() as u64;
    if upper_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(fastrand::u64(0..upper_ms))
}

/// Input for one extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub ticker: String,
    pub fiscal_year: i32,
    pub form_type: FormType,
    pub mda_text: Option<String>,
    pub risk_text: Option<String>,
    pub has_topic_signal: bool,
}

impl ExtractionRequest {
    /// Build a request from a unit and its extracted sections.
    pub fn from_sections(unit: &WorkUnit, sections: SectionPair) -> Self {
        let has_topic_signal =
            has_ai_exposure(sections.mda_text.as_deref(), sections.risk_text.as_deref());
        Self {
            ticker: unit.ticker.clone(),
            fiscal_year: unit.fiscal_year,
            form_type: unit.form_type,
            mda_text: sections.mda_text,
            risk_text: sections.risk_text,
            has_topic_signal,
        }
    }

    fn user_prompt(&self) -> String {
        prompts::user_prompt(
            &self.ticker,
            self.fiscal_year,
            self.form_type,
            self.mda_text.as_deref(),
            self.risk_text.as_deref(),
            self.has_topic_signal,
        )
    }

    fn null_skeleton(&self) -> InsightRecord {
        InsightRecord::null_skeleton(&self.ticker, self.fiscal_year, self.form_type)
    }
}

/// Result of one extraction.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub record: InsightRecord,

    /// Calls made to the analyst
    pub attempts: u32,

    /// Last error when `record` is the null skeleton
    pub fallback_reason: Option<String>,
}

impl ExtractionOutcome {
    pub fn is_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Extraction client bound to the model chosen at startup.
pub struct InsightExtractor<A: Analyst> {
    analyst: Arc<A>,
    model: String,
    policy: RetryPolicy,
}

impl<A: Analyst> InsightExtractor<A> {
    /// Probe `candidates` in order and bind to the first model that answers.
    pub async fn connect(analyst: Arc<A>, candidates: &[String], policy: RetryPolicy) -> Result<Self> {
        for model in candidates {
            match analyst.probe(model).await {
                Ok(()) => {
                    info!(model = %model, "Model probe succeeded");
                    return Ok(Self::with_model(analyst, model.clone(), policy));
                }
                Err(e) => warn!(model = %model, error = %e, "Model unavailable"),
            }
        }

        Err(PipelineError::NoModelAvailable {
            tried: candidates.to_vec(),
        })
    }

    /// Bind to a known model without probing.
    pub fn with_model(analyst: Arc<A>, model: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            analyst,
            model: model.into(),
            policy,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Extract a validated record, falling back to the null skeleton.
    pub async fn extract(&self, request: &ExtractionRequest) -> ExtractionOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let base_prompt = request.user_prompt();
        let mut last_error: Option<AnalystError> = None;

        for attempt in 0..max_attempts {
            let prompt = match &last_error {
                Some(AnalystError::Malformed(msg)) => {
                    format!("{}{}", base_prompt, prompts::correction_note(msg))
                }
                _ => base_prompt.clone(),
            };

            match self.attempt(&prompt, request).await {
                Ok(record) => {
                    return ExtractionOutcome {
                        record,
                        attempts: attempt + 1,
                        fallback_reason: None,
                    };
                }
                Err(err) => {
                    let is_last = attempt + 1 == max_attempts;
                    let wait = if is_last {
                        Duration::ZERO
                    } else {
                        self.policy.backoff(&err, attempt)
                    };
                    warn!(
                        ticker = %request.ticker,
                        year = request.fiscal_year,
                        attempt = attempt + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Extraction attempt failed"
                    );
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        error!(
            ticker = %request.ticker,
            year = request.fiscal_year,
            attempts = max_attempts,
            reason = %reason,
            "All extraction attempts failed, using null skeleton"
        );

        ExtractionOutcome {
            record: request.null_skeleton(),
            attempts: max_attempts,
            fallback_reason: Some(reason),
        }
    }

    async fn attempt(&self, prompt: &str, request: &ExtractionRequest) -> AnalystResult<InsightRecord> {
        let raw = self
            .analyst
            .generate(&self.model, prompts::SYSTEM_PROMPT, prompt)
            .await?;
        let value: Value = serde_json::from_str(strip_fences(&raw))?;
        validate(value, request)
    }
}

/// Remove a surrounding markdown code fence, if any.
pub fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Validate and normalize a raw response into a record for `request`.
pub fn validate(value: Value, request: &ExtractionRequest) -> AnalystResult<InsightRecord> {
    let Value::Object(mut obj) = value else {
        return Err(AnalystError::Malformed("expected a JSON object".into()));
    };

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|f| !obj.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        return Err(AnalystError::Malformed(format!(
            "missing fields: {}",
            missing.join(", ")
        )));
    }

    // The echoed year is replaced below but must still be well-formed
    if let Some(Value::String(year)) = obj.get("year") {
        year.trim()
            .parse::<i64>()
            .map_err(|_| AnalystError::Malformed(format!("invalid year: {year:?}")))?;
    }

    let score = coerce_score(obj.get("mda_sentiment_score"))?;
    let capex_guidance_tone = obj
        .get("capex_guidance_tone")
        .and_then(Value::as_str)
        .and_then(CapexTone::parse)
        .unwrap_or_default();
    let macro_concerns = coerce_concerns(obj.get("macro_concerns"));

    let mut text = |field: &str| coerce_text(obj.remove(field));

    Ok(InsightRecord {
        ticker: request.ticker.to_uppercase(),
        fiscal_year: request.fiscal_year,
        filing_type: request.form_type,
        ai_investment_focus: text("ai_investment_focus"),
        ai_monetization_status: text("ai_monetization_status"),
        capex_guidance_tone,
        china_exposure_risk: text("china_exposure_risk"),
        supply_chain_bottlenecks: text("supply_chain_bottlenecks"),
        restructuring_plans: text("restructuring_plans"),
        efficiency_initiatives: text("efficiency_initiatives"),
        mda_sentiment_score: score,
        macro_concerns,
        growing_segments: text("growing_segments"),
        shrinking_segments: text("shrinking_segments"),
    })
}

fn coerce_score(value: Option<&Value>) -> AnalystResult<i64> {
    let score = match value {
        None | Some(Value::Null) => SENTIMENT_MIDPOINT,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => i,
            None => n
                .as_f64()
                .map(|f| f.trunc() as i64)
                .ok_or_else(|| AnalystError::Malformed(format!("invalid score: {n}")))?,
        },
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| AnalystError::Malformed(format!("invalid score: {s:?}")))?,
        Some(other) => {
            return Err(AnalystError::Malformed(format!("invalid score: {other}")));
        }
    };
    Ok(score.clamp(SENTIMENT_MIN, SENTIMENT_MAX))
}

fn coerce_concerns(value: Option<&Value>) -> [Option<String>; MACRO_CONCERN_SLOTS] {
    let mut concerns: [Option<String>; MACRO_CONCERN_SLOTS] = Default::default();
    if let Some(Value::Array(items)) = value {
        for (slot, item) in concerns.iter_mut().zip(items.iter()) {
            *slot = coerce_text(Some(item.clone()));
        }
    }
    concerns
}

/// Strings pass through; other non-null values keep their compact JSON text.
fn coerce_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockAnalyst;
    use serde_json::json;

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            ticker: "nvda".into(),
            fiscal_year: 2024,
            form_type: FormType::TenK,
            mda_text: Some("Data center revenue grew.".into()),
            risk_text: None,
            has_topic_signal: true,
        }
    }

    fn full_response() -> Value {
        json!({
            "ticker": "WRONG",
            "year": "2019",
            "filing_type": "10-Q",
            "ai_investment_focus": "Accelerated computing",
            "ai_monetization_status": ["data center", "software"],
            "capex_guidance_tone": "Aggressive",
            "china_exposure_risk": null,
            "supply_chain_bottlenecks": "CoWoS packaging",
            "restructuring_plans": null,
            "efficiency_initiatives": null,
            "mda_sentiment_score": "8",
            "macro_concerns": ["export controls"],
            "growing_segments": "Data Center",
            "shrinking_segments": null
        })
    }

    #[test]
    fn test_validate_stamps_identity_and_coerces() {
        let record = validate(full_response(), &request()).unwrap();
        assert_eq!(record.ticker, "NVDA");
        assert_eq!(record.fiscal_year, 2024);
        assert_eq!(record.filing_type, FormType::TenK);
        assert_eq!(record.mda_sentiment_score, 8);
        assert_eq!(record.capex_guidance_tone, CapexTone::Aggressive);
        assert_eq!(
            record.ai_monetization_status.as_deref(),
            Some(r#"["data center","software"]"#)
        );
        assert_eq!(
            record.macro_concerns,
            [Some("export controls".into()), None, None]
        );
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut value = full_response();
        value.as_object_mut().unwrap().remove("growing_segments");
        let err = validate(value, &request()).unwrap_err();
        assert!(matches!(err, AnalystError::Malformed(ref m) if m.contains("growing_segments")));
    }

    #[test]
    fn test_validate_rejects_non_object() {
        assert!(matches!(
            validate(json!([1, 2, 3]), &request()),
            Err(AnalystError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unparseable_numbers() {
        let mut value = full_response();
        value["mda_sentiment_score"] = json!("very positive");
        assert!(validate(value, &request()).is_err());

        let mut value = full_response();
        value["year"] = json!("FY24");
        assert!(validate(value, &request()).is_err());
    }

    #[test]
    fn test_score_clamping_and_defaults() {
        for (raw, expected) in [
            (json!(42), 10),
            (json!(-3), 1),
            (json!(0), 1),
            (json!(7.9), 7),
            (json!(null), 5),
            (json!(" 3 "), 3),
        ] {
            let mut value = full_response();
            value["mda_sentiment_score"] = raw;
            assert_eq!(validate(value, &request()).unwrap().mda_sentiment_score, expected);
        }
    }

    #[test]
    fn test_concerns_forced_to_three_slots() {
        for raw in [json!([]), json!(["a"]), json!(["a", "b", "c", "d", "e"]), json!("a")] {
            let mut value = full_response();
            value["macro_concerns"] = raw;
            let record = validate(value, &request()).unwrap();
            assert_eq!(record.macro_concerns.len(), 3);
        }

        let mut value = full_response();
        value["macro_concerns"] = json!(["a", "b", "c", "d", "e"]);
        let record = validate(value, &request()).unwrap();
        assert_eq!(record.macro_concerns[2].as_deref(), Some("c"));
    }

    #[test]
    fn test_unknown_tone_is_conservative() {
        let mut value = full_response();
        value["capex_guidance_tone"] = json!("expansionary");
        assert_eq!(
            validate(value, &request()).unwrap().capex_guidance_tone,
            CapexTone::Conservative
        );
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_fences("  {}  "), "{}");
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        let rate = AnalystError::RateLimited("429".into());
        for attempt in 0..4 {
            let wait = policy.backoff(&rate, attempt);
            let floor = Duration::from_secs(1 << attempt);
            assert!(wait >= floor && wait < floor + Duration::from_secs(1));
        }
        assert_eq!(
            policy.backoff(&AnalystError::Unavailable("503".into()), 2),
            Duration::from_secs(15)
        );
        assert_eq!(
            policy.backoff(&AnalystError::Malformed("x".into()), 0),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.backoff(&AnalystError::Other("x".into()), 3),
            Duration::from_secs(3)
        );
    }

    #[tokio::test]
    async fn test_extract_succeeds_first_try() {
        let analyst = Arc::new(MockAnalyst::new());
        let extractor = InsightExtractor::with_model(analyst.clone(), "m", RetryPolicy::immediate());

        let outcome = extractor.extract(&request()).await;
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.record.ticker, "NVDA");
        assert_eq!(analyst.call_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_response_annotates_next_prompt() {
        let analyst = Arc::new(
            MockAnalyst::new().with_script("NVDA", vec![Ok("not json at all".into())]),
        );
        let extractor = InsightExtractor::with_model(analyst.clone(), "m", RetryPolicy::immediate());

        let outcome = extractor.extract(&request()).await;
        assert!(!outcome.is_fallback());
        assert_eq!(outcome.attempts, 2);

        let calls = analyst.calls();
        assert!(!calls[0].prompt.contains("Previous attempt failed"));
        assert!(calls[1].prompt.contains("Previous attempt failed"));
        assert!(calls[1].prompt.ends_with("Return ONLY valid JSON."));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_null_skeleton() {
        let analyst = Arc::new(
            MockAnalyst::new().always_failing(AnalystError::RateLimited("RESOURCE_EXHAUSTED".into())),
        );
        let extractor = InsightExtractor::with_model(analyst.clone(), "m", RetryPolicy::immediate());

        let outcome = extractor.extract(&request()).await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.attempts, 4);
        assert_eq!(analyst.call_count(), 4);
        assert_eq!(
            outcome.record,
            InsightRecord::null_skeleton("NVDA", 2024, FormType::TenK)
        );
        assert!(outcome.fallback_reason.unwrap().contains("RESOURCE_EXHAUSTED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_final_attempt() {
        let analyst = Arc::new(
            MockAnalyst::new().always_failing(AnalystError::Other("boom".into())),
        );
        let policy = RetryPolicy::default().with_max_attempts(2);
        let extractor = InsightExtractor::with_model(analyst, "m", policy);

        let start = tokio::time::Instant::now();
        let outcome = extractor.extract(&request()).await;
        assert!(outcome.is_fallback());
        // One 3s wait between the two attempts, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_connect_picks_first_answering_model() {
        let analyst = Arc::new(MockAnalyst::new().with_unavailable_model("model-a"));
        let candidates = vec!["model-a".to_string(), "model-b".to_string()];

        let extractor = InsightExtractor::connect(analyst, &candidates, RetryPolicy::immediate())
            .await
            .unwrap();
        assert_eq!(extractor.model(), "model-b");
    }

    #[tokio::test]
    async fn test_connect_fails_when_no_model_answers() {
        let analyst = Arc::new(
            MockAnalyst::new()
                .with_unavailable_model("model-a")
                .with_unavailable_model("model-b"),
        );
        let candidates = vec!["model-a".to_string(), "model-b".to_string()];

        let err = InsightExtractor::connect(analyst, &candidates, RetryPolicy::immediate())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::NoModelAvailable { ref tried } if tried.len() == 2));
    }
}
