//! Prompt text for insight extraction.

use crate::types::FormType;

pub const SYSTEM_PROMPT: &str = r#"You are a financial analyst AI specialized in extracting structured intelligence from SEC annual filings (10-K and 20-F). Your output is consumed programmatically; JSON validity is a hard requirement.

EXTRACTION RULES:
1. Ground every field strictly in the source text. Do not infer or fabricate.
2. If evidence for a field is absent, use null (not empty string, not "N/A").
3. mda_sentiment_score: integer 1-10 based on management tone. 1=deeply cautionary, 10=highly optimistic.
4. capex_guidance_tone: exactly one of ["aggressive", "conservative", "reducing"]. Use "conservative" when ambiguous.
5. macro_concerns: exactly 3 items. Pad with null if fewer signals found.
6. All string fields: concise (under 120 words), factual, third-person.
7. Output ONLY the JSON object. No preamble, no explanation, no markdown fences."#;

/// Placeholder for a section that could not be located.
pub const NOT_AVAILABLE: &str = "(not available)";

const NO_AI_NOTE: &str = "\nNOTE: This company has no apparent AI exposure. Set ai_investment_focus and ai_monetization_status to null.";

/// Build the user prompt for one filing.
pub fn user_prompt(
    ticker: &str,
    fiscal_year: i32,
    form_type: FormType,
    mda: Option<&str>,
    risk: Option<&str>,
    has_ai_exposure: bool,
) -> String {
    let form = form_type.as_str();
    let mut prompt = format!(
        r#"Analyze the following SEC filing sections and return a single JSON object.

COMPANY: {ticker}
FISCAL YEAR: {fiscal_year}
FILING TYPE: {form}
HAS AI EXPOSURE: {ai_flag}

---BEGIN ITEM 7 (MD&A)---
{mda}
---END ITEM 7---

---BEGIN ITEM 1A (RISK FACTORS)---
{risk}
---END ITEM 1A---

REQUIRED JSON SCHEMA:
{{
  "ticker": "{ticker}",
  "year": {fiscal_year},
  "filing_type": "{form}",
  "ai_investment_focus": null,
  "ai_monetization_status": null,
  "capex_guidance_tone": "conservative",
  "china_exposure_risk": null,
  "supply_chain_bottlenecks": null,
  "restructuring_plans": null,
  "efficiency_initiatives": null,
  "mda_sentiment_score": 5,
  "macro_concerns": [null, null, null],
  "growing_segments": null,
  "shrinking_segments": null
}}

Return ONLY the JSON object."#,
        ai_flag = if has_ai_exposure { "YES" } else { "NO" },
        mda = mda.unwrap_or(NOT_AVAILABLE),
        risk = risk.unwrap_or(NOT_AVAILABLE),
    );

    if !has_ai_exposure {
        prompt.push_str(NO_AI_NOTE);
    }
    prompt
}

/// Annotation appended after a response failed to parse or validate.
pub fn correction_note(error: &str) -> String {
    format!("\n\nPrevious attempt failed: {error}. Return ONLY valid JSON.")
}
