//! Section extraction from annual filings.
//!
//! Converts a raw filing to plain text and locates two spans:
//! - Item 7, Management's Discussion and Analysis (ends at Item 7A or Item 8)
//! - Item 1A, Risk Factors (ends at Item 2 or Item 7)
//!
//! Filings open with a table of contents that repeats every heading, so a
//! leading fraction of the text is skipped and the chosen start marker is
//! the last one that still leaves a substantial body behind it.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Node};

use crate::types::{SectionLimits, SectionPair};

/// Inserted between head and tail of a truncated section.
pub const TRUNCATION_MARKER: &str = "\n\n[...TRUNCATED...]\n\n";

/// Terms counted by [`has_ai_exposure`].
pub const AI_TERMS: [&str; 10] = [
    "artificial intelligence",
    "machine learning",
    "generative ai",
    "large language model",
    "llm",
    "neural network",
    "gpu cluster",
    "ai infrastructure",
    "foundation model",
    "deep learning",
];

/// Distinct terms required for a filing to count as AI-exposed.
pub const AI_EXPOSURE_THRESHOLD: usize = 3;

lazy_static! {
    // "Item 7" heading, optionally titled. A following "A" fails the
    // trailing newline requirement, so Item 7A never matches here.
    static ref ITEM_7: Regex = Regex::new(
        r"(?im)(?:^|\n)item\.?\s+7[.\s\-—–:]*(?:management\S*\s+discussion[^\n]*|md&a[^\n]*)?\s*\n"
    ).unwrap();

    static ref ITEM_7A: Regex = Regex::new(
        r"(?im)(?:^|\n)item\.?\s+7a[.\s\-—–:]*(?:quantitative[^\n]*)?\s*\n"
    ).unwrap();

    static ref ITEM_8: Regex = Regex::new(
        r"(?im)(?:^|\n)item\.?\s+8[.\s\-—–:]*(?:financial\s+statements?[^\n]*)?\s*\n"
    ).unwrap();

    static ref ITEM_1A: Regex = Regex::new(
        r"(?im)(?:^|\n)item\.?\s+1a[.\s\-—–:]*(?:risk\s+factors?[^\n]*)?\s*\n"
    ).unwrap();

    static ref ITEM_2: Regex = Regex::new(
        r"(?im)(?:^|\n)item\.?\s+2[.\s\-—–:]*(?:propert(?:y|ies)[^\n]*)?\s*\n"
    ).unwrap();

    static ref BLANK_LINES: Regex = Regex::new(r"\n{3,}").unwrap();
    static ref INLINE_SPACE: Regex = Regex::new(r"[ \t]{2,}").unwrap();
}

/// Elements whose text never belongs to a narrative section.
const SKIPPED_ELEMENTS: [&str; 3] = ["script", "style", "table"];

/// Locates and truncates the MD&A and Risk Factors sections of a filing.
#[derive(Debug, Clone, Default)]
pub struct SectionExtractor {
    limits: SectionLimits,
}

impl SectionExtractor {
    pub fn new(limits: SectionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SectionLimits {
        &self.limits
    }

    /// Extract both sections from raw filing bytes.
    ///
    /// Never fails: unreadable or unrecognized input yields an empty pair.
    pub fn extract(&self, raw: &[u8]) -> SectionPair {
        let html = String::from_utf8_lossy(raw);
        let text = html_to_text(&html);
        self.extract_text(&text)
    }

    /// Extract both sections from already-plain text.
    pub fn extract_text(&self, text: &str) -> SectionPair {
        let skip = self.toc_skip(text);
        let body = &text[skip..];

        let mda = extract_between(
            body,
            &ITEM_7,
            &[&*ITEM_7A, &*ITEM_8],
            self.limits.min_trailing_chars,
        );
        let risk = extract_between(
            body,
            &ITEM_1A,
            &[&*ITEM_2, &*ITEM_7],
            self.limits.min_trailing_chars,
        );

        let mda_chars = mda.map_or(0, |s| s.chars().count());
        let risk_chars = risk.map_or(0, |s| s.chars().count());

        tracing::debug!(mda_chars, risk_chars, skipped_bytes = skip, "Extracted sections");

        SectionPair {
            mda_text: mda.map(|s| truncate(s, self.limits.mda_max_chars)),
            risk_text: risk.map(|s| truncate(s, self.limits.risk_max_chars)),
            mda_chars,
            risk_chars,
        }
    }

    /// Byte offset of the end of the skipped table-of-contents region.
    fn toc_skip(&self, text: &str) -> usize {
        let chars = text.chars().count();
        let divisor = self.limits.toc_skip_divisor.max(1);
        let skip_chars = (chars / divisor).min(self.limits.toc_skip_cap);
        byte_offset(text, skip_chars)
    }
}

/// Convert an HTML document to newline-separated plain text.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut pieces: Vec<&str> = Vec::new();

    let mut stack = vec![document.tree.root()];
    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Element(element) if SKIPPED_ELEMENTS.contains(&element.name()) => continue,
            Node::Text(text) => pieces.push(&**text),
            _ => {}
        }
        // Reverse so children pop in document order
        let children: Vec<_> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }

    let joined = pieces.join("\n");
    let collapsed = BLANK_LINES.replace_all(&joined, "\n\n");
    let collapsed = INLINE_SPACE.replace_all(&collapsed, " ");
    collapsed.trim().to_string()
}

/// Keep at most `max_chars` characters, preserving the head and tail.
///
/// 70% of the budget left after the marker goes to the head. A budget too
/// small to hold the marker falls back to a plain prefix.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let len = text.chars().count();
    if len <= max_chars {
        return text.to_string();
    }

    let marker_len = TRUNCATION_MARKER.chars().count();
    if max_chars < marker_len {
        return text.chars().take(max_chars).collect();
    }

    let budget = max_chars - marker_len;
    let head = budget * 7 / 10;
    let tail = budget - head;

    let head_end = byte_offset(text, head);
    let tail_start = byte_offset(text, len - tail);

    let mut out = String::with_capacity(head_end + TRUNCATION_MARKER.len() + text.len() - tail_start);
    out.push_str(&text[..head_end]);
    out.push_str(TRUNCATION_MARKER);
    out.push_str(&text[tail_start..]);
    out
}

/// Whether the sections mention enough distinct AI terms.
pub fn has_ai_exposure(mda: Option<&str>, risk: Option<&str>) -> bool {
    let combined = format!("{}{}", mda.unwrap_or(""), risk.unwrap_or("")).to_lowercase();
    AI_TERMS
        .iter()
        .filter(|term| combined.contains(*term))
        .count()
        >= AI_EXPOSURE_THRESHOLD
}

fn extract_between<'a>(
    text: &'a str,
    start: &Regex,
    ends: &[&Regex],
    min_trailing_chars: usize,
) -> Option<&'a str> {
    let start_at = best_match_end(text, start, min_trailing_chars)?;

    let end_at = ends
        .iter()
        .filter_map(|pattern| pattern.find_at(text, start_at))
        .map(|m| m.start())
        .min()
        .unwrap_or(text.len());

    let section = text[start_at..end_at].trim();
    if section.is_empty() {
        None
    } else {
        Some(section)
    }
}

/// End of the last match followed by more than `min_trailing_chars`
/// characters, else the end of the last match.
fn best_match_end(text: &str, pattern: &Regex, min_trailing_chars: usize) -> Option<usize> {
    let ends: Vec<usize> = pattern.find_iter(text).map(|m| m.end()).collect();
    let last = *ends.last()?;

    ends.iter()
        .rev()
        .copied()
        .find(|&end| text[end..].chars().nth(min_trailing_chars).is_some())
        .or(Some(last))
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filler(lines: usize) -> String {
        "Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n".repeat(lines)
    }

    fn sample_filing() -> String {
        let mut doc = String::new();
        doc.push_str("TABLE OF CONTENTS\nItem 1A. Risk Factors\nItem 7. MD&A\nItem 8. Financial Statements\n");
        doc.push_str(&filler(60));
        doc.push_str("Item 1A. Risk Factors\n");
        doc.push_str(&"Our supply chain depends on few vendors. ".repeat(100));
        doc.push_str("\nItem 2. Properties\n");
        doc.push_str("We lease office space.\n");
        doc.push_str("Item 7. Management's Discussion and Analysis of Financial Condition\n");
        doc.push_str(&"Revenue grew on data center demand. ".repeat(100));
        doc.push_str("\nItem 7A. Quantitative and Qualitative Disclosures About Market Risk\n");
        doc.push_str("Interest rate exposure is limited.\n");
        doc.push_str("Item 8. Financial Statements and Supplementary Data\n");
        doc.push_str(&filler(60));
        doc
    }

    #[test]
    fn test_extracts_mda_between_item_7_and_7a() {
        let pair = SectionExtractor::default().extract_text(&sample_filing());
        let mda = pair.mda_text.unwrap();
        assert!(mda.starts_with("Revenue grew"));
        assert!(mda.ends_with("data center demand."));
        assert!(!mda.contains("Interest rate"));
        assert_eq!(pair.mda_chars, mda.chars().count());
    }

    #[test]
    fn test_extracts_risk_between_item_1a_and_2() {
        let pair = SectionExtractor::default().extract_text(&sample_filing());
        let risk = pair.risk_text.unwrap();
        assert!(risk.starts_with("Our supply chain"));
        assert!(!risk.contains("lease office"));
    }

    #[test]
    fn test_mda_ends_at_item_8_without_7a() {
        let doc = sample_filing().replace(
            "Item 7A. Quantitative and Qualitative Disclosures About Market Risk\n",
            "",
        );
        let mda = SectionExtractor::default().extract_text(&doc).mda_text.unwrap();
        assert!(mda.contains("Interest rate exposure"));
        assert!(!mda.contains("Supplementary Data"));
    }

    #[test]
    fn test_risk_ends_at_item_7_without_item_2() {
        let doc = sample_filing()
            .replace("\nItem 2. Properties\n", "\n")
            .replace("We lease office space.\n", "");
        let risk = SectionExtractor::default().extract_text(&doc).risk_text.unwrap();
        assert!(risk.starts_with("Our supply chain"));
        assert!(risk.ends_with("depends on few vendors."));
        assert!(!risk.contains("Management's Discussion"));
        assert!(!risk.contains("Revenue grew"));
    }

    #[test]
    fn test_missing_markers_yield_none() {
        let pair = SectionExtractor::default().extract_text(&filler(200));
        assert_eq!(pair, SectionPair::default());
        assert!(pair.is_empty());
    }

    #[test]
    fn test_marker_only_in_toc_region_is_missed() {
        let mut doc = String::from("Item 7. MD&A\nshort\n");
        doc.push_str(&filler(200));
        let pair = SectionExtractor::default().extract_text(&doc);
        assert!(pair.mda_text.is_none());
    }

    #[test]
    fn test_prefers_last_marker_with_long_trailing_text() {
        let mut doc = sample_filing();
        // Exhibit index near the end repeats the heading with little after it
        doc.push_str("Item 7. Management's Discussion\nSee page 40.\n");
        let mda = SectionExtractor::default().extract_text(&doc).mda_text.unwrap();
        assert!(mda.starts_with("Revenue grew"));
    }

    #[test]
    fn test_falls_back_to_last_marker() {
        let mut doc = filler(50);
        doc.push_str("Item 7. MD&A\nFirst body.\nItem 7. MD&A\nSecond body.\n");
        let mda = SectionExtractor::default().extract_text(&doc).mda_text.unwrap();
        assert_eq!(mda, "Second body.");
    }

    #[test]
    fn test_empty_section_is_none() {
        let mut doc = filler(50);
        doc.push_str("Item 7. MD&A\n   \nItem 8. Financial Statements\n");
        doc.push_str(&filler(50));
        let pair = SectionExtractor::default().extract_text(&doc);
        assert!(pair.mda_text.is_none());
        assert_eq!(pair.mda_chars, 0);
    }

    #[test]
    fn test_html_to_text_drops_scripts_styles_and_tables() {
        let html = "<html><head><style>.x { color: red }</style><script>var item = 7;</script></head>\
                    <body><p>Hello</p><table><tr><td>Secret</td></tr></table><p>World</p></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("Secret"));
        assert!(!text.contains("var item"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn test_html_to_text_collapses_whitespace() {
        let text = html_to_text("<div>a   b\t\tc</div><div>\n\n\n\n</div><div>d</div>");
        assert!(text.contains("a b c"));
        assert!(!text.contains("\n\n\n"));
    }

    #[test]
    fn test_extract_from_html_bytes() {
        let body: String = sample_filing()
            .lines()
            .map(|line| format!("<p>{line}</p>"))
            .collect();
        let html = format!("<html><body>{body}</body></html>");
        let pair = SectionExtractor::default().extract(html.as_bytes());
        assert!(pair.mda_text.unwrap().contains("data center demand"));
        assert!(pair.risk_text.unwrap().contains("supply chain"));
    }

    #[test]
    fn test_truncate_splits_head_and_tail() {
        let text = "a".repeat(100) + &"b".repeat(100);
        let out = truncate(&text, 121);
        // budget 100: 70 head, 30 tail
        assert_eq!(out, format!("{}{}{}", "a".repeat(70), TRUNCATION_MARKER, "b".repeat(30)));
    }

    #[test]
    fn test_truncate_tiny_budget_is_plain_prefix() {
        assert_eq!(truncate("abcdefghijklmnopqrstuvwxyz0123456789", 5), "abcde");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "é".repeat(300);
        let out = truncate(&text, 121);
        assert_eq!(out.chars().count(), 121);
    }

    #[test]
    fn test_ai_exposure_threshold() {
        assert!(has_ai_exposure(
            Some("We invest in Machine Learning and Deep Learning."),
            Some("Generative AI may disrupt us."),
        ));
        assert!(!has_ai_exposure(Some("machine learning, machine learning"), Some("LLM")));
        assert!(!has_ai_exposure(None, None));
    }

    proptest! {
        #[test]
        fn prop_truncate_respects_budget(text in "[a-zé \n.]{0,600}", max in 0usize..400) {
            let out = truncate(&text, max);
            let len = text.chars().count();
            if len <= max {
                prop_assert_eq!(&out, &text);
            } else {
                prop_assert!(out.chars().count() <= max);
                let marker_len = TRUNCATION_MARKER.chars().count();
                if max >= marker_len {
                    prop_assert_eq!(out.matches(TRUNCATION_MARKER).count(), 1);
                    let (head, tail) = out.split_once(TRUNCATION_MARKER).unwrap();
                    prop_assert!(text.starts_with(head));
                    prop_assert!(text.ends_with(tail));
                } else {
                    prop_assert!(text.starts_with(&out));
                }
            }
        }
    }
}
