//! Coverage report: which configured units are still missing.

use std::collections::HashSet;
use std::fmt::Write;

use crate::types::{UnitKey, Universe};

/// Coverage of one configured ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerGap {
    pub ticker: String,
    pub tier: String,
    /// Years the ticker should have, most recent first
    pub expected: Vec<i32>,
    /// Expected years not in the done-set
    pub missing: Vec<i32>,
}

impl TickerGap {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn done(&self) -> usize {
        self.expected.len() - self.missing.len()
    }
}

/// Compare the done-set against the universe.
///
/// Expected years are the configured years at or above a ticker's IPO
/// floor, minus `excluded_years`. Results are sorted by ticker.
pub fn gap_report(
    universe: &Universe,
    done: &HashSet<UnitKey>,
    excluded_years: &[i32],
) -> Vec<TickerGap> {
    let years = universe.years_descending();

    let mut gaps: Vec<TickerGap> = universe
        .assignments()
        .into_iter()
        .map(|(ticker, tier)| {
            let expected: Vec<i32> = years
                .iter()
                .copied()
                .filter(|y| !excluded_years.contains(y))
                .filter(|y| universe.is_listed(ticker, *y))
                .collect();
            let missing = expected
                .iter()
                .copied()
                .filter(|y| !done.contains(&UnitKey::new(ticker, *y)))
                .collect();
            TickerGap {
                ticker: ticker.to_string(),
                tier: tier.to_string(),
                expected,
                missing,
            }
        })
        .collect();

    gaps.sort_by(|a, b| a.ticker.cmp(&b.ticker));
    gaps
}

/// Render a plain-text report listing incomplete tickers and totals.
pub fn render_gap_report(gaps: &[TickerGap]) -> String {
    let expected: usize = gaps.iter().map(|g| g.expected.len()).sum();
    let missing: usize = gaps.iter().map(|g| g.missing.len()).sum();
    let incomplete: Vec<&TickerGap> = gaps.iter().filter(|g| !g.is_complete()).collect();

    let mut out = String::new();
    let _ = writeln!(out, "FILING INSIGHTS GAP REPORT");
    let _ = writeln!(out, "{}", "=".repeat(60));

    if incomplete.is_empty() {
        let _ = writeln!(out, "No gaps. All expected filings are extracted.");
    } else {
        let _ = writeln!(out, "{:<8} {:<16} {:>9}  MISSING YEARS", "TICKER", "TIER", "DONE");
        for gap in &incomplete {
            let years: Vec<String> = gap.missing.iter().map(i32::to_string).collect();
            let _ = writeln!(
                out,
                "{:<8} {:<16} {:>4}/{:<4}  {}",
                gap.ticker,
                gap.tier,
                gap.done(),
                gap.expected.len(),
                years.join(", ")
            );
        }
    }

    let _ = writeln!(out, "{}", "-".repeat(60));
    let _ = writeln!(out, "Tickers: {} ({} incomplete)", gaps.len(), incomplete.len());
    let _ = writeln!(
        out,
        "Filings: {} expected, {} extracted, {} missing",
        expected,
        expected - missing,
        missing
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> Universe {
        Universe::default()
            .with_years([2022, 2023, 2024])
            .with_tier("semis", ["NVDA", "ARM"])
            .with_tier("mega_cap", ["AAPL"])
            .with_ipo_floor("ARM", 2023)
    }

    #[test]
    fn test_gap_report_respects_floor_and_exclusions() {
        let done: HashSet<UnitKey> = [UnitKey::new("NVDA", 2023), UnitKey::new("AAPL", 2023)]
            .into_iter()
            .collect();

        let gaps = gap_report(&universe(), &done, &[2024]);
        let tickers: Vec<&str> = gaps.iter().map(|g| g.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAPL", "ARM", "NVDA"]);

        let arm = &gaps[1];
        assert_eq!(arm.tier, "semis");
        assert_eq!(arm.expected, vec![2023]);
        assert_eq!(arm.missing, vec![2023]);

        let nvda = &gaps[2];
        assert_eq!(nvda.expected, vec![2023, 2022]);
        assert_eq!(nvda.missing, vec![2022]);
        assert_eq!(nvda.done(), 1);
    }

    #[test]
    fn test_render_totals() {
        let done: HashSet<UnitKey> = HashSet::new();
        let report = render_gap_report(&gap_report(&universe(), &done, &[]));
        assert!(report.contains("Tickers: 3 (3 incomplete)"));
        assert!(report.contains("Filings: 8 expected, 0 extracted, 8 missing"));
        assert!(report.contains("2024, 2023, 2022"));
    }

    #[test]
    fn test_render_complete() {
        let universe = Universe::default().with_years([2024]).with_tier("t", ["AAPL"]);
        let done: HashSet<UnitKey> = [UnitKey::new("AAPL", 2024)].into_iter().collect();
        let report = render_gap_report(&gap_report(&universe, &done, &[]));
        assert!(report.contains("No gaps"));
        assert!(report.contains("Filings: 1 expected, 1 extracted, 0 missing"));
    }
}
