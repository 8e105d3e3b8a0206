//! Sections extracted from a filing, handed from the fetch stage to analysis.

/// Management discussion and risk factor text for one filing.
///
/// Counts are taken before truncation, in Unicode scalar values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionPair {
    pub mda_text: Option<String>,
    pub risk_text: Option<String>,
    pub mda_chars: usize,
    pub risk_chars: usize,
}

impl SectionPair {
    /// Neither section could be located.
    pub fn is_empty(&self) -> bool {
        self.mda_text.is_none() && self.risk_text.is_none()
    }
}
