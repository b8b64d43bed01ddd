//! Regex rules for the rule-based strategy.
//!
//! Covers the three field patterns and the reference-number pattern:
//! - `re: <deal phrase>` → deal name
//! - `usd 1,234.56` → amount
//! - `20-Nov-2023` → effective date
//! - `reference: <deal phrase>` → duplicate reference
//!
//! The deal phrase grammar is organization + `usd` + notional in
//! millions (`425mm`) + month/year code (`mar22`). Only the organization
//! varies between deployments.

use regex::Regex;
use tracing::debug;

/// Organization the default deal grammar recognises.
pub const DEFAULT_DEAL_ORGANIZATION: &str = "cantor fitzgerald lp";

const MONTH_ALTERNATION: &str = "jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec";

/// Deal-name grammar: which organization prefixes a deal phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealGrammar {
    organization: String,
}

impl DealGrammar {
    pub fn new(organization: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
        }
    }

    /// Regex source for a deal phrase (no anchors, no flags).
    ///
    /// Words of the organization may be separated by any whitespace.
    fn phrase_pattern(&self) -> String {
        let organization = self
            .organization
            .split_whitespace()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(r"\s+");
        format!(r"{organization}\s+usd\s+\d+mm\s+(?:{MONTH_ALTERNATION})\d+")
    }
}

impl Default for DealGrammar {
    fn default() -> Self {
        Self::new(DEFAULT_DEAL_ORGANIZATION)
    }
}

/// Compiled patterns used by the rule-based extractor and duplicate policy.
///
/// All patterns are case-insensitive and search the whole text; the first
/// match wins.
#[derive(Debug, Clone)]
pub struct RulePatterns {
    deal_name: Regex,
    amount: Regex,
    effective_date: Regex,
    reference: Regex,
}

impl RulePatterns {
    /// Compile the patterns for a deal grammar.
    pub fn new(grammar: &DealGrammar) -> Result<Self, regex::Error> {
        let phrase = grammar.phrase_pattern();
        Ok(Self {
            deal_name: Regex::new(&format!(r"(?i)re:\s*({phrase})"))?,
            amount: Regex::new(r"(?i)usd\s*(\d{1,3}(?:,\d{3})*\.\d{2})")?,
            effective_date: Regex::new(&format!(
                r"(?i)\d{{1,2}}-(?:{MONTH_ALTERNATION})-\d{{4}}"
            ))?,
            reference: Regex::new(&format!(r"(?i)reference\s*:\s*({phrase})"))?,
        })
    }

    /// Deal phrase following `re:`.
    pub fn deal_name<'t>(&self, text: &'t str) -> Option<&'t str> {
        capture_group(&self.deal_name, text, "deal_name")
    }

    /// USD amount digits (thousands separators kept, two decimals).
    pub fn amount<'t>(&self, text: &'t str) -> Option<&'t str> {
        capture_group(&self.amount, text, "amount")
    }

    /// `DD-Mon-YYYY` date, as written.
    pub fn effective_date<'t>(&self, text: &'t str) -> Option<&'t str> {
        let found = self.effective_date.find(text).map(|m| m.as_str());
        if let Some(date) = found {
            debug!(rule = "effective_date", value = %date, "Pattern matched");
        }
        found
    }

    /// Deal phrase following `reference:`.
    pub fn reference<'t>(&self, text: &'t str) -> Option<&'t str> {
        capture_group(&self.reference, text, "reference")
    }
}

impl Default for RulePatterns {
    fn default() -> Self {
        Self::new(&DealGrammar::default()).expect("default deal grammar compiles")
    }
}

fn capture_group<'t>(regex: &Regex, text: &'t str, rule: &str) -> Option<&'t str> {
    let found = regex
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    if let Some(value) = found {
        debug!(rule, value = %value, "Pattern matched");
    }
    found
}
