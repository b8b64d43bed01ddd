//! Secondary-request detection.
//!
//! A submission may ask for more than its primary request, e.g. a
//! principal repayment that also mentions interest. Triggers are checked
//! in order; presence of the keyword is the only signal.

use tracing::debug;

/// A keyword that signals an additional request type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryTrigger {
    pub keyword: String,
    pub request_type: String,
}

impl SecondaryTrigger {
    pub fn new(keyword: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            request_type: request_type.into(),
        }
    }
}

/// Detects additional request types beyond the primary one.
#[derive(Debug, Clone)]
pub struct SecondaryDetector {
    triggers: Vec<SecondaryTrigger>,
}

impl SecondaryDetector {
    pub fn new(triggers: Vec<SecondaryTrigger>) -> Self {
        Self { triggers }
    }

    /// Request types whose keyword occurs in `text` (case-insensitive) and
    /// that differ from `primary`, in trigger order, without repeats.
    pub fn detect(&self, text: &str, primary: &str) -> Vec<String> {
        let text = text.to_lowercase();
        let mut found: Vec<String> = Vec::new();
        for trigger in &self.triggers {
            if trigger.request_type == primary
                || found.contains(&trigger.request_type)
                || !text.contains(&trigger.keyword.to_lowercase())
            {
                continue;
            }
            debug!(
                keyword = %trigger.keyword,
                request_type = %trigger.request_type,
                "Secondary request detected"
            );
            found.push(trigger.request_type.clone());
        }
        found
    }
}

impl Default for SecondaryDetector {
    /// `interest` → `interest_payment`, then `modify` → `loan_modification`.
    fn default() -> Self {
        Self::new(vec![
            SecondaryTrigger::new("interest", "interest_payment"),
            SecondaryTrigger::new("modify", "loan_modification"),
        ])
    }
}
