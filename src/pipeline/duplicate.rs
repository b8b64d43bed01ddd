//! Duplicate detection.
//!
//! Two policies behind [`DuplicateDetector`]:
//! - [`FingerprintPolicy`] — exact fingerprint of (sender, subject, body)
//!   against a [`SeenRegistry`]. Any change to the body, even whitespace,
//!   yields a new fingerprint.
//! - [`ReferencePolicy`] — duplicate whenever the text carries a
//!   `reference: <deal phrase>` line. Stateless: the first occurrence is
//!   reported as a duplicate too.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::pipeline::rules::RulePatterns;
use crate::pipeline::types::DuplicateVerdict;

const UNIQUE_REASON: &str = "Unique email.";
const DUPLICATE_REASON: &str = "Email is a duplicate based on sender, subject, and content.";
const NO_REFERENCE_REASON: &str = "No duplicate detected";

/// Opaque identity of a submission. Compared for equality only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint of the ordered (sender, subject, body) triple.
    ///
    /// Stable within one process only.
    pub fn of(sender: &str, subject: &str, body: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        (sender, subject, body).hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// What a duplicate check looks at.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateProbe<'a> {
    pub sender: &'a str,
    pub subject: &'a str,
    /// Combined submission text.
    pub text: &'a str,
}

/// Decides whether a submission repeats an earlier one.
pub trait DuplicateDetector: Send + Sync {
    /// Short label for logging.
    fn name(&self) -> &'static str;

    fn check(&self, probe: &DuplicateProbe<'_>) -> DuplicateVerdict;
}

// ── Registry ────────────────────────────────────────────────────────

/// Set of fingerprints seen so far.
///
/// Implementations only need to be individually thread-safe; callers
/// that check-then-insert hold their own lock around the pair.
pub trait SeenRegistry: Send + Sync {
    fn contains(&self, fingerprint: &Fingerprint) -> bool;
    fn insert(&self, fingerprint: Fingerprint);
}

/// Process-lifetime in-memory registry. Grows monotonically; nothing is
/// evicted or persisted.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    seen: Mutex<HashSet<Fingerprint>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SeenRegistry for InMemoryRegistry {
    fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(fingerprint)
    }

    fn insert(&self, fingerprint: Fingerprint) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fingerprint);
    }
}

// ── Fingerprint policy ──────────────────────────────────────────────

/// Exact-match duplicate policy over an injected registry.
pub struct FingerprintPolicy {
    registry: Arc<dyn SeenRegistry>,
    /// Serializes check-then-insert so two identical concurrent
    /// submissions cannot both be reported unique.
    guard: Mutex<()>,
}

impl FingerprintPolicy {
    pub fn new(registry: Arc<dyn SeenRegistry>) -> Self {
        Self {
            registry,
            guard: Mutex::new(()),
        }
    }
}

impl DuplicateDetector for FingerprintPolicy {
    fn name(&self) -> &'static str {
        "fingerprint"
    }

    fn check(&self, probe: &DuplicateProbe<'_>) -> DuplicateVerdict {
        let fingerprint = Fingerprint::of(probe.sender, probe.subject, probe.text);

        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        if self.registry.contains(&fingerprint) {
            debug!(sender = %probe.sender, ?fingerprint, "Fingerprint already seen");
            return DuplicateVerdict::duplicate(DUPLICATE_REASON);
        }
        self.registry.insert(fingerprint);
        DuplicateVerdict::unique(UNIQUE_REASON)
    }
}

// ── Reference policy ────────────────────────────────────────────────

/// Stateless policy keyed on a `reference: <deal phrase>` line.
pub struct ReferencePolicy {
    patterns: Arc<RulePatterns>,
}

impl ReferencePolicy {
    pub fn new(patterns: Arc<RulePatterns>) -> Self {
        Self { patterns }
    }
}

impl DuplicateDetector for ReferencePolicy {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn check(&self, probe: &DuplicateProbe<'_>) -> DuplicateVerdict {
        match self.patterns.reference(probe.text) {
            Some(reference) => DuplicateVerdict::duplicate(format!(
                "Duplicate detected based on reference number: {reference}"
            )),
            None => DuplicateVerdict::unique(NO_REFERENCE_REASON),
        }
    }
}
