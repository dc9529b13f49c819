//! Chain verification report types.
//!
//! Tampering is a finding, not a runtime fault: `verify_chain` returns a
//! `VerificationResult` whose `issues` name the exact sequence and hash that
//! diverged, so operators can act on it forensically.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an entry failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// The stored `hash` differs from the digest recomputed from the entry's
    /// own fields: the entry was edited in place.
    HashMismatch,
    /// `previous_hash` differs from the recomputed digest of the preceding
    /// entry (or from `GENESIS` at sequence 1): an entry was removed,
    /// reordered, or relinked.
    ChainBroken,
    /// The last entry does not match the committed chain head: the tail was
    /// truncated or rewritten.
    HeadMismatch,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashMismatch => "hash_mismatch",
            Self::ChainBroken => "chain_broken",
            Self::HeadMismatch => "head_mismatch",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One divergence found while walking the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainIssue {
    /// Sequence of the offending entry.
    pub sequence: u64,
    pub kind: IssueKind,
    /// The hash verification expected to find.
    pub expected: String,
    /// The hash actually stored.
    pub actual: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for ChainIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sequence {}: {} ({}; expected {}, found {})",
            self.sequence, self.kind, self.reason, self.expected, self.actual
        )
    }
}

/// Outcome of verifying a sequence range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// True only if `issues` is empty.
    pub verified: bool,
    pub entries_checked: u64,
    /// Every divergence found, in sequence order.
    pub issues: Vec<ChainIssue>,
}

impl VerificationResult {
    /// Build a result; `verified` is derived from `issues`.
    pub fn new(entries_checked: u64, issues: Vec<ChainIssue>) -> Self {
        Self {
            verified: issues.is_empty(),
            entries_checked,
            issues,
        }
    }

    /// The first issue found, if any.
    pub fn first_issue(&self) -> Option<&ChainIssue> {
        self.issues.first()
    }

    /// Issues of `kind` at `sequence`.
    pub fn issues_at(&self, sequence: u64, kind: IssueKind) -> impl Iterator<Item = &ChainIssue> {
        self.issues
            .iter()
            .filter(move |i| i.sequence == sequence && i.kind == kind)
    }

    /// Append a further issue, clearing `verified`.
    pub fn push(&mut self, issue: ChainIssue) {
        self.verified = false;
        self.issues.push(issue);
    }
}
