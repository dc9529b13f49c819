//! Integrity verification: recompute every digest and relink the chain.
//!
//! Two rules are checked for each entry:
//!
//! 1. **Hash correctness**: the stored `hash` equals the digest recomputed
//!    from the entry's own fields (`hash_mismatch` otherwise).
//! 2. **Linkage**: `previous_hash` equals the *recomputed* digest of the
//!    preceding entry, or `GENESIS` at sequence 1 (`chain_broken`
//!    otherwise).  Linking against recomputed rather than stored hashes means
//!    rewriting an entry and patching its successor's `previous_hash` still
//!    surfaces as a `hash_mismatch` on the rewritten entry.
//!
//! Verification only reads committed entries and never touches the
//! allocator, so it runs alongside appends without locking.

use tracing::{debug, warn};

use chainlog_contracts::{
    entry::{ChainHead, LogEntry},
    error::LedgerResult,
    verify::{ChainIssue, IssueKind, VerificationResult},
};

use crate::codec::{self, DigestPolicy};
use crate::traits::LedgerStore;

/// Walks entries in sequence order and reports every divergence.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier {
    policy: DigestPolicy,
}

impl IntegrityVerifier {
    pub fn new(policy: DigestPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> DigestPolicy {
        self.policy
    }

    /// Verify `entries`, which must be sorted by sequence.
    ///
    /// `anchor` is the head the first entry is expected to extend: the
    /// recomputed head of its predecessor, or `ChainHead::genesis()` when
    /// verifying from sequence 1.  With no anchor, the first entry's linkage
    /// is checked only if it is the genesis entry.
    pub fn verify_entries(&self, anchor: Option<ChainHead>, entries: &[LogEntry]) -> VerificationResult {
        let mut result = VerificationResult::new(0, Vec::new());
        let mut prior = anchor;

        for entry in entries {
            let recomputed = codec::digest(entry, self.policy);

            if entry.hash != recomputed {
                result.push(ChainIssue {
                    sequence: entry.sequence,
                    kind: IssueKind::HashMismatch,
                    expected: recomputed.clone(),
                    actual: entry.hash.clone(),
                    reason: "stored hash does not match recomputed digest".to_string(),
                });
            }

            let expected_link = match &prior {
                Some(prev) => Some(prev.clone()),
                None if entry.is_genesis() => Some(ChainHead::genesis()),
                None => None,
            };

            if let Some(prev) = expected_link {
                if entry.previous_hash != prev.hash {
                    let reason = if entry.sequence != prev.sequence + 1 {
                        format!(
                            "sequences {}..={} are missing",
                            prev.sequence + 1,
                            entry.sequence.saturating_sub(1)
                        )
                    } else if prev.is_genesis() {
                        "first entry does not link to GENESIS".to_string()
                    } else {
                        format!(
                            "previous_hash does not match recomputed hash of sequence {}",
                            prev.sequence
                        )
                    };
                    result.push(ChainIssue {
                        sequence: entry.sequence,
                        kind: IssueKind::ChainBroken,
                        expected: prev.hash.clone(),
                        actual: entry.previous_hash.clone(),
                        reason,
                    });
                } else if entry.sequence != prev.sequence + 1 {
                    result.push(ChainIssue {
                        sequence: entry.sequence,
                        kind: IssueKind::ChainBroken,
                        expected: prev.hash.clone(),
                        actual: entry.previous_hash.clone(),
                        reason: format!("sequence does not follow {}", prev.sequence),
                    });
                }
            }

            prior = Some(ChainHead {
                sequence: entry.sequence,
                hash: recomputed,
            });
            result.entries_checked += 1;
        }

        result
    }

    /// Verify the stored entries with `from <= sequence <= to`.
    ///
    /// When `from > 1`, the predecessor at `from - 1` is read and its
    /// recomputed digest anchors the first entry's linkage.  A missing
    /// predecessor is itself reported against the first entry.
    pub fn verify_range(
        &self,
        store: &dyn LedgerStore,
        from: u64,
        to: u64,
    ) -> LedgerResult<VerificationResult> {
        self.verify_range_to(store, from, to, 0)
    }

    /// Like `verify_range`, but every sequence up to `min(to, committed)`
    /// must be present: missing entries at the end of the range are reported
    /// as `chain_broken`.
    pub fn verify_range_to(
        &self,
        store: &dyn LedgerStore,
        from: u64,
        to: u64,
        committed: u64,
    ) -> LedgerResult<VerificationResult> {
        let from = from.max(1);
        let anchor = if from == 1 {
            Some(ChainHead::genesis())
        } else {
            store.get(from - 1)?.map(|prev| ChainHead {
                sequence: prev.sequence,
                hash: codec::digest(&prev, self.policy),
            })
        };

        let entries = store.range(from, to)?;
        let mut result = self.verify_entries(anchor.clone(), &entries);

        if anchor.is_none() {
            if let Some(first) = entries.first() {
                warn!(sequence = from - 1, "predecessor of verified range is missing");
                result.issues.insert(
                    0,
                    ChainIssue {
                        sequence: first.sequence,
                        kind: IssueKind::ChainBroken,
                        expected: String::new(),
                        actual: first.previous_hash.clone(),
                        reason: format!("predecessor sequence {} is missing", from - 1),
                    },
                );
                result.verified = false;
            }
        }

        let end = to.min(committed);
        let (last_seq, last_hash) = match entries.last() {
            Some(last) => (last.sequence, codec::digest(last, self.policy)),
            None => (
                from - 1,
                anchor.map(|a| a.hash).unwrap_or_default(),
            ),
        };
        if end > last_seq {
            result.push(ChainIssue {
                sequence: last_seq + 1,
                kind: IssueKind::ChainBroken,
                expected: last_hash,
                actual: String::new(),
                reason: format!("sequences {}..={} are missing", last_seq + 1, end),
            });
        }

        debug!(
            from,
            to,
            entries_checked = result.entries_checked,
            issues = result.issues.len(),
            "chain range verified"
        );
        Ok(result)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use chainlog_contracts::entry::{AuditAction, ChainHead, Details, EntryId, LogEntry, GENESIS_HASH};
    use chainlog_contracts::verify::IssueKind;

    use super::IntegrityVerifier;
    use crate::codec::{digest, DigestPolicy};

    /// Build a correctly chained run of `n` entries.
    fn make_chain(n: u64) -> Vec<LogEntry> {
        let mut prev = GENESIS_HASH.to_string();
        (1..=n)
            .map(|sequence| {
                let mut entry = LogEntry {
                    id: EntryId::new(),
                    sequence,
                    actor_id: format!("u{}", sequence % 3),
                    action: AuditAction::View,
                    resource_type: Some("document".to_string()),
                    resource_id: Some(format!("d-{}", sequence)),
                    details: Details::new(),
                    ip_address: None,
                    user_agent: None,
                    session_id: None,
                    success: true,
                    error_message: None,
                    timestamp: Utc::now(),
                    previous_hash: prev.clone(),
                    hash: String::new(),
                };
                entry.hash = digest(&entry, DigestPolicy::Full);
                prev = entry.hash.clone();
                entry
            })
            .collect()
    }

    fn verifier() -> IntegrityVerifier {
        IntegrityVerifier::new(DigestPolicy::Full)
    }

    #[test]
    fn intact_chain_verifies() {
        let chain = make_chain(5);
        let result = verifier().verify_entries(Some(ChainHead::genesis()), &chain);
        assert!(result.verified);
        assert_eq!(result.entries_checked, 5);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn empty_chain_verifies() {
        let result = verifier().verify_entries(Some(ChainHead::genesis()), &[]);
        assert!(result.verified);
        assert_eq!(result.entries_checked, 0);
    }

    #[test]
    fn genesis_link_is_checked_without_anchor() {
        let mut chain = make_chain(1);
        chain[0].previous_hash = "0".repeat(64);
        chain[0].hash = digest(&chain[0], DigestPolicy::Full);

        let result = verifier().verify_entries(None, &chain);
        let issue = result.first_issue().unwrap();
        assert_eq!(issue.kind, IssueKind::ChainBroken);
        assert_eq!(issue.expected, GENESIS_HASH);
    }

    #[test]
    fn mutated_entry_reports_hash_mismatch() {
        let mut chain = make_chain(4);
        chain[2].actor_id = "mallory".to_string();

        let result = verifier().verify_entries(Some(ChainHead::genesis()), &chain);
        assert!(!result.verified);
        assert_eq!(result.issues_at(3, IssueKind::HashMismatch).count(), 1);
        // The successor links to the original hash, not the recomputed one.
        assert_eq!(result.issues_at(4, IssueKind::ChainBroken).count(), 1);
    }

    #[test]
    fn resealed_entry_breaks_successor_link() {
        let mut chain = make_chain(4);
        chain[1].actor_id = "mallory".to_string();
        chain[1].hash = digest(&chain[1], DigestPolicy::Full);

        let result = verifier().verify_entries(Some(ChainHead::genesis()), &chain);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].sequence, 3);
        assert_eq!(result.issues[0].kind, IssueKind::ChainBroken);
    }

    #[test]
    fn removed_entry_reports_gap() {
        let mut chain = make_chain(5);
        chain.remove(2);

        let result = verifier().verify_entries(Some(ChainHead::genesis()), &chain);
        let issue = result.issues_at(4, IssueKind::ChainBroken).next().unwrap();
        assert!(issue.reason.contains("missing"));
        assert_eq!(result.entries_checked, 4);
    }

    #[test]
    fn minimal_policy_chain_fails_under_full_policy() {
        let mut chain = make_chain(2);
        for entry in &mut chain {
            entry.hash = digest(entry, DigestPolicy::Minimal);
        }
        let result = verifier().verify_entries(None, &chain);
        assert!(!result.verified);
    }
}
