//! The audit ledger: the only entry point for producers and operators.
//!
//! `append` runs the write pipeline:
//!
//!   Validate → Reserve → Build → Digest → Store → Commit
//!
//! The head is advanced only after the entry is durable.  Any failure before
//! that releases the reservation, so the same sequence is handed out again
//! and no number is ever skipped.  Reads (`query`, `get`, `verify_chain`) go
//! straight to the store and never wait on the allocator.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use chainlog_contracts::{
    entry::{ChainHead, EntryId, LogEntry},
    error::{LedgerError, LedgerResult},
    event::AuditEvent,
    query::LedgerQuery,
    verify::{ChainIssue, IssueKind, VerificationResult},
};

use crate::allocator::LockingAllocator;
use crate::codec;
use crate::config::LedgerConfig;
use crate::traits::{LedgerStore, Reservation, SequenceAllocator};
use crate::verifier::IntegrityVerifier;

/// A reservation that is released on drop unless taken for commit.
struct PendingReservation<'a> {
    allocator: &'a dyn SequenceAllocator,
    reservation: Reservation,
    armed: bool,
}

impl<'a> PendingReservation<'a> {
    fn new(allocator: &'a dyn SequenceAllocator, reservation: Reservation) -> Self {
        Self {
            allocator,
            reservation,
            armed: true,
        }
    }

    /// Disarm and hand the reservation over for commit.
    fn into_inner(mut self) -> Reservation {
        self.armed = false;
        std::mem::take(&mut self.reservation)
    }
}

impl Drop for PendingReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.allocator.release(std::mem::take(&mut self.reservation));
        }
    }
}

/// Hash-chained, append-only audit ledger.
///
/// Cheap to share: wrap in an `Arc` and call from any number of threads.
pub struct AuditLedger {
    store: Arc<dyn LedgerStore>,
    allocator: Arc<dyn SequenceAllocator>,
    verifier: IntegrityVerifier,
    config: LedgerConfig,
}

impl AuditLedger {
    /// Assemble a ledger from its parts.
    ///
    /// The allocator's head must agree with the store's last entry; use
    /// `with_locking_allocator` to have that derived automatically.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        allocator: Arc<dyn SequenceAllocator>,
        config: LedgerConfig,
    ) -> LedgerResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            allocator,
            verifier: IntegrityVerifier::new(config.digest_policy),
            config,
        })
    }

    /// A single-process ledger whose head is seeded from `store.last()`.
    pub fn with_locking_allocator(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> LedgerResult<Self> {
        let head = ChainHead::from_last(store.last()?.as_ref());
        info!(sequence = head.sequence, "opening ledger");
        let allocator = Arc::new(LockingAllocator::new(head, config.reserve_timeout()));
        Self::new(store, allocator, config)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ── Write path ───────────────────────────────────────────────────────────

    /// Record `event` as the next entry of the chain.
    ///
    /// # Errors
    ///
    /// - `Validation` if `actor_id` is empty or a resource id is given
    ///   without a type; nothing is reserved.
    /// - `Storage` once `max_storage_attempts` writes have failed.
    /// - `ConcurrencyConflict` once `max_conflict_retries` head races were
    ///   lost, or the head could not be reserved in time.
    ///
    /// On every error the head is left where it was.
    pub fn append(&self, event: AuditEvent) -> LedgerResult<LogEntry> {
        validate(&event)?;

        let mut storage_failures = 0u32;
        let mut conflicts = 0u32;

        loop {
            let pending = PendingReservation::new(self.allocator.as_ref(), self.allocator.reserve()?);
            let entry = self.build_entry(&event, &pending.reservation);

            match self.store.append(&entry) {
                Ok(()) => {
                    // The entry is durable, so the append succeeded.  The
                    // next writer to reserve this sequence hits the stored
                    // entry and catches the head up to it.
                    if let Err(e) = self.allocator.commit(pending.into_inner(), &entry.hash) {
                        error!(
                            sequence = entry.sequence,
                            error = %e,
                            "entry is durable but the chain head did not advance"
                        );
                        return Ok(entry);
                    }
                    info!(
                        sequence = entry.sequence,
                        action = %entry.action,
                        actor_id = %entry.actor_id,
                        success = entry.success,
                        "audit entry committed"
                    );
                    return Ok(entry);
                }

                Err(LedgerError::DuplicateSequence { sequence }) => {
                    // The store is ahead of the head we reserved from.
                    if let Some(existing) = self.store.get(sequence)? {
                        self.allocator.observe_committed(&existing)?;
                    }
                    drop(pending);

                    conflicts += 1;
                    if conflicts > self.config.max_conflict_retries {
                        error!(sequence, conflicts, "giving up after repeated head conflicts");
                        return Err(LedgerError::ConcurrencyConflict {
                            sequence,
                            attempts: conflicts,
                            reason: "sequence was taken by another writer on every attempt".to_string(),
                        });
                    }
                    debug!(sequence, conflicts, "lost head race, retrying");
                    std::thread::yield_now();
                }

                Err(e) if e.is_transient() => {
                    drop(pending);

                    storage_failures += 1;
                    if storage_failures >= self.config.max_storage_attempts {
                        error!(
                            sequence = entry.sequence,
                            attempts = storage_failures,
                            error = %e,
                            "audit write failed, giving up"
                        );
                        return Err(e);
                    }
                    let backoff = self.config.backoff(storage_failures);
                    warn!(
                        sequence = entry.sequence,
                        attempt = storage_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "audit write failed, retrying"
                    );
                    std::thread::sleep(backoff);
                }

                Err(e) => return Err(e),
            }
        }
    }

    fn build_entry(&self, event: &AuditEvent, reservation: &Reservation) -> LogEntry {
        let mut entry = LogEntry {
            id: EntryId::new(),
            sequence: reservation.sequence,
            actor_id: event.actor_id.clone(),
            action: event.action,
            resource_type: event.resource_type.clone(),
            resource_id: event.resource_id.clone(),
            details: event.details.clone(),
            ip_address: event.ip_address.clone(),
            user_agent: event.user_agent.clone(),
            session_id: event.session_id.clone(),
            success: event.success,
            error_message: event.error_message.clone(),
            timestamp: Utc::now(),
            previous_hash: reservation.previous_hash.clone(),
            hash: String::new(),
        };
        entry.hash = codec::digest(&entry, self.config.digest_policy);
        entry
    }

    // ── Read path ────────────────────────────────────────────────────────────

    /// Entries matching `query`, newest first unless it asks otherwise.
    ///
    /// A missing or oversized limit is replaced by the configured bounds.
    pub fn query(&self, query: &LedgerQuery) -> LedgerResult<Vec<LogEntry>> {
        let mut query = query.clone();
        query.limit = Some(self.config.effective_limit(query.limit));
        self.store.query(&query)
    }

    pub fn get(&self, sequence: u64) -> LedgerResult<Option<LogEntry>> {
        self.store.get(sequence)
    }

    /// The committed chain head.
    pub fn head(&self) -> LedgerResult<ChainHead> {
        self.allocator.head()
    }

    /// Number of stored entries.
    pub fn len(&self) -> LedgerResult<u64> {
        self.store.count()
    }

    pub fn is_empty(&self) -> LedgerResult<bool> {
        Ok(self.len()? == 0)
    }

    // ── Verification ─────────────────────────────────────────────────────────

    /// Verify entries `from..=to`.
    ///
    /// Every sequence in the range up to the committed head must be stored.
    /// When the range reaches the head, the entry at the head is also checked
    /// against it, which catches a truncated or wholly rewritten tail.
    pub fn verify_chain(&self, from: u64, to: u64) -> LedgerResult<VerificationResult> {
        if from > to {
            return Err(LedgerError::Validation {
                reason: format!("invalid range: from ({}) is after to ({})", from, to),
            });
        }

        let head = self.allocator.head()?;
        let mut result = self
            .verifier
            .verify_range_to(self.store.as_ref(), from, to, head.sequence)?;

        if !head.is_genesis() && to >= head.sequence && from <= head.sequence {
            if let Some(issue) = self.check_head(&head)? {
                result.push(issue);
            }
        }

        if result.verified {
            info!(from, to, entries_checked = result.entries_checked, "chain verified");
        } else {
            for issue in &result.issues {
                error!(
                    sequence = issue.sequence,
                    kind = %issue.kind,
                    expected = %issue.expected,
                    actual = %issue.actual,
                    "chain integrity violation"
                );
            }
        }
        Ok(result)
    }

    /// Verify every entry up to the committed head.
    pub fn verify_all(&self) -> LedgerResult<VerificationResult> {
        let head = self.allocator.head()?;
        let last = self.store.last()?.map(|e| e.sequence).unwrap_or(0);
        self.verify_chain(1, head.sequence.max(last).max(1))
    }

    fn check_head(&self, head: &ChainHead) -> LedgerResult<Option<ChainIssue>> {
        let issue = match self.store.get(head.sequence)? {
            None => Some(ChainIssue {
                sequence: head.sequence,
                kind: IssueKind::HeadMismatch,
                expected: head.hash.clone(),
                actual: String::new(),
                reason: "entry at the committed head is missing".to_string(),
            }),
            Some(entry) => {
                let recomputed = codec::digest(&entry, self.config.digest_policy);
                (recomputed != head.hash).then(|| ChainIssue {
                    sequence: head.sequence,
                    kind: IssueKind::HeadMismatch,
                    expected: head.hash.clone(),
                    actual: recomputed,
                    reason: "entry at the committed head differs from the head hash".to_string(),
                })
            }
        };
        Ok(issue)
    }
}

/// Reject events missing a required field before anything is reserved.
fn validate(event: &AuditEvent) -> LedgerResult<()> {
    if event.actor_id.trim().is_empty() {
        return Err(LedgerError::Validation {
            reason: "actor_id is required".to_string(),
        });
    }
    if event.resource_id.is_some() && event.resource_type.is_none() {
        return Err(LedgerError::Validation {
            reason: "resource_id given without resource_type".to_string(),
        });
    }
    Ok(())
}
