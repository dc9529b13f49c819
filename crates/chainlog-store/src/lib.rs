//! # chainlog-store
//!
//! `LedgerStore` implementations for the chainlog audit ledger.
//!
//! - `MemoryLedgerStore` keeps entries and their indexes in memory.
//! - `JsonlLedgerStore` appends entries to a JSON Lines file, one `fsync`ed
//!   line per entry, and rebuilds the in-memory index on open.
//!
//! Neither store offers update or delete.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chainlog_core::{AuditLedger, LedgerConfig};
//! use chainlog_store::JsonlLedgerStore;
//!
//! let store = Arc::new(JsonlLedgerStore::open("audit.jsonl")?);
//! let ledger = AuditLedger::with_locking_allocator(store, LedgerConfig::default())?;
//! ```

pub mod file;
pub mod memory;

pub use file::JsonlLedgerStore;
pub use memory::MemoryLedgerStore;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashSet};
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use chainlog_contracts::{
        entry::{AuditAction, LogEntry, GENESIS_HASH},
        error::{LedgerError, LedgerResult},
        event::AuditEvent,
        query::LedgerQuery,
        verify::IssueKind,
    };
    use chainlog_core::{codec, AuditLedger, DigestPolicy, LedgerConfig, LedgerStore};

    use super::{JsonlLedgerStore, MemoryLedgerStore};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn fast_config() -> LedgerConfig {
        LedgerConfig {
            retry_backoff_ms: 1,
            ..LedgerConfig::default()
        }
    }

    fn memory_ledger() -> (Arc<MemoryLedgerStore>, AuditLedger) {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = AuditLedger::with_locking_allocator(store.clone(), fast_config()).unwrap();
        (store, ledger)
    }

    /// Append `n` view events on documents `d-1..=d-n`.
    fn fill(ledger: &AuditLedger, n: u64) {
        for i in 1..=n {
            ledger
                .append(AuditEvent::new(format!("u{}", i % 3), AuditAction::View).resource("document", format!("d-{}", i)))
                .unwrap();
        }
    }

    /// Fails the first write of every `every`-th sequence with a transient
    /// storage error.
    struct FlakyStore {
        inner: MemoryLedgerStore,
        every: u64,
        failed: Mutex<HashSet<u64>>,
        failures: AtomicU64,
    }

    impl FlakyStore {
        fn new(every: u64) -> Self {
            Self {
                inner: MemoryLedgerStore::new(),
                every,
                failed: Mutex::new(HashSet::new()),
                failures: AtomicU64::new(0),
            }
        }
    }

    impl LedgerStore for FlakyStore {
        fn append(&self, entry: &LogEntry) -> LedgerResult<()> {
            if entry.sequence % self.every == 0 && self.failed.lock().unwrap().insert(entry.sequence) {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(LedgerError::Storage {
                    reason: "injected write failure".to_string(),
                });
            }
            self.inner.append(entry)
        }

        fn get(&self, sequence: u64) -> LedgerResult<Option<LogEntry>> {
            self.inner.get(sequence)
        }

        fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<LogEntry>> {
            self.inner.range(from, to)
        }

        fn query(&self, query: &LedgerQuery) -> LedgerResult<Vec<LogEntry>> {
            self.inner.query(query)
        }

        fn last(&self) -> LedgerResult<Option<LogEntry>> {
            self.inner.last()
        }

        fn count(&self) -> LedgerResult<u64> {
            self.inner.count()
        }
    }

    fn assert_contiguous(store: &dyn LedgerStore, n: u64) {
        assert_eq!(store.count().unwrap(), n);
        let seqs: Vec<u64> = store.range(1, n).unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, (1..=n).collect::<Vec<_>>());
    }

    // ── End to end ────────────────────────────────────────────────────────────

    /// Login, unmask, logout: queryable and verifiable.
    #[test]
    fn test_session_scenario() {
        let (_, ledger) = memory_ledger();
        ledger.append(AuditEvent::login("u1", "s1")).unwrap();
        ledger
            .append(AuditEvent::pii_unmask("u1", "patient", "p-7", &["ssn", "dob"]))
            .unwrap();
        ledger.append(AuditEvent::logout("u1", "s1")).unwrap();

        let found = ledger
            .query(&LedgerQuery::new().with_actor("u1").with_action(AuditAction::PiiUnmask))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].sequence, 2);
        assert_eq!(found[0].details["fields"], serde_json::json!(["ssn", "dob"]));

        let result = ledger.verify_chain(1, 3).unwrap();
        assert!(result.verified);
        assert_eq!(result.entries_checked, 3);
        assert!(result.issues.is_empty());
    }

    /// The first entry links to GENESIS and every later one to its predecessor.
    #[test]
    fn test_genesis_and_linkage() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 4);

        let entries = store.range(1, 4).unwrap();
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        for pair in entries.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].hash);
        }
        assert!(entries.iter().all(|e| codec::matches(e, DigestPolicy::Full)));
    }

    // ── Tamper detection ──────────────────────────────────────────────────────

    /// Mutating a stored entry is a hash mismatch on that entry.
    #[test]
    fn test_tamper_mutated_entry() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 10);

        store.tamper(5, |e| e.actor_id = "mallory".to_string());

        let result = ledger.verify_chain(1, 10).unwrap();
        assert!(!result.verified);
        assert_eq!(result.issues_at(5, IssueKind::HashMismatch).count(), 1);
        assert_eq!(result.first_issue().unwrap().sequence, 5);
    }

    /// Deleting an entry breaks the successor's link.
    #[test]
    fn test_tamper_deleted_entry() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 10);

        store.delete(5).unwrap();

        let result = ledger.verify_chain(1, 10).unwrap();
        assert!(!result.verified);
        assert_eq!(result.entries_checked, 9);
        let issue = result.issues_at(6, IssueKind::ChainBroken).next().unwrap();
        assert!(issue.reason.contains("5..=5"));
    }

    /// Patching the successor to the forged hash still flags the forgery.
    #[test]
    fn test_tamper_with_patched_successor() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 10);

        store.tamper(5, |e| e.success = false);
        let forged = codec::digest(&store.get(5).unwrap().unwrap(), DigestPolicy::Full);
        store.tamper(6, |e| e.previous_hash = forged);

        let result = ledger.verify_chain(1, 10).unwrap();
        assert!(!result.verified);
        assert_eq!(result.issues_at(5, IssueKind::HashMismatch).count(), 1);
    }

    /// Resealing an entry (recomputing its hash) breaks the next link.
    #[test]
    fn test_tamper_resealed_entry() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 10);

        store.tamper(5, |e| {
            e.details.insert("note".to_string(), serde_json::json!("edited"));
            e.hash = codec::digest(e, DigestPolicy::Full);
        });

        let result = ledger.verify_chain(1, 10).unwrap();
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].sequence, 6);
        assert_eq!(result.issues[0].kind, IssueKind::ChainBroken);
    }

    /// A range ending on a deleted entry reports the missing sequence.
    #[test]
    fn test_deleted_entry_at_range_end() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 10);

        store.delete(5).unwrap();

        let result = ledger.verify_chain(1, 5).unwrap();
        assert!(!result.verified);
        assert_eq!(result.entries_checked, 4);
        let issue = result.issues_at(5, IssueKind::ChainBroken).next().unwrap();
        assert!(issue.reason.contains("5..=5"));
    }

    /// A range starting right after a deleted entry reports the missing
    /// predecessor.
    #[test]
    fn test_deleted_predecessor_of_range() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 10);

        store.delete(5).unwrap();

        let result = ledger.verify_chain(6, 10).unwrap();
        assert!(!result.verified);
        assert_eq!(result.entries_checked, 5);
        let issue = result.issues_at(6, IssueKind::ChainBroken).next().unwrap();
        assert!(issue.reason.contains("predecessor sequence 5"));
    }

    /// A range whose entries are all gone is reported in full.
    #[test]
    fn test_deleted_range_interior() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 10);

        for seq in 4..=6 {
            store.delete(seq).unwrap();
        }

        let result = ledger.verify_chain(4, 6).unwrap();
        assert_eq!(result.entries_checked, 0);
        let issue = result.issues_at(4, IssueKind::ChainBroken).next().unwrap();
        assert!(issue.reason.contains("4..=6"));
    }

    /// A truncated tail is caught against the committed head.
    #[test]
    fn test_truncated_tail_reports_head_mismatch() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 5);

        store.delete(5).unwrap();

        let result = ledger.verify_all().unwrap();
        assert!(!result.verified);
        assert_eq!(result.issues_at(5, IssueKind::HeadMismatch).count(), 1);
    }

    /// A partial range anchors on its recomputed predecessor.
    #[test]
    fn test_partial_range_verification() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 10);

        assert!(ledger.verify_chain(4, 7).unwrap().verified);

        store.tamper(3, |e| e.actor_id = "mallory".to_string());
        let result = ledger.verify_chain(4, 7).unwrap();
        assert_eq!(result.entries_checked, 4);
        assert_eq!(result.issues_at(4, IssueKind::ChainBroken).count(), 1);
    }

    // ── Concurrency and failures ──────────────────────────────────────────────

    /// 200 concurrent appends produce exactly 1..=200 and a valid chain.
    #[test]
    fn test_concurrent_appends_are_linear() {
        let (store, ledger) = memory_ledger();

        std::thread::scope(|s| {
            for w in 0..8 {
                let ledger = &ledger;
                s.spawn(move || {
                    for i in 0..25 {
                        ledger
                            .append(AuditEvent::new(format!("w{}", w), AuditAction::Create).detail("i", i))
                            .unwrap();
                    }
                });
            }
        });

        assert_contiguous(store.as_ref(), 200);
        let hashes: BTreeSet<String> = store.range(1, 200).unwrap().into_iter().map(|e| e.hash).collect();
        assert_eq!(hashes.len(), 200);
        assert!(ledger.verify_all().unwrap().verified);
    }

    /// Injected write failures never leave a gap.
    #[test]
    fn test_failure_injection_leaves_no_gaps() {
        let store = Arc::new(FlakyStore::new(3));
        let ledger = AuditLedger::with_locking_allocator(store.clone(), fast_config()).unwrap();

        for i in 0..30 {
            ledger
                .append(AuditEvent::new("u1", AuditAction::Edit).detail("i", i))
                .unwrap();
        }

        assert_eq!(store.failures.load(Ordering::SeqCst), 10);
        assert_contiguous(&store.inner, 30);
        assert!(ledger.verify_all().unwrap().verified);
    }

    /// Concurrent writers retrying injected failures still produce 1..=200.
    #[test]
    fn test_concurrent_failure_injection_leaves_no_gaps() {
        let store = Arc::new(FlakyStore::new(3));
        let ledger = AuditLedger::with_locking_allocator(store.clone(), fast_config()).unwrap();

        std::thread::scope(|s| {
            for w in 0..8 {
                let ledger = &ledger;
                s.spawn(move || {
                    for i in 0..25 {
                        ledger
                            .append(AuditEvent::new(format!("w{}", w), AuditAction::Edit).detail("i", i))
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(store.failures.load(Ordering::SeqCst), 66);
        assert_contiguous(&store.inner, 200);
        assert!(ledger.verify_all().unwrap().verified);
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Filters, ordering, cursors, and limits.
    #[test]
    fn test_query_by_actor() {
        let (_, ledger) = memory_ledger();
        for i in 1..=6 {
            let actor = if i % 2 == 1 { "A" } else { "B" };
            ledger.append(AuditEvent::new(actor, AuditAction::View)).unwrap();
        }

        let seqs = |q: LedgerQuery| -> Vec<u64> {
            ledger.query(&q).unwrap().iter().map(|e| e.sequence).collect()
        };

        assert_eq!(seqs(LedgerQuery::new().with_actor("A")), vec![5, 3, 1]);
        assert_eq!(seqs(LedgerQuery::new().with_actor("A").with_limit(2)), vec![5, 3]);
        assert_eq!(seqs(LedgerQuery::new().with_actor("A").ascending().with_limit(2)), vec![1, 3]);
        assert_eq!(seqs(LedgerQuery::new().with_actor("A").before(5)), vec![3, 1]);
        assert_eq!(seqs(LedgerQuery::new().with_actor("B").with_skip(1)), vec![4, 2]);
        assert_eq!(seqs(LedgerQuery::new().after(4)), vec![6, 5]);
        assert!(seqs(LedgerQuery::new().with_actor("nobody")).is_empty());
    }

    #[test]
    fn test_query_by_resource_and_time() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 6);
        ledger
            .append(AuditEvent::access_denied("u9", AuditAction::Delete, "document", "d-2", "not owner"))
            .unwrap();

        let on_d2 = ledger
            .query(&LedgerQuery::new().with_resource("document", "d-2"))
            .unwrap();
        assert_eq!(on_d2.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![7, 2]);

        let failures = ledger.query(&LedgerQuery::new().with_success(false)).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_message.as_deref(), Some("not owner"));

        let from = store.get(3).unwrap().unwrap().timestamp;
        let to = store.get(5).unwrap().unwrap().timestamp;
        let windowed = ledger
            .query(&LedgerQuery::new().with_time_range(from, to).ascending())
            .unwrap();
        assert!(windowed.iter().all(|e| e.timestamp >= from && e.timestamp <= to));
        assert!(windowed.iter().any(|e| e.sequence == 3));
        assert!(windowed.iter().any(|e| e.sequence == 5));
    }

    /// Time windows combine with the other indexes.
    #[test]
    fn test_query_time_window_with_actor() {
        let (store, ledger) = memory_ledger();
        fill(&ledger, 9);

        let from = store.get(1).unwrap().unwrap().timestamp;
        let to = store.get(9).unwrap().unwrap().timestamp;
        let found = ledger
            .query(&LedgerQuery::new().with_actor("u1").with_time_range(from, to))
            .unwrap();
        assert_eq!(found.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![7, 4, 1]);

        let before_all = from - chrono::Duration::days(1);
        let empty = ledger
            .query(&LedgerQuery::new().with_time_range(before_all, before_all))
            .unwrap();
        assert!(empty.is_empty());

        let inverted = ledger
            .query(&LedgerQuery::new().with_time_range(to, from - chrono::Duration::seconds(1)))
            .unwrap();
        assert!(inverted.is_empty());
    }

    // ── Store contract ────────────────────────────────────────────────────────

    /// Stores never overwrite and fail closed on missing fields.
    #[test]
    fn test_store_rejects_duplicates_and_incomplete_entries() {
        let (store, ledger) = memory_ledger();
        let entry = ledger.append(AuditEvent::login("u1", "s1")).unwrap();

        let err = store.append(&entry).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateSequence { sequence: 1 }));

        let mut blank = entry.clone();
        blank.sequence = 2;
        blank.hash = String::new();
        assert!(matches!(store.append(&blank), Err(LedgerError::Validation { .. })));
        assert_eq!(store.count().unwrap(), 1);
    }

    // ── File store ────────────────────────────────────────────────────────────

    fn file_ledger(path: &std::path::Path) -> AuditLedger {
        let store = Arc::new(JsonlLedgerStore::open(path).unwrap());
        AuditLedger::with_locking_allocator(store, fast_config()).unwrap()
    }

    /// Entries survive a reopen and the chain continues from the last one.
    #[test]
    fn test_file_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let first = file_ledger(&path);
        fill(&first, 3);
        let head = first.head().unwrap();
        drop(first);

        let reopened = file_ledger(&path);
        assert_eq!(reopened.head().unwrap(), head);
        let next = reopened.append(AuditEvent::logout("u1", "s1")).unwrap();
        assert_eq!(next.sequence, 4);
        assert_eq!(next.previous_hash, head.hash);
        assert!(reopened.verify_all().unwrap().verified);
    }

    /// Editing a line on disk is detected after reopening.
    #[test]
    fn test_file_store_detects_edited_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        fill(&file_ledger(&path), 3);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        second["actor_id"] = serde_json::json!("mallory");
        lines[1] = second.to_string();
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();

        let result = file_ledger(&path).verify_all().unwrap();
        assert!(!result.verified);
        assert_eq!(result.issues_at(2, IssueKind::HashMismatch).count(), 1);
    }

    /// A torn trailing line is discarded; the ledger keeps appending.
    #[test]
    fn test_file_store_discards_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        fill(&file_ledger(&path), 2);
        let intact_len = std::fs::metadata(&path).unwrap().len();

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"id":"0000"#).unwrap();
        drop(file);

        let ledger = file_ledger(&path);
        assert_eq!(ledger.len().unwrap(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);

        assert_eq!(ledger.append(AuditEvent::login("u1", "s2")).unwrap().sequence, 3);
        assert!(ledger.verify_all().unwrap().verified);
    }

    /// A malformed complete line fails the open.
    #[test]
    fn test_file_store_rejects_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        fill(&file_ledger(&path), 2);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n").unwrap();
        drop(file);

        let err = JsonlLedgerStore::open(&path).err().unwrap();
        assert!(matches!(err, LedgerError::Storage { .. }));
        assert!(err.to_string().contains(":3:"));
    }
}
