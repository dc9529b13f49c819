//! Trait definitions at the ledger's trust seams.
//!
//! - `LedgerStore`:        durable, append-only entry storage with indexes
//! - `SequenceAllocator`:  the single critical section advancing the head
//! - `HeadCell`:           an externally stored head row with compare-and-advance
//!
//! `AuditLedger` is the only caller of `LedgerStore::append` and of the
//! allocator's `reserve`/`commit`/`release`.  Everything else only reads.

use chainlog_contracts::{
    entry::{ChainHead, LogEntry},
    error::LedgerResult,
    query::LedgerQuery,
};

/// Durable append-only storage keyed by sequence.
///
/// There is no update or delete method.  Implementations must make `append`
/// atomic: a reader either sees the whole entry or none of it.
pub trait LedgerStore: Send + Sync {
    /// Physically insert `entry`.
    ///
    /// Fails closed with `LedgerError::Validation` if a required field is
    /// missing, and with `LedgerError::DuplicateSequence` if the sequence is
    /// already stored.  Never overwrites.
    fn append(&self, entry: &LogEntry) -> LedgerResult<()>;

    /// Point lookup by sequence.
    fn get(&self, sequence: u64) -> LedgerResult<Option<LogEntry>>;

    /// Entries with `from <= sequence <= to`, ascending.
    fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<LogEntry>>;

    /// Entries matching `query`, ordered and paginated as it specifies.
    ///
    /// `query.limit` of `None` means unlimited at this layer; the ledger
    /// substitutes its configured default before calling.
    fn query(&self, query: &LedgerQuery) -> LedgerResult<Vec<LogEntry>>;

    /// The entry with the highest sequence.
    fn last(&self) -> LedgerResult<Option<LogEntry>>;

    /// Number of stored entries.
    fn count(&self) -> LedgerResult<u64>;
}

/// A sequence number and predecessor hash handed to exactly one writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reservation {
    pub sequence: u64,
    pub previous_hash: String,
}

impl Reservation {
    /// The head this reservation extends.
    pub fn base(&self) -> ChainHead {
        ChainHead {
            sequence: self.sequence.saturating_sub(1),
            hash: self.previous_hash.clone(),
        }
    }
}

/// Issues `(sequence, previous_hash)` pairs and advances the chain head.
///
/// `reserve` followed by `commit` behaves as one critical section per
/// ledger: no two writers ever commit the same sequence, and the head only
/// moves over entries that are durably stored.
pub trait SequenceAllocator: Send + Sync {
    /// Hand out the next sequence and the hash it must link to.
    fn reserve(&self) -> LedgerResult<Reservation>;

    /// Advance the head to `(reservation.sequence, hash)` after the entry
    /// was durably written.
    fn commit(&self, reservation: Reservation, hash: &str) -> LedgerResult<ChainHead>;

    /// Give a reservation back without advancing the head.  The same
    /// sequence is handed out again, so no number is skipped.
    fn release(&self, reservation: Reservation);

    /// The current committed head.
    fn head(&self) -> LedgerResult<ChainHead>;

    /// Catch the head up to `entry`, which a writer found already durable
    /// at its reserved sequence (the writer that stored it never committed).
    ///
    /// Only advances when `entry` directly extends the current head.
    fn observe_committed(&self, entry: &LogEntry) -> LedgerResult<()>;
}

/// A head record that lives outside the process, e.g. a single database row.
///
/// The only in-place update anywhere in the ledger goes through
/// `compare_and_advance`.
pub trait HeadCell: Send + Sync {
    fn load(&self) -> LedgerResult<ChainHead>;

    /// Replace the head with `new` only if it currently equals `expected`.
    ///
    /// Returns `true` if the swap happened.
    fn compare_and_advance(&self, expected: &ChainHead, new: &ChainHead) -> LedgerResult<bool>;
}
