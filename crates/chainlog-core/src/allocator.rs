//! Sequence allocators: the one place the chain head is advanced.
//!
//! `LockingAllocator` serves a ledger that lives in one process.  The head
//! and a single outstanding reservation sit behind one `Mutex`; the lock is
//! not held during storage I/O, but a second reserver waits on a `Condvar`
//! until the outstanding reservation is committed or released.
//!
//! `OptimisticAllocator` serves a ledger whose head lives in shared storage
//! (`HeadCell`).  Reservations are lock-free snapshots of the head; the
//! store's duplicate-sequence rejection decides which of several writers
//! holding the same snapshot wins, and `commit` is a single
//! compare-and-advance on the head row.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use chainlog_contracts::{
    entry::{ChainHead, LogEntry},
    error::{LedgerError, LedgerResult},
};

use crate::traits::{HeadCell, Reservation, SequenceAllocator};

fn poisoned<T>(e: PoisonError<T>) -> LedgerError {
    LedgerError::Storage {
        reason: format!("chain head lock poisoned: {}", e),
    }
}

// ── In-process allocator ──────────────────────────────────────────────────────

struct HeadState {
    head: ChainHead,
    /// Sequence currently reserved and not yet committed or released.
    pending: Option<u64>,
}

/// Mutex-guarded head for a single-process ledger.
pub struct LockingAllocator {
    state: Mutex<HeadState>,
    available: Condvar,
    wait_timeout: Duration,
}

impl LockingAllocator {
    /// Create an allocator whose head is `head`, typically derived from the
    /// store's last entry with `ChainHead::from_last`.
    pub fn new(head: ChainHead, wait_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(HeadState { head, pending: None }),
            available: Condvar::new(),
            wait_timeout,
        }
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, HeadState>> {
        self.state.lock().map_err(poisoned)
    }
}

impl SequenceAllocator for LockingAllocator {
    fn reserve(&self) -> LedgerResult<Reservation> {
        let deadline = Instant::now() + self.wait_timeout;
        let mut state = self.lock()?;

        while state.pending.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LedgerError::ConcurrencyConflict {
                    sequence: state.head.sequence + 1,
                    attempts: 1,
                    reason: format!(
                        "timed out after {:?} waiting for reservation of sequence {:?}",
                        self.wait_timeout, state.pending
                    ),
                });
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, remaining)
                .map_err(poisoned)?;
            state = guard;
        }

        let sequence = state.head.sequence + 1;
        state.pending = Some(sequence);
        debug!(sequence, "sequence reserved");

        Ok(Reservation {
            sequence,
            previous_hash: state.head.hash.clone(),
        })
    }

    fn commit(&self, reservation: Reservation, hash: &str) -> LedgerResult<ChainHead> {
        let mut state = self.lock()?;

        if state.pending != Some(reservation.sequence) || state.head != reservation.base() {
            if state.pending == Some(reservation.sequence) {
                state.pending = None;
                self.available.notify_one();
            }
            return Err(LedgerError::ConcurrencyConflict {
                sequence: reservation.sequence,
                attempts: 1,
                reason: format!(
                    "commit does not match the outstanding reservation (head at {})",
                    state.head.sequence
                ),
            });
        }

        state.head = ChainHead {
            sequence: reservation.sequence,
            hash: hash.to_string(),
        };
        state.pending = None;
        self.available.notify_one();

        debug!(sequence = reservation.sequence, "chain head advanced");
        Ok(state.head.clone())
    }

    fn release(&self, reservation: Reservation) {
        // Clear the reservation even on a poisoned lock so waiters are not
        // wedged behind it.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.pending == Some(reservation.sequence) {
            state.pending = None;
            self.available.notify_one();
            debug!(sequence = reservation.sequence, "reservation released");
        }
    }

    fn head(&self) -> LedgerResult<ChainHead> {
        Ok(self.lock()?.head.clone())
    }

    fn observe_committed(&self, entry: &LogEntry) -> LedgerResult<()> {
        let mut state = self.lock()?;
        if state.head.sequence + 1 == entry.sequence && state.head.hash == entry.previous_hash {
            warn!(
                sequence = entry.sequence,
                "chain head lagged a durable entry, advancing"
            );
            state.head = entry.as_head();
        }
        Ok(())
    }
}

// ── Shared-head allocator ─────────────────────────────────────────────────────

/// Optimistic allocator over a `HeadCell`.
pub struct OptimisticAllocator<C: HeadCell> {
    cell: C,
}

impl<C: HeadCell> OptimisticAllocator<C> {
    pub fn new(cell: C) -> Self {
        Self { cell }
    }

    pub fn cell(&self) -> &C {
        &self.cell
    }
}

impl<C: HeadCell> SequenceAllocator for OptimisticAllocator<C> {
    fn reserve(&self) -> LedgerResult<Reservation> {
        let head = self.cell.load()?;
        Ok(Reservation {
            sequence: head.sequence + 1,
            previous_hash: head.hash,
        })
    }

    fn commit(&self, reservation: Reservation, hash: &str) -> LedgerResult<ChainHead> {
        let new = ChainHead {
            sequence: reservation.sequence,
            hash: hash.to_string(),
        };
        if self.cell.compare_and_advance(&reservation.base(), &new)? {
            debug!(sequence = new.sequence, "chain head advanced");
            return Ok(new);
        }

        // Another writer found our entry durable and advanced the head for
        // us.  The store accepted our entry at this sequence, so a head at or
        // beyond it already covers it.
        let current = self.cell.load()?;
        if current == new || current.sequence > new.sequence {
            return Ok(new);
        }
        Err(LedgerError::ConcurrencyConflict {
            sequence: reservation.sequence,
            attempts: 1,
            reason: format!("head at {} did not match the reservation base", current.sequence),
        })
    }

    fn release(&self, _reservation: Reservation) {
        // Nothing was claimed: the head only moves in `commit`.
    }

    fn head(&self) -> LedgerResult<ChainHead> {
        self.cell.load()
    }

    fn observe_committed(&self, entry: &LogEntry) -> LedgerResult<()> {
        let expected = ChainHead {
            sequence: entry.sequence.saturating_sub(1),
            hash: entry.previous_hash.clone(),
        };
        if self.cell.compare_and_advance(&expected, &entry.as_head())? {
            warn!(
                sequence = entry.sequence,
                "chain head lagged a durable entry, advancing"
            );
        }
        Ok(())
    }
}

/// In-memory `HeadCell`, standing in for a shared head row.
#[derive(Debug, Default)]
pub struct MemoryHeadCell {
    head: Mutex<ChainHead>,
}

impl MemoryHeadCell {
    pub fn new(head: ChainHead) -> Self {
        Self {
            head: Mutex::new(head),
        }
    }
}

impl HeadCell for MemoryHeadCell {
    fn load(&self) -> LedgerResult<ChainHead> {
        Ok(self.head.lock().map_err(poisoned)?.clone())
    }

    fn compare_and_advance(&self, expected: &ChainHead, new: &ChainHead) -> LedgerResult<bool> {
        let mut head = self.head.lock().map_err(poisoned)?;
        if *head == *expected {
            *head = new.clone();
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
