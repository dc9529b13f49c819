//! In-memory implementation of `LedgerStore`.
//!
//! `MemoryLedgerStore` keeps entries in a `BTreeMap` keyed by sequence, with
//! secondary indexes on actor, action, resource, and timestamp so that
//! filtered queries do not scan the whole ledger.  Everything sits behind a
//! single `RwLock`: appends take the write lock, reads share the read lock.
//!
//! The JSON Lines store reuses the same index as its read model.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use chainlog_contracts::{
    entry::{AuditAction, LogEntry},
    error::{LedgerError, LedgerResult},
    query::{LedgerQuery, SortOrder},
};
use chainlog_core::traits::LedgerStore;

fn poisoned<T>(e: PoisonError<T>) -> LedgerError {
    LedgerError::Storage {
        reason: format!("ledger store lock poisoned: {}", e),
    }
}

/// Reject entries missing a field the chain depends on.
pub(crate) fn check_required(entry: &LogEntry) -> LedgerResult<()> {
    let missing = if entry.sequence == 0 {
        Some("sequence")
    } else if entry.actor_id.trim().is_empty() {
        Some("actor_id")
    } else if entry.hash.is_empty() {
        Some("hash")
    } else if entry.previous_hash.is_empty() {
        Some("previous_hash")
    } else {
        None
    };

    match missing {
        Some(field) => Err(LedgerError::Validation {
            reason: format!("entry is missing required field `{}`", field),
        }),
        None => Ok(()),
    }
}

// ── Index ─────────────────────────────────────────────────────────────────────

/// Entries plus their secondary indexes.
#[derive(Default)]
pub(crate) struct LedgerIndex {
    pub(crate) entries: BTreeMap<u64, LogEntry>,
    by_actor: HashMap<String, BTreeSet<u64>>,
    by_action: HashMap<AuditAction, BTreeSet<u64>>,
    by_resource_type: HashMap<String, BTreeSet<u64>>,
    by_resource: HashMap<(String, String), BTreeSet<u64>>,
    by_time: BTreeSet<(DateTime<Utc>, u64)>,
}

impl LedgerIndex {
    pub(crate) fn contains(&self, sequence: u64) -> bool {
        self.entries.contains_key(&sequence)
    }

    /// Insert `entry`, failing on a duplicate sequence.
    pub(crate) fn insert(&mut self, entry: LogEntry) -> LedgerResult<()> {
        let seq = entry.sequence;
        if self.contains(seq) {
            return Err(LedgerError::DuplicateSequence { sequence: seq });
        }

        self.by_actor.entry(entry.actor_id.clone()).or_default().insert(seq);
        self.by_action.entry(entry.action).or_default().insert(seq);
        if let Some(rt) = &entry.resource_type {
            self.by_resource_type.entry(rt.clone()).or_default().insert(seq);
            if let Some(rid) = &entry.resource_id {
                self.by_resource
                    .entry((rt.clone(), rid.clone()))
                    .or_default()
                    .insert(seq);
            }
        }
        self.by_time.insert((entry.timestamp, seq));
        self.entries.insert(seq, entry);
        Ok(())
    }

    /// Remove `sequence` from the entries and every index.
    #[cfg(test)]
    pub(crate) fn remove(&mut self, sequence: u64) -> Option<LogEntry> {
        let entry = self.entries.remove(&sequence)?;
        if let Some(set) = self.by_actor.get_mut(&entry.actor_id) {
            set.remove(&sequence);
        }
        if let Some(set) = self.by_action.get_mut(&entry.action) {
            set.remove(&sequence);
        }
        if let Some(rt) = &entry.resource_type {
            if let Some(set) = self.by_resource_type.get_mut(rt) {
                set.remove(&sequence);
            }
            if let Some(rid) = &entry.resource_id {
                if let Some(set) = self.by_resource.get_mut(&(rt.clone(), rid.clone())) {
                    set.remove(&sequence);
                }
            }
        }
        self.by_time.remove(&(entry.timestamp, sequence));
        Some(entry)
    }

    /// Candidate sequences for `query`, ascending, or `None` for a scan.
    ///
    /// Picks the smallest applicable index; the remaining filters are applied
    /// by `LedgerQuery::matches` afterwards.
    fn candidates(&self, query: &LedgerQuery) -> Option<Vec<u64>> {
        let empty = BTreeSet::new();
        let mut best: Option<&BTreeSet<u64>> = None;

        if let Some(actor) = &query.actor_id {
            pick(&mut best, self.by_actor.get(actor).unwrap_or(&empty));
        }
        if let Some(action) = query.action {
            pick(&mut best, self.by_action.get(&action).unwrap_or(&empty));
        }
        match (&query.resource_type, &query.resource_id) {
            (Some(rt), Some(rid)) => pick(
                &mut best,
                self.by_resource
                    .get(&(rt.clone(), rid.clone()))
                    .unwrap_or(&empty),
            ),
            (Some(rt), None) => pick(&mut best, self.by_resource_type.get(rt).unwrap_or(&empty)),
            _ => {}
        }

        if query.from_time.is_none() && query.to_time.is_none() {
            return best.map(|set| set.iter().copied().collect());
        }

        let lower = query.from_time.map_or(Bound::Unbounded, |t| Bound::Included((t, 0)));
        let upper = query
            .to_time
            .map_or(Bound::Unbounded, |t| Bound::Included((t, u64::MAX)));
        if let (Bound::Included(lo), Bound::Included(hi)) = (&lower, &upper) {
            if lo > hi {
                return Some(Vec::new());
            }
        }

        // Walk the time index only as far as it could beat the chosen set.
        let cap = best.map_or(usize::MAX, |set| set.len());
        let mut timed: Vec<u64> = self
            .by_time
            .range((lower, upper))
            .map(|(_, s)| *s)
            .take(cap.saturating_add(1))
            .collect();

        match best {
            Some(set) if set.len() < timed.len() => Some(set.iter().copied().collect()),
            _ => {
                timed.sort_unstable();
                Some(timed)
            }
        }
    }

    pub(crate) fn query(&self, query: &LedgerQuery) -> Vec<LogEntry> {
        let limit = query.limit.unwrap_or(usize::MAX);
        let lo = query.after_sequence.map_or(0, |s| s.saturating_add(1));
        let hi = query.before_sequence.map_or(u64::MAX, |s| s.saturating_sub(1));
        if lo > hi || limit == 0 {
            return Vec::new();
        }

        let results = match self.candidates(query) {
            Some(mut seqs) => {
                seqs.retain(|s| (lo..=hi).contains(s));
                if query.order == SortOrder::Descending {
                    seqs.reverse();
                }
                paginate(seqs.iter().filter_map(|s| self.entries.get(s)), query, limit)
            }
            None => {
                let range = self.entries.range(lo..=hi).map(|(_, e)| e);
                match query.order {
                    SortOrder::Ascending => paginate(range, query, limit),
                    SortOrder::Descending => paginate(range.rev(), query, limit),
                }
            }
        };

        debug!(returned = results.len(), "ledger query served");
        results
    }
}

/// Keep the smaller of `best` and `set`.
fn pick<'s>(best: &mut Option<&'s BTreeSet<u64>>, set: &'s BTreeSet<u64>) {
    if best.map_or(true, |b| set.len() < b.len()) {
        *best = Some(set);
    }
}

/// Filter `entries` (already in result order), then apply skip and limit.
fn paginate<'a>(
    entries: impl Iterator<Item = &'a LogEntry>,
    query: &LedgerQuery,
    limit: usize,
) -> Vec<LogEntry> {
    entries
        .filter(|e| query.matches(e))
        .skip(query.skip)
        .take(limit)
        .cloned()
        .collect()
}

// ── Public store ──────────────────────────────────────────────────────────────

/// An in-memory, append-only ledger store.
#[derive(Default)]
pub struct MemoryLedgerStore {
    pub(crate) index: RwLock<LedgerIndex>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> LedgerResult<RwLockReadGuard<'_, LedgerIndex>> {
        self.index.read().map_err(poisoned)
    }

    pub(crate) fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, LedgerIndex>> {
        self.index.write().map_err(poisoned)
    }

    /// Rewrite a stored entry in place, bypassing the append-only API.
    #[cfg(test)]
    pub(crate) fn tamper(&self, sequence: u64, f: impl FnOnce(&mut LogEntry)) {
        let mut index = self.write().unwrap();
        let mut entry = index.remove(sequence).unwrap();
        f(&mut entry);
        index.insert(entry).unwrap();
    }

    /// Delete a stored entry, bypassing the append-only API.
    #[cfg(test)]
    pub(crate) fn delete(&self, sequence: u64) -> Option<LogEntry> {
        self.write().unwrap().remove(sequence)
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn append(&self, entry: &LogEntry) -> LedgerResult<()> {
        check_required(entry)?;
        self.write()?.insert(entry.clone())?;
        debug!(sequence = entry.sequence, "entry stored");
        Ok(())
    }

    fn get(&self, sequence: u64) -> LedgerResult<Option<LogEntry>> {
        Ok(self.read()?.entries.get(&sequence).cloned())
    }

    fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<LogEntry>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self.read()?.entries.range(from..=to).map(|(_, e)| e.clone()).collect())
    }

    fn query(&self, query: &LedgerQuery) -> LedgerResult<Vec<LogEntry>> {
        Ok(self.read()?.query(query))
    }

    fn last(&self) -> LedgerResult<Option<LogEntry>> {
        Ok(self.read()?.entries.values().next_back().cloned())
    }

    fn count(&self) -> LedgerResult<u64> {
        Ok(self.read()?.entries.len() as u64)
    }
}
