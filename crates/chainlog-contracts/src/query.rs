//! Query filter for ledger reads.
//!
//! All fields are optional and combine with AND logic.  Results are ordered
//! by sequence, newest first unless `ascending()` is set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{AuditAction, LogEntry};

/// Result ordering by sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Descending,
    Ascending,
}

/// Filter, ordering, and pagination for `LedgerStore::query`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub actor_id: Option<String>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    /// Only meaningful together with `resource_type`.
    pub resource_id: Option<String>,
    /// Inclusive lower bound on `timestamp`.
    pub from_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `timestamp`.
    pub to_time: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    /// Cursor: only entries with a sequence strictly below this.
    pub before_sequence: Option<u64>,
    /// Cursor: only entries with a sequence strictly above this.
    pub after_sequence: Option<u64>,
    pub order: SortOrder,
    /// Maximum results; the ledger substitutes its configured default.
    pub limit: Option<usize>,
    /// Matching entries to pass over before collecting results.
    pub skip: usize,
}

impl LedgerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }

    pub fn with_resource(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    /// Entries captured within `[from, to]`.
    pub fn with_time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from_time = Some(from);
        self.to_time = Some(to);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn before(mut self, sequence: u64) -> Self {
        self.before_sequence = Some(sequence);
        self
    }

    pub fn after(mut self, sequence: u64) -> Self {
        self.after_sequence = Some(sequence);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.order = SortOrder::Ascending;
        self
    }

    /// Return true if `entry` satisfies every filter field.
    ///
    /// Ordering and pagination (`order`, `limit`, `skip`) are not filters
    /// and are ignored here.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(actor) = &self.actor_id {
            if &entry.actor_id != actor {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(resource_type) = &self.resource_type {
            if entry.resource_type.as_ref() != Some(resource_type) {
                return false;
            }
        }
        if let Some(resource_id) = &self.resource_id {
            if entry.resource_id.as_ref() != Some(resource_id) {
                return false;
            }
        }
        if let Some(from) = self.from_time {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to_time {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        if let Some(before) = self.before_sequence {
            if entry.sequence >= before {
                return false;
            }
        }
        if let Some(after) = self.after_sequence {
            if entry.sequence <= after {
                return false;
            }
        }
        true
    }
}
