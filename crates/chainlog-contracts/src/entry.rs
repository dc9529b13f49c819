//! Ledger entry types.
//!
//! `LogEntry` is the atomic, immutable unit of the ledger.  Ordering is
//! carried by `sequence` alone; `id` exists only for external reference.
//! `ChainHead` is the `(sequence, hash)` pair of the most recently committed
//! entry, the one piece of shared mutable state a ledger has.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Free-form structured context attached to an entry.
///
/// A `BTreeMap` so that iteration (and therefore serialization) order is
/// always sorted by key.
pub type Details = BTreeMap<String, serde_json::Value>;

/// The `previous_hash` sentinel carried by the entry at sequence 1.
pub const GENESIS_HASH: &str = "GENESIS";

/// Opaque unique identifier of a ledger entry.
///
/// Never used for ordering; `LogEntry::sequence` is the ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub uuid::Uuid);

impl EntryId {
    /// Create a new, random entry id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The kind of security-relevant action an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    View,
    Edit,
    Create,
    Delete,
    Export,
    Login,
    Logout,
    PiiUnmask,
    Decrypt,
    PasswordChange,
    FailedLogin,
    TokenRefresh,
}

impl AuditAction {
    /// Every action, in declaration order.
    pub const ALL: [AuditAction; 12] = [
        AuditAction::View,
        AuditAction::Edit,
        AuditAction::Create,
        AuditAction::Delete,
        AuditAction::Export,
        AuditAction::Login,
        AuditAction::Logout,
        AuditAction::PiiUnmask,
        AuditAction::Decrypt,
        AuditAction::PasswordChange,
        AuditAction::FailedLogin,
        AuditAction::TokenRefresh,
    ];

    /// The stable wire tag, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Export => "export",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::PiiUnmask => "pii_unmask",
            Self::Decrypt => "decrypt",
            Self::PasswordChange => "password_change",
            Self::FailedLogin => "failed_login",
            Self::TokenRefresh => "token_refresh",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| LedgerError::Validation {
                reason: format!("unknown audit action '{}'", s),
            })
    }
}

/// A single committed entry in the hash chain.
///
/// Every field except `hash` feeds the digest (subject to the configured
/// digest policy), and `previous_hash` links the entry to its predecessor.
/// Altering any covered field invalidates `hash`; removing an entry breaks
/// the successor's `previous_hash` link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// External reference id.
    pub id: EntryId,

    /// Position in the chain, starting at 1.  The true ordering key.
    pub sequence: u64,

    /// Principal performing the action: a user id, or an email address for
    /// failures that happen before authentication.
    pub actor_id: String,

    /// What the actor did.
    pub action: AuditAction,

    /// Kind of resource acted upon, if any (e.g. "shipment").
    pub resource_type: Option<String>,

    /// Identifier of the resource acted upon, if any.
    pub resource_id: Option<String>,

    /// Free-form context, e.g. which fields were unmasked.
    #[serde(default)]
    pub details: Details,

    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,

    /// Whether the recorded action succeeded.
    pub success: bool,

    /// Failure reason when `success` is false.
    pub error_message: Option<String>,

    /// Capture time, assigned by the ledger.  Informative only; `sequence`
    /// is authoritative for ordering.
    pub timestamp: DateTime<Utc>,

    /// `hash` of the entry at `sequence - 1`, or `GENESIS_HASH` at sequence 1.
    pub previous_hash: String,

    /// Lowercase hex SHA-256 of this entry's canonical fields.
    pub hash: String,
}

impl LogEntry {
    /// True if this is the first entry of a ledger.
    pub fn is_genesis(&self) -> bool {
        self.sequence == 1
    }

    /// The chain head this entry establishes once committed.
    pub fn as_head(&self) -> ChainHead {
        ChainHead {
            sequence: self.sequence,
            hash: self.hash.clone(),
        }
    }
}

/// The `(sequence, hash)` pair of the most recently committed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Sequence of the last committed entry; 0 for an empty ledger.
    pub sequence: u64,

    /// Hash of the last committed entry; `GENESIS_HASH` for an empty ledger.
    pub hash: String,
}

impl ChainHead {
    /// The head of a ledger with no entries.
    pub fn genesis() -> Self {
        Self {
            sequence: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }

    /// Head established by `last`, or genesis when the ledger is empty.
    pub fn from_last(last: Option<&LogEntry>) -> Self {
        last.map(LogEntry::as_head).unwrap_or_else(Self::genesis)
    }

    /// True if no entry has been committed yet.
    pub fn is_genesis(&self) -> bool {
        self.sequence == 0
    }
}

impl Default for ChainHead {
    fn default() -> Self {
        Self::genesis()
    }
}
