//! Error types for the chainlog ledger.
//!
//! All fallible ledger operations return `LedgerResult<T>`.  Tampering is
//! deliberately absent: it is reported as a `VerificationResult`, not raised.

use thiserror::Error;

/// The unified error type for the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A required field is missing or malformed.  Raised before any
    /// sequence number is reserved.
    #[error("validation error: {reason}")]
    Validation { reason: String },

    /// The chain head moved underneath a writer more times than the retry
    /// budget allows.
    #[error("concurrency conflict at sequence {sequence} after {attempts} attempts: {reason}")]
    ConcurrencyConflict {
        sequence: u64,
        attempts: u32,
        reason: String,
    },

    /// The store already holds an entry at this sequence.  Entries are never
    /// overwritten.
    #[error("sequence {sequence} already exists in the ledger")]
    DuplicateSequence { sequence: u64 },

    /// A durable read or write failed.
    ///
    /// On `append`, the reserved sequence was released and not consumed.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// An entry could not be encoded or decoded.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl LedgerError {
    /// True for failures a writer should retry with a fresh reservation.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrencyConflict { .. } | LedgerError::DuplicateSequence { .. }
        )
    }

    /// True for storage failures covered by the bounded write retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Storage { .. })
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Convenience alias used throughout the chainlog crates.
pub type LedgerResult<T> = Result<T, LedgerError>;
