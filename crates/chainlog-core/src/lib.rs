//! # chainlog-core
//!
//! The tamper-evident write path and verification procedure of the chainlog
//! audit ledger.
//!
//! This crate provides:
//! - The seam traits (`LedgerStore`, `SequenceAllocator`, `HeadCell`)
//! - The entry codec (`codec::digest`) and `IntegrityVerifier`
//! - `LockingAllocator` and `OptimisticAllocator` for the chain head
//! - `AuditLedger`, which wires them together in the correct order
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chainlog_contracts::event::AuditEvent;
//! use chainlog_core::{AuditLedger, LedgerConfig};
//! use chainlog_store::MemoryLedgerStore;
//!
//! let ledger = AuditLedger::with_locking_allocator(
//!     Arc::new(MemoryLedgerStore::new()),
//!     LedgerConfig::default(),
//! )?;
//! ledger.append(AuditEvent::login("u1", "sess-1"))?;
//! assert!(ledger.verify_all()?.verified);
//! ```

pub mod allocator;
pub mod codec;
pub mod config;
pub mod ledger;
pub mod producer;
pub mod traits;
pub mod verifier;

pub use allocator::{LockingAllocator, MemoryHeadCell, OptimisticAllocator};
pub use codec::DigestPolicy;
pub use config::LedgerConfig;
pub use ledger::AuditLedger;
pub use traits::{HeadCell, LedgerStore, Reservation, SequenceAllocator};
pub use verifier::IntegrityVerifier;

// ── Tests ─────────────────────────────────────────────────────────────────────
