//! # chainlog-contracts
//!
//! Shared types for the chainlog tamper-evident audit ledger.
//!
//! Every crate in the workspace imports from here.  No ledger logic lives in
//! this crate, only entry, query, and verification data plus the error type.

pub mod entry;
pub mod error;
pub mod event;
pub mod query;
pub mod verify;
