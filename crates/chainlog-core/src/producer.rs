//! Helpers for event producers.
//!
//! Whether a business action may proceed when its audit record cannot be
//! written is decided per action, never implicitly: see
//! `AuditAction::failure_policy`.  A fail-closed producer propagates the
//! ledger error; a fail-open producer logs it at error level and carries on.

use tracing::error;

use chainlog_contracts::{
    entry::LogEntry,
    error::LedgerResult,
    event::{AuditEvent, FailurePolicy},
};

use crate::ledger::AuditLedger;

/// Record `event` under its action's default failure policy.
///
/// Returns `Ok(None)` only when a fail-open write was dropped.
pub fn record(ledger: &AuditLedger, event: AuditEvent) -> LedgerResult<Option<LogEntry>> {
    let policy = event.action.failure_policy();
    record_with(ledger, event, policy)
}

/// Record `event` under an explicit failure policy.
pub fn record_with(
    ledger: &AuditLedger,
    event: AuditEvent,
    policy: FailurePolicy,
) -> LedgerResult<Option<LogEntry>> {
    let action = event.action;
    let actor_id = event.actor_id.clone();

    match ledger.append(event) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) => match policy {
            FailurePolicy::FailClosed => Err(e),
            FailurePolicy::FailOpen => {
                error!(
                    action = %action,
                    actor_id = %actor_id,
                    error = %e,
                    "audit record dropped under fail-open policy"
                );
                Ok(None)
            }
        },
    }
}
