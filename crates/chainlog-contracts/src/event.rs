//! Append requests and producer failure policy.
//!
//! Producers (the session system, the resource guard, the PII-masking layer)
//! describe what happened as an `AuditEvent`.  The ledger turns it into a
//! `LogEntry` by assigning the sequence, timestamp, and hashes; none of those
//! can be set by the caller.

use serde::{Deserialize, Serialize};

use crate::entry::{AuditAction, Details};

/// What a producer wants recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor_id: String,
    pub action: AuditAction,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    #[serde(default)]
    pub details: Details,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditEvent {
    /// A successful `action` by `actor_id` with no resource or provenance.
    pub fn new(actor_id: impl Into<String>, action: AuditAction) -> Self {
        Self {
            actor_id: actor_id.into(),
            action,
            resource_type: None,
            resource_id: None,
            details: Details::new(),
            ip_address: None,
            user_agent: None,
            session_id: None,
            success: true,
            error_message: None,
        }
    }

    /// Attach the resource acted upon.
    pub fn resource(mut self, resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Attach a resource type without a specific id (e.g. a bulk export).
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Add one key to the free-form details.
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach request provenance.  `None` leaves the field unset.
    pub fn provenance(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
        session_id: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self.session_id = session_id;
        self
    }

    /// Mark the recorded action as failed.
    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }

    // ── Producer call sites ─────────────────────────────────────────────────

    pub fn login(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let mut event = Self::new(user_id, AuditAction::Login);
        event.session_id = Some(session_id.into());
        event
    }

    /// A failed login.  The actor is the email that was attempted, since no
    /// user id is known before authentication.
    pub fn failed_login(email: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(email, AuditAction::FailedLogin).failed(reason)
    }

    pub fn logout(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let mut event = Self::new(user_id, AuditAction::Logout);
        event.session_id = Some(session_id.into());
        event
    }

    pub fn token_refresh(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let mut event = Self::new(user_id, AuditAction::TokenRefresh);
        event.session_id = Some(session_id.into());
        event
    }

    pub fn password_change(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self::new(user_id.clone(), AuditAction::PasswordChange).resource("user", user_id)
    }

    /// PII fields of a resource were shown unmasked to `user_id`.
    pub fn pii_unmask(
        user_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        fields: &[&str],
    ) -> Self {
        Self::new(user_id, AuditAction::PiiUnmask)
            .resource(resource_type, resource_id)
            .detail("fields", fields.to_vec())
    }

    pub fn decrypt(
        user_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::new(user_id, AuditAction::Decrypt)
            .resource(resource_type, resource_id)
            .detail("field", field.into())
    }

    /// The ownership guard let `user_id` perform `action` on a resource.
    pub fn access_granted(
        user_id: impl Into<String>,
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self::new(user_id, action).resource(resource_type, resource_id)
    }

    /// The ownership guard refused `action` on a resource.
    pub fn access_denied(
        user_id: impl Into<String>,
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(user_id, action)
            .resource(resource_type, resource_id)
            .failed(reason)
    }
}

/// What a producer does when its audit record cannot be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The triggering business action must fail too.
    FailClosed,
    /// The business action proceeds; the lost record is logged at error level.
    FailOpen,
}

impl AuditAction {
    /// Default failure policy for producers recording this action.
    ///
    /// Credential, PII, and bulk-data actions fail closed.  Routine reads,
    /// writes, and session housekeeping fail open.
    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            AuditAction::PasswordChange
            | AuditAction::PiiUnmask
            | AuditAction::Decrypt
            | AuditAction::Delete
            | AuditAction::Export
            | AuditAction::Login
            | AuditAction::FailedLogin => FailurePolicy::FailClosed,
            AuditAction::View
            | AuditAction::Edit
            | AuditAction::Create
            | AuditAction::Logout
            | AuditAction::TokenRefresh => FailurePolicy::FailOpen,
        }
    }
}
