//! Ledger configuration.
//!
//! `LedgerConfig` is read from a TOML document.  Every key is optional and
//! falls back to the value in `LedgerConfig::default()`.
//!
//! Example:
//! ```toml
//! digest_policy = "full"
//! max_storage_attempts = 3
//! retry_backoff_ms = 10
//! max_conflict_retries = 128
//! reserve_timeout_ms = 5000
//! default_query_limit = 100
//! max_query_limit = 1000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use chainlog_contracts::error::{LedgerError, LedgerResult};

use crate::codec::DigestPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Fields the entry digest commits to.  Must match the policy the ledger
    /// was written with, or every entry reports `hash_mismatch`.
    pub digest_policy: DigestPolicy,

    /// Attempts per `append` against transient storage errors.
    pub max_storage_attempts: u32,

    /// Backoff before the second storage attempt; doubled on each further
    /// attempt.
    pub retry_backoff_ms: u64,

    /// Lost head races tolerated per `append` before giving up.
    pub max_conflict_retries: u32,

    /// How long a writer waits for the chain head before giving up.
    pub reserve_timeout_ms: u64,

    /// Applied when a query sets no limit.
    pub default_query_limit: usize,

    /// Upper bound on any query limit.
    pub max_query_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            digest_policy: DigestPolicy::Full,
            max_storage_attempts: 3,
            retry_backoff_ms: 10,
            max_conflict_retries: 128,
            reserve_timeout_ms: 5_000,
            default_query_limit: 100,
            max_query_limit: 1_000,
        }
    }
}

impl LedgerConfig {
    /// Parse `s` as TOML and validate the result.
    ///
    /// Returns `LedgerError::Config` if the TOML is malformed, names an
    /// unknown key, or fails `validate`.
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: LedgerConfig = toml::from_str(s).map_err(|e| LedgerError::Config {
            reason: format!("failed to parse ledger config TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read the file at `path` and parse it as ledger configuration.
    pub fn from_file(path: &Path) -> LedgerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| LedgerError::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.max_storage_attempts == 0 {
            return Err(LedgerError::Config {
                reason: "max_storage_attempts must be at least 1".to_string(),
            });
        }
        if self.max_query_limit == 0 {
            return Err(LedgerError::Config {
                reason: "max_query_limit must be at least 1".to_string(),
            });
        }
        if self.default_query_limit > self.max_query_limit {
            return Err(LedgerError::Config {
                reason: format!(
                    "default_query_limit ({}) exceeds max_query_limit ({})",
                    self.default_query_limit, self.max_query_limit
                ),
            });
        }
        Ok(())
    }

    pub fn reserve_timeout(&self) -> Duration {
        Duration::from_millis(self.reserve_timeout_ms)
    }

    /// Backoff before storage attempt `attempt + 1`, where `attempt` counts
    /// failures so far (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// The limit actually applied to a query that asked for `requested`.
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_query_limit)
            .min(self.max_query_limit)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chainlog_contracts::error::LedgerError;

    use super::LedgerConfig;
    use crate::codec::DigestPolicy;

    #[test]
    fn empty_document_uses_defaults() {
        let config = LedgerConfig::from_toml_str("").unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.digest_policy, DigestPolicy::Full);
    }

    #[test]
    fn overrides_are_applied() {
        let config = LedgerConfig::from_toml_str(
            r#"
            digest_policy = "minimal"
            max_storage_attempts = 5
            default_query_limit = 10
        "#,
        )
        .unwrap();
        assert_eq!(config.digest_policy, DigestPolicy::Minimal);
        assert_eq!(config.max_storage_attempts, 5);
        assert_eq!(config.effective_limit(None), 10);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = LedgerConfig::from_toml_str("max_attempts = 3").unwrap_err();
        assert!(matches!(err, LedgerError::Config { .. }));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = LedgerConfig::from_toml_str("max_storage_attempts = 0").unwrap_err();
        assert!(err.to_string().contains("max_storage_attempts"));
    }

    #[test]
    fn limit_is_clamped() {
        let config = LedgerConfig::default();
        assert_eq!(config.effective_limit(Some(5)), 5);
        assert_eq!(config.effective_limit(Some(1_000_000)), 1_000);
    }

    #[test]
    fn backoff_doubles() {
        let config = LedgerConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(40));
    }
}
