//! Entry codec: canonical serialization and SHA-256 digest.
//!
//! The digest input is a canonical JSON object: no whitespace, object keys
//! sorted at every depth (including inside `details`), absent optionals
//! written as `null`.  Sorting happens in the writer itself, so the output
//! does not depend on how `serde_json::Map` orders its keys in a given build.
//!
//! Fields covered by each `DigestPolicy`:
//!
//! | policy    | fields |
//! |-----------|--------|
//! | `minimal` | `action, actor_id, id, previous_hash, resource_id, resource_type, sequence, timestamp` |
//! | `full`    | the above plus `details, error_message, ip_address, session_id, success, user_agent` |
//!
//! `timestamp` is written as RFC 3339 UTC with nanosecond precision.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use chainlog_contracts::entry::LogEntry;

/// Which entry fields the digest commits to.
///
/// A ledger must be verified with the policy it was written with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestPolicy {
    /// Ordering-relevant fields only.  `details` and provenance can change
    /// without detection.
    Minimal,
    /// Every field except `hash` itself.
    #[default]
    Full,
}

/// Build the JSON object whose canonical form is hashed.
fn digest_fields(entry: &LogEntry, policy: DigestPolicy) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("id".into(), Value::String(entry.id.0.to_string()));
    fields.insert("sequence".into(), Value::from(entry.sequence));
    fields.insert("actor_id".into(), Value::String(entry.actor_id.clone()));
    fields.insert("action".into(), Value::String(entry.action.as_str().to_string()));
    fields.insert("resource_type".into(), opt(&entry.resource_type));
    fields.insert("resource_id".into(), opt(&entry.resource_id));
    fields.insert(
        "timestamp".into(),
        Value::String(entry.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)),
    );
    fields.insert("previous_hash".into(), Value::String(entry.previous_hash.clone()));

    if policy == DigestPolicy::Full {
        let details: Map<String, Value> = entry
            .details
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        fields.insert("details".into(), Value::Object(details));
        fields.insert("ip_address".into(), opt(&entry.ip_address));
        fields.insert("user_agent".into(), opt(&entry.user_agent));
        fields.insert("session_id".into(), opt(&entry.session_id));
        fields.insert("success".into(), Value::Bool(entry.success));
        fields.insert("error_message".into(), opt(&entry.error_message));
    }

    fields
}

fn opt(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

/// Write `value` as canonical JSON into `out`.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        // Serializing a bare string cannot fail.
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// Canonical byte representation of the fields `policy` covers.
///
/// `entry.hash` is never part of the input.
pub fn canonical_bytes(entry: &LogEntry, policy: DigestPolicy) -> Vec<u8> {
    let mut out = String::with_capacity(256);
    write_canonical(&Value::Object(digest_fields(entry, policy)), &mut out);
    out.into_bytes()
}

/// Compute the digest of `entry` under `policy`.
///
/// Returns a lowercase 64-character hex string.
pub fn digest(entry: &LogEntry, policy: DigestPolicy) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(entry, policy));
    hex::encode(hasher.finalize())
}

/// True if the stored `hash` equals the recomputed digest.
pub fn matches(entry: &LogEntry, policy: DigestPolicy) -> bool {
    entry.hash == digest(entry, policy)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    use chainlog_contracts::entry::{AuditAction, Details, EntryId, LogEntry, GENESIS_HASH};

    use super::{canonical_bytes, digest, matches, DigestPolicy};

    fn make_entry() -> LogEntry {
        let mut details = Details::new();
        details.insert("fields".to_string(), json!(["email", "phone"]));
        details.insert("reason".to_string(), json!("support ticket"));
        LogEntry {
            id: EntryId(uuid::Uuid::from_u128(0x1234)),
            sequence: 1,
            actor_id: "u1".to_string(),
            action: AuditAction::PiiUnmask,
            resource_type: Some("customer".to_string()),
            resource_id: Some("c-1".to_string()),
            details,
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some("curl/8".to_string()),
            session_id: Some("sess-1".to_string()),
            success: true,
            error_message: None,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            previous_hash: GENESIS_HASH.to_string(),
            hash: String::new(),
        }
    }

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        let hash = digest(&make_entry(), DigestPolicy::Full);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn digest_is_deterministic() {
        let entry = make_entry();
        assert_eq!(digest(&entry, DigestPolicy::Full), digest(&entry, DigestPolicy::Full));
        assert_eq!(digest(&entry, DigestPolicy::Minimal), digest(&entry, DigestPolicy::Minimal));
    }

    #[test]
    fn canonical_form_sorts_keys_at_every_depth() {
        let mut entry = make_entry();
        entry.details.clear();
        entry.details.insert("z".to_string(), json!({ "b": 1, "a": [true, null] }));

        let text = String::from_utf8(canonical_bytes(&entry, DigestPolicy::Full)).unwrap();
        assert!(text.starts_with("{\"action\":\"pii_unmask\",\"actor_id\":\"u1\""));
        assert!(text.contains("\"details\":{\"z\":{\"a\":[true,null],\"b\":1}}"));
        assert!(text.contains("\"timestamp\":\"2026-01-02T03:04:05.000000000Z\""));
        assert!(!text.contains(' '));
    }

    #[test]
    fn hash_field_is_not_digest_input() {
        let mut entry = make_entry();
        let before = digest(&entry, DigestPolicy::Full);
        entry.hash = "ff".repeat(32);
        assert_eq!(digest(&entry, DigestPolicy::Full), before);
    }

    #[test]
    fn minimal_policy_ignores_details() {
        let mut entry = make_entry();
        let minimal = digest(&entry, DigestPolicy::Minimal);
        let full = digest(&entry, DigestPolicy::Full);

        entry.details.insert("reason".to_string(), json!("rewritten"));
        assert_eq!(digest(&entry, DigestPolicy::Minimal), minimal);
        assert_ne!(digest(&entry, DigestPolicy::Full), full);
    }

    #[test]
    fn matches_detects_stale_hash() {
        let mut entry = make_entry();
        entry.hash = digest(&entry, DigestPolicy::Full);
        assert!(matches(&entry, DigestPolicy::Full));

        entry.actor_id = "mallory".to_string();
        assert!(!matches(&entry, DigestPolicy::Full));
    }

    #[test]
    fn timestamp_round_trips_through_json_without_changing_digest() {
        let mut entry = make_entry();
        entry.timestamp = Utc::now();
        entry.hash = digest(&entry, DigestPolicy::Full);

        let json = serde_json::to_string(&entry).unwrap();
        let decoded: LogEntry = serde_json::from_str(&json).unwrap();
        assert!(matches(&decoded, DigestPolicy::Full));
    }

    // ── Avalanche: any single-field change changes the digest ────────────────

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn single_field_change_changes_digest(
            field in 0usize..12,
            text in "[a-z0-9]{1,16}",
            bump in 1u64..1_000,
        ) {
            let original = make_entry();
            let mut changed = original.clone();
            match field {
                0 => changed.id = EntryId(uuid::Uuid::from_u128(0x1234 + bump as u128)),
                1 => changed.sequence += bump,
                2 => changed.actor_id = format!("{}-{}", original.actor_id, text),
                3 => changed.action = AuditAction::Export,
                4 => changed.resource_type = Some(format!("t-{}", text)),
                5 => changed.resource_id = None,
                6 => changed.timestamp = original.timestamp + chrono::Duration::nanoseconds(bump as i64),
                7 => changed.previous_hash = format!("{}{}", text, "0".repeat(8)),
                8 => { changed.details.insert(format!("k-{}", text), json!(bump)); }
                9 => changed.ip_address = Some(format!("10.1.{}.{}", bump % 255, text.len())),
                10 => changed.success = false,
                _ => changed.error_message = Some(text.clone()),
            }
            prop_assert_ne!(
                digest(&original, DigestPolicy::Full),
                digest(&changed, DigestPolicy::Full)
            );
        }
    }
}
