//! Policy parameter validation and id generation.
//!
//! Raw parameters arrive as a JSON object and are validated into a closed
//! [`PolicyRule`]. Accepted shapes:
//!
//! | kind | parameters |
//! |---|---|
//! | allowlist | `{"addresses": ["<64 hex>", ...]}` (non-empty) |
//! | timelock | `{"unlock_time": <unix ms> \| "<RFC 3339>"}` (in the future) |
//! | subscription | `{"entitlement_ref": "<non-empty>"}` |

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use serde_json::Value;

use keyquorum_core::{Identity, PolicyId, PolicyKind, PolicyRule};

use crate::error::{PolicyError, Result};

/// Validate `params` against the schema of `kind`.
///
/// `now` is Unix milliseconds, used to reject time-locks already in the past.
pub fn validate_params(kind: PolicyKind, params: &Value, now: i64) -> Result<PolicyRule> {
    let obj = params
        .as_object()
        .ok_or_else(|| invalid("parameters must be a JSON object"))?;

    match kind {
        PolicyKind::Allowlist => {
            let list = obj
                .get("addresses")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("allowlist requires an `addresses` array"))?;
            let mut addresses = BTreeSet::new();
            for entry in list {
                let hex = entry
                    .as_str()
                    .ok_or_else(|| invalid("allowlist addresses must be strings"))?;
                let identity = Identity::from_hex(hex)
                    .map_err(|e| invalid(format!("bad address {:?}: {}", hex, e)))?;
                addresses.insert(identity);
            }
            if addresses.is_empty() {
                return Err(invalid("allowlist must contain at least one address"));
            }
            Ok(PolicyRule::Allowlist { addresses })
        }
        PolicyKind::Timelock => {
            let raw = obj
                .get("unlock_time")
                .ok_or_else(|| invalid("timelock requires `unlock_time`"))?;
            let unlock_at = parse_unlock_time(raw)?;
            if unlock_at <= now {
                return Err(invalid("unlock_time must be in the future"));
            }
            Ok(PolicyRule::Timelock { unlock_at })
        }
        PolicyKind::Subscription => {
            let entitlement_ref = obj
                .get("entitlement_ref")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| invalid("subscription requires a non-empty `entitlement_ref`"))?;
            Ok(PolicyRule::Subscription {
                entitlement_ref: entitlement_ref.to_string(),
            })
        }
    }
}

fn parse_unlock_time(raw: &Value) -> Result<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| invalid("unlock_time must be an integer of Unix milliseconds")),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.timestamp_millis())
            .map_err(|e| invalid(format!("unlock_time {:?} is not RFC 3339: {}", s, e))),
        _ => Err(invalid("unlock_time must be a number or an RFC 3339 string")),
    }
}

/// Mint a policy id of the form `{kind}_{yyyymmdd_HHMMSS}_{8 hex}`.
pub fn generate_policy_id(kind: PolicyKind, now: i64) -> PolicyId {
    let stamp = Utc
        .timestamp_millis_opt(now)
        .single()
        .unwrap_or_default()
        .format("%Y%m%d_%H%M%S");
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    PolicyId::new(format!("{}_{}_{}", kind, stamp, hex::encode(suffix)))
}

fn invalid(msg: impl Into<String>) -> PolicyError {
    PolicyError::Validation(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const NOW: i64 = 1_790_000_000_000;

    #[test]
    fn test_allowlist_valid() {
        let params = json!({ "addresses": ["11".repeat(32), format!("0x{}", "22".repeat(32))] });
        match validate_params(PolicyKind::Allowlist, &params, NOW).unwrap() {
            PolicyRule::Allowlist { addresses } => assert_eq!(addresses.len(), 2),
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn test_allowlist_empty_rejected() {
        let params = json!({ "addresses": [] });
        assert!(matches!(
            validate_params(PolicyKind::Allowlist, &params, NOW),
            Err(PolicyError::Validation(_))
        ));
    }

    #[test]
    fn test_allowlist_bad_hex_rejected() {
        let params = json!({ "addresses": ["not-hex"] });
        assert!(validate_params(PolicyKind::Allowlist, &params, NOW).is_err());
    }

    #[test]
    fn test_allowlist_missing_field() {
        assert!(validate_params(PolicyKind::Allowlist, &json!({}), NOW).is_err());
        assert!(validate_params(PolicyKind::Allowlist, &json!([1, 2]), NOW).is_err());
    }

    #[test]
    fn test_timelock_millis() {
        let params = json!({ "unlock_time": NOW + 3_600_000 });
        assert_eq!(
            validate_params(PolicyKind::Timelock, &params, NOW).unwrap(),
            PolicyRule::Timelock { unlock_at: NOW + 3_600_000 }
        );
    }

    #[test]
    fn test_timelock_rfc3339() {
        let params = json!({ "unlock_time": "2030-01-01T00:00:00Z" });
        assert_eq!(
            validate_params(PolicyKind::Timelock, &params, NOW).unwrap(),
            PolicyRule::Timelock { unlock_at: 1_893_456_000_000 }
        );
    }

    #[test]
    fn test_timelock_in_past_rejected() {
        let params = json!({ "unlock_time": NOW });
        assert!(validate_params(PolicyKind::Timelock, &params, NOW).is_err());
        let params = json!({ "unlock_time": "2001-01-01T00:00:00Z" });
        assert!(validate_params(PolicyKind::Timelock, &params, NOW).is_err());
    }

    #[test]
    fn test_timelock_wrong_type_rejected() {
        assert!(validate_params(PolicyKind::Timelock, &json!({ "unlock_time": true }), NOW).is_err());
        assert!(validate_params(PolicyKind::Timelock, &json!({ "unlock_time": 1.5 }), NOW).is_err());
    }

    #[test]
    fn test_subscription() {
        let params = json!({ "entitlement_ref": "plan:pro" });
        assert_eq!(
            validate_params(PolicyKind::Subscription, &params, NOW).unwrap(),
            PolicyRule::Subscription { entitlement_ref: "plan:pro".into() }
        );
        assert!(validate_params(PolicyKind::Subscription, &json!({ "entitlement_ref": "  " }), NOW).is_err());
    }

    #[test]
    fn test_policy_id_format() {
        // 2026-10-18T12:00:00Z
        let id = generate_policy_id(PolicyKind::Allowlist, 1_792_324_800_000);
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "allowlist");
        assert_eq!(parts[1], "20261018");
        assert_eq!(parts[2], "120000");
        assert_eq!(parts[3].len(), 8);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn prop_policy_ids_are_distinct(now in 0i64..4_000_000_000_000) {
            let a = generate_policy_id(PolicyKind::Timelock, now);
            let b = generate_policy_id(PolicyKind::Timelock, now);
            // 32 random bits; a collision here is a 1 in 4 billion event.
            prop_assert_ne!(a, b);
        }
    }
}
