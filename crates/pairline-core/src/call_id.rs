//! Call identifier generation
//!
//! Two flavours:
//!
//! - [`asymmetric_call_id`] for the join path, where a single process writes
//!   both records of the pair. It only has to be unique per match instant.
//! - [`symmetric_call_id`] for the status-poll repair path. Both sides already
//!   own a record with its own creation time, so the id is a pure function of
//!   the pair: sorted user ids plus the sum of both creation timestamps. Any
//!   recomputation for the same pair yields the same id, which makes a retried
//!   commit idempotent.

use chrono::{DateTime, Utc};
use rand::Rng;

const CLAIMANT_PREFIX_LEN: usize = 8;

/// `<millis>_<claimant prefix>_<6 hex digits>`
pub fn asymmetric_call_id(claimant: &str, now: DateTime<Utc>) -> String {
    let prefix: String = claimant.chars().take(CLAIMANT_PREFIX_LEN).collect();
    let salt: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{}_{}_{:06x}", now.timestamp_millis(), prefix, salt)
}

/// `<lower id>_<higher id>_<sum of creation millis>`
pub fn symmetric_call_id(
    user_a: &str,
    created_a: DateTime<Utc>,
    user_b: &str,
    created_b: DateTime<Utc>,
) -> String {
    let (first, second) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    let stamp = created_a
        .timestamp_millis()
        .saturating_add(created_b.timestamp_millis());
    format!("{}_{}_{}", first, second, stamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_symmetric_id_ignores_argument_order() {
        let a = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let b = Utc.timestamp_millis_opt(1_700_000_000_250).unwrap();

        let ab = symmetric_call_id("alice", a, "bob", b);
        let ba = symmetric_call_id("bob", b, "alice", a);
        assert_eq!(ab, ba);
        assert_eq!(ab, "alice_bob_3400000000250");
    }

    #[test]
    fn test_symmetric_id_depends_on_timestamps() {
        let a = Utc.timestamp_millis_opt(1_000).unwrap();
        let b = Utc.timestamp_millis_opt(2_000).unwrap();
        let c = Utc.timestamp_millis_opt(2_001).unwrap();
        assert_ne!(
            symmetric_call_id("alice", a, "bob", b),
            symmetric_call_id("alice", a, "bob", c)
        );
    }

    #[test]
    fn test_asymmetric_id_shape() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let id = asymmetric_call_id("0123456789abcdef", now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "1700000000123");
        assert_eq!(parts[1], "01234567");
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn test_asymmetric_id_handles_short_and_multibyte_ids() {
        let now = Utc::now();
        assert!(asymmetric_call_id("bo", now).contains("_bo_"));
        assert!(asymmetric_call_id("ünïcødé-user", now).contains("_ünïcødé-_"));
    }

    #[test]
    fn test_asymmetric_ids_differ_within_same_millisecond() {
        let now = Utc::now();
        let ids: std::collections::HashSet<String> =
            (0..64).map(|_| asymmetric_call_id("same-user", now)).collect();
        assert!(ids.len() > 1);
    }
}
