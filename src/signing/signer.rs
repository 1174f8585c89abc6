use crate::keys::SigningKey;
use crate::records::Rrsig;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Inception is backdated to absorb clock skew between the signer and
/// validating resolvers.
const INCEPTION_SKEW: i64 = 3600;

/// Signature validity windows for one signing run.
///
/// Expiration carries a random jitter so that all signatures of a zone do
/// not expire in the same instant; a signature within `refresh` of expiry
/// counts as stale during diff.
#[derive(Debug, Clone, Copy)]
pub struct SigTiming {
    pub validity: Duration,
    pub jitter: Duration,
    pub refresh: Duration,
}

impl SigTiming {
    pub fn inception(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::seconds(INCEPTION_SKEW)
    }

    pub fn expiration(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let jitter_secs = self.jitter.num_seconds().max(0);
        let jitter = if jitter_secs == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_secs)
        };
        now + self.validity + Duration::seconds(jitter)
    }
}

impl Default for SigTiming {
    fn default() -> Self {
        Self {
            validity: Duration::days(30),
            jitter: Duration::hours(12),
            refresh: Duration::days(3),
        }
    }
}

/// Wrap raw HSM signature bytes into a signature record for one key
pub fn build_rrsig(
    key: &SigningKey,
    signature: Vec<u8>,
    now: DateTime<Utc>,
    timing: &SigTiming,
) -> Rrsig {
    Rrsig {
        key_locator: key.locator,
        key_flags: key.flags,
        role: key.role,
        inception: timing.inception(now),
        expiration: timing.expiration(now),
        signature,
    }
}

/// An existing signature can be reused when the signed content did not
/// change, it was produced by this key, and it is not yet due for refresh.
/// Re-signing is an HSM round trip; skipping it is the point of the
/// incremental pipeline.
pub fn reusable_rrsig(
    existing: &[Rrsig],
    key: &SigningKey,
    content_changed: bool,
    now: DateTime<Utc>,
    timing: &SigTiming,
) -> Option<Rrsig> {
    if content_changed {
        return None;
    }
    existing
        .iter()
        .find(|sig| sig.key_locator == key.locator && !sig.needs_refresh(now, timing.refresh))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyRole;
    use uuid::Uuid;

    fn zsk() -> SigningKey {
        SigningKey::new(Uuid::new_v4(), KeyRole::Zsk, "default")
    }

    #[test]
    fn test_expiration_window() {
        let timing = SigTiming {
            validity: Duration::days(30),
            jitter: Duration::hours(12),
            refresh: Duration::days(3),
        };
        let now = Utc::now();
        let expiration = timing.expiration(now);
        assert!(expiration >= now + Duration::days(30));
        assert!(expiration <= now + Duration::days(30) + Duration::hours(12));
        assert!(timing.inception(now) < now);
    }

    #[test]
    fn test_reuse_requires_unchanged_content() {
        let timing = SigTiming::default();
        let now = Utc::now();
        let key = zsk();
        let sig = build_rrsig(&key, vec![1, 2, 3], now, &timing);

        assert!(reusable_rrsig(&[sig.clone()], &key, false, now, &timing).is_some());
        assert!(reusable_rrsig(&[sig.clone()], &key, true, now, &timing).is_none());
        assert!(reusable_rrsig(&[sig], &zsk(), false, now, &timing).is_none());
    }

    #[test]
    fn test_reuse_refuses_refresh_due() {
        let timing = SigTiming::default();
        let now = Utc::now();
        let key = zsk();
        let mut sig = build_rrsig(&key, vec![1], now, &timing);
        sig.expiration = now + Duration::days(1); // inside the refresh window

        assert!(reusable_rrsig(&[sig], &key, false, now, &timing).is_none());
    }
}
