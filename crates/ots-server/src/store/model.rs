use std::time::{Duration, Instant};

/// Longest lifetime kept as a deadline. Anything longer is stored without
/// expiry, identically in every backend.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The lifetime a backend should enforce for `expire_in`, or `None` when
/// the secret must never expire (zero or beyond [`MAX_TTL`]).
pub fn effective_ttl(expire_in: Duration) -> Option<Duration> {
    if expire_in.is_zero() || expire_in > MAX_TTL {
        None
    } else {
        Some(expire_in)
    }
}

/// A secret held by the in-memory backend.
/// `ciphertext` is whatever the client submitted; it is never inspected here.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub ciphertext: String,
    /// Instant after which the record counts as deleted. `None` never expires.
    pub expires_at: Option<Instant>,
}

impl SecretRecord {
    /// Build a record expiring `expire_in` from `now`. See [`effective_ttl`].
    pub fn new(ciphertext: String, expire_in: Duration, now: Instant) -> Self {
        let expires_at = effective_ttl(expire_in).and_then(|ttl| now.checked_add(ttl));
        Self {
            ciphertext,
            expires_at,
        }
    }

    /// Returns true once the expiry instant has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(exp) if now >= exp)
    }
}
