//! Client identity parsing.
//!
//! Identities arrive in two shapes: `fp:<challenge-id>:<stable-hash>` for
//! browser fingerprints bound to a challenge, or a bare opaque string such as
//! a network address. Every bucket in the gate is keyed by the stable key
//! derived here, so all components must go through [`resolve`].

use std::fmt;

/// Literal prefix of the fingerprint scheme.
pub const FINGERPRINT_PREFIX: &str = "fp:";

/// Segment separator inside a fingerprint identity.
pub const SEPARATOR: char = ':';

/// Joins an identity and a per-request nonce in a receipt identity.
pub const RECEIPT_NONCE_SEPARATOR: char = '#';

/// Derive the stable bucket key from a raw identity.
///
/// Only `fp:` identities are split, and only at the last separator. A bare
/// identity is returned verbatim even when it contains separators (IPv6
/// addresses, `host:port` pairs).
pub fn resolve(identity: &str) -> &str {
    if !identity.starts_with(FINGERPRINT_PREFIX) {
        return identity;
    }
    match identity.rsplit_once(SEPARATOR) {
        Some((_, stable)) => stable,
        None => identity,
    }
}

/// A receipt identity that is unique to one call: `<identity>#<nonce>`.
pub fn unique_receipt(identity: &str) -> String {
    format!(
        "{identity}{RECEIPT_NONCE_SEPARATOR}{}",
        uuid::Uuid::new_v4().simple()
    )
}

/// A parsed client identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    full: String,
    stable_key_start: usize,
    challenge_id: Option<String>,
}

impl Identity {
    /// Parse a raw identity string.
    pub fn parse(raw: impl Into<String>) -> Self {
        let full = raw.into();
        let stable_key_start = full.len() - resolve(&full).len();

        let challenge_id = full
            .strip_prefix(FINGERPRINT_PREFIX)
            .and_then(|rest| rest.rsplit_once(SEPARATOR))
            .map(|(challenge, _)| challenge)
            .filter(|challenge| !challenge.is_empty())
            .map(str::to_string);

        Self {
            full,
            stable_key_start,
            challenge_id,
        }
    }

    /// Build the fingerprint form `fp:<challenge>:<fingerprint>`.
    pub fn fingerprint(challenge_id: &str, fingerprint: &str) -> Self {
        Self::parse(format!(
            "{FINGERPRINT_PREFIX}{challenge_id}{SEPARATOR}{fingerprint}"
        ))
    }

    /// The complete identity.
    pub fn full(&self) -> &str {
        &self.full
    }

    /// The bucket key used for every aggregation.
    pub fn stable_key(&self) -> &str {
        &self.full[self.stable_key_start..]
    }

    /// Challenge id carried by a fingerprint identity.
    pub fn challenge_id(&self) -> Option<&str> {
        self.challenge_id.as_deref()
    }

    pub fn is_fingerprint(&self) -> bool {
        self.full.starts_with(FINGERPRINT_PREFIX)
    }

    /// Receipt identity recorded in the windows and the ledger for one
    /// request.
    ///
    /// A challenge-bound identity is its own receipt, so a resubmission with
    /// the same challenge collapses onto the first request. Without a
    /// challenge nothing distinguishes a duplicate from a new request, and
    /// every call gets a unique receipt.
    pub fn receipt(&self) -> String {
        match self.challenge_id {
            Some(_) => self.full.clone(),
            None => unique_receipt(&self.full),
        }
    }

    /// True when `receipt` was produced by [`Identity::receipt`] for this
    /// identity.
    pub fn owns_receipt(&self, receipt: &str) -> bool {
        match receipt.strip_prefix(self.full.as_str()) {
            Some("") => self.challenge_id.is_some(),
            Some(nonce) => {
                self.challenge_id.is_none() && nonce.starts_with(RECEIPT_NONCE_SEPARATOR)
            }
            None => false,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_resolves_to_last_segment() {
        assert_eq!(resolve("fp:c1:abc123"), "abc123");
        assert_eq!(resolve("fp:c2:abc123"), "abc123");
    }

    #[test]
    fn test_bare_identity_is_never_split() {
        assert_eq!(resolve("2001:db8::1"), "2001:db8::1");
        assert_eq!(resolve("10.0.0.1:443"), "10.0.0.1:443");
        assert_eq!(resolve("203.0.113.9"), "203.0.113.9");
    }

    #[test]
    fn test_fingerprint_with_extra_segments_uses_last() {
        assert_eq!(resolve("fp:a:b:hash"), "hash");
    }

    #[test]
    fn test_parse_fingerprint() {
        let identity = Identity::parse("fp:chal-1:hash-9");
        assert!(identity.is_fingerprint());
        assert_eq!(identity.stable_key(), "hash-9");
        assert_eq!(identity.challenge_id(), Some("chal-1"));
        assert_eq!(identity.full(), "fp:chal-1:hash-9");
    }

    #[test]
    fn test_parse_bare_address() {
        let identity = Identity::parse("2001:db8::7");
        assert!(!identity.is_fingerprint());
        assert_eq!(identity.stable_key(), "2001:db8::7");
        assert_eq!(identity.challenge_id(), None);
    }

    #[test]
    fn test_parse_fingerprint_without_challenge() {
        let identity = Identity::parse("fp:hash-only");
        assert_eq!(identity.stable_key(), "hash-only");
        assert_eq!(identity.challenge_id(), None);
    }

    #[test]
    fn test_receipts() {
        let bound = Identity::parse("fp:c1:hash");
        assert_eq!(bound.receipt(), "fp:c1:hash");
        assert!(bound.owns_receipt("fp:c1:hash"));
        assert!(!bound.owns_receipt("fp:c2:hash"));

        let bare = Identity::parse("203.0.113.5");
        let first = bare.receipt();
        let second = bare.receipt();
        assert_ne!(first, second);
        assert!(first.starts_with("203.0.113.5#"));
        assert!(bare.owns_receipt(&first));
        assert!(!bare.owns_receipt("203.0.113.5"));
        assert!(!bare.owns_receipt("203.0.113.50#abc"));
        assert!(!Identity::parse("203.0.113.50").owns_receipt(&first));
    }

    #[test]
    fn test_rotating_challenges_keep_stable_key() {
        let first = Identity::fingerprint("c1", "device");
        let second = Identity::fingerprint("c2", "device");
        assert_ne!(first.full(), second.full());
        assert_eq!(first.stable_key(), second.stable_key());
    }
}
