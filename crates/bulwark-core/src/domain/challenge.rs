use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A challenge handed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeGrant {
    pub challenge_id: String,
    pub expires_in: Duration,
    /// True when an active challenge was handed out again inside the
    /// issuance cooldown instead of minting a new one.
    pub reused: bool,
}

/// Result of an issuance request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Issued(ChallengeGrant),
    Rejected { retry_after: Duration },
}

/// Why a challenge failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Never issued, or already consumed.
    Missing,
    /// TTL lapsed.
    Expired,
    /// Exists but is owned by another stable key.
    Mismatch,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::Missing => "missing",
            InvalidReason::Expired => "expired",
            InvalidReason::Mismatch => "mismatch",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `validate` and `validate_and_consume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeValidation {
    Consumed,
    /// Would be accepted; still unused.
    Valid,
    Invalid(InvalidReason),
    /// Store unreachable and the validation policy is fail-open.
    Unchecked,
}
