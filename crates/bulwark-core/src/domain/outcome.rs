use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Machine-readable rejection code returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    RateLimited,
    CostThrottledBurst,
    CostThrottledDaily,
    ChallengeInvalid,
    Banned,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::RateLimited => "rate_limited",
            ReasonCode::CostThrottledBurst => "cost_throttled_burst",
            ReasonCode::CostThrottledDaily => "cost_throttled_daily",
            ReasonCode::ChallengeInvalid => "challenge_invalid",
            ReasonCode::Banned => "banned",
        }
    }

    /// Position of this code in the error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            ReasonCode::RateLimited | ReasonCode::CostThrottledBurst => ErrorClass::SoftRetryable,
            ReasonCode::CostThrottledDaily => ErrorClass::HardRetryableLater,
            ReasonCode::ChallengeInvalid | ReasonCode::Banned => ErrorClass::FatalToRequest,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy for rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry after a short wait.
    SoftRetryable,
    /// Same family as soft, with a long cooldown.
    HardRetryableLater,
    /// No retry guidance; the caller restarts the challenge flow.
    FatalToRequest,
}

/// A typed rejection handed back to the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: ReasonCode,
    pub retry_after: Option<Duration>,
    pub detail: String,
}

impl Rejection {
    pub fn new(reason: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            reason,
            retry_after: None,
            detail: detail.into(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Whole seconds to wait, rounded up and never zero.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.retry_after.map(|d| {
            let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
            secs.max(1)
        })
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)?;
        if let Some(secs) = self.retry_after_seconds() {
            write!(f, " (retry after {secs}s)")?;
        }
        Ok(())
    }
}

/// Result of a single sliding-window check.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowDecision {
    pub allowed: bool,
    pub count: u64,
    pub retry_after: Duration,
}

/// Result of the per-identity admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmitCheck {
    Allowed { count: u64, duplicate: bool },
    Limited {
        count: u64,
        window_secs: u64,
        retry_after: Duration,
    },
    Banned { retry_after: Duration },
    /// Store unreachable, admitted under the fail-open policy.
    Unchecked,
}

impl AdmitCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmitCheck::Allowed { .. } | AdmitCheck::Unchecked)
    }

    pub fn into_rejection(self) -> Option<Rejection> {
        match self {
            AdmitCheck::Limited {
                count,
                window_secs,
                retry_after,
            } => Some(
                Rejection::new(
                    ReasonCode::RateLimited,
                    format!("{count} requests in the last {window_secs}s"),
                )
                .with_retry_after(retry_after),
            ),
            AdmitCheck::Banned { .. } => Some(Rejection::new(
                ReasonCode::Banned,
                "temporarily banned after repeated rejections",
            )),
            AdmitCheck::Allowed { .. } | AdmitCheck::Unchecked => None,
        }
    }
}

/// Why the cost ledger throttled a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleReason {
    /// A throttle marker was already set; carries the reason it was set for.
    AlreadyThrottled { daily: bool },
    Burst,
    DailyLimit,
}

impl ThrottleReason {
    /// Value stored in the throttle marker.
    pub fn marker(&self) -> &'static str {
        match self {
            ThrottleReason::DailyLimit | ThrottleReason::AlreadyThrottled { daily: true } => {
                "daily_limit"
            }
            ThrottleReason::Burst | ThrottleReason::AlreadyThrottled { daily: false } => "burst",
        }
    }

    pub fn reason_code(&self) -> ReasonCode {
        match self {
            ThrottleReason::DailyLimit | ThrottleReason::AlreadyThrottled { daily: true } => {
                ReasonCode::CostThrottledDaily
            }
            ThrottleReason::Burst | ThrottleReason::AlreadyThrottled { daily: false } => {
                ReasonCode::CostThrottledBurst
            }
        }
    }
}

/// Result of `check_cost_based_throttling`.
#[derive(Debug, Clone, PartialEq)]
pub enum CostCheck {
    Allowed {
        burst_total_usd: f64,
        day_total_usd: f64,
        /// Ledger member holding this request's estimate.
        receipt: String,
    },
    Throttled {
        reason: ThrottleReason,
        retry_after: Duration,
    },
    /// Store unreachable, allowed under the fail-open policy.
    Unchecked,
}

impl CostCheck {
    pub fn into_rejection(self) -> Option<Rejection> {
        match self {
            CostCheck::Throttled {
                reason,
                retry_after,
            } => {
                let detail = match reason {
                    ThrottleReason::AlreadyThrottled { .. } => "spend throttle still active",
                    ThrottleReason::Burst => "short-term spend ceiling reached",
                    ThrottleReason::DailyLimit => "daily spend ceiling reached",
                };
                Some(Rejection::new(reason.reason_code(), detail).with_retry_after(retry_after))
            }
            CostCheck::Allowed { .. } | CostCheck::Unchecked => None,
        }
    }
}

/// Read-only view of a stable key's spend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub burst_total_usd: f64,
    pub day_total_usd: f64,
    pub throttled_for_secs: Option<u64>,
}

/// Proof that a request passed every gate.
#[derive(Debug, Clone, PartialEq)]
pub struct GateTicket {
    pub identity: String,
    pub stable_key: String,
    pub estimated_cost_usd: f64,
    /// Ledger member of the estimate, replaced by the true-up. `None` when
    /// the cost check was skipped.
    pub cost_receipt: Option<String>,
    /// Set when at least one check was skipped under a fail-open policy.
    pub degraded: bool,
}
