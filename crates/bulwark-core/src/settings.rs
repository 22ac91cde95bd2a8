//! Tunable thresholds, read fresh for every check.
//!
//! Every field has a default so partial documents from the admin settings
//! store deserialize cleanly. The defaults are starting points, not
//! invariants.

use serde::{Deserialize, Serialize};

/// What a component does when the backing store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the request through and report the anomaly.
    FailOpen,
    /// Reject the request.
    FailClosed,
}

impl FailurePolicy {
    pub fn is_open(&self) -> bool {
        matches!(self, FailurePolicy::FailOpen)
    }
}

/// Root settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub admission: AdmissionSettings,
    pub cost: CostSettings,
    pub challenge: ChallengeSettings,
}

/// One sliding window and its request ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub window_secs: u64,
    pub limit: u64,
}

impl WindowLimit {
    pub const fn new(window_secs: u64, limit: u64) -> Self {
        Self { window_secs, limit }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Per-stable-key windows; a request must fit in all of them.
    pub windows: Vec<WindowLimit>,
    /// System-wide windows, counted without deduplication.
    pub global_windows: Vec<WindowLimit>,
    /// Extra lifetime on window sets beyond the window itself.
    pub key_ttl_margin_secs: u64,
    pub penalty: PenaltySettings,
    pub failure_policy: FailurePolicy,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            windows: vec![WindowLimit::new(60, 10), WindowLimit::new(3600, 100)],
            global_windows: vec![WindowLimit::new(60, 600)],
            key_ttl_margin_secs: 60,
            penalty: PenaltySettings::default(),
            failure_policy: FailurePolicy::FailOpen,
        }
    }
}

/// Progressive ban escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltySettings {
    pub enabled: bool,
    /// Rejections inside the tracking period that trigger a ban.
    pub strikes: u64,
    pub tracking_period_secs: u64,
    pub base_ban_secs: u64,
    pub max_ban_secs: u64,
    /// How long an escalation level is remembered after the last ban.
    pub level_decay_secs: u64,
}

impl Default for PenaltySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strikes: 5,
            tracking_period_secs: 300,
            base_ban_secs: 60,
            max_ban_secs: 3600,
            level_decay_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    pub burst_window_secs: u64,
    pub burst_threshold_usd: f64,
    pub daily_limit_usd: f64,
    /// Burst throttle duration; the daily throttle lasts twice as long.
    pub throttle_secs: u64,
    pub day_key_ttl_secs: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            burst_window_secs: 600,
            burst_threshold_usd: 0.02,
            daily_limit_usd: 0.25,
            throttle_secs: 300,
            day_key_ttl_secs: 2 * 86_400,
            failure_policy: FailurePolicy::FailOpen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    pub ttl_secs: u64,
    /// Minimum spacing between fresh issuances for one stable key.
    pub cooldown_secs: f64,
    /// Slack added to the cooldown when deciding whether to reuse.
    pub reuse_epsilon_secs: f64,
    pub max_active_per_key: u64,
    /// Records outlive their expiry by this much so late use reports
    /// `expired` rather than `missing`.
    pub expired_grace_secs: u64,
    /// Demand a challenge from bare (non-fingerprint) identities too.
    pub require_for_bare_identity: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            cooldown_secs: 3.0,
            reuse_epsilon_secs: 0.5,
            max_active_per_key: 16,
            expired_grace_secs: 60,
            require_for_bare_identity: false,
            failure_policy: FailurePolicy::FailClosed,
        }
    }
}
