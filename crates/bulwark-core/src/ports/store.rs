//! Atomic store port.
//!
//! Each method is one atomic transaction against the shared store: a
//! server-side script for Redis, a single critical section for the
//! in-process store. Callers never combine two calls into a check-then-act.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// One window of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmitWindow {
    pub key: String,
    pub window_secs: f64,
    pub limit: u64,
}

/// Input of [`AtomicStore::check_and_admit`].
#[derive(Debug, Clone, PartialEq)]
pub struct AdmitRequest {
    pub windows: Vec<AdmitWindow>,
    /// Receipt member; the full identity for per-client checks.
    pub member: String,
    /// When false an existing member is not treated as a duplicate.
    pub dedup: bool,
    pub now: f64,
    pub ttl_margin_secs: f64,
}

/// Output of [`AtomicStore::check_and_admit`].
#[derive(Debug, Clone, PartialEq)]
pub struct AdmitVerdict {
    pub allowed: bool,
    /// The member was already present in every window and got refreshed.
    pub duplicate: bool,
    /// Count in the rejecting window, or in the first window when allowed.
    pub count: u64,
    /// Index of the first window without room.
    pub rejected_window: Option<usize>,
    /// Oldest surviving score in the rejecting window.
    pub oldest_score: Option<f64>,
}

/// Input of [`AtomicStore::register_strike`].
#[derive(Debug, Clone, PartialEq)]
pub struct StrikeRequest {
    pub strikes_key: String,
    pub level_key: String,
    pub ban_key: String,
    pub threshold: u64,
    pub tracking_period: Duration,
    pub base_ban: Duration,
    pub max_ban: Duration,
    pub level_decay: Duration,
}

/// Input of [`AtomicStore::check_and_throttle`].
#[derive(Debug, Clone, PartialEq)]
pub struct CostCheckRequest {
    pub throttle_key: String,
    pub burst_key: String,
    pub day_key: String,
    pub member: String,
    pub estimated_micros: i64,
    pub now: f64,
    pub burst_window_secs: f64,
    pub day_start: f64,
    pub burst_limit_micros: i64,
    pub daily_limit_micros: i64,
    pub throttle: Duration,
    pub burst_ttl: Duration,
    pub day_ttl: Duration,
}

/// Output of [`AtomicStore::check_and_throttle`].
#[derive(Debug, Clone, PartialEq)]
pub enum CostVerdict {
    Allowed {
        burst_total_micros: i64,
        day_total_micros: i64,
    },
    AlreadyThrottled {
        marker: Option<String>,
        remaining: Duration,
    },
    DailyLimit {
        throttle: Duration,
    },
    Burst {
        throttle: Duration,
    },
}

/// Input of [`AtomicStore::record_cost`].
#[derive(Debug, Clone, PartialEq)]
pub struct CostRecordRequest {
    pub burst_key: String,
    pub day_key: String,
    /// Exact member removed before the insert: the estimate being trued up.
    pub replaces: Option<String>,
    pub member: String,
    pub now: f64,
    pub burst_ttl: Duration,
    pub day_ttl: Duration,
}

/// Input of [`AtomicStore::read_ledger`].
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerQuery {
    pub throttle_key: String,
    pub burst_key: String,
    pub day_key: String,
    pub burst_since: f64,
    pub day_start: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerTotals {
    pub burst_micros: i64,
    pub day_micros: i64,
    pub throttle_remaining: Option<Duration>,
}

/// Input of [`AtomicStore::issue_or_reuse`].
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRequest {
    pub marker_key: String,
    pub index_key: String,
    /// Prefix completed by a challenge id to form a record key.
    pub token_prefix: String,
    /// Fresh id used when a new challenge is minted.
    pub candidate_id: String,
    pub owner: String,
    pub now: f64,
    pub ttl_secs: f64,
    pub cooldown_secs: f64,
    /// Age under which the newest active challenge is handed out again.
    pub reuse_window_secs: f64,
    pub grace_secs: f64,
    pub max_active: u64,
}

/// Output of [`AtomicStore::issue_or_reuse`].
#[derive(Debug, Clone, PartialEq)]
pub enum IssueVerdict {
    Issued {
        challenge_id: String,
        expires_in: Duration,
    },
    Reused {
        challenge_id: String,
        expires_in: Duration,
    },
    CoolingDown {
        retry_after: Duration,
    },
}

/// Input of [`AtomicStore::consume_once`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeRequest {
    pub token_key: String,
    pub index_key: String,
    pub challenge_id: String,
    pub owner: String,
    pub now: f64,
    /// When false a valid record is left in place and reported `Valid`.
    pub delete: bool,
}

/// Output of [`AtomicStore::consume_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeVerdict {
    Consumed,
    /// Owner and expiry check passed without deleting.
    Valid,
    Missing,
    Expired,
    Mismatch,
}

/// The shared atomic store - the single reader and writer of all rate,
/// cost, challenge and ban state.
#[async_trait]
pub trait AtomicStore: Send + Sync {
    /// Evict, deduplicate and insert across one or more sliding windows.
    /// The member is inserted into every window or into none.
    async fn check_and_admit(&self, request: &AdmitRequest) -> Result<AdmitVerdict, StoreError>;

    /// Remaining ban time for a key, if a ban is active.
    async fn ban_remaining(&self, ban_key: &str) -> Result<Option<Duration>, StoreError>;

    /// Count a rejection; returns the ban imposed when the strike
    /// threshold is reached.
    async fn register_strike(&self, request: &StrikeRequest)
    -> Result<Option<Duration>, StoreError>;

    /// Throttle-marker check, window eviction, summation, threshold check
    /// and receipt insertion in one step.
    async fn check_and_throttle(&self, request: &CostCheckRequest)
    -> Result<CostVerdict, StoreError>;

    /// Insert a cost receipt without threshold checks, optionally removing
    /// the one member it replaces.
    async fn record_cost(&self, request: &CostRecordRequest) -> Result<(), StoreError>;

    /// Current totals, without side effects.
    async fn read_ledger(&self, query: &LedgerQuery) -> Result<LedgerTotals, StoreError>;

    /// Issue a fresh challenge, reuse a recent one, or report the cooldown.
    async fn issue_or_reuse(&self, request: &IssueRequest) -> Result<IssueVerdict, StoreError>;

    /// Check owner and expiry, then delete: at most one caller succeeds.
    /// Expired records are deleted even when `delete` is false.
    async fn consume_once(&self, request: &ConsumeRequest) -> Result<ConsumeVerdict, StoreError>;
}
