//! Test doubles shared by the service tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::StoreError;
use crate::ports::{
    AdmitRequest, AdmitVerdict, AnomalySink, AtomicStore, Component, ConsumeRequest,
    ConsumeVerdict, CostCheckRequest, CostRecordRequest, CostVerdict, IssueRequest, IssueVerdict,
    LedgerQuery, LedgerTotals, StrikeRequest,
};
use crate::settings::FailurePolicy;

pub(crate) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
}

fn down() -> StoreError {
    StoreError::Connection("connection refused".to_string())
}

/// A store whose every call fails.
pub(crate) struct UnavailableStore;

#[async_trait]
impl AtomicStore for UnavailableStore {
    async fn check_and_admit(&self, _request: &AdmitRequest) -> Result<AdmitVerdict, StoreError> {
        Err(down())
    }

    async fn ban_remaining(&self, _ban_key: &str) -> Result<Option<Duration>, StoreError> {
        Err(down())
    }

    async fn register_strike(
        &self,
        _request: &StrikeRequest,
    ) -> Result<Option<Duration>, StoreError> {
        Err(down())
    }

    async fn check_and_throttle(
        &self,
        _request: &CostCheckRequest,
    ) -> Result<CostVerdict, StoreError> {
        Err(down())
    }

    async fn record_cost(&self, _request: &CostRecordRequest) -> Result<(), StoreError> {
        Err(down())
    }

    async fn read_ledger(&self, _query: &LedgerQuery) -> Result<LedgerTotals, StoreError> {
        Err(down())
    }

    async fn issue_or_reuse(&self, _request: &IssueRequest) -> Result<IssueVerdict, StoreError> {
        Err(down())
    }

    async fn consume_once(&self, _request: &ConsumeRequest) -> Result<ConsumeVerdict, StoreError> {
        Err(down())
    }
}

/// Counts reported anomalies.
#[derive(Default)]
pub(crate) struct CountingSink {
    pub(crate) open: AtomicUsize,
    pub(crate) closed: AtomicUsize,
}

impl AnomalySink for CountingSink {
    fn store_unavailable(&self, _component: Component, policy: FailurePolicy, _error: &StoreError) {
        let counter = if policy.is_open() {
            &self.open
        } else {
            &self.closed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
