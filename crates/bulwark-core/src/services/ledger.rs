//! Spend ledger: burst and daily ceilings per stable key.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{
    CostCheck, LedgerSnapshot, ThrottleReason, cost_member, micros_to_usd, usd_to_micros,
};
use crate::error::GuardError;
use crate::keys;
use crate::ports::{
    AnomalySink, AtomicStore, Component, CostCheckRequest, CostRecordRequest, CostVerdict,
    LedgerQuery,
};
use crate::settings::{CostSettings, FailurePolicy};

/// Lifetime of the burst set beyond its window.
const BURST_TTL_MARGIN_SECS: u64 = 60;

/// Atomically enforces short-burst and daily spend ceilings.
pub struct CostLedger {
    store: Arc<dyn AtomicStore>,
    anomalies: Arc<dyn AnomalySink>,
}

impl CostLedger {
    pub fn new(store: Arc<dyn AtomicStore>, anomalies: Arc<dyn AnomalySink>) -> Self {
        Self { store, anomalies }
    }

    /// Pre-call check with the estimated cost.
    ///
    /// Buckets are keyed by `stable_key` so spend accumulates across
    /// challenge rotations; members embed the request's receipt identity
    /// (see [`Identity::receipt`](crate::Identity::receipt)) so a duplicate
    /// submission is not charged twice. A request is throttled when the
    /// window total plus the estimate would exceed the ceiling. Breaching
    /// the daily ceiling throttles for twice the burst duration.
    pub async fn check_cost_based_throttling(
        &self,
        settings: &CostSettings,
        stable_key: &str,
        receipt: &str,
        estimated_cost: f64,
        now: DateTime<Utc>,
    ) -> Result<CostCheck, GuardError> {
        let estimated_micros = usd_to_micros(estimated_cost);
        let member = cost_member(receipt, estimated_micros);
        let now_secs = keys::epoch_secs(now);
        let throttle = Duration::from_secs(settings.throttle_secs);

        let request = CostCheckRequest {
            throttle_key: keys::cost_throttle(stable_key),
            burst_key: keys::cost_burst(stable_key),
            day_key: keys::cost_day(stable_key, now.date_naive()),
            member: member.clone(),
            estimated_micros,
            now: now_secs,
            burst_window_secs: settings.burst_window_secs as f64,
            day_start: keys::day_start_secs(now),
            burst_limit_micros: usd_to_micros(settings.burst_threshold_usd),
            daily_limit_micros: usd_to_micros(settings.daily_limit_usd),
            throttle,
            burst_ttl: burst_ttl(settings),
            day_ttl: Duration::from_secs(settings.day_key_ttl_secs),
        };

        let verdict = match self.store.check_and_throttle(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                let policy = settings.failure_policy;
                self.anomalies
                    .store_unavailable(Component::CostLedger, policy, &e);
                return match policy {
                    FailurePolicy::FailOpen => Ok(CostCheck::Unchecked),
                    FailurePolicy::FailClosed => Err(e.into()),
                };
            }
        };

        let check = match verdict {
            CostVerdict::Allowed {
                burst_total_micros,
                day_total_micros,
            } => CostCheck::Allowed {
                burst_total_usd: micros_to_usd(burst_total_micros),
                day_total_usd: micros_to_usd(day_total_micros),
                receipt: member,
            },
            CostVerdict::AlreadyThrottled { marker, remaining } => CostCheck::Throttled {
                reason: ThrottleReason::AlreadyThrottled {
                    daily: marker.as_deref() == Some(ThrottleReason::DailyLimit.marker()),
                },
                retry_after: remaining,
            },
            CostVerdict::DailyLimit { throttle } => {
                tracing::warn!(
                    stable_key = %stable_key,
                    throttle_secs = throttle.as_secs(),
                    "Daily spend ceiling reached"
                );
                CostCheck::Throttled {
                    reason: ThrottleReason::DailyLimit,
                    retry_after: throttle,
                }
            }
            CostVerdict::Burst { throttle } => {
                tracing::info!(
                    stable_key = %stable_key,
                    throttle_secs = throttle.as_secs(),
                    "Burst spend ceiling reached"
                );
                CostCheck::Throttled {
                    reason: ThrottleReason::Burst,
                    retry_after: throttle,
                }
            }
        };

        Ok(check)
    }

    /// Post-call true-up with the real price. Bookkeeping only: thresholds
    /// are not re-checked and failures are reported, never returned.
    ///
    /// With `replaces` set to the member returned by the pre-call check, that
    /// one estimate is swapped for the actual amount; other receipts are
    /// never touched. Without it the actual amount is inserted alongside.
    pub async fn record_actual_cost(
        &self,
        settings: &CostSettings,
        stable_key: &str,
        receipt: &str,
        actual_cost: f64,
        replaces: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let request = CostRecordRequest {
            burst_key: keys::cost_burst(stable_key),
            day_key: keys::cost_day(stable_key, now.date_naive()),
            replaces: replaces.map(str::to_string),
            member: cost_member(receipt, usd_to_micros(actual_cost)),
            now: keys::epoch_secs(now),
            burst_ttl: burst_ttl(settings),
            day_ttl: Duration::from_secs(settings.day_key_ttl_secs),
        };

        if let Err(e) = self.store.record_cost(&request).await {
            self.anomalies
                .store_unavailable(Component::CostLedger, FailurePolicy::FailOpen, &e);
        }
    }

    /// Current totals for a stable key.
    pub async fn snapshot(
        &self,
        settings: &CostSettings,
        stable_key: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerSnapshot, GuardError> {
        let query = LedgerQuery {
            throttle_key: keys::cost_throttle(stable_key),
            burst_key: keys::cost_burst(stable_key),
            day_key: keys::cost_day(stable_key, now.date_naive()),
            burst_since: keys::epoch_secs(now) - settings.burst_window_secs as f64,
            day_start: keys::day_start_secs(now),
        };

        let totals = self.store.read_ledger(&query).await?;
        Ok(LedgerSnapshot {
            burst_total_usd: micros_to_usd(totals.burst_micros),
            day_total_usd: micros_to_usd(totals.day_micros),
            throttled_for_secs: totals.throttle_remaining.map(|d| d.as_secs().max(1)),
        })
    }
}

fn burst_ttl(settings: &CostSettings) -> Duration {
    Duration::from_secs(settings.burst_window_secs + BURST_TTL_MARGIN_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{CountingSink, UnavailableStore, fixed_now};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_outage_allows_and_reports() {
        let sink = Arc::new(CountingSink::default());
        let ledger = CostLedger::new(Arc::new(UnavailableStore), sink.clone());

        let check = ledger
            .check_cost_based_throttling(
                &CostSettings::default(),
                "hash",
                "fp:c1:hash",
                0.01,
                fixed_now(),
            )
            .await
            .unwrap();

        assert_eq!(check, CostCheck::Unchecked);
        assert_eq!(sink.open.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_record_failure_is_swallowed() {
        let sink = Arc::new(CountingSink::default());
        let ledger = CostLedger::new(Arc::new(UnavailableStore), sink.clone());

        ledger
            .record_actual_cost(
                &CostSettings::default(),
                "hash",
                "fp:c1:hash",
                0.02,
                None,
                fixed_now(),
            )
            .await;

        assert_eq!(sink.open.load(Ordering::Relaxed), 1);
    }
}
