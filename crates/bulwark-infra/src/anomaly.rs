//! Anomaly reporting with a metric surface.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running totals of store failures, exposed on the health endpoint.
#[derive(Debug, Default)]
pub struct AnomalyCounters {
    fail_open: AtomicU64,
    fail_closed: AtomicU64,
    suppressed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnomalyStats {
    pub fail_open_total: u64,
    pub fail_closed_total: u64,
    pub suppressed_total: u64,
}

impl AnomalyCounters {
    pub fn record(&self, fail_open: bool) {
        let counter = if fail_open {
            &self.fail_open
        } else {
            &self.fail_closed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AnomalyStats {
        AnomalyStats {
            fail_open_total: self.fail_open.load(Ordering::Relaxed),
            fail_closed_total: self.fail_closed.load(Ordering::Relaxed),
            suppressed_total: self.suppressed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(feature = "rate-limit")]
mod throttled {
    use std::num::NonZeroU32;
    use std::sync::Arc;

    use governor::clock::DefaultClock;
    use governor::state::{InMemoryState, NotKeyed};
    use governor::{Quota, RateLimiter};

    use bulwark_core::ports::{AnomalySink, Component};
    use bulwark_core::{FailurePolicy, StoreError};

    use super::AnomalyCounters;

    type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

    /// Counts every store failure but logs at most `per_minute` of them, so
    /// an outage on a busy gate cannot flood the logs.
    pub struct ThrottledAnomalySink {
        limiter: DirectRateLimiter,
        counters: Arc<AnomalyCounters>,
    }

    impl ThrottledAnomalySink {
        pub fn new(per_minute: u32) -> Self {
            let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
            Self {
                limiter: DirectRateLimiter::direct(quota),
                counters: Arc::new(AnomalyCounters::default()),
            }
        }

        pub fn counters(&self) -> Arc<AnomalyCounters> {
            self.counters.clone()
        }
    }

    impl Default for ThrottledAnomalySink {
        fn default() -> Self {
            Self::new(60)
        }
    }

    impl AnomalySink for ThrottledAnomalySink {
        fn store_unavailable(
            &self,
            component: Component,
            policy: FailurePolicy,
            error: &StoreError,
        ) {
            self.counters.record(policy.is_open());

            if self.limiter.check().is_err() {
                self.counters.record_suppressed();
                return;
            }

            let stats = self.counters.snapshot();
            tracing::error!(
                component = %component,
                fail_open = policy.is_open(),
                fail_open_total = stats.fail_open_total,
                suppressed_total = stats.suppressed_total,
                error = %error,
                "Guard store unavailable"
            );
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_every_failure_is_counted_but_logs_are_throttled() {
            let sink = ThrottledAnomalySink::new(1);
            let error = StoreError::Connection("refused".to_string());

            for _ in 0..3 {
                sink.store_unavailable(Component::Admission, FailurePolicy::FailOpen, &error);
            }
            sink.store_unavailable(Component::Challenge, FailurePolicy::FailClosed, &error);

            let stats = sink.counters().snapshot();
            assert_eq!(stats.fail_open_total, 3);
            assert_eq!(stats.fail_closed_total, 1);
            assert_eq!(stats.suppressed_total, 3);
        }
    }
}

#[cfg(feature = "rate-limit")]
pub use throttled::ThrottledAnomalySink;
