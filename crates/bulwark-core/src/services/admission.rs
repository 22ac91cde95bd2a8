//! Sliding-window admission with progressive bans.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{AdmitCheck, WindowDecision};
use crate::error::{GuardError, StoreError};
use crate::identity::{Identity, unique_receipt};
use crate::keys;
use crate::ports::{
    AdmitRequest, AdmitVerdict, AdmitWindow, AnomalySink, AtomicStore, Component, StrikeRequest,
};
use crate::services::secs;
use crate::settings::{AdmissionSettings, FailurePolicy, PenaltySettings, WindowLimit};

/// Scope of the system-wide windows.
const GLOBAL_SCOPE: &str = "all";

/// Enforces per-identity and global request ceilings.
pub struct AdmissionController {
    store: Arc<dyn AtomicStore>,
    anomalies: Arc<dyn AnomalySink>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn AtomicStore>, anomalies: Arc<dyn AnomalySink>) -> Self {
        Self { store, anomalies }
    }

    /// Single-window primitive: evict, refresh a duplicate member, or insert
    /// while under `limit`.
    pub async fn check_and_admit(
        &self,
        stable_key: &str,
        window_secs: u64,
        limit: u64,
        dedup_member: &str,
        now: DateTime<Utc>,
    ) -> Result<WindowDecision, StoreError> {
        let now_secs = keys::epoch_secs(now);
        let request = AdmitRequest {
            windows: vec![AdmitWindow {
                key: keys::admission_window(stable_key, window_secs),
                window_secs: window_secs as f64,
                limit,
            }],
            member: dedup_member.to_string(),
            dedup: true,
            now: now_secs,
            ttl_margin_secs: 60.0,
        };

        let verdict = self.store.check_and_admit(&request).await?;
        let retry_after = if verdict.allowed {
            Duration::ZERO
        } else {
            retry_after(verdict.oldest_score, window_secs as f64, now_secs)
        };

        Ok(WindowDecision {
            allowed: verdict.allowed,
            count: verdict.count,
            retry_after,
        })
    }

    /// Full per-identity check: ban lookup, then every configured window in
    /// one transaction. Buckets are keyed by the stable key. The member is
    /// the identity's receipt: resubmissions with the same challenge
    /// collapse, requests without one always count.
    pub async fn admit(
        &self,
        settings: &AdmissionSettings,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<AdmitCheck, GuardError> {
        let stable_key = identity.stable_key();
        let policy = settings.failure_policy;

        if settings.penalty.enabled {
            match self.store.ban_remaining(&keys::ban(stable_key)).await {
                Ok(Some(remaining)) => {
                    tracing::info!(stable_key = %stable_key, "Request from banned key");
                    return Ok(AdmitCheck::Banned {
                        retry_after: remaining,
                    });
                }
                Ok(None) => {}
                Err(e) => return self.degrade(Component::Admission, policy, e),
            }
        }

        let windows = window_set(&settings.windows, |w| {
            keys::admission_window(stable_key, w.window_secs)
        });
        if windows.is_empty() {
            return Ok(AdmitCheck::Allowed {
                count: 0,
                duplicate: false,
            });
        }

        let now_secs = keys::epoch_secs(now);
        let request = AdmitRequest {
            windows,
            member: identity.receipt(),
            dedup: true,
            now: now_secs,
            ttl_margin_secs: settings.key_ttl_margin_secs as f64,
        };

        let verdict = match self.store.check_and_admit(&request).await {
            Ok(verdict) => verdict,
            Err(e) => return self.degrade(Component::Admission, policy, e),
        };

        let check = to_check(&request, verdict, now_secs);
        if let AdmitCheck::Limited {
            count,
            window_secs,
            retry_after,
        } = check
        {
            tracing::info!(
                stable_key = %stable_key,
                count,
                window_secs,
                retry_after_ms = retry_after.as_millis() as u64,
                "Request rate limited"
            );
            let retry_after = match self.strike(&settings.penalty, stable_key).await {
                Some(ban) => retry_after.max(ban),
                None => retry_after,
            };
            return Ok(AdmitCheck::Limited {
                count,
                window_secs,
                retry_after,
            });
        }

        Ok(check)
    }

    /// System-wide check. Every request counts, duplicate or not, so each
    /// call inserts a unique member.
    pub async fn admit_global(
        &self,
        settings: &AdmissionSettings,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<AdmitCheck, GuardError> {
        let windows = window_set(&settings.global_windows, |w| {
            keys::global_window(GLOBAL_SCOPE, w.window_secs)
        });
        if windows.is_empty() {
            return Ok(AdmitCheck::Allowed {
                count: 0,
                duplicate: false,
            });
        }

        let now_secs = keys::epoch_secs(now);
        let request = AdmitRequest {
            windows,
            member: unique_receipt(identity),
            dedup: false,
            now: now_secs,
            ttl_margin_secs: settings.key_ttl_margin_secs as f64,
        };

        match self.store.check_and_admit(&request).await {
            Ok(verdict) => {
                let check = to_check(&request, verdict, now_secs);
                if !check.is_allowed() {
                    tracing::warn!("Global admission ceiling reached");
                }
                Ok(check)
            }
            Err(e) => self.degrade(Component::GlobalAdmission, settings.failure_policy, e),
        }
    }

    /// Record a rejection against the key; returns a freshly imposed ban.
    async fn strike(&self, penalty: &PenaltySettings, stable_key: &str) -> Option<Duration> {
        if !penalty.enabled || penalty.strikes == 0 {
            return None;
        }

        let request = StrikeRequest {
            strikes_key: keys::strikes(stable_key),
            level_key: keys::ban_level(stable_key),
            ban_key: keys::ban(stable_key),
            threshold: penalty.strikes,
            tracking_period: Duration::from_secs(penalty.tracking_period_secs),
            base_ban: Duration::from_secs(penalty.base_ban_secs),
            max_ban: Duration::from_secs(penalty.max_ban_secs.max(penalty.base_ban_secs)),
            level_decay: Duration::from_secs(penalty.level_decay_secs),
        };

        match self.store.register_strike(&request).await {
            Ok(Some(ban)) => {
                tracing::warn!(
                    stable_key = %stable_key,
                    ban_secs = ban.as_secs(),
                    "Repeated rejections, ban imposed"
                );
                Some(ban)
            }
            Ok(None) => None,
            Err(e) => {
                self.anomalies
                    .store_unavailable(Component::Admission, FailurePolicy::FailOpen, &e);
                None
            }
        }
    }

    fn degrade(
        &self,
        component: Component,
        policy: FailurePolicy,
        error: StoreError,
    ) -> Result<AdmitCheck, GuardError> {
        self.anomalies.store_unavailable(component, policy, &error);
        match policy {
            FailurePolicy::FailOpen => Ok(AdmitCheck::Unchecked),
            FailurePolicy::FailClosed => Err(error.into()),
        }
    }
}

fn window_set(limits: &[WindowLimit], key: impl Fn(&WindowLimit) -> String) -> Vec<AdmitWindow> {
    limits
        .iter()
        .filter(|w| w.window_secs > 0)
        .map(|w| AdmitWindow {
            key: key(w),
            window_secs: w.window_secs as f64,
            limit: w.limit,
        })
        .collect()
}

fn to_check(request: &AdmitRequest, verdict: AdmitVerdict, now: f64) -> AdmitCheck {
    if verdict.allowed {
        return AdmitCheck::Allowed {
            count: verdict.count,
            duplicate: verdict.duplicate,
        };
    }

    let window = verdict
        .rejected_window
        .and_then(|i| request.windows.get(i))
        .or_else(|| request.windows.first());
    let window_secs = window.map(|w| w.window_secs).unwrap_or_default();

    AdmitCheck::Limited {
        count: verdict.count,
        window_secs: window_secs as u64,
        retry_after: retry_after(verdict.oldest_score, window_secs, now),
    }
}

/// Time until the oldest receipt leaves the window.
fn retry_after(oldest_score: Option<f64>, window_secs: f64, now: f64) -> Duration {
    let wait = match oldest_score {
        Some(oldest) => oldest + window_secs - now,
        None => window_secs,
    };
    secs(wait).max(Duration::from_millis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{CountingSink, UnavailableStore, fixed_now};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_retry_after_from_oldest_receipt() {
        let wait = retry_after(Some(100.0), 60.0, 130.0);
        assert_eq!(wait, Duration::from_secs(30));
    }

    #[test]
    fn test_retry_after_is_always_positive() {
        assert!(retry_after(Some(0.0), 60.0, 500.0) > Duration::ZERO);
        assert_eq!(retry_after(None, 60.0, 0.0), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_store_outage_fails_open_and_reports() {
        let sink = Arc::new(CountingSink::default());
        let controller = AdmissionController::new(Arc::new(UnavailableStore), sink.clone());
        let identity = Identity::parse("fp:c1:hash");

        let check = controller
            .admit(&AdmissionSettings::default(), &identity, fixed_now())
            .await
            .unwrap();

        assert_eq!(check, AdmitCheck::Unchecked);
        assert_eq!(sink.open.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_store_outage_can_fail_closed() {
        let sink = Arc::new(CountingSink::default());
        let controller = AdmissionController::new(Arc::new(UnavailableStore), sink.clone());
        let settings = AdmissionSettings {
            failure_policy: FailurePolicy::FailClosed,
            ..Default::default()
        };

        let result = controller
            .admit_global(&settings, "10.0.0.1", fixed_now())
            .await;

        assert!(matches!(result, Err(GuardError::Store(_))));
        assert_eq!(sink.closed.load(Ordering::Relaxed), 1);
    }
}
