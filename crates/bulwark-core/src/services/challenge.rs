//! Challenge issuance and one-time consumption.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{ChallengeGrant, ChallengeValidation, InvalidReason, IssueOutcome};
use crate::error::GuardError;
use crate::keys;
use crate::ports::{
    AnomalySink, AtomicStore, Component, ConsumeRequest, ConsumeVerdict, IssueRequest,
    IssueVerdict, TokenGenerator,
};
use crate::settings::{ChallengeSettings, FailurePolicy};

/// Issues short-lived, single-use challenges bound to a stable key.
pub struct ChallengeIssuer {
    store: Arc<dyn AtomicStore>,
    tokens: Arc<dyn TokenGenerator>,
    anomalies: Arc<dyn AnomalySink>,
}

impl ChallengeIssuer {
    pub fn new(
        store: Arc<dyn AtomicStore>,
        tokens: Arc<dyn TokenGenerator>,
        anomalies: Arc<dyn AnomalySink>,
    ) -> Self {
        Self {
            store,
            tokens,
            anomalies,
        }
    }

    /// Issue a challenge, or hand back the one issued moments ago.
    ///
    /// Inside the cooldown the newest active challenge is returned again
    /// when it is younger than `cooldown + epsilon`; otherwise the caller is
    /// told how long to wait. Store failures are returned as errors: no
    /// challenge exists without the store.
    pub async fn issue(
        &self,
        settings: &ChallengeSettings,
        stable_key: &str,
        now: DateTime<Utc>,
    ) -> Result<IssueOutcome, GuardError> {
        let request = IssueRequest {
            marker_key: keys::issuance_marker(stable_key),
            index_key: keys::active_challenges(stable_key),
            token_prefix: keys::CHALLENGE_TOKEN_PREFIX.to_string(),
            candidate_id: self.tokens.generate(),
            owner: stable_key.to_string(),
            now: keys::epoch_secs(now),
            ttl_secs: settings.ttl_secs as f64,
            cooldown_secs: settings.cooldown_secs,
            reuse_window_secs: settings.cooldown_secs + settings.reuse_epsilon_secs,
            grace_secs: settings.expired_grace_secs as f64,
            max_active: settings.max_active_per_key.max(1),
        };

        let verdict = match self.store.issue_or_reuse(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                self.anomalies
                    .store_unavailable(Component::Challenge, FailurePolicy::FailClosed, &e);
                return Err(e.into());
            }
        };

        let outcome = match verdict {
            IssueVerdict::Issued {
                challenge_id,
                expires_in,
            } => {
                tracing::debug!(stable_key = %stable_key, "Challenge issued");
                IssueOutcome::Issued(ChallengeGrant {
                    challenge_id,
                    expires_in,
                    reused: false,
                })
            }
            IssueVerdict::Reused {
                challenge_id,
                expires_in,
            } => {
                tracing::debug!(stable_key = %stable_key, "Challenge reused inside cooldown");
                IssueOutcome::Issued(ChallengeGrant {
                    challenge_id,
                    expires_in,
                    reused: true,
                })
            }
            IssueVerdict::CoolingDown { retry_after } => {
                tracing::info!(
                    stable_key = %stable_key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Challenge issuance rejected during cooldown"
                );
                IssueOutcome::Rejected { retry_after }
            }
        };

        Ok(outcome)
    }

    /// Atomically check and delete a challenge. Two concurrent attempts on
    /// the same id cannot both see `Consumed`.
    pub async fn validate_and_consume(
        &self,
        settings: &ChallengeSettings,
        stable_key: &str,
        challenge_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ChallengeValidation, GuardError> {
        self.check(settings, stable_key, challenge_id, now, true).await
    }

    /// Same checks as [`Self::validate_and_consume`], leaving a valid
    /// challenge in place.
    pub async fn validate(
        &self,
        settings: &ChallengeSettings,
        stable_key: &str,
        challenge_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ChallengeValidation, GuardError> {
        self.check(settings, stable_key, challenge_id, now, false).await
    }

    async fn check(
        &self,
        settings: &ChallengeSettings,
        stable_key: &str,
        challenge_id: &str,
        now: DateTime<Utc>,
        delete: bool,
    ) -> Result<ChallengeValidation, GuardError> {
        let request = ConsumeRequest {
            token_key: keys::challenge_token(challenge_id),
            index_key: keys::active_challenges(stable_key),
            challenge_id: challenge_id.to_string(),
            owner: stable_key.to_string(),
            now: keys::epoch_secs(now),
            delete,
        };

        let verdict = match self.store.consume_once(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                let policy = settings.failure_policy;
                self.anomalies
                    .store_unavailable(Component::Challenge, policy, &e);
                return match policy {
                    FailurePolicy::FailOpen => Ok(ChallengeValidation::Unchecked),
                    FailurePolicy::FailClosed => Err(e.into()),
                };
            }
        };

        let validation = match verdict {
            ConsumeVerdict::Consumed => ChallengeValidation::Consumed,
            ConsumeVerdict::Valid => ChallengeValidation::Valid,
            ConsumeVerdict::Missing => ChallengeValidation::Invalid(InvalidReason::Missing),
            ConsumeVerdict::Expired => ChallengeValidation::Invalid(InvalidReason::Expired),
            ConsumeVerdict::Mismatch => {
                tracing::warn!(
                    stable_key = %stable_key,
                    "Challenge presented by a different owner"
                );
                ChallengeValidation::Invalid(InvalidReason::Mismatch)
            }
        };

        Ok(validation)
    }
}
