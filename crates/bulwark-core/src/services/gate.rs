//! Request pipeline: challenge, admission, then spend.

use std::sync::Arc;

use crate::domain::{
    AdmitCheck, ChallengeGrant, ChallengeValidation, CostCheck, GateTicket, InvalidReason,
    IssueOutcome, LedgerSnapshot, ReasonCode, Rejection, parse_cost_member,
};
use crate::error::GuardError;
use crate::identity::Identity;
use crate::ports::{AnomalySink, AtomicStore, Clock, SettingsSource, TokenGenerator};
use crate::services::{AdmissionController, ChallengeIssuer, CostLedger};
use crate::settings::GuardSettings;

/// Runs every check a metered request must pass, in order.
pub struct Gatekeeper {
    issuer: ChallengeIssuer,
    admission: AdmissionController,
    ledger: CostLedger,
    settings: Arc<dyn SettingsSource>,
    clock: Arc<dyn Clock>,
}

impl Gatekeeper {
    pub fn new(
        store: Arc<dyn AtomicStore>,
        settings: Arc<dyn SettingsSource>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn TokenGenerator>,
        anomalies: Arc<dyn AnomalySink>,
    ) -> Self {
        Self {
            issuer: ChallengeIssuer::new(store.clone(), tokens, anomalies.clone()),
            admission: AdmissionController::new(store.clone(), anomalies.clone()),
            ledger: CostLedger::new(store, anomalies),
            settings,
            clock,
        }
    }

    /// Settings for this check; defaults when the source is unreachable.
    pub async fn settings(&self) -> GuardSettings {
        match self.settings.load().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Settings unavailable, using defaults");
                GuardSettings::default()
            }
        }
    }

    /// Issue a challenge for a stable key.
    pub async fn issue_challenge(&self, stable_key: &str) -> Result<ChallengeGrant, GuardError> {
        let settings = self.settings().await;
        let now = self.clock.now();

        match self.issuer.issue(&settings.challenge, stable_key, now).await? {
            IssueOutcome::Issued(grant) => Ok(grant),
            IssueOutcome::Rejected { retry_after } => Err(Rejection::new(
                ReasonCode::RateLimited,
                "challenge requested too soon",
            )
            .with_retry_after(retry_after)
            .into()),
        }
    }

    /// Admit a request or return the first rejection.
    ///
    /// The challenge is checked up front but consumed only once the windows
    /// and the ledger have let the request through, so a retryable
    /// rejection leaves it usable for the retry.
    pub async fn admit(
        &self,
        identity: &Identity,
        estimated_cost_usd: f64,
    ) -> Result<GateTicket, GuardError> {
        let settings = self.settings().await;
        let now = self.clock.now();
        let stable_key = identity.stable_key();
        let mut degraded = false;

        if stable_key.is_empty() {
            return Err(
                Rejection::new(ReasonCode::ChallengeInvalid, "empty client identity").into(),
            );
        }

        let challenge_id = identity.challenge_id();
        match challenge_id {
            Some(challenge_id) => {
                let validation = self
                    .issuer
                    .validate(&settings.challenge, stable_key, challenge_id, now)
                    .await?;
                degraded |= accept_challenge(validation)?;
            }
            None if identity.is_fingerprint() || settings.challenge.require_for_bare_identity => {
                return Err(challenge_invalid(InvalidReason::Missing).into());
            }
            None => {}
        }

        let admission = self
            .admission
            .admit(&settings.admission, identity, now)
            .await?;
        degraded |= admission == AdmitCheck::Unchecked;
        if let Some(rejection) = admission.into_rejection() {
            return Err(rejection.into());
        }

        let cost = self
            .ledger
            .check_cost_based_throttling(
                &settings.cost,
                stable_key,
                &identity.receipt(),
                estimated_cost_usd,
                now,
            )
            .await?;
        let cost_receipt = match cost {
            CostCheck::Allowed { ref receipt, .. } => Some(receipt.clone()),
            CostCheck::Unchecked => {
                degraded = true;
                None
            }
            CostCheck::Throttled { .. } => None,
        };
        if let Some(rejection) = cost.into_rejection() {
            return Err(rejection.into());
        }

        // A concurrent duplicate may have won the challenge in the meantime;
        // its receipts are the same members as ours.
        if let Some(challenge_id) = challenge_id {
            let validation = self
                .issuer
                .validate_and_consume(&settings.challenge, stable_key, challenge_id, now)
                .await?;
            degraded |= accept_challenge(validation)?;
        }

        Ok(GateTicket {
            identity: identity.full().to_string(),
            stable_key: stable_key.to_string(),
            estimated_cost_usd,
            cost_receipt,
            degraded,
        })
    }

    /// System-wide load shield, counted without deduplication.
    pub async fn admit_global(&self, identity: &str) -> Result<(), GuardError> {
        let settings = self.settings().await;
        let check = self
            .admission
            .admit_global(&settings.admission, identity, self.clock.now())
            .await?;

        match check.into_rejection() {
            Some(rejection) => Err(rejection.into()),
            None => Ok(()),
        }
    }

    /// Record the true cost once the downstream call finished. Never fails.
    ///
    /// `cost_receipt` is the ticket's [`GateTicket::cost_receipt`]. When it
    /// belongs to `identity`, that estimate is replaced; otherwise the amount
    /// is recorded as a new receipt.
    pub async fn settle(
        &self,
        identity: &Identity,
        cost_receipt: Option<&str>,
        actual_cost_usd: f64,
    ) {
        let settings = self.settings().await;

        let owned = cost_receipt.and_then(|member| {
            let (receipt, _) = parse_cost_member(member)?;
            identity.owns_receipt(receipt).then_some((member, receipt))
        });
        if cost_receipt.is_some() && owned.is_none() {
            tracing::warn!(
                identity = %identity,
                "Cost receipt not issued to this identity, recording separately"
            );
        }
        let (replaces, receipt) = match owned {
            Some((member, receipt)) => (Some(member), receipt.to_string()),
            None => (None, identity.receipt()),
        };

        self.ledger
            .record_actual_cost(
                &settings.cost,
                identity.stable_key(),
                &receipt,
                actual_cost_usd,
                replaces,
                self.clock.now(),
            )
            .await;
    }

    pub async fn ledger_snapshot(&self, stable_key: &str) -> Result<LedgerSnapshot, GuardError> {
        let settings = self.settings().await;
        self.ledger
            .snapshot(&settings.cost, stable_key, self.clock.now())
            .await
    }

    pub fn issuer(&self) -> &ChallengeIssuer {
        &self.issuer
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }
}

/// Ok(true) when the check was skipped under a fail-open policy.
fn accept_challenge(validation: ChallengeValidation) -> Result<bool, Rejection> {
    match validation {
        ChallengeValidation::Consumed | ChallengeValidation::Valid => Ok(false),
        ChallengeValidation::Unchecked => Ok(true),
        ChallengeValidation::Invalid(reason) => Err(challenge_invalid(reason)),
    }
}

fn challenge_invalid(reason: InvalidReason) -> Rejection {
    Rejection::new(ReasonCode::ChallengeInvalid, format!("challenge {reason}"))
}
