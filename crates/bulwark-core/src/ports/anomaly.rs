//! Reporting for fail-open and fail-closed infrastructure events.

use std::fmt;

use crate::error::StoreError;
use crate::settings::FailurePolicy;

/// Gate component that hit the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Challenge,
    Admission,
    GlobalAdmission,
    CostLedger,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Challenge => "challenge",
            Component::Admission => "admission",
            Component::GlobalAdmission => "global_admission",
            Component::CostLedger => "cost_ledger",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives store failures. Fail-open paths must never drop these silently.
pub trait AnomalySink: Send + Sync {
    fn store_unavailable(&self, component: Component, policy: FailurePolicy, error: &StoreError);
}

/// Logs every anomaly.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnomalySink;

impl AnomalySink for TracingAnomalySink {
    fn store_unavailable(&self, component: Component, policy: FailurePolicy, error: &StoreError) {
        tracing::error!(
            component = %component,
            fail_open = policy.is_open(),
            error = %error,
            "Guard store unavailable"
        );
    }
}
