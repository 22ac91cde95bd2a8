//! Data Transfer Objects - request/response types for the gate API.

use serde::{Deserialize, Serialize};

/// Response to a successful challenge issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge_id: String,
    pub expires_in_seconds: u64,
}

/// Pre-call admission request. Without an explicit estimate the cost is
/// derived from the prompt and output budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub estimated_cost_usd: Option<f64>,
    pub prompt: Option<String>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub stable_key: String,
    pub estimated_cost_usd: f64,
    /// Ledger entry holding the estimate; echo it in the cost report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    /// Some check was skipped because the store was unreachable.
    pub degraded: bool,
}

/// Post-call true-up. An explicit amount wins over token counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostReport {
    /// Receipt from the admission response. Without it the amount is
    /// recorded on top of the estimate.
    pub receipt: Option<String>,
    pub actual_cost_usd: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerResponse {
    pub stable_key: String,
    pub burst_total_usd: f64,
    pub day_total_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttled_for_seconds: Option<u64>,
}

/// Fail-open and fail-closed counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyCounts {
    pub fail_open_total: u64,
    pub fail_closed_total: u64,
    pub suppressed_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
    pub anomalies: AnomalyCounts,
}
