//! Cost estimator port.

use serde::{Deserialize, Serialize};

/// The parts of a generation request that drive its price.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_output_tokens: Option<u32>,
}

/// Token counts reported by the downstream generator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Turns requests into USD amounts. Both results are non-negative.
pub trait CostEstimator: Send + Sync {
    /// Price estimate before the generator runs.
    fn estimate(&self, request: &GenerationRequest) -> f64;

    /// True price once usage is known.
    fn actual(&self, usage: &TokenUsage) -> f64;
}
