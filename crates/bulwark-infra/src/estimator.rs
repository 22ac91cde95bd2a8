//! Token-price cost estimator.

use bulwark_core::ports::{CostEstimator, GenerationRequest, TokenUsage};

/// Rough characters-per-token ratio for English prompts.
const CHARS_PER_TOKEN: u64 = 4;

/// USD prices per thousand tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTable {
    pub input_per_1k_usd: f64,
    pub output_per_1k_usd: f64,
    /// Output budget assumed when the request does not cap it.
    pub default_output_tokens: u32,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            input_per_1k_usd: 0.003,
            output_per_1k_usd: 0.015,
            default_output_tokens: 1024,
        }
    }
}

impl PriceTable {
    /// Load prices from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            input_per_1k_usd: std::env::var("GUARD_PRICE_INPUT_PER_1K_USD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.input_per_1k_usd),
            output_per_1k_usd: std::env::var("GUARD_PRICE_OUTPUT_PER_1K_USD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.output_per_1k_usd),
            default_output_tokens: std::env::var("GUARD_DEFAULT_OUTPUT_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_output_tokens),
        }
    }
}

/// Prices requests from their token counts.
#[derive(Debug, Clone, Default)]
pub struct TokenPriceEstimator {
    prices: PriceTable,
}

impl TokenPriceEstimator {
    pub fn new(prices: PriceTable) -> Self {
        Self { prices }
    }

    fn price(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let usd = (input_tokens as f64 * self.prices.input_per_1k_usd
            + output_tokens as f64 * self.prices.output_per_1k_usd)
            / 1000.0;
        if usd.is_finite() { usd.max(0.0) } else { 0.0 }
    }
}

impl CostEstimator for TokenPriceEstimator {
    fn estimate(&self, request: &GenerationRequest) -> f64 {
        let chars = request.prompt.chars().count() as u64;
        let input_tokens = chars.div_ceil(CHARS_PER_TOKEN);
        let output_tokens = request
            .max_output_tokens
            .unwrap_or(self.prices.default_output_tokens);
        self.price(input_tokens, u64::from(output_tokens))
    }

    fn actual(&self, usage: &TokenUsage) -> f64 {
        self.price(usage.input_tokens, usage.output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> TokenPriceEstimator {
        TokenPriceEstimator::new(PriceTable {
            input_per_1k_usd: 1.0,
            output_per_1k_usd: 2.0,
            default_output_tokens: 500,
        })
    }

    #[test]
    fn test_estimate_from_prompt_length() {
        let request = GenerationRequest {
            prompt: "a".repeat(4000),
            max_output_tokens: Some(1000),
        };
        // 1000 input tokens at $1/1k plus 1000 output tokens at $2/1k
        assert!((estimator().estimate(&request) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_uses_default_output_budget() {
        let request = GenerationRequest {
            prompt: String::new(),
            max_output_tokens: None,
        };
        assert!((estimator().estimate(&request) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_actual_from_usage() {
        let usage = TokenUsage {
            input_tokens: 2000,
            output_tokens: 250,
        };
        assert!((estimator().actual(&usage) - 2.5).abs() < 1e-9);
    }
}
