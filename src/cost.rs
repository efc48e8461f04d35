//! Token-to-currency conversion for metered sources
//!
//! One `CostEstimator` is shared by every session of an AI provider, so its
//! running totals sit behind a lock.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Price per million input/output tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTier {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl PriceTier {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input = input_tokens as f64 / TOKENS_PER_UNIT * self.input_per_million;
        let output = output_tokens as f64 / TOKENS_PER_UNIT * self.output_per_million;
        round_cost(input + output)
    }
}

/// Two-tier pricing chosen by a case-insensitive substring of the model id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingTable {
    pub discount_keyword: String,
    pub discount: PriceTier,
    pub standard: PriceTier,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            discount_keyword: "haiku".to_string(),
            discount: PriceTier {
                input_per_million: 0.25,
                output_per_million: 1.25,
            },
            standard: PriceTier {
                input_per_million: 3.0,
                output_per_million: 15.0,
            },
        }
    }
}

impl PricingTable {
    pub fn tier_for(&self, model: &str) -> &PriceTier {
        let keyword = self.discount_keyword.to_lowercase();
        if !keyword.is_empty() && model.to_lowercase().contains(&keyword) {
            &self.discount
        } else {
            &self.standard
        }
    }

    pub fn estimate(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        self.tier_for(model).cost(input_tokens, output_tokens)
    }
}

/// Round to six decimal places.
pub fn round_cost(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Accumulated token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub calls: u64,
}

/// Running cost accounting for one model.
#[derive(Debug)]
pub struct CostEstimator {
    model: String,
    pricing: PricingTable,
    totals: Mutex<TokenTotals>,
}

impl CostEstimator {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_pricing(model, PricingTable::default())
    }

    pub fn with_pricing(model: impl Into<String>, pricing: PricingTable) -> Self {
        Self {
            model: model.into(),
            pricing,
            totals: Mutex::new(TokenTotals::default()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Cost of one call, without recording it.
    pub fn estimate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.pricing.estimate(&self.model, input_tokens, output_tokens)
    }

    /// Add one call's usage to the totals and return its cost.
    pub fn record(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        {
            let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
            totals.input_tokens += input_tokens;
            totals.output_tokens += output_tokens;
            totals.calls += 1;
        }
        self.estimate(input_tokens, output_tokens)
    }

    pub fn totals(&self) -> TokenTotals {
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cost of everything recorded so far, recomputed from the token totals.
    pub fn total_cost(&self) -> f64 {
        let totals = self.totals();
        self.estimate(totals.input_tokens, totals.output_tokens)
    }
}
