//! Pipeline counters

use crate::cost::round_cost;
use crate::source::EnrichmentSource;
use serde::Serialize;

/// Counters for one orchestrator. Only ever incremented.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub total_enriched: u64,
    pub primary_hits: u64,
    pub network_hits: u64,
    pub ai_hits: u64,
    pub failed: u64,
    pub total_cost: f64,
}

impl PipelineStats {
    pub fn record_hit(&mut self, source: EnrichmentSource, cost: f64) {
        self.total_enriched += 1;
        match source {
            EnrichmentSource::Primary => self.primary_hits += 1,
            EnrichmentSource::Network => self.network_hits += 1,
            EnrichmentSource::Ai => self.ai_hits += 1,
        }
        self.total_cost = round_cost(self.total_cost + cost.max(0.0));
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn hits_for(&self, source: EnrichmentSource) -> u64 {
        match source {
            EnrichmentSource::Primary => self.primary_hits,
            EnrichmentSource::Network => self.network_hits,
            EnrichmentSource::Ai => self.ai_hits,
        }
    }

    /// Records processed so far.
    pub fn processed(&self) -> u64 {
        self.total_enriched + self.failed
    }

    pub fn success_rate(&self) -> f64 {
        match self.processed() {
            0 => 0.0,
            n => self.total_enriched as f64 / n as f64,
        }
    }
}
