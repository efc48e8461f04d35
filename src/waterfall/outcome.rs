//! Enrichment outcomes

use crate::record::EnrichmentRecord;
use crate::source::{EnrichmentSource, ScrapeResult};
use serde::{Deserialize, Serialize};

/// Keys owned by the outcome; never taken from input records or payloads.
pub const RESERVED_KEYS: &[&str] = &[
    "enrichment_source",
    "enrichment_cost",
    "alternate_emails",
    "alternate_companies",
    "reasoning_note",
    "errors",
];

pub const CANCELLED: &str = "cancelled";

/// The input record merged with the winning payload, plus provenance.
///
/// Serializes as one flat object: the record's own keys next to the
/// enrichment fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentOutcome {
    #[serde(flatten)]
    pub record: EnrichmentRecord,
    /// `None` iff no source succeeded.
    pub enrichment_source: Option<EnrichmentSource>,
    /// Nonzero only when a metered source won.
    #[serde(default)]
    pub enrichment_cost: f64,
    #[serde(default)]
    pub alternate_emails: Vec<String>,
    #[serde(default)]
    pub alternate_companies: Vec<String>,
    pub reasoning_note: Option<String>,
    /// Per-source diagnostics, in attempt order.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl EnrichmentOutcome {
    /// An outcome with nothing merged yet.
    pub fn pending(mut record: EnrichmentRecord) -> Self {
        for key in RESERVED_KEYS {
            record.remove(key);
        }
        Self {
            record,
            ..Self::default()
        }
    }

    /// A record whose orchestration aborted.
    pub fn failed(record: EnrichmentRecord, error: impl Into<String>) -> Self {
        let mut outcome = Self::pending(record);
        outcome.errors.push(error.into());
        outcome
    }

    /// A record that was never started because the run was cancelled.
    pub fn cancelled(record: EnrichmentRecord) -> Self {
        Self::failed(record, CANCELLED)
    }

    pub fn is_enriched(&self) -> bool {
        self.enrichment_source.is_some()
    }

    pub fn was_cancelled(&self) -> bool {
        self.errors.iter().any(|e| e == CANCELLED)
    }

    /// Merge a winning result from `source`.
    pub(crate) fn apply(&mut self, source: EnrichmentSource, result: ScrapeResult) {
        if let Some(data) = &result.data {
            let mut payload = data.clone();
            for key in RESERVED_KEYS {
                payload.remove(key);
            }
            self.record.merge_from(&payload);
        }
        self.enrichment_source = Some(source);
        self.enrichment_cost = if source.kind().is_metered() {
            result.cost_usd
        } else {
            0.0
        };
        if let Some(notes) = result.research {
            self.alternate_emails = notes.alternate_emails;
            self.alternate_companies = notes.alternate_companies;
            self.reasoning_note = notes.reasoning_note;
            if let Some(score) = notes.confidence_score {
                if self.record.get("confidence_score").is_none() {
                    self.record.insert("confidence_score", score);
                }
            }
        }
    }
}
