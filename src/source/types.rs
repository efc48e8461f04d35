//! Source result and telemetry types

use crate::record::{EnrichmentRecord, IdentityHints};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The closed set of source variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// B2B people directory API
    Primary,
    /// Professional-network profile scraping
    Network,
    /// Company website crawler
    Website,
    /// LLM research
    Ai,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Network => "network",
            Self::Website => "website",
            Self::Ai => "ai",
        }
    }

    /// The outcome tag for waterfall stages; `None` for sources that cannot
    /// take part in the waterfall.
    pub fn enrichment_source(&self) -> Option<EnrichmentSource> {
        match self {
            Self::Primary => Some(EnrichmentSource::Primary),
            Self::Network => Some(EnrichmentSource::Network),
            Self::Ai => Some(EnrichmentSource::Ai),
            Self::Website => None,
        }
    }

    /// Sources billed per call.
    pub fn is_metered(&self) -> bool {
        matches!(self, Self::Ai)
    }

    /// Whether the identity hint this source needs is present.
    pub fn accepts(&self, hints: &IdentityHints) -> bool {
        match self {
            Self::Primary => hints.has_company(),
            Self::Network => hints.profile_url.is_some(),
            Self::Website => hints.company_domain.is_some(),
            Self::Ai => true,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "network" => Ok(Self::Network),
            "website" => Ok(Self::Website),
            "ai" => Ok(Self::Ai),
            other => Err(format!("unknown source '{}'", other)),
        }
    }
}

/// Which waterfall stage produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentSource {
    Primary,
    Network,
    Ai,
}

impl EnrichmentSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Primary => SourceKind::Primary,
            Self::Network => SourceKind::Network,
            Self::Ai => SourceKind::Ai,
        }
    }
}

/// Annotations produced by research-style sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchNotes {
    #[serde(default)]
    pub alternate_emails: Vec<String>,
    #[serde(default)]
    pub alternate_companies: Vec<String>,
    pub reasoning_note: Option<String>,
    /// Source-reported 0-1 confidence, passed through unmodified.
    pub confidence_score: Option<f64>,
}

/// The result of one adapter call for one entity.
///
/// Built once through the constructors below and then only read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub success: bool,
    pub data: Option<EnrichmentRecord>,
    pub error: Option<String>,
    /// URL or identifier of the entity at the source
    pub source_ref: Option<String>,
    pub raw_response: Option<Value>,
    pub duration_ms: u64,
    /// Money spent producing this result (metered sources only)
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub research: Option<ResearchNotes>,
}

impl ScrapeResult {
    /// A successful result carrying `data`.
    pub fn found(data: EnrichmentRecord) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::default()
        }
    }

    /// The source was reachable but had nothing. Not an error.
    pub fn miss() -> Self {
        Self::default()
    }

    /// The source was attempted and failed.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_source_ref(mut self, source_ref: impl Into<String>) -> Self {
        self.source_ref = Some(source_ref.into());
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw_response = Some(raw);
        self
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd.max(0.0);
        self
    }

    pub fn with_research(mut self, notes: ResearchNotes) -> Self {
        self.research = Some(notes);
        self
    }

    pub fn is_miss(&self) -> bool {
        !self.success && self.error.is_none()
    }
}

/// Per-session request counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdapterStats {
    /// Always `successful_requests + failed_requests`.
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub items_found: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

impl AdapterStats {
    /// Fresh counters with the start time set.
    pub fn started() -> Self {
        Self {
            start_time: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn record_attempt(&mut self) {
        self.total_requests += 1;
    }

    pub fn record_success(&mut self) {
        self.successful_requests += 1;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.failed_requests += 1;
        self.errors.push(error.into());
    }

    /// An item that could not be parsed. Does not count as a failed request.
    pub fn record_item_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn add_items(&mut self, count: usize) {
        self.items_found += count as u64;
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    pub fn duration_seconds(&self) -> f64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        }
    }
}

/// Bulk query parameters for `search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCriteria {
    pub company_domains: Vec<String>,
    pub company_names: Vec<String>,
    pub job_titles: Vec<String>,
    pub industries: Vec<String>,
    pub locations: Vec<String>,
    pub profile_urls: Vec<String>,
    pub keywords: Option<String>,
    pub leads_per_company: u32,
    pub max_results: usize,
}

impl Default for SearchCriteria {
    fn default() -> Self {
        Self {
            company_domains: Vec::new(),
            company_names: Vec::new(),
            job_titles: Vec::new(),
            industries: Vec::new(),
            locations: Vec::new(),
            profile_urls: Vec::new(),
            keywords: None,
            leads_per_company: 3,
            max_results: 100,
        }
    }
}

impl SearchCriteria {
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            company_domains: vec![domain.into()],
            ..Self::default()
        }
    }

    pub fn for_company(name: impl Into<String>) -> Self {
        Self {
            company_names: vec![name.into()],
            ..Self::default()
        }
    }
}
