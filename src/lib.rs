//! Cascade: waterfall contact enrichment
//!
//! Fills in missing contact and company fields by querying external data
//! sources in priority order and stopping at the first that answers.
//!
//! # Core Concepts
//!
//! - **Sources**: a people directory, a professional-network scraper and an
//!   LLM researcher, each behind the `SourceAdapter` contract
//! - **Waterfall**: per-record sequential fallback across sources
//! - **Batch**: bounded-concurrency fan-out over many records
//! - **Throttling**: per-account rate limits, bounded retry, cancellation
//!
//! # Example
//!
//! ```
//! use cascade::{EnrichmentRecord, WaterfallOrchestrator};
//!
//! let orchestrator = WaterfallOrchestrator::new();
//! let record = EnrichmentRecord::new().with("company_domain", "acme.com");
//! assert!(orchestrator.source_kinds().is_empty());
//! assert_eq!(record.company_domain(), Some("acme.com"));
//! ```

pub mod config;
pub mod cost;
pub mod record;
pub mod source;
pub mod throttle;
pub mod waterfall;

pub use config::{CascadeConfig, ConfigError};
pub use cost::{CostEstimator, PricingTable};
pub use record::{EnrichmentRecord, IdentityHints};
pub use source::{
    AdapterSession, AdapterStats, EnrichmentSource, ScrapeResult, SearchCriteria, SourceAdapter,
    SourceError, SourceKind, SourceProvider,
};
pub use throttle::{CancellationToken, LimiterRegistry, RateLimiter, RetryPolicy, RetryingExecutor};
pub use waterfall::{
    BatchRunner, EnrichmentOutcome, PipelineStats, SourceToggles, WaterfallError,
    WaterfallOrchestrator,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
